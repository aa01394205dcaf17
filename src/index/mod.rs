//! Ledger index: the processed-mint boundary
//!
//! The coordinator consults this collaborator before every mint and records
//! the result only after a successful submission. That ordering is what makes
//! mint processing idempotent across a process restart.

use crate::error::BridgeResult;

use async_trait::async_trait;
use ethers::types::H256;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;

/// Processed-mint tracking, keyed by the originating native-chain
/// transaction id
#[async_trait]
pub trait LedgerIndex: Send + Sync {
    async fn is_processed(&self, origin_tx_id: &str) -> BridgeResult<bool>;
    async fn record_processed(&self, origin_tx_id: &str, tx_hash: H256) -> BridgeResult<()>;
}

/// PostgreSQL-backed ledger index
pub struct PgLedgerIndex {
    pool: PgPool,
}

impl PgLedgerIndex {
    pub async fn new(config: &DatabaseConfig) -> BridgeResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Create the processed-mint table if it does not exist yet
    pub async fn run_migrations(&self) -> BridgeResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_mints (
                origin_tx_id TEXT PRIMARY KEY,
                tx_hash VARCHAR(66) NOT NULL,
                processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("ledger index migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> BridgeResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerIndex for PgLedgerIndex {
    async fn is_processed(&self, origin_tx_id: &str) -> BridgeResult<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT origin_tx_id FROM processed_mints WHERE origin_tx_id = $1")
                .bind(origin_tx_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn record_processed(&self, origin_tx_id: &str, tx_hash: H256) -> BridgeResult<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_mints (origin_tx_id, tx_hash)
            VALUES ($1, $2)
            ON CONFLICT (origin_tx_id) DO NOTHING
            "#,
        )
        .bind(origin_tx_id)
        .bind(format!("{tx_hash:?}"))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
