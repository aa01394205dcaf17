//! Bridge Coordinator - native-chain to wrapped-token bridge daemon
//!
//! Watches the wrapped-token contract on the foreign chain, keeps a cached
//! view of the bridge account and issues mint/transfer transactions on
//! behalf of deposits observed on the native chain.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

mod account;
mod api;
mod chain;
mod config;
mod coordinator;
mod error;
mod events;
mod index;
mod metrics;
mod tx;

use account::AccountStateCache;
use chain::EthChainClient;
use config::Settings;
use coordinator::BridgeCoordinator;
use index::PgLedgerIndex;
use metrics::MetricsServer;
use tx::{TransactionIssuer, WalletSigner};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Bridge Coordinator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        chain = %settings.chain.name,
        contract = %settings.bridge.contract_address,
        "Loaded configuration"
    );

    // Initialize the ledger index
    let ledger_index = Arc::new(PgLedgerIndex::new(&settings.database).await?);
    info!("Database connection established");

    ledger_index.run_migrations().await?;

    // Connect to the foreign chain
    let client = Arc::new(EthChainClient::connect(&settings.chain, settings.contract_address()).await?);

    // Load the signing account
    let signer = Arc::new(WalletSigner::from_env(
        &settings.wallet.private_key_env,
        settings.chain.chain_id,
    )?);

    // Assemble the coordinator
    let account = settings.account_address();
    let cache = Arc::new(AccountStateCache::new(
        account,
        client.clone(),
        client.clone(),
    ));
    let issuer = Arc::new(TransactionIssuer::new(
        account,
        settings.chain.chain_id,
        settings.bridge.gas_limit,
        signer,
        client.clone(),
        cache.clone(),
    ));
    let coordinator = Arc::new(BridgeCoordinator::new(
        settings.contract_address(),
        Duration::from_secs(settings.bridge.shutdown_grace_secs),
        cache,
        issuer,
        client.clone(),
        client,
        ledger_index.clone(),
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let coordinator = coordinator.clone();
        let ledger_index = ledger_index.clone();
        let chain_name = settings.chain.name.clone();
        async move {
            if let Err(e) = api::run_server(config, coordinator, ledger_index, chain_name).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Translate process signals into the coordinator's cancellation channel
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping...");
        let _ = cancel_tx.send(true);
    });

    // Run until cancellation or a fatal component error
    let outcome = coordinator.start(cancel_rx).await;

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Bridge Coordinator stopped");
    outcome?;
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,bridge_coordinator=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
