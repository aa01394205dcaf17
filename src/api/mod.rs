//! HTTP API for health checks and bridge status

use crate::account::AccountSnapshot;
use crate::config::ApiConfig;
use crate::coordinator::BridgeCoordinator;
use crate::error::{BridgeError, BridgeResult};
use crate::index::PgLedgerIndex;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<BridgeCoordinator>,
    pub ledger_index: Arc<PgLedgerIndex>,
    pub chain_name: String,
}

/// Run the HTTP API server
pub async fn run_server(
    config: ApiConfig,
    coordinator: Arc<BridgeCoordinator>,
    ledger_index: Arc<PgLedgerIndex>,
    chain_name: String,
) -> BridgeResult<()> {
    let state = AppState {
        coordinator,
        ledger_index,
        chain_name,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BridgeError::Internal(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| BridgeError::Internal(e.to_string()))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - database reachable and a snapshot cached
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.ledger_index.health_check().await.is_ok();
    let snapshot = state.coordinator.current_snapshot().await.is_some();

    let body = Json(ReadinessResponse {
        ready: database && snapshot,
        database,
        snapshot,
    });
    if database && snapshot {
        (StatusCode::OK, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body)
    }
}

/// Get bridge status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        chain: state.chain_name.clone(),
        snapshot: state.coordinator.current_snapshot().await,
    })
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    snapshot: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    chain: String,
    snapshot: Option<AccountSnapshot>,
}
