//! Prometheus metrics for monitoring

use crate::error::BridgeResult;
use crate::events::EventKind;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Head / snapshot metrics
    pub static ref SNAPSHOT_HEIGHT: Gauge = register_gauge!(
        "bridge_snapshot_height",
        "Head height of the cached account snapshot"
    )
    .unwrap();

    pub static ref HEADS_DROPPED: Counter = register_counter!(
        "bridge_heads_dropped_total",
        "Heads dropped because a refresh was already in flight"
    )
    .unwrap();

    pub static ref REFRESH_FAILURES: Counter = register_counter!(
        "bridge_refresh_failures_total",
        "Account refreshes that failed and left the previous snapshot in place"
    )
    .unwrap();

    // Event metrics
    pub static ref EVENTS_RECEIVED: CounterVec = register_counter_vec!(
        "bridge_events_received_total",
        "Total contract events received by kind",
        &["kind"]
    )
    .unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: Counter = register_counter!(
        "bridge_transactions_submitted_total",
        "Total transactions submitted"
    )
    .unwrap();

    pub static ref TX_FAILED: Counter = register_counter!(
        "bridge_transactions_failed_total",
        "Total transaction submissions that failed"
    )
    .unwrap();

    pub static ref MINTS_SKIPPED: Counter = register_counter!(
        "bridge_mints_skipped_total",
        "Mint requests short-circuited because the origin tx was already processed"
    )
    .unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> BridgeResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::BridgeError::Internal(e.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::BridgeError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_snapshot_height(height: u64) {
    SNAPSHOT_HEIGHT.set(height as f64);
}

pub fn record_head_dropped() {
    HEADS_DROPPED.inc();
}

pub fn record_refresh_failure() {
    REFRESH_FAILURES.inc();
}

pub fn record_event(kind: EventKind) {
    EVENTS_RECEIVED.with_label_values(&[kind.name()]).inc();
}

pub fn record_tx_submitted() {
    TX_SUBMITTED.inc();
}

pub fn record_tx_failed() {
    TX_FAILED.inc();
}

pub fn record_mint_skipped() {
    MINTS_SKIPPED.inc();
}
