//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Order lifecycle outcomes
//! - Auction activity
//! - Escrow operations
//! - Chain connection status

use crate::error::RelayerResult;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram, Counter,
    CounterVec, Encoder, GaugeVec, Histogram, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Order metrics
    pub static ref ORDERS_ANNOUNCED: Counter = register_counter!(
        "swapline_orders_announced_total",
        "Total orders admitted and announced"
    ).unwrap();

    pub static ref ORDERS_COMPLETED: Counter = register_counter!(
        "swapline_orders_completed_total",
        "Total orders completed with funds released on both chains"
    ).unwrap();

    pub static ref ORDERS_RECOVERED: Counter = register_counter!(
        "swapline_orders_recovered_total",
        "Total orders unwound by cancelling their escrows"
    ).unwrap();

    pub static ref ORDERS_FAILED: Counter = register_counter!(
        "swapline_orders_failed_total",
        "Total orders requiring manual intervention"
    ).unwrap();

    pub static ref EXECUTION_LATENCY: Histogram = register_histogram!(
        "swapline_order_execution_seconds",
        "Announcement-to-completion latency",
        vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    // Lifecycle event metrics
    pub static ref LIFECYCLE_EVENTS: CounterVec = register_counter_vec!(
        "swapline_lifecycle_events_total",
        "Total lifecycle events emitted by type",
        &["event_type"]
    ).unwrap();

    // Auction metrics
    pub static ref AUCTION_TICKS: Counter = register_counter!(
        "swapline_auction_ticks_total",
        "Total auction price ticks published"
    ).unwrap();

    // Escrow metrics
    pub static ref ESCROWS_CREATED: CounterVec = register_counter_vec!(
        "swapline_escrows_created_total",
        "Total escrows created",
        &["chain_id"]
    ).unwrap();

    pub static ref ESCROWS_CANCELLED: CounterVec = register_counter_vec!(
        "swapline_escrows_cancelled_total",
        "Total escrows cancelled during recovery",
        &["chain_id"]
    ).unwrap();

    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "swapline_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "swapline_chain_block_height",
        "Current block height per chain",
        &["chain_id"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::RelayerError::Internal(e.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::RelayerError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// Helper functions to record metrics

pub fn record_order_announced() {
    ORDERS_ANNOUNCED.inc();
}

pub fn record_order_completed(execution_secs: f64) {
    ORDERS_COMPLETED.inc();
    EXECUTION_LATENCY.observe(execution_secs);
}

pub fn record_order_recovered() {
    ORDERS_RECOVERED.inc();
}

pub fn record_order_failed() {
    ORDERS_FAILED.inc();
}

pub fn record_lifecycle_event(event_type: &str) {
    LIFECYCLE_EVENTS.with_label_values(&[event_type]).inc();
}

pub fn record_auction_tick() {
    AUCTION_TICKS.inc();
}

pub fn record_escrow_created(chain_id: u64) {
    ESCROWS_CREATED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_escrow_cancelled(chain_id: u64) {
    ESCROWS_CANCELLED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_block_height(chain_id: u64, block_number: u64) {
    CHAIN_BLOCK_HEIGHT
        .with_label_values(&[&chain_id.to_string()])
        .set(block_number as f64);
}
