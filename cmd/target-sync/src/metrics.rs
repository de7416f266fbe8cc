use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, Counter,
    CounterVec, Encoder, Gauge, GaugeVec, TextEncoder,
};

lazy_static! {
    pub static ref SYNC_LAST_SUCCESS: Gauge = register_gauge!(
        "helios_target_sync_last_success_timestamp",
        "Unix timestamp of last successful sync"
    )
    .unwrap();
    pub static ref SYNC_DURATION: Gauge = register_gauge!(
        "helios_target_sync_duration_seconds",
        "Duration of last sync cycle"
    )
    .unwrap();
    pub static ref SYNC_DEVICES_TOTAL: Gauge = register_gauge!(
        "helios_target_sync_devices_total",
        "Total devices discovered in last sync"
    )
    .unwrap();
    pub static ref SYNC_INTERFACES_TOTAL: Gauge = register_gauge!(
        "helios_target_sync_interfaces_total",
        "Total interfaces with a usable SNMP index discovered in last sync"
    )
    .unwrap();
    pub static ref SYNC_TARGETS: GaugeVec = register_gauge_vec!(
        "helios_target_sync_targets",
        "Number of targets generated per artifact",
        &["artifact"]
    )
    .unwrap();
    pub static ref SYNC_ERRORS: Counter = register_counter!(
        "helios_target_sync_errors_total",
        "Total sync errors"
    )
    .unwrap();
    pub static ref ARTIFACT_WRITES: CounterVec = register_counter_vec!(
        "helios_target_sync_artifact_writes_total",
        "Total artifact write operations",
        &["name", "namespace", "status"]
    )
    .unwrap();
}

async fn metrics_handler() -> (StatusCode, String) {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    match String::from_utf8(buffer) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}

pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
}

/// Serves the scrape endpoint until the process exits.
pub async fn serve(addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router()).await?;
    Ok(())
}
