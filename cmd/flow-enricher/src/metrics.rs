use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_gauge, register_histogram, Counter, Encoder, Gauge, Histogram,
    TextEncoder,
};

lazy_static! {
    pub static ref FLOWS_CONSUMED: Counter = register_counter!(
        "helios_flow_enricher_flows_consumed_total",
        "Total raw flow records consumed"
    )
    .unwrap();
    pub static ref FLOWS_PRODUCED: Counter = register_counter!(
        "helios_flow_enricher_flows_produced_total",
        "Total enriched flow records confirmed delivered"
    )
    .unwrap();
    pub static ref FLOWS_UNPARSEABLE: Counter = register_counter!(
        "helios_flow_enricher_flows_unparseable_total",
        "Total records skipped because they failed to decode"
    )
    .unwrap();
    pub static ref PRODUCE_ERRORS: Counter = register_counter!(
        "helios_flow_enricher_produce_errors_total",
        "Total batches that failed delivery confirmation"
    )
    .unwrap();
    pub static ref CACHE_DEVICES: Gauge = register_gauge!(
        "helios_flow_enricher_cache_devices",
        "Devices in the current metadata cache snapshot"
    )
    .unwrap();
    pub static ref CACHE_REFRESH_ERRORS: Gauge = register_gauge!(
        "helios_flow_enricher_cache_refresh_errors",
        "Failed cache refresh attempts since start"
    )
    .unwrap();
    pub static ref BATCH_DURATION: Histogram = register_histogram!(
        "helios_flow_enricher_batch_duration_seconds",
        "Time spent enriching and delivering one batch",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
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

pub async fn serve(addr: &str) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
