use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, Counter, CounterVec, Encoder, TextEncoder,
};

lazy_static! {
    pub static ref RECONCILES: CounterVec = register_counter_vec!(
        "helios_runbook_reconciles_total",
        "Total reconcile passes per controller and outcome",
        &["controller", "outcome"]
    )
    .unwrap();
    pub static ref PHASE_TRANSITIONS: CounterVec = register_counter_vec!(
        "helios_runbook_phase_transitions_total",
        "Total execution phase transitions",
        &["phase"]
    )
    .unwrap();
    pub static ref WORKERS_LAUNCHED: Counter = register_counter!(
        "helios_runbook_workers_launched_total",
        "Total executor workers launched"
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

async fn ping_handler() -> &'static str {
    "ok"
}

/// Serves the metrics scrape endpoint.
pub async fn serve_metrics(addr: &str) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Serves liveness and readiness pings.
pub async fn serve_health(addr: &str) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthz", get(ping_handler))
        .route("/readyz", get(ping_handler));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
