//! Worker entry point: runs the steps of one execution and exits zero iff
//! no step failed without `continueOnError`.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};
use tokio::sync::watch;

use helios_runbook_operator::store::{KvResourceStore, ResourceStore};
use helios_runbook_operator::worker::Worker;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("execution failed: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let execution_name =
        std::env::var("EXECUTION_NAME").context("EXECUTION_NAME must be set")?;
    let execution_namespace =
        std::env::var("EXECUTION_NAMESPACE").context("EXECUTION_NAMESPACE must be set")?;
    let nats_url =
        std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
    let bucket =
        std::env::var("RESOURCE_BUCKET").unwrap_or_else(|_| "helios-automation".to_string());

    info!("executing {execution_namespace}/{execution_name}");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let store: Arc<dyn ResourceStore> =
        Arc::new(KvResourceStore::connect(&nats_url, &bucket).await?);
    let worker = Worker::new(store);

    worker
        .run(&execution_namespace, &execution_name, shutdown_rx)
        .await
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!("failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
