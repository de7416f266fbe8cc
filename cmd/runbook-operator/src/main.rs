use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};
use tokio::sync::watch;

use helios_runbook_operator::config::Config;
use helios_runbook_operator::controller::{self, execution::ExecutionReconciler, runbook::RunbookReconciler};
use helios_runbook_operator::launcher::{ProcessLauncher, WorkerLauncher};
use helios_runbook_operator::notify::{NotificationKind, Notifier};
use helios_runbook_operator::store::{KvResourceStore, ResourceStore};
use helios_runbook_operator::{leader, metrics};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("operator exited with error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cfg = Config::from_env()?;
    info!("starting runbook operator");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let metrics_addr = cfg.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::serve_metrics(&metrics_addr).await {
            error!("metrics server error: {e}");
        }
    });
    let probe_addr = cfg.health_probe_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::serve_health(&probe_addr).await {
            error!("health probe server error: {e}");
        }
    });

    if cfg.enable_leader_election {
        let identity = format!(
            "{}-{}",
            hostname(),
            std::process::id()
        );
        leader::acquire(&cfg.nats_url, &identity, shutdown_rx.clone()).await?;
    }

    let store: Arc<dyn ResourceStore> = Arc::new(
        KvResourceStore::connect(&cfg.nats_url, &cfg.resource_bucket).await?,
    );
    let launcher: Arc<dyn WorkerLauncher> = Arc::new(ProcessLauncher::new());

    let runbooks = RunbookReconciler::new(Arc::clone(&store));
    let mut executions =
        ExecutionReconciler::new(Arc::clone(&store), launcher, &cfg.executor_image);
    if let Some(url) = cfg.notify_webhook_url.as_deref().filter(|u| !u.is_empty()) {
        let notifier = Notifier::new(url, NotificationKind::parse(&cfg.notify_type))
            .context("creating notifier")?;
        executions = executions.with_notifier(Arc::new(notifier));
    }

    controller::run(store, runbooks, executions, shutdown_rx).await?;
    info!("operator stopped");
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "runbook-operator".to_string())
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
