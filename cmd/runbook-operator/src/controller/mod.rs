//! Reconcilers for the two resource kinds and the event loop that drives
//! them.
//!
//! One reconciler instance per kind handles all events sequentially, so the
//! same resource is never reconciled concurrently. Requeues are realized as
//! delayed re-sends into the event channel.

pub mod execution;
pub mod runbook;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info};
use tokio::sync::{mpsc, watch};

use crate::store::{ResourceEvent, ResourceKind, ResourceStore};

/// A reconcile request for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub namespace: String,
    pub name: String,
}

/// Result of a reconcile: optionally, when to look at the resource again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    pub requeue_after: Option<Duration>,
}

impl Outcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue_after(duration: Duration) -> Self {
        Self {
            requeue_after: Some(duration),
        }
    }
}

const ERROR_REQUEUE: Duration = Duration::from_secs(10);

/// Runs both reconcilers against the store's watch stream until shutdown.
pub async fn run(
    store: Arc<dyn ResourceStore>,
    runbooks: runbook::RunbookReconciler,
    executions: execution::ExecutionReconciler,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut events = store.watch().await.map_err(anyhow::Error::from)?;
    let (requeue_tx, mut requeue_rx) = mpsc::channel::<ResourceEvent>(256);

    info!("controllers started");

    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => {
                info!("controllers shutting down");
                return Ok(());
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    anyhow::bail!("resource watch closed");
                }
            },
            Some(event) = requeue_rx.recv() => event,
        };

        if event.deleted {
            continue;
        }

        let request = Request {
            namespace: event.namespace.clone(),
            name: event.name.clone(),
        };

        let outcome = match event.kind {
            ResourceKind::Runbook => runbooks.reconcile(&request).await.map(|_| Outcome::done()),
            ResourceKind::Execution => executions.reconcile(&request).await,
        };

        let requeue = match outcome {
            Ok(outcome) => {
                crate::metrics::RECONCILES
                    .with_label_values(&[kind_label(event.kind), "ok"])
                    .inc();
                outcome.requeue_after
            }
            Err(e) => {
                crate::metrics::RECONCILES
                    .with_label_values(&[kind_label(event.kind), "error"])
                    .inc();
                error!(
                    "reconcile {}/{} failed: {e:#}",
                    event.namespace, event.name
                );
                Some(ERROR_REQUEUE)
            }
        };

        if let Some(delay) = requeue {
            let tx = requeue_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(event).await;
            });
        }
    }
}

fn kind_label(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Runbook => "runbook",
        ResourceKind::Execution => "execution",
    }
}
