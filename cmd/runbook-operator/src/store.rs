//! Declarative resource store.
//!
//! The controller operates against an abstract store providing resource CRUD
//! plus watch; the production implementation keeps resources as JSON values
//! in a JetStream key-value bucket (`runbooks.<ns>.<name>`,
//! `executions.<ns>.<name>`) and turns bucket watch entries into typed
//! events.

use async_trait::async_trait;
use futures::StreamExt;
use log::{info, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::api::{Runbook, RunbookExecution};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Runbook,
    Execution,
}

/// A change notification for one resource.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub deleted: bool,
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_runbook(&self, namespace: &str, name: &str) -> Result<Option<Runbook>>;
    async fn put_runbook(&self, runbook: &Runbook) -> Result<()>;
    async fn update_runbook_status(&self, runbook: &Runbook) -> Result<()>;

    async fn get_execution(&self, namespace: &str, name: &str)
        -> Result<Option<RunbookExecution>>;
    async fn put_execution(&self, execution: &RunbookExecution) -> Result<()>;
    async fn update_execution_status(&self, execution: &RunbookExecution) -> Result<()>;
    async fn list_executions(&self, namespace: &str) -> Result<Vec<RunbookExecution>>;

    /// Streams change events for both resource kinds.
    async fn watch(&self) -> Result<mpsc::Receiver<ResourceEvent>>;
}

const RUNBOOK_PREFIX: &str = "runbooks";
const EXECUTION_PREFIX: &str = "executions";

/// JetStream KV-backed resource store.
pub struct KvResourceStore {
    kv: async_nats::jetstream::kv::Store,
}

impl KvResourceStore {
    pub async fn connect(nats_url: &str, bucket: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = async_nats::connect(nats_url)
            .await
            .with_context(|| format!("connecting to NATS at {nats_url}"))?;
        let js = async_nats::jetstream::new(client);

        let kv = match js.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => js
                .create_key_value(async_nats::jetstream::kv::Config {
                    bucket: bucket.to_string(),
                    history: 8,
                    ..Default::default()
                })
                .await
                .with_context(|| format!("creating resource bucket {bucket}"))?,
        };

        info!("connected to resource store, bucket {bucket}");
        Ok(Self { kv })
    }

    fn key(prefix: &str, namespace: &str, name: &str) -> String {
        format!("{prefix}.{namespace}.{name}")
    }

    async fn get_raw<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let entry = self
            .kv
            .get(key)
            .await
            .map_err(|e| StoreError::Other(anyhow::anyhow!("reading {key}: {e}")))?;
        match entry {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Other(anyhow::anyhow!("decoding {key}: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put_raw<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StoreError::Other(anyhow::anyhow!("encoding {key}: {e}")))?;
        self.kv
            .put(key, bytes.into())
            .await
            .map_err(|e| StoreError::Other(anyhow::anyhow!("writing {key}: {e}")))?;
        Ok(())
    }

    fn spawn_watcher(&self, prefix: &'static str, kind: ResourceKind, tx: mpsc::Sender<ResourceEvent>) {
        let kv = self.kv.clone();
        tokio::spawn(async move {
            // History replay delivers pre-existing resources as events, so a
            // freshly started controller reconciles everything once.
            let mut watcher = match kv.watch_with_history(format!("{prefix}.>")).await {
                Ok(watcher) => watcher,
                Err(e) => {
                    warn!("failed to watch {prefix}: {e}");
                    return;
                }
            };

            while let Some(entry) = watcher.next().await {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("watch error on {prefix}: {e}");
                        break;
                    }
                };

                let deleted = !matches!(
                    entry.operation,
                    async_nats::jetstream::kv::Operation::Put
                );

                // Key shape: <prefix>.<namespace>.<name>
                let mut parts = entry.key.splitn(3, '.');
                let (Some(_), Some(namespace), Some(name)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    warn!("ignoring malformed resource key {}", entry.key);
                    continue;
                };

                let event = ResourceEvent {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    deleted,
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
    }
}

#[async_trait]
impl ResourceStore for KvResourceStore {
    async fn get_runbook(&self, namespace: &str, name: &str) -> Result<Option<Runbook>> {
        self.get_raw(&Self::key(RUNBOOK_PREFIX, namespace, name)).await
    }

    async fn put_runbook(&self, runbook: &Runbook) -> Result<()> {
        let key = Self::key(RUNBOOK_PREFIX, &runbook.metadata.namespace, &runbook.metadata.name);
        self.put_raw(&key, runbook).await
    }

    async fn update_runbook_status(&self, runbook: &Runbook) -> Result<()> {
        self.put_runbook(runbook).await
    }

    async fn get_execution(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RunbookExecution>> {
        self.get_raw(&Self::key(EXECUTION_PREFIX, namespace, name)).await
    }

    async fn put_execution(&self, execution: &RunbookExecution) -> Result<()> {
        let key = Self::key(
            EXECUTION_PREFIX,
            &execution.metadata.namespace,
            &execution.metadata.name,
        );
        self.put_raw(&key, execution).await
    }

    async fn update_execution_status(&self, execution: &RunbookExecution) -> Result<()> {
        self.put_execution(execution).await
    }

    async fn list_executions(&self, namespace: &str) -> Result<Vec<RunbookExecution>> {
        let prefix = format!("{EXECUTION_PREFIX}.{namespace}.");
        let mut keys = self
            .kv
            .keys()
            .await
            .map_err(|e| StoreError::Other(anyhow::anyhow!("listing executions: {e}")))?;

        let mut executions = Vec::new();
        while let Some(key) = keys.next().await {
            let key =
                key.map_err(|e| StoreError::Other(anyhow::anyhow!("listing executions: {e}")))?;
            if !key.starts_with(&prefix) {
                continue;
            }
            if let Some(execution) = self.get_raw::<RunbookExecution>(&key).await? {
                executions.push(execution);
            }
        }
        Ok(executions)
    }

    async fn watch(&self) -> Result<mpsc::Receiver<ResourceEvent>> {
        let (tx, rx) = mpsc::channel(256);
        self.spawn_watcher(RUNBOOK_PREFIX, ResourceKind::Runbook, tx.clone());
        self.spawn_watcher(EXECUTION_PREFIX, ResourceKind::Execution, tx);
        Ok(rx)
    }
}
