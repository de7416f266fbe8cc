//! Artifact store backed by the cluster's JetStream key-value configuration
//! store.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_nats::jetstream::{self, kv};
use chrono::{SecondsFormat, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::metrics::ARTIFACT_WRITES;

/// Outcome of a single artifact write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    /// The prospective data map was empty; nothing was written.
    Skipped,
}

/// A materialized target artifact as stored in the configuration store.
#[derive(Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub data: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Writes target artifacts into the namespace bucket with a
/// create-if-absent-else-update discipline.
pub struct ArtifactStore {
    kv: kv::Store,
    namespace: String,
}

impl ArtifactStore {
    pub async fn connect(nats_url: &str, namespace: &str) -> Result<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .with_context(|| format!("connecting to NATS at {nats_url}"))?;
        let js = jetstream::new(client);

        let kv = match js.get_key_value(namespace).await {
            Ok(store) => store,
            Err(_) => js
                .create_key_value(kv::Config {
                    bucket: namespace.to_string(),
                    history: 1,
                    ..Default::default()
                })
                .await
                .with_context(|| format!("creating configuration bucket {namespace}"))?,
        };

        info!("connected to configuration store, bucket {namespace}");
        Ok(Self {
            kv,
            namespace: namespace.to_string(),
        })
    }

    /// Writes one artifact annotated with the number of targets it carries.
    /// An empty data map is never written: overwriting an existing artifact
    /// with nothing would wipe every collector target.
    pub async fn update_artifact(
        &self,
        name: &str,
        data: BTreeMap<String, String>,
        labels: BTreeMap<String, String>,
        target_count: usize,
    ) -> Result<Outcome> {
        let payload = match render_artifact(data, labels, target_count) {
            Some(artifact) => artifact,
            None => {
                warn!("skipping artifact {name} update with empty data to prevent target loss");
                return Ok(Outcome::Skipped);
            }
        };

        let bytes = serde_json::to_vec(&payload).context("encoding artifact")?;

        match self.kv.create(name, bytes.clone().into()).await {
            Ok(_) => {
                info!("created artifact {name} in {}", self.namespace);
                ARTIFACT_WRITES
                    .with_label_values(&[name, &self.namespace, "created"])
                    .inc();
                Ok(Outcome::Created)
            }
            Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => {
                if let Err(e) = self.kv.put(name, bytes.into()).await {
                    ARTIFACT_WRITES
                        .with_label_values(&[name, &self.namespace, "error"])
                        .inc();
                    return Err(e).with_context(|| format!("updating artifact {name}"));
                }
                info!("updated artifact {name} in {}", self.namespace);
                ARTIFACT_WRITES
                    .with_label_values(&[name, &self.namespace, "updated"])
                    .inc();
                Ok(Outcome::Updated)
            }
            Err(e) => {
                ARTIFACT_WRITES
                    .with_label_values(&[name, &self.namespace, "error"])
                    .inc();
                Err(e).with_context(|| format!("creating artifact {name}"))
            }
        }
    }
}

/// Builds the stored artifact value; `None` when the data map is empty.
fn render_artifact(
    data: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    target_count: usize,
) -> Option<Artifact> {
    if data.is_empty() {
        return None;
    }

    let annotations = BTreeMap::from([
        (
            "helios.io/last-sync".to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (
            "helios.io/device-count".to_string(),
            target_count.to_string(),
        ),
    ]);

    Some(Artifact {
        data,
        labels,
        annotations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_data_is_never_rendered() {
        assert!(render_artifact(BTreeMap::new(), BTreeMap::new(), 7).is_none());
    }

    #[test]
    fn artifact_carries_sync_annotations() {
        let data = BTreeMap::from([(
            "targets.yaml".to_string(),
            "targets: {}".to_string(),
        )]);
        let labels = BTreeMap::from([(
            "helios.io/generated-by".to_string(),
            "target-sync".to_string(),
        )]);

        // The count annotation reflects the generated targets, not the
        // number of files in the artifact.
        let artifact = render_artifact(data, labels, 42).unwrap();
        assert_eq!(artifact.annotations["helios.io/device-count"], "42");
        assert!(artifact.annotations.contains_key("helios.io/last-sync"));
        assert_eq!(
            artifact.labels["helios.io/generated-by"],
            "target-sync"
        );
    }
}
