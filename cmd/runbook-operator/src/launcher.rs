//! Ephemeral worker launch.
//!
//! A worker runs the steps of exactly one execution and reports success or
//! failure through its own exit status. `WorkerSpec` carries the hardening
//! fields every worker runs with, so any launcher backend applies them
//! verbatim; the process-backed launcher here supervises the executor binary
//! as a child process with no retry.

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{info, warn};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LaunchError>;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("worker {0} already exists")]
    AlreadyExists(String),
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Hardening applied to every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSecurity {
    pub run_as_non_root: bool,
    pub read_only_root_filesystem: bool,
    pub allow_privilege_escalation: bool,
    pub drop_all_capabilities: bool,
    pub seccomp_profile: String,
}

impl Default for WorkerSecurity {
    fn default() -> Self {
        Self {
            run_as_non_root: true,
            read_only_root_filesystem: true,
            allow_privilege_escalation: false,
            drop_all_capabilities: true,
            seccomp_profile: "RuntimeDefault".to_string(),
        }
    }
}

/// Compute budget for a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResources {
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
}

impl Default for WorkerResources {
    fn default() -> Self {
        Self {
            cpu_request: "100m".to_string(),
            cpu_limit: "500m".to_string(),
            memory_request: "64Mi".to_string(),
            memory_limit: "256Mi".to_string(),
        }
    }
}

/// Full specification of one worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub name: String,
    pub namespace: String,
    /// Executor image reference; for the process launcher this is the
    /// executor binary path.
    pub image: String,
    pub labels: BTreeMap<String, String>,
    /// Owner execution; deletion of the owner cascades to the worker.
    pub owner_execution: String,
    pub owner_uid: String,
    /// Workers never retry; failure is reported to the controller instead.
    pub backoff_limit: u32,
    pub security: WorkerSecurity,
    pub resources: WorkerResources,
    pub env: BTreeMap<String, String>,
}

impl WorkerSpec {
    /// Builds the hardened spec for an execution worker.
    pub fn for_execution(name: &str, namespace: &str, image: &str, execution: &str, uid: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            image: image.to_string(),
            labels: BTreeMap::from([
                (
                    "app.kubernetes.io/name".to_string(),
                    "runbook-executor".to_string(),
                ),
                ("app.kubernetes.io/instance".to_string(), execution.to_string()),
                (
                    "app.kubernetes.io/component".to_string(),
                    "automation".to_string(),
                ),
            ]),
            owner_execution: execution.to_string(),
            owner_uid: uid.to_string(),
            backoff_limit: 0,
            security: WorkerSecurity::default(),
            resources: WorkerResources::default(),
            env: BTreeMap::from([
                ("EXECUTION_NAME".to_string(), execution.to_string()),
                ("EXECUTION_NAMESPACE".to_string(), namespace.to_string()),
            ]),
        }
    }
}

/// Observed worker state, inferred from the worker's own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Succeeded,
    Failed,
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<WorkerState>>;
    async fn launch(&self, spec: WorkerSpec) -> Result<()>;
}

fn worker_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Runs workers as supervised child processes of the operator.
#[derive(Default)]
pub struct ProcessLauncher {
    workers: Arc<Mutex<HashMap<String, WorkerState>>>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<WorkerState>> {
        Ok(self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&worker_key(namespace, name))
            .copied())
    }

    async fn launch(&self, spec: WorkerSpec) -> Result<()> {
        let key = worker_key(&spec.namespace, &spec.name);

        {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            if workers.contains_key(&key) {
                return Err(LaunchError::AlreadyExists(key));
            }
            workers.insert(key.clone(), WorkerState::Running);
        }

        let mut command = tokio::process::Command::new(&spec.image);
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        for (k, v) in &spec.env {
            command.env(k, v);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.workers
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(&key);
                return Err(LaunchError::Spawn(e));
            }
        };

        info!("launched worker {key} ({})", spec.image);

        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            let state = match child.wait().await {
                Ok(status) if status.success() => WorkerState::Succeeded,
                Ok(status) => {
                    warn!("worker {key} exited with {status}");
                    WorkerState::Failed
                }
                Err(e) => {
                    warn!("failed to reap worker {key}: {e}");
                    WorkerState::Failed
                }
            };
            workers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key, state);
        });

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_spec_is_hardened_by_default() {
        let spec = WorkerSpec::for_execution(
            "bounce-1-executor",
            "helios-automation",
            "/usr/local/bin/helios-runbook-executor",
            "bounce-1",
            "uid-1",
        );

        assert_eq!(spec.backoff_limit, 0);
        assert!(spec.security.run_as_non_root);
        assert!(spec.security.read_only_root_filesystem);
        assert!(spec.security.drop_all_capabilities);
        assert!(!spec.security.allow_privilege_escalation);
        assert_eq!(spec.security.seccomp_profile, "RuntimeDefault");
        assert_eq!(spec.resources.cpu_limit, "500m");
        assert_eq!(spec.resources.memory_limit, "256Mi");
        assert_eq!(spec.env["EXECUTION_NAME"], "bounce-1");
        assert_eq!(spec.env["EXECUTION_NAMESPACE"], "helios-automation");
        assert_eq!(spec.owner_execution, "bounce-1");
        assert_eq!(
            spec.labels["app.kubernetes.io/instance"],
            "bounce-1"
        );
    }
}
