//! Step execution inside the worker process.
//!
//! The worker loads its execution and the referenced runbook, runs the
//! primary step list (or the rollback list when the execution is rolling
//! back) in order, and writes per-step status back after every step. The
//! exit code is zero iff no step failed without `continueOnError`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use log::warn;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::api::{
    parse_duration, ExecutionPhase, ExecutionStepStatus, Runbook, RunbookExecution, RunbookStep,
    StepAction, StepState,
};
use crate::audit::AuditLog;
use crate::gnmi::{self, SetItem, SetOperation, TlsOptions};
use crate::notify::{NotificationKind, Notifier};
use crate::store::ResourceStore;
use crate::template::Engine;

pub struct Worker {
    store: Arc<dyn ResourceStore>,
    audit: AuditLog,
    engine: Engine,
}

impl Worker {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            audit: AuditLog::new(),
            engine: Engine::new(),
        }
    }

    /// Runs all steps of the execution. Returns the worker exit code.
    pub async fn run(
        &self,
        namespace: &str,
        name: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<i32> {
        let mut execution = self
            .store
            .get_execution(namespace, name)
            .await?
            .with_context(|| format!("execution {namespace}/{name} not found"))?;

        let runbook = self.get_runbook(&execution).await?;
        let params = execution.spec.parameters.clone();

        // A rollback worker sees the execution in RollingBack and runs the
        // alternate step list.
        let rollback = execution.status.phase == ExecutionPhase::RollingBack;
        let steps: Vec<RunbookStep> = if rollback {
            runbook.spec.rollback.clone()
        } else {
            runbook.spec.steps.clone()
        };

        let mut statuses: Vec<ExecutionStepStatus> = steps
            .iter()
            .map(|s| ExecutionStepStatus {
                name: s.name.clone(),
                status: StepState::Pending,
                ..Default::default()
            })
            .collect();

        let mut exit_code = 0;
        for (i, step) in steps.iter().enumerate() {
            statuses[i].status = StepState::Running;
            statuses[i].start_time = Some(Utc::now());

            self.audit.log_step_start(
                name,
                namespace,
                &runbook.spec.name,
                &step.name,
                &execution.spec.triggered_by,
            );

            if !step.condition.is_empty() {
                let result = match self.engine.render(&step.condition, &params) {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("condition evaluation failed for step {}: {e}", step.name);
                        String::new()
                    }
                };
                if result == "false" || result.is_empty() {
                    statuses[i].status = StepState::Skipped;
                    statuses[i].completion_time = Some(Utc::now());
                    statuses[i].output = "Condition not met, skipped".to_string();
                    continue;
                }
            }

            let outcome = self
                .execute_step(step, &params, execution.spec.dry_run, &shutdown)
                .await;
            statuses[i].completion_time = Some(Utc::now());

            match outcome {
                Ok(output) => {
                    statuses[i].status = StepState::Completed;
                    statuses[i].output = output.clone();
                    self.audit.log_step_complete(
                        name,
                        namespace,
                        &runbook.spec.name,
                        &step.name,
                        &execution.spec.triggered_by,
                        &output,
                    );
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    statuses[i].status = StepState::Failed;
                    statuses[i].error = message.clone();
                    self.audit.log_step_failed(
                        name,
                        namespace,
                        &runbook.spec.name,
                        &step.name,
                        &execution.spec.triggered_by,
                        &message,
                    );

                    if !step.continue_on_error {
                        exit_code = 1;
                        break;
                    }
                }
            }

            execution.status.steps = statuses.clone();
            if let Err(e) = self.store.update_execution_status(&execution).await {
                warn!("failed to update execution status: {e}");
            }
        }

        // Steps never reached become Skipped.
        for status in &mut statuses {
            if status.status == StepState::Pending {
                status.status = StepState::Skipped;
            }
        }

        execution.status.steps = statuses;
        if let Err(e) = self.store.update_execution_status(&execution).await {
            warn!("failed to update final execution status: {e}");
        }

        Ok(exit_code)
    }

    async fn get_runbook(&self, execution: &RunbookExecution) -> Result<Runbook> {
        let namespace = if execution.spec.runbook_ref.namespace.is_empty() {
            &execution.metadata.namespace
        } else {
            &execution.spec.runbook_ref.namespace
        };
        let name = &execution.spec.runbook_ref.name;
        self.store
            .get_runbook(namespace, name)
            .await?
            .with_context(|| format!("runbook {namespace}/{name} not found"))
    }

    async fn execute_step(
        &self,
        step: &RunbookStep,
        params: &Map<String, Value>,
        dry_run: bool,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<String> {
        let action = StepAction::parse(&step.action)
            .with_context(|| format!("unsupported action: {}", step.action))?;

        match action {
            StepAction::GnmiSet => self.gnmi_set(step, params, dry_run).await,
            StepAction::GnmiGet => self.gnmi_get(step, params).await,
            StepAction::GnmiSubscribe => self.gnmi_subscribe(step, params).await,
            StepAction::Wait => wait_step(step, shutdown.clone()).await,
            StepAction::Notify => self.notify_step(step, params).await,
            StepAction::Condition => Ok("condition evaluated".to_string()),
        }
    }

    async fn gnmi_set(
        &self,
        step: &RunbookStep,
        params: &Map<String, Value>,
        dry_run: bool,
    ) -> Result<String> {
        let config = self
            .engine
            .render_config(&step.config, params)
            .context("failed to render config")?;

        let target = string_key(&config, "target");
        if target.is_empty() {
            anyhow::bail!("gNMI target not specified in step config");
        }

        if dry_run {
            let rendered = serde_json::to_string(&Value::Object(config.clone()))
                .context("failed to marshal config for dry run")?;
            return Ok(format!(
                "[DRY RUN] Would execute gNMI Set on {target}: {rendered}"
            ));
        }

        let operation = match config.get("operation").and_then(Value::as_str) {
            Some(op) => SetOperation::parse(op)?,
            None => SetOperation::Update,
        };
        let path = string_key(&config, "path");
        let value = config.get("value").cloned();

        let mut client = self.connect(&target, &config, step).await?;
        client
            .set(&[SetItem {
                operation,
                path: path.clone(),
                value,
            }])
            .await?;

        Ok(format!("gNMI Set completed on {target} path {path}"))
    }

    async fn gnmi_get(&self, step: &RunbookStep, params: &Map<String, Value>) -> Result<String> {
        let config = self
            .engine
            .render_config(&step.config, params)
            .context("failed to render config")?;

        let target = string_key(&config, "target");
        if target.is_empty() {
            anyhow::bail!("gNMI target not specified in step config");
        }

        let paths = config_paths(&config);
        let mut client = self.connect(&target, &config, step).await?;
        let response = client.get(&paths).await?;

        Ok(gnmi::response_to_json(&response).to_string())
    }

    async fn gnmi_subscribe(
        &self,
        step: &RunbookStep,
        params: &Map<String, Value>,
    ) -> Result<String> {
        let config = self
            .engine
            .render_config(&step.config, params)
            .context("failed to render config")?;

        let target = string_key(&config, "target");
        if target.is_empty() {
            anyhow::bail!("gNMI target not specified in step config");
        }

        let mode_name = config
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or("ONCE");
        let mode = gnmi::parse_subscribe_mode(mode_name)
            .with_context(|| format!("unknown subscription mode: {mode_name}"))?;

        let paths = config_paths(&config);
        let budget = step_timeout(step);
        let mut client = self.connect(&target, &config, step).await?;

        let mut received = 0usize;
        let subscription = client.subscribe(&paths, mode, |_response| {
            received += 1;
            Ok(())
        });

        match tokio::time::timeout(budget, subscription).await {
            Ok(result) => result?,
            // A streaming subscription has no natural EOF; the step budget
            // bounds it and the collected responses are the output.
            Err(_) => {}
        }

        Ok(format!("subscription received {received} responses"))
    }

    async fn notify_step(&self, step: &RunbookStep, params: &Map<String, Value>) -> Result<String> {
        let config = self
            .engine
            .render_config(&step.config, params)
            .context("failed to render config")?;

        let webhook = string_key(&config, "webhook");
        if !webhook.is_empty() {
            let kind = NotificationKind::parse(&string_key(&config, "channel"));
            let message = string_key(&config, "message");
            let notifier = Notifier::new(&webhook, kind)?;
            notifier.send_message(&step.name, &message).await?;
        }
        Ok("notification sent".to_string())
    }

    /// Builds and connects a device client. TLS material comes from the
    /// rendered step config; without it the connect fails, device
    /// connections are never cleartext.
    async fn connect(
        &self,
        target: &str,
        config: &Map<String, Value>,
        step: &RunbookStep,
    ) -> Result<gnmi::Client> {
        let mut client = gnmi::Client::new(target).with_timeout(step_timeout(step));

        let ca_file = string_key(config, "tls_ca");
        if !ca_file.is_empty() {
            client = client.with_tls(TlsOptions {
                ca_file,
                cert_file: non_empty(string_key(config, "tls_cert")),
                key_file: non_empty(string_key(config, "tls_key")),
                server_name: non_empty(string_key(config, "tls_server_name")),
            });
        }

        client
            .connect()
            .await
            .with_context(|| format!("failed to connect to {target}"))?;
        Ok(client)
    }
}

async fn wait_step(step: &RunbookStep, mut shutdown: watch::Receiver<bool>) -> Result<String> {
    let duration_str = match step.config.get("duration").and_then(Value::as_str) {
        Some(d) if !d.is_empty() => d.to_string(),
        _ if !step.timeout.is_empty() => step.timeout.clone(),
        _ => "10s".to_string(),
    };

    let duration = parse_duration(&duration_str)
        .with_context(|| format!("invalid wait duration {duration_str:?}"))?;

    tokio::select! {
        _ = shutdown.changed() => anyhow::bail!("wait cancelled"),
        _ = tokio::time::sleep(duration) => Ok(format!("waited {duration_str}")),
    }
}

fn step_timeout(step: &RunbookStep) -> Duration {
    parse_duration(&step.timeout).unwrap_or(Duration::from_secs(30))
}

fn string_key(config: &Map<String, Value>, key: &str) -> String {
    config
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Paths come either as a single `path` string or a `paths` list.
fn config_paths(config: &Map<String, Value>) -> Vec<String> {
    if let Some(Value::Array(list)) = config.get("paths") {
        return list
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    vec![string_key(config, "path")]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ObjectMeta, RunbookExecutionSpec, RunbookRef, RunbookSpec};
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    const NS: &str = "helios-automation";

    fn shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    fn step_with(name: &str, action: &str, config: Value) -> RunbookStep {
        RunbookStep {
            name: name.to_string(),
            action: action.to_string(),
            timeout: String::new(),
            continue_on_error: false,
            condition: String::new(),
            config: config.as_object().cloned().unwrap_or_default(),
        }
    }

    fn runbook(steps: Vec<RunbookStep>, rollback: Vec<RunbookStep>) -> Runbook {
        Runbook {
            metadata: ObjectMeta {
                name: "test-runbook".to_string(),
                namespace: NS.to_string(),
                ..Default::default()
            },
            spec: RunbookSpec {
                name: "test-runbook".to_string(),
                steps,
                rollback,
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    fn execution(name: &str, phase: ExecutionPhase, params: Value, dry_run: bool) -> RunbookExecution {
        RunbookExecution {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: NS.to_string(),
                ..Default::default()
            },
            spec: RunbookExecutionSpec {
                runbook_ref: RunbookRef {
                    name: "test-runbook".to_string(),
                    namespace: String::new(),
                },
                parameters: params.as_object().cloned().unwrap_or_default(),
                triggered_by: "admin@example.com".to_string(),
                dry_run,
                ..Default::default()
            },
            status: crate::api::RunbookExecutionStatus {
                phase,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn runs_wait_steps_and_exits_zero() {
        let store = Arc::new(
            MemoryStore::new()
                .with_runbook(runbook(
                    vec![
                        step_with("pause", "wait", json!({"duration": "10ms"})),
                        step_with("check", "condition", json!({})),
                    ],
                    vec![],
                ))
                .with_execution(execution("run-1", ExecutionPhase::Running, json!({}), false)),
        );
        let worker = Worker::new(store.clone());

        let (_tx, rx) = shutdown();
        let code = worker.run(NS, "run-1", rx).await.unwrap();
        assert_eq!(code, 0);

        let exec = store.get_execution(NS, "run-1").await.unwrap().unwrap();
        assert_eq!(exec.status.steps.len(), 2);
        assert_eq!(exec.status.steps[0].status, StepState::Completed);
        assert_eq!(exec.status.steps[0].output, "waited 10ms");
        assert!(exec.status.steps[0].start_time.is_some());
        assert!(exec.status.steps[0].completion_time.is_some());
        assert_eq!(exec.status.steps[1].status, StepState::Completed);
    }

    #[tokio::test]
    async fn condition_false_skips_step() {
        let mut conditional = step_with("maybe", "wait", json!({"duration": "10ms"}));
        conditional.condition = "{{ .enabled }}".to_string();

        let store = Arc::new(
            MemoryStore::new()
                .with_runbook(runbook(vec![conditional], vec![]))
                .with_execution(execution(
                    "run-2",
                    ExecutionPhase::Running,
                    json!({"enabled": false}),
                    false,
                )),
        );
        let worker = Worker::new(store.clone());

        let (_tx, rx) = shutdown();
        let code = worker.run(NS, "run-2", rx).await.unwrap();
        assert_eq!(code, 0);

        let exec = store.get_execution(NS, "run-2").await.unwrap().unwrap();
        assert_eq!(exec.status.steps[0].status, StepState::Skipped);
        assert_eq!(exec.status.steps[0].output, "Condition not met, skipped");
    }

    #[tokio::test]
    async fn failing_step_stops_and_skips_remaining() {
        let store = Arc::new(
            MemoryStore::new()
                .with_runbook(runbook(
                    vec![
                        // No target: the step fails before any connection.
                        step_with("broken", "gnmi_set", json!({})),
                        step_with("never", "wait", json!({"duration": "10ms"})),
                    ],
                    vec![],
                ))
                .with_execution(execution("run-3", ExecutionPhase::Running, json!({}), false)),
        );
        let worker = Worker::new(store.clone());

        let (_tx, rx) = shutdown();
        let code = worker.run(NS, "run-3", rx).await.unwrap();
        assert_eq!(code, 1);

        let exec = store.get_execution(NS, "run-3").await.unwrap().unwrap();
        assert_eq!(exec.status.steps[0].status, StepState::Failed);
        assert!(exec.status.steps[0].error.contains("target not specified"));
        assert_eq!(exec.status.steps[1].status, StepState::Skipped);
    }

    #[tokio::test]
    async fn continue_on_error_proceeds_and_exits_zero() {
        let mut broken = step_with("broken", "gnmi_set", json!({}));
        broken.continue_on_error = true;

        let store = Arc::new(
            MemoryStore::new()
                .with_runbook(runbook(
                    vec![broken, step_with("after", "wait", json!({"duration": "10ms"}))],
                    vec![],
                ))
                .with_execution(execution("run-4", ExecutionPhase::Running, json!({}), false)),
        );
        let worker = Worker::new(store.clone());

        let (_tx, rx) = shutdown();
        let code = worker.run(NS, "run-4", rx).await.unwrap();
        assert_eq!(code, 0);

        let exec = store.get_execution(NS, "run-4").await.unwrap().unwrap();
        assert_eq!(exec.status.steps[0].status, StepState::Failed);
        assert_eq!(exec.status.steps[1].status, StepState::Completed);
    }

    #[tokio::test]
    async fn dry_run_describes_set_without_connecting() {
        let store = Arc::new(
            MemoryStore::new()
                .with_runbook(runbook(
                    vec![step_with(
                        "set-desc",
                        "gnmi_set",
                        json!({
                            "target": "{{ .device }}:6030",
                            "path": "/system/config/hostname",
                            "value": "renamed"
                        }),
                    )],
                    vec![],
                ))
                .with_execution(execution(
                    "run-5",
                    ExecutionPhase::Running,
                    json!({"device": "10.0.0.1"}),
                    true,
                )),
        );
        let worker = Worker::new(store.clone());

        let (_tx, rx) = shutdown();
        let code = worker.run(NS, "run-5", rx).await.unwrap();
        assert_eq!(code, 0);

        let exec = store.get_execution(NS, "run-5").await.unwrap().unwrap();
        let output = &exec.status.steps[0].output;
        assert!(output.starts_with("[DRY RUN]"), "{output}");
        assert!(output.contains("10.0.0.1:6030"), "{output}");
    }

    #[tokio::test]
    async fn rolling_back_execution_runs_rollback_steps() {
        let store = Arc::new(
            MemoryStore::new()
                .with_runbook(runbook(
                    vec![step_with("primary", "wait", json!({"duration": "10ms"}))],
                    vec![step_with("restore", "wait", json!({"duration": "10ms"}))],
                ))
                .with_execution(execution(
                    "run-6",
                    ExecutionPhase::RollingBack,
                    json!({}),
                    false,
                )),
        );
        let worker = Worker::new(store.clone());

        let (_tx, rx) = shutdown();
        let code = worker.run(NS, "run-6", rx).await.unwrap();
        assert_eq!(code, 0);

        let exec = store.get_execution(NS, "run-6").await.unwrap().unwrap();
        assert_eq!(exec.status.steps.len(), 1);
        assert_eq!(exec.status.steps[0].name, "restore");
        assert_eq!(exec.status.steps[0].status, StepState::Completed);
    }

    #[tokio::test]
    async fn unsupported_action_fails_the_step() {
        let store = Arc::new(
            MemoryStore::new()
                .with_runbook(runbook(vec![step_with("odd", "script", json!({}))], vec![]))
                .with_execution(execution("run-7", ExecutionPhase::Running, json!({}), false)),
        );
        let worker = Worker::new(store.clone());

        let (_tx, rx) = shutdown();
        let code = worker.run(NS, "run-7", rx).await.unwrap();
        assert_eq!(code, 1);

        let exec = store.get_execution(NS, "run-7").await.unwrap().unwrap();
        assert!(exec.status.steps[0].error.contains("unsupported action"));
    }

    #[tokio::test]
    async fn missing_tls_is_a_hard_error_for_device_steps() {
        let store = Arc::new(
            MemoryStore::new()
                .with_runbook(runbook(
                    vec![step_with(
                        "get-state",
                        "gnmi_get",
                        json!({"target": "127.0.0.1:1", "path": "/system/state"}),
                    )],
                    vec![],
                ))
                .with_execution(execution("run-8", ExecutionPhase::Running, json!({}), false)),
        );
        let worker = Worker::new(store.clone());

        let (_tx, rx) = shutdown();
        let code = worker.run(NS, "run-8", rx).await.unwrap();
        assert_eq!(code, 1);

        let exec = store.get_execution(NS, "run-8").await.unwrap().unwrap();
        assert!(
            exec.status.steps[0].error.contains("TLS configuration is required"),
            "{}",
            exec.status.steps[0].error
        );
    }
}
