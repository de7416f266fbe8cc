//! Execution state machine reconciliation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};

use crate::api::{
    format_duration, parse_duration, set_condition, Condition, ExecutionPhase, Runbook,
    RunbookExecution,
};
use crate::audit::{AuditEvent, AuditLog, EventType};
use crate::launcher::{LaunchError, WorkerLauncher, WorkerSpec, WorkerState};
use crate::notify::{ApprovalRequest, Notifier};
use crate::store::ResourceStore;

use super::{Outcome, Request};

const APPROVAL_REQUEUE: Duration = Duration::from_secs(30);
const RUNNING_REQUEUE: Duration = Duration::from_secs(10);
const WORKER_CREATE_REQUEUE: Duration = Duration::from_secs(5);
const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(3600);

pub struct ExecutionReconciler {
    store: Arc<dyn ResourceStore>,
    launcher: Arc<dyn WorkerLauncher>,
    executor_image: String,
    audit: AuditLog,
    notifier: Option<Arc<Notifier>>,
}

impl ExecutionReconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        launcher: Arc<dyn WorkerLauncher>,
        executor_image: &str,
    ) -> Self {
        Self {
            store,
            launcher,
            executor_image: executor_image.to_string(),
            audit: AuditLog::new(),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub async fn reconcile(&self, request: &Request) -> Result<Outcome> {
        let execution = match self
            .store
            .get_execution(&request.namespace, &request.name)
            .await?
        {
            Some(execution) => execution,
            None => return Ok(Outcome::done()),
        };

        match execution.status.phase {
            ExecutionPhase::Pending => self.handle_pending(execution).await,
            ExecutionPhase::PendingApproval => self.handle_pending_approval(execution).await,
            ExecutionPhase::Approved => self.handle_approved(execution).await,
            ExecutionPhase::Running => self.handle_running(execution).await,
            ExecutionPhase::Failed => self.handle_failed(execution).await,
            ExecutionPhase::RollingBack => self.handle_rolling_back(execution).await,
            ExecutionPhase::Completed
            | ExecutionPhase::Cancelled
            | ExecutionPhase::TimedOut
            | ExecutionPhase::RolledBack => Ok(Outcome::done()),
        }
    }

    async fn handle_pending(&self, mut execution: RunbookExecution) -> Result<Outcome> {
        let runbook = match self.get_runbook(&execution).await {
            Ok(runbook) => runbook,
            Err(e) => {
                self.set_phase(
                    &mut execution,
                    ExecutionPhase::Failed,
                    &format!("failed to get runbook: {e}"),
                )
                .await?;
                return Ok(Outcome::done());
            }
        };

        if let Some(message) = self.cooldown_violation(&execution, &runbook).await? {
            self.set_phase(&mut execution, ExecutionPhase::Failed, &message)
                .await?;
            return Ok(Outcome::done());
        }

        if runbook.spec.requires_approval {
            info!(
                "execution {}/{} requires approval, transitioning to PendingApproval",
                execution.metadata.namespace, execution.metadata.name
            );
            self.set_phase(
                &mut execution,
                ExecutionPhase::PendingApproval,
                "Awaiting approval",
            )
            .await?;
            self.announce_approval(&execution, &runbook).await;
            return Ok(Outcome::done());
        }

        execution.status.start_time = Some(Utc::now());
        self.set_phase(&mut execution, ExecutionPhase::Running, "Starting execution")
            .await?;
        Ok(Outcome::done())
    }

    async fn handle_pending_approval(&self, mut execution: RunbookExecution) -> Result<Outcome> {
        let runbook = self.get_runbook(&execution).await?;

        if !execution.status.approved_by.is_empty() {
            let approver = execution.status.approved_by.clone();
            let valid = runbook.spec.approvers.iter().any(|a| a.name == approver);

            if !valid {
                warn!(
                    "approval rejected for {}/{}: approver {approver:?} not in allowed list",
                    execution.metadata.namespace, execution.metadata.name
                );
                self.audit.log_event(
                    AuditEvent::new(
                        EventType::ApprovalDenied,
                        &execution.metadata.name,
                        &execution.metadata.namespace,
                        &runbook.spec.name,
                        &execution.spec.triggered_by,
                        format!("Approval by {approver:?} rejected"),
                    )
                    .with_detail("approvedBy", &approver),
                );
                self.set_phase(
                    &mut execution,
                    ExecutionPhase::Failed,
                    &format!(
                        "approver {approver:?} is not in the runbook's approved approvers list"
                    ),
                )
                .await?;
                return Ok(Outcome::done());
            }

            info!(
                "execution {}/{} approved by {approver}",
                execution.metadata.namespace, execution.metadata.name
            );
            let now = Utc::now();
            execution.status.approved_at = Some(now);
            execution.status.start_time = Some(now);
            self.set_phase(
                &mut execution,
                ExecutionPhase::Approved,
                "Approved, starting execution",
            )
            .await?;
            return Ok(Outcome::done());
        }

        // Approval timeout is measured from resource creation. Unset or
        // unparseable timeouts fall back to one hour.
        let timeout = parse_duration(&runbook.spec.approval_timeout)
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_APPROVAL_TIMEOUT);
        let age = Utc::now().signed_duration_since(execution.metadata.creation_timestamp);
        if age.to_std().unwrap_or(Duration::ZERO) > timeout {
            warn!(
                "approval timeout exceeded for {}/{}",
                execution.metadata.namespace, execution.metadata.name
            );
            self.set_phase(
                &mut execution,
                ExecutionPhase::TimedOut,
                "Approval timeout exceeded",
            )
            .await?;
            return Ok(Outcome::done());
        }

        Ok(Outcome::requeue_after(APPROVAL_REQUEUE))
    }

    async fn handle_approved(&self, mut execution: RunbookExecution) -> Result<Outcome> {
        execution.status.start_time = Some(Utc::now());
        self.set_phase(&mut execution, ExecutionPhase::Running, "Starting execution")
            .await?;
        Ok(Outcome::done())
    }

    async fn handle_running(&self, mut execution: RunbookExecution) -> Result<Outcome> {
        let worker_name = format!("{}-executor", execution.metadata.name);

        match self
            .launcher
            .get(&execution.metadata.namespace, &worker_name)
            .await
            .context("querying worker")?
        {
            None => {
                info!(
                    "creating executor worker {worker_name} for {}/{}",
                    execution.metadata.namespace, execution.metadata.name
                );
                self.launch_worker(&execution, &worker_name).await?;
                execution.status.worker_name = worker_name;
                self.store.update_execution_status(&execution).await?;
                Ok(Outcome::requeue_after(WORKER_CREATE_REQUEUE))
            }
            Some(WorkerState::Succeeded) => {
                self.stamp_completion(&mut execution);
                self.set_phase(
                    &mut execution,
                    ExecutionPhase::Completed,
                    "Execution completed successfully",
                )
                .await?;
                Ok(Outcome::done())
            }
            Some(WorkerState::Failed) => {
                self.set_phase(&mut execution, ExecutionPhase::Failed, "Executor worker failed")
                    .await?;
                Ok(Outcome::done())
            }
            Some(WorkerState::Running) => Ok(Outcome::requeue_after(RUNNING_REQUEUE)),
        }
    }

    async fn handle_failed(&self, mut execution: RunbookExecution) -> Result<Outcome> {
        let runbook = self.get_runbook(&execution).await?;
        let rollback_worker = format!("{}-rollback", execution.metadata.name);

        // Rollback runs at most once: a Failed execution whose rollback
        // worker already exists stays Failed so clients can tell rollback
        // failure from rollback success.
        let rollback_attempted = self
            .launcher
            .get(&execution.metadata.namespace, &rollback_worker)
            .await
            .context("querying rollback worker")?
            .is_some();

        if !runbook.spec.rollback.is_empty() && !rollback_attempted {
            info!(
                "initiating rollback for {}/{}",
                execution.metadata.namespace, execution.metadata.name
            );
            self.set_phase(
                &mut execution,
                ExecutionPhase::RollingBack,
                "Initiating rollback",
            )
            .await?;
            return Ok(Outcome::done());
        }

        if execution.status.completion_time.is_none() {
            self.stamp_completion(&mut execution);
            self.store.update_execution_status(&execution).await?;
        }
        Ok(Outcome::done())
    }

    async fn handle_rolling_back(&self, mut execution: RunbookExecution) -> Result<Outcome> {
        let worker_name = format!("{}-rollback", execution.metadata.name);

        match self
            .launcher
            .get(&execution.metadata.namespace, &worker_name)
            .await
            .context("querying rollback worker")?
        {
            None => {
                info!(
                    "creating rollback worker {worker_name} for {}/{}",
                    execution.metadata.namespace, execution.metadata.name
                );
                self.launch_worker(&execution, &worker_name).await?;
                Ok(Outcome::requeue_after(WORKER_CREATE_REQUEUE))
            }
            Some(WorkerState::Succeeded) => {
                self.stamp_completion(&mut execution);
                self.set_phase(
                    &mut execution,
                    ExecutionPhase::RolledBack,
                    "Rollback completed",
                )
                .await?;
                Ok(Outcome::done())
            }
            Some(WorkerState::Failed) => {
                self.stamp_completion(&mut execution);
                self.set_phase(&mut execution, ExecutionPhase::Failed, "Rollback failed")
                    .await?;
                Ok(Outcome::done())
            }
            Some(WorkerState::Running) => Ok(Outcome::requeue_after(RUNNING_REQUEUE)),
        }
    }

    async fn launch_worker(&self, execution: &RunbookExecution, worker_name: &str) -> Result<()> {
        let spec = WorkerSpec::for_execution(
            worker_name,
            &execution.metadata.namespace,
            &self.executor_image,
            &execution.metadata.name,
            &execution.metadata.uid,
        );
        match self.launcher.launch(spec).await {
            Ok(()) => {
                crate::metrics::WORKERS_LAUNCHED.inc();
                Ok(())
            }
            // Lost the creation race against a previous reconcile; the
            // worker exists, which is what we wanted.
            Err(LaunchError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e).context("launching worker"),
        }
    }

    /// A template with a cooldown refuses new executions while the previous
    /// successful run of the same template is still inside the window.
    async fn cooldown_violation(
        &self,
        execution: &RunbookExecution,
        runbook: &Runbook,
    ) -> Result<Option<String>> {
        let cooldown = match parse_duration(&runbook.spec.cooldown).filter(|d| !d.is_zero()) {
            Some(cooldown) => cooldown,
            None => return Ok(None),
        };

        let siblings = self
            .store
            .list_executions(&execution.metadata.namespace)
            .await?;
        let last_completed = siblings
            .iter()
            .filter(|e| {
                e.metadata.name != execution.metadata.name
                    && e.spec.runbook_ref.name == execution.spec.runbook_ref.name
                    && e.status.phase == ExecutionPhase::Completed
            })
            .filter_map(|e| e.status.completion_time)
            .max();

        if let Some(completed_at) = last_completed {
            let since = Utc::now()
                .signed_duration_since(completed_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if since < cooldown {
                return Ok(Some(format!(
                    "cooldown in effect for runbook {:?}: last run completed {} ago",
                    runbook.spec.name,
                    format_duration(Duration::from_secs(since.as_secs())),
                )));
            }
        }
        Ok(None)
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

    fn stamp_completion(&self, execution: &mut RunbookExecution) {
        let now = Utc::now();
        execution.status.completion_time = Some(now);
        if let Some(start) = execution.status.start_time {
            let elapsed = now
                .signed_duration_since(start)
                .to_std()
                .unwrap_or(Duration::ZERO);
            execution.status.duration =
                format_duration(Duration::from_secs(elapsed.as_secs()));
        }
    }

    async fn set_phase(
        &self,
        execution: &mut RunbookExecution,
        phase: ExecutionPhase,
        message: &str,
    ) -> Result<()> {
        execution.status.phase = phase;
        execution.status.message = message.to_string();
        set_condition(
            &mut execution.status.conditions,
            Condition {
                kind: phase.to_string(),
                status: "True".to_string(),
                reason: phase.to_string(),
                message: message.to_string(),
                last_transition_time: Utc::now(),
            },
        );
        self.store.update_execution_status(execution).await?;

        crate::metrics::PHASE_TRANSITIONS
            .with_label_values(&[&phase.to_string()])
            .inc();

        if let Some(event_type) = audit_event_for_phase(phase) {
            self.audit.log_event(AuditEvent::new(
                event_type,
                &execution.metadata.name,
                &execution.metadata.namespace,
                &execution.spec.runbook_ref.name,
                &execution.spec.triggered_by,
                message.to_string(),
            ));
        }
        Ok(())
    }

    async fn announce_approval(&self, execution: &RunbookExecution, runbook: &Runbook) {
        let notifier = match &self.notifier {
            Some(notifier) => notifier,
            None => return,
        };
        let request = ApprovalRequest {
            execution_name: execution.metadata.name.clone(),
            namespace: execution.metadata.namespace.clone(),
            runbook_name: runbook.spec.name.clone(),
            triggered_by: execution.spec.triggered_by.clone(),
            risk_level: format!("{:?}", runbook.spec.risk_level).to_lowercase(),
            approvers: runbook.spec.approvers.iter().map(|a| a.name.clone()).collect(),
        };
        if let Err(e) = notifier.send_approval_notification(&request).await {
            warn!("failed to send approval notification: {e:#}");
        }
    }
}

fn audit_event_for_phase(phase: ExecutionPhase) -> Option<EventType> {
    match phase {
        ExecutionPhase::Pending => Some(EventType::ExecutionCreated),
        ExecutionPhase::PendingApproval => Some(EventType::ApprovalRequested),
        ExecutionPhase::Approved => Some(EventType::ApprovalGranted),
        ExecutionPhase::Running => Some(EventType::ExecutionStarted),
        ExecutionPhase::Completed => Some(EventType::ExecutionCompleted),
        ExecutionPhase::Failed | ExecutionPhase::TimedOut => Some(EventType::ExecutionFailed),
        ExecutionPhase::RollingBack => Some(EventType::RollbackStarted),
        ExecutionPhase::RolledBack => Some(EventType::RollbackCompleted),
        ExecutionPhase::Cancelled => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        Approver, ApproverKind, ObjectMeta, RunbookExecutionSpec, RunbookRef, RunbookSpec,
        RunbookStep,
    };
    use crate::launcher::fake::FakeLauncher;
    use crate::store::memory::MemoryStore;

    const NS: &str = "helios-automation";
    const IMAGE: &str = "/usr/local/bin/helios-runbook-executor";

    fn step(name: &str, action: &str) -> RunbookStep {
        RunbookStep {
            name: name.to_string(),
            action: action.to_string(),
            timeout: String::new(),
            continue_on_error: false,
            condition: String::new(),
            config: Default::default(),
        }
    }

    fn approval_runbook() -> Runbook {
        Runbook {
            metadata: ObjectMeta {
                name: "clear-bgp".to_string(),
                namespace: NS.to_string(),
                ..Default::default()
            },
            spec: RunbookSpec {
                name: "clear-bgp".to_string(),
                requires_approval: true,
                approvers: vec![Approver {
                    kind: ApproverKind::Group,
                    name: "noc-leads".to_string(),
                }],
                approval_timeout: "1h".to_string(),
                steps: vec![step("clear-bgp", "gnmi_set")],
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    fn plain_runbook(rollback: Vec<RunbookStep>) -> Runbook {
        Runbook {
            metadata: ObjectMeta {
                name: "interface-bounce".to_string(),
                namespace: NS.to_string(),
                ..Default::default()
            },
            spec: RunbookSpec {
                name: "interface-bounce".to_string(),
                steps: vec![step("bounce", "gnmi_set")],
                rollback,
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    fn execution_for(runbook: &str, name: &str) -> RunbookExecution {
        RunbookExecution {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: NS.to_string(),
                uid: format!("uid-{name}"),
                creation_timestamp: Utc::now(),
                ..Default::default()
            },
            spec: RunbookExecutionSpec {
                runbook_ref: RunbookRef {
                    name: runbook.to_string(),
                    namespace: String::new(),
                },
                triggered_by: "admin@example.com".to_string(),
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        launcher: Arc<FakeLauncher>,
        reconciler: ExecutionReconciler,
    }

    fn harness(store: MemoryStore) -> Harness {
        let store = Arc::new(store);
        let launcher = Arc::new(FakeLauncher::new());
        let reconciler = ExecutionReconciler::new(
            Arc::clone(&store) as Arc<dyn ResourceStore>,
            Arc::clone(&launcher) as Arc<dyn WorkerLauncher>,
            IMAGE,
        );
        Harness {
            store,
            launcher,
            reconciler,
        }
    }

    async fn reconcile(h: &Harness, name: &str) -> Outcome {
        h.reconciler
            .reconcile(&Request {
                namespace: NS.to_string(),
                name: name.to_string(),
            })
            .await
            .unwrap()
    }

    async fn stored(h: &Harness, name: &str) -> RunbookExecution {
        h.store.get_execution(NS, name).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn pending_without_approval_goes_straight_to_running() {
        let h = harness(
            MemoryStore::new()
                .with_runbook(plain_runbook(vec![]))
                .with_execution(execution_for("interface-bounce", "bounce-1")),
        );

        reconcile(&h, "bounce-1").await;

        let exec = stored(&h, "bounce-1").await;
        assert_eq!(exec.status.phase, ExecutionPhase::Running);
        assert!(exec.status.start_time.is_some());
    }

    #[tokio::test]
    async fn approval_flow_grant_and_run() {
        let h = harness(
            MemoryStore::new()
                .with_runbook(approval_runbook())
                .with_execution(execution_for("clear-bgp", "clear-bgp-1")),
        );

        // Pending → PendingApproval; no worker may exist yet.
        reconcile(&h, "clear-bgp-1").await;
        let exec = stored(&h, "clear-bgp-1").await;
        assert_eq!(exec.status.phase, ExecutionPhase::PendingApproval);
        assert!(exec.status.start_time.is_none());
        assert_eq!(h.launcher.launch_count(), 0);

        // Unapproved: requeue on the approval cadence.
        let outcome = reconcile(&h, "clear-bgp-1").await;
        assert_eq!(outcome.requeue_after, Some(APPROVAL_REQUEUE));

        // External approval patch by a listed approver.
        let mut exec = stored(&h, "clear-bgp-1").await;
        exec.status.approved_by = "noc-leads".to_string();
        h.store.update_execution_status(&exec).await.unwrap();

        reconcile(&h, "clear-bgp-1").await;
        let exec = stored(&h, "clear-bgp-1").await;
        assert_eq!(exec.status.phase, ExecutionPhase::Approved);
        assert!(exec.status.approved_at.is_some());
        assert!(exec.status.start_time.is_some());

        reconcile(&h, "clear-bgp-1").await;
        let exec = stored(&h, "clear-bgp-1").await;
        assert_eq!(exec.status.phase, ExecutionPhase::Running);

        // Running creates the executor worker.
        let outcome = reconcile(&h, "clear-bgp-1").await;
        assert_eq!(outcome.requeue_after, Some(WORKER_CREATE_REQUEUE));
        assert_eq!(h.launcher.launch_count(), 1);
        let exec = stored(&h, "clear-bgp-1").await;
        assert_eq!(exec.status.worker_name, "clear-bgp-1-executor");

        let launched = h.launcher.launched.lock().unwrap();
        assert_eq!(launched[0].name, "clear-bgp-1-executor");
        assert_eq!(launched[0].env["EXECUTION_NAME"], "clear-bgp-1");
        assert_eq!(launched[0].backoff_limit, 0);
    }

    #[tokio::test]
    async fn approval_by_non_approver_fails_with_message() {
        let mut exec = execution_for("clear-bgp", "clear-bgp-2");
        exec.status.phase = ExecutionPhase::PendingApproval;
        exec.status.approved_by = "intern".to_string();

        let h = harness(
            MemoryStore::new()
                .with_runbook(approval_runbook())
                .with_execution(exec),
        );

        reconcile(&h, "clear-bgp-2").await;

        let exec = stored(&h, "clear-bgp-2").await;
        assert_eq!(exec.status.phase, ExecutionPhase::Failed);
        assert!(exec.status.message.contains("intern"), "{}", exec.status.message);
        assert_eq!(h.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn approval_timeout_transitions_to_timed_out() {
        let mut exec = execution_for("clear-bgp", "clear-bgp-3");
        exec.metadata.creation_timestamp = Utc::now() - chrono::Duration::hours(2);
        exec.status.phase = ExecutionPhase::PendingApproval;

        let h = harness(
            MemoryStore::new()
                .with_runbook(approval_runbook())
                .with_execution(exec),
        );

        reconcile(&h, "clear-bgp-3").await;

        let exec = stored(&h, "clear-bgp-3").await;
        assert_eq!(exec.status.phase, ExecutionPhase::TimedOut);
        // No worker was ever created.
        assert_eq!(h.launcher.launch_count(), 0);

        // Terminal: further reconciles change nothing.
        let outcome = reconcile(&h, "clear-bgp-3").await;
        assert_eq!(outcome, Outcome::done());
    }

    #[tokio::test]
    async fn worker_success_completes_execution() {
        let mut exec = execution_for("interface-bounce", "bounce-2");
        exec.status.phase = ExecutionPhase::Running;
        exec.status.start_time = Some(Utc::now() - chrono::Duration::seconds(90));

        let h = harness(
            MemoryStore::new()
                .with_runbook(plain_runbook(vec![]))
                .with_execution(exec),
        );
        h.launcher.set_state(NS, "bounce-2-executor", WorkerState::Succeeded);

        reconcile(&h, "bounce-2").await;

        let exec = stored(&h, "bounce-2").await;
        assert_eq!(exec.status.phase, ExecutionPhase::Completed);
        assert!(exec.status.completion_time.is_some());
        assert_eq!(exec.status.duration, "1m30s");
    }

    #[tokio::test]
    async fn worker_failure_without_rollback_is_terminal() {
        let mut exec = execution_for("interface-bounce", "bounce-3");
        exec.status.phase = ExecutionPhase::Running;
        exec.status.start_time = Some(Utc::now());

        let h = harness(
            MemoryStore::new()
                .with_runbook(plain_runbook(vec![]))
                .with_execution(exec),
        );
        h.launcher.set_state(NS, "bounce-3-executor", WorkerState::Failed);

        reconcile(&h, "bounce-3").await;
        let exec = stored(&h, "bounce-3").await;
        assert_eq!(exec.status.phase, ExecutionPhase::Failed);
        assert!(exec.status.completion_time.is_none());

        // Failed reconcile finalizes: no rollback defined.
        reconcile(&h, "bounce-3").await;
        let exec = stored(&h, "bounce-3").await;
        assert_eq!(exec.status.phase, ExecutionPhase::Failed);
        assert!(exec.status.completion_time.is_some());
        assert_eq!(h.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn failure_with_rollback_rolls_back_and_succeeds() {
        let mut exec = execution_for("interface-bounce", "bounce-4");
        exec.status.phase = ExecutionPhase::Running;
        exec.status.start_time = Some(Utc::now());

        let h = harness(
            MemoryStore::new()
                .with_runbook(plain_runbook(vec![step("restore", "gnmi_set")]))
                .with_execution(exec),
        );
        h.launcher.set_state(NS, "bounce-4-executor", WorkerState::Failed);

        // Running → Failed.
        reconcile(&h, "bounce-4").await;
        assert_eq!(stored(&h, "bounce-4").await.status.phase, ExecutionPhase::Failed);

        // Failed → RollingBack.
        reconcile(&h, "bounce-4").await;
        assert_eq!(
            stored(&h, "bounce-4").await.status.phase,
            ExecutionPhase::RollingBack
        );

        // RollingBack creates the rollback worker.
        let outcome = reconcile(&h, "bounce-4").await;
        assert_eq!(outcome.requeue_after, Some(WORKER_CREATE_REQUEUE));
        assert_eq!(h.launcher.launch_count(), 1);
        {
            let launched = h.launcher.launched.lock().unwrap();
            assert_eq!(launched[0].name, "bounce-4-rollback");
        }

        // Rollback worker succeeds → RolledBack.
        h.launcher.set_state(NS, "bounce-4-rollback", WorkerState::Succeeded);
        reconcile(&h, "bounce-4").await;
        let exec = stored(&h, "bounce-4").await;
        assert_eq!(exec.status.phase, ExecutionPhase::RolledBack);
        assert!(exec.status.completion_time.is_some());
    }

    #[tokio::test]
    async fn rollback_failure_settles_in_failed() {
        let mut exec = execution_for("interface-bounce", "bounce-5");
        exec.status.phase = ExecutionPhase::RollingBack;
        exec.status.start_time = Some(Utc::now());

        let h = harness(
            MemoryStore::new()
                .with_runbook(plain_runbook(vec![step("restore", "gnmi_set")]))
                .with_execution(exec),
        );
        h.launcher.set_state(NS, "bounce-5-rollback", WorkerState::Failed);

        reconcile(&h, "bounce-5").await;
        let exec = stored(&h, "bounce-5").await;
        assert_eq!(exec.status.phase, ExecutionPhase::Failed);
        assert_eq!(exec.status.message, "Rollback failed");
        assert!(exec.status.completion_time.is_some());

        // The rollback worker exists, so Failed does not re-enter rollback.
        reconcile(&h, "bounce-5").await;
        assert_eq!(stored(&h, "bounce-5").await.status.phase, ExecutionPhase::Failed);
    }

    #[tokio::test]
    async fn running_worker_requeues_on_cadence() {
        let mut exec = execution_for("interface-bounce", "bounce-6");
        exec.status.phase = ExecutionPhase::Running;
        exec.status.start_time = Some(Utc::now());

        let h = harness(
            MemoryStore::new()
                .with_runbook(plain_runbook(vec![]))
                .with_execution(exec),
        );
        h.launcher.set_state(NS, "bounce-6-executor", WorkerState::Running);

        let outcome = reconcile(&h, "bounce-6").await;
        assert_eq!(outcome.requeue_after, Some(RUNNING_REQUEUE));
    }

    #[tokio::test]
    async fn cooldown_refuses_back_to_back_runs() {
        let mut runbook = plain_runbook(vec![]);
        runbook.spec.cooldown = "1h".to_string();

        let mut previous = execution_for("interface-bounce", "bounce-old");
        previous.status.phase = ExecutionPhase::Completed;
        previous.status.completion_time = Some(Utc::now() - chrono::Duration::minutes(5));

        let h = harness(
            MemoryStore::new()
                .with_runbook(runbook)
                .with_execution(previous)
                .with_execution(execution_for("interface-bounce", "bounce-new")),
        );

        reconcile(&h, "bounce-new").await;

        let exec = stored(&h, "bounce-new").await;
        assert_eq!(exec.status.phase, ExecutionPhase::Failed);
        assert!(exec.status.message.contains("cooldown"), "{}", exec.status.message);
        assert_eq!(h.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn cooldown_expired_allows_new_run() {
        let mut runbook = plain_runbook(vec![]);
        runbook.spec.cooldown = "1h".to_string();

        let mut previous = execution_for("interface-bounce", "bounce-old");
        previous.status.phase = ExecutionPhase::Completed;
        previous.status.completion_time = Some(Utc::now() - chrono::Duration::hours(2));

        let h = harness(
            MemoryStore::new()
                .with_runbook(runbook)
                .with_execution(previous)
                .with_execution(execution_for("interface-bounce", "bounce-new")),
        );

        reconcile(&h, "bounce-new").await;
        assert_eq!(
            stored(&h, "bounce-new").await.status.phase,
            ExecutionPhase::Running
        );
    }

    #[tokio::test]
    async fn missing_runbook_fails_pending_execution() {
        let h = harness(MemoryStore::new().with_execution(execution_for("ghost", "orphan-1")));

        reconcile(&h, "orphan-1").await;

        let exec = stored(&h, "orphan-1").await;
        assert_eq!(exec.status.phase, ExecutionPhase::Failed);
        assert!(exec.status.message.contains("failed to get runbook"));
    }

    #[tokio::test]
    async fn phase_conditions_accumulate() {
        let h = harness(
            MemoryStore::new()
                .with_runbook(plain_runbook(vec![]))
                .with_execution(execution_for("interface-bounce", "bounce-7")),
        );

        reconcile(&h, "bounce-7").await;
        h.launcher.set_state(NS, "bounce-7-executor", WorkerState::Succeeded);
        reconcile(&h, "bounce-7").await;

        let exec = stored(&h, "bounce-7").await;
        let kinds: Vec<&str> = exec.status.conditions.iter().map(|c| c.kind.as_str()).collect();
        assert!(kinds.contains(&"Running"));
        assert!(kinds.contains(&"Completed"));
    }
}
