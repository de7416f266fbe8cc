//! Runbook template admission.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::{info, warn};

use crate::api::{set_condition, Condition, Runbook, StepAction};
use crate::store::ResourceStore;

use super::Request;

pub struct RunbookReconciler {
    store: Arc<dyn ResourceStore>,
}

impl RunbookReconciler {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Validates the template and records the result as a Ready condition.
    pub async fn reconcile(&self, request: &Request) -> Result<()> {
        let mut runbook = match self
            .store
            .get_runbook(&request.namespace, &request.name)
            .await?
        {
            Some(runbook) => runbook,
            None => return Ok(()),
        };

        match validate_runbook(&runbook) {
            Ok(()) => {
                set_condition(
                    &mut runbook.status.conditions,
                    Condition {
                        kind: "Ready".to_string(),
                        status: "True".to_string(),
                        reason: "Valid".to_string(),
                        message: "Runbook schema is valid".to_string(),
                        last_transition_time: Utc::now(),
                    },
                );
                self.store.update_runbook_status(&runbook).await?;
                info!(
                    "runbook {}/{} reconciled, category {:?}",
                    request.namespace, request.name, runbook.spec.category
                );
            }
            Err(message) => {
                warn!(
                    "runbook {}/{} validation failed: {message}",
                    request.namespace, request.name
                );
                set_condition(
                    &mut runbook.status.conditions,
                    Condition {
                        kind: "Ready".to_string(),
                        status: "False".to_string(),
                        reason: "ValidationFailed".to_string(),
                        message,
                        last_transition_time: Utc::now(),
                    },
                );
                self.store.update_runbook_status(&runbook).await?;
            }
        }

        Ok(())
    }
}

/// Admission rules: non-empty identity, at least one step, approval implies
/// approvers, every step named with an action from the allowed set.
pub fn validate_runbook(runbook: &Runbook) -> std::result::Result<(), String> {
    if runbook.spec.name.is_empty() {
        return Err("runbook name is required".to_string());
    }
    if runbook.spec.steps.is_empty() {
        return Err("runbook must have at least one step".to_string());
    }
    if runbook.spec.requires_approval && runbook.spec.approvers.is_empty() {
        return Err("approvers required when requiresApproval is true".to_string());
    }
    for (i, step) in runbook.spec.steps.iter().enumerate() {
        if step.name.is_empty() {
            return Err(format!("step {i}: name is required"));
        }
        if step.action.is_empty() {
            return Err(format!("step {i}: action is required"));
        }
        if StepAction::parse(&step.action).is_none() {
            return Err(format!("step {i}: action {:?} is not allowed", step.action));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Approver, ApproverKind, RunbookCategory, RunbookSpec, RunbookStep};
    use crate::store::memory::MemoryStore;

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

    fn runbook_with(spec: RunbookSpec) -> Runbook {
        Runbook {
            metadata: crate::api::ObjectMeta {
                name: spec.name.clone(),
                namespace: "helios-automation".to_string(),
                ..Default::default()
            },
            spec,
            status: Default::default(),
        }
    }

    #[test]
    fn validation_table() {
        struct Case {
            name: &'static str,
            runbook: Runbook,
            want_err: Option<&'static str>,
        }

        let cases = vec![
            Case {
                name: "valid runbook without approval",
                runbook: runbook_with(RunbookSpec {
                    name: "interface-bounce".to_string(),
                    category: RunbookCategory::Interface,
                    steps: vec![
                        step("disable-interface", "gnmi_set"),
                        step("wait", "wait"),
                        step("enable-interface", "gnmi_set"),
                    ],
                    ..Default::default()
                }),
                want_err: None,
            },
            Case {
                name: "valid runbook with approval and approvers",
                runbook: runbook_with(RunbookSpec {
                    name: "clear-bgp".to_string(),
                    category: RunbookCategory::Bgp,
                    requires_approval: true,
                    approvers: vec![Approver {
                        kind: ApproverKind::Group,
                        name: "noc-leads".to_string(),
                    }],
                    steps: vec![step("clear-bgp", "gnmi_set")],
                    ..Default::default()
                }),
                want_err: None,
            },
            Case {
                name: "empty name",
                runbook: runbook_with(RunbookSpec {
                    name: String::new(),
                    steps: vec![step("step-1", "wait")],
                    ..Default::default()
                }),
                want_err: Some("name is required"),
            },
            Case {
                name: "no steps",
                runbook: runbook_with(RunbookSpec {
                    name: "empty-runbook".to_string(),
                    steps: vec![],
                    ..Default::default()
                }),
                want_err: Some("at least one step"),
            },
            Case {
                name: "requires approval without approvers",
                runbook: runbook_with(RunbookSpec {
                    name: "needs-approval".to_string(),
                    requires_approval: true,
                    steps: vec![step("step-1", "gnmi_set")],
                    ..Default::default()
                }),
                want_err: Some("approvers required"),
            },
            Case {
                name: "step with empty name",
                runbook: runbook_with(RunbookSpec {
                    name: "bad-step".to_string(),
                    steps: vec![step("", "wait")],
                    ..Default::default()
                }),
                want_err: Some("name is required"),
            },
            Case {
                name: "step with empty action",
                runbook: runbook_with(RunbookSpec {
                    name: "bad-step-action".to_string(),
                    steps: vec![step("step-1", "")],
                    ..Default::default()
                }),
                want_err: Some("action is required"),
            },
            Case {
                name: "step with unknown action",
                runbook: runbook_with(RunbookSpec {
                    name: "bad-action".to_string(),
                    steps: vec![step("step-1", "script")],
                    ..Default::default()
                }),
                want_err: Some("not allowed"),
            },
        ];

        for case in cases {
            let result = validate_runbook(&case.runbook);
            match case.want_err {
                Some(want) => {
                    let err = result.expect_err(case.name);
                    assert!(
                        err.contains(want),
                        "{}: error {err:?} should contain {want:?}",
                        case.name
                    );
                }
                None => assert!(result.is_ok(), "{}: unexpected error {result:?}", case.name),
            }
        }
    }

    #[tokio::test]
    async fn reconcile_records_ready_condition() {
        let runbook = runbook_with(RunbookSpec {
            name: "interface-bounce".to_string(),
            steps: vec![step("bounce", "gnmi_set")],
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::new().with_runbook(runbook));
        let reconciler = RunbookReconciler::new(store.clone());

        reconciler
            .reconcile(&Request {
                namespace: "helios-automation".to_string(),
                name: "interface-bounce".to_string(),
            })
            .await
            .unwrap();

        let stored = store
            .get_runbook("helios-automation", "interface-bounce")
            .await
            .unwrap()
            .unwrap();
        let ready = &stored.status.conditions[0];
        assert_eq!(ready.kind, "Ready");
        assert_eq!(ready.status, "True");
        assert_eq!(ready.reason, "Valid");
    }

    #[tokio::test]
    async fn reconcile_marks_invalid_runbook_not_ready() {
        let runbook = runbook_with(RunbookSpec {
            name: "bad".to_string(),
            requires_approval: true,
            steps: vec![step("step-1", "gnmi_set")],
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::new().with_runbook(runbook));
        let reconciler = RunbookReconciler::new(store.clone());

        reconciler
            .reconcile(&Request {
                namespace: "helios-automation".to_string(),
                name: "bad".to_string(),
            })
            .await
            .unwrap();

        let stored = store
            .get_runbook("helios-automation", "bad")
            .await
            .unwrap()
            .unwrap();
        let ready = &stored.status.conditions[0];
        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason, "ValidationFailed");
        assert!(ready.message.contains("approvers required"));
    }

    #[tokio::test]
    async fn reconcile_missing_runbook_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = RunbookReconciler::new(store);
        let result = reconciler
            .reconcile(&Request {
                namespace: "helios-automation".to_string(),
                name: "ghost".to_string(),
            })
            .await;
        assert!(result.is_ok());
    }
}
