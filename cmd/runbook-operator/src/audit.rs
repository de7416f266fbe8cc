//! Structured audit trail for runbook automation.
//!
//! Every admission, phase transition, step start/end/failure, approval
//! decision, and rollback boundary is emitted as one JSON event on the
//! `audit` log target.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    ExecutionCreated,
    ExecutionStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalDenied,
    RollbackStarted,
    RollbackCompleted,
    ExecutionCompleted,
    ExecutionFailed,
}

/// A single audit entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub execution_name: String,
    pub namespace: String,
    pub runbook_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub step_name: String,
    pub triggered_by: String,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        execution_name: &str,
        namespace: &str,
        runbook_name: &str,
        triggered_by: &str,
        message: String,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            execution_name: execution_name.to_string(),
            namespace: namespace.to_string(),
            runbook_name: runbook_name.to_string(),
            step_name: String::new(),
            triggered_by: triggered_by.to_string(),
            message,
            details: BTreeMap::new(),
        }
    }

    pub fn with_step(mut self, step: &str) -> Self {
        self.step_name = step.to_string();
        self
    }

    pub fn with_detail(mut self, key: &str, value: &str) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Emits audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditLog;

impl AuditLog {
    pub fn new() -> Self {
        Self
    }

    pub fn log_event(&self, mut event: AuditEvent) {
        event.timestamp = Utc::now();
        match serde_json::to_string(&event) {
            Ok(line) => info!(target: "audit", "{line}"),
            Err(e) => info!(target: "audit", "unencodable audit event: {e}"),
        }
    }

    pub fn log_step_start(&self, exec: &str, ns: &str, runbook: &str, step: &str, by: &str) {
        self.log_event(
            AuditEvent::new(
                EventType::StepStarted,
                exec,
                ns,
                runbook,
                by,
                format!("Step {step:?} started"),
            )
            .with_step(step),
        );
    }

    pub fn log_step_complete(
        &self,
        exec: &str,
        ns: &str,
        runbook: &str,
        step: &str,
        by: &str,
        output: &str,
    ) {
        self.log_event(
            AuditEvent::new(
                EventType::StepCompleted,
                exec,
                ns,
                runbook,
                by,
                format!("Step {step:?} completed"),
            )
            .with_step(step)
            .with_detail("output", output),
        );
    }

    pub fn log_step_failed(
        &self,
        exec: &str,
        ns: &str,
        runbook: &str,
        step: &str,
        by: &str,
        error: &str,
    ) {
        self.log_event(
            AuditEvent::new(
                EventType::StepFailed,
                exec,
                ns,
                runbook,
                by,
                format!("Step {step:?} failed: {error}"),
            )
            .with_step(step)
            .with_detail("error", error),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_event_serializes_camel_case() {
        let event = AuditEvent::new(
            EventType::ApprovalGranted,
            "clear-bgp-1",
            "helios-automation",
            "clear-bgp",
            "noc-leads",
            "Approved".to_string(),
        )
        .with_detail("approvedBy", "noc-leads");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "ApprovalGranted");
        assert_eq!(json["executionName"], "clear-bgp-1");
        assert_eq!(json["runbookName"], "clear-bgp");
        assert_eq!(json["details"]["approvedBy"], "noc-leads");
        // Step name is omitted when empty.
        assert!(json.get("stepName").is_none());
    }
}
