//! Resource types for the runbook automation API.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a runbook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunbookCategory {
    Interface,
    Bgp,
    System,
    Security,
    Diagnostic,
    #[default]
    Custom,
}

/// Risk level of a runbook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Action type of a runbook step. Steps carry the action as a free string so
/// that a resource with an unknown action still loads and fails admission
/// with a diagnostic instead of failing to parse; this enum is the allowed
/// set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    GnmiSet,
    GnmiGet,
    GnmiSubscribe,
    Wait,
    Notify,
    Condition,
}

impl StepAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gnmi_set" => Some(StepAction::GnmiSet),
            "gnmi_get" => Some(StepAction::GnmiGet),
            "gnmi_subscribe" => Some(StepAction::GnmiSubscribe),
            "wait" => Some(StepAction::Wait),
            "notify" => Some(StepAction::Notify),
            "condition" => Some(StepAction::Condition),
            _ => None,
        }
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepAction::GnmiSet => "gnmi_set",
            StepAction::GnmiGet => "gnmi_get",
            StepAction::GnmiSubscribe => "gnmi_subscribe",
            StepAction::Wait => "wait",
            StepAction::Notify => "notify",
            StepAction::Condition => "condition",
        };
        f.write_str(s)
    }
}

/// An approver entry: a user or a group identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    #[serde(rename = "type")]
    pub kind: ApproverKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApproverKind {
    User,
    Group,
}

/// A declared runbook parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub validation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// A single step in a runbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunbookStep {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timeout: String,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: serde_json::Map<String, Value>,
}

/// Desired state of a runbook template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunbookSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub category: RunbookCategory,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvers: Vec<Approver>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub approval_timeout: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cooldown: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub steps: Vec<RunbookStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollback: Vec<RunbookStep>,
}

/// Observed state of a runbook template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunbookStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Resource identity shared by both resource kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default = "Utc::now")]
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Default for ObjectMeta {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: String::new(),
            uid: String::new(),
            creation_timestamp: Utc::now(),
            labels: BTreeMap::new(),
        }
    }
}

/// A runbook template resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Runbook {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RunbookSpec,
    #[serde(default)]
    pub status: RunbookStatus,
}

/// Phase of a runbook execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPhase {
    #[default]
    Pending,
    PendingApproval,
    Approved,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
    RollingBack,
    RolledBack,
}

impl ExecutionPhase {
    /// Phases after which no further reconciliation happens. Failed is
    /// handled separately: it is terminal only when no rollback is defined.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionPhase::Completed
                | ExecutionPhase::Cancelled
                | ExecutionPhase::TimedOut
                | ExecutionPhase::RolledBack
        )
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionPhase::Pending => "Pending",
            ExecutionPhase::PendingApproval => "PendingApproval",
            ExecutionPhase::Approved => "Approved",
            ExecutionPhase::Running => "Running",
            ExecutionPhase::Completed => "Completed",
            ExecutionPhase::Failed => "Failed",
            ExecutionPhase::Cancelled => "Cancelled",
            ExecutionPhase::TimedOut => "TimedOut",
            ExecutionPhase::RollingBack => "RollingBack",
            ExecutionPhase::RolledBack => "RolledBack",
        };
        f.write_str(s)
    }
}

/// Source of an execution trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    #[default]
    Manual,
    Alert,
    Scheduled,
    Api,
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Reference to a runbook template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunbookRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// Desired state of an execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunbookExecutionSpec {
    pub runbook_ref: RunbookRef,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: serde_json::Map<String, Value>,
    #[serde(default)]
    pub triggered_by: String,
    #[serde(default)]
    pub trigger_source: TriggerSource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alert_ref: String,
    #[serde(default)]
    pub dry_run: bool,
}

/// Status of a single execution step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStepStatus {
    pub name: String,
    #[serde(default)]
    pub status: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Observed state of an execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunbookExecutionStatus {
    #[serde(default)]
    pub phase: ExecutionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub duration: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub approved_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<ExecutionStepStatus>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub worker_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// A runbook execution resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunbookExecution {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RunbookExecutionSpec,
    #[serde(default)]
    pub status: RunbookExecutionStatus,
}

/// A status condition, also used as the human-readable audit surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Upserts a condition by type, stamping the transition time.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == condition.kind) {
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

/// Parses a Go-style duration string: a sequence of decimal numbers, each
/// with a unit suffix out of `ns`, `us`, `ms`, `s`, `m`, `h` (for example
/// `"1h30m"`, `"10s"`). Returns `None` on empty or malformed input.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let value: f64 = rest[..digits_end].parse().ok()?;
        rest = &rest[digits_end..];

        let (unit_secs, unit_len) = if rest.starts_with("ns") {
            (1e-9, 2)
        } else if rest.starts_with("us") {
            (1e-6, 2)
        } else if rest.starts_with("ms") {
            (1e-3, 2)
        } else if rest.starts_with('s') {
            (1.0, 1)
        } else if rest.starts_with('m') {
            (60.0, 1)
        } else if rest.starts_with('h') {
            (3600.0, 1)
        } else {
            return None;
        };
        rest = &rest[unit_len..];

        total += Duration::from_secs_f64(value * unit_secs);
    }

    Some(total)
}

/// Formats a duration the way Go's `Duration.String()` renders whole
/// seconds: `"1h2m3s"`, `"45s"`, `"0s"`. Used for the human-readable
/// execution duration field, which is rounded to seconds.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 || (hours > 0 && seconds > 0) {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 || out.is_empty() {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_action_wire_names() {
        assert_eq!(StepAction::parse("gnmi_set"), Some(StepAction::GnmiSet));
        assert_eq!(StepAction::parse("wait"), Some(StepAction::Wait));
        assert_eq!(StepAction::parse("script"), None);
        assert_eq!(StepAction::parse(""), None);
        assert_eq!(StepAction::GnmiSubscribe.to_string(), "gnmi_subscribe");
    }

    #[test]
    fn execution_phase_roundtrip() {
        for phase in [
            ExecutionPhase::Pending,
            ExecutionPhase::PendingApproval,
            ExecutionPhase::RollingBack,
            ExecutionPhase::RolledBack,
        ] {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{phase}\""));
            let back: ExecutionPhase = serde_json::from_str(&json).unwrap();
            assert_eq!(back, phase);
        }
    }

    #[test]
    fn terminal_phases() {
        assert!(ExecutionPhase::Completed.is_terminal());
        assert!(ExecutionPhase::Cancelled.is_terminal());
        assert!(ExecutionPhase::TimedOut.is_terminal());
        assert!(ExecutionPhase::RolledBack.is_terminal());
        assert!(!ExecutionPhase::Failed.is_terminal());
        assert!(!ExecutionPhase::Running.is_terminal());
        assert!(!ExecutionPhase::Pending.is_terminal());
    }

    #[test]
    fn parse_duration_go_syntax() {
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("banana"), None);
        assert_eq!(parse_duration("10"), None);
    }

    #[test]
    fn format_duration_go_style() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h2m3s");
    }

    #[test]
    fn unknown_step_action_still_parses() {
        let step: RunbookStep = serde_json::from_value(serde_json::json!({
            "name": "bad",
            "action": "script"
        }))
        .unwrap();
        assert_eq!(step.action, "script");
        assert_eq!(StepAction::parse(&step.action), None);
    }

    #[test]
    fn set_condition_upserts_by_type() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition {
                kind: "Ready".to_string(),
                status: "False".to_string(),
                reason: "ValidationFailed".to_string(),
                message: "bad".to_string(),
                last_transition_time: Utc::now(),
            },
        );
        set_condition(
            &mut conditions,
            Condition {
                kind: "Ready".to_string(),
                status: "True".to_string(),
                reason: "Valid".to_string(),
                message: "ok".to_string(),
                last_transition_time: Utc::now(),
            },
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "True");
    }
}
