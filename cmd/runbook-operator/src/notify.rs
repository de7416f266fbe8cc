//! Webhook notification dispatch for approval requests and notify steps.

use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Slack,
    Teams,
    Webhook,
}

impl NotificationKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "slack" => NotificationKind::Slack,
            "teams" => NotificationKind::Teams,
            _ => NotificationKind::Webhook,
        }
    }
}

/// A pending approval request to announce.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub execution_name: String,
    pub namespace: String,
    pub runbook_name: String,
    pub triggered_by: String,
    pub risk_level: String,
    pub approvers: Vec<String>,
}

/// Dispatches notifications to an external channel.
pub struct Notifier {
    webhook_url: String,
    kind: NotificationKind,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(webhook_url: &str, kind: NotificationKind) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("creating notification HTTP client")?;
        Ok(Self {
            webhook_url: webhook_url.to_string(),
            kind,
            http,
        })
    }

    pub async fn send_approval_notification(&self, req: &ApprovalRequest) -> Result<()> {
        let payload = match self.kind {
            NotificationKind::Slack => slack_payload(req),
            NotificationKind::Teams => teams_payload(req),
            NotificationKind::Webhook => serde_json::to_value(req)?,
        };
        self.post(&payload).await?;
        info!(
            "approval notification sent for {}/{}",
            req.namespace, req.execution_name
        );
        Ok(())
    }

    /// Sends a free-form notify-step message.
    pub async fn send_message(&self, subject: &str, message: &str) -> Result<()> {
        let payload = match self.kind {
            NotificationKind::Slack => json!({"text": format!("*{subject}*\n{message}")}),
            NotificationKind::Teams => json!({
                "@type": "MessageCard",
                "@context": "http://schema.org/extensions",
                "summary": subject,
                "title": subject,
                "text": message,
            }),
            NotificationKind::Webhook => json!({"subject": subject, "message": message}),
        };
        self.post(&payload).await
    }

    async fn post(&self, payload: &Value) -> Result<()> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(payload)
            .send()
            .await
            .context("sending notification")?;

        let status = resp.status();
        if status.as_u16() >= 400 {
            anyhow::bail!("notification webhook returned status {status}");
        }
        Ok(())
    }
}

fn slack_payload(req: &ApprovalRequest) -> Value {
    json!({
        "text": format!("Runbook approval requested for *{}*", req.runbook_name),
        "blocks": [
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        "*Runbook Approval Request*\n\n*Runbook:* {}\n*Execution:* {}/{}\n*Triggered by:* {}\n*Risk Level:* {}",
                        req.runbook_name, req.namespace, req.execution_name,
                        req.triggered_by, req.risk_level
                    ),
                }
            }
        ]
    })
}

fn teams_payload(req: &ApprovalRequest) -> Value {
    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "summary": format!("Runbook approval: {}", req.runbook_name),
        "themeColor": "FF9800",
        "title": "Runbook Approval Request",
        "sections": [
            {
                "facts": [
                    {"name": "Runbook", "value": req.runbook_name},
                    {"name": "Execution", "value": format!("{}/{}", req.namespace, req.execution_name)},
                    {"name": "Triggered by", "value": req.triggered_by},
                    {"name": "Risk Level", "value": req.risk_level},
                ]
            }
        ]
    })
}
