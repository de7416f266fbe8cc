use anyhow::{Context, Result};
use serde::Deserialize;

/// Operator options, read from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default = "default_health_probe_addr")]
    pub health_probe_addr: String,
    #[serde(default = "default_executor_image")]
    pub executor_image: String,
    #[serde(default)]
    pub enable_leader_election: bool,
    #[serde(default = "default_nats_url")]
    pub nats_url: String,
    #[serde(default = "default_resource_bucket")]
    pub resource_bucket: String,
    /// Optional approval-notification webhook.
    #[serde(default)]
    pub notify_webhook_url: Option<String>,
    #[serde(default = "default_notify_type")]
    pub notify_type: String,
}

fn default_metrics_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_health_probe_addr() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_executor_image() -> String {
    "/usr/local/bin/helios-runbook-executor".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_resource_bucket() -> String {
    "helios-automation".to_string()
}

fn default_notify_type() -> String {
    "webhook".to_string()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let cfg: Config = envy::from_env().context("failed to parse environment")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.executor_image.is_empty() {
            anyhow::bail!("EXECUTOR_IMAGE cannot be empty");
        }
        if self.nats_url.is_empty() {
            anyhow::bail!("NATS_URL cannot be empty");
        }
        if self.resource_bucket.is_empty() {
            anyhow::bail!("RESOURCE_BUCKET cannot be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config {
            metrics_addr: default_metrics_addr(),
            health_probe_addr: default_health_probe_addr(),
            executor_image: default_executor_image(),
            enable_leader_election: false,
            nats_url: default_nats_url(),
            resource_bucket: default_resource_bucket(),
            notify_webhook_url: None,
            notify_type: default_notify_type(),
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_executor_image_is_rejected() {
        let cfg = Config {
            metrics_addr: default_metrics_addr(),
            health_probe_addr: default_health_probe_addr(),
            executor_image: String::new(),
            enable_leader_election: false,
            nats_url: default_nats_url(),
            resource_bucket: default_resource_bucket(),
            notify_webhook_url: None,
            notify_type: default_notify_type(),
        };
        assert!(cfg.validate().is_err());
    }
}
