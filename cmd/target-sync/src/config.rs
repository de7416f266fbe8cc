use anyhow::{Context, Result};
use serde::Deserialize;

/// Synchronizer options, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub netbox_url: String,
    pub netbox_api_token: String,
    pub target_namespace: String,
    pub nats_url: String,
    pub metrics_addr: String,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_netbox_url")]
    netbox_url: String,
    #[serde(default)]
    netbox_api_token: String,
    #[serde(default = "default_target_namespace")]
    target_namespace: String,
    #[serde(default = "default_nats_url")]
    nats_url: String,
    #[serde(default = "default_metrics_addr")]
    metrics_addr: String,
}

fn default_netbox_url() -> String {
    "http://netbox.helios-integration.svc.cluster.local".to_string()
}

fn default_target_namespace() -> String {
    "helios-collection".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig = envy::from_env().context("failed to parse environment")?;
        let cfg = Self {
            netbox_url: raw.netbox_url,
            netbox_api_token: raw.netbox_api_token,
            target_namespace: raw.target_namespace,
            nats_url: raw.nats_url,
            metrics_addr: raw.metrics_addr,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.netbox_api_token.is_empty() {
            anyhow::bail!("NETBOX_API_TOKEN is required");
        }
        if self.netbox_url.is_empty() {
            anyhow::bail!("NETBOX_URL cannot be empty");
        }
        if self.target_namespace.is_empty() {
            anyhow::bail!("TARGET_NAMESPACE cannot be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_token() {
        let cfg = Config {
            netbox_url: default_netbox_url(),
            netbox_api_token: String::new(),
            target_namespace: default_target_namespace(),
            nats_url: default_nats_url(),
            metrics_addr: default_metrics_addr(),
        };
        assert!(cfg.validate().is_err());
    }
}
