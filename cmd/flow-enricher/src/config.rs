use anyhow::{Context, Result};
use serde::Deserialize;

/// Enricher options, read from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,
    #[serde(default = "default_consumer_topic")]
    pub kafka_consumer_topic: String,
    #[serde(default = "default_consumer_group")]
    pub kafka_consumer_group: String,
    #[serde(default = "default_producer_topic")]
    pub kafka_producer_topic: String,
    /// Optional inventory wiring; without it the device cache stays empty.
    #[serde(default)]
    pub netbox_api_url: Option<String>,
    #[serde(default)]
    pub netbox_api_token: Option<String>,
    #[serde(default = "default_geoip_city_db")]
    pub geoip_city_db: String,
    #[serde(default = "default_geoip_asn_db")]
    pub geoip_asn_db: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_kafka_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_consumer_topic() -> String {
    "helios-flows-raw".to_string()
}

fn default_consumer_group() -> String {
    "flow-enricher".to_string()
}

fn default_producer_topic() -> String {
    "helios-flows-enriched".to_string()
}

fn default_geoip_city_db() -> String {
    "/var/lib/geoip/GeoLite2-City.mmdb".to_string()
}

fn default_geoip_asn_db() -> String {
    "/var/lib/geoip/GeoLite2-ASN.mmdb".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let cfg: Config = envy::from_env().context("failed to parse environment")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.kafka_brokers.is_empty() {
            anyhow::bail!("KAFKA_BROKERS cannot be empty");
        }
        if let Some(url) = &self.netbox_api_url {
            if !url.is_empty() && self.netbox_api_token.as_deref().unwrap_or("").is_empty() {
                anyhow::bail!("NETBOX_API_TOKEN must be set when NETBOX_API_URL is configured");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            kafka_brokers: default_kafka_brokers(),
            kafka_consumer_topic: default_consumer_topic(),
            kafka_consumer_group: default_consumer_group(),
            kafka_producer_topic: default_producer_topic(),
            netbox_api_url: None,
            netbox_api_token: None,
            geoip_city_db: default_geoip_city_db(),
            geoip_asn_db: default_geoip_asn_db(),
            metrics_addr: default_metrics_addr(),
        }
    }

    #[test]
    fn netbox_url_requires_token() {
        let mut cfg = base_config();
        cfg.netbox_api_url = Some("http://netbox.example.com".to_string());
        assert!(cfg.validate().is_err());

        cfg.netbox_api_token = Some("secret".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn cache_source_is_optional() {
        assert!(base_config().validate().is_ok());
    }
}
