mod config;
mod metrics;
mod store;
mod targets;

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};

use config::Config;
use store::ArtifactStore;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        metrics::SYNC_ERRORS.inc();
        log::error!("sync failed: {e:#}");
        std::process::exit(1);
    }

    info!("target sync completed successfully");
}

async fn run() -> Result<()> {
    let cfg = Config::from_env()?;

    let metrics_addr = cfg.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(&metrics_addr).await {
            log::error!("metrics server error: {e}");
        }
    });

    let start = Instant::now();

    let client = helios_netbox::Client::new(&cfg.netbox_url, &cfg.netbox_api_token)
        .context("creating NetBox client")?;
    let store = ArtifactStore::connect(&cfg.nats_url, &cfg.target_namespace).await?;

    let devices = client
        .list_monitored_devices()
        .await
        .context("listing monitored devices")?;
    metrics::SYNC_DEVICES_TOTAL.set(devices.len() as f64);

    // Interface inventory per device. A failed fetch degrades that device to
    // an empty interface set; it never aborts the run.
    let mut interfaces_total = 0usize;
    for device in devices.iter().filter(|d| !d.primary_ip.is_empty()) {
        match client.list_device_interfaces(device.id).await {
            Ok(ifaces) => interfaces_total += ifaces.len(),
            Err(e) => warn!(
                "failed to fetch interfaces for device {} (id {}): {e}",
                device.name, device.id
            ),
        }
    }
    metrics::SYNC_INTERFACES_TOTAL.set(interfaces_total as f64);

    let (gnmi_data, gnmi_count) =
        targets::generate_gnmi_targets(&devices).context("generating gnmic targets")?;
    metrics::SYNC_TARGETS
        .with_label_values(&["gnmi"])
        .set(gnmi_count as f64);
    store
        .update_artifact(
            "helios-gnmic-targets",
            BTreeMap::from([("targets.yaml".to_string(), gnmi_data)]),
            artifact_labels("gnmic"),
            gnmi_count,
        )
        .await
        .context("updating gnmic artifact")?;

    let (snmp_data, snmp_count) =
        targets::generate_snmp_targets(&devices).context("generating snmp targets")?;
    metrics::SYNC_TARGETS
        .with_label_values(&["snmp"])
        .set(snmp_count as f64);
    store
        .update_artifact(
            "helios-snmp-targets",
            BTreeMap::from([("snmp-targets.json".to_string(), snmp_data)]),
            artifact_labels("snmp-exporter"),
            snmp_count,
        )
        .await
        .context("updating snmp artifact")?;

    let (bb_data, bb_count) =
        targets::generate_blackbox_targets(&devices).context("generating blackbox targets")?;
    metrics::SYNC_TARGETS
        .with_label_values(&["blackbox"])
        .set(bb_count as f64);
    store
        .update_artifact(
            "helios-blackbox-targets",
            bb_data,
            artifact_labels("blackbox-exporter"),
            bb_count,
        )
        .await
        .context("updating blackbox artifact")?;

    let duration = start.elapsed();
    metrics::SYNC_DURATION.set(duration.as_secs_f64());
    metrics::SYNC_LAST_SUCCESS.set(Utc::now().timestamp() as f64);

    info!(
        "sync complete: devices={} interfaces={} gnmi_targets={} snmp_targets={} blackbox_targets={} duration={:.2?}",
        devices.len(),
        interfaces_total,
        gnmi_count,
        snmp_count,
        bb_count,
        duration,
    );

    Ok(())
}

fn artifact_labels(consumer: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), consumer.to_string()),
        ("app.kubernetes.io/component".to_string(), "targets".to_string()),
        ("helios.io/generated-by".to_string(), "target-sync".to_string()),
    ])
}
