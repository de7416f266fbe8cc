//! Target artifact generation from inventory devices.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use helios_netbox::Device;

/// The standard Helios label set applied to every generated target.
pub const LABEL_TAXONOMY: [&str; 7] = [
    "device", "site", "region", "vendor", "platform", "role", "tier",
];

/// Constructs the standard label set from an inventory device. All seven
/// taxonomy keys are always present, empty values included.
pub fn build_labels(d: &Device) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("device".to_string(), d.name.clone()),
        ("site".to_string(), d.site.clone()),
        ("region".to_string(), d.region.clone()),
        ("vendor".to_string(), d.manufacturer.clone()),
        ("platform".to_string(), d.platform.clone()),
        ("role".to_string(), d.role.clone()),
        ("tier".to_string(), d.monitoring_tier.clone()),
    ])
}

/// A single gnmic target entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct GnmiTarget {
    pub address: String,
    pub labels: BTreeMap<String, String>,
    pub subscriptions: Vec<String>,
}

/// Top-level gnmic targets document.
#[derive(Debug, Serialize, Deserialize)]
pub struct GnmiTargets {
    pub targets: BTreeMap<String, GnmiTarget>,
}

/// A Prometheus file_sd target group.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileSdEntry {
    pub targets: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// Converts devices to the gnmic target YAML document. Only gNMI-enabled
/// devices with a primary address are included.
pub fn generate_gnmi_targets(devices: &[Device]) -> Result<(String, usize)> {
    let mut targets = BTreeMap::new();

    for d in devices {
        if !d.gnmi_enabled || d.primary_ip.is_empty() {
            continue;
        }

        let port = if d.gnmi_port == 0 { 6030 } else { d.gnmi_port };
        let key = format!("{}:{}", d.name, port);
        let address = format!("{}:{}", d.primary_ip, port);

        targets.insert(
            key,
            GnmiTarget {
                address,
                labels: build_labels(d),
                subscriptions: default_subscriptions(d),
            },
        );
    }

    let count = targets.len();
    let data =
        serde_yaml::to_string(&GnmiTargets { targets }).context("marshaling gnmic targets")?;
    Ok((data, count))
}

fn default_subscriptions(d: &Device) -> Vec<String> {
    let mut subs = vec!["default-counters".to_string(), "default-system".to_string()];
    if !d.telemetry_profile.is_empty() {
        subs.push(d.telemetry_profile.clone());
    } else {
        subs.push("default-bgp".to_string());
    }
    subs
}

/// Converts devices to Prometheus file_sd JSON for the SNMP collector. The
/// module-selector label falls back to the vendor/platform table when the
/// device carries no explicit module.
pub fn generate_snmp_targets(devices: &[Device]) -> Result<(String, usize)> {
    let mut entries = Vec::new();

    for d in devices {
        if !d.snmp_enabled || d.primary_ip.is_empty() {
            continue;
        }

        let module = if d.snmp_module.is_empty() {
            default_snmp_module(&d.manufacturer, &d.platform).to_string()
        } else {
            d.snmp_module.clone()
        };

        let mut labels = build_labels(d);
        labels.insert("__param_module".to_string(), module);

        entries.push(FileSdEntry {
            targets: vec![d.primary_ip.clone()],
            labels,
        });
    }

    let count = entries.len();
    let data = serde_json::to_string_pretty(&entries).context("marshaling SNMP targets")?;
    Ok((data, count))
}

fn default_snmp_module(manufacturer: &str, platform: &str) -> &'static str {
    match manufacturer {
        "arista" => "arista_eos",
        "cisco" => match platform {
            "iosxe" => "cisco_iosxe",
            "nxos" => "cisco_nxos",
            _ => "cisco_ios",
        },
        "juniper" => "juniper_junos",
        "paloalto" => "paloalto_panos",
        _ => "if_mib",
    }
}

/// Converts devices to per-probe file_sd JSON for the synthetic prober.
/// Returns one file per probe kind, keyed `blackbox-<probe>-targets.json`.
pub fn generate_blackbox_targets(devices: &[Device]) -> Result<(BTreeMap<String, String>, usize)> {
    let mut probe_targets: BTreeMap<String, Vec<FileSdEntry>> = BTreeMap::new();
    let mut count = 0;

    for d in devices {
        if d.primary_ip.is_empty() {
            continue;
        }

        let default_probes = vec!["icmp".to_string()];
        let probes = if d.blackbox_probes.is_empty() {
            &default_probes
        } else {
            &d.blackbox_probes
        };

        for probe in probes {
            let target = target_for_probe(d, probe);
            if target.is_empty() {
                continue;
            }

            let mut labels = build_labels(d);
            labels.insert("__param_module".to_string(), probe.clone());

            probe_targets.entry(probe.clone()).or_default().push(FileSdEntry {
                targets: vec![target],
                labels,
            });
            count += 1;
        }
    }

    let mut result = BTreeMap::new();
    for (probe, entries) in probe_targets {
        let data = serde_json::to_string_pretty(&entries)
            .with_context(|| format!("marshaling blackbox targets for probe {probe}"))?;
        result.insert(format!("blackbox-{probe}-targets.json"), data);
    }

    Ok((result, count))
}

fn target_for_probe(d: &Device, probe: &str) -> String {
    match probe {
        "icmp" => d.primary_ip.clone(),
        "tcp_connect" => format!("{}:22", d.primary_ip),
        "http_2xx" => format!("https://{}", d.primary_ip),
        _ => d.primary_ip.clone(),
    }
}
