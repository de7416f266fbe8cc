//! Flattened inventory records and the raw wire shapes they are parsed from.

use std::collections::HashMap;

use serde::Deserialize;

/// A monitored device as consumed by the collection services.
///
/// Nested inventory objects (`site.name`, `manufacturer.slug`, ...) are
/// flattened to plain strings; absent relations flatten to `""`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Device {
    pub id: i64,
    pub name: String,
    /// Primary management address, CIDR suffix already stripped.
    pub primary_ip: String,
    pub site: String,
    pub region: String,
    pub role: String,
    pub manufacturer: String,
    pub platform: String,
    pub monitoring_tier: String,
    pub telemetry_profile: String,
    pub gnmi_enabled: bool,
    pub gnmi_port: u16,
    pub snmp_enabled: bool,
    pub snmp_module: String,
    pub blackbox_probes: Vec<String>,
}

/// A device interface with its resolved SNMP index.
#[derive(Debug, Clone, PartialEq)]
pub struct Interface {
    pub name: String,
    /// Interface speed in kbps; 0 when the inventory has no value.
    pub speed: u64,
    pub snmp_index: u32,
}

/// Device metadata keyed for the enrichment hot path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceMetadata {
    pub name: String,
    pub site: String,
    pub region: String,
    pub role: String,
    /// Keyed by SNMP index.
    pub interfaces: HashMap<u32, InterfaceMetadata>,
}

/// Interface metadata for the enrichment hot path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceMetadata {
    pub name: String,
    pub speed: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Paginated {
    #[allow(dead_code)]
    pub count: i64,
    pub next: Option<String>,
    pub results: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NameRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SlugRef {
    #[serde(default)]
    pub slug: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddressRef {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawDeviceCustomFields {
    #[serde(default)]
    pub gnmi_enabled: Option<bool>,
    #[serde(default)]
    pub gnmi_port: Option<u16>,
    #[serde(default)]
    pub snmp_enabled: Option<bool>,
    #[serde(default)]
    pub snmp_module: Option<String>,
    #[serde(default)]
    pub blackbox_probes: Option<Vec<String>>,
    #[serde(default)]
    pub telemetry_profile: Option<String>,
    #[serde(default)]
    pub monitoring_tier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawDevice {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub primary_ip: Option<AddressRef>,
    #[serde(default)]
    pub site: Option<NameRef>,
    #[serde(default)]
    pub region: Option<NameRef>,
    #[serde(default)]
    pub role: Option<NameRef>,
    #[serde(default)]
    pub manufacturer: Option<SlugRef>,
    #[serde(default)]
    pub platform: Option<SlugRef>,
    #[serde(default)]
    pub custom_fields: Option<RawDeviceCustomFields>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawInterfaceCustomFields {
    #[serde(default)]
    pub snmp_index: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawInterface {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub speed: Option<u64>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub custom_fields: Option<RawInterfaceCustomFields>,
}

impl RawDevice {
    pub(crate) fn flatten(self) -> Device {
        let custom = self.custom_fields.unwrap_or_default();
        Device {
            id: self.id,
            name: self.name,
            primary_ip: self
                .primary_ip
                .map(|ip| crate::strip_cidr(&ip.address).to_string())
                .unwrap_or_default(),
            site: self.site.map(|s| s.name).unwrap_or_default(),
            region: self.region.map(|r| r.name).unwrap_or_default(),
            role: self.role.map(|r| r.name).unwrap_or_default(),
            manufacturer: self.manufacturer.map(|m| m.slug).unwrap_or_default(),
            platform: self.platform.map(|p| p.slug).unwrap_or_default(),
            monitoring_tier: custom.monitoring_tier.unwrap_or_default(),
            telemetry_profile: custom.telemetry_profile.unwrap_or_default(),
            gnmi_enabled: custom.gnmi_enabled.unwrap_or(false),
            gnmi_port: custom.gnmi_port.unwrap_or(0),
            snmp_enabled: custom.snmp_enabled.unwrap_or(false),
            snmp_module: custom.snmp_module.unwrap_or_default(),
            blackbox_probes: custom.blackbox_probes.unwrap_or_default(),
        }
    }
}

impl RawInterface {
    /// Resolve the SNMP index: the typed custom field wins when present,
    /// otherwise the label is parsed as a positive integer. Interfaces
    /// without a usable positive index yield `None` and are dropped.
    pub(crate) fn snmp_index(&self) -> Option<u32> {
        if let Some(custom) = &self.custom_fields {
            if let Some(idx) = custom.snmp_index {
                return u32::try_from(idx).ok().filter(|i| *i > 0);
            }
        }
        self.label.parse::<u32>().ok().filter(|i| *i > 0)
    }

    pub(crate) fn flatten(self) -> Option<Interface> {
        let snmp_index = self.snmp_index()?;
        Some(Interface {
            name: self.name,
            speed: self.speed.unwrap_or(0),
            snmp_index,
        })
    }
}
