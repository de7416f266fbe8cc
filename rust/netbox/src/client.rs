//! Paginated NetBox API client.

use std::collections::HashMap;
use std::time::Duration;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::model::{
    Device, DeviceMetadata, Interface, InterfaceMetadata, Paginated, RawDevice, RawInterface,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_LIMIT: u32 = 100;

/// Client for the NetBox inventory API.
pub struct Client {
    base_url: String,
    api_token: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str, api_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            http,
        })
    }

    /// Returns all active devices with the `helios_monitor` custom field set.
    /// Records that fail to parse are logged and skipped; page fetch failures
    /// abort the listing.
    pub async fn list_monitored_devices(&self) -> Result<Vec<Device>> {
        let mut devices = Vec::new();
        let mut next = Some(format!(
            "{}/api/dcim/devices/?cf_helios_monitor=true&status=active&limit={}",
            self.base_url, PAGE_LIMIT
        ));

        while let Some(url) = next {
            let page = self.fetch_page(&url).await?;
            for raw in page.results {
                match serde_json::from_value::<RawDevice>(raw) {
                    Ok(d) => devices.push(d.flatten()),
                    Err(e) => warn!("skipping device with unparseable data: {e}"),
                }
            }
            next = page.next;
        }

        info!("fetched {} monitored devices from NetBox", devices.len());
        Ok(devices)
    }

    /// Returns all interfaces of a device that carry a usable SNMP index.
    pub async fn list_device_interfaces(&self, device_id: i64) -> Result<Vec<Interface>> {
        let mut interfaces = Vec::new();
        let mut next = Some(format!(
            "{}/api/dcim/interfaces/?device_id={}&limit={}",
            self.base_url, device_id, PAGE_LIMIT
        ));

        while let Some(url) = next {
            let page = self.fetch_page(&url).await?;
            for raw in page.results {
                match serde_json::from_value::<RawInterface>(raw) {
                    Ok(iface) => {
                        if let Some(iface) = iface.flatten() {
                            interfaces.push(iface);
                        }
                    }
                    Err(e) => warn!("skipping interface with unparseable data: {e}"),
                }
            }
            next = page.next;
        }

        Ok(interfaces)
    }

    /// Builds the device-metadata map keyed by stripped management address,
    /// with per-device interface submaps keyed by SNMP index. Devices without
    /// a primary address are skipped; a failed interface fetch degrades that
    /// device to an empty submap instead of failing the whole build.
    pub async fn fetch_device_map(&self) -> Result<HashMap<String, DeviceMetadata>> {
        let devices = self.list_monitored_devices().await?;
        let mut map = HashMap::with_capacity(devices.len());

        for device in devices {
            if device.primary_ip.is_empty() {
                warn!(
                    "skipping device without primary IP: {} (id {})",
                    device.name, device.id
                );
                continue;
            }

            let interfaces = match self.list_device_interfaces(device.id).await {
                Ok(ifaces) => ifaces
                    .into_iter()
                    .map(|i| {
                        (
                            i.snmp_index,
                            InterfaceMetadata {
                                name: i.name,
                                speed: i.speed,
                            },
                        )
                    })
                    .collect(),
                Err(e) => {
                    warn!(
                        "failed to fetch interfaces for device {} (id {}): {e}",
                        device.name, device.id
                    );
                    HashMap::new()
                }
            };

            map.insert(
                device.primary_ip.clone(),
                DeviceMetadata {
                    name: device.name,
                    site: device.site,
                    region: device.region,
                    role: device.role,
                    interfaces,
                },
            );
        }

        Ok(map)
    }

    async fn fetch_page(&self, url: &str) -> Result<Paginated> {
        let resp = self
            .http
            .get(url)
            .header("Authorization", format!("Token {}", self.api_token))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            let body = body.chars().take(1024).collect();
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
