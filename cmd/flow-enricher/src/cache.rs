//! Refreshable device-metadata cache.
//!
//! Single writer (the refresher task), many readers (the enrichment hot
//! path). Refresh builds a whole new map and swaps it in under the write
//! lock, so readers always observe a fully-formed snapshot.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{error, info};
use tokio::sync::watch;

use helios_netbox::DeviceMetadata;

use crate::metrics;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

pub struct DeviceCache {
    devices: RwLock<HashMap<String, DeviceMetadata>>,
    client: Option<helios_netbox::Client>,
    interval: Duration,
}

impl DeviceCache {
    pub fn new(client: Option<helios_netbox::Client>, interval: Duration) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            client,
            interval,
        }
    }

    /// Runs the lookup closure against the device for the given management
    /// address, under a read lock held only for the duration of the call.
    pub fn with_device<R>(&self, ip: &str, f: impl FnOnce(&DeviceMetadata) -> R) -> Option<R> {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices.get(ip).map(f)
    }

    pub fn device_count(&self) -> usize {
        let devices = self.devices.read().unwrap_or_else(|e| e.into_inner());
        devices.len()
    }

    /// Drives periodic refresh until shutdown. The initial refresh failing is
    /// logged but never blocks consumption; the stream starts degraded.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.client.is_none() {
            info!("no inventory configured, device cache stays empty");
            return;
        }

        if let Err(e) = self.refresh().await {
            error!("initial device cache refresh failed: {e:#}");
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        error!("device cache refresh failed: {e:#}");
                    }
                }
            }
        }
    }

    /// Rebuilds the device map from the inventory. On failure the previous
    /// snapshot is preserved and the error gauge is incremented.
    pub async fn refresh(&self) -> Result<()> {
        let client = match &self.client {
            Some(client) => client,
            None => return Ok(()),
        };

        info!("refreshing device cache");
        let start = Instant::now();

        let map = match client.fetch_device_map().await {
            Ok(map) => map,
            Err(e) => {
                metrics::CACHE_REFRESH_ERRORS.inc();
                return Err(e).context("fetching devices from inventory");
            }
        };

        self.install(map);
        let count = self.device_count();

        metrics::CACHE_DEVICES.set(count as f64);
        info!(
            "device cache refreshed: devices={} duration={:.2?}",
            count,
            start.elapsed()
        );
        Ok(())
    }

    /// Swaps in a new snapshot wholesale.
    pub fn install(&self, map: HashMap<String, DeviceMetadata>) {
        let mut devices = self.devices.write().unwrap_or_else(|e| e.into_inner());
        *devices = map;
    }
}
