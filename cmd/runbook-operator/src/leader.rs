//! Leader election over a key-value lease.
//!
//! A dedicated lease bucket with a short max-age holds one entry; whichever
//! replica creates it is the leader and keeps renewing it. If the leader
//! dies, the entry ages out and another replica's create succeeds.

use std::time::Duration;

use anyhow::{Context, Result};
use async_nats::jetstream::{self, kv};
use log::{info, warn};
use tokio::sync::watch;

const LEASE_BUCKET: &str = "helios-leases";
const LEASE_KEY: &str = "runbook-operator";
const LEASE_TTL: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Blocks until this replica holds the lease, then keeps renewing it in a
/// background task until shutdown.
pub async fn acquire(
    nats_url: &str,
    identity: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let client = async_nats::connect(nats_url)
        .await
        .with_context(|| format!("connecting to NATS at {nats_url}"))?;
    let js = jetstream::new(client);

    let kv = match js.get_key_value(LEASE_BUCKET).await {
        Ok(store) => store,
        Err(_) => js
            .create_key_value(kv::Config {
                bucket: LEASE_BUCKET.to_string(),
                max_age: LEASE_TTL,
                history: 1,
                ..Default::default()
            })
            .await
            .context("creating lease bucket")?,
    };

    let revision = loop {
        match kv.create(LEASE_KEY, identity.as_bytes().to_vec().into()).await {
            Ok(revision) => break revision,
            Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => {
                tokio::select! {
                    _ = shutdown.changed() => anyhow::bail!("shutdown before acquiring lease"),
                    _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                }
            }
            Err(e) => return Err(anyhow::anyhow!("acquiring lease: {e}")),
        }
    };

    info!("acquired leader lease as {identity}");

    let identity = identity.to_string();
    tokio::spawn(async move {
        let mut revision = revision;
        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = kv.delete(LEASE_KEY).await;
                    return;
                }
                _ = tokio::time::sleep(RENEW_INTERVAL) => {
                    match kv.update(LEASE_KEY, identity.clone().into_bytes().into(), revision).await {
                        Ok(next) => revision = next,
                        Err(e) => {
                            warn!("lost leader lease: {e}");
                            return;
                        }
                    }
                }
            }
        }
    });

    Ok(())
}
