mod cache;
mod config;
mod consumer;
mod enricher;
mod flow;
mod geoip;
mod metrics;
mod producer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::sync::watch;

use cache::DeviceCache;
use config::Config;
use consumer::Consumer;
use enricher::Enricher;
use geoip::GeoIpReader;
use producer::Producer;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    info!("starting flow-enricher");
    let cfg = Config::from_env()?;

    let netbox_client = match (&cfg.netbox_api_url, &cfg.netbox_api_token) {
        (Some(url), Some(token)) if !url.is_empty() => Some(
            helios_netbox::Client::new(url, token).context("creating NetBox client")?,
        ),
        _ => None,
    };
    let device_cache = Arc::new(DeviceCache::new(
        netbox_client,
        cache::DEFAULT_REFRESH_INTERVAL,
    ));

    let geoip = match GeoIpReader::open(&cfg.geoip_city_db, &cfg.geoip_asn_db) {
        Ok(reader) => Some(reader),
        Err(e) => {
            warn!("GeoIP databases not available, continuing without GeoIP enrichment: {e}");
            None
        }
    };

    let enricher = Enricher::new(Arc::clone(&device_cache), geoip);
    let producer = Producer::new(&cfg)?;
    let consumer = Consumer::new(&cfg)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutting down");
        let _ = shutdown_tx.send(true);
    });

    let metrics_addr = cfg.metrics_addr.clone();
    tokio::spawn(async move {
        info!("metrics server starting on {metrics_addr}");
        if let Err(e) = metrics::serve(&metrics_addr).await {
            error!("metrics server error: {e}");
        }
    });

    let refresher_cache = Arc::clone(&device_cache);
    let refresher_shutdown = shutdown_rx.clone();
    let refresher = tokio::spawn(async move {
        refresher_cache.run(refresher_shutdown).await;
    });

    let result = consumer.run(&enricher, &producer, shutdown_rx).await;

    producer.flush(Duration::from_secs(5));
    let _ = refresher.await;

    result?;
    info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!("failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
