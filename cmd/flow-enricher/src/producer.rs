//! Kafka producer for the enriched flow topic.

use std::time::Duration;

use anyhow::{Context, Result};
use log::warn;
use prost::Message;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};

use crate::config::Config;
use crate::flow::flowpb::EnrichedFlow;
use crate::metrics;

pub struct Producer {
    producer: FutureProducer,
    topic: String,
}

impl Producer {
    pub fn new(cfg: &Config) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.kafka_brokers)
            .set("linger.ms", "10")
            .set("batch.num.messages", "1000")
            .set("compression.type", "lz4")
            .set("acks", "all")
            .set("retries", "3")
            .set("retry.backoff.ms", "100")
            .set("delivery.timeout.ms", "30000")
            .create()
            .context("creating Kafka producer")?;

        Ok(Self {
            producer,
            topic: cfg.kafka_producer_topic.clone(),
        })
    }

    /// Sends a batch of enriched flows and waits for every delivery
    /// confirmation. Any undelivered message fails the batch so the caller
    /// does not store the consumed offsets.
    pub async fn produce_batch(&self, flows: &[EnrichedFlow]) -> Result<()> {
        let mut deliveries = Vec::with_capacity(flows.len());
        let mut errs = 0usize;

        for flow in flows {
            let payload = flow.encode_to_vec();
            let record = FutureRecord::<(), _>::to(&self.topic).payload(&payload);
            match self.producer.send_result(record) {
                Ok(delivery) => deliveries.push(delivery),
                Err((e, _)) => {
                    warn!("failed to enqueue message: {e}");
                    errs += 1;
                }
            }
        }

        for delivery in deliveries {
            match delivery.await {
                Ok(Ok(_)) => metrics::FLOWS_PRODUCED.inc(),
                Ok(Err((e, _))) => {
                    warn!("delivery failed: {e}");
                    errs += 1;
                }
                Err(_) => {
                    warn!("delivery confirmation dropped");
                    errs += 1;
                }
            }
        }

        if errs > 0 {
            metrics::PRODUCE_ERRORS.inc();
            anyhow::bail!("failed to deliver {errs}/{} messages", flows.len());
        }
        Ok(())
    }

    /// Waits for outstanding deliveries during shutdown.
    pub fn flush(&self, timeout: Duration) {
        if let Err(e) = self.producer.flush(timeout) {
            warn!("producer flush incomplete: {e}");
        }
    }
}
