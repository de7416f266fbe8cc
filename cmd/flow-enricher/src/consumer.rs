//! Kafka consumer for the raw flow topic.
//!
//! Records are read in batches and handed to the enricher; consumed offsets
//! are stored only after the producing side confirms delivery of the whole
//! batch, so an undelivered batch is re-read after a restart. Per-partition
//! order is preserved by the sequential batch loop, which also drains the
//! in-flight batch before a group rebalance can complete.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{error, info, warn};
use prost::Message;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::Message as _;
use tokio::sync::watch;

use crate::config::Config;
use crate::enricher::Enricher;
use crate::flow::flowpb::EnrichedFlow;
use crate::metrics;
use crate::producer::Producer;

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const BATCH_SIZE: usize = 100;

pub struct Consumer {
    consumer: StreamConsumer,
    topic: String,
}

impl Consumer {
    pub fn new(cfg: &Config) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.kafka_brokers)
            .set("group.id", &cfg.kafka_consumer_group)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.offset.store", "false")
            .set("session.timeout.ms", "30000")
            .set("max.poll.interval.ms", "300000")
            .create()
            .context("creating Kafka consumer")?;

        consumer
            .subscribe(&[&cfg.kafka_consumer_topic])
            .with_context(|| format!("subscribing to topic {}", cfg.kafka_consumer_topic))?;

        Ok(Self {
            consumer,
            topic: cfg.kafka_consumer_topic.clone(),
        })
    }

    /// Consumes until shutdown. Returns an error only on fatal broker loss,
    /// which the caller surfaces so a supervisor can restart the process.
    pub async fn run(
        &self,
        enricher: &Enricher,
        producer: &Producer,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Kafka consumer started, topic {}", self.topic);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutting down Kafka consumer");
                    return Ok(());
                }
                batch = self.poll_batch() => {
                    let (mut flows, offsets) = batch?;
                    if flows.is_empty() {
                        continue;
                    }

                    let start = Instant::now();
                    for flow in &mut flows {
                        enricher.enrich(flow);
                    }

                    match producer.produce_batch(&flows).await {
                        Ok(()) => {
                            for (partition, offset) in offsets {
                                if let Err(e) =
                                    self.consumer.store_offset(&self.topic, partition, offset)
                                {
                                    warn!("failed to store offset: {e}");
                                }
                            }
                            metrics::BATCH_DURATION.observe(start.elapsed().as_secs_f64());
                        }
                        Err(e) => {
                            // Offsets stay unstored; the batch replays on restart.
                            error!("error delivering batch of {}: {e:#}", flows.len());
                        }
                    }
                }
            }
        }
    }

    /// Reads up to BATCH_SIZE records, waiting at most POLL_TIMEOUT for each.
    /// Undecodable records are skipped but their offsets are still returned
    /// so the skip is durable across restarts.
    async fn poll_batch(&self) -> Result<(Vec<EnrichedFlow>, Vec<(i32, i64)>)> {
        let mut flows = Vec::new();
        let mut offsets = Vec::new();

        while flows.len() < BATCH_SIZE {
            let msg = match tokio::time::timeout(POLL_TIMEOUT, self.consumer.recv()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(KafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown))) => {
                    anyhow::bail!("all Kafka brokers down");
                }
                Ok(Err(e)) => {
                    error!("Kafka consumer error: {e}");
                    break;
                }
                Err(_) => break,
            };

            offsets.push((msg.partition(), msg.offset()));
            let payload = msg.payload().unwrap_or_default();
            match EnrichedFlow::decode(payload) {
                Ok(flow) => {
                    metrics::FLOWS_CONSUMED.inc();
                    flows.push(flow);
                }
                Err(e) => {
                    metrics::FLOWS_UNPARSEABLE.inc();
                    warn!("failed to decode flow record: {e}");
                }
            }
        }

        Ok((flows, offsets))
    }
}
