use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};

use crate::config::KafkaConfig;
use crate::error::{Result, StratumError};
use crate::share::{FoundBlock, Share};

/// Consumes mining templates from the job topic.
pub struct JobConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl JobConsumer {
    pub fn new(brokers: &str, topic: &str, group: &str) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group)
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "latest")
            .set("fetch.wait.max.ms", "10")
            .create()
            .map_err(|e| StratumError::Kafka {
                message: e.to_string(),
                topic: Some(topic.to_string()),
            })?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| StratumError::Kafka {
                message: e.to_string(),
                topic: Some(topic.to_string()),
            })?;

        tracing::info!("subscribed to job topic {}", topic);

        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }

    /// Wait for the next message payload.
    pub async fn recv(&self) -> Result<Vec<u8>> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| StratumError::Kafka {
                message: e.to_string(),
                topic: Some(self.topic.clone()),
            })?;

        Ok(message.payload().unwrap_or_default().to_vec())
    }
}

/// Fire-and-forget producer for one output topic.
///
/// Each topic gets its own producer so the local batches of share and
/// solved-share traffic never entangle. Delivery failures are logged, not
/// surfaced to miners; downstream consumers are the source of truth for
/// credited shares.
pub struct ShareProducer {
    producer: FutureProducer,
    topic: String,
}

impl ShareProducer {
    pub fn new(brokers: &str, topic: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("queue.buffering.max.ms", "1")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| StratumError::Kafka {
                message: e.to_string(),
                topic: Some(topic.to_string()),
            })?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }

    /// Enqueue one record for delivery.
    pub fn send(&self, payload: &[u8]) {
        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(&self.topic).payload(payload);
        if let Err((e, _)) = self.producer.send_result(record) {
            metrics::counter!("kafka_produce_failed_total", "topic" => self.topic.clone())
                .increment(1);
            tracing::error!("failed to enqueue record for {}: {}", self.topic, e);
        }
    }

    /// Best-effort drain of the local batch on shutdown.
    pub fn flush(&self, deadline: Duration) {
        if let Err(e) = self.producer.flush(deadline) {
            tracing::warn!("flush of {} incomplete: {}", self.topic, e);
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Output port for classified shares. The production sink writes Kafka
/// records; tests capture emissions in memory.
pub trait ShareSink: Send + Sync {
    fn share_log(&self, share: &Share);
    fn solved_share(&self, block: &FoundBlock, share: &Share);
    fn flush(&self, deadline: Duration);
}

/// Kafka-backed sink with one producer per topic.
pub struct KafkaShareSink {
    shares: ShareProducer,
    solved: ShareProducer,
}

impl KafkaShareSink {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        Ok(Self {
            shares: ShareProducer::new(&config.brokers, &config.share_topic)?,
            solved: ShareProducer::new(&config.brokers, &config.solved_share_topic)?,
        })
    }
}

impl ShareSink for KafkaShareSink {
    fn share_log(&self, share: &Share) {
        self.shares.send(&share.to_bytes());
    }

    fn solved_share(&self, block: &FoundBlock, share: &Share) {
        self.solved.send(&block.to_bytes(share));
    }

    fn flush(&self, deadline: Duration) {
        self.shares.flush(deadline);
        self.solved.flush(deadline);
    }
}
