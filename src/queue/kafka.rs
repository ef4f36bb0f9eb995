use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::{EventBatch, QueuePublisher};
use crate::config::QueueConfig;
use crate::error::ForwardError;

const SEND_TIMEOUT: Duration = Duration::from_secs(2);
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka producer publishing each queue as a topic of the same name.
///
/// Configured for:
/// - At-least-once delivery (`acks=all`)
/// - Idempotent writes within a producer session
/// - `message.max.bytes` matching the batch capacity
pub struct KafkaPublisher {
    producer: Arc<FutureProducer>,
    max_batch_bytes: usize,
}

impl KafkaPublisher {
    pub fn new(config: &QueueConfig) -> Result<Self> {
        info!("Initializing Kafka producer...");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.connection_string)
            .set("message.max.bytes", config.max_batch_bytes.to_string())
            // Reliability settings
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "5")
            // Timeout settings
            .set("request.timeout.ms", "30000")
            .set("delivery.timeout.ms", "120000")
            .create()
            .context("Failed to create Kafka producer")?;

        info!(
            brokers = %config.connection_string,
            "Kafka producer initialized successfully"
        );

        Ok(Self {
            producer: Arc::new(producer),
            max_batch_bytes: config.max_batch_bytes,
        })
    }
}

#[async_trait]
impl QueuePublisher for KafkaPublisher {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }

    async fn send_batch(&self, queue: &str, batch: EventBatch) -> Result<(), ForwardError> {
        for event in batch.events() {
            let record = FutureRecord::<(), [u8]>::to(queue).payload(event.as_slice());

            let start = std::time::Instant::now();
            match self
                .producer
                .send(record, Timeout::After(SEND_TIMEOUT))
                .await
            {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = queue,
                        partition = partition,
                        offset = offset,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "Event written to Kafka"
                    );
                }
                Err((e, _)) => {
                    error!(error = %e, topic = queue, "Failed to write event to Kafka");
                    return Err(ForwardError::transient(format!("Kafka send failed: {}", e)));
                }
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, Timeout::After(METADATA_TIMEOUT))
                .map(|_| ())
                .context("Kafka metadata request failed")
        })
        .await
        .context("Kafka health check task failed")?
    }
}
