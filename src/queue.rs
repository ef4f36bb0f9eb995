// ============================================================================
// Submission Forwarder
// ============================================================================
//
// Relays validated submissions to the external durable queue.
//
// Each submission is serialized to JSON, placed into a bounded batch opened
// against the named queue and handed to the configured backend:
// - redis_streams: XADD into a Redis stream named after the queue (default)
// - kafka:         produce to a Kafka topic named after the queue (feature)
// - memory:        in-process recorder for development and tests
//
// The forwarder never retries. A transport failure is reported to the caller
// as TransientPublishError; an event larger than the batch capacity is fatal
// for that submission.
//
// ============================================================================

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod redis_streams;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{QueueBackend, QueueConfig};
use crate::error::ForwardError;
use crate::metrics;
use crate::models::{Data, Feedback, OutboundSubmission};

/// A batch of serialized events bounded by a byte capacity
#[derive(Debug, Clone)]
pub struct EventBatch {
    capacity: usize,
    size: usize,
    events: Vec<Vec<u8>>,
}

impl EventBatch {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            size: 0,
            events: Vec::new(),
        }
    }

    /// Adds the event if it fits the remaining capacity
    pub fn try_add(&mut self, event: Vec<u8>) -> bool {
        if self.size + event.len() > self.capacity {
            return false;
        }
        self.size += event.len();
        self.events.push(event);
        true
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size_bytes(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Vec<u8>] {
        &self.events
    }
}

/// Publish contract of the external queue
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Byte capacity of one batch
    fn max_batch_bytes(&self) -> usize;

    async fn send_batch(&self, queue: &str, batch: EventBatch) -> Result<(), ForwardError>;

    async fn ping(&self) -> anyhow::Result<()>;
}

/// Connect the backend selected in the configuration
pub async fn connect_publisher(config: &QueueConfig) -> anyhow::Result<Arc<dyn QueuePublisher>> {
    match config.backend {
        QueueBackend::Redis => Ok(Arc::new(
            redis_streams::RedisStreamsPublisher::connect(config).await?,
        )),
        #[cfg(feature = "kafka")]
        QueueBackend::Kafka => Ok(Arc::new(kafka::KafkaPublisher::new(config)?)),
        #[cfg(not(feature = "kafka"))]
        QueueBackend::Kafka => anyhow::bail!(
            "QUEUE_BACKEND=kafka requires the gateway to be built with the 'kafka' feature"
        ),
        QueueBackend::Memory => {
            tracing::warn!("Using in-memory queue backend; submissions are not durable");
            Ok(Arc::new(memory::InMemoryPublisher::new(config.max_batch_bytes)))
        }
    }
}

pub struct SubmissionForwarder {
    publisher: Arc<dyn QueuePublisher>,
    data_queue: String,
    feedback_queue: String,
}

impl SubmissionForwarder {
    pub fn new(publisher: Arc<dyn QueuePublisher>, config: &QueueConfig) -> Self {
        Self {
            publisher,
            data_queue: config.data_queue.clone(),
            feedback_queue: config.feedback_queue.clone(),
        }
    }

    /// Serialize `payload` and publish it to `queue_name`.
    pub async fn forward<T: Serialize + ?Sized>(
        &self,
        queue_name: &str,
        payload: &T,
    ) -> Result<(), ForwardError> {
        let submission = OutboundSubmission {
            queue_name: queue_name.to_string(),
            serialized_content: serde_json::to_string(payload)?,
        };
        self.forward_submission(submission).await
    }

    pub async fn forward_submission(
        &self,
        submission: OutboundSubmission,
    ) -> Result<(), ForwardError> {
        let queue = submission.queue_name;
        let size = submission.serialized_content.len();

        let mut batch = EventBatch::new(self.publisher.max_batch_bytes());
        if !batch.try_add(submission.serialized_content.into_bytes()) {
            metrics::SUBMISSIONS_FAILED_TOTAL
                .with_label_values(&[queue.as_str()])
                .inc();
            tracing::warn!(
                queue = %queue,
                size = size,
                capacity = batch.capacity(),
                "Event is too large for the batch and cannot be sent"
            );
            return Err(ForwardError::PayloadTooLarge {
                size,
                capacity: batch.capacity(),
            });
        }

        match self.publisher.send_batch(&queue, batch).await {
            Ok(()) => {
                metrics::SUBMISSIONS_FORWARDED_TOTAL
                    .with_label_values(&[queue.as_str()])
                    .inc();
                tracing::debug!(
                    queue = %queue,
                    size = size,
                    backend = self.publisher.name(),
                    "Submission forwarded"
                );
                Ok(())
            }
            Err(e) => {
                metrics::SUBMISSIONS_FAILED_TOTAL
                    .with_label_values(&[queue.as_str()])
                    .inc();
                tracing::error!(
                    error = %e,
                    queue = %queue,
                    backend = self.publisher.name(),
                    "Failed to forward submission"
                );
                Err(e)
            }
        }
    }

    /// Forward a data point; points without a value are refused.
    ///
    /// The data id is replaced with a fresh one before publishing.
    pub async fn forward_data(&self, mut data: Data) -> Result<Uuid, ForwardError> {
        if !data.has_value() {
            return Err(ForwardError::EmptyPayload);
        }
        data.id = Uuid::new_v4();
        self.forward(&self.data_queue, &data).await?;
        Ok(data.id)
    }

    /// Forward feedback unconditionally, even when it carries no data
    pub async fn forward_feedback(&self, feedback: &Feedback) -> Result<(), ForwardError> {
        self.forward(&self.feedback_queue, feedback).await
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        self.publisher.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_BATCH_BYTES;
    use memory::InMemoryPublisher;

    fn queue_config() -> QueueConfig {
        QueueConfig {
            backend: QueueBackend::Memory,
            connection_string: String::new(),
            data_queue: "DataQueue".to_string(),
            feedback_queue: "FeedbackQueue".to_string(),
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            stream_max_len: 1000,
        }
    }

    fn forwarder(capacity: usize) -> (Arc<InMemoryPublisher>, SubmissionForwarder) {
        let publisher = Arc::new(InMemoryPublisher::new(capacity));
        let forwarder = SubmissionForwarder::new(publisher.clone(), &queue_config());
        (publisher, forwarder)
    }

    #[test]
    fn test_batch_capacity() {
        let mut batch = EventBatch::new(10);
        assert!(batch.try_add(vec![0u8; 6]));
        assert!(!batch.try_add(vec![0u8; 5]));
        assert!(batch.try_add(vec![0u8; 4]));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.size_bytes(), 10);
    }

    #[tokio::test]
    async fn test_forward_data_publishes_with_fresh_id() {
        let (publisher, forwarder) = forwarder(DEFAULT_MAX_BATCH_BYTES);
        let data = Data {
            id: Uuid::nil(),
            timestamp: None,
            value: Some("12.5".into()),
        };

        let id = forwarder.forward_data(data).await.unwrap();

        let sent = publisher.submissions().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].queue_name, "DataQueue");
        let published: Data = serde_json::from_str(&sent[0].serialized_content).unwrap();
        assert_eq!(published.id, id);
        assert_ne!(published.id, Uuid::nil());
        assert_eq!(published.value.as_deref(), Some("12.5"));
    }

    #[tokio::test]
    async fn test_forward_data_rejects_empty_value() {
        let (publisher, forwarder) = forwarder(DEFAULT_MAX_BATCH_BYTES);

        let missing = forwarder.forward_data(Data::default()).await;
        assert!(matches!(missing, Err(ForwardError::EmptyPayload)));

        let empty = forwarder
            .forward_data(Data {
                value: Some(String::new()),
                ..Data::default()
            })
            .await;
        assert!(matches!(empty, Err(ForwardError::EmptyPayload)));

        assert!(publisher.submissions().await.is_empty());
    }

    #[tokio::test]
    async fn test_forward_feedback_is_unconditional() {
        let (publisher, forwarder) = forwarder(DEFAULT_MAX_BATCH_BYTES);

        forwarder.forward_feedback(&Feedback::default()).await.unwrap();

        let sent = publisher.submissions().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].queue_name, "FeedbackQueue");
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let (publisher, forwarder) = forwarder(16);
        let data = Data {
            value: Some("x".repeat(64)),
            ..Data::default()
        };

        let result = forwarder.forward_data(data).await;
        assert!(matches!(result, Err(ForwardError::PayloadTooLarge { capacity: 16, .. })));
        assert!(publisher.submissions().await.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_transient() {
        let (publisher, forwarder) = forwarder(DEFAULT_MAX_BATCH_BYTES);
        publisher.set_failing(true);

        let result = forwarder.forward_feedback(&Feedback::default()).await;
        assert!(matches!(result, Err(ForwardError::TransientPublishError(_))));

        publisher.set_failing(false);
        forwarder.forward_feedback(&Feedback::default()).await.unwrap();
        assert_eq!(publisher.submissions().await.len(), 1);
    }
}
