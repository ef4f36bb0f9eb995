use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{EventBatch, QueuePublisher};
use crate::error::ForwardError;
use crate::models::OutboundSubmission;

/// In-process queue that records every accepted submission.
///
/// Used by the `memory` backend and by tests. `set_failing(true)` makes every
/// publish and ping fail as if the transport were down.
pub struct InMemoryPublisher {
    max_batch_bytes: usize,
    failing: AtomicBool,
    sent: Mutex<Vec<OutboundSubmission>>,
}

impl InMemoryPublisher {
    pub fn new(max_batch_bytes: usize) -> Self {
        Self {
            max_batch_bytes,
            failing: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything accepted so far, in publish order
    pub async fn submissions(&self) -> Vec<OutboundSubmission> {
        self.sent.lock().await.clone()
    }

    pub async fn submissions_for(&self, queue: &str) -> Vec<OutboundSubmission> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|s| s.queue_name == queue)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QueuePublisher for InMemoryPublisher {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }

    async fn send_batch(&self, queue: &str, batch: EventBatch) -> Result<(), ForwardError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ForwardError::transient("in-memory queue is unavailable"));
        }

        let mut sent = self.sent.lock().await;
        for event in batch.events() {
            let content = String::from_utf8(event.clone())
                .map_err(|e| ForwardError::transient(e.to_string()))?;
            sent.push(OutboundSubmission {
                queue_name: queue.to_string(),
                serialized_content: content,
            });
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("in-memory queue is unavailable");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_batches_per_queue() {
        let publisher = InMemoryPublisher::new(1024);
        let mut batch = EventBatch::new(1024);
        assert!(batch.try_add(b"{\"a\":1}".to_vec()));
        assert!(batch.try_add(b"{\"b\":2}".to_vec()));

        publisher.send_batch("data", batch).await.unwrap();

        assert_eq!(publisher.submissions_for("data").await.len(), 2);
        assert!(publisher.submissions_for("feedback").await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_toggle_affects_ping() {
        let publisher = InMemoryPublisher::new(1024);
        assert!(publisher.ping().await.is_ok());

        publisher.set_failing(true);
        assert!(publisher.ping().await.is_err());
    }
}
