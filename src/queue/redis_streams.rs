// ============================================================================
// Redis Streams Backend
// ============================================================================
//
// Each queue name maps to a Redis stream. Every event becomes one entry with
// a single `content` field holding the serialized JSON, trimmed approximately
// to QUEUE_STREAM_MAX_LEN entries.
//
// ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::{EventBatch, QueuePublisher};
use crate::config::QueueConfig;
use crate::error::ForwardError;
use crate::utils::redact_url;

/// Field under which the serialized event is stored in each stream entry
pub const CONTENT_FIELD: &str = "content";

pub struct RedisStreamsPublisher {
    conn: ConnectionManager,
    max_batch_bytes: usize,
    stream_max_len: usize,
}

impl RedisStreamsPublisher {
    pub async fn connect(config: &QueueConfig) -> Result<Self> {
        tracing::debug!("Opening Redis client...");

        let is_tls = config.connection_string.starts_with("rediss://");
        if is_tls {
            tracing::info!("Redis TLS enabled (rediss://)");
        } else {
            tracing::info!("Redis TLS not enabled (redis://)");
        }

        let client = redis::Client::open(config.connection_string.clone())
            .map_err(|e| anyhow::anyhow!("Failed to parse Redis URL: {}", e))?;

        tracing::debug!("Getting Redis connection manager...");
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?;

        tracing::info!(
            url = %redact_url(&config.connection_string),
            stream_max_len = config.stream_max_len,
            "Connected to Redis queue backend"
        );

        Ok(Self {
            conn,
            max_batch_bytes: config.max_batch_bytes,
            stream_max_len: config.stream_max_len,
        })
    }
}

#[async_trait]
impl QueuePublisher for RedisStreamsPublisher {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn max_batch_bytes(&self) -> usize {
        self.max_batch_bytes
    }

    async fn send_batch(&self, queue: &str, batch: EventBatch) -> Result<(), ForwardError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();

        // XADD <queue> MAXLEN ~ <n> * content <json>
        for event in batch.events() {
            pipe.cmd("XADD")
                .arg(queue)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.stream_max_len)
                .arg("*")
                .arg(CONTENT_FIELD)
                .arg(event.as_slice())
                .ignore();
        }

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| ForwardError::transient(format!("Redis XADD failed: {}", e)))?;

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
