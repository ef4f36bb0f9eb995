use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::error::ConnectionError;

/// Unique id of a hub connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An open real-time connection as seen by the registry.
///
/// Frames pushed through `deliver` are written to the socket by the
/// connection's own session task.
pub struct Connection {
    id: ConnectionId,
    subject: String,
    opened_at: DateTime<Utc>,
    sender: mpsc::Sender<Arc<str>>,
    shutdown: Notify,
}

impl Connection {
    /// Create a connection together with the receiving end of its send channel
    pub fn channel(subject: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: ConnectionId::new(),
            subject: subject.into(),
            opened_at: Utc::now(),
            sender,
            shutdown: Notify::new(),
        };
        (connection, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Client id the connection authenticated as
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Queue a frame for the socket writer, waiting at most `timeout` for room.
    pub async fn deliver(&self, frame: Arc<str>, timeout: Duration) -> Result<(), ConnectionError> {
        self.sender
            .send_timeout(frame, timeout)
            .await
            .map_err(|_| ConnectionError::TransportClosed)
    }

    /// Ask the session task to close the transport
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        self.shutdown.notified().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_reaches_receiver() {
        let (conn, mut rx) = Connection::channel("A", 4);

        conn.deliver(Arc::from("frame"), Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("frame"));
    }

    #[tokio::test]
    async fn test_deliver_fails_when_receiver_dropped() {
        let (conn, rx) = Connection::channel("A", 4);
        drop(rx);

        let result = conn.deliver(Arc::from("frame"), Duration::from_millis(50)).await;
        assert_eq!(result, Err(ConnectionError::TransportClosed));
    }

    #[tokio::test]
    async fn test_deliver_times_out_when_channel_full() {
        let (conn, _rx) = Connection::channel("A", 1);
        conn.deliver(Arc::from("first"), Duration::from_millis(50))
            .await
            .unwrap();

        let result = conn.deliver(Arc::from("second"), Duration::from_millis(20)).await;
        assert_eq!(result, Err(ConnectionError::TransportClosed));
    }

    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let (conn, _rx) = Connection::channel("A", 1);
        conn.close();
        tokio::time::timeout(Duration::from_millis(100), conn.closed())
            .await
            .unwrap();
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
