// ============================================================================
// Broadcast Hub
// ============================================================================
//
// Real-time push of anomaly events to every open connection.
//
// Connection lifecycle:
//   Connecting -> Authenticated -> Open -> Closed
//
// A connection authenticates before the WebSocket upgrade and is registered
// only once the upgrade has completed. Dispatch is reached from the
// authenticated HTTP API or from an open connection invoking SendAnomaly.
// It serializes the event once, snapshots the registry and delivers to every
// member concurrently. A member whose delivery fails or times out is
// unregistered and closed; the others are unaffected.
//
// ============================================================================

pub mod connection;
pub mod protocol;
pub mod registry;
pub mod session;

use futures_util::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::config::HubConfig;
use crate::metrics;

pub use connection::{Connection, ConnectionId};
pub use registry::ConnectionRegistry;

/// Client method invoked for every dispatched anomaly
pub const RECEIVE_ANOMALY: &str = "ReceiveAnomaly";

/// Hub method an open connection invokes to broadcast an anomaly
pub const SEND_ANOMALY: &str = "SendAnomaly";

/// Sender name used for anomalies posted through the HTTP API
pub const ANOMALY_CONTROLLER: &str = "AnomalyController";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated)
                | (Connecting, Closed)
                | (Authenticated, Open)
                | (Authenticated, Closed)
                | (Open, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Outcome of a single dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
    config: HubConfig,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self::with_registry(config, Arc::new(ConnectionRegistry::new()))
    }

    pub fn with_registry(config: HubConfig, registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Push `ReceiveAnomaly(sender, event)` to every open connection.
    ///
    /// The event travels as its JSON serialization in the second argument.
    pub async fn dispatch<T: Serialize + ?Sized>(
        &self,
        sender: &str,
        event: &T,
    ) -> Result<DispatchReport, serde_json::Error> {
        let serialized = serde_json::to_string(event)?;
        let frame: Arc<str> =
            Arc::from(protocol::invocation(RECEIVE_ANOMALY, &[sender, serialized.as_str()])?);

        let connections = self.registry.snapshot().await;
        let timeout = self.config.send_timeout;

        let results = join_all(connections.iter().map(|connection| {
            let frame = frame.clone();
            async move { (connection, connection.deliver(frame, timeout).await) }
        }))
        .await;

        let mut report = DispatchReport::default();
        for (connection, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.dropped += 1;
                    tracing::warn!(
                        connection_id = %connection.id(),
                        subject = %connection.subject(),
                        error = %e,
                        "Delivery failed, dropping connection"
                    );
                    self.registry.unregister(connection.id()).await;
                    connection.close();
                }
            }
        }

        metrics::ANOMALIES_DISPATCHED_TOTAL.inc();
        metrics::FANOUT_DROPS_TOTAL.inc_by(report.dropped as u64);
        tracing::info!(
            sender = sender,
            delivered = report.delivered,
            dropped = report.dropped,
            "Anomaly dispatched"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnomalyEvent, Data, Prediction};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn hub() -> BroadcastHub {
        BroadcastHub::new(HubConfig {
            send_timeout: Duration::from_millis(50),
            ..HubConfig::default()
        })
    }

    async fn open(hub: &BroadcastHub, subject: &str) -> (Arc<Connection>, mpsc::Receiver<Arc<str>>) {
        let (conn, rx) = Connection::channel(subject, 8);
        let conn = Arc::new(conn);
        hub.registry().register(conn.clone()).await;
        (conn, rx)
    }

    fn event() -> AnomalyEvent {
        AnomalyEvent {
            data: Some(Data {
                value: Some("x".into()),
                ..Data::default()
            }),
            prediction: Some(Prediction {
                error: None,
                is_anomaly: true,
            }),
        }
    }

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;
        assert!(Connecting.can_transition_to(Authenticated));
        assert!(Authenticated.can_transition_to(Open));
        assert!(Open.can_transition_to(Closed));
        assert!(Connecting.can_transition_to(Closed));
        assert!(!Connecting.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Open));
    }

    #[tokio::test]
    async fn test_dispatch_reaches_every_connection() {
        let hub = hub();
        let mut receivers = Vec::new();
        for i in 0..3 {
            receivers.push(open(&hub, &format!("client-{}", i)).await);
        }

        let report = hub.dispatch(ANOMALY_CONTROLLER, &event()).await.unwrap();
        assert_eq!(report, DispatchReport { delivered: 3, dropped: 0 });

        for (_, rx) in receivers.iter_mut() {
            let frame = rx.recv().await.unwrap();
            let value: serde_json::Value =
                serde_json::from_str(frame.trim_end_matches(protocol::RECORD_SEPARATOR)).unwrap();
            assert_eq!(value["target"], RECEIVE_ANOMALY);
            assert_eq!(value["arguments"][0], ANOMALY_CONTROLLER);
            let payload: AnomalyEvent =
                serde_json::from_str(value["arguments"][1].as_str().unwrap()).unwrap();
            assert_eq!(payload, event());
        }
    }

    #[tokio::test]
    async fn test_failed_connection_is_dropped_others_delivered() {
        let hub = hub();
        let (_a, mut rx_a) = open(&hub, "A").await;
        let (b, rx_b) = open(&hub, "B").await;
        let (_c, mut rx_c) = open(&hub, "C").await;
        drop(rx_b);

        let report = hub.dispatch(ANOMALY_CONTROLLER, &event()).await.unwrap();

        assert_eq!(report, DispatchReport { delivered: 2, dropped: 1 });
        assert!(!hub.registry().contains(b.id()).await);
        assert_eq!(hub.registry().len().await, 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_c.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_slow_connection_times_out_and_is_closed() {
        let hub = hub();
        let (slow, _rx_slow) = {
            let (conn, rx) = Connection::channel("slow", 1);
            let conn = Arc::new(conn);
            hub.registry().register(conn.clone()).await;
            (conn, rx)
        };
        let (_fast, mut rx_fast) = open(&hub, "fast").await;

        let first = hub.dispatch(ANOMALY_CONTROLLER, &event()).await.unwrap();
        assert_eq!(first.delivered, 2);
        rx_fast.recv().await.unwrap();

        let second = hub.dispatch(ANOMALY_CONTROLLER, &event()).await.unwrap();
        assert_eq!(second, DispatchReport { delivered: 1, dropped: 1 });
        assert!(!hub.registry().contains(slow.id()).await);

        tokio::time::timeout(Duration::from_millis(100), slow.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_with_no_connections() {
        let report = hub().dispatch(ANOMALY_CONTROLLER, &event()).await.unwrap();
        assert_eq!(report, DispatchReport::default());
    }
}
