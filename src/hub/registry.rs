use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::connection::{Connection, ConnectionId};
use crate::metrics;

/// Set of currently open hub connections.
///
/// Safe for concurrent register, unregister and iteration. Iteration works on
/// a point-in-time snapshot so no lock is held while callers send.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection: Arc<Connection>) {
        let id = connection.id();
        let previous = self.connections.write().await.insert(id, connection);
        if previous.is_none() {
            metrics::HUB_CONNECTIONS_ACTIVE.inc();
        }
        tracing::debug!(connection_id = %id, "Connection registered");
    }

    /// Remove a connection; unknown ids are ignored
    pub async fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.write().await.remove(&id);
        if removed.is_some() {
            metrics::HUB_CONNECTIONS_ACTIVE.dec();
            tracing::debug!(connection_id = %id, "Connection unregistered");
        }
        removed
    }

    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Visit every connection present at the time of the call
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        let snapshot = self.snapshot().await;
        for connection in &snapshot {
            f(connection);
        }
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(subject: &str) -> Arc<Connection> {
        let (conn, _rx) = Connection::channel(subject, 1);
        Arc::new(conn)
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let conn = connection("A");
        let id = conn.id();

        registry.register(conn).await;
        assert!(registry.contains(id).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.unregister(id).await.is_some());
        assert!(!registry.contains(id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.register(connection("A")).await;

        assert!(registry.unregister(ConnectionId::new()).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_for_each_visits_every_connection() {
        let registry = ConnectionRegistry::new();
        for i in 0..10 {
            registry.register(connection(&format!("client-{}", i))).await;
        }

        let mut visited = 0;
        registry.for_each(|_| visited += 1).await;
        assert_eq!(visited, 10);
    }

    #[tokio::test]
    async fn test_snapshot_unaffected_by_later_mutation() {
        let registry = ConnectionRegistry::new();
        let a = connection("A");
        let a_id = a.id();
        registry.register(a).await;
        registry.register(connection("B")).await;

        let snapshot = registry.snapshot().await;
        registry.unregister(a_id).await;
        registry.register(connection("C")).await;

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|c| c.id() == a_id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutation_during_iteration() {
        let registry = Arc::new(ConnectionRegistry::new());
        let stable: Vec<_> = (0..50).map(|i| connection(&format!("stable-{}", i))).collect();
        for conn in &stable {
            registry.register(conn.clone()).await;
        }

        let churn = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let conn = connection(&format!("churn-{}", i));
                    let id = conn.id();
                    registry.register(conn).await;
                    tokio::task::yield_now().await;
                    registry.unregister(id).await;
                }
            })
        };

        for _ in 0..50 {
            let mut stable_seen = 0;
            registry
                .for_each(|c| {
                    if c.subject().starts_with("stable-") {
                        stable_seen += 1;
                    }
                })
                .await;
            assert_eq!(stable_seen, 50);
            tokio::task::yield_now().await;
        }

        churn.await.unwrap();
        assert_eq!(registry.len().await, 50);
    }
}
