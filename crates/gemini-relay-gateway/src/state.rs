//! Gateway shared state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use gemini_relay_core::config::Config;
use gemini_relay_core::types::ConnectionId;
use gemini_relay_engine::{ProcessRegistry, Supervisor};

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub supervisor: Supervisor,
    pub connections: RwLock<HashMap<ConnectionId, ConnectionState>>,
    pub started_at: DateTime<Utc>,
}

/// Per-connection state.
pub struct ConnectionState {
    pub conn_id: ConnectionId,
    pub connected_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(config: Config) -> Self {
        let supervisor = Supervisor::new(config.engine(), ProcessRegistry::new());
        Self {
            supervisor,
            connections: RwLock::new(HashMap::new()),
            started_at: Utc::now(),
        }
    }

    pub async fn register_connection(&self, conn_id: ConnectionId) {
        self.connections.write().await.insert(
            conn_id,
            ConnectionState {
                conn_id,
                connected_at: Utc::now(),
            },
        );
    }

    pub async fn unregister_connection(&self, conn_id: ConnectionId) -> Option<ConnectionState> {
        self.connections.write().await.remove(&conn_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_unregister() {
        let state = GatewayState::new(Config::default());
        let conn_id = ConnectionId::new();

        state.register_connection(conn_id).await;
        assert_eq!(state.connection_count().await, 1);

        let removed = state.unregister_connection(conn_id).await.unwrap();
        assert_eq!(removed.conn_id, conn_id);
        assert!(removed.connected_at >= state.started_at);
        assert_eq!(state.connection_count().await, 0);
        assert!(state.unregister_connection(conn_id).await.is_none());
    }
}
