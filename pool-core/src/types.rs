use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

/// Type alias for connection IDs
pub type ConnectionId = Uuid;

/// Handle to a connected miner's network session.
///
/// Owned by the stratum layer. The core only reads the identity and the
/// remote endpoint and never keeps the handle itself alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConnection {
    pub id: ConnectionId,
    pub remote_endpoint: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

impl WorkerConnection {
    pub fn new(remote_endpoint: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_endpoint,
            connected_at: Utc::now(),
        }
    }

    pub fn with_id(id: ConnectionId, remote_endpoint: SocketAddr) -> Self {
        Self {
            id,
            remote_endpoint,
            connected_at: Utc::now(),
        }
    }
}

/// The stratum server the job manager was started for.
///
/// Besides this handle the stratum layer owes the core one notification:
/// it must call `JobManager::connection_closed` when a session is torn
/// down, otherwise that connection's worker context is never released.
pub trait StratumHandle: Send + Sync {
    /// Identifier used in log output
    fn server_id(&self) -> String;
}
