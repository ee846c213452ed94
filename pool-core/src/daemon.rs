use crate::config::PoolConfig;
use crate::Result;
use async_trait::async_trait;

/// Connection to the coin daemon(s) backing a pool.
///
/// The concrete RPC client lives with the chain module; the core only
/// brings it up once during startup.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Establish the daemon connection for the given pool
    async fn start(&self, config: &PoolConfig) -> Result<()>;
}
