//! Chain-specific extension points invoked by the job manager

use crate::Result;
use async_trait::async_trait;

/// Source of mining work polled by the job broadcaster
#[async_trait]
pub trait JobSource: Send + Sync + 'static {
    /// Packaged work ready for stratum transmission
    type JobParams: Clone + Send + Sync + 'static;

    /// Poll the network; returns true when new work was found
    async fn update_job(&self) -> Result<bool>;

    /// Package the current work for the stratum layer
    fn job_params(&self) -> Result<Self::JobParams>;
}

/// Capability interface a concrete blockchain module implements.
///
/// The job manager calls these in a fixed order: `is_daemon_healthy`
/// until it returns true, then `ensure_daemons_synced`, then
/// `post_start_init`, after which the `JobSource` half is polled by the
/// broadcaster for as long as anyone is subscribed.
#[async_trait]
pub trait ChainHooks: JobSource {
    /// Per-connection mining state handed out by the worker context registry
    type WorkerContext: Send + Sync + 'static;

    /// Health predicate for the backing daemon(s)
    async fn is_daemon_healthy(&self) -> bool;

    /// Block until the daemon(s) are synchronized with the network
    async fn ensure_daemons_synced(&self) -> Result<()>;

    /// One-time initialization after the daemon is up and synced
    async fn post_start_init(&self) -> Result<()>;

    /// Build a fresh context for a newly seen connection
    fn new_worker_context(&self) -> Self::WorkerContext;
}
