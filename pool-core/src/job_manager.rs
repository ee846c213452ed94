use crate::auth::{AuthorizationDelegate, AuthorizerRegistry};
use crate::broadcaster::{JobStream, JobSubscription};
use crate::config::PoolConfig;
use crate::daemon::DaemonClient;
use crate::error::{Error, ErrorReporter, Result, TracingErrorReporter};
use crate::health::{DaemonHealthMonitor, RetryStrategy};
use crate::hooks::ChainHooks;
use crate::types::{ConnectionId, StratumHandle, WorkerConnection};
use crate::worker_context::WorkerContextRegistry;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Orchestrates one pool: daemon startup, job polling, worker contexts and
/// worker authorization.
///
/// All blockchain behavior comes from `H`. The manager only sequences the
/// hooks: daemon healthy, then synced, then post-start init, and only then
/// is the job stream armed.
pub struct JobManager<H: ChainHooks> {
    hooks: Arc<H>,
    daemon: Arc<dyn DaemonClient>,
    delegate: AuthorizationDelegate,
    health: DaemonHealthMonitor,
    reporter: Arc<dyn ErrorReporter>,
    jobs: JobStream<H::JobParams>,
    contexts: WorkerContextRegistry<H::WorkerContext>,
    started: AtomicBool,
    pool: RwLock<Option<PoolConfig>>,
    stratum: RwLock<Option<Arc<dyn StratumHandle>>>,
}

impl<H: ChainHooks> JobManager<H> {
    pub fn new(
        hooks: Arc<H>,
        daemon: Arc<dyn DaemonClient>,
        authorizers: AuthorizerRegistry,
    ) -> Self {
        let factory_hooks = hooks.clone();
        Self {
            hooks,
            daemon,
            delegate: AuthorizationDelegate::new(authorizers),
            health: DaemonHealthMonitor::default(),
            reporter: Arc::new(TracingErrorReporter),
            jobs: JobStream::new(),
            contexts: WorkerContextRegistry::new(move || factory_hooks.new_worker_context()),
            started: AtomicBool::new(false),
            pool: RwLock::new(None),
            stratum: RwLock::new(None),
        }
    }

    /// Sink for poll failures; defaults to `TracingErrorReporter`
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_health_retry(mut self, retry: RetryStrategy) -> Self {
        self.health = DaemonHealthMonitor::new(retry);
        self
    }

    /// Bring the pool online.
    ///
    /// Steps run strictly in order and a failure aborts the rest:
    /// authorizer resolution, daemon start and health wait, sync hook,
    /// post-start hook, job stream arming. A manager can only be started
    /// once, whether or not the first attempt succeeded.
    pub async fn start(&self, pool: PoolConfig, stratum: Arc<dyn StratumHandle>) -> Result<()> {
        let server_id = stratum.server_id();
        validate_start_args(&pool, &server_id)?;

        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidArgument(format!(
                "Job manager for pool {} was already started",
                pool.id
            )));
        }

        let begun = Instant::now();
        info!(pool = %pool.id, coin = %pool.coin, server = %server_id, "Starting job manager");

        *self.pool.write() = Some(pool.clone());
        *self.stratum.write() = Some(stratum);

        self.delegate.configure(&pool)?;

        let checks = self
            .health
            .start_and_wait(self.daemon.as_ref(), &pool, || self.hooks.is_daemon_healthy())
            .await?;

        debug!(pool = %pool.id, "Waiting for daemon sync");
        self.hooks.ensure_daemons_synced().await?;

        debug!(pool = %pool.id, "Running post-start initialization");
        self.hooks.post_start_init().await?;

        self.jobs
            .arm(self.hooks.clone(), pool.job_refresh_interval(), self.reporter.clone())?;

        info!(
            pool = %pool.id,
            coin = %pool.coin,
            health_checks = checks,
            elapsed_ms = begun.elapsed().as_millis() as u64,
            "Job manager started"
        );
        Ok(())
    }

    /// Check a worker's credentials with the pool's authorizer.
    ///
    /// The verdict and any error from the authorizer are returned as is.
    pub async fn authenticate_worker(
        &self,
        connection: Option<&WorkerConnection>,
        worker_name: &str,
        password: &str,
    ) -> Result<bool> {
        let connection = connection.ok_or_else(|| {
            Error::InvalidArgument("Cannot authenticate worker without a connection".to_string())
        })?;
        if worker_name.is_empty() {
            return Err(Error::InvalidArgument("Worker name cannot be empty".to_string()));
        }

        let authorized = self
            .delegate
            .authenticate(connection.remote_endpoint, worker_name, password)
            .await?;

        if !authorized {
            warn!(
                connection = %connection.id,
                worker = %worker_name,
                remote = %connection.remote_endpoint,
                "Worker authorization rejected"
            );
        }
        Ok(authorized)
    }

    pub fn job_stream(&self) -> JobStream<H::JobParams> {
        self.jobs.clone()
    }

    pub fn subscribe_jobs(&self) -> JobSubscription<H::JobParams> {
        self.jobs.subscribe()
    }

    /// The connection's worker context, created on first access
    pub fn worker_context(&self, connection: &WorkerConnection) -> Arc<H::WorkerContext> {
        self.contexts.get_or_create(connection)
    }

    /// Teardown notification from the stratum layer
    pub fn connection_closed(&self, connection_id: &ConnectionId) {
        self.contexts.remove(connection_id);
    }

    pub fn active_worker_contexts(&self) -> usize {
        self.contexts.len()
    }

    pub fn pool_config(&self) -> Option<PoolConfig> {
        self.pool.read().clone()
    }

    pub fn stratum(&self) -> Option<Arc<dyn StratumHandle>> {
        self.stratum.read().clone()
    }

    pub fn hooks(&self) -> &Arc<H> {
        &self.hooks
    }

    /// Stop job polling and wait for the poll task to finish
    pub async fn shutdown(&self) {
        let pool_id = self.pool.read().as_ref().map(|p| p.id.clone()).unwrap_or_default();
        info!(pool = %pool_id, "Shutting down job manager");
        self.jobs.shutdown().await;
    }
}

fn validate_start_args(pool: &PoolConfig, server_id: &str) -> Result<()> {
    pool.validate().map_err(|e| match e {
        Error::Config(message) => Error::InvalidArgument(message),
        other => other,
    })?;

    if server_id.trim().is_empty() {
        return Err(Error::InvalidArgument(format!(
            "Pool {}: stratum server id cannot be empty",
            pool.id
        )));
    }
    Ok(())
}
