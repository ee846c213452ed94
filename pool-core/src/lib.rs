pub mod auth;
pub mod broadcaster;
pub mod config;
pub mod daemon;
pub mod error;
pub mod health;
pub mod hooks;
pub mod job_manager;
pub mod logging;
pub mod types;
pub mod worker_context;

pub use auth::{AuthorizationDelegate, AuthorizerRegistry, WorkerAuthorizer};
pub use broadcaster::{JobStream, JobSubscription};
pub use config::{LogFormat, LogOutput, LoggingConfig, PoolConfig, ServerConfig};
pub use daemon::DaemonClient;
pub use error::{Error, ErrorReporter, Result, TracingErrorReporter};
pub use health::{DaemonHealthMonitor, RetryStrategy, DAEMON_HEALTH_RETRY_INTERVAL};
pub use hooks::{ChainHooks, JobSource};
pub use job_manager::JobManager;
pub use types::{ConnectionId, StratumHandle, WorkerConnection};
pub use worker_context::WorkerContextRegistry;
