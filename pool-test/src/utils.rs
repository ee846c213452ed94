use crate::mocks::{CallLog, MockAuthorizer, MockChain, MockDaemon};
use pool_core::{AuthorizerRegistry, JobManager, PoolConfig, WorkerConnection};
use std::net::SocketAddr;
use std::sync::Arc;

/// Test utilities for creating mock data
pub struct TestUtils;

impl TestUtils {
    /// Pool config using the given authorizer strategy
    pub fn pool_config(authorizer: &str) -> PoolConfig {
        PoolConfig {
            id: "btc-main".to_string(),
            coin: "bitcoin".to_string(),
            authorizer: authorizer.to_string(),
            job_refresh_interval_ms: 1000,
            enabled: true,
        }
    }

    pub fn worker_connection() -> WorkerConnection {
        WorkerConnection::new("198.51.100.23:51234".parse::<SocketAddr>().unwrap())
    }

    /// Manager wired to mocks that share one call log
    pub fn manager(
        chain: MockChain,
        daemon: MockDaemon,
        authorizer: Arc<MockAuthorizer>,
    ) -> (JobManager<MockChain>, Arc<MockDaemon>) {
        let daemon = Arc::new(daemon);
        let authorizers = AuthorizerRegistry::new().with("mock", authorizer);
        let manager = JobManager::new(Arc::new(chain), daemon.clone(), authorizers);
        (manager, daemon)
    }

    /// Healthy chain, working daemon, allow-all authorizer
    pub fn default_manager() -> (JobManager<MockChain>, Arc<MockDaemon>, CallLog) {
        let log = CallLog::new();
        let (manager, daemon) = Self::manager(
            MockChain::new(log.clone()),
            MockDaemon::new(log.clone()),
            Arc::new(MockAuthorizer::allowing()),
        );
        (manager, daemon, log)
    }
}
