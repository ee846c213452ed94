use crate::config::PoolConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Pluggable worker authentication strategy.
///
/// The verdict is returned to the stratum layer unmodified. Failures
/// should be raised as `Error::Authorization`; they propagate to the
/// caller of `JobManager::authenticate_worker` untouched.
#[async_trait]
pub trait WorkerAuthorizer: Send + Sync {
    async fn authorize(
        &self,
        pool: &PoolConfig,
        remote_endpoint: SocketAddr,
        worker_name: &str,
        password: &str,
    ) -> Result<bool>;
}

/// Named authorizer strategies available to pools
#[derive(Clone, Default)]
pub struct AuthorizerRegistry {
    authorizers: HashMap<String, Arc<dyn WorkerAuthorizer>>,
}

impl AuthorizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy under `name`, replacing any previous one
    pub fn register(&mut self, name: &str, authorizer: Arc<dyn WorkerAuthorizer>) -> &mut Self {
        self.authorizers.insert(name.to_lowercase(), authorizer);
        self
    }

    /// Builder form of `register`
    pub fn with(mut self, name: &str, authorizer: Arc<dyn WorkerAuthorizer>) -> Self {
        self.register(name, authorizer);
        self
    }

    /// Look up a strategy; names are matched case-insensitively
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn WorkerAuthorizer>> {
        self.authorizers.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.authorizers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for AuthorizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

struct Resolved {
    name: String,
    pool: PoolConfig,
    authorizer: Arc<dyn WorkerAuthorizer>,
}

/// Forwards worker credentials to the strategy configured for the pool
pub struct AuthorizationDelegate {
    registry: AuthorizerRegistry,
    resolved: RwLock<Option<Resolved>>,
}

impl AuthorizationDelegate {
    pub fn new(registry: AuthorizerRegistry) -> Self {
        Self {
            registry,
            resolved: RwLock::new(None),
        }
    }

    /// Resolve the strategy named by `pool.authorizer`
    pub fn configure(&self, pool: &PoolConfig) -> Result<()> {
        let authorizer = self.registry.resolve(&pool.authorizer).ok_or_else(|| {
            Error::Config(format!(
                "Unknown authorizer '{}' for pool {} (available: {})",
                pool.authorizer,
                pool.id,
                self.registry.names().join(", ")
            ))
        })?;

        info!(pool = %pool.id, authorizer = %pool.authorizer, "Authorization delegate configured");

        *self.resolved.write() = Some(Resolved {
            name: pool.authorizer.clone(),
            pool: pool.clone(),
            authorizer,
        });
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.resolved.read().is_some()
    }

    /// Name of the configured strategy, as written in the pool config
    pub fn authorizer_name(&self) -> Option<String> {
        self.resolved.read().as_ref().map(|r| r.name.clone())
    }

    /// Forward the credentials verbatim and return the strategy's verdict
    pub async fn authenticate(
        &self,
        remote_endpoint: SocketAddr,
        worker_name: &str,
        password: &str,
    ) -> Result<bool> {
        let (authorizer, pool) = {
            let resolved = self.resolved.read();
            let resolved = resolved.as_ref().ok_or_else(|| {
                Error::Config("Authorization delegate used before configure".to_string())
            })?;
            (resolved.authorizer.clone(), resolved.pool.clone())
        };

        let authorized = authorizer
            .authorize(&pool, remote_endpoint, worker_name, password)
            .await?;

        debug!(
            pool = %pool.id,
            worker = %worker_name,
            remote = %remote_endpoint,
            authorized,
            "Worker authorization completed"
        );
        Ok(authorized)
    }
}
