use crate::config::PoolConfig;
use crate::daemon::DaemonClient;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay between daemon health checks while waiting for it to come up
pub const DAEMON_HEALTH_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Retry strategy for waiting on the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryStrategy {
    /// Fixed delay between retries
    Fixed { delay: Duration },
    /// Exponential backoff capped at `max`
    ExponentialBackoff {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl RetryStrategy {
    /// Calculate delay for the given attempt number (zero based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed { delay } => *delay,
            RetryStrategy::ExponentialBackoff { initial, multiplier, max } => {
                let exponent = attempt.min(i32::MAX as u32) as i32;
                let delay = initial.as_millis() as f64 * multiplier.powi(exponent);
                if !delay.is_finite() {
                    return *max;
                }
                Duration::from_millis((delay as u64).min(max.as_millis() as u64))
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Fixed {
            delay: DAEMON_HEALTH_RETRY_INTERVAL,
        }
    }
}

/// Brings the daemon connection up and blocks until it reports healthy.
///
/// There is no attempt cap: an unreachable daemon keeps startup waiting,
/// with a warning logged on every failed check.
#[derive(Debug, Clone, Default)]
pub struct DaemonHealthMonitor {
    retry: RetryStrategy,
}

impl DaemonHealthMonitor {
    pub fn new(retry: RetryStrategy) -> Self {
        Self { retry }
    }

    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry
    }

    /// Start the daemon, then wait for `is_healthy` to return true.
    ///
    /// Returns the number of health checks performed.
    pub async fn start_and_wait<F, Fut>(
        &self,
        daemon: &dyn DaemonClient,
        config: &PoolConfig,
        is_healthy: F,
    ) -> Result<u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        info!(pool = %config.id, coin = %config.coin, "Starting daemon connection");

        daemon.start(config).await.map_err(|e| match e {
            Error::DaemonStartup(_) => e,
            other => Error::DaemonStartup(other.to_string()),
        })?;

        let checks = self.wait_until_healthy(&config.id, is_healthy).await;
        info!(pool = %config.id, checks, "Daemon online");
        Ok(checks)
    }

    /// Poll `is_healthy` until it returns true, sleeping between attempts
    pub async fn wait_until_healthy<F, Fut>(&self, pool_id: &str, mut is_healthy: F) -> u32
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut attempt = 0u32;

        loop {
            let healthy = is_healthy().await;
            attempt = attempt.saturating_add(1);

            if healthy {
                debug!(pool = %pool_id, attempt, "Daemon reported healthy");
                return attempt;
            }

            let delay = self.retry.delay_for_attempt(attempt - 1);
            warn!(
                pool = %pool_id,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                "Waiting for daemon to come online"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
