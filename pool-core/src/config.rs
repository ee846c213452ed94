use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::filter::Directive;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration of one pool instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool identifier, unique per server
    pub id: String,
    /// Coin this pool mines
    pub coin: String,
    /// Name of the worker authorizer strategy
    pub authorizer: String,
    /// How often the daemon is polled for new work
    #[serde(default = "default_job_refresh_interval_ms")]
    pub job_refresh_interval_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_job_refresh_interval_ms() -> u64 {
    1000
}

fn default_enabled() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub level: String,
    /// Per-component log levels
    #[serde(default)]
    pub component_levels: HashMap<String, String>,
    /// Output format (json, pretty, compact)
    pub format: LogFormat,
    /// Log output destination
    pub output: LogOutput,
    /// Whether to redact sensitive data
    pub redact_sensitive_data: bool,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Log output options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogOutput {
    Stdout,
    File(PathBuf),
    Both(PathBuf),
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            coin: String::new(),
            authorizer: String::new(),
            job_refresh_interval_ms: default_job_refresh_interval_ms(),
            enabled: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            component_levels: HashMap::new(),
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            redact_sensitive_data: true,
        }
    }
}

impl PoolConfig {
    pub fn job_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.job_refresh_interval_ms)
    }

    /// Validate pool configuration
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Config("Pool id cannot be empty".to_string()));
        }

        if self.coin.trim().is_empty() {
            return Err(Error::Config(format!("Pool {}: coin cannot be empty", self.id)));
        }

        if self.authorizer.trim().is_empty() {
            return Err(Error::Config(format!("Pool {}: authorizer cannot be empty", self.id)));
        }

        if self.job_refresh_interval_ms == 0 {
            return Err(Error::Config(format!(
                "Pool {}: job_refresh_interval_ms must be greater than 0",
                self.id
            )));
        }

        Ok(())
    }
}

impl ServerConfig {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file(&self, path: &std::path::Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for pool in &self.pools {
            pool.validate()?;
            if !seen.insert(pool.id.as_str()) {
                return Err(Error::Config(format!("Duplicate pool id: {}", pool.id)));
            }
        }

        self.validate_logging()
    }

    /// `logging.level` takes the filter syntax `init_logging` accepts: bare
    /// levels and `target=level` directives, comma separated.
    fn validate_logging(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        let is_level = |level: &str| valid_levels.contains(&level.to_lowercase().as_str());

        let directives: Vec<&str> = self
            .logging
            .level
            .split(',')
            .map(str::trim)
            .filter(|directive| !directive.is_empty())
            .collect();
        if directives.is_empty() {
            return Err(Error::Config("Log level cannot be empty".to_string()));
        }

        for directive in directives {
            if directive.contains('=') || directive.contains('[') {
                directive.parse::<Directive>().map_err(|e| {
                    Error::Config(format!("Invalid log directive '{}': {}", directive, e))
                })?;
            } else if !is_level(directive) {
                return Err(Error::Config(format!(
                    "Invalid log level: {}. Must be one of: {:?}",
                    directive, valid_levels
                )));
            }
        }

        for (component, level) in &self.logging.component_levels {
            if !is_level(level) {
                return Err(Error::Config(format!(
                    "Invalid log level for {}: {}. Must be one of: {:?}",
                    component, level, valid_levels
                )));
            }
        }

        Ok(())
    }

    /// Pools that should be started
    pub fn enabled_pools(&self) -> impl Iterator<Item = &PoolConfig> {
        self.pools.iter().filter(|pool| pool.enabled)
    }

    pub fn pool(&self, id: &str) -> Option<&PoolConfig> {
        self.pools.iter().find(|pool| pool.id == id)
    }

    /// Merge with environment variables
    pub fn merge_env(&mut self) -> Result<()> {
        if let Ok(log_level) = std::env::var("POOLCORE_LOG_LEVEL") {
            self.logging.level = log_level;
        }

        if let Ok(interval) = std::env::var("POOLCORE_JOB_REFRESH_INTERVAL_MS") {
            let interval: u64 = interval
                .parse()
                .map_err(|e| Error::Config(format!("Invalid job refresh interval: {}", e)))?;
            for pool in &mut self.pools {
                pool.job_refresh_interval_ms = interval;
            }
        }

        Ok(())
    }

    /// Load configuration from multiple sources with priority:
    /// 1. Explicit overrides (highest priority)
    /// 2. Environment variables
    /// 3. Configuration file
    /// 4. Default values (lowest priority)
    pub fn load_from_sources(
        config_path: Option<&std::path::Path>,
        overrides: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            if path.exists() {
                config = Self::from_file(path)?;
            }
        }

        config.merge_env()?;

        if let Some(overrides) = overrides {
            config.apply_overrides(overrides)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply configuration overrides from a key-value map
    pub fn apply_overrides(&mut self, overrides: HashMap<String, String>) -> Result<()> {
        for (key, value) in overrides {
            self.apply_single_override(&key, &value)?;
        }
        Ok(())
    }

    /// Apply a single configuration override
    fn apply_single_override(&mut self, key: &str, value: &str) -> Result<()> {
        if key == "logging.level" {
            self.logging.level = value.to_string();
            return Ok(());
        }

        let Some(rest) = key.strip_prefix("pools.") else {
            return Err(Error::Config(format!("Unknown configuration key: {}", key)));
        };
        let Some((pool_id, field)) = rest.rsplit_once('.') else {
            return Err(Error::Config(format!("Unknown configuration key: {}", key)));
        };
        let pool = self
            .pools
            .iter_mut()
            .find(|pool| pool.id == pool_id)
            .ok_or_else(|| {
                Error::Config(format!("Unknown pool in override '{}': {}", key, pool_id))
            })?;

        match field {
            "authorizer" => {
                pool.authorizer = value.to_string();
            }
            "job_refresh_interval_ms" => {
                pool.job_refresh_interval_ms = value.parse().map_err(|e| {
                    Error::Config(format!("Invalid job_refresh_interval_ms '{}': {}", value, e))
                })?;
            }
            "enabled" => {
                pool.enabled = value.parse().map_err(|e| {
                    Error::Config(format!("Invalid enabled flag '{}': {}", value, e))
                })?;
            }
            _ => {
                return Err(Error::Config(format!("Unknown configuration key: {}", key)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool(id: &str) -> PoolConfig {
        PoolConfig {
            id: id.to_string(),
            coin: "bitcoin".to_string(),
            authorizer: "static".to_string(),
            ..PoolConfig::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.enabled_pools().count(), 0);
    }

    #[test]
    fn test_pool_validation() {
        assert!(pool("btc1").validate().is_ok());
        assert_eq!(pool("btc1").job_refresh_interval(), Duration::from_secs(1));

        let mut invalid = pool("btc1");
        invalid.coin = "  ".to_string();
        assert!(matches!(invalid.validate(), Err(Error::Config(_))));

        let mut invalid = pool("btc1");
        invalid.authorizer.clear();
        assert!(invalid.validate().is_err());

        let mut invalid = pool("btc1");
        invalid.job_refresh_interval_ms = 0;
        assert!(invalid.validate().is_err());

        assert!(pool("").validate().is_err());
    }

    #[test]
    fn test_duplicate_pool_ids_rejected() {
        let config = ServerConfig {
            pools: vec![pool("btc1"), pool("btc1")],
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = ServerConfig::default();

        for level in ["trace", "debug", "info", "warn", "error"] {
            config.logging.level = level.to_string();
            assert!(config.validate_logging().is_ok());
        }

        config.logging.level = "verbose".to_string();
        assert!(config.validate_logging().is_err());
    }

    #[test]
    fn test_log_filter_directives_validate_like_init_logging() {
        let mut config = ServerConfig::default();

        for level in ["info,pool_core=debug", "warn,pool_core::broadcaster=trace", "OFF"] {
            config.logging.level = level.to_string();
            assert!(config.validate_logging().is_ok(), "{}", level);
            assert!(crate::logging::build_filter(&config.logging).is_ok(), "{}", level);
        }

        for level in ["pool_core=loud", "info,verbose", " , "] {
            config.logging.level = level.to_string();
            assert!(matches!(config.validate_logging(), Err(Error::Config(_))), "{}", level);
        }

        config.logging.level = "info".to_string();
        config.logging.component_levels.insert("pool_core".to_string(), "loud".to_string());
        assert!(config.validate_logging().is_err());
        assert!(crate::logging::build_filter(&config.logging).is_err());
    }

    #[test]
    fn test_file_round_trip_and_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pools.toml");

        std::fs::write(
            &path,
            r#"
[[pools]]
id = "btc1"
coin = "bitcoin"
authorizer = "static"

[[pools]]
id = "ltc1"
coin = "litecoin"
authorizer = "static"
job_refresh_interval_ms = 250
enabled = false

[logging]
level = "debug"
format = "Json"
output = "Stdout"
redact_sensitive_data = true
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.pools.len(), 2);
        assert_eq!(config.pool("btc1").unwrap().job_refresh_interval_ms, 1000);
        assert_eq!(config.pool("ltc1").unwrap().job_refresh_interval(), Duration::from_millis(250));
        assert_eq!(config.enabled_pools().count(), 1);
        assert_eq!(config.logging.format, LogFormat::Json);

        let copy_path = dir.path().join("copy.toml");
        config.to_file(&copy_path).unwrap();
        let reloaded = ServerConfig::from_file(&copy_path).unwrap();
        assert_eq!(reloaded.pools, config.pools);
    }

    #[test]
    fn test_unparseable_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[[pools]\nid = ").unwrap();

        assert!(matches!(ServerConfig::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_overrides() {
        let mut config = ServerConfig {
            pools: vec![pool("btc1"), pool("ltc1")],
            ..ServerConfig::default()
        };

        let mut overrides = HashMap::new();
        overrides.insert("pools.ltc1.authorizer".to_string(), "ldap".to_string());
        overrides.insert("pools.ltc1.job_refresh_interval_ms".to_string(), "500".to_string());
        overrides.insert("pools.btc1.enabled".to_string(), "false".to_string());
        overrides.insert("logging.level".to_string(), "warn".to_string());
        config.apply_overrides(overrides).unwrap();

        let ltc = config.pool("ltc1").unwrap();
        assert_eq!(ltc.authorizer, "ldap");
        assert_eq!(ltc.job_refresh_interval_ms, 500);
        assert!(!config.pool("btc1").unwrap().enabled);
        assert_eq!(config.logging.level, "warn");

        let mut unknown = HashMap::new();
        unknown.insert("pools.doge1.authorizer".to_string(), "static".to_string());
        assert!(config.apply_overrides(unknown).is_err());

        let mut unknown = HashMap::new();
        unknown.insert("network.bind_address".to_string(), "0.0.0.0:3333".to_string());
        assert!(config.apply_overrides(unknown).is_err());

        let mut bad_value = HashMap::new();
        bad_value.insert("pools.btc1.job_refresh_interval_ms".to_string(), "soon".to_string());
        assert!(config.apply_overrides(bad_value).is_err());
    }

    #[test]
    fn test_load_from_sources() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pools.toml");

        let file_config = ServerConfig {
            pools: vec![pool("btc1")],
            ..ServerConfig::default()
        };
        file_config.to_file(&path).unwrap();

        let mut overrides = HashMap::new();
        overrides.insert("pools.btc1.authorizer".to_string(), "ldap".to_string());

        let config = ServerConfig::load_from_sources(Some(&path), Some(overrides)).unwrap();
        assert_eq!(config.pool("btc1").unwrap().authorizer, "ldap");
        assert_eq!(config.pool("btc1").unwrap().coin, "bitcoin");

        let missing = dir.path().join("missing.toml");
        let config = ServerConfig::load_from_sources(Some(&missing), None).unwrap();
        assert!(config.pools.is_empty());
    }
}
