//! Configuration management for Warden
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `WARDEN_`-prefixed environment variables with `__` between sections
//! (`WARDEN_SQL__TABLE_NAME=leases`).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use warden_common::{
    DEFAULT_KEY_PREFIX, DEFAULT_SCHEMA_LOCK_TIMEOUT_MS, DEFAULT_TABLE_NAME, Result, WardenError,
    is_valid_identifier,
};

pub const ENV_PREFIX: &str = "WARDEN";
pub const ENV_SEPARATOR: &str = "__";

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sql,
    Redis,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    pub url: String,
    pub schema: Option<String>,
    pub table_name: String,
    pub schema_lock_timeout_ms: u64,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub sqlx_logging: bool,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            schema: None,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            schema_lock_timeout_ms: DEFAULT_SCHEMA_LOCK_TIMEOUT_MS,
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            acquire_timeout_secs: 8,
            sqlx_logging: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total time budget for one retried operation
    pub timeout_ms: u64,
    /// Fixed delay, or the step/base of linear and exponential backoff
    pub delay_ms: u64,
    pub backoff: BackoffKind,
    /// Ceiling for growing delays; defaults to `timeout_ms`
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            delay_ms: 100,
            backoff: BackoffKind::Fixed,
            max_delay_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.unwrap_or(self.timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub console: bool,
    /// Directory for `warden.log`; file logging is off when unset
    pub dir: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            dir: None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub backend: BackendKind,
    pub sql: SqlConfig,
    pub redis: RedisConfig,
    pub retry: RetryConfig,
    pub logging: LogSettings,
}

impl WardenConfig {
    /// Load defaults, then `path` (YAML) if given, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, Self::environment())
    }

    /// The environment source used by [`WardenConfig::load`]
    pub fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }

    /// Load with an explicit environment source
    pub fn load_with(path: Option<&Path>, environment: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let config: WardenConfig = builder
            .add_source(environment)
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| WardenError::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no backend could start with
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            BackendKind::Sql => {
                let sql = &self.sql;
                if sql.url.trim().is_empty() {
                    return Err(invalid("sql.url must be set for the sql backend"));
                }
                if !is_valid_identifier(&sql.table_name) {
                    return Err(invalid(format!(
                        "sql.table_name '{}' is not a valid identifier",
                        sql.table_name
                    )));
                }
                if let Some(schema) = &sql.schema
                    && !is_valid_identifier(schema)
                {
                    return Err(invalid(format!(
                        "sql.schema '{schema}' is not a valid identifier"
                    )));
                }
                if sql.schema_lock_timeout_ms == 0 {
                    return Err(invalid("sql.schema_lock_timeout_ms must be positive"));
                }
                if sql.max_connections == 0 || sql.min_connections > sql.max_connections {
                    return Err(invalid(
                        "sql.min_connections must not exceed a positive sql.max_connections",
                    ));
                }
            }
            BackendKind::Redis => {
                if self.redis.url.trim().is_empty() {
                    return Err(invalid("redis.url must be set for the redis backend"));
                }
                if self.redis.key_prefix.trim().is_empty() {
                    return Err(invalid("redis.key_prefix must not be empty"));
                }
            }
            BackendKind::Memory => {}
        }

        if self.retry.timeout_ms == 0 {
            return Err(invalid("retry.timeout_ms must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> WardenError {
    WardenError::Configuration(message.into())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WardenConfig::environment().source(Some(source))
    }

    fn yaml_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = WardenConfig::default();
        assert_eq!(config.backend, BackendKind::Sql);
        assert_eq!(config.sql.table_name, "distributed_locks");
        assert_eq!(config.sql.schema_lock_timeout_ms, 30_000);
        assert_eq!(config.redis.key_prefix, "warden:lock");
        assert_eq!(config.retry.timeout(), Duration::from_secs(30));
        assert_eq!(config.retry.max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_sql_url_is_rejected() {
        let err = WardenConfig::load_with(None, env(&[])).unwrap_err();
        assert!(matches!(err, WardenError::Configuration(_)));
    }

    #[test]
    fn test_memory_backend_from_env() {
        let config = WardenConfig::load_with(None, env(&[("WARDEN_BACKEND", "memory")])).unwrap();
        assert_eq!(config.backend, BackendKind::Memory);
    }

    #[test]
    fn test_yaml_then_env_override() {
        let file = yaml_file(
            "backend: sql\nsql:\n  url: sqlite://locks.db\n  table_name: leases\nretry:\n  delay_ms: 50\n  backoff: exponential\n",
        );
        let config = WardenConfig::load_with(
            Some(file.path()),
            env(&[
                ("WARDEN_SQL__TABLE_NAME", "app_leases"),
                ("WARDEN_RETRY__TIMEOUT_MS", "5000"),
            ]),
        )
        .unwrap();

        assert_eq!(config.sql.url, "sqlite://locks.db");
        assert_eq!(config.sql.table_name, "app_leases");
        assert_eq!(config.retry.delay_ms, 50);
        assert_eq!(config.retry.timeout_ms, 5000);
        assert_eq!(config.retry.backoff, BackoffKind::Exponential);
        assert_eq!(config.sql.max_connections, 10);
    }

    #[test]
    fn test_invalid_table_name_is_rejected() {
        let file = yaml_file("sql:\n  url: sqlite://locks.db\n  table_name: \"locks; drop\"\n");
        let err = WardenConfig::load_with(Some(file.path()), env(&[])).unwrap_err();
        assert!(err.to_string().contains("table_name"));
    }

    #[test]
    fn test_redis_requires_url() {
        let config = WardenConfig {
            backend: BackendKind::Redis,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = WardenConfig {
            backend: BackendKind::Redis,
            redis: RedisConfig {
                url: "redis://127.0.0.1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
