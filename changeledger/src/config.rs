//! Ledger configuration, usually loaded from `changeledger.toml`.
//!
//! ```toml
//! [ledger]
//! table = "migrationChangeLog"
//! allow_create = true
//! operation_timeout_ms = 30000
//!
//! [lock]
//! table = "migrationLock"
//! acquired_for_ms = 60000
//!
//! [redis]
//! url = "${REDIS_URL}"
//! prefix = "changeledger"
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    errors::ConfigError,
    lock::{DEFAULT_LOCK_KEY, DEFAULT_LOCK_TABLE, LockOptions},
    repository::RepositoryOptions,
};

pub const DEFAULT_CONFIG_FILE: &str = "changeledger.toml";
pub const DEFAULT_TABLE: &str = "migrationChangeLog";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub lock: LockSettings,
    #[serde(default)]
    pub redis: RedisSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_allow_create")]
    pub allow_create: bool,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_ready_poll_interval_ms")]
    pub ready_poll_interval_ms: u64,
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
    #[serde(default = "default_conflict_backoff_ms")]
    pub conflict_backoff_ms: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            table: default_table(),
            allow_create: default_allow_create(),
            operation_timeout_ms: default_operation_timeout_ms(),
            ready_poll_interval_ms: default_ready_poll_interval_ms(),
            scan_page_size: default_scan_page_size(),
            conflict_backoff_ms: default_conflict_backoff_ms(),
        }
    }
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_allow_create() -> bool {
    true
}

fn default_operation_timeout_ms() -> u64 {
    30_000
}

fn default_ready_poll_interval_ms() -> u64 {
    200
}

fn default_scan_page_size() -> usize {
    100
}

fn default_conflict_backoff_ms() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_lock_table")]
    pub table: String,
    #[serde(default = "default_lock_key")]
    pub key: String,
    #[serde(default = "default_acquired_for_ms")]
    pub acquired_for_ms: u64,
    #[serde(default = "default_quit_trying_after_ms")]
    pub quit_trying_after_ms: u64,
    #[serde(default = "default_try_frequency_ms")]
    pub try_frequency_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            table: default_lock_table(),
            key: default_lock_key(),
            acquired_for_ms: default_acquired_for_ms(),
            quit_trying_after_ms: default_quit_trying_after_ms(),
            try_frequency_ms: default_try_frequency_ms(),
        }
    }
}

fn default_lock_table() -> String {
    DEFAULT_LOCK_TABLE.to_string()
}

fn default_lock_key() -> String {
    DEFAULT_LOCK_KEY.to_string()
}

fn default_acquired_for_ms() -> u64 {
    60_000
}

fn default_quit_trying_after_ms() -> u64 {
    180_000
}

fn default_try_frequency_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "${REDIS_URL}".to_string()
}

fn default_prefix() -> String {
    "changeledger".to_string()
}

impl LedgerConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() { Self::load(path) } else { Ok(Self::default()) }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "ledger.operation_timeout_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.ledger.ready_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "ledger.ready_poll_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.ledger.scan_page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "ledger.scan_page_size",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.lock.acquired_for_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "lock.acquired_for_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.lock.try_frequency_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "lock.try_frequency_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.lock.key.is_empty() {
            return Err(ConfigError::Invalid {
                field: "lock.key",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Redis URL with a whole-value `${VAR}` reference expanded from the environment.
    pub fn redis_url(&self) -> Result<String, ConfigError> {
        expand_env(&self.redis.url)
    }

    pub fn repository_options(&self) -> RepositoryOptions {
        RepositoryOptions {
            operation_timeout: Duration::from_millis(self.ledger.operation_timeout_ms),
            ready_poll_interval: Duration::from_millis(self.ledger.ready_poll_interval_ms),
            scan_page_size: self.ledger.scan_page_size,
            conflict_backoff: Duration::from_millis(self.ledger.conflict_backoff_ms),
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            acquired_for: Duration::from_millis(self.lock.acquired_for_ms),
            quit_trying_after: Duration::from_millis(self.lock.quit_trying_after_ms),
            try_frequency: Duration::from_millis(self.lock.try_frequency_ms),
        }
    }
}

fn expand_env(value: &str) -> Result<String, ConfigError> {
    match value.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name).map_err(|_| ConfigError::MissingEnv(var_name.to_string())),
        None => Ok(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.ledger.table, "migrationChangeLog");
        assert!(config.ledger.allow_create);
        assert_eq!(config.redis.url, "${REDIS_URL}");
        assert_eq!(config.redis.prefix, "changeledger");

        let options = config.repository_options();
        assert_eq!(options.operation_timeout, Duration::from_secs(30));
        assert_eq!(options.ready_poll_interval, Duration::from_millis(200));
        assert_eq!(options.scan_page_size, 100);

        assert_eq!(config.lock.table, "migrationLock");
        assert_eq!(config.lock.key, "DEFAULT_KEY");
        let lock = config.lock_options();
        assert_eq!(lock.acquired_for, Duration::from_secs(60));
        assert_eq!(lock.quit_trying_after, Duration::from_secs(180));
        assert_eq!(lock.try_frequency, Duration::from_secs(1));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config = LedgerConfig::from_toml_str(
            r#"
            [ledger]
            table = "for-entries-1"
            allow_create = false

            [redis]
            url = "redis://127.0.0.1:6379/3"
            "#,
        )
        .unwrap();
        assert_eq!(config.ledger.table, "for-entries-1");
        assert!(!config.ledger.allow_create);
        assert_eq!(config.ledger.scan_page_size, 100);
        assert_eq!(config.redis.prefix, "changeledger");
        assert_eq!(config.redis_url().unwrap(), "redis://127.0.0.1:6379/3");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = LedgerConfig::from_toml_str("[ledger]\noperation_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "ledger.operation_timeout_ms", .. }));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = LedgerConfig::from_toml_str("[ledger]\nready_poll_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "ledger.ready_poll_interval_ms", .. }));
    }

    #[test]
    fn zero_lock_intervals_are_rejected() {
        let err = LedgerConfig::from_toml_str("[lock]\nacquired_for_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "lock.acquired_for_ms", .. }));
        let err = LedgerConfig::from_toml_str("[lock]\ntry_frequency_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "lock.try_frequency_ms", .. }));
    }

    #[test]
    fn env_references_are_expanded() {
        assert_eq!(expand_env("redis://localhost").unwrap(), "redis://localhost");
        let err = expand_env("${CHANGELEDGER_TEST_SURELY_UNSET_VAR}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(name) if name == "CHANGELEDGER_TEST_SURELY_UNSET_VAR"));
        // PATH is set in any sane test environment
        assert!(expand_env("${PATH}").is_ok());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ledger]\nscan_page_size = 7").unwrap();
        let config = LedgerConfig::load(file.path()).unwrap();
        assert_eq!(config.ledger.scan_page_size, 7);

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(LedgerConfig::load(&missing), Err(ConfigError::Read { .. })));
        assert_eq!(LedgerConfig::load_or_default(&missing).unwrap().ledger.table, DEFAULT_TABLE);
    }

    #[test]
    fn serializes_back_to_toml() {
        let toml_str = toml::to_string_pretty(&LedgerConfig::default()).unwrap();
        assert!(toml_str.contains("operation_timeout_ms"));
        assert!(toml_str.contains("prefix"));
    }
}
