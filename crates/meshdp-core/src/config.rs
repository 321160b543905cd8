//! Engine configuration and defaults.
//!
//! Defaults live in the constant modules below; [`EngineConfig`] is loaded
//! from TOML and every section may be omitted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Executor defaults.
pub mod executor {
    /// Rounds over the strategy list before giving up.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    /// Backoff base; round `n` waits `base * 2^n`.
    pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
    pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
}

/// Binder defaults.
pub mod binder {
    pub const DEFAULT_MIN_INTERVAL_SECS: u16 = 60;
    pub const DEFAULT_MAX_INTERVAL_SECS: u16 = 3600;
    pub const DEFAULT_MIN_CHANGE: u32 = 1;
}

/// Per-device runtime defaults.
pub mod runtime {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
    /// Daily time resend.
    pub const DEFAULT_TIME_RESYNC_SECS: u64 = 24 * 60 * 60;
    pub const DEFAULT_POLL_FLOOR_SECS: u64 = 30;
}

/// Registry build defaults.
pub mod registry {
    /// Width of the vendor family prefix of a manufacturer id.
    pub const DEFAULT_PREFIX_LEN: usize = 8;
    pub const SNAPSHOT_VERSION: u32 = 1;
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG_PATH: &str = "MESHDP_CONFIG";
    pub const LOG_JSON: &str = "MESHDP_LOG_JSON";
}

/// Configuration load errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Log verbosity for strategy-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
}

/// How the resolver treats claimants of equal rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Equal specificity is a build error.
    #[default]
    Fail,
    /// The earliest-declared profile wins.
    DeclarationOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub strategy_log_level: LogLevel,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: executor::DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: executor::DEFAULT_BASE_DELAY_MS,
            max_delay_ms: executor::DEFAULT_MAX_DELAY_MS,
            strategy_log_level: LogLevel::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinderConfig {
    pub min_interval_secs: u16,
    pub max_interval_secs: u16,
    pub min_change: u32,
    /// Send a data query after binding datapoint capabilities.
    pub query_on_bind: bool,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: binder::DEFAULT_MIN_INTERVAL_SECS,
            max_interval_secs: binder::DEFAULT_MAX_INTERVAL_SECS,
            min_change: binder::DEFAULT_MIN_CHANGE,
            query_on_bind: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub channel_capacity: usize,
    pub time_resync_secs: u64,
    pub poll_floor_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: runtime::DEFAULT_CHANNEL_CAPACITY,
            time_resync_secs: runtime::DEFAULT_TIME_RESYNC_SECS,
            poll_floor_secs: runtime::DEFAULT_POLL_FLOOR_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub prefix_len: usize,
    pub tie_break: TieBreak,
    /// Fail when a repaired fingerprint collides with another profile's claim.
    pub strict_repairs: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prefix_len: registry::DEFAULT_PREFIX_LEN,
            tie_break: TieBreak::default(),
            strict_repairs: true,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub binder: BinderConfig,
    pub runtime: RuntimeConfig,
    pub registry: RegistryConfig,
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!(category = "config", path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    /// Parse TOML text and validate it.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `MESHDP_CONFIG` if set, otherwise use defaults.
    pub fn from_env_or_default() -> Result<Self, ConfigError> {
        match std::env::var(env_vars::CONFIG_PATH) {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim()),
            _ => {
                info!(category = "config", "Using default engine config");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "executor.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.binder.min_interval_secs > self.binder.max_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "binder.min_interval_secs ({}) exceeds max_interval_secs ({})",
                self.binder.min_interval_secs, self.binder.max_interval_secs
            )));
        }
        if self.runtime.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "runtime.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.runtime.time_resync_secs == 0 {
            return Err(ConfigError::Invalid(
                "runtime.time_resync_secs must be at least 1".to_string(),
            ));
        }
        if self.registry.prefix_len == 0 {
            return Err(ConfigError::Invalid(
                "registry.prefix_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.executor.max_attempts, 3);
        assert_eq!(config.executor.base_delay_ms, 1000);
        assert_eq!(config.runtime.time_resync_secs, 86_400);
        assert_eq!(config.registry.prefix_len, 8);
        assert_eq!(config.registry.tie_break, TieBreak::Fail);
        assert!(config.registry.strict_repairs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml(
            r#"
            [executor]
            max_attempts = 5
            strategy_log_level = "warn"

            [registry]
            tie_break = "declaration_order"
            "#,
        )
        .unwrap();
        assert_eq!(config.executor.max_attempts, 5);
        assert_eq!(config.executor.base_delay_ms, 1000);
        assert_eq!(config.executor.strategy_log_level, LogLevel::Warn);
        assert_eq!(config.registry.tie_break, TieBreak::DeclarationOrder);
        assert_eq!(config.binder, BinderConfig::default());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            EngineConfig::from_toml("[executor]\nmax_attempts = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("[binder]\nmin_interval_secs = 10\nmax_interval_secs = 5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml("[executor\n"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\nchannel_capacity = 8").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.runtime.channel_capacity, 8);

        let missing = EngineConfig::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
