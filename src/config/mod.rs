//! Configuration for satsflow.
//!
//! Settings are loaded with priority: env var > TOML file > default.
//! Bootstrap vars may also live in `~/.satsflow/.env` (loaded via dotenvy
//! early in startup).

mod database;
pub(crate) mod helpers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::observability::{LogFormat, ObservabilityConfig};
use crate::settings::Settings;

pub use self::database::{DatabaseBackend, DatabaseConfig, default_libsql_path};

/// Main configuration for the runtime.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub intents: IntentConfig,
    pub poller: PollerConfig,
    pub faucet: FaucetConfig,
    pub observability: ObservabilityConfig,
}

/// Intent lifetimes and lock behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentConfig {
    /// Lifetime of intents created from inline queries.
    pub inline_ttl: Duration,
    /// Lifetime of intents created from commands.
    pub ttl: Duration,
    /// Upper bound on waiting for an intent's lock. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl IntentConfig {
    fn from_settings(settings: &Settings) -> Self {
        Self {
            inline_ttl: Duration::from_secs(settings.intents.inline_ttl_secs),
            ttl: Duration::from_secs(settings.intents.ttl_secs),
            lock_timeout: settings.intents.lock_timeout_ms.map(Duration::from_millis),
        }
    }

    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let inline_ttl_secs =
            helpers::parse_env_or("SATSFLOW_INLINE_TTL_SECS", settings.intents.inline_ttl_secs)?;
        let ttl_secs = helpers::parse_env_or("SATSFLOW_INTENT_TTL_SECS", settings.intents.ttl_secs)?;
        for (key, value) in [
            ("SATSFLOW_INLINE_TTL_SECS", inline_ttl_secs),
            ("SATSFLOW_INTENT_TTL_SECS", ttl_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be > 0".to_string(),
                });
            }
        }

        let lock_timeout_ms = helpers::optional_env("SATSFLOW_LOCK_TIMEOUT_MS")?
            .map(|s| s.parse::<u64>())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "SATSFLOW_LOCK_TIMEOUT_MS".to_string(),
                message: format!("must be a positive integer: {e}"),
            })?
            .or(settings.intents.lock_timeout_ms);

        Ok(Self {
            inline_ttl: Duration::from_secs(inline_ttl_secs),
            ttl: Duration::from_secs(ttl_secs),
            lock_timeout: lock_timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
        })
    }
}

/// Settlement polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            interval: Duration::from_secs(settings.poller.interval_secs),
            deadline: Duration::from_secs(settings.poller.deadline_secs),
        }
    }
}

impl PollerConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let interval_secs =
            helpers::parse_env_or("SATSFLOW_POLL_INTERVAL_SECS", settings.poller.interval_secs)?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SATSFLOW_POLL_INTERVAL_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let deadline_secs =
            helpers::parse_env_or("SATSFLOW_POLL_DEADLINE_SECS", settings.poller.deadline_secs)?;
        if deadline_secs < interval_secs {
            return Err(ConfigError::InvalidValue {
                key: "SATSFLOW_POLL_DEADLINE_SECS".to_string(),
                message: format!("must be >= poll interval ({interval_secs}s)"),
            });
        }

        Ok(Self {
            interval: Duration::from_secs(interval_secs),
            deadline: Duration::from_secs(deadline_secs),
        })
    }
}

/// Faucet creation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaucetConfig {
    pub min_per_user: u64,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            min_per_user: Settings::default().faucet.min_per_user,
        }
    }
}

impl FaucetConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let min_per_user =
            helpers::parse_env_or("SATSFLOW_FAUCET_MIN_PER_USER", settings.faucet.min_per_user)?;
        if min_per_user == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SATSFLOW_FAUCET_MIN_PER_USER".to_string(),
                message: "must be > 0".to_string(),
            });
        }
        Ok(Self { min_per_user })
    }
}

impl ObservabilityConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let format = LogFormat::parse(
            &helpers::optional_env("SATSFLOW_LOG_FORMAT")?
                .unwrap_or_else(|| settings.logging.format.clone()),
            "SATSFLOW_LOG_FORMAT",
        )?;
        let filter = helpers::optional_env("RUST_LOG")?
            .unwrap_or_else(|| ObservabilityConfig::DEFAULT_FILTER.to_string());
        Ok(Self { format, filter })
    }
}

impl Config {
    /// Load configuration from environment variables and the default TOML file.
    ///
    /// Loads both `./.env` (standard, higher priority) and `~/.satsflow/.env`
    /// (lower priority) via dotenvy, which never overwrites existing vars.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load from env with an optional TOML config file.
    ///
    /// If `toml_path` is `Some`, the file must exist and parse. If `None`,
    /// `~/.satsflow/config.toml` is tried and a missing file is ignored.
    pub fn from_env_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        crate::bootstrap::load_satsflow_env();
        let settings = Self::load_settings(toml_path)?;
        Self::build(&settings)
    }

    fn load_settings(explicit_path: Option<&Path>) -> Result<Settings, ConfigError> {
        let path = explicit_path
            .map(PathBuf::from)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(settings)) => {
                tracing::debug!("Loaded TOML config from {}", path.display());
                Ok(settings)
            }
            Ok(None) if explicit_path.is_some() => Err(ConfigError::ParseError(format!(
                "Config file not found: {}",
                path.display()
            ))),
            Ok(None) => Ok(Settings::default()),
            Err(e) if explicit_path.is_some() => Err(ConfigError::ParseError(e)),
            Err(e) => {
                tracing::warn!("Failed to load default config file: {}", e);
                Ok(Settings::default())
            }
        }
    }

    /// Built-in defaults on the in-memory backend, ignoring env and files.
    pub fn in_memory() -> Self {
        Self {
            database: DatabaseConfig::memory(),
            intents: IntentConfig::default(),
            poller: PollerConfig::default(),
            faucet: FaucetConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }

    /// Build config from settings, letting env vars win.
    pub(crate) fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::resolve(settings)?,
            intents: IntentConfig::resolve(settings)?,
            poller: PollerConfig::resolve(settings)?,
            faucet: FaucetConfig::resolve(settings)?,
            observability: ObservabilityConfig::resolve(settings)?,
        })
    }
}
