//! File-backed settings for satsflow.
//!
//! Settings are the lowest-priority configuration layer: values here are
//! used only when the corresponding env var is unset. The file lives at
//! `~/.satsflow/config.toml` unless a path is passed explicitly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Settings loaded from the TOML config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub intents: IntentSettings,
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub faucet: FaucetSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_backend")]
    pub backend: String,
    #[serde(default)]
    pub libsql_path: Option<String>,
}

fn default_database_backend() -> String {
    "libsql".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: default_database_backend(),
            libsql_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentSettings {
    /// Lifetime of intents created from inline queries.
    #[serde(default = "default_inline_ttl_secs")]
    pub inline_ttl_secs: u64,
    /// Lifetime of intents created from commands.
    #[serde(default = "default_intent_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,
}

fn default_inline_ttl_secs() -> u64 {
    300
}

fn default_intent_ttl_secs() -> u64 {
    86_400
}

impl Default for IntentSettings {
    fn default() -> Self {
        Self {
            inline_ttl_secs: default_inline_ttl_secs(),
            ttl_secs: default_intent_ttl_secs(),
            lock_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_poll_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_poll_deadline_secs() -> u64 {
    60
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            deadline_secs: default_poll_deadline_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaucetSettings {
    #[serde(default = "default_faucet_min_per_user")]
    pub min_per_user: u64,
}

fn default_faucet_min_per_user() -> u64 {
    5
}

impl Default for FaucetSettings {
    fn default() -> Self {
        Self {
            min_per_user: default_faucet_min_per_user(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

impl Settings {
    /// Default TOML config file path (~/.satsflow/config.toml).
    pub fn default_toml_path() -> PathBuf {
        crate::bootstrap::satsflow_home().join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `None` if the file doesn't exist. Returns an error only
    /// if the file exists but can't be parsed.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        let settings: Self = toml::from_str(&data)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))?;
        Ok(Some(settings))
    }

    /// Write a TOML config file with the current settings.
    pub fn save_toml(&self, path: &Path) -> Result<(), String> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize settings: {}", e))?;

        let content = format!(
            "# satsflow configuration file.\n\
             #\n\
             # Priority: env var > this file > defaults.\n\
             \n\
             {raw}"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }
        std::fs::write(path, content).map_err(|e| format!("failed to write {}: {}", path.display(), e))
    }
}
