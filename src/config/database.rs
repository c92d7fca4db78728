use std::path::PathBuf;

use crate::config::helpers::{normalize_variant, optional_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Which persistence backend holds intents and transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Memory,
    LibSql,
}

impl DatabaseBackend {
    pub(crate) fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match normalize_variant(value).as_str() {
            "memory" | "in_memory" => Ok(Self::Memory),
            "libsql" | "turso" | "sqlite" => Ok(Self::LibSql),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'memory' or 'libsql', got '{value}'"),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::LibSql => "libsql",
        }
    }
}

/// Database connection config.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub libsql_path: PathBuf,
}

impl DatabaseConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let backend = DatabaseBackend::parse(
            &optional_env("SATSFLOW_DATABASE_BACKEND")?
                .unwrap_or_else(|| settings.database.backend.clone()),
            "SATSFLOW_DATABASE_BACKEND",
        )?;

        let libsql_path = optional_env("LIBSQL_PATH")?
            .or_else(|| settings.database.libsql_path.clone())
            .map(PathBuf::from)
            .unwrap_or_else(default_libsql_path);

        Ok(Self {
            backend,
            libsql_path,
        })
    }

    /// In-memory config, used by tests and the benchmark harness.
    pub fn memory() -> Self {
        Self {
            backend: DatabaseBackend::Memory,
            libsql_path: default_libsql_path(),
        }
    }
}

/// Default libSQL database path (~/.satsflow/satsflow.db).
pub fn default_libsql_path() -> PathBuf {
    crate::bootstrap::satsflow_home().join("satsflow.db")
}
