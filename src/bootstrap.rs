//! Bootstrap helpers for satsflow.
//!
//! Bootstrap env vars are persisted to disk so the CLI and long-running
//! deployments resolve the same database before anything else loads.
//!
//! File: `~/.satsflow/.env` (standard dotenvy format)

use std::path::{Path, PathBuf};

/// Base directory for satsflow state: `~/.satsflow`.
pub fn satsflow_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".satsflow")
}

/// Path to the satsflow-specific `.env` file: `~/.satsflow/.env`.
pub fn satsflow_env_path() -> PathBuf {
    satsflow_home().join(".env")
}

/// Load env vars from `~/.satsflow/.env` (in addition to the standard `.env`).
///
/// Call this **after** `dotenvy::dotenv()` so that `./.env` takes priority.
/// dotenvy never overwrites existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.satsflow/.env`
pub fn load_satsflow_env() {
    load_env_file(&satsflow_env_path());
}

fn load_env_file(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = dotenvy::from_path(path) {
        tracing::warn!(path = %path.display(), "Failed to load env file: {}", e);
    }
}

/// Write bootstrap vars to `~/.satsflow/.env`.
///
/// Values are double-quoted so that `#` and other shell-special characters
/// survive a dotenvy round trip.
pub fn save_bootstrap_env(vars: &[(&str, &str)]) -> std::io::Result<()> {
    write_env_file(&satsflow_env_path(), vars)
}

fn write_env_file(path: &Path, vars: &[(&str, &str)]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = String::new();
    for (key, value) in vars {
        // Escape backslashes and quotes so a value cannot break out and inject another var.
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        content.push_str(&format!("{}=\"{}\"\n", key, escaped));
    }
    std::fs::write(path, content)
}
