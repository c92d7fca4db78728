//! `satsflow doctor` - configuration and storage diagnostics.
//!
//! Each check reports pass/fail with enough detail to fix the problem
//! before the runtime is started.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use crate::config::{Config, DatabaseBackend};
use crate::db::{Database, IntentBackend, StoredIntent};
use crate::error::ConfigError;
use crate::settings::Settings;

const PROBE_ID: &str = "doctor:probe";

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(
    config: Result<Config, ConfigError>,
    toml_path: Option<PathBuf>,
    strict: bool,
) -> anyhow::Result<()> {
    println!("satsflow doctor");
    println!("===============\n");

    let mut tally = Tally::default();

    tally.check("Config file", check_config_file(toml_path));
    tally.check("Configuration", check_config(&config));

    match &config {
        Ok(config) => match open_database(config).await {
            Ok(db) => {
                tally.check("Database", CheckResult::Pass(describe_database(config)));
                tally.check("Intent storage", check_intent_roundtrip(&db).await);
            }
            Err(detail) => {
                tally.check("Database", CheckResult::Fail(detail));
                tally.check(
                    "Intent storage",
                    CheckResult::Skip("database unavailable".to_string()),
                );
            }
        },
        Err(_) => tally.check(
            "Database",
            CheckResult::Skip("configuration invalid".to_string()),
        ),
    }

    println!();
    println!("  {} passed, {} failed", tally.passed, tally.failed);

    if tally.failed > 0 && strict {
        anyhow::bail!("doctor strict mode failed with {} check(s)", tally.failed);
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Tally {
    passed: u32,
    failed: u32,
}

impl Tally {
    fn check(&mut self, name: &str, result: CheckResult) {
        match &result {
            CheckResult::Pass(_) => self.passed += 1,
            CheckResult::Fail(_) => self.failed += 1,
            CheckResult::Skip(_) => {}
        }
        println!("  {}", format_result(name, &result));
    }
}

#[derive(Debug)]
enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn format_result(name: &str, result: &CheckResult) -> String {
    match result {
        CheckResult::Pass(detail) => format!("[pass] {name}: {detail}"),
        CheckResult::Fail(detail) => format!("[FAIL] {name}: {detail}"),
        CheckResult::Skip(reason) => format!("[skip] {name}: {reason}"),
    }
}

fn check_config_file(explicit: Option<PathBuf>) -> CheckResult {
    let path = explicit.unwrap_or_else(Settings::default_toml_path);
    match Settings::load_toml(&path) {
        Ok(Some(_)) => CheckResult::Pass(format!("loaded {}", path.display())),
        Ok(None) => CheckResult::Skip(format!(
            "{} not found, using env and defaults (`satsflow init` writes one)",
            path.display()
        )),
        Err(e) => CheckResult::Fail(e),
    }
}

fn check_config(config: &Result<Config, ConfigError>) -> CheckResult {
    match config {
        Ok(config) => CheckResult::Pass(format!(
            "inline TTL {}s, intent TTL {}s, poll every {}s for {}s, faucet min {} sat",
            config.intents.inline_ttl.as_secs(),
            config.intents.ttl.as_secs(),
            config.poller.interval.as_secs(),
            config.poller.deadline.as_secs(),
            config.faucet.min_per_user,
        )),
        Err(e) => CheckResult::Fail(e.to_string()),
    }
}

fn describe_database(config: &Config) -> String {
    match config.database.backend {
        DatabaseBackend::Memory => "in-memory (nothing survives a restart)".to_string(),
        DatabaseBackend::LibSql => format!(
            "libSQL at {}, migrations applied",
            config.database.libsql_path.display()
        ),
    }
}

async fn open_database(config: &Config) -> Result<Arc<dyn Database>, String> {
    if config.database.backend == DatabaseBackend::LibSql {
        if let Some(parent) = config.database.libsql_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
        }
    }
    crate::db::connect(&config.database)
        .await
        .map_err(|e| e.to_string())
}

/// Write, read back and delete a throwaway record.
async fn check_intent_roundtrip(db: &Arc<dyn Database>) -> CheckResult {
    let now = Utc::now();
    let probe = StoredIntent {
        id: PROBE_ID.to_string(),
        kind: "doctor".to_string(),
        active: true,
        canceled: false,
        payload: "{}".to_string(),
        created_at: now,
        updated_at: now,
        expires_at: Some(now + ChronoDuration::minutes(1)),
    };

    if let Err(e) = db.put_intent(&probe).await {
        return CheckResult::Fail(format!("write failed: {e}"));
    }
    let read = db.get_intent(PROBE_ID).await;
    let deleted = db.delete_intent(PROBE_ID).await;
    match (read, deleted) {
        (Ok(Some(found)), Ok(true)) if found.id == PROBE_ID => {
            CheckResult::Pass("write, read and delete succeeded".to_string())
        }
        (Ok(_), Ok(_)) => CheckResult::Fail("probe record did not round-trip".to_string()),
        (Err(e), _) | (_, Err(e)) => CheckResult::Fail(e.to_string()),
    }
}
