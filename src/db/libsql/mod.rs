//! libSQL backend for the Database trait.
//!
//! Embedded SQLite-compatible storage using Turso's libSQL fork. Each intent
//! save is a single upsert statement, so a save either fully lands or leaves
//! the previous row untouched.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase};

use crate::db::libsql_migrations;
use crate::db::{Database, IntentBackend, StoredIntent, TransactionLog};
use crate::error::DatabaseError;
use crate::transaction::TransactionRecord;

/// Explicit column list for the intents table (matches positional access in `row_to_intent`).
const INTENT_COLUMNS: &str =
    "id, kind, active, canceled, payload, created_at, updated_at, expires_at";

/// libSQL database backend.
///
/// Holds the `Database` handle in an `Arc` and opens a connection per
/// operation.
pub struct LibSqlBackend {
    db: Arc<LibSqlDatabase>,
}

impl LibSqlBackend {
    /// Open (or create) a local embedded database file.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {}", e))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {}", e)))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Create a new connection to the database.
    ///
    /// Sets `PRAGMA busy_timeout = 5000` on every connection so concurrent
    /// writers wait up to 5 seconds instead of failing instantly with
    /// "database is locked".
    pub async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {}", e)))?;
        conn.query("PRAGMA busy_timeout = 5000", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to set busy_timeout: {}", e)))?;
        Ok(conn)
    }
}

// ==================== Helper functions ====================

/// Parse an ISO-8601 timestamp string from SQLite into DateTime<Utc>.
///
/// Accepts RFC 3339 (the canonical write format) and the naive
/// `YYYY-MM-DD HH:MM:SS[.f]` form SQLite's `datetime()` produces.
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ndt.and_utc());
    }
    Err(format!("unparseable timestamp: {:?}", s))
}

/// Format a DateTime<Utc> for SQLite storage (RFC 3339 with millisecond precision).
///
/// Fixed width, so stored values compare correctly as text.
pub(crate) fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Extract a text column from a libsql Row, returning empty string for NULL.
fn get_text(row: &libsql::Row, idx: i32) -> String {
    row.get::<String>(idx).unwrap_or_default()
}

/// Extract an optional text column. None for SQL NULL.
fn get_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

/// Extract an i64 column, defaulting to 0.
fn get_i64(row: &libsql::Row, idx: i32) -> i64 {
    row.get::<i64>(idx).unwrap_or(0)
}

fn get_ts(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>, DatabaseError> {
    parse_timestamp(&get_text(row, idx)).map_err(DatabaseError::Serialization)
}

fn row_to_intent(row: &libsql::Row) -> Result<StoredIntent, DatabaseError> {
    let expires_at = match get_opt_text(row, 7) {
        Some(s) if !s.is_empty() => {
            Some(parse_timestamp(&s).map_err(DatabaseError::Serialization)?)
        }
        _ => None,
    };
    Ok(StoredIntent {
        id: get_text(row, 0),
        kind: get_text(row, 1),
        active: get_i64(row, 2) != 0,
        canceled: get_i64(row, 3) != 0,
        payload: get_text(row, 4),
        created_at: get_ts(row, 5)?,
        updated_at: get_ts(row, 6)?,
        expires_at,
    })
}

fn to_sql_int(value: u64, what: &str) -> Result<i64, DatabaseError> {
    i64::try_from(value)
        .map_err(|_| DatabaseError::Serialization(format!("{what} {value} exceeds i64 range")))
}

#[async_trait]
impl IntentBackend for LibSqlBackend {
    async fn put_intent(&self, intent: &StoredIntent) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            r#"
            INSERT INTO intents (id, kind, active, canceled, payload, created_at, updated_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (id) DO UPDATE SET
                kind = excluded.kind,
                active = excluded.active,
                canceled = excluded.canceled,
                payload = excluded.payload,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at
            "#,
            libsql::params![
                intent.id.as_str(),
                intent.kind.as_str(),
                intent.active as i64,
                intent.canceled as i64,
                intent.payload.as_str(),
                fmt_ts(&intent.created_at),
                fmt_ts(&intent.updated_at),
                intent.expires_at.as_ref().map(fmt_ts),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_intent(&self, id: &str) -> Result<Option<StoredIntent>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {INTENT_COLUMNS} FROM intents WHERE id = ?1"),
                libsql::params![id],
            )
            .await?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_intent(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(e.to_string())),
        }
    }

    async fn delete_intent(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute("DELETE FROM intents WHERE id = ?1", libsql::params![id])
            .await?;
        Ok(deleted > 0)
    }

    async fn purge_expired_intents(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let conn = self.connect().await?;
        let purged = conn
            .execute(
                "DELETE FROM intents WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                libsql::params![fmt_ts(&now)],
            )
            .await?;
        Ok(purged)
    }

    async fn list_intents(&self, limit: usize) -> Result<Vec<StoredIntent>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INTENT_COLUMNS} FROM intents ORDER BY updated_at DESC LIMIT ?1"
                ),
                libsql::params![to_sql_int(limit as u64, "limit")?],
            )
            .await?;

        let mut intents = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => intents.push(row_to_intent(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(e.to_string())),
            }
        }
        Ok(intents)
    }
}

#[async_trait]
impl TransactionLog for LibSqlBackend {
    async fn record_transaction(&self, record: &TransactionRecord) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let conn = self.connect().await?;
        conn.execute(
            r#"
            INSERT INTO transactions (id, time, kind, from_user, to_user, amount, success, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            libsql::params![
                record.id.to_string(),
                fmt_ts(&record.time),
                record.kind.as_str(),
                record.from.user_id,
                record.to.as_ref().map(|to| to.user_id),
                to_sql_int(record.amount, "amount")?,
                record.success as i64,
                payload,
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_transactions(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT payload FROM transactions
                WHERE from_user = ?1 OR to_user = ?1
                ORDER BY time DESC
                LIMIT ?2
                "#,
                libsql::params![user_id, to_sql_int(limit as u64, "limit")?],
            )
            .await?;

        let mut records = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let record = serde_json::from_str(&get_text(&row, 0))
                        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
                    records.push(record);
                }
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(e.to_string())),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        // WAL mode persists in the database file: readers no longer block writers.
        conn.query("PRAGMA journal_mode=WAL", ())
            .await
            .map_err(|e| DatabaseError::Migration(format!("Failed to enable WAL mode: {}", e)))?;
        conn.execute_batch(libsql_migrations::SCHEMA)
            .await
            .map_err(|e| DatabaseError::Migration(format!("libSQL migration failed: {}", e)))?;
        Ok(())
    }
}
