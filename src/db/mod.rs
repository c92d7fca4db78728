//! Persistence for intents and the transaction audit log.
//!
//! Two backends implement [`Database`]:
//! - [`MemoryBackend`]: process-local maps, used by tests and demo runs.
//! - `LibSqlBackend` (feature `libsql`): embedded SQLite-compatible file.
//!
//! Intents are stored untyped here; [`crate::intent::IntentStore`] is the
//! typed view the flows use.

#[cfg(feature = "libsql")]
pub mod libsql;
#[cfg(feature = "libsql")]
mod libsql_migrations;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::error::DatabaseError;
use crate::transaction::TransactionRecord;

pub use memory::MemoryBackend;

/// One persisted intent, as the backends see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredIntent {
    pub id: String,
    /// Intent kind tag, e.g. `inline_send`.
    pub kind: String,
    pub active: bool,
    pub canceled: bool,
    /// JSON encoding of the full typed intent.
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredIntent {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[async_trait]
pub trait IntentBackend: Send + Sync {
    /// Insert or fully replace the record under `intent.id`.
    async fn put_intent(&self, intent: &StoredIntent) -> Result<(), DatabaseError>;

    /// Fetch a record, including expired ones. Callers decide how to treat expiry.
    async fn get_intent(&self, id: &str) -> Result<Option<StoredIntent>, DatabaseError>;

    async fn delete_intent(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Delete every record whose expiry is at or before `now`.
    async fn purge_expired_intents(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;

    /// Most recently updated records first.
    async fn list_intents(&self, limit: usize) -> Result<Vec<StoredIntent>, DatabaseError>;
}

#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn record_transaction(&self, record: &TransactionRecord) -> Result<(), DatabaseError>;

    /// Records where `user_id` is sender or recipient, newest first.
    async fn list_transactions(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, DatabaseError>;
}

#[async_trait]
pub trait Database: IntentBackend + TransactionLog {
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

/// Open the configured backend and bring its schema up to date.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Database>, DatabaseError> {
    let db: Arc<dyn Database> = match config.backend {
        DatabaseBackend::Memory => Arc::new(MemoryBackend::new()),
        #[cfg(feature = "libsql")]
        DatabaseBackend::LibSql => {
            Arc::new(self::libsql::LibSqlBackend::new_local(&config.libsql_path).await?)
        }
        #[cfg(not(feature = "libsql"))]
        DatabaseBackend::LibSql => {
            return Err(DatabaseError::Pool(
                "libsql backend requested but satsflow was built without the `libsql` feature"
                    .to_string(),
            ));
        }
    };
    db.run_migrations().await?;
    tracing::debug!(backend = config.backend.as_str(), "Database ready");
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_memory_backend() {
        let db = connect(&DatabaseConfig::memory()).await.unwrap();
        assert!(db.get_intent("missing").await.unwrap().is_none());
        assert!(db.list_intents(10).await.unwrap().is_empty());
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let intent = StoredIntent {
            id: "pay:1-10-abcde".to_string(),
            kind: "pay".to_string(),
            active: true,
            canceled: false,
            payload: "{}".to_string(),
            created_at: now,
            updated_at: now,
            expires_at: Some(now),
        };
        assert!(intent.is_expired(now));
        assert!(!StoredIntent {
            expires_at: None,
            ..intent
        }
        .is_expired(now));
    }
}
