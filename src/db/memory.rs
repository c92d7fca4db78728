//! In-memory backend.
//!
//! Data is lost on restart and expired intents stay in the map until
//! [`IntentBackend::purge_expired_intents`] runs. Reads still honor expiry
//! through [`crate::intent::IntentStore`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::db::{Database, IntentBackend, StoredIntent, TransactionLog};
use crate::error::DatabaseError;
use crate::transaction::TransactionRecord;

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    intents: Arc<RwLock<HashMap<String, StoredIntent>>>,
    transactions: Arc<RwLock<Vec<TransactionRecord>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentBackend for MemoryBackend {
    async fn put_intent(&self, intent: &StoredIntent) -> Result<(), DatabaseError> {
        self.intents
            .write()
            .await
            .insert(intent.id.clone(), intent.clone());
        Ok(())
    }

    async fn get_intent(&self, id: &str) -> Result<Option<StoredIntent>, DatabaseError> {
        Ok(self.intents.read().await.get(id).cloned())
    }

    async fn delete_intent(&self, id: &str) -> Result<bool, DatabaseError> {
        Ok(self.intents.write().await.remove(id).is_some())
    }

    async fn purge_expired_intents(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut intents = self.intents.write().await;
        let before = intents.len();
        intents.retain(|_, intent| !intent.is_expired(now));
        Ok((before - intents.len()) as u64)
    }

    async fn list_intents(&self, limit: usize) -> Result<Vec<StoredIntent>, DatabaseError> {
        let intents = self.intents.read().await;
        let mut all: Vec<_> = intents.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit);
        Ok(all)
    }
}

#[async_trait]
impl TransactionLog for MemoryBackend {
    async fn record_transaction(&self, record: &TransactionRecord) -> Result<(), DatabaseError> {
        self.transactions.write().await.push(record.clone());
        Ok(())
    }

    async fn list_transactions(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, DatabaseError> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .iter()
            .rev()
            .filter(|record| record.involves(user_id))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Database for MemoryBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stored(id: &str, expires_in: Option<i64>) -> StoredIntent {
        let now = Utc::now();
        StoredIntent {
            id: id.to_string(),
            kind: "faucet".to_string(),
            active: true,
            canceled: false,
            payload: "{}".to_string(),
            created_at: now,
            updated_at: now,
            expires_at: expires_in.map(|secs| now + Duration::seconds(secs)),
        }
    }

    #[tokio::test]
    async fn put_replaces_existing() {
        let backend = MemoryBackend::new();
        let mut intent = stored("faucet:abc:30", Some(60));
        backend.put_intent(&intent).await.unwrap();

        intent.active = false;
        backend.put_intent(&intent).await.unwrap();

        let loaded = backend.get_intent("faucet:abc:30").await.unwrap().unwrap();
        assert!(!loaded.active);
        assert_eq!(backend.list_intents(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let backend = MemoryBackend::new();
        backend.put_intent(&stored("old", Some(-5))).await.unwrap();
        backend.put_intent(&stored("fresh", Some(60))).await.unwrap();
        backend.put_intent(&stored("forever", None)).await.unwrap();

        let purged = backend.purge_expired_intents(Utc::now()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(backend.get_intent("old").await.unwrap().is_none());
        assert!(backend.get_intent("fresh").await.unwrap().is_some());
        assert!(backend.delete_intent("forever").await.unwrap());
        assert!(!backend.delete_intent("forever").await.unwrap());
    }
}
