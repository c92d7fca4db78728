use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::db::{IntentBackend, StoredIntent};
use crate::error::{IntentError, Result};
use crate::intent::Intent;

/// Typed view over an [`IntentBackend`] for one intent type.
///
/// Saving does not take the intent's lock; every caller that mutates a
/// loaded intent must hold it (see [`crate::intent::IntentLifecycle`]).
pub struct IntentStore<T> {
    backend: Arc<dyn IntentBackend>,
    ttl: Duration,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Clone for IntentStore<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            ttl: self.ttl,
            _kind: PhantomData,
        }
    }
}

impl<T: Intent> IntentStore<T> {
    /// `ttl` is counted from the intent's creation time.
    pub fn new(backend: Arc<dyn IntentBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            _kind: PhantomData,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Write `intent` under its id, replacing any previous value.
    pub async fn save(&self, intent: &T) -> Result<()> {
        let payload =
            serde_json::to_string(intent).map_err(|e| IntentError::Payload(e.to_string()))?;
        let base = intent.base();
        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| base.created_at.checked_add_signed(ttl));

        let record = StoredIntent {
            id: base.id.to_string(),
            kind: T::KIND.as_str().to_string(),
            active: base.active,
            canceled: base.canceled,
            payload,
            created_at: base.created_at,
            updated_at: Utc::now(),
            expires_at,
        };
        self.backend.put_intent(&record).await?;
        Ok(())
    }

    /// Fails with `NotFound` when the id is unknown, expired, or holds another kind.
    pub async fn load(&self, id: &str) -> Result<T> {
        let not_found = || IntentError::NotFound { id: id.to_string() };

        let record = self.backend.get_intent(id).await?.ok_or_else(not_found)?;
        if record.kind != T::KIND.as_str() || record.is_expired(Utc::now()) {
            return Err(not_found().into());
        }

        let mut intent: T = serde_json::from_str(&record.payload)
            .map_err(|e| IntentError::Payload(format!("{id}: {e}")))?;
        // Row flags are authoritative.
        let base = intent.base_mut();
        base.active = record.active;
        base.canceled = record.canceled;
        Ok(intent)
    }

    /// Mark inactive and save.
    pub async fn deactivate(&self, intent: &mut T) -> Result<()> {
        intent.base_mut().active = false;
        self.save(intent).await
    }

    /// Mark inactive and canceled, then save.
    pub async fn cancel(&self, intent: &mut T) -> Result<()> {
        let base = intent.base_mut();
        base.active = false;
        base.canceled = true;
        self.save(intent).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.backend.delete_intent(id).await?)
    }
}
