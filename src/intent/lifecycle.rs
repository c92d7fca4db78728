use std::time::Duration;

use crate::error::{IntentError, Result};
use crate::intent::{Intent, IntentStore};
use crate::runtime::{CancelSignal, KeyGuard, KeyedLock};

/// Admission control for intent triggers.
///
/// Every trigger goes through [`admit`](Self::admit): lock the intent id,
/// load, and require `active`. The returned [`Admitted`] is the only handle
/// allowed to mutate the intent until it is dropped.
#[derive(Debug, Clone, Default)]
pub struct IntentLifecycle {
    locks: KeyedLock,
    lock_timeout: Option<Duration>,
}

impl IntentLifecycle {
    pub fn new(lock_timeout: Option<Duration>) -> Self {
        Self {
            locks: KeyedLock::new(),
            lock_timeout,
        }
    }

    pub fn locks(&self) -> &KeyedLock {
        &self.locks
    }

    pub async fn admit<T: Intent>(&self, store: &IntentStore<T>, id: &str) -> Result<Admitted<T>> {
        let guard = match self.lock_timeout {
            Some(timeout) => self.locks.acquire_timeout(id, timeout).await?,
            None => self.locks.acquire(id).await,
        };
        Self::load_active(store, id, guard).await
    }

    /// Like [`admit`](Self::admit), aborting the lock wait when `signal` fires.
    pub async fn admit_with<T: Intent>(
        &self,
        store: &IntentStore<T>,
        id: &str,
        signal: &CancelSignal,
    ) -> Result<Admitted<T>> {
        let guard = self.locks.acquire_with(id, signal).await?;
        Self::load_active(store, id, guard).await
    }

    async fn load_active<T: Intent>(
        store: &IntentStore<T>,
        id: &str,
        guard: KeyGuard,
    ) -> Result<Admitted<T>> {
        let intent = store.load(id).await.inspect_err(|e| {
            tracing::debug!(intent_id = %id, error = %e, "Trigger for unknown intent");
        })?;

        let base = intent.base();
        if !base.active {
            tracing::debug!(intent_id = %id, canceled = base.canceled, "Trigger for finished intent");
            let id = id.to_string();
            let err = if base.canceled {
                IntentError::Canceled { id }
            } else {
                IntentError::Inactive { id }
            };
            return Err(err.into());
        }

        Ok(Admitted {
            intent,
            store: store.clone(),
            _guard: guard,
        })
    }
}

/// An active intent held under its lock.
///
/// Ends in `commit`, `consume`, `cancel` or `reopen`. Dropping it without
/// calling one of them releases the lock and leaves the stored intent as it
/// was last saved.
///
/// Flows that move money save before the effect: [`reserve`](Self::reserve)
/// for single-use intents, [`checkpoint`](Self::checkpoint) with the claim
/// already recorded for multi-claim ones.
pub struct Admitted<T: Intent> {
    pub intent: T,
    store: IntentStore<T>,
    _guard: KeyGuard,
}

impl<T: Intent> Admitted<T> {
    /// Save progress and keep the intent active.
    pub async fn commit(self) -> Result<T> {
        self.store.save(&self.intent).await?;
        Ok(self.intent)
    }

    /// Mark the intent used up and save.
    pub async fn consume(mut self) -> Result<T> {
        self.store.deactivate(&mut self.intent).await?;
        Ok(self.intent)
    }

    /// Mark the intent canceled and save.
    pub async fn cancel(mut self) -> Result<T> {
        self.store.cancel(&mut self.intent).await?;
        Ok(self.intent)
    }

    /// Save progress and keep holding the lock.
    pub async fn checkpoint(&mut self) -> Result<()> {
        self.store.save(&self.intent).await
    }

    /// Save the intent, with any progress made so far, as inactive and keep
    /// holding the lock. Nothing is changed in memory if the save fails.
    pub async fn reserve(&mut self) -> Result<()> {
        self.intent.base_mut().active = false;
        if let Err(e) = self.store.save(&self.intent).await {
            self.intent.base_mut().active = true;
            return Err(e);
        }
        Ok(())
    }

    /// Mark a reserved intent active again and save.
    pub async fn reopen(mut self) -> Result<T> {
        self.intent.base_mut().active = true;
        self.store.save(&self.intent).await?;
        Ok(self.intent)
    }
}
