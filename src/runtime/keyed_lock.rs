//! Per-key mutual exclusion.
//!
//! A [`KeyedLock`] hands out one async mutex per string key. Holders of
//! different keys never wait on each other; entries are created on first
//! use and dropped once nobody holds or waits for them, so the table stays
//! bounded by the number of keys in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::LockError;
use crate::runtime::CancelSignal;

#[derive(Debug, Clone, Default)]
pub struct KeyedLock {
    table: Arc<LockTable>,
}

#[derive(Debug, Default)]
struct LockTable {
    slots: Mutex<HashMap<String, Slot>>,
}

#[derive(Debug)]
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters.
    users: usize,
}

impl LockTable {
    fn claim(self: &Arc<Self>, key: &str) -> (Claim, Arc<AsyncMutex<()>>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            mutex: Arc::new(AsyncMutex::new(())),
            users: 0,
        });
        slot.users += 1;
        let claim = Claim {
            table: Arc::clone(self),
            key: key.to_string(),
        };
        (claim, Arc::clone(&slot.mutex))
    }

    fn release(&self, key: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get_mut(key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slots.remove(key);
            }
        }
    }
}

/// Registration of one holder or waiter on a slot.
#[derive(Debug)]
struct Claim {
    table: Arc<LockTable>,
    key: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.table.release(&self.key);
    }
}

/// Exclusive hold on one key. Released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
    claim: Claim,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.claim.key
    }
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free and take it.
    pub async fn acquire(&self, key: &str) -> KeyGuard {
        let (claim, mutex) = self.table.claim(key);
        let guard = mutex.lock_owned().await;
        KeyGuard {
            _guard: guard,
            claim,
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up when `signal` fires.
    ///
    /// An already-cancelled signal fails without waiting, even if the key is free.
    pub async fn acquire_with(
        &self,
        key: &str,
        signal: &CancelSignal,
    ) -> Result<KeyGuard, LockError> {
        if signal.is_cancelled() {
            return Err(LockError::Canceled {
                key: key.to_string(),
            });
        }
        tokio::select! {
            biased;
            _ = signal.cancelled() => Err(LockError::Canceled { key: key.to_string() }),
            guard = self.acquire(key) => Ok(guard),
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout`.
    pub async fn acquire_timeout(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<KeyGuard, LockError> {
        tokio::time::timeout(timeout, self.acquire(key))
            .await
            .map_err(|_| LockError::Timeout {
                key: key.to_string(),
                timeout,
            })
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.table
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let lock = KeyedLock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let lock = lock.clone();
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire("faucet:abc:30").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(lock.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let lock = KeyedLock::new();
        let _a = lock.acquire("a").await;
        let b = lock
            .acquire_timeout("b", Duration::from_millis(50))
            .await
            .expect("b is free");
        assert_eq!(b.key(), "b");
        assert_eq!(lock.len(), 2);
    }

    #[tokio::test]
    async fn entries_are_removed_after_release() {
        let lock = KeyedLock::new();
        {
            let _guard = lock.acquire("inl-send-1-10-abcde").await;
            assert_eq!(lock.len(), 1);
        }
        assert_eq!(lock.len(), 0);
    }

    #[tokio::test]
    async fn timeout_reports_key() {
        let lock = KeyedLock::new();
        let _held = lock.acquire("k").await;

        let err = lock
            .acquire_timeout("k", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { ref key, .. } if key == "k"));

        // The abandoned waiter must not pin the entry.
        drop(_held);
        assert!(lock.is_empty());
    }

    #[tokio::test]
    async fn waiter_is_woken_on_release() {
        let lock = KeyedLock::new();
        let held = lock.acquire("pay:abc").await;

        let mut waiting = tokio_test::task::spawn(lock.acquire("pay:abc"));
        tokio_test::assert_pending!(waiting.poll());
        assert_eq!(lock.len(), 1);

        drop(held);
        assert!(waiting.is_woken());
        let guard = tokio_test::assert_ready!(waiting.poll());
        assert_eq!(guard.key(), "pay:abc");
    }

    #[tokio::test]
    async fn cancelled_signal_fails_fast() {
        let lock = KeyedLock::new();
        let signal = CancelSignal::new();
        signal.cancel();

        let err = lock.acquire_with("free", &signal).await.unwrap_err();
        assert!(matches!(err, LockError::Canceled { .. }));
        assert!(lock.is_empty());
    }

    #[tokio::test]
    async fn cancel_while_waiting() {
        let lock = KeyedLock::new();
        let held = lock.acquire("k").await;
        let signal = CancelSignal::new();

        let waiter = {
            let lock = lock.clone();
            let signal = signal.clone();
            tokio::spawn(async move { lock.acquire_with("k", &signal).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(LockError::Canceled { .. })));
        drop(held);
        assert!(lock.is_empty());
    }
}
