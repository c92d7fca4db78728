//! End-to-end tests of the intent runtime against the in-memory backend and
//! the ledger wallet:
//! - concurrent triggers on one intent pay at most once
//! - unrelated intents never wait on each other's locks
//! - faucets pay exactly capacity / per-user claims
//! - poll jobs end exactly once at their deadline
//! - intents survive a save/load cycle on libSQL unchanged
//! - transfers move exact amounts

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use tokio::time::Instant;

use satsflow::config::{Config, PollerConfig};
use satsflow::db::{Database, IntentBackend, MemoryBackend, TransactionLog};
use satsflow::error::{Error, IntentError, WalletError};
use satsflow::flows::{FaucetFlow, FlowConfig, FlowContext, InlineSend, InlineSendFlow};
use satsflow::intent::IntentStore;
use satsflow::notify::{MemoryChannel, Notifier};
use satsflow::runtime::{PollCallbacks, PollHandle, PollOutcome, PollSchedule, RetryPoller};
use satsflow::transaction::TransferMeta;
use satsflow::wallet::{
    DecodedInvoice, Invoice, LedgerWallet, PaymentRef, UserRef, WalletRef, WalletService,
};

/// Ledger wallet whose payments from selected wallets take a while.
struct SlowLedger {
    inner: LedgerWallet,
    slow: Mutex<Vec<WalletRef>>,
    delay: Duration,
}

#[async_trait]
impl WalletService for SlowLedger {
    async fn balance(&self, wallet: &WalletRef) -> Result<u64, WalletError> {
        self.inner.balance(wallet).await
    }

    async fn create_invoice(
        &self,
        wallet: &WalletRef,
        amount: u64,
        memo: &str,
    ) -> Result<Invoice, WalletError> {
        self.inner.create_invoice(wallet, amount, memo).await
    }

    async fn pay_invoice(
        &self,
        wallet: &WalletRef,
        payment_request: &str,
    ) -> Result<PaymentRef, WalletError> {
        let slow = self.slow.lock().unwrap().contains(wallet);
        if slow {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.pay_invoice(wallet, payment_request).await
    }

    async fn decode_invoice(&self, payment_request: &str) -> Result<DecodedInvoice, WalletError> {
        self.inner.decode_invoice(payment_request).await
    }

    async fn invoice_status(
        &self,
        wallet: &WalletRef,
        payment_hash: &str,
    ) -> Result<bool, WalletError> {
        self.inner.invoice_status(wallet, payment_hash).await
    }
}

struct Fixture {
    ctx: FlowContext,
    wallet: Arc<SlowLedger>,
    db: Arc<dyn Database>,
    channel: Arc<MemoryChannel>,
}

impl Fixture {
    fn new() -> Self {
        let wallet = Arc::new(SlowLedger {
            inner: LedgerWallet::new(),
            slow: Mutex::new(Vec::new()),
            delay: Duration::from_millis(500),
        });
        let db: Arc<dyn Database> = Arc::new(MemoryBackend::new());
        let channel = Arc::new(MemoryChannel::new());
        let ctx = FlowContext::new(
            db.clone(),
            wallet.clone(),
            Notifier::new(channel.clone()),
            FlowConfig::from(&Config::in_memory()),
        );
        Self {
            ctx,
            wallet,
            db,
            channel,
        }
    }

    fn user(&self, id: i64, name: &str, balance: u64) -> UserRef {
        UserRef::new(id, Some(name)).with_wallet(self.wallet.inner.open_wallet(name, balance))
    }

    fn slow_down(&self, user: &UserRef) {
        if let Some(wallet) = &user.wallet {
            self.wallet.slow.lock().unwrap().push(wallet.clone());
        }
    }

    fn balance(&self, user: &UserRef) -> u64 {
        user.wallet
            .as_ref()
            .and_then(|w| self.wallet.inner.balance_of(w))
            .unwrap_or_default()
    }
}

#[tokio::test]
async fn concurrent_accepts_pay_exactly_once() {
    let fx = Fixture::new();
    let alice = fx.user(1, "alice", 5_000);
    let flow = Arc::new(InlineSendFlow::new(fx.ctx.clone()));
    let intent = flow.create(&alice, 1_000, "", None).await.unwrap();
    let id = intent.base.id.to_string();

    let claimants: Vec<UserRef> = (2..12).map(|i| fx.user(i, &format!("u{i}"), 0)).collect();
    let results = join_all(claimants.iter().map(|claimant| {
        let flow = Arc::clone(&flow);
        let id = id.clone();
        let claimant = claimant.clone();
        tokio::spawn(async move { flow.accept(&id, &claimant).await })
    }))
    .await;

    let mut paid = 0;
    let mut consumed = 0;
    for result in results {
        match result.unwrap() {
            Ok(record) => {
                assert!(record.success);
                paid += 1;
            }
            Err(Error::Intent(IntentError::Inactive { .. })) => consumed += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((paid, consumed), (1, 9));
    assert_eq!(fx.balance(&alice), 4_000);
    assert_eq!(claimants.iter().map(|c| fx.balance(c)).sum::<u64>(), 1_000);
    assert!(!flow.get(&id).await.unwrap().base.active);

    let successes = fx
        .db
        .list_transactions(alice.id, 50)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.success)
        .count();
    assert_eq!(successes, 1);
}

#[tokio::test(start_paused = true)]
async fn slow_intent_does_not_block_unrelated_intent() {
    let fx = Fixture::new();
    let slow_sender = fx.user(1, "slow", 100);
    let fast_sender = fx.user(2, "fast", 100);
    let bob = fx.user(3, "bob", 0);
    fx.slow_down(&slow_sender);

    let flow = Arc::new(InlineSendFlow::new(fx.ctx.clone()));
    let slow_intent = flow.create(&slow_sender, 10, "", None).await.unwrap();
    let fast_intent = flow.create(&fast_sender, 10, "", None).await.unwrap();

    let started = Instant::now();
    let slow_task = {
        let flow = Arc::clone(&flow);
        let id = slow_intent.base.id.to_string();
        let bob = bob.clone();
        tokio::spawn(async move {
            flow.accept(&id, &bob).await.unwrap();
            started.elapsed()
        })
    };
    tokio::task::yield_now().await;
    flow.accept(fast_intent.base.id.as_str(), &bob).await.unwrap();
    let fast_elapsed = started.elapsed();

    let slow_elapsed = slow_task.await.unwrap();
    assert!(fast_elapsed < Duration::from_millis(100), "{fast_elapsed:?}");
    assert!(slow_elapsed >= Duration::from_millis(500), "{slow_elapsed:?}");
    assert_eq!(fx.balance(&bob), 20);
}

#[tokio::test]
async fn faucet_pays_capacity_over_per_user_claims() {
    let fx = Fixture::new();
    let owner = fx.user(1, "owner", 1_000);
    let flow = Arc::new(FaucetFlow::new(fx.ctx.clone()));
    let faucet = flow.create(&owner, 30, 10, "", false).await.unwrap();
    let id = faucet.base.id.to_string();

    let claimants: Vec<UserRef> = (2..8).map(|i| fx.user(i, &format!("c{i}"), 0)).collect();
    let results = join_all(claimants.iter().map(|claimant| {
        let flow = Arc::clone(&flow);
        let id = id.clone();
        let claimant = claimant.clone();
        tokio::spawn(async move { flow.claim(&id, &claimant).await })
    }))
    .await;

    let succeeded = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    assert_eq!(succeeded, 3);

    let stored = flow.get(&id).await.unwrap();
    assert_eq!(stored.remaining, 0);
    assert_eq!(stored.n_taken, 3);
    assert!(!stored.base.active);
    assert_eq!(fx.balance(&owner), 970);

    // A prior claimant retrying is turned away too.
    let repeat = stored.takers[0].clone();
    assert!(matches!(
        flow.claim(&id, &repeat).await,
        Err(Error::Intent(IntentError::Inactive { .. }))
    ));

    assert!(fx.channel.wait_for(7, Duration::from_secs(2)).await);
}

#[derive(Clone, Default)]
struct NeverDone {
    ticks: Arc<AtomicUsize>,
    ticks_after_deadline: Arc<AtomicUsize>,
    deadlines: Arc<AtomicUsize>,
}

#[async_trait]
impl PollCallbacks for NeverDone {
    async fn on_tick(&mut self, _job: &PollHandle) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        if self.deadlines.load(Ordering::SeqCst) > 0 {
            self.ticks_after_deadline.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn on_deadline(&mut self) {
        self.deadlines.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn poll_without_completion_ends_at_deadline_once() {
    let poller = RetryPoller::new();
    let callbacks = NeverDone::default();
    let schedule = PollSchedule::from(PollerConfig {
        interval: Duration::from_secs(5),
        deadline: Duration::from_secs(60),
    });

    let started = Instant::now();
    let start = poller.start("node-invoice:deadbeef", schedule, callbacks.clone());
    assert_eq!(start.handle().wait().await, PollOutcome::DeadlineExceeded);
    assert!(started.elapsed() >= Duration::from_secs(60));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(callbacks.deadlines.load(Ordering::SeqCst), 1);
    assert_eq!(callbacks.ticks_after_deadline.load(Ordering::SeqCst), 0);
    assert_eq!(callbacks.ticks.load(Ordering::SeqCst), 12);
    assert!(!poller.is_running("node-invoice:deadbeef"));
}

#[cfg(feature = "libsql")]
#[tokio::test]
async fn intent_round_trips_through_libsql() {
    use satsflow::db::libsql::LibSqlBackend;

    let dir = tempfile::tempdir().unwrap();
    let backend = LibSqlBackend::new_local(&dir.path().join("intents.db"))
        .await
        .unwrap();
    backend.run_migrations().await.unwrap();
    let backend: Arc<dyn IntentBackend> = Arc::new(backend);
    let store: IntentStore<InlineSend> = IntentStore::new(backend, Duration::from_secs(300));

    let fx = Fixture::new();
    let flow = InlineSendFlow::new(fx.ctx.clone());
    let alice = fx.user(1, "alice", 100);
    let bob = fx.user(2, "bob", 0).with_language("de");
    let intent = flow.create(&alice, 42, "danke", Some(&bob)).await.unwrap();

    store.save(&intent).await.unwrap();
    let loaded = store.load(intent.base.id.as_str()).await.unwrap();
    assert_eq!(loaded, intent);
}

#[tokio::test]
async fn transfers_move_exact_amounts() {
    let fx = Fixture::new();
    let alice = fx.user(1, "alice", 1_000);
    let bob = fx.user(2, "bob", 50);
    let supply = fx.wallet.inner.total_supply();

    for amount in [1, 99, 400] {
        let (before_from, before_to) = (fx.balance(&alice), fx.balance(&bob));
        let outcome = fx
            .ctx
            .executor
            .send(&alice, &bob, amount, TransferMeta::new("inline send", ""))
            .await;
        assert!(outcome.is_success());
        assert_eq!(fx.balance(&alice), before_from - amount);
        assert_eq!(fx.balance(&bob), before_to + amount);
    }
    assert_eq!(fx.wallet.inner.total_supply(), supply);

    let overdraft = fx
        .ctx
        .executor
        .send(&bob, &alice, 10_000, TransferMeta::new("inline send", ""))
        .await;
    assert!(!overdraft.is_success());
    assert_eq!(fx.balance(&bob), 550);
}
