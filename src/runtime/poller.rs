//! Cancellable fixed-interval polling.
//!
//! [`RetryPoller`] runs a job's `on_tick` immediately and then once per
//! interval until the job is cancelled (by a tick, or externally by key) or
//! its deadline passes. Exactly one of `on_cancel` / `on_deadline` runs at
//! the end, and no tick runs after it. At most one job per key is live.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::PollerConfig;

/// Hooks driven by a poll job.
///
/// `on_tick` may call [`PollHandle::cancel`] on the handle it receives to end
/// the job once the awaited condition holds.
#[async_trait]
pub trait PollCallbacks: Send + 'static {
    async fn on_tick(&mut self, job: &PollHandle);

    async fn on_cancel(&mut self) {}

    async fn on_deadline(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    /// Measured from the moment the job is started (or reused).
    pub deadline: Duration,
}

impl From<PollerConfig> for PollSchedule {
    fn from(config: PollerConfig) -> Self {
        Self {
            interval: config.interval,
            deadline: config.deadline,
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Canceled,
    DeadlineExceeded,
}

#[derive(Debug, Clone, Copy)]
struct PollControl {
    cancelled: bool,
    deadline: Instant,
}

/// Handle to a live or finished poll job.
#[derive(Debug, Clone)]
pub struct PollHandle {
    key: Arc<str>,
    id: u64,
    control: Arc<watch::Sender<PollControl>>,
    done: watch::Receiver<Option<PollOutcome>>,
}

impl PollHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Request cancellation. An in-flight tick finishes first.
    pub fn cancel(&self) {
        self.control.send_modify(|control| control.cancelled = true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.borrow().cancelled
    }

    pub fn outcome(&self) -> Option<PollOutcome> {
        *self.done.borrow()
    }

    /// Wait for the job to finish and its terminal callback to return.
    pub async fn wait(&self) -> PollOutcome {
        let mut done = self.done.clone();
        loop {
            if let Some(outcome) = *done.borrow_and_update() {
                return outcome;
            }
            if done.changed().await.is_err() {
                return (*done.borrow()).unwrap_or(PollOutcome::Canceled);
            }
        }
    }

    fn reset_deadline(&self, deadline: Instant) {
        self.control.send_modify(|control| control.deadline = deadline);
    }
}

/// Result of [`RetryPoller::start`].
#[derive(Debug, Clone)]
pub enum PollStart {
    Started(PollHandle),
    /// A job was already live for the key; its deadline was reset and the
    /// new callbacks were dropped.
    Reused(PollHandle),
}

impl PollStart {
    pub fn handle(&self) -> &PollHandle {
        match self {
            Self::Started(handle) | Self::Reused(handle) => handle,
        }
    }

    pub fn is_reused(&self) -> bool {
        matches!(self, Self::Reused(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryPoller {
    jobs: Arc<Mutex<HashMap<String, PollHandle>>>,
    next_id: Arc<AtomicU64>,
}

impl RetryPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling under `key`, or reset the deadline of the live job for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<C: PollCallbacks>(
        &self,
        key: impl Into<String>,
        schedule: PollSchedule,
        callbacks: C,
    ) -> PollStart {
        let key = key.into();
        let deadline = Instant::now() + schedule.deadline;

        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = jobs.get(&key) {
            if !existing.is_cancelled() {
                existing.reset_deadline(deadline);
                tracing::debug!(poll_key = %key, "Reusing live poll job");
                return PollStart::Reused(existing.clone());
            }
        }

        let (control_tx, control_rx) = watch::channel(PollControl {
            cancelled: false,
            deadline,
        });
        let (done_tx, done_rx) = watch::channel(None);
        let handle = PollHandle {
            key: Arc::from(key.as_str()),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            control: Arc::new(control_tx),
            done: done_rx,
        };
        jobs.insert(key.clone(), handle.clone());
        drop(jobs);

        tracing::debug!(poll_key = %key, interval = ?schedule.interval, deadline = ?schedule.deadline, "Starting poll job");
        let interval = schedule.interval.max(Duration::from_millis(1));
        tokio::spawn(run_job(
            self.clone(),
            handle.clone(),
            control_rx,
            callbacks,
            interval,
            done_tx,
        ));
        PollStart::Started(handle)
    }

    /// Cancel the live job for `key`. Returns `false` if there is none.
    pub fn cancel(&self, key: &str) -> bool {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match jobs.get(key) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Decide whether `job` is over. Runs under the registry lock so a
    /// concurrent [`start`](Self::start) either resets the deadline first or
    /// finds the key free.
    fn settle(&self, job: &PollHandle) -> Option<PollOutcome> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let control = *job.control.borrow();
        let outcome = if control.cancelled {
            PollOutcome::Canceled
        } else if Instant::now() >= control.deadline {
            PollOutcome::DeadlineExceeded
        } else {
            return None;
        };
        if jobs.get(job.key()).is_some_and(|live| live.id == job.id) {
            jobs.remove(job.key());
        }
        Some(outcome)
    }
}

async fn run_job<C: PollCallbacks>(
    poller: RetryPoller,
    job: PollHandle,
    mut control_rx: watch::Receiver<PollControl>,
    mut callbacks: C,
    interval: Duration,
    done_tx: watch::Sender<Option<PollOutcome>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        let control = *control_rx.borrow_and_update();
        if control.cancelled {
            if let Some(outcome) = poller.settle(&job) {
                break outcome;
            }
        }

        tokio::select! {
            biased;
            changed = control_rx.changed() => {
                if changed.is_err() {
                    break poller.settle(&job).unwrap_or(PollOutcome::Canceled);
                }
            }
            _ = tokio::time::sleep_until(control.deadline) => {
                if let Some(outcome) = poller.settle(&job) {
                    break outcome;
                }
            }
            _ = ticker.tick() => {
                tracing::debug!(poll_key = %job.key(), "Poll tick");
                callbacks.on_tick(&job).await;
            }
        }
    };

    match outcome {
        PollOutcome::Canceled => callbacks.on_cancel().await,
        PollOutcome::DeadlineExceeded => {
            tracing::debug!(poll_key = %job.key(), "Poll deadline exceeded");
            callbacks.on_deadline().await
        }
    }
    let _ = done_tx.send(Some(outcome));
}
