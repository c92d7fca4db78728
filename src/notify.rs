//! Fire-and-forget user notifications.
//!
//! Flows hand [`Notice`]s to a [`Notifier`] after releasing their intent
//! lock. Delivery runs on its own task; failures are logged and never
//! reach the flow that produced the notice.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::NotifyError;
use crate::wallet::UserRef;

/// What a user is told. Rendering into chat text belongs to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    PaymentSent {
        to: String,
        amount: u64,
    },
    PaymentReceived {
        from: String,
        amount: u64,
        memo: Option<String>,
    },
    PaymentFailed {
        intent_id: String,
        reason: String,
    },
    /// The payer has to settle an invoice to complete a receive request.
    InvoiceIssued {
        intent_id: String,
        payment_request: String,
        amount: u64,
    },
    InvoicePaid {
        amount: u64,
        payment_hash: String,
    },
    /// LNURL success action returned with a paid invoice.
    SuccessAction {
        message: String,
    },
    /// Sent to the owner when a faucet runs dry.
    FaucetSummary {
        faucet_id: String,
        memo: String,
        capacity: u64,
        remaining: u64,
        takers: Vec<String>,
    },
    LoginSucceeded {
        domain: String,
    },
    LoginFailed {
        domain: String,
        reason: String,
    },
    /// An LNURL-withdraw service accepted the user's invoice.
    WithdrawRequested {
        domain: String,
        amount: u64,
    },
    WithdrawFailed {
        domain: String,
        reason: String,
    },
    InvoiceSettled {
        payment_hash: String,
        amount: u64,
    },
    InvoiceNotSettled {
        payment_hash: String,
        can_recheck: bool,
    },
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, user: &UserRef, notice: &Notice) -> Result<(), NotifyError>;
}

/// Dispatches notices without blocking the caller.
#[derive(Clone)]
pub struct Notifier {
    channel: Arc<dyn NotificationChannel>,
}

impl Notifier {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self { channel }
    }

    /// Deliver on a background task. Must be called from within a tokio runtime.
    pub fn notify(&self, user: &UserRef, notice: Notice) {
        let channel = Arc::clone(&self.channel);
        let user = user.clone();
        tokio::spawn(async move {
            if let Err(e) = channel.notify(&user, &notice).await {
                tracing::warn!(user_id = user.id, error = %e, "Notification delivery failed");
            }
        });
    }
}

/// Writes notices to the log. Used when no chat transport is attached.
#[derive(Debug, Default)]
pub struct TracingChannel;

#[async_trait]
impl NotificationChannel for TracingChannel {
    async fn notify(&self, user: &UserRef, notice: &Notice) -> Result<(), NotifyError> {
        let rendered = serde_json::to_string(notice).map_err(|e| NotifyError::DeliveryFailed {
            user: user.display(),
            reason: e.to_string(),
        })?;
        tracing::info!(user = %user.display(), notice = %rendered, "Notice");
        Ok(())
    }
}

/// Keeps every delivered notice in memory.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    delivered: Mutex<Vec<(i64, Notice)>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<(i64, Notice)> {
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Notices delivered to `user_id`, in delivery order.
    pub fn for_user(&self, user_id: i64) -> Vec<Notice> {
        self.delivered()
            .into_iter()
            .filter(|(id, _)| *id == user_id)
            .map(|(_, notice)| notice)
            .collect()
    }

    /// Wait until at least `count` notices have been delivered.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.delivered().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl NotificationChannel for MemoryChannel {
    async fn notify(&self, user: &UserRef, notice: &Notice) -> Result<(), NotifyError> {
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((user.id, notice.clone()));
        Ok(())
    }
}
