//! Command flows built on the intent lifecycle.
//!
//! Each flow owns one intent type. Creation persists the intent; every
//! later trigger goes through [`IntentLifecycle::admit`] and validates while
//! holding the intent's lock. Before any money moves the intent is saved as
//! inactive ([`Admitted::reserve`]); a failure that allows a retry reopens
//! it. Users are notified only after the lock is released.

mod faucet;
mod inline_receive;
mod inline_send;
mod lnurl_auth;
mod lnurl_pay;
mod lnurl_withdraw;
mod node_proxy;
mod pay;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, FaucetConfig, IntentConfig, PollerConfig};
use crate::db::{Database, IntentBackend};
use crate::error::{Error, IntentError, Result, TransactionError};
use crate::intent::{Admitted, Intent, IntentLifecycle, IntentStore};
use crate::notify::Notifier;
use crate::runtime::RetryPoller;
use crate::transaction::TransactionExecutor;
use crate::wallet::{UserRef, WalletRef, WalletService};

pub use faucet::{ClaimReceipt, Faucet, FaucetFlow, FaucetSummary};
pub use inline_receive::{InlineReceive, InlineReceiveFlow, ReceiveOutcome};
pub use inline_send::{InlineSend, InlineSendFlow};
pub use lnurl_auth::{LnurlAuthFlow, LnurlAuthParams, LnurlAuthState, LnurlAuthenticator};
pub use lnurl_pay::{
    LnurlPayFlow, LnurlPayParams, LnurlPayState, LnurlPayValues, LnurlResolver,
};
pub use lnurl_withdraw::{
    LnurlWithdrawFlow, LnurlWithdrawParams, LnurlWithdrawState, LnurlWithdrawer,
};
pub use node_proxy::{NodeBackend, NodeInvoice, NodeProxyFlow, NodeRef, ProxyPay, ProxyReceipt};
pub use pay::{PayFlow, PayIntent, PayQuote};

/// The slice of [`Config`] the flows read.
#[derive(Debug, Clone, Default)]
pub struct FlowConfig {
    pub intents: IntentConfig,
    pub poller: PollerConfig,
    pub faucet: FaucetConfig,
}

impl From<&Config> for FlowConfig {
    fn from(config: &Config) -> Self {
        Self {
            intents: config.intents.clone(),
            poller: config.poller,
            faucet: config.faucet,
        }
    }
}

/// Collaborators shared by every flow. Cheap to clone.
#[derive(Clone)]
pub struct FlowContext {
    pub db: Arc<dyn Database>,
    pub wallet: Arc<dyn WalletService>,
    pub executor: TransactionExecutor,
    pub notifier: Notifier,
    pub lifecycle: IntentLifecycle,
    pub poller: RetryPoller,
    pub config: FlowConfig,
}

impl FlowContext {
    pub fn new(
        db: Arc<dyn Database>,
        wallet: Arc<dyn WalletService>,
        notifier: Notifier,
        config: FlowConfig,
    ) -> Self {
        Self {
            executor: TransactionExecutor::new(Arc::clone(&wallet), Arc::clone(&db)),
            lifecycle: IntentLifecycle::new(config.intents.lock_timeout),
            poller: RetryPoller::new(),
            db,
            wallet,
            notifier,
            config,
        }
    }

    pub(crate) fn store<T: Intent>(&self, ttl: Duration) -> IntentStore<T> {
        let backend: Arc<dyn IntentBackend> = self.db.clone();
        IntentStore::new(backend, ttl)
    }

    /// Fail with `InsufficientBalance` unless `user` holds at least `amount` right now.
    pub(crate) async fn require_balance(&self, user: &UserRef, amount: u64) -> Result<u64> {
        let available = self.executor.balance_of(user).await?;
        if available < amount {
            return Err(TransactionError::InsufficientBalance {
                available,
                required: amount,
            }
            .into());
        }
        Ok(available)
    }
}

pub(crate) fn require_wallet(user: &UserRef) -> Result<&WalletRef> {
    user.wallet.as_ref().ok_or_else(|| {
        IntentError::NoWallet {
            user: user.display(),
        }
        .into()
    })
}

pub(crate) fn require_owner(id: &str, owner: &UserRef, by: &UserRef) -> Result<()> {
    if owner.id != by.id {
        return Err(IntentError::NotOwner {
            id: id.to_string(),
            user: by.display(),
        }
        .into());
    }
    Ok(())
}

/// Reopen a reserved intent after a failure that permits a retry.
///
/// Returns `cause`; a failed save is logged and leaves the intent inactive.
pub(crate) async fn reopen_after<T: Intent>(admitted: Admitted<T>, cause: impl Into<Error>) -> Error {
    let id = admitted.intent.id().to_string();
    if let Err(e) = admitted.reopen().await {
        tracing::error!(intent_id = %id, error = %e, "Could not reopen intent after failed payment");
    }
    cause.into()
}

/// Convert sats to millisats, rejecting amounts that do not fit.
pub(crate) fn to_msat(amount: u64) -> Result<u64> {
    amount.checked_mul(1000).ok_or_else(|| {
        IntentError::InvalidAmount {
            reason: format!("{amount} sat is too large"),
        }
        .into()
    })
}

pub(crate) fn require_positive(amount: u64) -> Result<()> {
    if amount == 0 {
        return Err(IntentError::InvalidAmount {
            reason: "amount must be greater than zero".to_string(),
        }
        .into());
    }
    Ok(())
}
