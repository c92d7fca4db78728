//! LNURL-withdraw: a service pays out to the user by settling an invoice the
//! user's wallet issues once the user has confirmed the amount.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, ExternalError, IntentError, Result};
use crate::flows::{
    FlowContext, reopen_after, require_owner, require_positive, require_wallet, to_msat,
};
use crate::intent::{Intent, IntentBase, IntentId, IntentKind, IntentStore};
use crate::notify::Notice;
use crate::wallet::{Invoice, UserRef};

/// Withdraw parameters as served by an LNURL-withdraw endpoint. Amounts are in msat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlWithdrawParams {
    pub callback: Url,
    pub k1: String,
    pub min_withdrawable: u64,
    pub max_withdrawable: u64,
    #[serde(default)]
    pub default_description: String,
}

impl LnurlWithdrawParams {
    pub fn domain(&self) -> &str {
        self.callback.host_str().unwrap_or_default()
    }

    /// Amount fixed by the service, if it offers exactly one.
    fn fixed_amount(&self) -> Option<u64> {
        (self.max_withdrawable > 0 && self.min_withdrawable == self.max_withdrawable)
            .then(|| self.max_withdrawable / 1000)
    }

    fn check_amount(&self, amount: u64) -> Result<()> {
        require_positive(amount)?;
        let msat = to_msat(amount)?;
        if msat < self.min_withdrawable || msat > self.max_withdrawable {
            return Err(IntentError::InvalidAmount {
                reason: format!(
                    "amount must be between {} and {} sat",
                    self.min_withdrawable.div_ceil(1000),
                    self.max_withdrawable / 1000
                ),
            }
            .into());
        }
        Ok(())
    }

    fn memo(&self) -> String {
        if self.default_description.is_empty() {
            format!("Withdraw from {}", self.domain())
        } else {
            self.default_description.clone()
        }
    }
}

/// Hands an invoice to the service's callback together with `k1`.
#[async_trait]
pub trait LnurlWithdrawer: Send + Sync {
    async fn submit_invoice(
        &self,
        params: &LnurlWithdrawParams,
        payment_request: &str,
    ) -> std::result::Result<(), ExternalError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlWithdrawState {
    pub base: IntentBase,
    pub from: UserRef,
    pub params: LnurlWithdrawParams,
    /// Sats; unset until the user picks one.
    pub amount: Option<u64>,
    /// Issued on confirmation.
    pub invoice: Option<Invoice>,
}

impl Intent for LnurlWithdrawState {
    const KIND: IntentKind = IntentKind::LnurlWithdraw;

    fn base(&self) -> &IntentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IntentBase {
        &mut self.base
    }
}

pub struct LnurlWithdrawFlow {
    ctx: FlowContext,
    store: IntentStore<LnurlWithdrawState>,
    withdrawer: Arc<dyn LnurlWithdrawer>,
}

impl LnurlWithdrawFlow {
    pub fn new(ctx: FlowContext, withdrawer: Arc<dyn LnurlWithdrawer>) -> Self {
        let store = ctx.store(ctx.config.intents.ttl);
        Self {
            ctx,
            store,
            withdrawer,
        }
    }

    pub async fn create(
        &self,
        from: &UserRef,
        params: LnurlWithdrawParams,
        amount: Option<u64>,
    ) -> Result<LnurlWithdrawState> {
        require_wallet(from)?;
        if params.max_withdrawable < params.min_withdrawable || params.max_withdrawable < 1000 {
            return Err(IntentError::InvalidAmount {
                reason: format!("{} offers nothing to withdraw", params.domain()),
            }
            .into());
        }
        let amount = params.fixed_amount().or(amount);
        if let Some(amount) = amount {
            params.check_amount(amount)?;
        }

        let state = LnurlWithdrawState {
            base: IntentBase::new(IntentId::generate(
                IntentKind::LnurlWithdraw,
                from.id,
                amount.unwrap_or_default(),
            )),
            from: from.clone(),
            params,
            amount,
            invoice: None,
        };
        self.store.save(&state).await?;
        tracing::info!(
            intent_id = %state.base.id,
            domain = state.params.domain(),
            amount = ?state.amount,
            "LNURL-withdraw started"
        );
        Ok(state)
    }

    pub async fn get(&self, id: &str) -> Result<LnurlWithdrawState> {
        self.store.load(id).await
    }

    pub async fn set_amount(
        &self,
        id: &str,
        by: &UserRef,
        amount: u64,
    ) -> Result<LnurlWithdrawState> {
        let mut admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        require_owner(id, &admitted.intent.from, by)?;
        admitted.intent.params.check_amount(amount)?;
        admitted.intent.amount = Some(amount);
        admitted.commit().await
    }

    /// Issue an invoice on the user's wallet and submit it to the service.
    ///
    /// An invoice the wallet refuses to issue leaves the intent open. Once an
    /// invoice exists the callback is tried at most once.
    pub async fn confirm(&self, id: &str, by: &UserRef) -> Result<Invoice> {
        let mut admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        let state = &admitted.intent;
        require_owner(id, &state.from, by)?;
        let amount = state.amount.ok_or_else(|| IntentError::InvalidAmount {
            reason: "no amount chosen".to_string(),
        })?;
        let wallet = require_wallet(&state.from)?.clone();
        let memo = state.params.memo();
        admitted.reserve().await?;

        let invoice = match self.ctx.wallet.create_invoice(&wallet, amount, &memo).await {
            Ok(invoice) => invoice,
            Err(e) => {
                tracing::warn!(intent_id = %id, error = %e, "Could not create withdraw invoice");
                return Err(reopen_after(admitted, e).await);
            }
        };
        admitted.intent.invoice = Some(invoice.clone());
        if let Err(e) = admitted.checkpoint().await {
            tracing::warn!(intent_id = %id, error = %e, "Could not record withdraw invoice");
        }

        let state = admitted.intent.clone();
        let submitted = self
            .withdrawer
            .submit_invoice(&state.params, &invoice.payment_request)
            .await;
        drop(admitted);
        let domain = state.params.domain().to_string();

        match submitted {
            Ok(()) => {
                tracing::info!(intent_id = %id, domain = %domain, amount, "Withdraw requested");
                self.ctx
                    .notifier
                    .notify(&state.from, Notice::WithdrawRequested { domain, amount });
                Ok(invoice)
            }
            Err(e) => {
                tracing::warn!(intent_id = %id, domain = %domain, error = %e, "Withdraw callback failed");
                self.ctx.notifier.notify(
                    &state.from,
                    Notice::WithdrawFailed {
                        domain,
                        reason: e.to_string(),
                    },
                );
                Err(Error::from(e))
            }
        }
    }

    pub async fn cancel(&self, id: &str, by: &UserRef) -> Result<LnurlWithdrawState> {
        let admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        require_owner(id, &admitted.intent.from, by)?;
        admitted.cancel().await
    }
}
