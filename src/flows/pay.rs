//! Paying a user-supplied BOLT11 invoice after explicit confirmation.

use serde::{Deserialize, Serialize};

use crate::error::{Error, IntentError, Result};
use crate::flows::{FlowContext, require_owner, require_wallet};
use crate::intent::{Intent, IntentBase, IntentId, IntentKind, IntentStore};
use crate::notify::Notice;
use crate::transaction::{TransactionRecord, TransferMeta};
use crate::wallet::UserRef;

/// Share of the balance, in percent, above which routing fees may not fit.
const FEE_RESERVE_PERCENT: u64 = 98;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayIntent {
    pub base: IntentBase,
    pub from: UserRef,
    pub payment_request: String,
    pub amount: u64,
    pub description: String,
    pub payment_hash: String,
    /// Message to show after paying an LNURL-obtained invoice.
    pub success_action: Option<String>,
}

impl Intent for PayIntent {
    const KIND: IntentKind = IntentKind::Pay;

    fn base(&self) -> &IntentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IntentBase {
        &mut self.base
    }
}

/// What the user is asked to confirm.
#[derive(Debug, Clone)]
pub struct PayQuote {
    pub intent: PayIntent,
    /// The amount leaves less than the routing-fee reserve in the wallet.
    pub fee_reserve_warning: bool,
}

pub struct PayFlow {
    ctx: FlowContext,
    store: IntentStore<PayIntent>,
}

impl PayFlow {
    pub fn new(ctx: FlowContext) -> Self {
        let store = ctx.store(ctx.config.intents.ttl);
        Self { ctx, store }
    }

    pub async fn create(
        &self,
        from: &UserRef,
        payment_request: &str,
        success_action: Option<String>,
    ) -> Result<PayQuote> {
        require_wallet(from)?;
        let payment_request = normalize_payment_request(payment_request);
        let decoded = self.ctx.wallet.decode_invoice(&payment_request).await?;
        if decoded.amount == 0 {
            return Err(IntentError::InvalidAmount {
                reason: "invoices without an amount are not supported".to_string(),
            }
            .into());
        }
        let balance = self.ctx.require_balance(from, decoded.amount).await?;

        let intent = PayIntent {
            base: IntentBase::new(IntentId::generate(IntentKind::Pay, from.id, decoded.amount)),
            from: from.clone(),
            payment_request,
            amount: decoded.amount,
            description: decoded.description,
            payment_hash: decoded.payment_hash,
            success_action,
        };
        self.store.save(&intent).await?;
        tracing::info!(intent_id = %intent.base.id, from = from.id, amount = intent.amount, "Payment awaiting confirmation");

        Ok(PayQuote {
            fee_reserve_warning: intent.amount.saturating_mul(100)
                > balance.saturating_mul(FEE_RESERVE_PERCENT),
            intent,
        })
    }

    pub async fn get(&self, id: &str) -> Result<PayIntent> {
        self.store.load(id).await
    }

    /// Pay the invoice. The intent is consumed before paying, so it is
    /// used up whether or not the payment lands.
    pub async fn confirm(&self, id: &str, by: &UserRef) -> Result<TransactionRecord> {
        let mut admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        require_owner(id, &admitted.intent.from, by)?;
        admitted.reserve().await?;

        let intent = &admitted.intent;
        let outcome = self
            .ctx
            .executor
            .pay_invoice(
                &intent.from,
                &intent.payment_request,
                intent.amount,
                TransferMeta::new("pay", intent.description.clone()),
            )
            .await;
        let intent = admitted.intent.clone();
        drop(admitted);

        match outcome.result {
            Ok(payment) => {
                self.ctx.notifier.notify(
                    &intent.from,
                    Notice::InvoicePaid {
                        amount: intent.amount,
                        payment_hash: payment.payment_hash,
                    },
                );
                if let Some(message) = intent.success_action {
                    self.ctx
                        .notifier
                        .notify(&intent.from, Notice::SuccessAction { message });
                }
                Ok(outcome.record)
            }
            Err(e) => {
                self.ctx.notifier.notify(
                    &intent.from,
                    Notice::PaymentFailed {
                        intent_id: id.to_string(),
                        reason: e.to_string(),
                    },
                );
                Err(Error::from(e))
            }
        }
    }

    pub async fn cancel(&self, id: &str, by: &UserRef) -> Result<PayIntent> {
        let admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        require_owner(id, &admitted.intent.from, by)?;
        admitted.cancel().await
    }
}

fn normalize_payment_request(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    match lowered.strip_prefix("lightning:") {
        Some(rest) => rest.to_string(),
        None => lowered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransactionError, WalletError};
    use crate::flows::testing::{FlakyBackend, Harness};
    use crate::wallet::{LedgerFault, WalletService};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn strips_lightning_prefix() {
        assert_eq!(normalize_payment_request(" LIGHTNING:LNBC10N1P "), "lnbc10n1p");
        assert_eq!(normalize_payment_request("lnbc10n1p"), "lnbc10n1p");
    }

    #[tokio::test]
    async fn confirm_pays_once() {
        let h = Harness::new();
        let alice = h.user(1, "alice", 1_000);
        let shop = h.user(2, "shop", 0);
        let invoice = h
            .ledger
            .create_invoice(shop.wallet.as_ref().unwrap(), 250, "coffee")
            .await
            .unwrap();
        let flow = PayFlow::new(h.ctx.clone());

        let quote = flow
            .create(&alice, &format!("lightning:{}", invoice.payment_request), Some("thanks!".into()))
            .await
            .unwrap();
        assert_eq!(quote.intent.amount, 250);
        assert_eq!(quote.intent.description, "coffee");
        assert!(!quote.fee_reserve_warning);

        let id = quote.intent.base.id.as_str();
        assert!(matches!(
            flow.confirm(id, &shop).await,
            Err(Error::Intent(IntentError::NotOwner { .. }))
        ));
        let record = flow.confirm(id, &alice).await.unwrap();
        assert!(record.success);
        assert_eq!(h.balance(&shop), 250);
        assert!(matches!(
            flow.confirm(id, &alice).await,
            Err(Error::Intent(IntentError::Inactive { .. }))
        ));

        assert!(h.channel.wait_for(2, Duration::from_secs(1)).await);
        assert!(h.channel.for_user(1).contains(&Notice::SuccessAction {
            message: "thanks!".to_string()
        }));
    }

    #[tokio::test]
    async fn warns_when_fees_may_not_fit() {
        let h = Harness::new();
        let alice = h.user(1, "alice", 100);
        let shop = h.user(2, "shop", 0);
        let invoice = h
            .ledger
            .create_invoice(shop.wallet.as_ref().unwrap(), 99, "")
            .await
            .unwrap();
        let quote = PayFlow::new(h.ctx.clone())
            .create(&alice, &invoice.payment_request, None)
            .await
            .unwrap();
        assert!(quote.fee_reserve_warning);
    }

    #[tokio::test]
    async fn create_rejects_unpayable_invoices() {
        let h = Harness::new();
        let alice = h.user(1, "alice", 10);
        let shop = h.user(2, "shop", 0);
        let flow = PayFlow::new(h.ctx.clone());

        let big = h
            .ledger
            .create_invoice(shop.wallet.as_ref().unwrap(), 11, "")
            .await
            .unwrap();
        assert!(matches!(
            flow.create(&alice, &big.payment_request, None).await,
            Err(Error::Transaction(TransactionError::InsufficientBalance { .. }))
        ));

        let empty = h
            .ledger
            .create_invoice(shop.wallet.as_ref().unwrap(), 0, "")
            .await
            .unwrap();
        assert!(matches!(
            flow.create(&alice, &empty.payment_request, None).await,
            Err(Error::Intent(IntentError::InvalidAmount { .. }))
        ));
        assert!(matches!(
            flow.create(&alice, "lnbcgarbage", None).await,
            Err(Error::Wallet(WalletError::InvalidInvoice(_)))
        ));
    }

    #[tokio::test]
    async fn unsaved_confirmation_does_not_pay() {
        let h = Harness::with_db(Arc::new(FlakyBackend::failing_put(2)));
        let alice = h.user(1, "alice", 100);
        let shop = h.user(2, "shop", 0);
        let invoice = h
            .ledger
            .create_invoice(shop.wallet.as_ref().unwrap(), 40, "")
            .await
            .unwrap();
        let flow = PayFlow::new(h.ctx.clone());
        let quote = flow.create(&alice, &invoice.payment_request, None).await.unwrap();
        let id = quote.intent.base.id.as_str();

        assert!(matches!(flow.confirm(id, &alice).await, Err(Error::Database(_))));
        assert_eq!(h.balance(&alice), 100);
        assert!(flow.get(id).await.unwrap().base.active);

        flow.confirm(id, &alice).await.unwrap();
        assert_eq!(h.balance(&alice), 60);
        assert_eq!(h.balance(&shop), 40);
    }

    #[tokio::test]
    async fn failed_payment_still_consumes() {
        let h = Harness::new();
        let alice = h.user(1, "alice", 100);
        let shop = h.user(2, "shop", 0);
        let invoice = h
            .ledger
            .create_invoice(shop.wallet.as_ref().unwrap(), 40, "")
            .await
            .unwrap();
        let flow = PayFlow::new(h.ctx.clone());
        let quote = flow.create(&alice, &invoice.payment_request, None).await.unwrap();
        let id = quote.intent.base.id.as_str();

        h.ledger
            .inject_fault(LedgerFault::RejectPayments(alice.wallet.clone().unwrap()));
        assert!(matches!(
            flow.confirm(id, &alice).await,
            Err(Error::Transaction(TransactionError::PaymentFailed { .. }))
        ));
        assert!(!flow.get(id).await.unwrap().base.active);
        assert_eq!(h.balance(&alice), 100);
    }
}
