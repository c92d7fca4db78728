//! Inline send: a sender offers an amount in a chat; the first eligible user
//! to tap "receive" gets it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, IntentError, Result, TransactionError};
use crate::flows::{FlowContext, reopen_after, require_owner, require_positive, require_wallet};
use crate::intent::{Intent, IntentBase, IntentId, IntentKind, IntentStore};
use crate::notify::Notice;
use crate::transaction::{TransactionRecord, TransferMeta};
use crate::wallet::UserRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineSend {
    pub base: IntentBase,
    pub from: UserRef,
    /// Only this user may accept when set.
    pub to: Option<UserRef>,
    pub amount: u64,
    pub memo: String,
}

impl Intent for InlineSend {
    const KIND: IntentKind = IntentKind::InlineSend;

    fn base(&self) -> &IntentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IntentBase {
        &mut self.base
    }
}

pub struct InlineSendFlow {
    ctx: FlowContext,
    store: IntentStore<InlineSend>,
}

impl InlineSendFlow {
    pub fn new(ctx: FlowContext) -> Self {
        let store = ctx.store(ctx.config.intents.inline_ttl);
        Self { ctx, store }
    }

    pub async fn create(
        &self,
        from: &UserRef,
        amount: u64,
        memo: &str,
        to: Option<&UserRef>,
    ) -> Result<InlineSend> {
        require_positive(amount)?;
        require_wallet(from)?;
        self.ctx.require_balance(from, amount).await?;

        let intent = InlineSend {
            base: IntentBase::new(IntentId::generate(IntentKind::InlineSend, from.id, amount)),
            from: from.clone(),
            to: to.cloned(),
            amount,
            memo: memo.to_string(),
        };
        self.store.save(&intent).await?;
        tracing::info!(intent_id = %intent.base.id, from = from.id, amount, "Inline send created");
        Ok(intent)
    }

    pub async fn get(&self, id: &str) -> Result<InlineSend> {
        self.store.load(id).await
    }

    /// Pay the intent's amount to `claimant`.
    ///
    /// The intent is saved as inactive before the transfer. `InsufficientBalance`
    /// reopens it for a later attempt; any other wallet failure leaves it closed.
    pub async fn accept(&self, id: &str, claimant: &UserRef) -> Result<TransactionRecord> {
        let mut admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        let intent = &admitted.intent;

        if claimant.id == intent.from.id {
            return Err(IntentError::SelfPayment {
                user: claimant.display(),
            }
            .into());
        }
        if intent.to.as_ref().is_some_and(|to| to.id != claimant.id) {
            return Err(IntentError::WrongCounterparty {
                id: id.to_string(),
                user: claimant.display(),
            }
            .into());
        }
        require_wallet(claimant)?;

        let from = intent.from.clone();
        let amount = intent.amount;
        let memo = intent.memo.clone();
        admitted.reserve().await?;

        let outcome = self
            .ctx
            .executor
            .send(
                &from,
                claimant,
                amount,
                TransferMeta::new("inline send", memo.clone()),
            )
            .await;

        match outcome.result {
            Ok(_) => {
                drop(admitted);
                self.ctx.notifier.notify(
                    &from,
                    Notice::PaymentSent {
                        to: claimant.display(),
                        amount,
                    },
                );
                self.ctx.notifier.notify(
                    claimant,
                    Notice::PaymentReceived {
                        from: from.display(),
                        amount,
                        memo: Some(memo).filter(|m| !m.is_empty()),
                    },
                );
                Ok(outcome.record)
            }
            Err(e @ TransactionError::InsufficientBalance { .. }) => {
                tracing::debug!(intent_id = %id, "Inline send left open: {}", e);
                Err(reopen_after(admitted, e).await)
            }
            Err(e) => {
                drop(admitted);
                self.ctx.notifier.notify(
                    &from,
                    Notice::PaymentFailed {
                        intent_id: id.to_string(),
                        reason: e.to_string(),
                    },
                );
                Err(Error::from(e))
            }
        }
    }

    pub async fn cancel(&self, id: &str, by: &UserRef) -> Result<InlineSend> {
        let admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        require_owner(id, &admitted.intent.from, by)?;
        let intent = admitted.cancel().await?;
        tracing::info!(intent_id = %id, "Inline send canceled");
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::testing::{FlakyBackend, Harness};
    use crate::wallet::LedgerFault;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn accept_pays_once() {
        let h = Harness::new();
        let alice = h.user(1, "alice", 1_000);
        let bob = h.user(2, "bob", 0);
        let carol = h.user(3, "carol", 0);
        let flow = InlineSendFlow::new(h.ctx.clone());

        let intent = flow.create(&alice, 100, "gm", None).await.unwrap();
        let record = flow.accept(intent.base.id.as_str(), &bob).await.unwrap();
        assert!(record.success);
        assert_eq!(h.balance(&bob), 100);

        let late = flow.accept(intent.base.id.as_str(), &carol).await;
        assert!(matches!(late, Err(Error::Intent(IntentError::Inactive { .. }))));
        assert_eq!(h.balance(&carol), 0);

        assert!(h.channel.wait_for(2, Duration::from_secs(1)).await);
        assert_eq!(
            h.channel.for_user(2),
            vec![Notice::PaymentReceived {
                from: "@alice".to_string(),
                amount: 100,
                memo: Some("gm".to_string())
            }]
        );
    }

    #[tokio::test]
    async fn create_validates_amount_and_balance() {
        let h = Harness::new();
        let alice = h.user(1, "alice", 50);
        let flow = InlineSendFlow::new(h.ctx.clone());

        assert!(matches!(
            flow.create(&alice, 0, "", None).await,
            Err(Error::Intent(IntentError::InvalidAmount { .. }))
        ));
        assert!(matches!(
            flow.create(&alice, 51, "", None).await,
            Err(Error::Transaction(TransactionError::InsufficientBalance { .. }))
        ));
        assert!(matches!(
            flow.create(&UserRef::new(9, None), 1, "", None).await,
            Err(Error::Intent(IntentError::NoWallet { .. }))
        ));
    }

    #[tokio::test]
    async fn rejects_self_and_wrong_recipient() {
        let h = Harness::new();
        let alice = h.user(1, "alice", 100);
        let bob = h.user(2, "bob", 0);
        let carol = h.user(3, "carol", 0);
        let flow = InlineSendFlow::new(h.ctx.clone());

        let intent = flow.create(&alice, 10, "", Some(&bob)).await.unwrap();
        let id = intent.base.id.as_str();
        assert!(matches!(
            flow.accept(id, &alice).await,
            Err(Error::Intent(IntentError::SelfPayment { .. }))
        ));
        assert!(matches!(
            flow.accept(id, &carol).await,
            Err(Error::Intent(IntentError::WrongCounterparty { .. }))
        ));
        assert!(flow.get(id).await.unwrap().base.active);
        assert!(flow.accept(id, &bob).await.is_ok());
    }

    #[tokio::test]
    async fn insufficient_balance_keeps_intent_open() {
        let h = Harness::new();
        let alice = h.user(1, "alice", 100);
        let bob = h.user(2, "bob", 0);
        let dave = h.user(4, "dave", 0);
        let flow = InlineSendFlow::new(h.ctx.clone());

        let intent = flow.create(&alice, 80, "", None).await.unwrap();
        let id = intent.base.id.as_str();
        // Alice spends elsewhere before anyone accepts.
        h.ctx
            .executor
            .send(&alice, &dave, 50, TransferMeta::new("inline send", ""))
            .await
            .result
            .unwrap();

        assert!(matches!(
            flow.accept(id, &bob).await,
            Err(Error::Transaction(TransactionError::InsufficientBalance { .. }))
        ));
        assert!(flow.get(id).await.unwrap().base.active);
    }

    #[tokio::test]
    async fn failed_reservation_moves_no_money() {
        // Write 1 is `create`, write 2 is bob's reservation.
        let h = Harness::with_db(Arc::new(FlakyBackend::failing_put(2)));
        let alice = h.user(1, "alice", 1_000);
        let bob = h.user(2, "bob", 0);
        let carol = h.user(3, "carol", 0);
        let flow = InlineSendFlow::new(h.ctx.clone());

        let intent = flow.create(&alice, 100, "", None).await.unwrap();
        let id = intent.base.id.as_str();
        assert!(matches!(
            flow.accept(id, &bob).await,
            Err(Error::Database(_))
        ));
        assert_eq!(h.balance(&alice), 1_000);
        assert_eq!(h.balance(&bob), 0);

        flow.accept(id, &carol).await.unwrap();
        assert!(matches!(
            flow.accept(id, &bob).await,
            Err(Error::Intent(IntentError::Inactive { .. }))
        ));
        assert_eq!(h.balance(&alice), 900);
        assert_eq!(h.balance(&bob) + h.balance(&carol), 100);
    }

    #[tokio::test]
    async fn payment_failure_keeps_wallet_error() {
        let h = Harness::new();
        let alice = h.user(1, "alice", 100);
        let bob = h.user(2, "bob", 0);
        let flow = InlineSendFlow::new(h.ctx.clone());
        let intent = flow.create(&alice, 10, "", None).await.unwrap();

        // A payment failure after the reservation keeps the intent closed
        // without another write, and reports the wallet error.
        h.ledger.inject_fault(LedgerFault::RejectPayments(alice.wallet.clone().unwrap()));
        let err = flow.accept(intent.base.id.as_str(), &bob).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::PaymentFailed { .. })
        ));
        assert!(!flow.get(intent.base.id.as_str()).await.unwrap().base.active);
    }

    #[tokio::test]
    async fn only_owner_cancels() {
        let h = Harness::new();
        let alice = h.user(1, "alice", 100);
        let bob = h.user(2, "bob", 0);
        let flow = InlineSendFlow::new(h.ctx.clone());

        let intent = flow.create(&alice, 10, "", None).await.unwrap();
        let id = intent.base.id.as_str();
        assert!(matches!(
            flow.cancel(id, &bob).await,
            Err(Error::Intent(IntentError::NotOwner { .. }))
        ));
        let canceled = flow.cancel(id, &alice).await.unwrap();
        assert!(canceled.base.canceled);
        assert!(matches!(
            flow.accept(id, &bob).await,
            Err(Error::Intent(IntentError::Canceled { .. }))
        ));
    }
}
