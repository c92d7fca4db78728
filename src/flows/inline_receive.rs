//! Inline receive: a user requests an amount in a chat; whoever taps "pay"
//! (or the designated payer) pays it, either from their wallet or, when
//! they can't, by settling an invoice on the requester's wallet.

use serde::{Deserialize, Serialize};

use crate::error::{Error, IntentError, Result, TransactionError};
use crate::flows::{FlowContext, reopen_after, require_owner, require_positive, require_wallet};
use crate::intent::{Intent, IntentBase, IntentId, IntentKind, IntentStore};
use crate::notify::Notice;
use crate::transaction::{Participant, TransactionRecord, TransferMeta};
use crate::wallet::{Invoice, UserRef};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineReceive {
    pub base: IntentBase,
    /// Requester; receives the funds.
    pub to: UserRef,
    /// Designated payer, if any.
    pub from: Option<UserRef>,
    pub amount: u64,
    pub memo: String,
    /// Invoice handed to a payer who couldn't pay internally.
    pub invoice: Option<Invoice>,
    /// Who was handed the invoice.
    pub payer: Option<UserRef>,
}

impl Intent for InlineReceive {
    const KIND: IntentKind = IntentKind::InlineReceive;

    fn base(&self) -> &IntentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IntentBase {
        &mut self.base
    }
}

#[derive(Debug)]
pub enum ReceiveOutcome {
    /// Paid wallet-to-wallet.
    Paid(TransactionRecord),
    /// Payer has to settle this invoice; the request stays open until then.
    InvoiceIssued(Invoice),
}

pub struct InlineReceiveFlow {
    ctx: FlowContext,
    store: IntentStore<InlineReceive>,
}

impl InlineReceiveFlow {
    pub fn new(ctx: FlowContext) -> Self {
        let store = ctx.store(ctx.config.intents.inline_ttl);
        Self { ctx, store }
    }

    pub async fn create(
        &self,
        to: &UserRef,
        amount: u64,
        memo: &str,
        from: Option<&UserRef>,
    ) -> Result<InlineReceive> {
        require_positive(amount)?;
        require_wallet(to)?;
        if from.is_some_and(|from| from.id == to.id) {
            return Err(IntentError::SelfPayment { user: to.display() }.into());
        }

        let intent = InlineReceive {
            base: IntentBase::new(IntentId::generate(IntentKind::InlineReceive, to.id, amount)),
            to: to.clone(),
            from: from.cloned(),
            amount,
            memo: memo.to_string(),
            invoice: None,
            payer: None,
        };
        self.store.save(&intent).await?;
        tracing::info!(intent_id = %intent.base.id, to = to.id, amount, "Inline receive created");
        Ok(intent)
    }

    pub async fn get(&self, id: &str) -> Result<InlineReceive> {
        self.store.load(id).await
    }

    pub async fn accept(&self, id: &str, payer: &UserRef) -> Result<ReceiveOutcome> {
        let mut admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        let intent = &admitted.intent;

        if payer.id == intent.to.id {
            return Err(IntentError::SelfPayment {
                user: payer.display(),
            }
            .into());
        }
        let designated = intent.payer.as_ref().or(intent.from.as_ref());
        if designated.is_some_and(|expected| expected.id != payer.id) {
            return Err(IntentError::WrongCounterparty {
                id: id.to_string(),
                user: payer.display(),
            }
            .into());
        }
        if let Some(invoice) = &intent.invoice {
            return Ok(ReceiveOutcome::InvoiceIssued(invoice.clone()));
        }

        let to = intent.to.clone();
        let amount = intent.amount;
        let memo = if intent.memo.is_empty() {
            format!("Receive from {} to {}", payer.display(), to.display())
        } else {
            intent.memo.clone()
        };

        let can_pay = match payer.wallet {
            None => false,
            Some(_) => match self.ctx.executor.balance_of(payer).await {
                Ok(balance) => balance >= amount,
                Err(e) => {
                    tracing::warn!(intent_id = %id, error = %e, "Payer balance unavailable");
                    false
                }
            },
        };

        if !can_pay {
            let to_wallet = require_wallet(&to)?;
            let invoice = match self.ctx.wallet.create_invoice(to_wallet, amount, &memo).await {
                Ok(invoice) => invoice,
                Err(source) => {
                    if let Err(e) = admitted.consume().await {
                        tracing::error!(intent_id = %id, error = %e, "Could not close inline receive");
                    }
                    return Err(TransactionError::CounterpartyInvoice {
                        user: to.display(),
                        source,
                    }
                    .into());
                }
            };
            admitted.intent.invoice = Some(invoice.clone());
            admitted.intent.payer = Some(payer.clone());
            admitted.commit().await?;

            self.ctx.notifier.notify(
                payer,
                Notice::InvoiceIssued {
                    intent_id: id.to_string(),
                    payment_request: invoice.payment_request.clone(),
                    amount,
                },
            );
            return Ok(ReceiveOutcome::InvoiceIssued(invoice));
        }

        admitted.reserve().await?;
        let outcome = self
            .ctx
            .executor
            .send(payer, &to, amount, TransferMeta::new("inline receive", memo))
            .await;
        match outcome.result {
            Ok(_) => {
                drop(admitted);
                self.notify_paid(payer, &to, amount);
                Ok(ReceiveOutcome::Paid(outcome.record))
            }
            Err(e @ TransactionError::InsufficientBalance { .. }) => {
                Err(reopen_after(admitted, e).await)
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Complete an invoice-backed request once the requester's wallet
    /// reports its invoice settled.
    pub async fn settle(&self, id: &str, payment_hash: &str) -> Result<TransactionRecord> {
        let mut admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        let intent = &admitted.intent;

        let invoice = match &intent.invoice {
            Some(invoice) if invoice.payment_hash == payment_hash => invoice.clone(),
            _ => {
                return Err(IntentError::UnknownInvoice {
                    id: id.to_string(),
                    payment_hash: payment_hash.to_string(),
                }
                .into());
            }
        };
        let to = intent.to.clone();
        let to_wallet = require_wallet(&to)?;
        if !self.ctx.wallet.invoice_status(to_wallet, payment_hash).await? {
            tracing::debug!(intent_id = %id, payment_hash, "Settlement reported for unpaid invoice");
            return Err(IntentError::InvoiceNotSettled {
                id: id.to_string(),
                payment_hash: payment_hash.to_string(),
            }
            .into());
        }

        let amount = intent.amount;
        let payer = intent.payer.clone();
        let payer_participant = payer
            .as_ref()
            .map(Participant::from)
            .unwrap_or_else(|| Participant::new(0, "external", None));
        let memo = intent.memo.clone();
        admitted.reserve().await?;

        let record = self
            .ctx
            .executor
            .record_settlement(
                payer_participant,
                &to,
                amount,
                invoice,
                TransferMeta::new("inline receive", memo),
            )
            .await;
        drop(admitted);

        match payer {
            Some(payer) => self.notify_paid(&payer, &to, amount),
            None => self.ctx.notifier.notify(
                &to,
                Notice::PaymentReceived {
                    from: "external".to_string(),
                    amount,
                    memo: None,
                },
            ),
        }
        Ok(record)
    }

    pub async fn cancel(&self, id: &str, by: &UserRef) -> Result<InlineReceive> {
        let admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        require_owner(id, &admitted.intent.to, by)?;
        admitted.cancel().await
    }

    fn notify_paid(&self, payer: &UserRef, to: &UserRef, amount: u64) {
        self.ctx.notifier.notify(
            to,
            Notice::PaymentReceived {
                from: payer.display(),
                amount,
                memo: None,
            },
        );
        self.ctx.notifier.notify(
            payer,
            Notice::PaymentSent {
                to: to.display(),
                amount,
            },
        );
    }
}
