//! Money movement and its audit trail.
//!
//! [`TransactionExecutor`] is the only code path that debits a wallet. It
//! does not deduplicate: callers reach it at most once per intent by holding
//! the intent's lock and checking that the intent is still active.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{Database, TransactionLog};
use crate::error::{TransactionError, WalletError};
use crate::wallet::{Invoice, PaymentRef, UserRef, WalletRef, WalletService};

/// One side of a transfer, as recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: i64,
    pub label: String,
    pub wallet: Option<WalletRef>,
}

impl Participant {
    pub fn new(user_id: i64, label: impl Into<String>, wallet: Option<WalletRef>) -> Self {
        Self {
            user_id,
            label: label.into(),
            wallet,
        }
    }
}

impl From<&UserRef> for Participant {
    fn from(user: &UserRef) -> Self {
        Self::new(user.id, user.display(), user.wallet.clone())
    }
}

/// Chat a transfer was triggered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRef {
    pub id: i64,
    pub title: String,
}

/// Immutable audit row written once per attempted money movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    /// Free-form type tag: `inline send`, `faucet`, `pay`, ...
    pub kind: String,
    pub from: Participant,
    /// `None` for payments to external invoices.
    pub to: Option<Participant>,
    pub amount: u64,
    pub chat: Option<ChatRef>,
    pub memo: String,
    pub success: bool,
    pub invoice: Option<Invoice>,
    pub error: Option<String>,
}

impl TransactionRecord {
    pub fn new(
        kind: impl Into<String>,
        from: Participant,
        to: Option<Participant>,
        amount: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            time: Utc::now(),
            kind: kind.into(),
            from,
            to,
            amount,
            chat: None,
            memo: String::new(),
            success: false,
            invoice: None,
            error: None,
        }
    }

    pub fn involves(&self, user_id: i64) -> bool {
        self.from.user_id == user_id || self.to.as_ref().is_some_and(|to| to.user_id == user_id)
    }
}

/// What one executor call did: the record that was written, and whether it worked.
#[derive(Debug)]
pub struct SendOutcome {
    pub record: TransactionRecord,
    pub result: Result<PaymentRef, TransactionError>,
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Metadata shared by every transfer.
#[derive(Debug, Clone, Default)]
pub struct TransferMeta {
    pub kind: String,
    pub memo: String,
    pub chat: Option<ChatRef>,
}

impl TransferMeta {
    pub fn new(kind: impl Into<String>, memo: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            memo: memo.into(),
            chat: None,
        }
    }

    pub fn in_chat(mut self, chat: ChatRef) -> Self {
        self.chat = Some(chat);
        self
    }
}

#[derive(Clone)]
pub struct TransactionExecutor {
    wallet: Arc<dyn WalletService>,
    db: Arc<dyn Database>,
}

impl TransactionExecutor {
    pub fn new(wallet: Arc<dyn WalletService>, db: Arc<dyn Database>) -> Self {
        Self { wallet, db }
    }

    /// Move `amount` from `from` to `to` through an invoice on `to`'s wallet.
    ///
    /// The outcome's record is persisted whether or not the transfer worked.
    pub async fn send(
        &self,
        from: &UserRef,
        to: &UserRef,
        amount: u64,
        meta: TransferMeta,
    ) -> SendOutcome {
        let mut record = self.new_record(from, Some(to), amount, meta);
        let result = self.transfer(from, to, amount, &mut record).await;
        self.finish(record, result).await
    }

    /// Pay an external invoice of `amount` from `from`'s wallet.
    pub async fn pay_invoice(
        &self,
        from: &UserRef,
        payment_request: &str,
        amount: u64,
        meta: TransferMeta,
    ) -> SendOutcome {
        let mut record = self.new_record(from, None, amount, meta);
        let result = self
            .pay_external(from, payment_request, amount, &mut record)
            .await;
        self.finish(record, result).await
    }

    /// Audit an invoice on `to`'s wallet that was settled outside this executor.
    pub async fn record_settlement(
        &self,
        payer: Participant,
        to: &UserRef,
        amount: u64,
        invoice: Invoice,
        meta: TransferMeta,
    ) -> TransactionRecord {
        let mut record = TransactionRecord::new(meta.kind, payer, Some(Participant::from(to)), amount);
        record.memo = meta.memo;
        record.chat = meta.chat;
        record.invoice = Some(invoice);
        record.success = true;
        if let Err(e) = self.db.record_transaction(&record).await {
            tracing::error!(transaction_id = %record.id, error = %e, "Could not log transaction");
        }
        record
    }

    /// Current balance of `user`, straight from the wallet service.
    pub async fn balance_of(&self, user: &UserRef) -> Result<u64, TransactionError> {
        let wallet = user
            .wallet
            .as_ref()
            .ok_or_else(|| TransactionError::BalanceUnavailable {
                user: user.display(),
                source: WalletError::UnknownWallet(format!("{} has no wallet", user.display())),
            })?;
        self.wallet
            .balance(wallet)
            .await
            .map_err(|source| TransactionError::BalanceUnavailable {
                user: user.display(),
                source,
            })
    }

    fn new_record(
        &self,
        from: &UserRef,
        to: Option<&UserRef>,
        amount: u64,
        meta: TransferMeta,
    ) -> TransactionRecord {
        let mut record =
            TransactionRecord::new(meta.kind, Participant::from(from), to.map(Participant::from), amount);
        record.memo = meta.memo;
        record.chat = meta.chat;
        record
    }

    async fn transfer(
        &self,
        from: &UserRef,
        to: &UserRef,
        amount: u64,
        record: &mut TransactionRecord,
    ) -> Result<PaymentRef, TransactionError> {
        let from_wallet = self.ensure_balance(from, amount).await?;

        let to_wallet = to
            .wallet
            .clone()
            .ok_or_else(|| TransactionError::CounterpartyInvoice {
                user: to.display(),
                source: WalletError::UnknownWallet(format!("{} has no wallet", to.display())),
            })?;
        let invoice = self
            .wallet
            .create_invoice(&to_wallet, amount, &record.memo)
            .await
            .map_err(|source| TransactionError::CounterpartyInvoice {
                user: to.display(),
                source,
            })?;
        record.invoice = Some(invoice.clone());

        let payment = self
            .wallet
            .pay_invoice(&from_wallet, &invoice.payment_request)
            .await
            .map_err(|source| TransactionError::PaymentFailed {
                user: from.display(),
                source,
            })?;

        self.refresh_balance(&from_wallet).await;
        self.refresh_balance(&to_wallet).await;
        Ok(payment)
    }

    async fn pay_external(
        &self,
        from: &UserRef,
        payment_request: &str,
        amount: u64,
        record: &mut TransactionRecord,
    ) -> Result<PaymentRef, TransactionError> {
        let from_wallet = self.ensure_balance(from, amount).await?;
        record.invoice = Some(Invoice {
            payment_request: payment_request.to_string(),
            payment_hash: String::new(),
        });

        let payment = self
            .wallet
            .pay_invoice(&from_wallet, payment_request)
            .await
            .map_err(|source| TransactionError::PaymentFailed {
                user: from.display(),
                source,
            })?;
        if let Some(invoice) = record.invoice.as_mut() {
            invoice.payment_hash = payment.payment_hash.clone();
        }

        self.refresh_balance(&from_wallet).await;
        Ok(payment)
    }

    /// Read the live balance and require at least `amount`.
    async fn ensure_balance(&self, user: &UserRef, amount: u64) -> Result<WalletRef, TransactionError> {
        let available = self.balance_of(user).await?;
        if available < amount {
            return Err(TransactionError::InsufficientBalance {
                available,
                required: amount,
            });
        }
        // balance_of already rejected users without a wallet
        user.wallet
            .clone()
            .ok_or_else(|| TransactionError::BalanceUnavailable {
                user: user.display(),
                source: WalletError::UnknownWallet(user.display()),
            })
    }

    /// Post-payment balance read. Failures are logged only.
    async fn refresh_balance(&self, wallet: &WalletRef) {
        match self.wallet.balance(wallet).await {
            Ok(balance) => tracing::debug!(wallet = %wallet, balance, "Balance refreshed"),
            Err(e) => tracing::warn!(wallet = %wallet, error = %e, "Balance refresh failed"),
        }
    }

    async fn finish(
        &self,
        mut record: TransactionRecord,
        result: Result<PaymentRef, TransactionError>,
    ) -> SendOutcome {
        record.success = result.is_ok();
        match &result {
            Ok(_) => tracing::info!(
                transaction_id = %record.id,
                kind = %record.kind,
                from = record.from.user_id,
                to = record.to.as_ref().map(|to| to.user_id),
                amount = record.amount,
                "Transfer completed"
            ),
            Err(e) => {
                record.error = Some(e.to_string());
                tracing::warn!(
                    transaction_id = %record.id,
                    kind = %record.kind,
                    from = record.from.user_id,
                    amount = record.amount,
                    error = %e,
                    "Transfer failed"
                );
            }
        }

        if let Err(e) = self.db.record_transaction(&record).await {
            tracing::error!(transaction_id = %record.id, error = %e, "Could not log transaction");
        }
        SendOutcome { record, result }
    }
}
