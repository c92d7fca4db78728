//! In-process wallet service with exact integer balances.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::WalletError;
use crate::wallet::{DecodedInvoice, Invoice, PaymentRef, WalletRef, WalletService};

/// Failure modes a [`LedgerWallet`] can be told to simulate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerFault {
    /// Every call fails with `Unavailable`.
    Offline,
    /// Balance queries for this wallet fail.
    BalanceUnavailable(WalletRef),
    /// Invoice creation on this wallet is rejected.
    RejectInvoices(WalletRef),
    /// Payments from this wallet are rejected.
    RejectPayments(WalletRef),
}

#[derive(Debug, Clone)]
struct LedgerInvoice {
    wallet: WalletRef,
    amount: u64,
    memo: String,
    payment_hash: String,
    settled: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<WalletRef, u64>,
    /// Keyed by payment request.
    invoices: HashMap<String, LedgerInvoice>,
    faults: Vec<LedgerFault>,
    next_invoice: u64,
}

impl LedgerState {
    fn check(&self, fault: &LedgerFault) -> Result<(), WalletError> {
        if self.faults.contains(&LedgerFault::Offline) {
            return Err(WalletError::Unavailable("ledger offline".to_string()));
        }
        if self.faults.contains(fault) {
            return Err(match fault {
                LedgerFault::BalanceUnavailable(w) => {
                    WalletError::Unavailable(format!("balance of {w} unavailable"))
                }
                LedgerFault::RejectInvoices(w) => {
                    WalletError::Rejected(format!("{w} cannot issue invoices"))
                }
                LedgerFault::RejectPayments(w) => {
                    WalletError::Rejected(format!("{w} cannot pay"))
                }
                LedgerFault::Offline => WalletError::Unavailable("ledger offline".to_string()),
            });
        }
        Ok(())
    }

    fn known(&self, wallet: &WalletRef) -> Result<(), WalletError> {
        if self.balances.contains_key(wallet) {
            Ok(())
        } else {
            Err(WalletError::UnknownWallet(wallet.to_string()))
        }
    }
}

/// Ledger of wallets held in process memory.
///
/// Payments between ledger wallets move exactly the invoice amount with no
/// fees, and each invoice can be paid once.
#[derive(Debug, Default)]
pub struct LedgerWallet {
    state: Mutex<LedgerState>,
}

impl LedgerWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or top up) a wallet.
    pub fn open_wallet(&self, id: &str, initial_balance: u64) -> WalletRef {
        let wallet = WalletRef::new(id);
        let mut state = self.lock();
        *state.balances.entry(wallet.clone()).or_default() += initial_balance;
        wallet
    }

    pub fn balance_of(&self, wallet: &WalletRef) -> Option<u64> {
        self.lock().balances.get(wallet).copied()
    }

    /// Sum of all balances. Constant across internal payments.
    pub fn total_supply(&self) -> u64 {
        self.lock().balances.values().sum()
    }

    pub fn inject_fault(&self, fault: LedgerFault) {
        self.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WalletService for LedgerWallet {
    async fn balance(&self, wallet: &WalletRef) -> Result<u64, WalletError> {
        let state = self.lock();
        state.check(&LedgerFault::BalanceUnavailable(wallet.clone()))?;
        state
            .balances
            .get(wallet)
            .copied()
            .ok_or_else(|| WalletError::UnknownWallet(wallet.to_string()))
    }

    async fn create_invoice(
        &self,
        wallet: &WalletRef,
        amount: u64,
        memo: &str,
    ) -> Result<Invoice, WalletError> {
        let mut state = self.lock();
        state.check(&LedgerFault::RejectInvoices(wallet.clone()))?;
        state.known(wallet)?;

        state.next_invoice += 1;
        let payment_hash = format!(
            "{:x}",
            Sha256::digest(format!("{}:{}:{}:{}", wallet, state.next_invoice, amount, memo))
        );
        let payment_request = format!("lnbcrt{}n1p{}", amount, &payment_hash[..40]);
        state.invoices.insert(
            payment_request.clone(),
            LedgerInvoice {
                wallet: wallet.clone(),
                amount,
                memo: memo.to_string(),
                payment_hash: payment_hash.clone(),
                settled: false,
            },
        );
        Ok(Invoice {
            payment_request,
            payment_hash,
        })
    }

    async fn pay_invoice(
        &self,
        wallet: &WalletRef,
        payment_request: &str,
    ) -> Result<PaymentRef, WalletError> {
        let mut state = self.lock();
        state.check(&LedgerFault::RejectPayments(wallet.clone()))?;
        state.known(wallet)?;

        let invoice = state
            .invoices
            .get(payment_request)
            .cloned()
            .ok_or_else(|| WalletError::InvalidInvoice("unknown payment request".to_string()))?;
        if invoice.settled {
            return Err(WalletError::Rejected("invoice already paid".to_string()));
        }
        let available = state.balances.get(wallet).copied().unwrap_or_default();
        if available < invoice.amount {
            return Err(WalletError::Rejected(format!(
                "insufficient funds: {available} < {}",
                invoice.amount
            )));
        }

        if let Some(balance) = state.balances.get_mut(wallet) {
            *balance -= invoice.amount;
        }
        *state.balances.entry(invoice.wallet.clone()).or_default() += invoice.amount;
        if let Some(stored) = state.invoices.get_mut(payment_request) {
            stored.settled = true;
        }
        Ok(PaymentRef {
            payment_hash: invoice.payment_hash,
        })
    }

    async fn decode_invoice(&self, payment_request: &str) -> Result<DecodedInvoice, WalletError> {
        let state = self.lock();
        state.check(&LedgerFault::Offline)?;
        state
            .invoices
            .get(payment_request)
            .map(|invoice| DecodedInvoice {
                amount: invoice.amount,
                description: invoice.memo.clone(),
                payment_hash: invoice.payment_hash.clone(),
            })
            .ok_or_else(|| WalletError::InvalidInvoice("unknown payment request".to_string()))
    }

    async fn invoice_status(
        &self,
        wallet: &WalletRef,
        payment_hash: &str,
    ) -> Result<bool, WalletError> {
        let state = self.lock();
        state.check(&LedgerFault::Offline)?;
        state
            .invoices
            .values()
            .find(|invoice| invoice.payment_hash == payment_hash && &invoice.wallet == wallet)
            .map(|invoice| invoice.settled)
            .ok_or_else(|| WalletError::InvalidInvoice(format!("unknown payment hash {payment_hash}")))
    }
}
