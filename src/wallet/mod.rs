//! Wallet collaborator interface.
//!
//! The runtime never holds funds. Balances, invoices and payments belong to
//! an external wallet service reached through [`WalletService`];
//! [`LedgerWallet`] is the in-process implementation used for demos,
//! benchmarks and tests.

mod ledger;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WalletError;

pub use ledger::{LedgerFault, LedgerWallet};

/// Opaque reference to a wallet at the wallet service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletRef(String);

impl WalletRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chat user as the runtime sees them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: i64,
    pub username: Option<String>,
    /// `None` until the user has set up a wallet.
    pub wallet: Option<WalletRef>,
    pub language_code: String,
}

impl UserRef {
    pub fn new(id: i64, username: Option<&str>) -> Self {
        Self {
            id,
            username: username.map(str::to_string),
            wallet: None,
            language_code: "en".to_string(),
        }
    }

    pub fn with_wallet(mut self, wallet: WalletRef) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_language(mut self, language_code: impl Into<String>) -> Self {
        self.language_code = language_code.into();
        self
    }

    /// `@username` when known, otherwise the numeric id.
    pub fn display(&self) -> String {
        match &self.username {
            Some(name) if !name.is_empty() => format!("@{name}"),
            _ => self.id.to_string(),
        }
    }
}

/// Invoice created by the wallet service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub payment_request: String,
    pub payment_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRef {
    pub payment_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInvoice {
    /// Amount in sats. Zero for amountless invoices.
    pub amount: u64,
    pub description: String,
    pub payment_hash: String,
}

#[async_trait]
pub trait WalletService: Send + Sync {
    /// Current balance in sats, read from the service (never cached).
    async fn balance(&self, wallet: &WalletRef) -> Result<u64, WalletError>;

    async fn create_invoice(
        &self,
        wallet: &WalletRef,
        amount: u64,
        memo: &str,
    ) -> Result<Invoice, WalletError>;

    async fn pay_invoice(
        &self,
        wallet: &WalletRef,
        payment_request: &str,
    ) -> Result<PaymentRef, WalletError>;

    async fn decode_invoice(&self, payment_request: &str) -> Result<DecodedInvoice, WalletError>;

    /// Whether the invoice with `payment_hash` issued by `wallet` has been paid.
    async fn invoice_status(
        &self,
        wallet: &WalletRef,
        payment_hash: &str,
    ) -> Result<bool, WalletError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefers_username() {
        assert_eq!(UserRef::new(7, Some("alice")).display(), "@alice");
        assert_eq!(UserRef::new(7, None).display(), "7");
        assert_eq!(UserRef::new(7, Some("")).display(), "7");
    }

    #[test]
    fn wallet_ref_serializes_as_string() {
        let json = serde_json::to_string(&WalletRef::new("w-1")).unwrap();
        assert_eq!(json, "\"w-1\"");
    }
}
