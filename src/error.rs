//! Error types for satsflow.

use std::time::Duration;

use serde::Serialize;

/// Top-level error type for the runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Intent error: {0}")]
    Intent(#[from] IntentError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("External service error: {0}")]
    External(#[from] ExternalError),
}

/// Failure domains used by chat front-ends to pick wording and retry affordances.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Intent,
    Validation,
    Wallet,
    Lock,
    Storage,
    Config,
    External,
}

/// Structured error payload handed to the transport layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub domain: ErrorDomain,
    pub code: &'static str,
    pub retryable: bool,
    pub message: String,
}

impl ErrorPayload {
    fn new(
        domain: ErrorDomain,
        code: &'static str,
        retryable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            domain,
            code,
            retryable,
            message: message.into(),
        }
    }

    /// Serialize for transports that only carry strings.
    pub fn to_status_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"domain\":\"{:?}\",\"code\":\"{}\",\"retryable\":{}}}",
                self.domain, self.code, self.retryable
            )
        })
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[cfg(feature = "libsql")]
    #[error("LibSQL error: {0}")]
    LibSql(#[from] libsql::Error),
}

/// Intent lookup, state and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    #[error("Intent {id} not found or expired")]
    NotFound { id: String },

    #[error("Intent {id} was already handled")]
    Inactive { id: String },

    #[error("Intent {id} was canceled")]
    Canceled { id: String },

    #[error("User {user} cannot pay themselves")]
    SelfPayment { user: String },

    #[error("Intent {id} is reserved for another user (got {user})")]
    WrongCounterparty { id: String, user: String },

    #[error("User {user} already claimed from {id}")]
    AlreadyClaimed { id: String, user: String },

    #[error("User {user} does not own intent {id}")]
    NotOwner { id: String, user: String },

    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("User {user} has no wallet")]
    NoWallet { user: String },

    #[error("Invoice {payment_hash} does not belong to intent {id}")]
    UnknownInvoice { id: String, payment_hash: String },

    #[error("Invoice {payment_hash} for intent {id} is not settled yet")]
    InvoiceNotSettled { id: String, payment_hash: String },

    #[error("Intent payload error: {0}")]
    Payload(String),
}

impl IntentError {
    /// Validation failures are decided inside the critical section and never
    /// reach the wallet service.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::SelfPayment { .. }
                | Self::WrongCounterparty { .. }
                | Self::AlreadyClaimed { .. }
                | Self::NotOwner { .. }
                | Self::InvalidAmount { .. }
                | Self::NoWallet { .. }
                | Self::UnknownInvoice { .. }
        )
    }
}

/// Money-movement failures raised by the transaction executor.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Insufficient balance: {available} sat available, {required} sat required")]
    InsufficientBalance { available: u64, required: u64 },

    #[error("Could not read balance of {user}: {source}")]
    BalanceUnavailable {
        user: String,
        #[source]
        source: WalletError,
    },

    #[error("Counterparty {user} could not create an invoice: {source}")]
    CounterpartyInvoice {
        user: String,
        #[source]
        source: WalletError,
    },

    #[error("Payment from {user} failed: {source}")]
    PaymentFailed {
        user: String,
        #[source]
        source: WalletError,
    },
}

/// Errors reported by a wallet service implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WalletError {
    #[error("Wallet {0} is unknown")]
    UnknownWallet(String),

    #[error("Invalid invoice: {0}")]
    InvalidInvoice(String),

    #[error("Wallet service rejected the request: {0}")]
    Rejected(String),

    #[error("Wallet service unavailable: {0}")]
    Unavailable(String),
}

/// Keyed lock acquisition failures.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock acquisition for {key} was canceled")]
    Canceled { key: String },

    #[error("Lock acquisition for {key} timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },
}

/// Failures of LNURL resolvers, authenticators and node backends.
#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    #[error("{service} request failed: {reason}")]
    RequestFailed { service: String, reason: String },

    #[error("{service} returned an error: {reason}")]
    Rejected { service: String, reason: String },
}

/// Notification delivery failures. Logged, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Delivery to {user} failed: {reason}")]
    DeliveryFailed { user: String, reason: String },
}

impl IntentError {
    fn to_error_payload(&self) -> ErrorPayload {
        let (domain, code, retryable) = match self {
            Self::NotFound { .. } => (ErrorDomain::Intent, "intent.not_found", false),
            Self::Inactive { .. } => (ErrorDomain::Intent, "intent.inactive", false),
            Self::Canceled { .. } => (ErrorDomain::Intent, "intent.canceled", false),
            Self::SelfPayment { .. } => (ErrorDomain::Validation, "validation.self_payment", false),
            Self::WrongCounterparty { .. } => (
                ErrorDomain::Validation,
                "validation.wrong_counterparty",
                false,
            ),
            Self::AlreadyClaimed { .. } => {
                (ErrorDomain::Validation, "validation.already_claimed", false)
            }
            Self::NotOwner { .. } => (ErrorDomain::Validation, "validation.not_owner", false),
            Self::InvalidAmount { .. } => {
                (ErrorDomain::Validation, "validation.invalid_amount", false)
            }
            Self::NoWallet { .. } => (ErrorDomain::Validation, "validation.no_wallet", false),
            Self::UnknownInvoice { .. } => {
                (ErrorDomain::Validation, "validation.unknown_invoice", false)
            }
            Self::InvoiceNotSettled { .. } => {
                (ErrorDomain::Intent, "intent.invoice_not_settled", true)
            }
            Self::Payload(_) => (ErrorDomain::Storage, "storage.payload_invalid", false),
        };
        ErrorPayload::new(domain, code, retryable, self.to_string())
    }
}

impl TransactionError {
    fn to_error_payload(&self) -> ErrorPayload {
        let (code, retryable) = match self {
            Self::InsufficientBalance { .. } => ("wallet.insufficient_balance", true),
            Self::BalanceUnavailable { .. } => ("wallet.balance_unavailable", true),
            Self::CounterpartyInvoice { .. } => ("wallet.counterparty_invoice_failed", false),
            Self::PaymentFailed { .. } => ("wallet.payment_failed", false),
        };
        ErrorPayload::new(ErrorDomain::Wallet, code, retryable, self.to_string())
    }
}

impl Error {
    /// Map errors into a structured surface for chat front-ends.
    pub fn to_error_payload(&self) -> ErrorPayload {
        match self {
            Self::Intent(err) => err.to_error_payload(),
            Self::Transaction(err) => err.to_error_payload(),
            Self::Wallet(err) => {
                let (code, retryable) = match err {
                    WalletError::Unavailable(_) => ("wallet.unavailable", true),
                    WalletError::UnknownWallet(_) => ("wallet.unknown", false),
                    WalletError::InvalidInvoice(_) => ("wallet.invalid_invoice", false),
                    WalletError::Rejected(_) => ("wallet.rejected", false),
                };
                ErrorPayload::new(ErrorDomain::Wallet, code, retryable, err.to_string())
            }
            Self::Lock(err) => {
                let code = match err {
                    LockError::Canceled { .. } => "lock.canceled",
                    LockError::Timeout { .. } => "lock.timeout",
                };
                ErrorPayload::new(ErrorDomain::Lock, code, true, err.to_string())
            }
            Self::External(err) => {
                let code = match err {
                    ExternalError::RequestFailed { .. } => "external.request_failed",
                    ExternalError::Rejected { .. } => "external.rejected",
                };
                ErrorPayload::new(ErrorDomain::External, code, false, err.to_string())
            }
            Self::Database(err) => ErrorPayload::new(
                ErrorDomain::Storage,
                "storage.database_error",
                true,
                err.to_string(),
            ),
            Self::Config(err) => ErrorPayload::new(
                ErrorDomain::Config,
                "config.invalid",
                false,
                err.to_string(),
            ),
        }
    }

    /// Whether the whole trigger can be retried without risking a second effect.
    pub fn is_retryable(&self) -> bool {
        self.to_error_payload().retryable
    }
}

/// Result type alias for the runtime.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_lookup_failures_distinctly() {
        let missing = Error::from(IntentError::NotFound {
            id: "pay:1-10-abcde".to_string(),
        });
        let consumed = Error::from(IntentError::Inactive {
            id: "pay:1-10-abcde".to_string(),
        });

        assert_eq!(missing.to_error_payload().code, "intent.not_found");
        assert_eq!(consumed.to_error_payload().code, "intent.inactive");
        assert!(!missing.is_retryable());
        assert!(!consumed.is_retryable());
    }

    #[test]
    fn maps_wallet_failures() {
        let short = Error::from(TransactionError::InsufficientBalance {
            available: 10,
            required: 100,
        });
        let payload = short.to_error_payload();
        assert_eq!(payload.domain, ErrorDomain::Wallet);
        assert_eq!(payload.code, "wallet.insufficient_balance");
        assert!(payload.retryable);

        let failed = Error::from(TransactionError::PaymentFailed {
            user: "@alice".to_string(),
            source: WalletError::Rejected("no route".to_string()),
        });
        assert_eq!(failed.to_error_payload().code, "wallet.payment_failed");
        assert!(!failed.is_retryable());
    }

    #[test]
    fn maps_lock_failures_as_retryable() {
        let err = Error::from(LockError::Timeout {
            key: "faucet:abc:30".to_string(),
            timeout: Duration::from_millis(250),
        });
        let payload = err.to_error_payload();
        assert_eq!(payload.domain, ErrorDomain::Lock);
        assert_eq!(payload.code, "lock.timeout");
        assert!(payload.retryable);
    }

    #[test]
    fn unsettled_invoice_is_retryable() {
        let err = Error::from(IntentError::InvoiceNotSettled {
            id: "proxypay:1:21:abcdefgh".to_string(),
            payment_hash: "00ff".to_string(),
        });
        let payload = err.to_error_payload();
        assert_eq!(payload.code, "intent.invoice_not_settled");
        assert!(payload.retryable);
    }

    #[test]
    fn validation_errors_are_flagged() {
        assert!(
            IntentError::SelfPayment {
                user: "@bob".to_string()
            }
            .is_validation()
        );
        assert!(
            !IntentError::Inactive {
                id: "x".to_string()
            }
            .is_validation()
        );
    }

    #[test]
    fn serializes_error_payload() {
        let payload = Error::from(IntentError::AlreadyClaimed {
            id: "faucet:abc:30".to_string(),
            user: "@carol".to_string(),
        })
        .to_error_payload();
        let encoded = payload.to_status_line();
        let value: serde_json::Value = serde_json::from_str(&encoded).expect("valid json");

        assert_eq!(value["domain"], "validation");
        assert_eq!(value["code"], "validation.already_claimed");
        assert_eq!(value["retryable"], false);
    }
}
