//! Persisted intents.
//!
//! An intent is the record of a pending chat action: created when the user
//! issues a command, consumed (at most once) when the matching trigger
//! arrives. Its id is the callback token, the storage key and the lock key.

mod lifecycle;
mod store;

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use lifecycle::{Admitted, IntentLifecycle};
pub use store::IntentStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(String);

impl IntentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id for an intent of `kind` created by `user_id` over `amount` sats.
    pub fn generate(kind: IntentKind, user_id: i64, amount: u64) -> Self {
        let id = match kind {
            IntentKind::InlineSend => format!("inl-send-{user_id}-{amount}-{}", random_suffix(5)),
            IntentKind::InlineReceive => {
                format!("inl-receive-{user_id}-{amount}-{}", random_suffix(5))
            }
            IntentKind::Faucet => format!("faucet:{}:{amount}", random_suffix(10)),
            IntentKind::Pay => format!("pay:{user_id}-{amount}-{}", random_suffix(5)),
            IntentKind::LnurlPay => format!("lnurlp-{user_id}-{}", random_suffix(5)),
            IntentKind::LnurlAuth => format!("lnurlauth-{user_id}-{}", random_suffix(5)),
            IntentKind::LnurlWithdraw => format!("lnurlw-{user_id}-{}", random_suffix(5)),
            IntentKind::ProxyPay => format!("proxypay:{user_id}:{amount}:{}", random_suffix(8)),
        };
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    InlineSend,
    InlineReceive,
    Faucet,
    Pay,
    LnurlPay,
    LnurlAuth,
    LnurlWithdraw,
    ProxyPay,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InlineSend => "inline_send",
            Self::InlineReceive => "inline_receive",
            Self::Faucet => "faucet",
            Self::Pay => "pay",
            Self::LnurlPay => "lnurl_pay",
            Self::LnurlAuth => "lnurl_auth",
            Self::LnurlWithdraw => "lnurl_withdraw",
            Self::ProxyPay => "proxy_pay",
        }
    }
}

/// Lifecycle fields every intent carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentBase {
    pub id: IntentId,
    pub active: bool,
    /// Set together with `active = false` when a user cancelled.
    pub canceled: bool,
    pub created_at: DateTime<Utc>,
}

impl IntentBase {
    pub fn new(id: IntentId) -> Self {
        Self {
            id,
            active: true,
            canceled: false,
            created_at: Utc::now(),
        }
    }
}

/// A concrete intent type. The kind is fixed per type, so a store for one
/// type never hands back another.
pub trait Intent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: IntentKind;

    fn base(&self) -> &IntentBase;

    fn base_mut(&mut self) -> &mut IntentBase;

    fn id(&self) -> &IntentId {
        &self.base().id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_kind_formats() {
        let send = IntentId::generate(IntentKind::InlineSend, 42, 1000);
        assert!(send.as_str().starts_with("inl-send-42-1000-"));
        assert_eq!(send.as_str().len(), "inl-send-42-1000-".len() + 5);

        let faucet = IntentId::generate(IntentKind::Faucet, 42, 30);
        let parts: Vec<_> = faucet.as_str().split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "faucet");
        assert_eq!(parts[1].len(), 10);
        assert_eq!(parts[2], "30");

        let proxy = IntentId::generate(IntentKind::ProxyPay, 7, 21);
        assert!(proxy.as_str().starts_with("proxypay:7:21:"));

        assert!(IntentId::generate(IntentKind::Pay, 7, 5).as_str().starts_with("pay:7-5-"));
        assert!(IntentId::generate(IntentKind::LnurlAuth, 7, 0).as_str().starts_with("lnurlauth-7-"));
        assert!(IntentId::generate(IntentKind::LnurlWithdraw, 7, 0).as_str().starts_with("lnurlw-7-"));
    }

    #[test]
    fn generated_ids_differ() {
        let a = IntentId::generate(IntentKind::LnurlPay, 1, 0);
        let b = IntentId::generate(IntentKind::LnurlPay, 1, 0);
        assert_ne!(a, b);
    }
}
