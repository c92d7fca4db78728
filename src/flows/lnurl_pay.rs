//! LNURL-pay: resolve a payee's pay parameters, pick an amount, fetch an
//! invoice from the callback and hand it to the pay flow for confirmation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{ExternalError, IntentError, Result};
use crate::flows::{FlowContext, PayFlow, PayQuote, require_owner, require_wallet, to_msat};
use crate::intent::{Intent, IntentBase, IntentId, IntentKind, IntentStore};
use crate::wallet::UserRef;

/// Pay parameters as served by an LNURL-pay endpoint. Amounts are in msat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlPayParams {
    pub callback: Url,
    pub min_sendable: u64,
    pub max_sendable: u64,
    /// Raw metadata JSON string, hashed into the invoice description.
    pub metadata: String,
    #[serde(default)]
    pub comment_allowed: usize,
}

impl LnurlPayParams {
    pub fn domain(&self) -> &str {
        self.callback.host_str().unwrap_or_default()
    }

    fn check_amount(&self, amount: u64) -> Result<()> {
        let msat = to_msat(amount)?;
        // Endpoints that leave either bound unset accept anything.
        if self.min_sendable == 0 || self.max_sendable == 0 {
            return Ok(());
        }
        if msat < self.min_sendable || msat > self.max_sendable {
            return Err(IntentError::InvalidAmount {
                reason: format!(
                    "amount must be between {} and {} sat",
                    self.min_sendable / 1000,
                    self.max_sendable / 1000
                ),
            }
            .into());
        }
        Ok(())
    }
}

/// Callback response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlPayValues {
    pub pr: String,
    pub success_action: Option<String>,
}

#[async_trait]
pub trait LnurlResolver: Send + Sync {
    async fn fetch_invoice(
        &self,
        params: &LnurlPayParams,
        amount_msat: u64,
        comment: &str,
    ) -> std::result::Result<LnurlPayValues, ExternalError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlPayState {
    pub base: IntentBase,
    pub from: UserRef,
    pub params: LnurlPayParams,
    /// Sats; unset until the user picks one.
    pub amount: Option<u64>,
    pub comment: String,
    pub description_hash: String,
}

impl Intent for LnurlPayState {
    const KIND: IntentKind = IntentKind::LnurlPay;

    fn base(&self) -> &IntentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IntentBase {
        &mut self.base
    }
}

pub struct LnurlPayFlow {
    ctx: FlowContext,
    store: IntentStore<LnurlPayState>,
    resolver: Arc<dyn LnurlResolver>,
    pay: PayFlow,
}

impl LnurlPayFlow {
    pub fn new(ctx: FlowContext, resolver: Arc<dyn LnurlResolver>) -> Self {
        let store = ctx.store(ctx.config.intents.ttl);
        let pay = PayFlow::new(ctx.clone());
        Self {
            ctx,
            store,
            resolver,
            pay,
        }
    }

    pub async fn create(
        &self,
        from: &UserRef,
        params: LnurlPayParams,
        amount: Option<u64>,
        comment: &str,
    ) -> Result<LnurlPayState> {
        require_wallet(from)?;
        let amount = if params.min_sendable > 0 && params.min_sendable == params.max_sendable {
            Some(params.max_sendable / 1000)
        } else {
            amount
        };
        if let Some(amount) = amount {
            params.check_amount(amount)?;
        }

        let state = LnurlPayState {
            base: IntentBase::new(IntentId::generate(
                IntentKind::LnurlPay,
                from.id,
                amount.unwrap_or_default(),
            )),
            from: from.clone(),
            amount,
            comment: comment.chars().take(params.comment_allowed).collect(),
            description_hash: description_hash(&params.metadata),
            params,
        };
        self.store.save(&state).await?;
        tracing::info!(
            intent_id = %state.base.id,
            domain = state.params.domain(),
            amount = ?state.amount,
            "LNURL-pay started"
        );
        Ok(state)
    }

    pub async fn get(&self, id: &str) -> Result<LnurlPayState> {
        self.store.load(id).await
    }

    pub async fn set_amount(&self, id: &str, by: &UserRef, amount: u64) -> Result<LnurlPayState> {
        let mut admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        require_owner(id, &admitted.intent.from, by)?;
        admitted.intent.params.check_amount(amount)?;
        admitted.intent.amount = Some(amount);
        admitted.commit().await
    }

    /// Fetch the invoice and open a pay intent for it.
    ///
    /// The LNURL state is spent before the callback is tried, so a callback
    /// is hit at most once per intent.
    pub async fn request_invoice(&self, id: &str, by: &UserRef) -> Result<PayQuote> {
        let mut admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        let state = &admitted.intent;
        require_owner(id, &state.from, by)?;
        let amount = state.amount.ok_or_else(|| IntentError::InvalidAmount {
            reason: "no amount chosen".to_string(),
        })?;
        let amount_msat = to_msat(amount)?;
        admitted.reserve().await?;

        let state = admitted.intent.clone();
        let fetched = self
            .resolver
            .fetch_invoice(&state.params, amount_msat, &state.comment)
            .await;
        drop(admitted);
        let values = fetched.inspect_err(|e| {
            tracing::warn!(intent_id = %id, domain = state.params.domain(), error = %e, "LNURL callback failed");
        })?;

        let quote = self
            .pay
            .create(&state.from, &values.pr, values.success_action)
            .await?;
        if quote.intent.amount != amount {
            self.pay
                .cancel(quote.intent.base.id.as_str(), &state.from)
                .await?;
            return Err(ExternalError::Rejected {
                service: state.params.domain().to_string(),
                reason: format!(
                    "invoice is for {} sat, expected {amount} sat",
                    quote.intent.amount
                ),
            }
            .into());
        }
        Ok(quote)
    }

    pub async fn cancel(&self, id: &str, by: &UserRef) -> Result<LnurlPayState> {
        let admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        require_owner(id, &admitted.intent.from, by)?;
        admitted.cancel().await
    }
}

fn description_hash(metadata: &str) -> String {
    format!("{:x}", Sha256::digest(metadata.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::flows::testing::Harness;
    use crate::wallet::{LedgerWallet, WalletRef, WalletService};
    use std::sync::Mutex;

    /// Issues invoices on a ledger wallet, optionally for the wrong amount.
    struct LedgerResolver {
        ledger: Arc<LedgerWallet>,
        payee: WalletRef,
        overcharge: u64,
        calls: Mutex<Vec<(u64, String)>>,
    }

    #[async_trait]
    impl LnurlResolver for LedgerResolver {
        async fn fetch_invoice(
            &self,
            _params: &LnurlPayParams,
            amount_msat: u64,
            comment: &str,
        ) -> std::result::Result<LnurlPayValues, ExternalError> {
            self.calls
                .lock()
                .unwrap()
                .push((amount_msat, comment.to_string()));
            let invoice = self
                .ledger
                .create_invoice(&self.payee, amount_msat / 1000 + self.overcharge, comment)
                .await
                .map_err(|e| ExternalError::RequestFailed {
                    service: "lnurl".to_string(),
                    reason: e.to_string(),
                })?;
            Ok(LnurlPayValues {
                pr: invoice.payment_request,
                success_action: Some("see you soon".to_string()),
            })
        }
    }

    fn params(min: u64, max: u64) -> LnurlPayParams {
        LnurlPayParams {
            callback: Url::parse("https://shop.example.com/lnurlp/cb").unwrap(),
            min_sendable: min,
            max_sendable: max,
            metadata: r#"[["text/plain","coffee"]]"#.to_string(),
            comment_allowed: 5,
        }
    }

    fn setup(overcharge: u64) -> (Harness, Arc<LedgerResolver>, LnurlPayFlow, UserRef) {
        let h = Harness::new();
        let alice = h.user(1, "alice", 1_000);
        let resolver = Arc::new(LedgerResolver {
            ledger: h.ledger.clone(),
            payee: h.ledger.open_wallet("shop", 0),
            overcharge,
            calls: Mutex::new(Vec::new()),
        });
        let flow = LnurlPayFlow::new(h.ctx.clone(), resolver.clone());
        (h, resolver, flow, alice)
    }

    #[tokio::test]
    async fn fixed_amount_flows_into_pay() {
        let (h, resolver, flow, alice) = setup(0);
        let state = flow
            .create(&alice, params(21_000, 21_000), None, "hello world")
            .await
            .unwrap();
        assert_eq!(state.amount, Some(21));
        assert_eq!(state.comment, "hello");
        assert_eq!(state.params.domain(), "shop.example.com");
        assert_eq!(state.description_hash.len(), 64);

        let id = state.base.id.as_str();
        let quote = flow.request_invoice(id, &alice).await.unwrap();
        assert_eq!(quote.intent.amount, 21);
        assert_eq!(quote.intent.success_action.as_deref(), Some("see you soon"));
        assert_eq!(
            resolver.calls.lock().unwrap().clone(),
            vec![(21_000, "hello".to_string())]
        );
        assert!(matches!(
            flow.request_invoice(id, &alice).await,
            Err(Error::Intent(IntentError::Inactive { .. }))
        ));

        let paid = PayFlow::new(h.ctx.clone())
            .confirm(quote.intent.base.id.as_str(), &alice)
            .await
            .unwrap();
        assert!(paid.success);
        assert_eq!(h.balance(&alice), 979);
    }

    #[tokio::test]
    async fn amount_must_fit_range() {
        let (_h, _resolver, flow, alice) = setup(0);
        assert!(matches!(
            flow.create(&alice, params(10_000, 100_000), Some(5), "").await,
            Err(Error::Intent(IntentError::InvalidAmount { .. }))
        ));

        let state = flow
            .create(&alice, params(10_000, 100_000), None, "")
            .await
            .unwrap();
        let id = state.base.id.as_str();
        assert!(matches!(
            flow.request_invoice(id, &alice).await,
            Err(Error::Intent(IntentError::InvalidAmount { .. }))
        ));
        assert!(flow.set_amount(id, &alice, 101).await.is_err());
        assert_eq!(flow.set_amount(id, &alice, 50).await.unwrap().amount, Some(50));
        assert_eq!(flow.request_invoice(id, &alice).await.unwrap().intent.amount, 50);
    }

    #[tokio::test]
    async fn oversized_amounts_are_rejected_up_front() {
        let (_h, resolver, flow, alice) = setup(0);
        assert!(matches!(
            flow.create(&alice, params(0, 0), Some(u64::MAX / 100), "").await,
            Err(Error::Intent(IntentError::InvalidAmount { .. }))
        ));

        let state = flow.create(&alice, params(0, 0), None, "").await.unwrap();
        let id = state.base.id.as_str();
        assert!(matches!(
            flow.set_amount(id, &alice, u64::MAX / 100).await,
            Err(Error::Intent(IntentError::InvalidAmount { .. }))
        ));
        assert!(flow.get(id).await.unwrap().base.active);
        assert!(resolver.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatched_invoice_amount_is_rejected() {
        let (_h, _resolver, flow, alice) = setup(1);
        let state = flow
            .create(&alice, params(0, 0), Some(30), "")
            .await
            .unwrap();
        assert!(matches!(
            flow.request_invoice(state.base.id.as_str(), &alice).await,
            Err(Error::External(ExternalError::Rejected { .. }))
        ));
    }
}
