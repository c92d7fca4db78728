//! Node proxy: funds paid into a user's custodial wallet are forwarded to the
//! user's own node, and the node-side invoice is watched until it settles.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ExternalError, IntentError, Result, TransactionError};
use crate::flows::{FlowContext, reopen_after, require_positive, require_wallet, to_msat};
use crate::intent::{Intent, IntentBase, IntentId, IntentKind, IntentStore};
use crate::notify::{Notice, Notifier};
use crate::runtime::{PollCallbacks, PollHandle, PollSchedule, PollStart};
use crate::transaction::{TransactionRecord, TransferMeta};
use crate::wallet::{Invoice, UserRef};

const INBOUND_MEMO: &str = "Payment proxy in";
const OUTBOUND_MEMO: &str = "Payment proxy out";
const SETTLED: &str = "SETTLED";

/// A user's registered node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    /// Backend flavour, e.g. `lnd` or `lnbits`.
    pub kind: String,
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInvoice {
    pub payment_request: String,
    pub hash: String,
    /// Sats.
    pub amount: u64,
    /// As reported by the node.
    pub status: String,
}

impl NodeInvoice {
    pub fn is_settled(&self) -> bool {
        self.status == SETTLED
    }
}

/// Talks to the user's own node. Credentials live with the implementation.
#[async_trait]
pub trait NodeBackend: Send + Sync {
    async fn make_invoice(
        &self,
        node: &NodeRef,
        amount_msat: u64,
        description: &str,
    ) -> std::result::Result<NodeInvoice, ExternalError>;

    /// Fresh status of `invoice`.
    async fn check_invoice(
        &self,
        node: &NodeRef,
        invoice: &NodeInvoice,
    ) -> std::result::Result<NodeInvoice, ExternalError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPay {
    pub base: IntentBase,
    pub user: UserRef,
    pub node: NodeRef,
    pub amount: u64,
    /// Invoice on the user's custodial wallet that funds the relay.
    pub inbound: Invoice,
    pub outbound: Option<NodeInvoice>,
}

impl Intent for ProxyPay {
    const KIND: IntentKind = IntentKind::ProxyPay;

    fn base(&self) -> &IntentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IntentBase {
        &mut self.base
    }
}

#[derive(Debug)]
pub struct ProxyReceipt {
    pub record: TransactionRecord,
    pub watch: PollHandle,
}

pub struct NodeProxyFlow {
    ctx: FlowContext,
    store: IntentStore<ProxyPay>,
    backend: Arc<dyn NodeBackend>,
}

impl NodeProxyFlow {
    pub fn new(ctx: FlowContext, backend: Arc<dyn NodeBackend>) -> Self {
        let store = ctx.store(ctx.config.intents.ttl);
        Self {
            ctx,
            store,
            backend,
        }
    }

    /// Issue the inbound invoice whose settlement triggers [`relay`](Self::relay).
    pub async fn open(&self, user: &UserRef, node: NodeRef, amount: u64) -> Result<ProxyPay> {
        require_positive(amount)?;
        to_msat(amount)?;
        let wallet = require_wallet(user)?;
        let inbound = self
            .ctx
            .wallet
            .create_invoice(wallet, amount, INBOUND_MEMO)
            .await?;

        let proxy = ProxyPay {
            base: IntentBase::new(IntentId::generate(IntentKind::ProxyPay, user.id, amount)),
            user: user.clone(),
            node,
            amount,
            inbound,
            outbound: None,
        };
        self.store.save(&proxy).await?;
        tracing::info!(intent_id = %proxy.base.id, user = user.id, node = %proxy.node.host, amount, "Proxy payment opened");
        Ok(proxy)
    }

    pub async fn get(&self, id: &str) -> Result<ProxyPay> {
        self.store.load(id).await
    }

    /// Forward the inbound amount to the user's node.
    ///
    /// Nothing moves until the inbound invoice has settled. A node that cannot
    /// issue an invoice, or a wallet that is short, leaves the intent open for
    /// the next settlement event.
    pub async fn relay(&self, id: &str) -> Result<ProxyReceipt> {
        let mut admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        let user = admitted.intent.user.clone();
        let node = admitted.intent.node.clone();
        let amount = admitted.intent.amount;
        let amount_msat = to_msat(amount)?;

        let wallet = require_wallet(&user)?;
        let payment_hash = admitted.intent.inbound.payment_hash.clone();
        if !self.ctx.wallet.invoice_status(wallet, &payment_hash).await? {
            tracing::debug!(intent_id = %id, payment_hash = %payment_hash, "Inbound invoice not settled");
            return Err(IntentError::InvoiceNotSettled {
                id: id.to_string(),
                payment_hash,
            }
            .into());
        }
        admitted.reserve().await?;

        let outbound = match self
            .backend
            .make_invoice(&node, amount_msat, OUTBOUND_MEMO)
            .await
        {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::warn!(intent_id = %id, node = %node.host, error = %e, "Node could not issue invoice");
                return Err(reopen_after(admitted, e).await);
            }
        };

        let outcome = self
            .ctx
            .executor
            .pay_invoice(
                &user,
                &outbound.payment_request,
                amount,
                TransferMeta::new("proxy pay", OUTBOUND_MEMO),
            )
            .await;
        match outcome.result {
            Ok(_) => {
                admitted.intent.outbound = Some(outbound.clone());
                if let Err(e) = admitted.checkpoint().await {
                    tracing::warn!(intent_id = %id, error = %e, "Could not record outbound invoice");
                }
                drop(admitted);
            }
            Err(e @ TransactionError::InsufficientBalance { .. }) => {
                return Err(reopen_after(admitted, e).await);
            }
            Err(e) => {
                drop(admitted);
                self.ctx.notifier.notify(
                    &user,
                    Notice::PaymentFailed {
                        intent_id: id.to_string(),
                        reason: e.to_string(),
                    },
                );
                return Err(Error::from(e));
            }
        }
        tracing::info!(intent_id = %id, node = %node.host, amount, "Proxy payment relayed");

        self.ctx.notifier.notify(
            &user,
            Notice::PaymentSent {
                to: node.host.clone(),
                amount,
            },
        );
        let watch = self.watch_invoice(&user, &node, outbound).handle().clone();
        Ok(ProxyReceipt {
            record: outcome.record,
            watch,
        })
    }

    /// Poll the node until `invoice` settles or the deadline passes.
    ///
    /// Watching a hash that is already watched resets that watch's deadline.
    pub fn watch_invoice(&self, user: &UserRef, node: &NodeRef, invoice: NodeInvoice) -> PollStart {
        let key = watch_key(&invoice.hash);
        let watch = InvoiceWatch {
            backend: Arc::clone(&self.backend),
            notifier: self.ctx.notifier.clone(),
            user: user.clone(),
            node: node.clone(),
            invoice,
        };
        let start = self
            .ctx
            .poller
            .start(&key, PollSchedule::from(self.ctx.config.poller), watch);
        if start.is_reused() {
            tracing::debug!(key = %key, "Invoice watch already running");
        }
        start
    }
}

fn watch_key(hash: &str) -> String {
    format!("node-invoice:{hash}")
}

struct InvoiceWatch {
    backend: Arc<dyn NodeBackend>,
    notifier: Notifier,
    user: UserRef,
    node: NodeRef,
    invoice: NodeInvoice,
}

#[async_trait]
impl PollCallbacks for InvoiceWatch {
    async fn on_tick(&mut self, job: &PollHandle) {
        match self.backend.check_invoice(&self.node, &self.invoice).await {
            Ok(checked) if checked.is_settled() => {
                tracing::debug!(key = job.key(), "Node invoice settled");
                self.invoice = checked;
                self.notifier.notify(
                    &self.user,
                    Notice::InvoiceSettled {
                        payment_hash: self.invoice.hash.clone(),
                        amount: self.invoice.amount,
                    },
                );
                job.cancel();
            }
            Ok(checked) => {
                tracing::debug!(key = job.key(), status = %checked.status, "Node invoice pending");
            }
            Err(e) => tracing::warn!(key = job.key(), error = %e, "Node invoice check failed"),
        }
    }

    async fn on_deadline(&mut self) {
        self.notifier.notify(
            &self.user,
            Notice::InvoiceNotSettled {
                payment_hash: self.invoice.hash.clone(),
                can_recheck: true,
            },
        );
    }
}
