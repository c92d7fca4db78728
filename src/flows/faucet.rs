//! Faucets: an owner locks up `capacity` sats and every distinct claimant
//! gets `per_user` until the faucet runs dry.

use serde::{Deserialize, Serialize};

use crate::error::{IntentError, Result, TransactionError};
use crate::flows::{FlowContext, reopen_after, require_owner, require_wallet};
use crate::intent::{Admitted, Intent, IntentBase, IntentId, IntentKind, IntentStore};
use crate::notify::Notice;
use crate::transaction::{TransactionRecord, TransferMeta};
use crate::wallet::UserRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faucet {
    pub base: IntentBase,
    pub from: UserRef,
    pub capacity: u64,
    pub per_user: u64,
    pub remaining: u64,
    pub n_total: u64,
    pub n_taken: u64,
    pub takers: Vec<UserRef>,
    pub memo: String,
    /// Created from an inline query rather than a chat command.
    pub inline: bool,
}

impl Intent for Faucet {
    const KIND: IntentKind = IntentKind::Faucet;

    fn base(&self) -> &IntentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IntentBase {
        &mut self.base
    }
}

impl Faucet {
    fn has_taken(&self, user: &UserRef) -> bool {
        self.takers.iter().any(|taker| taker.id == user.id)
    }

    fn is_drained(&self) -> bool {
        self.remaining < self.per_user
    }

    fn take(&mut self, claimant: &UserRef) {
        self.remaining -= self.per_user;
        self.n_taken += 1;
        self.takers.push(claimant.clone());
    }

    fn untake(&mut self, claimant: &UserRef) {
        self.remaining += self.per_user;
        self.n_taken = self.n_taken.saturating_sub(1);
        self.takers.retain(|taker| taker.id != claimant.id);
    }
}

/// Result of a successful claim.
#[derive(Debug)]
pub struct ClaimReceipt {
    pub record: TransactionRecord,
    pub remaining: u64,
    /// The claim emptied the faucet.
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaucetSummary {
    pub id: String,
    pub owner: String,
    pub capacity: u64,
    pub per_user: u64,
    pub remaining: u64,
    pub n_taken: u64,
    pub n_total: u64,
    pub takers: Vec<String>,
    pub active: bool,
    pub canceled: bool,
}

impl From<&Faucet> for FaucetSummary {
    fn from(faucet: &Faucet) -> Self {
        Self {
            id: faucet.base.id.to_string(),
            owner: faucet.from.display(),
            capacity: faucet.capacity,
            per_user: faucet.per_user,
            remaining: faucet.remaining,
            n_taken: faucet.n_taken,
            n_total: faucet.n_total,
            takers: faucet.takers.iter().map(UserRef::display).collect(),
            active: faucet.base.active,
            canceled: faucet.base.canceled,
        }
    }
}

pub struct FaucetFlow {
    ctx: FlowContext,
    store: IntentStore<Faucet>,
}

impl FaucetFlow {
    pub fn new(ctx: FlowContext) -> Self {
        let store = ctx.store(ctx.config.intents.ttl);
        Self { ctx, store }
    }

    pub async fn create(
        &self,
        from: &UserRef,
        capacity: u64,
        per_user: u64,
        memo: &str,
        inline: bool,
    ) -> Result<Faucet> {
        let min = self.ctx.config.faucet.min_per_user;
        if per_user < min {
            return Err(IntentError::InvalidAmount {
                reason: format!("per-user amount must be at least {min} sat"),
            }
            .into());
        }
        if capacity == 0 || capacity % per_user != 0 {
            return Err(IntentError::InvalidAmount {
                reason: format!("capacity {capacity} is not a multiple of {per_user}"),
            }
            .into());
        }
        require_wallet(from)?;
        self.ctx.require_balance(from, capacity).await?;

        let faucet = Faucet {
            base: IntentBase::new(IntentId::generate(IntentKind::Faucet, from.id, capacity)),
            from: from.clone(),
            capacity,
            per_user,
            remaining: capacity,
            n_total: capacity / per_user,
            n_taken: 0,
            takers: Vec::new(),
            memo: memo.to_string(),
            inline,
        };
        self.store.save(&faucet).await?;
        tracing::info!(
            intent_id = %faucet.base.id,
            from = from.id,
            capacity,
            per_user,
            inline,
            "Faucet created"
        );
        Ok(faucet)
    }

    pub async fn get(&self, id: &str) -> Result<Faucet> {
        self.store.load(id).await
    }

    pub async fn summary(&self, id: &str) -> Result<FaucetSummary> {
        Ok(FaucetSummary::from(&self.store.load(id).await?))
    }

    /// Pay `per_user` to `claimant`.
    ///
    /// The claim is saved before the payment. A failed payment takes it back.
    pub async fn claim(&self, id: &str, claimant: &UserRef) -> Result<ClaimReceipt> {
        let mut admitted = self.ctx.lifecycle.admit(&self.store, id).await?;

        if admitted.intent.is_drained() {
            self.finish(admitted).await?;
            return Err(IntentError::Inactive { id: id.to_string() }.into());
        }
        let faucet = &admitted.intent;
        if claimant.id == faucet.from.id {
            return Err(IntentError::SelfPayment {
                user: claimant.display(),
            }
            .into());
        }
        if faucet.has_taken(claimant) {
            return Err(IntentError::AlreadyClaimed {
                id: id.to_string(),
                user: claimant.display(),
            }
            .into());
        }
        require_wallet(claimant)?;

        let from = faucet.from.clone();
        let per_user = faucet.per_user;
        let memo = format!("Faucet from {} to {}", from.display(), claimant.display());

        admitted.intent.take(claimant);
        let finished = admitted.intent.is_drained();
        if finished {
            admitted.reserve().await?;
        } else {
            admitted.checkpoint().await?;
        }

        let outcome = self
            .ctx
            .executor
            .send(&from, claimant, per_user, TransferMeta::new("faucet", memo))
            .await;

        match outcome.result {
            Ok(_) => {
                let faucet = admitted.intent.clone();
                drop(admitted);
                tracing::info!(intent_id = %id, claimant = claimant.id, remaining = faucet.remaining, finished, "Faucet claimed");

                self.ctx.notifier.notify(
                    claimant,
                    Notice::PaymentReceived {
                        from: from.display(),
                        amount: per_user,
                        memo: Some(faucet.memo.clone()).filter(|m| !m.is_empty()),
                    },
                );
                self.ctx.notifier.notify(
                    &from,
                    Notice::PaymentSent {
                        to: claimant.display(),
                        amount: per_user,
                    },
                );
                if finished {
                    self.notify_summary(&faucet);
                }
                Ok(ClaimReceipt {
                    record: outcome.record,
                    remaining: faucet.remaining,
                    finished,
                })
            }
            Err(e @ TransactionError::InsufficientBalance { .. }) => {
                tracing::info!(intent_id = %id, "Faucet owner ran out of funds");
                admitted.intent.untake(claimant);
                if let Err(save) = self.finish(admitted).await {
                    tracing::error!(intent_id = %id, error = %save, "Could not close faucet");
                }
                Err(e.into())
            }
            Err(e) => {
                tracing::warn!(intent_id = %id, claimant = claimant.id, error = %e, "Faucet claim failed");
                admitted.intent.untake(claimant);
                Err(reopen_after(admitted, e).await)
            }
        }
    }

    pub async fn cancel(&self, id: &str, by: &UserRef) -> Result<Faucet> {
        let admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        require_owner(id, &admitted.intent.from, by)?;
        let faucet = admitted.cancel().await?;
        tracing::info!(intent_id = %id, n_taken = faucet.n_taken, "Faucet canceled");
        Ok(faucet)
    }

    /// Consume the faucet and send its owner the taker summary.
    async fn finish(&self, admitted: Admitted<Faucet>) -> Result<()> {
        let faucet = admitted.consume().await?;
        self.notify_summary(&faucet);
        Ok(())
    }

    fn notify_summary(&self, faucet: &Faucet) {
        self.ctx.notifier.notify(
            &faucet.from,
            Notice::FaucetSummary {
                faucet_id: faucet.base.id.to_string(),
                memo: faucet.memo.clone(),
                capacity: faucet.capacity,
                remaining: faucet.remaining,
                takers: faucet.takers.iter().map(UserRef::display).collect(),
            },
        );
    }
}
