//! LNURL-auth: confirm a login challenge before it is signed and sent.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, ExternalError, Result};
use crate::flows::{FlowContext, require_owner, require_wallet};
use crate::intent::{Intent, IntentBase, IntentId, IntentKind, IntentStore};
use crate::notify::Notice;
use crate::wallet::UserRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlAuthParams {
    pub callback: Url,
    /// Hex challenge to sign.
    pub k1: String,
}

impl LnurlAuthParams {
    pub fn domain(&self) -> &str {
        self.callback.host_str().unwrap_or_default()
    }
}

/// Signs `k1` with the user's linking key for the domain and calls back.
#[async_trait]
pub trait LnurlAuthenticator: Send + Sync {
    async fn login(
        &self,
        user: &UserRef,
        params: &LnurlAuthParams,
    ) -> std::result::Result<(), ExternalError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlAuthState {
    pub base: IntentBase,
    pub from: UserRef,
    pub params: LnurlAuthParams,
}

impl Intent for LnurlAuthState {
    const KIND: IntentKind = IntentKind::LnurlAuth;

    fn base(&self) -> &IntentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IntentBase {
        &mut self.base
    }
}

pub struct LnurlAuthFlow {
    ctx: FlowContext,
    store: IntentStore<LnurlAuthState>,
    authenticator: Arc<dyn LnurlAuthenticator>,
}

impl LnurlAuthFlow {
    pub fn new(ctx: FlowContext, authenticator: Arc<dyn LnurlAuthenticator>) -> Self {
        let store = ctx.store(ctx.config.intents.ttl);
        Self {
            ctx,
            store,
            authenticator,
        }
    }

    pub async fn create(&self, from: &UserRef, params: LnurlAuthParams) -> Result<LnurlAuthState> {
        require_wallet(from)?;
        let state = LnurlAuthState {
            base: IntentBase::new(IntentId::generate(IntentKind::LnurlAuth, from.id, 0)),
            from: from.clone(),
            params,
        };
        self.store.save(&state).await?;
        tracing::info!(intent_id = %state.base.id, domain = state.params.domain(), "Login requested");
        Ok(state)
    }

    /// Log in. A challenge is answered at most once, whatever the outcome.
    pub async fn confirm(&self, id: &str, by: &UserRef) -> Result<()> {
        let mut admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        require_owner(id, &admitted.intent.from, by)?;
        admitted.reserve().await?;

        let result = self
            .authenticator
            .login(&admitted.intent.from, &admitted.intent.params)
            .await;
        let state = admitted.intent.clone();
        drop(admitted);
        let domain = state.params.domain().to_string();

        match result {
            Ok(()) => {
                tracing::info!(intent_id = %id, domain = %domain, "Login succeeded");
                self.ctx
                    .notifier
                    .notify(&state.from, Notice::LoginSucceeded { domain });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(intent_id = %id, domain = %domain, error = %e, "Login failed");
                self.ctx.notifier.notify(
                    &state.from,
                    Notice::LoginFailed {
                        domain,
                        reason: e.to_string(),
                    },
                );
                Err(Error::from(e))
            }
        }
    }

    pub async fn cancel(&self, id: &str, by: &UserRef) -> Result<LnurlAuthState> {
        let admitted = self.ctx.lifecycle.admit(&self.store, id).await?;
        require_owner(id, &admitted.intent.from, by)?;
        admitted.cancel().await
    }
}
