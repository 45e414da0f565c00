//! `@auth`: the shared token store

use std::sync::Arc;

use crate::auth::{CredentialSink, TokenStore};
use crate::common::Result;
use crate::scenario::ScenarioContext;

use super::{cached, store, ResourceKind, Runtime};

pub struct AuthRuntime {
    tokens: Arc<TokenStore>,
}

impl AuthRuntime {
    pub fn new(tokens: Arc<TokenStore>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> Arc<TokenStore> {
        Arc::clone(&self.tokens)
    }

    /// Token store as a credential sink for transport clients
    pub fn credentials(&self) -> Arc<dyn CredentialSink> {
        self.tokens.clone()
    }

    /// Nothing to close; tokens go away with the runtime
    pub async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Provision or reuse the token store
pub async fn ensure_auth(ctx: &mut ScenarioContext<'_>) -> Result<Arc<AuthRuntime>> {
    if let Some(runtime) = cached(ctx.registry_mut(), ResourceKind::Auth, Runtime::as_auth)? {
        ctx.bindings.tokens = Some(runtime.tokens());
        return Ok(runtime);
    }

    let runtime = Arc::new(AuthRuntime::new(Arc::new(TokenStore::new())));
    store(ctx.registry_mut(), Runtime::Auth(runtime.clone()))?;
    ctx.bindings.tokens = Some(runtime.tokens());
    tracing::debug!(scenario = %ctx.scenario_id(), "Auth resource provisioned");
    Ok(runtime)
}
