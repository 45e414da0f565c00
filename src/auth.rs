//! Bearer token storage
//!
//! Auth steps write tokens per service; transport clients read them at
//! request time. A missing token is not an error: the caller decides whether
//! the request needs auth.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::common::{Error, Result};

/// Read/write access to per-service credentials
pub trait CredentialSink: Send + Sync {
    /// Token for a service, if one is set
    fn get_token(&self, service: &str) -> Option<String>;

    /// Set or clear (`None`) the token for a service
    fn set_token(&self, service: &str, token: Option<&str>) -> Result<()>;
}

/// Mutex-guarded map from service name to bearer token
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: Mutex<HashMap<String, String>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored token
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still a valid map
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialSink for TokenStore {
    fn get_token(&self, service: &str) -> Option<String> {
        let key = service.trim();
        if key.is_empty() {
            return None;
        }
        self.lock().get(key).cloned()
    }

    fn set_token(&self, service: &str, token: Option<&str>) -> Result<()> {
        let key = service.trim();
        if key.is_empty() {
            return Err(Error::Config("service is required to set a token".to_string()));
        }
        let mut tokens = self.lock();
        match token.filter(|t| !t.is_empty()) {
            Some(token) => {
                tokens.insert(key.to_string(), token.to_string());
                tracing::debug!(service = key, "Token set");
            }
            None => {
                tokens.remove(key);
                tracing::debug!(service = key, "Token cleared");
            }
        }
        Ok(())
    }
}
