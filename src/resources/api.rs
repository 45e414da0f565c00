//! `@api`: HTTP client factory and named API clients
//!
//! Depends on `@auth`: clients read bearer tokens from the auth runtime's
//! token store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::CredentialSink;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::crds::client::{CrdsUserClient, SERVICE as CRDS_SERVICE};
use crate::scenario::ScenarioContext;
use crate::transport::{HttpClient, HttpResponse};

use super::auth::ensure_auth;
use super::{cached, store, ResourceKind, Runtime};

/// Registry name of the CRDS user client
pub const CRDS_USER_CLIENT: &str = "crds_user";

/// Default HTTP timeout in seconds
const DEFAULT_TIMEOUT_SECS: f64 = 10.0;

/// Builds and caches one [`HttpClient`] per service
pub struct HttpClientFactory {
    config: Arc<Config>,
    credentials: Arc<dyn CredentialSink>,
    validate_schema: bool,
    timeout: Duration,
    clients: Mutex<BTreeMap<String, Arc<HttpClient>>>,
}

impl HttpClientFactory {
    pub fn new(
        config: Arc<Config>,
        credentials: Arc<dyn CredentialSink>,
        validate_schema: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            config,
            credentials,
            validate_schema,
            timeout,
            clients: Mutex::new(BTreeMap::new()),
        }
    }

    /// Client for a service, built from `<service>.http.base_url` or `http.base_url`
    pub fn get(&self, service: &str) -> Result<Arc<HttpClient>> {
        let key = if service.trim().is_empty() {
            "default"
        } else {
            service.trim()
        };

        let mut clients = self.lock();
        if let Some(client) = clients.get(key) {
            return Ok(Arc::clone(client));
        }

        let service_key = format!("{}.http.base_url", key);
        let base_url = self
            .config
            .first_str(&[service_key.as_str(), "http.base_url"])
            .ok_or_else(|| Error::missing_config(&service_key))?;
        let client = Arc::new(HttpClient::new(
            &base_url,
            Arc::clone(&self.credentials),
            self.timeout,
            self.validate_schema,
        )?);
        tracing::debug!(service = key, base_url = %base_url, "HTTP client created");
        clients.insert(key.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Services with a built client
    pub fn services(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Close every client built so far, returning how many were closed
    pub fn close_all(&self) -> usize {
        let clients = self.lock();
        for client in clients.values() {
            client.close();
        }
        clients.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<HttpClient>>> {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Arguments for a by-name client call
#[derive(Debug, Clone, Default)]
pub struct ClientCall {
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, Value>,
    pub body: Option<Value>,
}

/// A service client whose operations steps can invoke by name
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Operation names accepted by [`ApiClient::call`]
    fn methods(&self) -> &'static [&'static str];

    async fn call(&self, method: &str, call: ClientCall) -> Result<HttpResponse>;
}

/// API clients keyed by name
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: BTreeMap<String, Arc<dyn ApiClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, client: Arc<dyn ApiClient>) {
        self.clients.insert(name.to_string(), client);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ApiClient>> {
        self.clients.get(name).cloned().ok_or_else(|| {
            let available: Vec<&str> = self.names();
            Error::alias_not_found("Client", name, &available)
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.clients.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

pub struct ApiRuntime {
    http_factory: Arc<HttpClientFactory>,
    clients: ClientRegistry,
    crds_user: Option<Arc<CrdsUserClient>>,
}

impl ApiRuntime {
    pub fn http_factory(&self) -> Arc<HttpClientFactory> {
        Arc::clone(&self.http_factory)
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn crds_user(&self) -> Option<Arc<CrdsUserClient>> {
        self.crds_user.clone()
    }

    /// Close every HTTP client the factory built
    pub async fn release(&self) -> Result<()> {
        let closed = self.http_factory.close_all();
        tracing::debug!(closed, "HTTP clients closed");
        Ok(())
    }
}

/// Whether `<service>.http.base_url` is configured
fn has_service(config: &Config, service: &str) -> bool {
    config.get_str(&format!("{}.http.base_url", service)).is_some()
}

/// Provision or reuse the HTTP factory and API clients
pub async fn ensure_api(ctx: &mut ScenarioContext<'_>) -> Result<Arc<ApiRuntime>> {
    if let Some(runtime) = cached(ctx.registry_mut(), ResourceKind::Api, Runtime::as_api)? {
        bind(ctx, &runtime)?;
        return Ok(runtime);
    }

    let auth = ensure_auth(ctx).await?;

    let config = ctx.config_arc();
    let validate_schema = config.get_bool("validate_schema", false);
    let timeout = config.get_duration("http.timeout_secs", DEFAULT_TIMEOUT_SECS)?;
    let http_factory = Arc::new(HttpClientFactory::new(
        Arc::clone(&config),
        auth.credentials(),
        validate_schema,
        timeout,
    ));

    let mut clients = ClientRegistry::new();
    let mut crds_user = None;
    if has_service(&config, CRDS_SERVICE) {
        let client = Arc::new(CrdsUserClient::new(http_factory.get(CRDS_SERVICE)?));
        clients.insert(CRDS_USER_CLIENT, client.clone());
        crds_user = Some(client);
    } else {
        tracing::debug!("crds.http.base_url not set; CRDS user client not registered");
    }

    let runtime = Arc::new(ApiRuntime {
        http_factory,
        clients,
        crds_user,
    });
    store(ctx.registry_mut(), Runtime::Api(runtime.clone()))?;
    bind(ctx, &runtime)?;
    tracing::debug!(scenario = %ctx.scenario_id(), "API resource provisioned");
    Ok(runtime)
}

fn bind(ctx: &mut ScenarioContext<'_>, runtime: &ApiRuntime) -> Result<()> {
    if has_service(ctx.config(), CRDS_SERVICE) {
        ctx.bindings.http_client = Some(runtime.http_factory.get(CRDS_SERVICE)?);
    }
    ctx.bindings.http_factory = Some(runtime.http_factory());
    ctx.bindings.clients = Some(runtime.clients.clone());
    ctx.bindings.crds_user = runtime.crds_user();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenStore;

    fn factory(toml: &str) -> HttpClientFactory {
        let table: toml::Table = toml::from_str(toml).unwrap();
        HttpClientFactory::new(
            Arc::new(Config::from_table("dev", table)),
            Arc::new(TokenStore::new()),
            false,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_factory_caches_per_service() {
        let f = factory("[crds.http]\nbase_url = \"http://crds.local\"\n");
        let a = f.get("crds").unwrap();
        let b = f.get("crds").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.base_url().as_str(), "http://crds.local/");
        assert_eq!(f.services(), vec!["crds".to_string()]);
    }

    #[test]
    fn test_factory_falls_back_to_shared_base_url() {
        let f = factory("[http]\nbase_url = \"http://shared.local/api\"\n");
        let client = f.get("billing").unwrap();
        assert_eq!(client.base_url().as_str(), "http://shared.local/api/");
        assert!(f.get("").is_ok());
    }

    #[test]
    fn test_factory_missing_base_url() {
        let f = factory("");
        let err = f.get("crds").err().unwrap();
        assert!(matches!(err, Error::MissingConfig { ref key, .. } if key == "crds.http.base_url"));
        assert!(err.to_string().contains("E2E__CRDS__HTTP__BASE_URL"));
    }

    #[test]
    fn test_close_all() {
        let f = factory("[http]\nbase_url = \"http://shared.local\"\n");
        let a = f.get("a").unwrap();
        f.get("b").unwrap();
        assert_eq!(f.close_all(), 2);
        assert!(a.is_closed());
    }

    #[test]
    fn test_client_registry_lookup() {
        let registry = ClientRegistry::new();
        let err = registry.get("crds_user").err().unwrap();
        assert_eq!(
            err.to_string(),
            "Client alias 'crds_user' not found. Available: [<none>]"
        );
    }
}
