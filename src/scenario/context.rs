//! Scenario context
//!
//! Everything a step can reach: the scenario's identity, the run config,
//! its [`ScenarioData`] and the typed [`Bindings`] that provisioners fill in.
//! The context borrows the run's registry mutably, so only one scenario can
//! be live per [`Harness`](super::Harness).

use std::sync::Arc;

use crate::auth::TokenStore;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::crds::{CrdsUser, CrdsUserClient};
use crate::resources::{ClientRegistry, Connectors, HttpClientFactory, ResourceRegistry, TeardownReport};
use crate::tag_router;
use crate::transport::{DbClient, HttpClient, KafkaClient, UiDriver};

use super::ScenarioData;

/// Clients bound by provisioners for the current scenario
#[derive(Clone, Default)]
pub struct Bindings {
    pub tokens: Option<Arc<TokenStore>>,
    pub http_factory: Option<Arc<HttpClientFactory>>,
    /// HTTP client for the CRDS service
    pub http_client: Option<Arc<HttpClient>>,
    pub clients: Option<ClientRegistry>,
    pub crds_user: Option<Arc<CrdsUserClient>>,
    pub kafka: Option<Arc<KafkaClient>>,
    pub db: Option<Arc<DbClient>>,
    pub ui: Option<Arc<dyn UiDriver>>,
}

impl Bindings {
    /// Names of the bindings that are set
    pub fn bound(&self) -> Vec<&'static str> {
        let slots = [
            ("tokens", self.tokens.is_some()),
            ("http_factory", self.http_factory.is_some()),
            ("http_client", self.http_client.is_some()),
            ("clients", self.clients.is_some()),
            ("crds_user", self.crds_user.is_some()),
            ("kafka", self.kafka.is_some()),
            ("db", self.db.is_some()),
            ("ui", self.ui.is_some()),
        ];
        slots
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect()
    }

    pub fn require_tokens(&self) -> Result<Arc<TokenStore>> {
        self.tokens.clone().ok_or_else(|| self.missing("tokens"))
    }

    pub fn require_http_factory(&self) -> Result<Arc<HttpClientFactory>> {
        self.http_factory.clone().ok_or_else(|| self.missing("http_factory"))
    }

    pub fn require_http_client(&self) -> Result<Arc<HttpClient>> {
        self.http_client.clone().ok_or_else(|| self.missing("http_client"))
    }

    pub fn require_clients(&self) -> Result<&ClientRegistry> {
        self.clients.as_ref().ok_or_else(|| self.missing("clients"))
    }

    pub fn require_crds_user(&self) -> Result<Arc<CrdsUserClient>> {
        self.crds_user.clone().ok_or_else(|| self.missing("crds_user"))
    }

    pub fn require_kafka(&self) -> Result<Arc<KafkaClient>> {
        self.kafka.clone().ok_or_else(|| self.missing("kafka"))
    }

    pub fn require_db(&self) -> Result<Arc<DbClient>> {
        self.db.clone().ok_or_else(|| self.missing("db"))
    }

    pub fn require_ui(&self) -> Result<Arc<dyn UiDriver>> {
        self.ui.clone().ok_or_else(|| self.missing("ui"))
    }

    fn missing(&self, name: &str) -> Error {
        Error::resource_not_found(name, &self.bound())
    }
}

/// State of one running scenario
pub struct ScenarioContext<'h> {
    scenario_id: String,
    name: String,
    config: Arc<Config>,
    connectors: &'h Connectors,
    registry: &'h mut ResourceRegistry,
    pub data: ScenarioData,
    pub bindings: Bindings,
}

impl<'h> ScenarioContext<'h> {
    pub(crate) fn new(
        scenario_id: String,
        name: &str,
        config: Arc<Config>,
        connectors: &'h Connectors,
        registry: &'h mut ResourceRegistry,
    ) -> Self {
        Self {
            scenario_id,
            name: name.to_string(),
            config,
            connectors,
            registry,
            data: ScenarioData::new(),
            bindings: Bindings::default(),
        }
    }

    /// Unique id of this scenario run
    pub fn scenario_id(&self) -> &str {
        &self.scenario_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_arc(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    pub fn connectors(&self) -> &'h Connectors {
        self.connectors
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &*self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut *self.registry
    }

    /// Provision the resource for a scenario tag
    pub async fn before_tag(&mut self, tag: &str) -> Result<()> {
        tag_router::handle_before_tag(self, tag).await
    }

    pub async fn after_tag(&mut self, tag: &str) -> Result<()> {
        tag_router::handle_after_tag(self, tag).await
    }

    /// Release everything this scenario enabled
    ///
    /// Consumes the context, so steps can no longer reach released clients.
    pub async fn after_scenario(self) -> TeardownReport {
        let report = self.registry.teardown_scenario().await;
        tracing::debug!(
            scenario = %self.scenario_id,
            released = ?report.released,
            failed = report.failed.len(),
            "Scenario torn down"
        );
        report
    }

    /// CRDS user system over the bound API, Kafka and DB clients
    ///
    /// Needs `@api`; Kafka and DB are optional until verification.
    pub fn crds_user_system(&self) -> Result<CrdsUser> {
        Ok(CrdsUser::new(
            self.bindings.require_crds_user()?,
            self.bindings.kafka.clone(),
            self.bindings.db.clone(),
            &self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_report_what_is_bound() {
        let mut bindings = Bindings::default();
        assert!(bindings.bound().is_empty());

        let err = bindings.require_kafka().err().unwrap();
        assert_eq!(err.to_string(), "Resource 'kafka' not found. Available: [<none>]");

        bindings.tokens = Some(Arc::new(TokenStore::new()));
        assert_eq!(bindings.bound(), vec!["tokens"]);
        assert!(bindings.require_tokens().is_ok());

        let err = bindings.require_db().err().unwrap();
        assert!(err.to_string().contains("Available: [tokens]"));
    }
}
