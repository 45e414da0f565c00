//! Run-scoped resource cache with per-scenario teardown
//!
//! The registry outlives scenarios so construction can be amortized, but it
//! tracks which kinds each scenario used. `teardown_scenario` releases and
//! evicts exactly those kinds. The registry is not locked; one scenario
//! borrows it mutably at a time.

use std::collections::{BTreeMap, BTreeSet};

use crate::common::{Error, Result};

use super::{ResourceKind, Runtime};

/// Outcome of a scenario teardown
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TeardownReport {
    /// Kinds released cleanly, in teardown order
    pub released: Vec<ResourceKind>,
    /// Kinds whose release failed, with the error message
    pub failed: Vec<(ResourceKind, String)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: BTreeMap<ResourceKind, Runtime>,
    enabled: BTreeSet<ResourceKind>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runtime, replacing any previous one of the same kind
    pub fn set(&mut self, kind: ResourceKind, runtime: Runtime) -> Result<()> {
        if runtime.kind() != kind {
            return Err(super::kind_mismatch(kind, &runtime));
        }
        self.resources.insert(kind, runtime);
        Ok(())
    }

    /// Register a runtime under a kind name
    pub fn set_named(&mut self, name: &str, runtime: Runtime) -> Result<()> {
        let kind = name.parse()?;
        self.set(kind, runtime)
    }

    pub fn get(&self, kind: ResourceKind) -> Result<&Runtime> {
        self.resources.get(&kind).ok_or_else(|| {
            let available: Vec<&str> = self.resources.keys().map(|k| k.as_str()).collect();
            Error::resource_not_found(kind.as_str(), &available)
        })
    }

    pub fn has(&self, kind: ResourceKind) -> bool {
        self.resources.contains_key(&kind)
    }

    /// Record that the current scenario uses `kind`
    pub fn mark_enabled(&mut self, kind: ResourceKind) {
        if self.enabled.insert(kind) {
            tracing::debug!(resource = %kind, "Resource enabled");
        }
    }

    pub fn is_enabled(&self, kind: ResourceKind) -> bool {
        self.enabled.contains(&kind)
    }

    /// Registered kinds, in teardown order
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.resources.keys().copied().collect()
    }

    /// Kinds enabled in the current scenario, in teardown order
    pub fn enabled(&self) -> Vec<ResourceKind> {
        self.enabled.iter().copied().collect()
    }

    /// Start a scenario: forget usage, keep cached runtimes
    pub fn begin_scenario(&mut self) {
        self.enabled.clear();
    }

    /// Release and evict every kind enabled in this scenario
    ///
    /// Each runtime is released once; a failure is logged and reported
    /// without stopping the remaining releases. Never fails.
    pub async fn teardown_scenario(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let enabled = std::mem::take(&mut self.enabled);

        for kind in enabled {
            let Some(runtime) = self.resources.remove(&kind) else {
                continue;
            };
            match runtime.release().await {
                Ok(()) => {
                    tracing::debug!(resource = %kind, "Resource released");
                    report.released.push(kind);
                }
                Err(e) => {
                    tracing::warn!(resource = %kind, error = %e, "Failed to teardown resource");
                    report.failed.push((kind, e.to_string()));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenStore;
    use crate::resources::{AuthRuntime, UiRuntime};
    use crate::transport::HeadlessDriver;
    use std::sync::Arc;

    fn auth_runtime() -> Runtime {
        Runtime::Auth(Arc::new(AuthRuntime::new(Arc::new(TokenStore::new()))))
    }

    fn ui_runtime(driver: Arc<HeadlessDriver>) -> Runtime {
        Runtime::Ui(Arc::new(UiRuntime::new(driver)))
    }

    #[test]
    fn test_get_missing_lists_registered() {
        let mut registry = ResourceRegistry::new();
        let err = registry.get(ResourceKind::Db).unwrap_err();
        assert_eq!(err.to_string(), "Resource 'db' not found. Available: [<none>]");

        registry.set(ResourceKind::Auth, auth_runtime()).unwrap();
        let err = registry.get(ResourceKind::Db).unwrap_err();
        assert!(err.to_string().contains("Available: [auth]"));
    }

    #[test]
    fn test_set_validates_kind() {
        let mut registry = ResourceRegistry::new();
        assert!(matches!(
            registry.set(ResourceKind::Api, auth_runtime()),
            Err(Error::ResourceKindMismatch { .. })
        ));
        assert!(matches!(
            registry.set_named("", auth_runtime()),
            Err(Error::InvalidResourceName(_))
        ));
        registry.set_named("auth", auth_runtime()).unwrap();
        assert!(registry.has(ResourceKind::Auth));
    }

    #[test]
    fn test_mark_enabled_is_a_set() {
        let mut registry = ResourceRegistry::new();
        registry.mark_enabled(ResourceKind::Kafka);
        registry.mark_enabled(ResourceKind::Kafka);
        registry.mark_enabled(ResourceKind::Api);
        assert_eq!(registry.enabled(), vec![ResourceKind::Kafka, ResourceKind::Api]);

        registry.begin_scenario();
        assert!(registry.enabled().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_evicts_only_enabled() {
        let driver = Arc::new(HeadlessDriver::new());
        let mut registry = ResourceRegistry::new();
        registry.set(ResourceKind::Auth, auth_runtime()).unwrap();
        registry
            .set(ResourceKind::Ui, ui_runtime(driver.clone()))
            .unwrap();
        registry.mark_enabled(ResourceKind::Ui);

        let report = registry.teardown_scenario().await;
        assert_eq!(report.released, vec![ResourceKind::Ui]);
        assert!(report.is_clean());
        assert!(!driver.is_running());
        assert_eq!(registry.kinds(), vec![ResourceKind::Auth]);
        assert!(registry.enabled().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let mut registry = ResourceRegistry::new();
        registry.set(ResourceKind::Auth, auth_runtime()).unwrap();
        registry.mark_enabled(ResourceKind::Auth);

        assert_eq!(registry.teardown_scenario().await.released.len(), 1);
        assert!(registry.teardown_scenario().await.is_empty());
    }

    #[tokio::test]
    async fn test_enabled_without_runtime_is_skipped() {
        let mut registry = ResourceRegistry::new();
        registry.mark_enabled(ResourceKind::Db);
        assert!(registry.teardown_scenario().await.is_empty());
    }
}
