//! Run-scoped harness owning the resource registry

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::config::Config;
use crate::resources::{Connectors, ResourceRegistry, TeardownReport};

use super::ScenarioContext;

/// Owns everything that outlives a single scenario
pub struct Harness {
    config: Arc<Config>,
    connectors: Connectors,
    registry: ResourceRegistry,
    started: u64,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        Self::with_connectors(config, Connectors::default())
    }

    pub fn with_connectors(config: Config, connectors: Connectors) -> Self {
        Self {
            config: Arc::new(config),
            connectors,
            registry: ResourceRegistry::new(),
            started: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Number of scenarios started so far
    pub fn scenarios_started(&self) -> u64 {
        self.started
    }

    /// Start a scenario with a fresh data store and an empty enabled-set
    pub fn begin_scenario(&mut self, name: &str) -> ScenarioContext<'_> {
        self.started += 1;
        self.registry.begin_scenario();
        let scenario_id = scenario_id(name, self.started);
        tracing::info!(scenario = %name, id = %scenario_id, "Scenario started");
        ScenarioContext::new(
            scenario_id,
            name,
            Arc::clone(&self.config),
            &self.connectors,
            &mut self.registry,
        )
    }

    /// Release resources left behind by a context that was dropped without
    /// `after_scenario`
    pub async fn shutdown(&mut self) -> TeardownReport {
        for kind in self.registry.kinds() {
            self.registry.mark_enabled(kind);
        }
        self.registry.teardown_scenario().await
    }
}

/// `<slug>-<unix millis, hex>-<sequence>`
fn scenario_id(name: &str, seq: u64) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}-{:x}-{}", slug(name), millis, seq)
}

fn slug(name: &str) -> String {
    let mut slug = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= 32 {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "scenario".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Create user -> verify (Kafka)"), "create-user-verify-kafka");
        assert_eq!(slug("  ***  "), "scenario");
        assert!(slug(&"x".repeat(100)).len() <= 32);
    }

    #[test]
    fn test_scenario_ids_are_unique() {
        let mut harness = Harness::new(Config::from_table("dev", toml::Table::new()));
        let first = harness.begin_scenario("Same name").scenario_id().to_string();
        let second = harness.begin_scenario("Same name").scenario_id().to_string();
        assert_ne!(first, second);
        assert!(first.starts_with("same-name-"));
        assert_eq!(harness.scenarios_started(), 2);
    }
}
