//! Construction seams for Kafka, DB and UI clients
//!
//! Provisioners never build backends directly; they ask the run's
//! [`Connectors`]. Tests swap in recording or failing connectors here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::transport::db::PostgresBackend;
use crate::transport::kafka::InMemoryBroker;
use crate::transport::{DbBackend, HeadlessDriver, KafkaBackend, UiDriver};

#[async_trait]
pub trait KafkaConnector: Send + Sync {
    /// Open a backend for one consumer group
    async fn connect(&self, bootstrap_servers: &str, group_id: &str) -> Result<Arc<dyn KafkaBackend>>;
}

#[async_trait]
pub trait DbConnector: Send + Sync {
    async fn connect(&self, connection_string: &str, timeout: Duration) -> Result<Arc<dyn DbBackend>>;
}

#[async_trait]
pub trait UiConnector: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn UiDriver>>;
}

/// Bootstrap prefix that selects the in-memory broker
pub const MEMORY_BOOTSTRAP: &str = "memory://";

/// Serves only `memory://` bootstrap strings; anything else is a real
/// broker this connector cannot reach
#[async_trait]
impl KafkaConnector for InMemoryBroker {
    async fn connect(&self, bootstrap_servers: &str, group_id: &str) -> Result<Arc<dyn KafkaBackend>> {
        if !bootstrap_servers.trim().starts_with(MEMORY_BOOTSTRAP) {
            return Err(Error::Config(format!(
                "Kafka bootstrap '{}' names a network broker, but only the in-memory broker is available. \
                 Use '{}<name>' for the in-memory broker or run with a network Kafka connector",
                bootstrap_servers, MEMORY_BOOTSTRAP
            )));
        }
        tracing::debug!(
            bootstrap = bootstrap_servers,
            group = group_id,
            "Using in-memory Kafka broker"
        );
        Ok(Arc::new(self.consumer(group_id)))
    }
}

/// Connects with `tokio-postgres`
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresConnector;

#[async_trait]
impl DbConnector for PostgresConnector {
    async fn connect(&self, connection_string: &str, timeout: Duration) -> Result<Arc<dyn DbBackend>> {
        Ok(Arc::new(PostgresBackend::connect(connection_string, timeout).await?))
    }
}

/// Launches [`HeadlessDriver`] sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessConnector;

#[async_trait]
impl UiConnector for HeadlessConnector {
    async fn launch(&self) -> Result<Arc<dyn UiDriver>> {
        Ok(Arc::new(HeadlessDriver::new()))
    }
}

/// One connector per external system, shared by every scenario in a run
#[derive(Clone)]
pub struct Connectors {
    pub kafka: Arc<dyn KafkaConnector>,
    pub db: Arc<dyn DbConnector>,
    pub ui: Arc<dyn UiConnector>,
}

impl Connectors {
    /// Default connectors with an explicit broker (tests inspect it)
    pub fn with_broker(broker: InMemoryBroker) -> Self {
        Self {
            kafka: Arc::new(broker),
            db: Arc::new(PostgresConnector),
            ui: Arc::new(HeadlessConnector),
        }
    }

    pub fn kafka(mut self, connector: Arc<dyn KafkaConnector>) -> Self {
        self.kafka = connector;
        self
    }

    pub fn db(mut self, connector: Arc<dyn DbConnector>) -> Self {
        self.db = connector;
        self
    }

    pub fn ui(mut self, connector: Arc<dyn UiConnector>) -> Self {
        self.ui = connector;
        self
    }
}

impl Default for Connectors {
    fn default() -> Self {
        Self::with_broker(InMemoryBroker::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_broker_requires_memory_bootstrap() {
        let broker = InMemoryBroker::new();
        let err = broker
            .connect("kafka.prod.internal:9092", "e2e-s1")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("kafka.prod.internal:9092"));
        assert!(broker.closed_groups().is_empty());

        assert!(broker.connect("memory://crds", "e2e-s1").await.is_ok());
        assert!(broker.connect(" memory://", "e2e-s2").await.is_ok());
    }
}
