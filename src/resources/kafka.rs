//! `@kafka`: a Kafka client with a scenario-unique consumer group

use std::sync::Arc;

use crate::common::{Error, Result};
use crate::scenario::ScenarioContext;
use crate::transport::KafkaClient;

use super::{cached, store, ResourceKind, Runtime};

/// Bootstrap server keys, in lookup order
pub const BOOTSTRAP_KEYS: &[&str] = &["kafka.bootstrap_servers", "crds.kafka.bootstrap_servers"];

const DEFAULT_GROUP_PREFIX: &str = "e2e";

pub struct KafkaRuntime {
    client: Arc<KafkaClient>,
}

impl KafkaRuntime {
    pub fn new(client: Arc<KafkaClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> Arc<KafkaClient> {
        Arc::clone(&self.client)
    }

    pub async fn release(&self) -> Result<()> {
        self.client.close().await
    }
}

/// Provision or reuse the Kafka client
pub async fn ensure_kafka(ctx: &mut ScenarioContext<'_>) -> Result<Arc<KafkaRuntime>> {
    if let Some(runtime) = cached(ctx.registry_mut(), ResourceKind::Kafka, Runtime::as_kafka)? {
        ctx.bindings.kafka = Some(runtime.client());
        return Ok(runtime);
    }

    let config = ctx.config();
    let bootstrap = config
        .first_str(BOOTSTRAP_KEYS)
        .ok_or_else(|| Error::missing_config_any(BOOTSTRAP_KEYS))?;
    let prefix = config
        .get_str("kafka.group_prefix")
        .unwrap_or_else(|| DEFAULT_GROUP_PREFIX.to_string());
    let group_id = KafkaClient::group_id_for(&prefix, ctx.scenario_id());

    let backend = ctx.connectors().kafka.connect(&bootstrap, &group_id).await?;
    tracing::debug!(group = %group_id, bootstrap = %bootstrap, "Kafka client connected");

    let runtime = Arc::new(KafkaRuntime::new(Arc::new(KafkaClient::new(group_id, backend))));
    store(ctx.registry_mut(), Runtime::Kafka(runtime.clone()))?;
    ctx.bindings.kafka = Some(runtime.client());
    Ok(runtime)
}
