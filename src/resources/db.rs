//! `@db`: a database client

use std::sync::Arc;

use crate::common::{Error, Result};
use crate::scenario::ScenarioContext;
use crate::transport::DbClient;

use super::{cached, store, ResourceKind, Runtime};

/// Connection string keys, in lookup order
pub const CONNECTION_KEYS: &[&str] = &["db.connection_string", "crds.db.connection_string"];

/// Default per-call timeout in seconds
const DEFAULT_TIMEOUT_SECS: f64 = 10.0;

pub struct DbRuntime {
    client: Arc<DbClient>,
}

impl DbRuntime {
    pub fn new(client: Arc<DbClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> Arc<DbClient> {
        Arc::clone(&self.client)
    }

    pub async fn release(&self) -> Result<()> {
        self.client.close().await
    }
}

/// Provision or reuse the database client
pub async fn ensure_db(ctx: &mut ScenarioContext<'_>) -> Result<Arc<DbRuntime>> {
    if let Some(runtime) = cached(ctx.registry_mut(), ResourceKind::Db, Runtime::as_db)? {
        ctx.bindings.db = Some(runtime.client());
        return Ok(runtime);
    }

    let config = ctx.config();
    let connection_string = config
        .first_str(CONNECTION_KEYS)
        .ok_or_else(|| Error::missing_config_any(CONNECTION_KEYS))?;
    let timeout = config.get_duration("db.timeout_secs", DEFAULT_TIMEOUT_SECS)?;

    let backend = ctx.connectors().db.connect(&connection_string, timeout).await?;
    let runtime = Arc::new(DbRuntime::new(Arc::new(DbClient::new(backend, timeout))));
    store(ctx.registry_mut(), Runtime::Db(runtime.clone()))?;
    ctx.bindings.db = Some(runtime.client());
    tracing::debug!(scenario = %ctx.scenario_id(), "DB resource provisioned");
    Ok(runtime)
}
