//! Scenario resources
//!
//! Each external dependency a scenario can enable by tag is a
//! [`ResourceKind`] with a matching runtime wrapper. Runtimes are cached in
//! the [`ResourceRegistry`] and released through a single [`Runtime::release`].

pub mod api;
pub mod auth;
pub mod connectors;
pub mod db;
pub mod kafka;
pub mod registry;
pub mod ui;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::common::{Error, Result};

pub use api::{ApiRuntime, ClientRegistry, HttpClientFactory};
pub use auth::AuthRuntime;
pub use connectors::Connectors;
pub use db::DbRuntime;
pub use kafka::KafkaRuntime;
pub use registry::{ResourceRegistry, TeardownReport};
pub use ui::UiRuntime;

/// Kinds of provisionable resources
///
/// Declaration order is teardown order: dependents before the resources
/// they were built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Ui,
    Kafka,
    Db,
    Api,
    Auth,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Ui,
        ResourceKind::Kafka,
        ResourceKind::Db,
        ResourceKind::Api,
        ResourceKind::Auth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Ui => "ui",
            ResourceKind::Kafka => "kafka",
            ResourceKind::Db => "db",
            ResourceKind::Api => "api",
            ResourceKind::Auth => "auth",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::InvalidResourceName(name.to_string()))
    }
}

/// A provisioned resource
#[derive(Clone)]
pub enum Runtime {
    Api(Arc<ApiRuntime>),
    Auth(Arc<AuthRuntime>),
    Db(Arc<DbRuntime>),
    Kafka(Arc<KafkaRuntime>),
    Ui(Arc<UiRuntime>),
}

impl Runtime {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Runtime::Api(_) => ResourceKind::Api,
            Runtime::Auth(_) => ResourceKind::Auth,
            Runtime::Db(_) => ResourceKind::Db,
            Runtime::Kafka(_) => ResourceKind::Kafka,
            Runtime::Ui(_) => ResourceKind::Ui,
        }
    }

    /// Release the underlying connection
    pub async fn release(&self) -> Result<()> {
        match self {
            Runtime::Api(runtime) => runtime.release().await,
            Runtime::Auth(runtime) => runtime.release().await,
            Runtime::Db(runtime) => runtime.release().await,
            Runtime::Kafka(runtime) => runtime.release().await,
            Runtime::Ui(runtime) => runtime.release().await,
        }
    }

    pub fn as_api(&self) -> Option<&Arc<ApiRuntime>> {
        match self {
            Runtime::Api(runtime) => Some(runtime),
            _ => None,
        }
    }

    pub fn as_auth(&self) -> Option<&Arc<AuthRuntime>> {
        match self {
            Runtime::Auth(runtime) => Some(runtime),
            _ => None,
        }
    }

    pub fn as_db(&self) -> Option<&Arc<DbRuntime>> {
        match self {
            Runtime::Db(runtime) => Some(runtime),
            _ => None,
        }
    }

    pub fn as_kafka(&self) -> Option<&Arc<KafkaRuntime>> {
        match self {
            Runtime::Kafka(runtime) => Some(runtime),
            _ => None,
        }
    }

    pub fn as_ui(&self) -> Option<&Arc<UiRuntime>> {
        match self {
            Runtime::Ui(runtime) => Some(runtime),
            _ => None,
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Runtime").field(&self.kind()).finish()
    }
}

/// Error for a registry entry holding a different runtime than expected
fn kind_mismatch(expected: ResourceKind, runtime: &Runtime) -> Error {
    Error::ResourceKindMismatch {
        expected: expected.to_string(),
        actual: runtime.kind().to_string(),
    }
}

/// Reuse path shared by the provisioners: typed runtime if cached, marked enabled
fn cached<T>(
    registry: &mut ResourceRegistry,
    kind: ResourceKind,
    pick: impl Fn(&Runtime) -> Option<&Arc<T>>,
) -> Result<Option<Arc<T>>> {
    if !registry.has(kind) {
        return Ok(None);
    }
    let runtime = registry.get(kind)?;
    let typed = pick(runtime)
        .cloned()
        .ok_or_else(|| kind_mismatch(kind, runtime))?;
    registry.mark_enabled(kind);
    tracing::debug!(resource = %kind, "Reusing cached resource");
    Ok(Some(typed))
}

/// Register a freshly built runtime and mark it enabled
fn store(registry: &mut ResourceRegistry, runtime: Runtime) -> Result<()> {
    let kind = runtime.kind();
    registry.set(kind, runtime)?;
    registry.mark_enabled(kind);
    Ok(())
}
