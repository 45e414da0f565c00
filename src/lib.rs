//! CRDS E2E - end-to-end test harness for the CRDS user-management service
//!
//! This library provides the per-scenario resource lifecycle (tag-driven
//! provisioning, cached reuse, deterministic teardown), the scenario data
//! store, transport clients for HTTP, Kafka, DB and UI, the CRDS domain
//! layer and a YAML scenario runner.

pub mod auth;
pub mod cli;
pub mod commands;
pub mod common;
pub mod crds;
pub mod resources;
pub mod scenario;
pub mod tag_router;
pub mod testing;
pub mod transport;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use resources::{Connectors, ResourceKind};
pub use scenario::{Harness, ScenarioContext, ScenarioData};
