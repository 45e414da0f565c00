//! Scenario lifecycle: the run-scoped [`Harness`], the per-scenario
//! [`ScenarioContext`] and its [`ScenarioData`] store

pub mod context;
pub mod data;
pub mod harness;

pub use context::{Bindings, ScenarioContext};
pub use data::{RequestContext, ScenarioData, UiArtifact, LAST_RESPONSE};
pub use harness::Harness;
