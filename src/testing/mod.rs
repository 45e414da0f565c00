//! Scenario runner
//!
//! Reads YAML scenarios and executes them against a [`Harness`](crate::scenario::Harness).
//! Steps go through the same scenario data and resource bindings a Rust
//! test would use, so assertions are made against structured responses,
//! messages and rows.

mod config;
mod runner;
mod steps;

pub use config::*;
pub use runner::{load_scenario, run_loaded, run_scenario, TestResult};
pub use steps::{execute_step, KAFKA_MESSAGE, KAFKA_MESSAGES};
