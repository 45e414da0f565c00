//! CLI command definitions
//!
//! Defines the clap commands for the harness CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run scenario files
    Run {
        /// Scenario YAML files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,

        /// Only run scenarios carrying this tag (repeatable)
        #[arg(long = "tag", short = 't')]
        tags: Vec<String>,

        /// Verbose output: debug logs and scenario data on failure
        #[arg(long, short)]
        verbose: bool,
    },

    /// Parse scenario files without running them
    Validate {
        /// Scenario YAML files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List the tags that provision resources
    Tags,
}

/// Where configuration comes from
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Environment (dev, staging, prod); defaults to $ENV, $E2E_ENV or dev
    #[arg(long)]
    pub env: Option<String>,

    /// Config file (default: ./e2e.toml, then the user config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
