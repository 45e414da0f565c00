//! CLI command handling
//!
//! Dispatches CLI commands and formats output.

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::commands::{Commands, ConfigArgs};
use crate::common::config::{Config, LoadOptions};
use crate::common::{Error, Result};
use crate::scenario::Harness;
use crate::tag_router::{self, ROUTED_TAGS};
use crate::testing::{self, TestResult, TestScenario};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            files,
            config,
            tags,
            verbose,
        } => run(&files, &config, &tags, verbose).await,

        Commands::Validate { files } => validate(&files),

        Commands::Tags => {
            for tag in ROUTED_TAGS {
                println!("@{}", tag);
            }
            Ok(())
        }
    }
}

async fn run(files: &[PathBuf], args: &ConfigArgs, tags: &[String], verbose: bool) -> Result<()> {
    let config = Config::load(&LoadOptions {
        env: args.env.clone(),
        path: args.config.clone(),
    })?;
    tracing::info!(env = config.env(), files = files.len(), "Starting run");

    let mut harness = Harness::new(config);
    let mut results = Vec::new();
    let mut skipped = 0;

    for path in files {
        let scenario = testing::load_scenario(path)?;
        if !selected(&scenario, tags) {
            skipped += 1;
            tracing::debug!(scenario = %scenario.name, "Skipped by tag filter");
            continue;
        }
        results.push(testing::run_loaded(&mut harness, &scenario, verbose).await);
    }

    let leftovers = harness.shutdown().await;
    if !leftovers.is_empty() {
        tracing::warn!(released = ?leftovers.released, "Released resources left after the run");
    }

    print_summary(&results, skipped);

    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        return Err(Error::TestAssertion(format!(
            "{} of {} scenarios failed",
            failed,
            results.len()
        )));
    }
    Ok(())
}

fn validate(files: &[PathBuf]) -> Result<()> {
    let mut invalid = 0;
    for path in files {
        match testing::load_scenario(path) {
            Ok(scenario) => {
                let unrouted: Vec<&str> = scenario
                    .tags
                    .iter()
                    .filter(|t| tag_router::route(t).is_none())
                    .map(String::as_str)
                    .collect();
                println!(
                    "  {} {} ({} steps)",
                    "✓".green(),
                    display(path),
                    scenario.steps.len()
                );
                if !unrouted.is_empty() {
                    println!("    {} {}", "labels:".dimmed(), unrouted.join(", ").dimmed());
                }
            }
            Err(e) => {
                invalid += 1;
                println!("  {} {}: {}", "✗".red(), display(path), e);
            }
        }
    }

    if invalid > 0 {
        return Err(Error::Config(format!("{} invalid scenario files", invalid)));
    }
    Ok(())
}

/// Whether a scenario passes the `--tag` filter
fn selected(scenario: &TestScenario, filter: &[String]) -> bool {
    if filter.is_empty() {
        return true;
    }
    scenario
        .tags
        .iter()
        .any(|tag| filter.iter().any(|want| same_tag(tag, want)))
}

fn same_tag(a: &str, b: &str) -> bool {
    a.trim()
        .trim_start_matches('@')
        .eq_ignore_ascii_case(b.trim().trim_start_matches('@'))
}

fn print_summary(results: &[TestResult], skipped: usize) {
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.len() - passed;

    println!("\n{}", "Summary:".cyan().bold());
    for result in results {
        if result.passed {
            println!("  {} {}", "✓".green(), result.name);
        } else {
            println!(
                "  {} {} ({}/{} steps): {}",
                "✗".red(),
                result.name,
                result.steps_run,
                result.steps_total,
                result.error.as_deref().unwrap_or("failed")
            );
        }
    }

    let line = format!("{} passed, {} failed, {} skipped", passed, failed, skipped);
    if failed == 0 {
        println!("\n{}", line.green().bold());
    } else {
        println!("\n{}", line.red().bold());
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(tags: &[&str]) -> TestScenario {
        TestScenario {
            name: "s".to_string(),
            description: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            steps: Vec::new(),
        }
    }

    #[test]
    fn test_tag_filter() {
        let s = scenario(&["@api", "@smoke"]);
        assert!(selected(&s, &[]));
        assert!(selected(&s, &["smoke".to_string()]));
        assert!(selected(&s, &["@API".to_string()]));
        assert!(!selected(&s, &["kafka".to_string()]));
        assert!(!selected(&scenario(&[]), &["api".to_string()]));
    }
}
