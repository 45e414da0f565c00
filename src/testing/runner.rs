//! Scenario runner implementation
//!
//! Runs YAML scenarios through the scenario lifecycle: begin, provision
//! tags, execute steps until the first failure, tear down regardless of the
//! outcome.

use std::path::Path;

use colored::Colorize;

use crate::common::{Error, Result};
use crate::scenario::Harness;
use crate::tag_router;

use super::config::TestScenario;
use super::steps::execute_step;

/// Result of a scenario run
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
    /// Teardown failures, reported but not failing the scenario
    pub teardown_errors: Vec<String>,
}

/// Load and parse a scenario file
pub fn load_scenario(path: &Path) -> Result<TestScenario> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    serde_yaml::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse scenario '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Run a scenario from a YAML file
pub async fn run_scenario(harness: &mut Harness, path: &Path, verbose: bool) -> Result<TestResult> {
    let scenario = load_scenario(path)?;
    Ok(run_loaded(harness, &scenario, verbose).await)
}

/// Run an already parsed scenario
pub async fn run_loaded(harness: &mut Harness, scenario: &TestScenario, verbose: bool) -> TestResult {
    let steps_total = scenario.steps.len();

    println!(
        "\n{} {}",
        "Running Scenario:".blue().bold(),
        scenario.name.white().bold()
    );

    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    let mut ctx = harness.begin_scenario(&scenario.name);
    let mut steps_run = 0;
    let mut error = None;

    if !scenario.tags.is_empty() {
        println!("\n{}", "Tags:".cyan());
    }
    for tag in &scenario.tags {
        match ctx.before_tag(tag).await {
            Ok(()) => {
                let note = match tag_router::route(tag) {
                    Some(_) => "",
                    None => " (no resource)",
                };
                println!("  {} {}{}", "✓".green(), tag, note.dimmed());
            }
            Err(e) => {
                println!("  {} {}: {}", "✗".red(), tag, e);
                error = Some(format!("Tag {}: {}", tag, e));
                break;
            }
        }
    }

    if error.is_none() {
        println!("\n{}", "Steps:".cyan());
        for (i, step) in scenario.steps.iter().enumerate() {
            let step_num = i + 1;
            steps_run = step_num;

            match execute_step(&mut ctx, step).await {
                Ok(()) => {
                    println!(
                        "  {} Step {}: {}",
                        "✓".green(),
                        step_num,
                        step.label().dimmed()
                    );
                }
                Err(e) => {
                    println!("  {} Step {}: {}: {}", "✗".red(), step_num, step.label(), e);
                    if verbose {
                        match ctx.data.api_state() {
                            Ok(state) => println!("    {}", state.to_string().dimmed()),
                            Err(e) => tracing::debug!(error = %e, "Could not render scenario data"),
                        }
                    }
                    error = Some(format!("Step {} ({}): {}", step_num, step.label(), e));
                    break;
                }
            }
        }
    }

    for tag in &scenario.tags {
        if let Err(e) = ctx.after_tag(tag).await {
            tracing::warn!(tag = %tag, error = %e, "after_tag failed");
        }
    }

    let report = ctx.after_scenario().await;
    if verbose && !report.is_empty() {
        let released: Vec<&str> = report.released.iter().map(|k| k.as_str()).collect();
        println!("  {} {}", "Released:".dimmed(), released.join(", ").dimmed());
    }
    let teardown_errors: Vec<String> = report
        .failed
        .iter()
        .map(|(kind, e)| format!("{}: {}", kind, e))
        .collect();
    for failure in &teardown_errors {
        println!("  {} teardown {}", "!".yellow(), failure);
    }

    let passed = error.is_none();
    if passed {
        println!(
            "\n{} {}\n",
            "✓".green().bold(),
            "Scenario Passed".green().bold()
        );
    }

    TestResult {
        name: scenario.name.clone(),
        passed,
        steps_run,
        steps_total,
        error,
        teardown_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::Config;
    use std::io::Write;

    fn harness() -> Harness {
        Harness::new(Config::from_table("dev", toml::Table::new()))
    }

    #[tokio::test]
    async fn test_steps_stop_at_first_failure() {
        let scenario: TestScenario = serde_yaml::from_str(
            r#"
name: stops early
tags: ["@auth", "@smoke"]
steps:
  - action: set_var
    name: greeting
    value: hello
  - action: expect_status
    status: 200
  - action: set_var
    name: never
    value: set
"#,
        )
        .unwrap();

        let mut harness = harness();
        let result = run_loaded(&mut harness, &scenario, false).await;
        assert!(!result.passed);
        assert_eq!(result.steps_run, 2);
        assert_eq!(result.steps_total, 3);
        assert!(result
            .error
            .unwrap()
            .contains("Response alias 'last' not found. Available: [<none>]"));
        assert!(harness.registry().kinds().is_empty());
    }

    #[tokio::test]
    async fn test_tag_failure_skips_steps_and_tears_down() {
        let scenario: TestScenario = serde_yaml::from_str(
            "name: no kafka config\ntags: ['@auth', '@kafka']\nsteps:\n  - action: clear_request\n",
        )
        .unwrap();

        let mut harness = harness();
        let result = run_loaded(&mut harness, &scenario, false).await;
        assert!(!result.passed);
        assert_eq!(result.steps_run, 0);
        assert!(result.error.unwrap().contains("kafka.bootstrap_servers"));
        assert!(harness.registry().kinds().is_empty());
    }

    #[tokio::test]
    async fn test_run_scenario_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "name: vars\nsteps:\n  - action: set_var\n    name: a\n    value: 1\n  - action: set_entity\n    name: b\n    value: \"{{a}}\"\n"
        )
        .unwrap();

        let mut harness = harness();
        let result = run_scenario(&mut harness, file.path(), false).await.unwrap();
        assert!(result.passed, "{:?}", result.error);
        assert_eq!(result.steps_run, 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_scenario(Path::new("/nonexistent/scenario.yaml")).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}
