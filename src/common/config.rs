//! Configuration handling
//!
//! Configuration is a nested key-value tree selected per environment
//! (`dev`, `staging`, `prod`). The base data comes from the environment's
//! table in a TOML file; variables prefixed with `E2E__` override it, with
//! `__` separating path segments (`E2E__CRDS__HTTP__BASE_URL` overrides
//! `crds.http.base_url`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use toml::{Table, Value};

use super::paths;
use super::{Error, Result};

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "E2E__";

/// Environment variables consulted for the environment name, in order
const ENV_KEYS: &[&str] = &["ENV", "E2E_ENV"];

/// Supported environment names
pub const VALID_ENVS: &[&str] = &["dev", "staging", "prod"];

/// Default config file looked up in the working directory
const LOCAL_CONFIG_FILE: &str = "e2e.toml";

/// Options controlling where configuration is loaded from
#[derive(Debug, Default, Clone)]
pub struct LoadOptions {
    /// Explicit environment name (overrides `ENV` / `E2E_ENV`)
    pub env: Option<String>,
    /// Explicit config file path
    pub path: Option<PathBuf>,
}

/// Resolved configuration for one environment
#[derive(Debug, Clone, Default)]
pub struct Config {
    env: String,
    data: Table,
}

impl Config {
    /// Load configuration from file and process environment
    pub fn load(options: &LoadOptions) -> Result<Self> {
        let env = resolve_env(options.env.as_deref())?;

        let content = match config_file(options.path.as_deref()) {
            Some(path) => Some(std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
                path: path.display().to_string(),
                error: e.to_string(),
            })?),
            None => None,
        };

        Self::from_parts(&env, content.as_deref(), std::env::vars())
    }

    /// Build configuration from file content and an explicit set of variables
    pub fn from_parts<I>(env: &str, content: Option<&str>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env = normalize_env(env)?;

        let mut data = Table::new();
        if let Some(content) = content {
            let file: Table =
                toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
            if let Some(Value::Table(block)) = file.get(&env) {
                deep_merge(&mut data, block.clone());
            }
        }
        deep_merge(&mut data, overrides_from_vars(vars));

        tracing::debug!(env = %env, "Configuration loaded");
        Ok(Self { env, data })
    }

    /// Build configuration directly from a table (mainly for tests)
    pub fn from_table(env: &str, data: Table) -> Self {
        Self {
            env: env.to_string(),
            data,
        }
    }

    /// The selected environment name
    pub fn env(&self) -> &str {
        &self.env
    }

    /// Look up a dotted key
    pub fn get(&self, key: &str) -> Option<&Value> {
        if key.is_empty() {
            return None;
        }
        let mut parts = key.split('.');
        let mut cursor = self.data.get(parts.next()?)?;
        for part in parts {
            cursor = cursor.as_table()?.get(part)?;
        }
        Some(cursor)
    }

    /// Look up a dotted key as a non-empty string
    ///
    /// Numbers and booleans are rendered as strings.
    pub fn get_str(&self, key: &str) -> Option<String> {
        let value = match self.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            _ => return None,
        };
        (!value.is_empty()).then_some(value)
    }

    /// First non-empty string among several keys
    pub fn first_str(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.get_str(key))
    }

    /// Look up a required string, failing with the key and its override name
    pub fn require_str(&self, key: &str) -> Result<String> {
        self.get_str(key).ok_or_else(|| Error::missing_config(key))
    }

    /// Look up a boolean flag
    ///
    /// Strings count as true when they are one of `1`, `true`, `yes`, `y`, `on`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Boolean(b)) => *b,
            Some(Value::Integer(i)) => *i != 0,
            Some(Value::String(s)) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "y" | "on"
            ),
            _ => default,
        }
    }

    /// Look up a positive number of seconds (integer, float or numeric string)
    pub fn get_secs(&self, key: &str, default: f64) -> f64 {
        match self.get(key) {
            Some(Value::Integer(i)) if *i > 0 => *i as f64,
            Some(Value::Float(f)) if f.is_finite() && *f > 0.0 => *f,
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .unwrap_or(default),
            _ => default,
        }
    }

    /// Look up a timeout as a [`Duration`]
    ///
    /// Fails when the value is too large to represent.
    pub fn get_duration(&self, key: &str, default_secs: f64) -> Result<Duration> {
        let secs = self.get_secs(key, default_secs);
        Duration::try_from_secs_f64(secs).map_err(|_| {
            Error::Config(format!(
                "{} = {} is not a usable duration (override: {})",
                key,
                secs,
                env_override_name(key)
            ))
        })
    }

    /// A copy of a nested section, empty if absent
    pub fn section(&self, name: &str) -> Table {
        match self.get(name) {
            Some(Value::Table(table)) => table.clone(),
            _ => Table::new(),
        }
    }
}

/// Name of the environment variable that overrides a dotted config key
pub fn env_override_name(key: &str) -> String {
    format!("{}{}", ENV_PREFIX, key.to_ascii_uppercase().replace('.', "__"))
}

/// Resolve the environment name from an explicit value or the process
fn resolve_env(explicit: Option<&str>) -> Result<String> {
    let from_process = || {
        ENV_KEYS
            .iter()
            .filter_map(|k| std::env::var(k).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    };
    let env = explicit
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .or_else(from_process)
        .unwrap_or_else(|| "dev".to_string());
    normalize_env(&env)
}

fn normalize_env(env: &str) -> Result<String> {
    let env = env.trim().to_ascii_lowercase();
    if VALID_ENVS.contains(&env.as_str()) {
        Ok(env)
    } else {
        Err(Error::InvalidEnv(env))
    }
}

/// Pick the config file: explicit path, `./e2e.toml`, then the user config dir
fn config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    paths::config_path().filter(|p| p.exists())
}

/// Turn `E2E__A__B=value` variables into a nested table
fn overrides_from_vars<I>(vars: I) -> Table
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut data = Table::new();
    for (raw_key, value) in vars {
        let Some(rest) = raw_key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = rest
            .split("__")
            .filter(|p| !p.is_empty())
            .map(|p| p.to_ascii_lowercase())
            .collect();
        let Some((last, parents)) = path.split_last() else {
            continue;
        };

        let mut cursor = &mut data;
        for part in parents {
            let entry = cursor
                .entry(part.clone())
                .or_insert_with(|| Value::Table(Table::new()));
            if !entry.is_table() {
                *entry = Value::Table(Table::new());
            }
            cursor = match entry {
                Value::Table(table) => table,
                _ => unreachable!("entry was just made a table"),
            };
        }
        cursor.insert(last.clone(), Value::String(value));
    }
    data
}

/// Recursively merge `overlay` into `base`; tables merge, everything else replaces
fn deep_merge(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
