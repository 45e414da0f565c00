//! Error types for the CRDS end-to-end harness
//!
//! Messages are written for scenario authors: lookups that fail list what is
//! available, and configuration errors name the environment variable that
//! overrides the missing key.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Missing config: {key} (set it in the config file or via {env})")]
    MissingConfig { key: String, env: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Unsupported env '{0}', must be one of dev, staging, prod")]
    InvalidEnv(String),

    // === Resource Errors ===
    #[error("Invalid resource name '{0}'. Known kinds: api, auth, db, kafka, ui")]
    InvalidResourceName(String),

    #[error("Resource kind mismatch: registered as '{expected}' but runtime is '{actual}'")]
    ResourceKindMismatch { expected: String, actual: String },

    #[error("Resource '{kind}' not found. Available: [{available}]")]
    ResourceNotFound { kind: String, available: String },

    // === Scenario Data Errors ===
    #[error("{store} alias '{alias}' not found. Available: [{available}]")]
    AliasNotFound {
        store: &'static str,
        alias: String,
        available: String,
    },

    #[error("{store} alias '{alias}' already exists. Existing: [{existing}]")]
    AliasExists {
        store: &'static str,
        alias: String,
        existing: String,
    },

    #[error("{store} alias must be non-empty")]
    EmptyAlias { store: &'static str },

    #[error("Placeholder '{name}' not found. Available: [{available}]")]
    PlaceholderNotFound { name: String, available: String },

    #[error("Invalid UI artifact: {0}")]
    InvalidArtifact(String),

    // === Transport Errors ===
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP timeout after {secs}s for {url}")]
    HttpTimeout { url: String, secs: f64 },

    #[error("Kafka error: {0}")]
    Kafka(String),

    #[error("Timeout waiting for message on {topic} after {secs}s")]
    KafkaTimeout { topic: String, secs: f64 },

    #[error("DB error: {0}")]
    Db(String),

    #[error("DB operation timed out after {secs}s")]
    DbTimeout { secs: f64 },

    #[error("Schema validation failed: {detail}. status={status} body={body:?}")]
    SchemaValidation {
        detail: String,
        status: u16,
        body: String,
    },

    #[error("UI driver error: {0}")]
    Ui(String),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    // === IO / Serialization Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a missing config error, deriving the override variable name
    pub fn missing_config(key: &str) -> Self {
        Self::MissingConfig {
            key: key.to_string(),
            env: crate::common::config::env_override_name(key),
        }
    }

    /// Create a missing config error for a key with fallbacks
    pub fn missing_config_any(keys: &[&str]) -> Self {
        Self::MissingConfig {
            key: keys.join(" or "),
            env: keys
                .iter()
                .map(|k| crate::common::config::env_override_name(k))
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }

    /// Create a resource not found error listing registered kinds
    pub fn resource_not_found<S: AsRef<str>>(kind: &str, available: &[S]) -> Self {
        Self::ResourceNotFound {
            kind: kind.to_string(),
            available: join_or_none(available),
        }
    }

    /// Create an alias not found error listing known aliases
    pub fn alias_not_found<S: AsRef<str>>(store: &'static str, alias: &str, available: &[S]) -> Self {
        Self::AliasNotFound {
            store,
            alias: alias.to_string(),
            available: join_or_none(available),
        }
    }

    /// Create an alias exists error listing existing aliases
    pub fn alias_exists<S: AsRef<str>>(store: &'static str, alias: &str, existing: &[S]) -> Self {
        Self::AliasExists {
            store,
            alias: alias.to_string(),
            existing: existing
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Create a placeholder not found error listing all known names
    pub fn placeholder_not_found<S: AsRef<str>>(name: &str, available: &[S]) -> Self {
        Self::PlaceholderNotFound {
            name: name.to_string(),
            available: available
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Whether this error is a transport timeout (HTTP, Kafka or DB)
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::HttpTimeout { .. } | Error::KafkaTimeout { .. } | Error::DbTimeout { .. }
        )
    }
}

/// Join names for an error message, `<none>` when there are none
fn join_or_none<S: AsRef<str>>(names: &[S]) -> String {
    if names.is_empty() {
        return "<none>".to_string();
    }
    names
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_not_found_lists_available() {
        let err = Error::alias_not_found("Response", "missing", &["first", "last"]);
        assert_eq!(
            err.to_string(),
            "Response alias 'missing' not found. Available: [first, last]"
        );
    }

    #[test]
    fn test_alias_not_found_empty_store() {
        let none: [&str; 0] = [];
        let err = Error::alias_not_found("Entity", "user_id", &none);
        assert!(err.to_string().contains("Available: [<none>]"));
    }

    #[test]
    fn test_missing_config_names_env_override() {
        let err = Error::missing_config("crds.http.base_url");
        assert_eq!(
            err.to_string(),
            "Missing config: crds.http.base_url (set it in the config file or via E2E__CRDS__HTTP__BASE_URL)"
        );
    }

    #[test]
    fn test_missing_config_any() {
        let err = Error::missing_config_any(&["db.connection_string", "crds.db.connection_string"]);
        assert_eq!(
            err.to_string(),
            "Missing config: db.connection_string or crds.db.connection_string \
             (set it in the config file or via E2E__DB__CONNECTION_STRING or E2E__CRDS__DB__CONNECTION_STRING)"
        );
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::KafkaTimeout {
            topic: "users".into(),
            secs: 1.0
        }
        .is_timeout());
        assert!(Error::HttpTimeout {
            url: "http://x".into(),
            secs: 2.0
        }
        .is_timeout());
        assert!(!Error::Http("connection refused".into()).is_timeout());
    }
}
