//! Response schema validation
//!
//! A schema is a JSON Schema document, a Rust type the body must
//! deserialize into, or a custom predicate over the JSON value. Validation
//! only runs when a call asks for it.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::common::{Error, Result};

type Check = dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync;

/// A named validation rule for JSON response bodies
#[derive(Clone)]
pub struct Schema {
    name: String,
    check: Arc<Check>,
}

impl Schema {
    /// Validate against a JSON Schema document
    ///
    /// Fails up front when the document itself is not a valid schema.
    pub fn json(schema: &Value) -> Result<Self> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| Error::Config(format!("Invalid JSON schema: {}", e)))?;
        let name = schema
            .get("title")
            .and_then(Value::as_str)
            .map(|title| format!("JSON schema '{}'", title))
            .unwrap_or_else(|| "JSON schema".to_string());
        Ok(Self::custom(name, move |value| {
            let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
            if errors.is_empty() {
                Ok(())
            } else {
                Err(errors.join("; "))
            }
        }))
    }

    /// Validate by deserializing the body into `T`
    pub fn of<T: DeserializeOwned + 'static>() -> Self {
        Self {
            name: std::any::type_name::<T>().to_string(),
            check: Arc::new(|value: &Value| {
                serde_json::from_value::<T>(value.clone())
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }),
        }
    }

    /// Validate with a custom predicate returning a failure detail
    pub fn custom<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Require the body to be an object containing every listed field
    pub fn required_fields(fields: &[&str]) -> Self {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let name = format!("required fields [{}]", fields.join(", "));
        Self::custom(name, move |value| {
            let object = value
                .as_object()
                .ok_or_else(|| "expected a JSON object".to_string())?;
            let missing: Vec<&str> = fields
                .iter()
                .filter(|f| !object.contains_key(f.as_str()))
                .map(|f| f.as_str())
                .collect();
            if missing.is_empty() {
                Ok(())
            } else {
                Err(format!("missing fields {missing:?}"))
            }
        })
    }

    /// Both schemas must pass; the first failure is reported
    pub fn and(self, other: Schema) -> Self {
        let name = format!("{} + {}", self.name, other.name);
        let (first, second) = (self.check, other.check);
        Self {
            name,
            check: Arc::new(move |value: &Value| {
                first(value)?;
                second(value)
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the check against a JSON value
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        (self.check)(value).map_err(|detail| format!("{}: {}", self.name, detail))
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema").field("name", &self.name).finish()
    }
}
