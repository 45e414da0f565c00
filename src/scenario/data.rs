//! Per-scenario data store
//!
//! One nested structure with named sub-stores:
//!
//! * `responses` - captured HTTP responses by alias, write-once unless
//!   overwritten explicitly
//! * `requests` - the in-progress request under `_current`
//! * `entities` - typed values carried between steps
//! * `vars` - string values, resolved after entities in placeholders
//! * `artifacts` / `pages` - plain UI state (text or mappings only)
//!
//! Every lookup fails with the list of known aliases instead of returning a
//! default.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::common::{value_to_text, Error, Result};
use crate::transport::HttpResponse;

/// Alias used for the most recent response
pub const LAST_RESPONSE: &str = "last";

/// Key of the in-progress request under `requests`
const CURRENT_REQUEST: &str = "_current";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid")
});

/// Request fragments accumulated by header/param/body steps
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestContext {
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub json: Map<String, Value>,
}

impl RequestContext {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.params.is_empty() && self.json.is_empty()
    }

    /// Body to send, `None` when no fields were set
    pub fn json_body(&self) -> Option<Value> {
        (!self.json.is_empty()).then(|| Value::Object(self.json.clone()))
    }
}

/// Serializable UI state
///
/// Only text and mappings are representable, so driver or session handles
/// cannot end up in scenario data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UiArtifact {
    Text(String),
    Mapping(Map<String, Value>),
}

impl TryFrom<Value> for UiArtifact {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(UiArtifact::Text(s)),
            Value::Object(m) => Ok(UiArtifact::Mapping(m)),
            other => Err(Error::InvalidArtifact(format!(
                "UI artifacts must be a string or lightweight mapping, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl From<&str> for UiArtifact {
    fn from(value: &str) -> Self {
        UiArtifact::Text(value.to_string())
    }
}

impl From<String> for UiArtifact {
    fn from(value: String) -> Self {
        UiArtifact::Text(value)
    }
}

#[derive(Debug, Default, Serialize)]
struct ApiState {
    responses: BTreeMap<String, HttpResponse>,
    requests: BTreeMap<String, RequestContext>,
    entities: BTreeMap<String, Value>,
    vars: BTreeMap<String, String>,
    artifacts: BTreeMap<String, UiArtifact>,
    pages: BTreeMap<String, UiArtifact>,
}

/// Mutable state owned by one scenario
#[derive(Debug, Default)]
pub struct ScenarioData {
    api: ApiState,
}

impl ScenarioData {
    pub fn new() -> Self {
        Self::default()
    }

    // === Responses ===

    /// Store a response; an existing alias is only replaced with `overwrite`
    pub fn put_response(&mut self, alias: &str, response: HttpResponse, overwrite: bool) -> Result<()> {
        put_alias("Response", &mut self.api.responses, alias, response, overwrite)
    }

    /// Look up a response by alias ([`LAST_RESPONSE`] for the latest)
    pub fn get_response(&self, alias: &str) -> Result<&HttpResponse> {
        get_alias("Response", &self.api.responses, alias)
    }

    pub fn last_response(&self) -> Result<&HttpResponse> {
        self.get_response(LAST_RESPONSE)
    }

    // === Entities ===

    pub fn put_entity(&mut self, alias: &str, value: impl Into<Value>, overwrite: bool) -> Result<()> {
        put_alias("Entity", &mut self.api.entities, alias, value.into(), overwrite)
    }

    pub fn get_entity(&self, alias: &str) -> Result<&Value> {
        get_alias("Entity", &self.api.entities, alias)
    }

    // === Vars ===

    /// Store the string form of a value; `null` becomes the empty string
    pub fn put_var(&mut self, alias: &str, value: impl Into<Value>, overwrite: bool) -> Result<()> {
        let text = value_to_text(&value.into());
        put_alias("Var", &mut self.api.vars, alias, text, overwrite)
    }

    pub fn get_var(&self, alias: &str) -> Result<&str> {
        get_alias("Var", &self.api.vars, alias).map(String::as_str)
    }

    // === Request building ===

    /// The in-progress request, created empty if absent
    pub fn get_request_context(&mut self) -> &mut RequestContext {
        self.api
            .requests
            .entry(CURRENT_REQUEST.to_string())
            .or_default()
    }

    pub fn clear_request_context(&mut self) {
        self.api.requests.remove(CURRENT_REQUEST);
    }

    /// Hand the in-progress request to a send step and reset it
    pub fn take_request_context(&mut self) -> RequestContext {
        self.api
            .requests
            .remove(CURRENT_REQUEST)
            .unwrap_or_default()
    }

    // === Placeholders ===

    /// Replace `{name}` tokens with entities, then vars
    pub fn resolve_placeholders(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&text[last..whole.start()]);
            out.push_str(&self.placeholder_value(name.as_str())?);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Resolve placeholders in every string inside a JSON value
    pub fn resolve_value(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::String(s) => Value::String(self.resolve_placeholders(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_value(item))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.resolve_value(v)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }

    fn placeholder_value(&self, name: &str) -> Result<String> {
        if let Some(value) = self.api.entities.get(name) {
            return Ok(value_to_text(value));
        }
        if let Some(value) = self.api.vars.get(name) {
            return Ok(value.clone());
        }
        let mut available: Vec<&str> = self
            .api
            .entities
            .keys()
            .chain(self.api.vars.keys())
            .map(String::as_str)
            .collect();
        available.sort_unstable();
        available.dedup();
        Err(Error::placeholder_not_found(name, &available))
    }

    // === UI state ===

    pub fn put_ui_artifact(&mut self, alias: &str, value: UiArtifact, overwrite: bool) -> Result<()> {
        put_alias("UI artifact", &mut self.api.artifacts, alias, value, overwrite)
    }

    pub fn get_ui_artifact(&self, alias: &str) -> Result<&UiArtifact> {
        get_alias("UI artifact", &self.api.artifacts, alias)
    }

    pub fn put_page(&mut self, alias: &str, value: UiArtifact, overwrite: bool) -> Result<()> {
        put_alias("Page", &mut self.api.pages, alias, value, overwrite)
    }

    pub fn get_page(&self, alias: &str) -> Result<&UiArtifact> {
        get_alias("Page", &self.api.pages, alias)
    }

    /// The whole nested structure as JSON
    pub fn api_state(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.api)?)
    }
}

fn put_alias<T>(
    store: &'static str,
    map: &mut BTreeMap<String, T>,
    alias: &str,
    value: T,
    overwrite: bool,
) -> Result<()> {
    if alias.is_empty() {
        return Err(Error::EmptyAlias { store });
    }
    if !overwrite && map.contains_key(alias) {
        let existing: Vec<&str> = map.keys().map(String::as_str).collect();
        return Err(Error::alias_exists(store, alias, &existing));
    }
    map.insert(alias.to_string(), value);
    Ok(())
}

fn get_alias<'a, T>(store: &'static str, map: &'a BTreeMap<String, T>, alias: &str) -> Result<&'a T> {
    map.get(alias).ok_or_else(|| {
        let available: Vec<&str> = map.keys().map(String::as_str).collect();
        Error::alias_not_found(store, alias, &available)
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
