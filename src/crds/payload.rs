//! Create-user request payload

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::{Error, Result};

use super::UserStatus;

/// Body of `POST /users`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub status: UserStatus,
    pub display_name: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Default for CreateUserRequest {
    fn default() -> Self {
        Self {
            username: "e2e_user".to_string(),
            email: "e2e_user@example.com".to_string(),
            status: UserStatus::Active,
            display_name: Some("E2E User".to_string()),
            attributes: Map::new(),
            metadata: Map::new(),
        }
    }
}

impl CreateUserRequest {
    /// Field names accepted by [`CreateUserRequest::override_with`]
    pub const FIELDS: &'static [&'static str] = &[
        "username",
        "email",
        "status",
        "display_name",
        "attributes",
        "metadata",
    ];

    /// Apply field overrides
    ///
    /// Unknown fields are rejected; `attributes` and `metadata` are merged
    /// into the existing maps rather than replacing them.
    pub fn override_with(&self, updates: &Map<String, Value>) -> Result<Self> {
        if let Some(unknown) = updates.keys().find(|k| !Self::FIELDS.contains(&k.as_str())) {
            return Err(Error::TestAssertion(format!(
                "Unknown payload field: {}",
                unknown
            )));
        }

        let mut merged = serde_json::to_value(self)?;
        let Value::Object(target) = &mut merged else {
            return Err(Error::Internal("payload did not serialize to an object".to_string()));
        };
        for (key, value) in updates {
            match (key.as_str(), value) {
                ("attributes" | "metadata", Value::Object(extra)) => {
                    if let Some(Value::Object(existing)) = target.get_mut(key) {
                        existing.extend(extra.clone());
                    }
                }
                _ => {
                    target.insert(key.clone(), value.clone());
                }
            }
        }

        serde_json::from_value(merged).map_err(|e| Error::TestAssertion(format!("Invalid payload: {}", e)))
    }

    /// Build a payload from step fields
    ///
    /// `username`, `email`, `display_name` and `status` set the matching
    /// field; any other key becomes an attribute.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        let mut updates = Map::new();
        let mut attributes = Map::new();
        for (key, value) in fields {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            match key {
                "status" => {
                    let status: UserStatus = value.parse()?;
                    updates.insert(key.to_string(), serde_json::to_value(status)?);
                }
                "username" | "email" | "display_name" => {
                    updates.insert(key.to_string(), Value::String(value.trim().to_string()));
                }
                _ => {
                    attributes.insert(key.to_string(), Value::String(value.trim().to_string()));
                }
            }
        }
        if !attributes.is_empty() {
            updates.insert("attributes".to_string(), Value::Object(attributes));
        }
        Self::default().override_with(&updates)
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_default_payload() {
        let body = CreateUserRequest::default().to_json().unwrap();
        assert_eq!(
            body,
            json!({
                "username": "e2e_user",
                "email": "e2e_user@example.com",
                "status": "ACTIVE",
                "display_name": "E2E User",
                "attributes": {},
                "metadata": {}
            })
        );
    }

    #[test]
    fn test_override_merges_maps() {
        let base = CreateUserRequest::default()
            .override_with(&map(json!({"attributes": {"team": "core"}})))
            .unwrap();
        let updated = base
            .override_with(&map(json!({
                "email": "x@example.com",
                "status": "SUSPENDED",
                "attributes": {"region": "eu"}
            })))
            .unwrap();

        assert_eq!(updated.email, "x@example.com");
        assert_eq!(updated.status, UserStatus::Suspended);
        assert_eq!(updated.username, "e2e_user");
        assert_eq!(
            Value::Object(updated.attributes),
            json!({"team": "core", "region": "eu"})
        );
    }

    #[test]
    fn test_override_rejects_unknown_field() {
        let err = CreateUserRequest::default()
            .override_with(&map(json!({"nickname": "x"})))
            .unwrap_err();
        assert!(err.to_string().contains("Unknown payload field: nickname"));
    }

    #[test]
    fn test_from_fields_routes_extra_keys_to_attributes() {
        let mut fields = BTreeMap::new();
        fields.insert("email".to_string(), "qa@example.com".to_string());
        fields.insert("status".to_string(), "INACTIVE".to_string());
        fields.insert("department".to_string(), "QA".to_string());

        let payload = CreateUserRequest::from_fields(&fields).unwrap();
        assert_eq!(payload.email, "qa@example.com");
        assert_eq!(payload.status, UserStatus::Inactive);
        assert_eq!(payload.attributes["department"], "QA");

        fields.insert("status".to_string(), "GONE".to_string());
        assert!(CreateUserRequest::from_fields(&fields).is_err());
    }
}
