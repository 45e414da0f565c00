//! Scenario file format
//!
//! Defines the data structures for deserializing YAML scenarios.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

/// A complete scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestScenario {
    /// Name of the scenario
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Tags such as `@api` or `@kafka`; routed tags provision resources
    #[serde(default)]
    pub tags: Vec<String>,
    /// The sequence of steps to execute
    pub steps: Vec<TestStep>,
}

/// A single step in the execution flow
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Store a bearer token for a service (default: `crds.auth.token`)
    Authenticate {
        #[serde(default = "default_service")]
        service: String,
        /// Explicit token; read from `<service>.auth.token` when absent
        token: Option<String>,
    },
    /// Add a header to the pending request
    SetHeader { name: String, value: String },
    /// Add a query parameter to the pending request
    SetParam { name: String, value: String },
    /// Merge fields into the pending request body
    SetJson { fields: Map<String, Value> },
    /// Drop the pending request
    ClearRequest,
    /// Send the pending request
    Request {
        method: String,
        path: String,
        /// Service for client and token lookup (default: `crds`)
        #[serde(default = "default_service")]
        service: String,
        /// Store the response under this alias as well as `last`
        alias: Option<String>,
        /// Fail unless the JSON body has these top-level fields
        #[serde(default)]
        required_fields: Vec<String>,
        /// JSON Schema document the response body must satisfy
        schema: Option<Value>,
    },
    /// Create a CRDS user from field overrides
    CreateUser {
        #[serde(default)]
        fields: BTreeMap<String, String>,
        /// Wait for the Kafka event and DB row as well
        #[serde(default)]
        verify: bool,
        alias: Option<String>,
    },
    /// Fetch a CRDS user
    GetUser {
        #[serde(default = "default_user_id")]
        user_id: String,
        alias: Option<String>,
    },
    /// Delete a CRDS user
    DeleteUser {
        #[serde(default = "default_user_id")]
        user_id: String,
        alias: Option<String>,
    },
    /// Invoke a registered API client by name
    CallClient {
        client: String,
        method: String,
        #[serde(default)]
        params: BTreeMap<String, String>,
        body: Option<BTreeMap<String, String>>,
        alias: Option<String>,
    },
    /// Assert the status code of a stored response
    ExpectStatus {
        status: u16,
        /// Response alias (default: `last`)
        response: Option<String>,
    },
    /// Assert a top-level field of a stored response body
    ExpectField {
        field: String,
        /// Expected value; presence only when absent
        equals: Option<Value>,
        response: Option<String>,
    },
    /// Copy a response field into a var and an entity
    StoreField {
        field: String,
        into: String,
        response: Option<String>,
    },
    /// Store a partition's end offset in a var
    StoreKafkaEndOffset {
        topic: String,
        #[serde(default)]
        partition: i32,
        var: String,
    },
    /// Read messages from an offset (`42` or `${var}`) plus a shift
    ReadKafka {
        topic: String,
        #[serde(default)]
        partition: i32,
        offset: String,
        #[serde(default)]
        shift: i64,
        #[serde(default = "default_max_messages")]
        max_messages: usize,
        /// Fail unless at least this many messages were read
        expect_count: Option<usize>,
    },
    /// Wait for a JSON message whose fields match
    WaitKafka {
        topic: String,
        #[serde(default)]
        matches: Map<String, Value>,
        timeout: Option<f64>,
        poll_interval: Option<f64>,
        /// Store the matched message as an entity
        store_as: Option<String>,
    },
    /// Produce one message
    ProduceKafka {
        topic: String,
        key: Option<String>,
        value: Value,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// Run a query and check the row count
    QueryDb {
        sql: String,
        #[serde(default)]
        params: Vec<Value>,
        expect_rows: Option<usize>,
        /// Store the rows as an entity
        store_as: Option<String>,
    },
    /// Assert resource kinds are provisioned
    ExpectResources { names: Vec<String> },
    SetVar { name: String, value: Value },
    SetEntity { name: String, value: Value },
}

impl TestStep {
    /// Short label for progress output
    pub fn label(&self) -> String {
        match self {
            TestStep::Authenticate { service, .. } => format!("authenticate {}", service),
            TestStep::SetHeader { name, .. } => format!("set header {}", name),
            TestStep::SetParam { name, .. } => format!("set param {}", name),
            TestStep::SetJson { fields } => format!("set json ({} fields)", fields.len()),
            TestStep::ClearRequest => "clear request".to_string(),
            TestStep::Request { method, path, .. } => format!("{} {}", method.to_uppercase(), path),
            TestStep::CreateUser { verify: true, .. } => "create user and verify".to_string(),
            TestStep::CreateUser { .. } => "create user".to_string(),
            TestStep::GetUser { user_id, .. } => format!("get user {}", user_id),
            TestStep::DeleteUser { user_id, .. } => format!("delete user {}", user_id),
            TestStep::CallClient { client, method, .. } => format!("call {}.{}", client, method),
            TestStep::ExpectStatus { status, .. } => format!("expect status {}", status),
            TestStep::ExpectField { field, .. } => format!("expect field {}", field),
            TestStep::StoreField { field, into, .. } => format!("store {} as {}", field, into),
            TestStep::StoreKafkaEndOffset { topic, var, .. } => {
                format!("store end offset of {} as {}", topic, var)
            }
            TestStep::ReadKafka { topic, offset, .. } => format!("read {} at {}", topic, offset),
            TestStep::WaitKafka { topic, .. } => format!("wait on {}", topic),
            TestStep::ProduceKafka { topic, .. } => format!("produce to {}", topic),
            TestStep::QueryDb { .. } => "query db".to_string(),
            TestStep::ExpectResources { names } => format!("expect resources {}", names.join(", ")),
            TestStep::SetVar { name, .. } => format!("set var {}", name),
            TestStep::SetEntity { name, .. } => format!("set entity {}", name),
        }
    }
}

fn default_service() -> String {
    "crds".to_string()
}

fn default_user_id() -> String {
    "{user_id}".to_string()
}

fn default_max_messages() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenario() {
        let yaml = r#"
name: Create user
tags: ["@api", "@kafka"]
steps:
  - action: authenticate
  - action: create_user
    fields:
      email: qa@example.com
      department: QA
  - action: expect_status
    status: 201
  - action: read_kafka
    topic: users
    offset: "${start}"
    shift: -1
"#;
        let scenario: TestScenario = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(scenario.tags, vec!["@api", "@kafka"]);
        assert_eq!(scenario.steps.len(), 4);
        assert!(matches!(
            &scenario.steps[0],
            TestStep::Authenticate { service, token: None } if service == "crds"
        ));
        match &scenario.steps[3] {
            TestStep::ReadKafka { partition, shift, max_messages, .. } => {
                assert_eq!((*partition, *shift, *max_messages), (0, -1, 100));
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(scenario.steps[1].label(), "create user");
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let yaml = "name: x\nsteps:\n  - action: launch_rocket\n";
        assert!(serde_yaml::from_str::<TestScenario>(yaml).is_err());
    }
}
