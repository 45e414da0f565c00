//! CRDS user system: create a user and verify it end to end
//!
//! Verification waits for the `USER_CREATED` event on Kafka and then looks
//! the user up in the database, first by id and then by email.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::common::config::Config;
use crate::common::{value_to_text, Error, Result};
use crate::transport::{DbClient, DbParam, HttpResponse, KafkaClient, KafkaMessage, RequestOptions, Row};

use super::{CreateUserRequest, CrdsUserClient};

/// Event type published when a user is created
pub const USER_CREATED: &str = "USER_CREATED";

/// Config key for the user event topic
pub const USER_TOPIC_KEY: &str = "crds.kafka.user_topic";

/// Config key for the user table
pub const USER_TABLE_KEY: &str = "crds.db.user_table";

const ID_FIELDS: &[&str] = &["id", "userId", "user_id"];
const EVENT_TYPE_FIELDS: &[&str] = &["event_type", "eventType", "type", "name"];

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("identifier pattern is valid")
});

/// Options for [`CrdsUser::create_user_and_verify`]
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Overrides `crds.kafka.user_topic`
    pub kafka_topic: Option<String>,
    pub kafka_timeout: Duration,
    pub poll_interval: Duration,
    /// Overrides `crds.db.user_table`
    pub db_table: Option<String>,
    pub id_column: String,
    pub email_column: String,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            kafka_topic: None,
            kafka_timeout: Duration::from_secs(10),
            poll_interval: crate::transport::kafka::DEFAULT_POLL_INTERVAL,
            db_table: None,
            id_column: "id".to_string(),
            email_column: "email".to_string(),
        }
    }
}

/// Everything observed while verifying a created user
#[derive(Debug, Clone)]
pub struct UserVerification {
    pub response: HttpResponse,
    pub user_id: Option<String>,
    pub event: KafkaMessage,
    pub db_record: Row,
}

/// High-level user operations across HTTP, Kafka and DB
pub struct CrdsUser {
    client: Arc<CrdsUserClient>,
    kafka: Option<Arc<KafkaClient>>,
    db: Option<Arc<DbClient>>,
    user_topic: Option<String>,
    user_table: Option<String>,
}

impl CrdsUser {
    pub fn new(
        client: Arc<CrdsUserClient>,
        kafka: Option<Arc<KafkaClient>>,
        db: Option<Arc<DbClient>>,
        config: &Config,
    ) -> Self {
        Self {
            client,
            kafka,
            db,
            user_topic: config.get_str(USER_TOPIC_KEY),
            user_table: config.get_str(USER_TABLE_KEY),
        }
    }

    pub async fn create_user(
        &self,
        payload: &CreateUserRequest,
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        self.client.create_user(payload, options).await
    }

    /// Create a user, then wait for its event and its database row
    ///
    /// `request` carries the headers of the create call.
    pub async fn create_user_and_verify(
        &self,
        payload: &CreateUserRequest,
        request: RequestOptions,
        options: &VerifyOptions,
    ) -> Result<UserVerification> {
        let kafka = self.kafka.as_ref().ok_or_else(|| {
            Error::Config("Kafka client is required for create_user_and_verify (enable @kafka)".to_string())
        })?;
        let db = self.db.as_ref().ok_or_else(|| {
            Error::Config("DB client is required for create_user_and_verify (enable @db)".to_string())
        })?;

        let response = self.create_user(payload, request).await?;
        let body = response
            .json
            .as_ref()
            .and_then(Value::as_object)
            .ok_or_else(|| Error::TestAssertion("Create user response is not a JSON object".to_string()))?;
        let user_id = extract_user_id(body);

        let topic = options
            .kafka_topic
            .clone()
            .or_else(|| self.user_topic.clone())
            .ok_or_else(|| Error::missing_config(USER_TOPIC_KEY))?;
        let event = kafka
            .wait(
                &topic,
                |message| Ok(is_user_created(message, user_id.as_deref(), &payload.email)),
                options.kafka_timeout,
                options.poll_interval,
            )
            .await?;

        let table = options
            .db_table
            .clone()
            .or_else(|| self.user_table.clone())
            .ok_or_else(|| Error::missing_config(USER_TABLE_KEY))?;
        let db_record = fetch_user_record(
            db,
            &table,
            user_id.as_deref(),
            &payload.email,
            &options.id_column,
            &options.email_column,
        )
        .await?
        .ok_or_else(|| Error::TestAssertion(format!("User record not found in DB table {}", table)))?;

        tracing::info!(user_id = ?user_id, topic = %topic, table = %table, "User verified");
        Ok(UserVerification {
            response,
            user_id,
            event,
            db_record,
        })
    }
}

/// User id from the first of `id`, `userId`, `user_id` that is set
pub fn extract_user_id(body: &Map<String, Value>) -> Option<String> {
    ID_FIELDS
        .iter()
        .filter_map(|field| body.get(*field))
        .find(|value| is_truthy(value))
        .map(value_to_text)
}

/// Whether a message is the `USER_CREATED` event for this user
pub fn is_user_created(message: &KafkaMessage, user_id: Option<&str>, email: &str) -> bool {
    let Some(Value::Object(data)) = message.value_json() else {
        return false;
    };

    let event_type = first_set(&data, EVENT_TYPE_FIELDS).map(value_to_text);
    if event_type.as_deref() != Some(USER_CREATED) {
        return false;
    }
    if let Some(user_id) = user_id.filter(|id| !id.is_empty()) {
        let event_id = first_set(&data, ID_FIELDS).map(value_to_text);
        if event_id.as_deref() != Some(user_id) {
            return false;
        }
    }
    if !email.is_empty() {
        let event_email = data.get("email").map(value_to_text);
        if event_email.as_deref() != Some(email) {
            return false;
        }
    }
    true
}

async fn fetch_user_record(
    db: &DbClient,
    table: &str,
    user_id: Option<&str>,
    email: &str,
    id_column: &str,
    email_column: &str,
) -> Result<Option<Row>> {
    check_identifier(table)?;
    check_identifier(id_column)?;
    check_identifier(email_column)?;

    if let Some(user_id) = user_id.filter(|id| !id.is_empty()) {
        let query = format!("SELECT * FROM {} WHERE {}::text = $1", table, id_column);
        if let Some(record) = db.select_one(&query, &[DbParam::from(user_id)]).await? {
            return Ok(Some(record));
        }
    }
    let query = format!("SELECT * FROM {} WHERE {}::text = $1", table, email_column);
    db.select_one(&query, &[DbParam::from(email)]).await
}

fn check_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(Error::Config(format!("'{}' is not a valid SQL identifier", name)))
    }
}

fn first_set<'a>(data: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a Value> {
    fields
        .iter()
        .filter_map(|field| data.get(*field))
        .find(|value| is_truthy(value))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
