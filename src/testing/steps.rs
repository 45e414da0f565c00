//! Step implementations
//!
//! Every string a step takes passes through placeholder resolution against
//! the scenario data before it is used.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Method;
use serde_json::{Map, Value};

use crate::auth::CredentialSink;
use crate::common::{preview, value_to_text, Error, Result};
use crate::crds::{CreateUserRequest, VerifyOptions};
use crate::resources::api::ClientCall;
use crate::resources::ResourceKind;
use crate::scenario::{ScenarioContext, ScenarioData, LAST_RESPONSE};
use crate::transport::kafka::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
use crate::transport::{DbParam, HttpResponse, KafkaMessage, RequestOptions, Schema};

use super::config::TestStep;

/// Marker in client params/bodies for the id cached by the previous call
const FROM_PREVIOUS_STEP: &str = "<from previous step>";

/// Entity holding the last message read or matched on Kafka
pub const KAFKA_MESSAGE: &str = "kafka_message";
/// Entity holding the messages of the last `read_kafka`
pub const KAFKA_MESSAGES: &str = "kafka_messages";

/// Execute a single step against the scenario
pub async fn execute_step(ctx: &mut ScenarioContext<'_>, step: &TestStep) -> Result<()> {
    match step {
        TestStep::Authenticate { service, token } => authenticate(ctx, service, token.as_deref()),
        TestStep::SetHeader { name, value } => {
            let value = ctx.data.resolve_placeholders(value)?;
            ctx.data
                .get_request_context()
                .headers
                .insert(name.clone(), value);
            Ok(())
        }
        TestStep::SetParam { name, value } => {
            let value = ctx.data.resolve_placeholders(value)?;
            ctx.data
                .get_request_context()
                .params
                .insert(name.clone(), value);
            Ok(())
        }
        TestStep::SetJson { fields } => {
            let Value::Object(fields) = ctx.data.resolve_value(&Value::Object(fields.clone()))? else {
                return Err(Error::Internal("resolved body is not an object".to_string()));
            };
            ctx.data.get_request_context().json.extend(fields);
            Ok(())
        }
        TestStep::ClearRequest => {
            ctx.data.clear_request_context();
            Ok(())
        }
        TestStep::Request {
            method,
            path,
            service,
            alias,
            required_fields,
            schema,
        } => {
            let schema = response_schema(required_fields, schema.as_ref())?;
            send_request(ctx, method, path, service, alias.as_deref(), schema).await
        }
        TestStep::CreateUser {
            fields,
            verify,
            alias,
        } => create_user(ctx, fields, *verify, alias.as_deref()).await,
        TestStep::GetUser { user_id, alias } => {
            let client = ctx.bindings.require_crds_user()?;
            let user_id = ctx.data.resolve_placeholders(user_id)?;
            let response = client.get_user(&user_id, pending_headers(&mut ctx.data)).await?;
            record_response(&mut ctx.data, response, alias.as_deref())
        }
        TestStep::DeleteUser { user_id, alias } => {
            let client = ctx.bindings.require_crds_user()?;
            let user_id = ctx.data.resolve_placeholders(user_id)?;
            let response = client.delete_user(&user_id, pending_headers(&mut ctx.data)).await?;
            record_response(&mut ctx.data, response, alias.as_deref())
        }
        TestStep::CallClient {
            client,
            method,
            params,
            body,
            alias,
        } => call_client(ctx, client, method, params, body.as_ref(), alias.as_deref()).await,
        TestStep::ExpectStatus { status, response } => {
            let response = response_for(&ctx.data, response.as_deref())?;
            if response.status_code != *status {
                return Err(Error::TestAssertion(format!(
                    "Expected {}, got {}: {}",
                    status,
                    response.status_code,
                    preview(&response.text, 200)
                )));
            }
            Ok(())
        }
        TestStep::ExpectField {
            field,
            equals,
            response,
        } => {
            let expected = equals.as_ref().map(|v| ctx.data.resolve_value(v)).transpose()?;
            let actual = response_field(&ctx.data, response.as_deref(), field)?;
            match expected {
                Some(expected) if !same_value(actual, &expected) => Err(Error::TestAssertion(format!(
                    "Field '{}': expected {}, got {}",
                    field, expected, actual
                ))),
                _ => Ok(()),
            }
        }
        TestStep::StoreField {
            field,
            into,
            response,
        } => {
            let value = response_field(&ctx.data, response.as_deref(), field)?.clone();
            ctx.data.put_entity(into, value.clone(), true)?;
            ctx.data.put_var(into, value, true)
        }
        TestStep::StoreKafkaEndOffset {
            topic,
            partition,
            var,
        } => {
            let kafka = ctx.bindings.require_kafka()?;
            let topic = ctx.data.resolve_placeholders(topic)?;
            let offset = kafka.get_end_offset(&topic, *partition, DEFAULT_TIMEOUT).await?;
            tracing::debug!(topic = %topic, partition, offset, "End offset stored");
            ctx.data.put_var(var, offset, true)
        }
        TestStep::ReadKafka {
            topic,
            partition,
            offset,
            shift,
            max_messages,
            expect_count,
        } => {
            let kafka = ctx.bindings.require_kafka()?;
            let topic = ctx.data.resolve_placeholders(topic)?;
            let offset = shifted_offset(&ctx.data, offset, *shift)?;
            let messages = kafka
                .consume_from_offset(&topic, *partition, offset, *max_messages, DEFAULT_TIMEOUT)
                .await?;
            if let Some(expected) = expect_count {
                if messages.len() < *expected {
                    return Err(Error::TestAssertion(format!(
                        "Expected at least {} messages on {} from offset {}, got {}",
                        expected,
                        topic,
                        offset,
                        messages.len()
                    )));
                }
            }
            let first = messages.first().map(KafkaMessage::to_json).unwrap_or(Value::Null);
            let all: Vec<Value> = messages.iter().map(KafkaMessage::to_json).collect();
            ctx.data.put_entity(KAFKA_MESSAGES, all, true)?;
            ctx.data.put_entity(KAFKA_MESSAGE, first, true)
        }
        TestStep::WaitKafka {
            topic,
            matches,
            timeout,
            poll_interval,
            store_as,
        } => {
            let kafka = ctx.bindings.require_kafka()?;
            let topic = ctx.data.resolve_placeholders(topic)?;
            let Value::Object(expected) = ctx.data.resolve_value(&Value::Object(matches.clone()))? else {
                return Err(Error::Internal("resolved matches are not an object".to_string()));
            };
            let timeout = secs(timeout.unwrap_or(DEFAULT_TIMEOUT.as_secs_f64()))?;
            let poll_interval = secs(poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL.as_secs_f64()))?;

            let message = kafka
                .wait(
                    &topic,
                    |message| Ok(message_matches(message, &expected)),
                    timeout,
                    poll_interval,
                )
                .await?;
            if let Some(alias) = store_as {
                ctx.data.put_entity(alias, message.to_json(), true)?;
            }
            ctx.data.put_entity(KAFKA_MESSAGE, message.to_json(), true)
        }
        TestStep::ProduceKafka {
            topic,
            key,
            value,
            headers,
        } => {
            let kafka = ctx.bindings.require_kafka()?;
            let topic = ctx.data.resolve_placeholders(topic)?;
            let value = ctx.data.resolve_value(value)?;
            let key = key
                .as_deref()
                .map(|k| ctx.data.resolve_placeholders(k))
                .transpose()?;
            let headers = resolve_map(&ctx.data, headers)?;
            kafka
                .produce(&topic, value, key.as_deref(), &headers, DEFAULT_TIMEOUT)
                .await
        }
        TestStep::QueryDb {
            sql,
            params,
            expect_rows,
            store_as,
        } => {
            let db = ctx.bindings.require_db()?;
            let params = params
                .iter()
                .map(|p| ctx.data.resolve_value(p).map(DbParam::from))
                .collect::<Result<Vec<_>>>()?;
            let rows = db.select_many(sql, &params).await?;
            if let Some(expected) = expect_rows {
                if rows.len() != *expected {
                    return Err(Error::TestAssertion(format!(
                        "Expected {} rows, got {}",
                        expected,
                        rows.len()
                    )));
                }
            }
            if let Some(alias) = store_as {
                let rows: Vec<Value> = rows.into_iter().map(Value::Object).collect();
                ctx.data.put_entity(alias, rows, true)?;
            }
            Ok(())
        }
        TestStep::ExpectResources { names } => expect_resources(ctx, names),
        TestStep::SetVar { name, value } => {
            let value = ctx.data.resolve_value(value)?;
            ctx.data.put_var(name, value, true)
        }
        TestStep::SetEntity { name, value } => {
            let value = ctx.data.resolve_value(value)?;
            ctx.data.put_entity(name, value, true)
        }
    }
}

fn authenticate(ctx: &mut ScenarioContext<'_>, service: &str, token: Option<&str>) -> Result<()> {
    let token = match token {
        Some(token) => ctx.data.resolve_placeholders(token)?,
        None => ctx.config().require_str(&format!("{}.auth.token", service))?,
    };
    ctx.bindings.require_tokens()?.set_token(service, Some(&token))
}

async fn send_request(
    ctx: &mut ScenarioContext<'_>,
    method: &str,
    path: &str,
    service: &str,
    alias: Option<&str>,
    schema: Option<Schema>,
) -> Result<()> {
    let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| Error::TestAssertion(format!("Invalid HTTP method '{}'", method)))?;
    let client = ctx.bindings.require_http_factory()?.get(service)?;
    let path = ctx.data.resolve_placeholders(path)?;

    let request = ctx.data.take_request_context();
    let options = RequestOptions {
        service: Some(service.to_string()),
        json_body: request.json_body(),
        params: request.params,
        headers: request.headers,
        validate_schema: schema.as_ref().map(|_| true),
        schema,
        ..Default::default()
    };

    let response = client.request(method, &path, options).await?;
    record_response(&mut ctx.data, response, alias)
}

/// Schema for a `request` step: a JSON Schema document, required fields, or both
fn response_schema(required_fields: &[String], document: Option<&Value>) -> Result<Option<Schema>> {
    let required = (!required_fields.is_empty()).then(|| {
        let fields: Vec<&str> = required_fields.iter().map(String::as_str).collect();
        Schema::required_fields(&fields)
    });
    let document = document.map(Schema::json).transpose()?;
    Ok(match (document, required) {
        (Some(document), Some(required)) => Some(document.and(required)),
        (document, required) => document.or(required),
    })
}

async fn create_user(
    ctx: &mut ScenarioContext<'_>,
    fields: &BTreeMap<String, String>,
    verify: bool,
    alias: Option<&str>,
) -> Result<()> {
    let fields = resolve_map(&ctx.data, fields)?;
    let payload = CreateUserRequest::from_fields(&fields)?;
    let system = ctx.crds_user_system()?;

    let request = pending_headers(&mut ctx.data);
    let response = if verify {
        let verified = system
            .create_user_and_verify(&payload, request, &VerifyOptions::default())
            .await?;
        ctx.data
            .put_entity(KAFKA_MESSAGE, verified.event.to_json(), true)?;
        ctx.data
            .put_entity("db_record", Value::Object(verified.db_record), true)?;
        verified.response
    } else {
        system.create_user(&payload, request).await?
    };

    cache_created_id(&mut ctx.data, &response)?;
    record_response(&mut ctx.data, response, alias)
}

async fn call_client(
    ctx: &mut ScenarioContext<'_>,
    client_name: &str,
    method: &str,
    params: &BTreeMap<String, String>,
    body: Option<&BTreeMap<String, String>>,
    alias: Option<&str>,
) -> Result<()> {
    let client = ctx.bindings.require_clients()?.get(client_name)?;
    if !client.methods().contains(&method) {
        return Err(Error::TestAssertion(format!(
            "Client '{}' has no method '{}'. Available: [{}]",
            client_name,
            method,
            client.methods().join(", ")
        )));
    }

    let mut call = ClientCall {
        headers: ctx.data.take_request_context().headers,
        ..Default::default()
    };
    for (key, value) in params {
        call.params
            .insert(key.clone(), resolve_client_value(&ctx.data, value)?);
    }
    if let Some(body) = body {
        let mut fields = Map::new();
        for (key, value) in body {
            fields.insert(key.clone(), resolve_client_value(&ctx.data, value)?);
        }
        call.body = Some(Value::Object(fields));
    }

    let response = client.call(method, call).await?;
    cache_created_id(&mut ctx.data, &response)?;
    record_response(&mut ctx.data, response, alias)
}

fn expect_resources(ctx: &ScenarioContext<'_>, names: &[String]) -> Result<()> {
    let mut missing = Vec::new();
    for name in names {
        let kind: ResourceKind = name.trim().trim_start_matches('@').parse()?;
        if !ctx.registry().has(kind) {
            missing.push(kind.as_str());
        }
    }
    if missing.is_empty() {
        return Ok(());
    }
    let available: Vec<&str> = ctx.registry().kinds().iter().map(|k| k.as_str()).collect();
    Err(Error::TestAssertion(format!(
        "Missing resources: [{}]. Available: [{}]",
        missing.join(", "),
        available.join(", ")
    )))
}

/// Hand the pending request's headers to a typed client call
fn pending_headers(data: &mut ScenarioData) -> RequestOptions {
    RequestOptions {
        headers: data.take_request_context().headers,
        ..Default::default()
    }
}

/// Store a response as `last` and, write-once, under its alias
fn record_response(data: &mut ScenarioData, response: HttpResponse, alias: Option<&str>) -> Result<()> {
    tracing::debug!(status = response.status_code, "Response recorded");
    if let Some(alias) = alias {
        data.put_response(alias, response.clone(), false)?;
    }
    data.put_response(LAST_RESPONSE, response, true)
}

/// Cache the `id` of a created resource as `last_id` and `user_id`
fn cache_created_id(data: &mut ScenarioData, response: &HttpResponse) -> Result<()> {
    let Some(id) = response.field("id").filter(|id| !id.is_null()) else {
        return Ok(());
    };
    let id = value_to_text(id);
    if id.is_empty() {
        return Ok(());
    }
    for alias in ["last_id", "user_id"] {
        data.put_entity(alias, id.as_str(), true)?;
        data.put_var(alias, id.as_str(), true)?;
    }
    Ok(())
}

fn response_for<'a>(data: &'a ScenarioData, alias: Option<&str>) -> Result<&'a HttpResponse> {
    data.get_response(alias.unwrap_or(LAST_RESPONSE))
}

fn response_field<'a>(data: &'a ScenarioData, alias: Option<&str>, field: &str) -> Result<&'a Value> {
    let response = response_for(data, alias)?;
    let body = response
        .json
        .as_ref()
        .and_then(Value::as_object)
        .ok_or_else(|| Error::TestAssertion("Response JSON is not an object".to_string()))?;
    body.get(field)
        .ok_or_else(|| Error::TestAssertion(format!("Missing field '{}' in response", field)))
}

/// Resolve a client param or body value
///
/// `<from previous step>` is the cached `last_id`; `${name}` is a whole var
/// or entity; anything else goes through placeholder resolution.
fn resolve_client_value(data: &ScenarioData, raw: &str) -> Result<Value> {
    if raw == FROM_PREVIOUS_STEP {
        return data
            .get_entity("last_id")
            .cloned()
            .or_else(|_| data.get_var("last_id").map(|v| Value::String(v.to_string())));
    }
    if let Some(name) = raw.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
        return data
            .get_var(name)
            .map(|v| Value::String(v.to_string()))
            .or_else(|_| data.get_entity(name).cloned());
    }
    Ok(Value::String(data.resolve_placeholders(raw)?))
}

/// Offset expression: an integer or `${var}` holding one
fn resolve_offset(data: &ScenarioData, expr: &str) -> Result<i64> {
    let expr = expr.trim();
    if let Ok(offset) = expr.parse::<i64>() {
        return Ok(offset);
    }
    let Some(name) = expr.strip_prefix("${").and_then(|r| r.strip_suffix('}')) else {
        return Err(Error::TestAssertion(format!(
            "Invalid offset expression '{}'. Use an integer or ${{var}}",
            expr
        )));
    };
    let raw = data.get_var(name)?;
    raw.trim().parse().map_err(|_| {
        Error::TestAssertion(format!("Variable '{}' is not an int: {:?}", name, raw))
    })
}

/// Offset expression plus a shift, rejecting overflow
fn shifted_offset(data: &ScenarioData, expr: &str, shift: i64) -> Result<i64> {
    let base = resolve_offset(data, expr)?;
    base.checked_add(shift).ok_or_else(|| {
        Error::TestAssertion(format!("Offset {} shifted by {} overflows", base, shift))
    })
}

fn resolve_map(data: &ScenarioData, map: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), data.resolve_placeholders(v)?)))
        .collect()
}

/// Whether every expected field is present in the message's JSON object
fn message_matches(message: &KafkaMessage, expected: &Map<String, Value>) -> bool {
    let Some(Value::Object(actual)) = message.value_json() else {
        return false;
    };
    expected
        .iter()
        .all(|(key, want)| actual.get(key).is_some_and(|got| same_value(got, want)))
}

/// Equal as JSON, or equal once both are rendered as text (`7` vs `"7"`)
fn same_value(actual: &Value, expected: &Value) -> bool {
    actual == expected || value_to_text(actual) == value_to_text(expected)
}

fn secs(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::TestAssertion(format!("Invalid duration {}s", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data_with_vars() -> ScenarioData {
        let mut data = ScenarioData::new();
        data.put_var("start", 40, true).unwrap();
        data.put_var("bad", "forty", true).unwrap();
        data.put_entity("last_id", "abc", true).unwrap();
        data
    }

    #[test]
    fn test_resolve_offset() {
        let data = data_with_vars();
        assert_eq!(resolve_offset(&data, "12").unwrap(), 12);
        assert_eq!(resolve_offset(&data, " ${start} ").unwrap(), 40);
        assert!(resolve_offset(&data, "${bad}")
            .unwrap_err()
            .to_string()
            .contains("is not an int"));
        assert!(resolve_offset(&data, "${missing}").is_err());
        assert!(resolve_offset(&data, "start").is_err());
    }

    #[test]
    fn test_shifted_offset() {
        let data = data_with_vars();
        assert_eq!(shifted_offset(&data, "${start}", 2).unwrap(), 42);
        assert_eq!(shifted_offset(&data, "${start}", -40).unwrap(), 0);
        let err = shifted_offset(&data, &i64::MAX.to_string(), 1).unwrap_err();
        assert!(err.to_string().contains("overflows"));
        assert!(shifted_offset(&data, "${start}", i64::MIN).is_ok());
        assert!(shifted_offset(&data, &i64::MIN.to_string(), -1).is_err());
    }

    #[test]
    fn test_response_schema() {
        assert!(response_schema(&[], None).unwrap().is_none());

        let required = vec!["id".to_string()];
        let document = json!({"type": "object", "properties": {"id": {"type": "string"}}});
        let schema = response_schema(&required, Some(&document)).unwrap().unwrap();
        assert!(schema.validate(&json!({"id": "abc"})).is_ok());
        assert!(schema.validate(&json!({"id": 1})).is_err());
        assert!(schema.validate(&json!({})).unwrap_err().contains("id"));

        let only_document = response_schema(&[], Some(&document)).unwrap().unwrap();
        assert!(only_document.validate(&json!({})).is_ok());

        assert!(response_schema(&[], Some(&json!({"type": 12}))).is_err());
    }

    #[test]
    fn test_resolve_client_value() {
        let data = data_with_vars();
        assert_eq!(resolve_client_value(&data, FROM_PREVIOUS_STEP).unwrap(), json!("abc"));
        assert_eq!(resolve_client_value(&data, "${start}").unwrap(), json!("40"));
        assert_eq!(resolve_client_value(&data, "${last_id}").unwrap(), json!("abc"));
        assert_eq!(resolve_client_value(&data, "/users/{last_id}").unwrap(), json!("/users/abc"));
    }

    #[test]
    fn test_cache_created_id() {
        let mut data = ScenarioData::new();
        let response = HttpResponse {
            status_code: 201,
            headers: BTreeMap::new(),
            text: r#"{"id":"abc"}"#.to_string(),
            json: Some(json!({"id": "abc"})),
        };
        cache_created_id(&mut data, &response).unwrap();
        assert_eq!(data.get_var("user_id").unwrap(), "abc");
        assert_eq!(data.get_entity("last_id").unwrap(), &json!("abc"));
        assert_eq!(data.resolve_placeholders("/users/{user_id}").unwrap(), "/users/abc");
    }

    #[test]
    fn test_same_value() {
        assert!(same_value(&json!(7), &json!("7")));
        assert!(same_value(&json!({"a": 1}), &json!({"a": 1})));
        assert!(!same_value(&json!("ACTIVE"), &json!("INACTIVE")));
    }
}
