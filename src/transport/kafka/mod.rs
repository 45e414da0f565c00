//! Kafka transport
//!
//! [`KafkaClient`] owns one consumer group and one producer over a
//! [`KafkaBackend`]. The backend is pluggable; [`memory::InMemoryBroker`] is
//! the default and what the test suite runs against.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::common::{Error, Result};

pub use memory::InMemoryBroker;

/// Default timeout for produce and offset lookups
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default poll interval used by [`KafkaClient::wait`]
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A consumed message
#[derive(Debug, Clone, PartialEq)]
pub struct KafkaMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: BTreeMap<String, Vec<u8>>,
    pub timestamp_ms: Option<i64>,
}

impl KafkaMessage {
    /// Value as UTF-8 text
    pub fn value_str(&self) -> Option<&str> {
        self.value
            .as_deref()
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Value parsed as JSON
    pub fn value_json(&self) -> Option<Value> {
        serde_json::from_slice(self.value.as_deref()?).ok()
    }

    pub fn key_str(&self) -> Option<&str> {
        self.key.as_deref().and_then(|k| std::str::from_utf8(k).ok())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// JSON view of the message for scenario data
    ///
    /// The value is embedded as JSON when it parses, else as text.
    pub fn to_json(&self) -> Value {
        let value = match self.value_json() {
            Some(v) => v,
            None => self
                .value_str()
                .map(|s| Value::String(s.to_string()))
                .unwrap_or(Value::Null),
        };
        let headers: serde_json::Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(String::from_utf8_lossy(v).into_owned())))
            .collect();
        json!({
            "topic": self.topic,
            "partition": self.partition,
            "offset": self.offset,
            "key": self.key_str(),
            "value": value,
            "headers": headers,
            "timestamp_ms": self.timestamp_ms,
        })
    }
}

/// A value to produce
///
/// Bytes are sent as-is, text as UTF-8, anything else as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum KafkaPayload {
    Bytes(Vec<u8>),
    Text(String),
    Json(Value),
}

impl KafkaPayload {
    /// Encoded bytes; JSON `null` is a tombstone
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            KafkaPayload::Bytes(b) => Some(b),
            KafkaPayload::Text(s) => Some(s.into_bytes()),
            KafkaPayload::Json(Value::Null) => None,
            KafkaPayload::Json(v) => Some(v.to_string().into_bytes()),
        }
    }
}

impl From<Value> for KafkaPayload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => KafkaPayload::Text(s),
            other => KafkaPayload::Json(other),
        }
    }
}

impl From<&str> for KafkaPayload {
    fn from(value: &str) -> Self {
        KafkaPayload::Text(value.to_string())
    }
}

impl From<String> for KafkaPayload {
    fn from(value: String) -> Self {
        KafkaPayload::Text(value)
    }
}

impl From<Vec<u8>> for KafkaPayload {
    fn from(value: Vec<u8>) -> Self {
        KafkaPayload::Bytes(value)
    }
}

/// An encoded record handed to the backend
#[derive(Debug, Clone)]
pub struct ProducerRecord {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: BTreeMap<String, Vec<u8>>,
}

/// Broker operations for one consumer group
#[async_trait]
pub trait KafkaBackend: Send + Sync {
    async fn produce(&self, record: ProducerRecord, timeout: Duration) -> Result<()>;

    /// Replace the current subscription
    async fn subscribe(&self, topics: &[String]) -> Result<()>;

    /// Next message from the subscription, `None` when the timeout elapses
    async fn poll(&self, timeout: Duration) -> Result<Option<KafkaMessage>>;

    /// High watermark of a partition
    async fn end_offset(&self, topic: &str, partition: i32, timeout: Duration) -> Result<i64>;

    /// Read up to `max_messages` starting at `offset`
    async fn fetch(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<KafkaMessage>>;

    async fn close(&self) -> Result<()>;
}

/// Kafka client bound to a scenario-unique consumer group
pub struct KafkaClient {
    group_id: String,
    backend: Arc<dyn KafkaBackend>,
    closed: AtomicBool,
}

impl KafkaClient {
    pub fn new(group_id: impl Into<String>, backend: Arc<dyn KafkaBackend>) -> Self {
        Self {
            group_id: group_id.into(),
            backend,
            closed: AtomicBool::new(false),
        }
    }

    /// Consumer group id for a scenario
    pub fn group_id_for(group_prefix: &str, scenario_id: &str) -> String {
        format!("{}-{}", group_prefix, scenario_id)
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Kafka(format!(
                "client for group {} is closed",
                self.group_id
            )));
        }
        Ok(())
    }

    /// Produce one message
    pub async fn produce(
        &self,
        topic: &str,
        value: impl Into<KafkaPayload>,
        key: Option<&str>,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        let record = ProducerRecord {
            topic: topic.to_string(),
            key: key.map(|k| k.as_bytes().to_vec()),
            value: value.into().into_bytes(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.clone(), v.as_bytes().to_vec()))
                .collect(),
        };
        self.backend.produce(record, timeout).await?;
        tracing::debug!(topic, group = %self.group_id, "Kafka message produced");
        Ok(())
    }

    pub async fn subscribe(&self, topics: &[&str]) -> Result<()> {
        self.ensure_open()?;
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        self.backend.subscribe(&topics).await
    }

    /// Poll once
    pub async fn consume(&self, timeout: Duration) -> Result<Option<KafkaMessage>> {
        self.ensure_open()?;
        self.backend.poll(timeout).await
    }

    /// Wait for the first message on `topic` accepted by `predicate`
    ///
    /// Polls every `poll_interval` until `timeout` elapses, then fails with
    /// [`Error::KafkaTimeout`]. A predicate error aborts the wait.
    pub async fn wait<F>(
        &self,
        topic: &str,
        predicate: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<KafkaMessage>
    where
        F: Fn(&KafkaMessage) -> Result<bool>,
    {
        self.subscribe(&[topic]).await?;
        let deadline = Instant::now() + timeout;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let slice = poll_interval.min(deadline - now);
            let Some(message) = self.consume(slice).await? else {
                continue;
            };
            match predicate(&message) {
                Ok(true) => {
                    tracing::debug!(topic, offset = message.offset, "Kafka message matched");
                    return Ok(message);
                }
                Ok(false) => {}
                Err(e) => return Err(Error::Kafka(format!("Predicate failed: {}", e))),
            }
        }

        tracing::warn!(topic, timeout = timeout.as_secs_f64(), "Kafka wait timed out");
        Err(Error::KafkaTimeout {
            topic: topic.to_string(),
            secs: timeout.as_secs_f64(),
        })
    }

    pub async fn get_end_offset(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> Result<i64> {
        self.ensure_open()?;
        self.backend.end_offset(topic, partition, timeout).await
    }

    /// Read messages starting at an absolute offset
    pub async fn consume_from_offset(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<KafkaMessage>> {
        self.ensure_open()?;
        if offset < 0 {
            return Err(Error::Kafka(format!(
                "offset must be non-negative, got {}",
                offset
            )));
        }
        self.backend
            .fetch(topic, partition, offset, max_messages, timeout)
            .await
    }

    /// Close the underlying backend; later calls are no-ops
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(group = %self.group_id, "Closing Kafka client");
        self.backend.close().await
    }
}
