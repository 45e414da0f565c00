//! In-process Kafka broker
//!
//! Topics are append-only logs with a single partition (0). Each consumer
//! group tracks its own positions and starts from the earliest offset.
//! Producers wake waiting consumers through a [`Notify`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::common::{Error, Result};

use super::{KafkaBackend, KafkaMessage, ProducerRecord};

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<KafkaMessage>>,
    closed_groups: Vec<String>,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// Shared in-memory broker; clones refer to the same topics
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a consumer/producer handle for a group
    pub fn consumer(&self, group_id: &str) -> MemoryConsumer {
        MemoryConsumer {
            broker: self.clone(),
            group_id: group_id.to_string(),
            cursor: Mutex::new(Cursor::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Append a record and wake pollers, returning its offset
    pub fn publish(&self, record: ProducerRecord) -> i64 {
        let offset = {
            let mut state = self.lock();
            let log = state.topics.entry(record.topic.clone()).or_default();
            let offset = log.len() as i64;
            log.push(KafkaMessage {
                topic: record.topic,
                partition: 0,
                offset,
                key: record.key,
                value: record.value,
                headers: record.headers,
                timestamp_ms: Some(now_ms()),
            });
            offset
        };
        self.inner.notify.notify_waiters();
        offset
    }

    /// Messages currently stored for a topic
    pub fn messages(&self, topic: &str) -> Vec<KafkaMessage> {
        self.lock().topics.get(topic).cloned().unwrap_or_default()
    }

    /// Groups whose consumer has been closed, in close order
    pub fn closed_groups(&self) -> Vec<String> {
        self.lock().closed_groups.clone()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Default)]
struct Cursor {
    subscriptions: Vec<String>,
    positions: HashMap<String, i64>,
}

/// One consumer group's view of an [`InMemoryBroker`]
pub struct MemoryConsumer {
    broker: InMemoryBroker,
    group_id: String,
    cursor: Mutex<Cursor>,
    closed: AtomicBool,
}

impl MemoryConsumer {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Kafka(format!("consumer {} is closed", self.group_id)));
        }
        Ok(())
    }

    fn cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the next available message across subscribed topics
    fn next_ready(&self) -> Option<KafkaMessage> {
        let mut cursor = self.cursor();
        let state = self.broker.lock();
        let Cursor {
            subscriptions,
            positions,
        } = &mut *cursor;
        for topic in subscriptions.iter() {
            let position = positions.entry(topic.clone()).or_insert(0);
            if let Some(message) = state
                .topics
                .get(topic)
                .and_then(|log| log.get(*position as usize))
            {
                *position += 1;
                return Some(message.clone());
            }
        }
        None
    }
}

#[async_trait]
impl KafkaBackend for MemoryConsumer {
    async fn produce(&self, record: ProducerRecord, _timeout: Duration) -> Result<()> {
        self.check_open()?;
        if record.topic.is_empty() {
            return Err(Error::Kafka("Kafka produce failed: empty topic".to_string()));
        }
        self.broker.publish(record);
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<()> {
        self.check_open()?;
        self.cursor().subscriptions = topics.to_vec();
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<KafkaMessage>> {
        self.check_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a concurrent publish is not missed
            let notified = self.broker.inner.notify.notified();
            if let Some(message) = self.next_ready() {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn end_offset(&self, topic: &str, partition: i32, _timeout: Duration) -> Result<i64> {
        self.check_open()?;
        if partition != 0 {
            return Err(Error::Kafka(format!(
                "unknown partition {} for topic {}",
                partition, topic
            )));
        }
        Ok(self
            .broker
            .lock()
            .topics
            .get(topic)
            .map(|log| log.len() as i64)
            .unwrap_or(0))
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<KafkaMessage>> {
        self.check_open()?;
        if partition != 0 {
            return Err(Error::Kafka(format!(
                "unknown partition {} for topic {}",
                partition, topic
            )));
        }
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.broker.inner.notify.notified();
            let batch: Vec<KafkaMessage> = self
                .broker
                .lock()
                .topics
                .get(topic)
                .map(|log| {
                    log.iter()
                        .skip(offset as usize)
                        .take(max_messages)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.lock().closed_groups.push(self.group_id.clone());
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
