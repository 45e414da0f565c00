//! Database transport
//!
//! Rows come back as JSON objects keyed by column name so steps can compare
//! them with response bodies and stored entities. Every call is bounded by
//! the client timeout.

pub mod postgres;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::common::{Error, Result};

pub use postgres::PostgresBackend;

/// A result row: column name to value
pub type Row = serde_json::Map<String, Value>;

/// A bound query parameter
#[derive(Debug, Clone, PartialEq)]
pub enum DbParam {
    Null,
    Bool(bool),
    /// Binds as `int8`
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
}

impl From<Value> for DbParam {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => DbParam::Null,
            Value::Bool(b) => DbParam::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => DbParam::Int(i),
                None => DbParam::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => DbParam::Text(s),
            other => DbParam::Json(other),
        }
    }
}

impl From<&str> for DbParam {
    fn from(value: &str) -> Self {
        DbParam::Text(value.to_string())
    }
}

impl From<String> for DbParam {
    fn from(value: String) -> Self {
        DbParam::Text(value)
    }
}

impl From<i64> for DbParam {
    fn from(value: i64) -> Self {
        DbParam::Int(value)
    }
}

/// Database operations
#[async_trait]
pub trait DbBackend: Send + Sync {
    async fn query(&self, sql: &str, params: &[DbParam]) -> Result<Vec<Row>>;

    /// Run a statement, returning the affected row count
    async fn execute(&self, sql: &str, params: &[DbParam]) -> Result<u64>;

    async fn close(&self) -> Result<()>;
}

/// Database client with per-call timeouts
pub struct DbClient {
    backend: Arc<dyn DbBackend>,
    timeout: Duration,
    closed: AtomicBool,
}

impl DbClient {
    pub fn new(backend: Arc<dyn DbBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// First row of a query, if any
    pub async fn select_one(&self, sql: &str, params: &[DbParam]) -> Result<Option<Row>> {
        Ok(self.select_many(sql, params).await?.into_iter().next())
    }

    pub async fn select_many(&self, sql: &str, params: &[DbParam]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        tracing::debug!(sql, params = ?params, "DB query");
        self.bounded(self.backend.query(sql, params)).await
    }

    pub async fn execute(&self, sql: &str, params: &[DbParam]) -> Result<u64> {
        self.ensure_open()?;
        tracing::debug!(sql, params = ?params, "DB execute");
        self.bounded(self.backend.execute(sql, params)).await
    }

    /// Close the connection; later calls are no-ops
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.close().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Db("client is closed".to_string()));
        }
        Ok(())
    }

    async fn bounded<T>(&self, call: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| Error::DbTimeout {
                secs: self.timeout.as_secs_f64(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubBackend {
        rows: Vec<Row>,
        delay: Option<Duration>,
        closes: Mutex<usize>,
    }

    #[async_trait]
    impl DbBackend for StubBackend {
        async fn query(&self, _sql: &str, _params: &[DbParam]) -> Result<Vec<Row>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.rows.clone())
        }

        async fn execute(&self, _sql: &str, params: &[DbParam]) -> Result<u64> {
            Ok(params.len() as u64)
        }

        async fn close(&self) -> Result<()> {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_param_from_json() {
        assert_eq!(DbParam::from(json!(5)), DbParam::Int(5));
        assert_eq!(DbParam::from(json!(1.5)), DbParam::Float(1.5));
        assert_eq!(DbParam::from(json!("a")), DbParam::Text("a".into()));
        assert_eq!(DbParam::from(json!(null)), DbParam::Null);
        assert_eq!(
            DbParam::from(json!({"k": 1})),
            DbParam::Json(json!({"k": 1}))
        );
    }

    #[tokio::test]
    async fn test_select_one_and_many() {
        let backend = StubBackend {
            rows: vec![row(json!({"id": "1"})), row(json!({"id": "2"}))],
            ..Default::default()
        };
        let client = DbClient::new(Arc::new(backend), Duration::from_secs(1));
        let first = client.select_one("select", &[]).await.unwrap().unwrap();
        assert_eq!(first["id"], "1");
        assert_eq!(client.select_many("select", &[]).await.unwrap().len(), 2);
        assert_eq!(
            client
                .execute("update", &[DbParam::Int(1), DbParam::Null])
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let backend = StubBackend {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let client = DbClient::new(Arc::new(backend), Duration::from_millis(20));
        let err = client.select_many("select", &[]).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, Error::DbTimeout { .. }));
        assert!(err.to_string().contains("0.02"));
    }

    #[tokio::test]
    async fn test_closed_client_error_is_not_a_timeout() {
        let client = DbClient::new(Arc::new(StubBackend::default()), Duration::from_secs(1));
        client.close().await.unwrap();
        let err = client.select_many("select", &[]).await.unwrap_err();
        assert!(!err.is_timeout());
        assert!(matches!(err, Error::Db(_)));
    }

    #[tokio::test]
    async fn test_close_once() {
        let backend = Arc::new(StubBackend::default());
        let client = DbClient::new(backend.clone(), Duration::from_secs(1));
        client.close().await.unwrap();
        client.close().await.unwrap();
        assert_eq!(*backend.closes.lock().unwrap(), 1);
        assert!(client.select_one("select", &[]).await.is_err());
    }
}
