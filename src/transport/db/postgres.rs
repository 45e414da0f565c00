//! PostgreSQL backend over `tokio-postgres`

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, NoTls};

use crate::common::{Error, Result};

use super::{DbBackend, DbParam, Row};

/// Microseconds between the Unix epoch and the PostgreSQL epoch (2000-01-01)
const PG_EPOCH_OFFSET_MICROS: i64 = 946_684_800_000_000;

/// A single PostgreSQL connection
pub struct PostgresBackend {
    client: Client,
    connection: Mutex<Option<JoinHandle<()>>>,
}

impl PostgresBackend {
    /// Connect and drive the connection on a background task
    pub async fn connect(connection_string: &str, timeout: Duration) -> Result<Self> {
        let (client, connection) =
            tokio::time::timeout(timeout, tokio_postgres::connect(connection_string, NoTls))
                .await
                .map_err(|_| Error::DbTimeout {
                    secs: timeout.as_secs_f64(),
                })?
                .map_err(|e| Error::Db(format!("Failed to connect: {}", e)))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        tracing::debug!("PostgreSQL connection established");
        Ok(Self {
            client,
            connection: Mutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl DbBackend for PostgresBackend {
    async fn query(&self, sql: &str, params: &[DbParam]) -> Result<Vec<Row>> {
        let bound = bind(params);
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let rows = self
            .client
            .query(sql, &refs)
            .await
            .map_err(|e| Error::Db(e.to_string()))?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, sql: &str, params: &[DbParam]) -> Result<u64> {
        let bound = bind(params);
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        self.client
            .execute(sql, &refs)
            .await
            .map_err(|e| Error::Db(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        let handle = self
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!("PostgreSQL connection closed");
        }
        Ok(())
    }
}

/// Owned parameters; `Send` so they can live across `.await`
type BoundParam = Box<dyn ToSql + Sync + Send>;

fn bind(params: &[DbParam]) -> Vec<BoundParam> {
    params
        .iter()
        .map(|param| -> BoundParam {
            match param {
                DbParam::Null => Box::new(Option::<String>::None),
                DbParam::Bool(b) => Box::new(*b),
                DbParam::Int(i) => Box::new(*i),
                DbParam::Float(f) => Box::new(*f),
                DbParam::Text(s) => Box::new(s.clone()),
                DbParam::Json(v) => Box::new(v.clone()),
            }
        })
        .collect()
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_())
            .map_err(|e| Error::Db(format!("column '{}': {}", column.name(), e)))?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_column(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &Type,
) -> std::result::Result<Value, tokio_postgres::Error> {
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map(Value::from)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?.map(Value::from)
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?.map(Value::from)
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(Value::from)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?.map(|f| Value::from(f as f64))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(Value::from)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<Value>>(idx)?
    } else {
        row.try_get::<_, Option<Fallback>>(idx)?.map(|f| f.0)
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Decoder for column types without a dedicated mapping
///
/// UUIDs render in canonical form, timestamps as Unix milliseconds, and
/// everything else as (lossy) text.
struct Fallback(Value);

impl<'a> FromSql<'a> for Fallback {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        if *ty == Type::UUID && raw.len() == 16 {
            let hex: String = raw.iter().map(|b| format!("{:02x}", b)).collect();
            return Ok(Fallback(Value::String(format!(
                "{}-{}-{}-{}-{}",
                &hex[0..8],
                &hex[8..12],
                &hex[12..16],
                &hex[16..20],
                &hex[20..32]
            ))));
        }
        if (*ty == Type::TIMESTAMP || *ty == Type::TIMESTAMPTZ) && raw.len() == 8 {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            let micros = i64::from_be_bytes(bytes) + PG_EPOCH_OFFSET_MICROS;
            return Ok(Fallback(Value::from(micros / 1000)));
        }
        Ok(Fallback(Value::String(
            String::from_utf8_lossy(raw).into_owned(),
        )))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_uuid() {
        let raw: Vec<u8> = (0u8..16).collect();
        let Fallback(value) = Fallback::from_sql(&Type::UUID, &raw).unwrap();
        assert_eq!(value, "00010203-0405-0607-0809-0a0b0c0d0e0f");
    }

    #[test]
    fn test_fallback_timestamp() {
        let raw = 0i64.to_be_bytes();
        let Fallback(value) = Fallback::from_sql(&Type::TIMESTAMPTZ, &raw).unwrap();
        assert_eq!(value, Value::from(946_684_800_000i64));
    }

    #[test]
    fn test_fallback_text() {
        let Fallback(value) = Fallback::from_sql(&Type::VARCHAR, b"ACTIVE").unwrap();
        assert_eq!(value, "ACTIVE");
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_bound_params_are_send() {
        let bound = bind(&[DbParam::Null, DbParam::Text("a".into())]);
        assert_eq!(bound.len(), 2);
        assert_send(&bound);
    }
}
