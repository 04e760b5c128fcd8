//! PostgreSQL connector backed by `tokio-postgres`.
//!
//! # Design Decisions
//! - Statements are prepared first so JSON parameters can be bound to the
//!   exact type the server expects
//! - Rows are converted column-by-column into JSON objects; unknown types fall
//!   back to their text form, or null

use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, NoTls};
use url::Url;

use crate::db::client::{ConnectOptions, Connector, DbError, Row, Session};

/// Connector opening plain-TCP Postgres sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

#[async_trait]
impl Connector for PostgresConnector {
    async fn open(&self, target: &str, options: &ConnectOptions) -> Result<Box<dyn Session>, DbError> {
        let mut config: Config = target
            .parse()
            .map_err(|e: tokio_postgres::Error| DbError::Connect(e.to_string()))?;
        config.connect_timeout(options.connect_timeout);
        if let Some(name) = &options.application_name {
            config.application_name(name);
        }

        let (client, connection) =
            tokio::time::timeout(options.connect_timeout, config.connect(NoTls))
                .await
                .map_err(|_| DbError::ConnectTimeout(options.connect_timeout))?
                .map_err(|e| DbError::Connect(e.to_string()))?;

        // The connection object drives the socket; it resolves when the
        // session ends.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "Postgres connection closed with error");
            }
        });

        Ok(Box::new(PostgresSession { client }))
    }
}

struct PostgresSession {
    client: Client,
}

#[async_trait]
impl Session for PostgresSession {
    async fn query(&mut self, text: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let statement = self.client.prepare(text).await.map_err(query_error)?;
        let expected = statement.params();
        if expected.len() != params.len() {
            return Err(DbError::Query(format!(
                "statement expects {} parameters, got {}",
                expected.len(),
                params.len()
            )));
        }

        let bound = params
            .iter()
            .zip(expected)
            .enumerate()
            .map(|(index, (value, ty))| bind_param(index, value, ty))
            .collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = self
            .client
            .query(&statement, &refs)
            .await
            .map_err(query_error)?;
        rows.iter().map(row_to_json).collect()
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        // Dropping the client ends the connection task.
        drop(self.client);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

fn query_error(e: tokio_postgres::Error) -> DbError {
    if e.is_closed() {
        DbError::Closed
    } else {
        DbError::Query(e.to_string())
    }
}

type Param = Box<dyn ToSql + Sync + Send>;

fn nullable<T>(value: &Value, extract: impl Fn(&Value) -> Option<T>) -> Option<Option<T>> {
    if value.is_null() {
        Some(None)
    } else {
        extract(value).map(Some)
    }
}

fn bind_param(index: usize, value: &Value, ty: &Type) -> Result<Param, DbError> {
    let mismatch = || DbError::Param {
        index,
        expected: ty.name().to_string(),
    };

    let param: Param = match ty.name() {
        "bool" => Box::new(nullable(value, Value::as_bool).ok_or_else(mismatch)?),
        "int2" => Box::new(
            nullable(value, |v| v.as_i64().and_then(|n| i16::try_from(n).ok()))
                .ok_or_else(mismatch)?,
        ),
        "int4" => Box::new(
            nullable(value, |v| v.as_i64().and_then(|n| i32::try_from(n).ok()))
                .ok_or_else(mismatch)?,
        ),
        "int8" => Box::new(nullable(value, Value::as_i64).ok_or_else(mismatch)?),
        "float4" => Box::new(nullable(value, |v| v.as_f64().map(|n| n as f32)).ok_or_else(mismatch)?),
        "float8" => Box::new(nullable(value, Value::as_f64).ok_or_else(mismatch)?),
        "json" | "jsonb" => Box::new(value.clone()),
        "text" | "varchar" | "bpchar" | "name" => Box::new(
            nullable(value, |v| v.as_str().map(str::to_string)).ok_or_else(mismatch)?,
        ),
        _ => return Err(mismatch()),
    };
    Ok(param)
}

fn row_to_json(row: &tokio_postgres::Row) -> Result<Row, DbError> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), column_value(row, idx, column.type_())?);
    }
    Ok(out)
}

fn column_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Result<Value, DbError> {
    let value = match ty.name() {
        "bool" => row.try_get::<_, Option<bool>>(idx).map_err(query_error)?.map(Value::from),
        "int2" => row.try_get::<_, Option<i16>>(idx).map_err(query_error)?.map(Value::from),
        "int4" => row.try_get::<_, Option<i32>>(idx).map_err(query_error)?.map(Value::from),
        "int8" => row.try_get::<_, Option<i64>>(idx).map_err(query_error)?.map(Value::from),
        "float4" => row.try_get::<_, Option<f32>>(idx).map_err(query_error)?.map(Value::from),
        "float8" => row.try_get::<_, Option<f64>>(idx).map_err(query_error)?.map(Value::from),
        "json" | "jsonb" => row.try_get::<_, Option<Value>>(idx).map_err(query_error)?,
        "text" | "varchar" | "bpchar" | "name" => row
            .try_get::<_, Option<String>>(idx)
            .map_err(query_error)?
            .map(Value::String),
        _ => row.try_get::<_, Option<String>>(idx).ok().flatten().map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Render a connection target for logs with any password masked.
pub fn redact_target(target: &str) -> String {
    match Url::parse(target) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) if target.contains("password") => "<redacted>".to_string(),
        Err(_) => target.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_url_password() {
        assert_eq!(
            redact_target("postgres://app:secret@db:5432/main"),
            "postgres://app:***@db:5432/main"
        );
        assert_eq!(
            redact_target("postgres://localhost:5432/postgres"),
            "postgres://localhost:5432/postgres"
        );
        assert_eq!(redact_target("host=db password=secret"), "<redacted>");
        assert_eq!(redact_target("host=db user=app"), "host=db user=app");
    }

    #[test]
    fn binds_params_by_expected_type() {
        assert!(bind_param(0, &json!(5), &Type::INT4).is_ok());
        assert!(bind_param(0, &json!(null), &Type::INT4).is_ok());
        assert!(bind_param(0, &json!("x"), &Type::TEXT).is_ok());
        assert!(bind_param(0, &json!({"a": 1}), &Type::JSONB).is_ok());

        assert_eq!(
            bind_param(1, &json!("x"), &Type::INT4).err(),
            Some(DbError::Param {
                index: 1,
                expected: "int4".into()
            })
        );
        assert!(bind_param(0, &json!(70000), &Type::INT2).is_err());
        assert!(bind_param(0, &json!(1), &Type::BYTEA).is_err());
    }
}
