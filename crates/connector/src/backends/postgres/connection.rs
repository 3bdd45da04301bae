//! Pooled PostgreSQL connections.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::runtime::Runtime;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

use crate::engine::Connection;
use crate::entity::{FieldType, Value};
use crate::error::{BackendError, ConnectorResult};
use crate::sql::{Dialect, SqlParam};
use crate::target::BackendKind;
use crate::tenant::Namespace;

use super::PostgresDialect;

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// A connection checked out of a PostgreSQL engine.
pub struct PostgresConnection {
    client: deadpool_postgres::Client,
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnection").finish()
    }
}

impl PostgresConnection {
    pub(crate) fn new(client: deadpool_postgres::Client, runtime: Arc<Runtime>) -> Self {
        Self { client, runtime }
    }

    fn batch(&self, sql: &str) -> ConnectorResult<()> {
        self.runtime.block_on(self.client.batch_execute(sql))?;
        Ok(())
    }
}

/// Binds a value with the Rust type matching its declared column type, so
/// `NULL`s are typed too.
fn to_pg(param: &SqlParam) -> BoxedParam {
    match (&param.value, param.field_type) {
        (Value::Null, FieldType::Integer) => Box::new(None::<i64>),
        (Value::Null, FieldType::Real) => Box::new(None::<f64>),
        (Value::Null, FieldType::Text) => Box::new(None::<String>),
        (Value::Null, FieldType::Boolean) => Box::new(None::<bool>),
        (Value::Null, FieldType::Blob) => Box::new(None::<Vec<u8>>),
        (Value::Null, FieldType::Timestamp) => Box::new(None::<DateTime<Utc>>),
        (Value::Null, FieldType::Json) => Box::new(None::<serde_json::Value>),
        (Value::Boolean(b), _) => Box::new(*b),
        (Value::Integer(i), FieldType::Real) => Box::new(*i as f64),
        (Value::Integer(i), _) => Box::new(*i),
        (Value::Real(r), _) => Box::new(*r),
        (Value::Text(s), _) => Box::new(s.clone()),
        (Value::Blob(b), _) => Box::new(b.clone()),
        (Value::Timestamp(ts), _) => Box::new(*ts),
        (Value::Json(json), _) => Box::new(json.clone()),
    }
}

fn decode(row: &Row, index: usize, field_type: FieldType) -> ConnectorResult<Value> {
    fn get<'a, T>(row: &'a Row, index: usize) -> ConnectorResult<Option<T>>
    where
        T: tokio_postgres::types::FromSql<'a>,
    {
        row.try_get::<_, Option<T>>(index).map_err(|e| {
            BackendError::Decode {
                backend: BackendKind::Postgres,
                column: index.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    let value = match field_type {
        FieldType::Integer => get::<i64>(row, index)?.map(Value::Integer),
        FieldType::Real => get::<f64>(row, index)?.map(Value::Real),
        FieldType::Text => get::<String>(row, index)?.map(Value::Text),
        FieldType::Boolean => get::<bool>(row, index)?.map(Value::Boolean),
        FieldType::Blob => get::<Vec<u8>>(row, index)?.map(Value::Blob),
        FieldType::Timestamp => get::<DateTime<Utc>>(row, index)?.map(Value::Timestamp),
        FieldType::Json => get::<serde_json::Value>(row, index)?.map(Value::Json),
    };
    Ok(value.unwrap_or(Value::Null))
}

impl Connection for PostgresConnection {
    fn bind_namespace(&mut self, _namespace: &Namespace) -> ConnectorResult<()> {
        // Statements are schema-qualified; nothing to bind.
        Ok(())
    }

    fn ensure_namespace(&mut self, namespace: &Namespace) -> ConnectorResult<()> {
        match namespace.schema() {
            Some(schema) => self.batch(&format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                PostgresDialect.quote_ident(schema)
            )),
            None => Ok(()),
        }
    }

    fn create_database_if_absent(&mut self, database: &str) -> ConnectorResult<()> {
        let rows = self.runtime.block_on(
            self.client
                .query("SELECT 1 FROM pg_database WHERE datname = $1", &[&database]),
        )?;
        if rows.is_empty() {
            self.batch(&format!(
                "CREATE DATABASE {}",
                PostgresDialect.quote_ident(database)
            ))?;
        }
        Ok(())
    }

    fn begin(&mut self) -> ConnectorResult<()> {
        self.batch("BEGIN")
    }

    fn commit(&mut self) -> ConnectorResult<()> {
        self.batch("COMMIT")
    }

    fn rollback(&mut self) -> ConnectorResult<()> {
        self.batch("ROLLBACK")
    }

    fn execute(&mut self, sql: &str, params: &[SqlParam]) -> ConnectorResult<u64> {
        let boxed: Vec<BoxedParam> = params.iter().map(to_pg).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        Ok(self.runtime.block_on(self.client.execute(sql, &refs))?)
    }

    fn query(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        columns: &[FieldType],
    ) -> ConnectorResult<Vec<Vec<Value>>> {
        let boxed: Vec<BoxedParam> = params.iter().map(to_pg).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let rows = self.runtime.block_on(self.client.query(sql, &refs))?;

        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, field_type)| decode(row, i, *field_type))
                    .collect()
            })
            .collect()
    }

    fn execute_batch(&mut self, sql: &str) -> ConnectorResult<()> {
        self.batch(sql)
    }
}
