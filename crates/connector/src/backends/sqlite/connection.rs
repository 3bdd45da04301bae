//! Pooled SQLite connections.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{DatabaseName, params_from_iter};
use rusqlite::types::{Value as SqliteValue, ValueRef};
use tracing::warn;

use crate::engine::Connection;
use crate::entity::{FieldType, Value};
use crate::error::{BackendError, ConnectorResult};
use crate::sql::{Dialect, SqlParam};
use crate::target::{BackendKind, ConnectionTarget, SQLITE_MEMORY};
use crate::tenant::Namespace;

use super::SqliteDialect;

/// A connection checked out of a SQLite engine.
pub struct SqliteConnection {
    conn: PooledConnection<SqliteConnectionManager>,
    target: ConnectionTarget,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("target", &self.target.redacted())
            .finish()
    }
}

impl SqliteConnection {
    pub(crate) fn new(
        conn: PooledConnection<SqliteConnectionManager>,
        target: ConnectionTarget,
    ) -> Self {
        Self { conn, target }
    }

    /// File backing schema `schema` of this connection's database.
    fn attach_path(&self, schema: &str) -> String {
        if self.target.is_memory() {
            return SQLITE_MEMORY.to_string();
        }
        let main = self.target.sqlite_path();
        let stem = Path::new(self.target.database())
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.target.database().to_string());
        main.with_file_name(format!("{}.{}.db", stem, schema))
            .to_string_lossy()
            .into_owned()
    }

    fn is_attached(&self, schema: &str) -> rusqlite::Result<bool> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_database_list WHERE name = ?1",
            [schema],
            |row| row.get::<_, i64>(0).map(|n| n > 0),
        )
    }

    fn attach(&self, schema: &str) -> ConnectorResult<()> {
        let quoted = SqliteDialect.quote_ident(schema);
        self.conn.execute(
            &format!("ATTACH DATABASE ?1 AS {}", quoted),
            [self.attach_path(schema)],
        )?;

        // Reject unreadable files now, so a broken attachment never stays on
        // a pooled connection.
        let check = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}.sqlite_master", quoted),
            [],
            |row| row.get::<_, i64>(0),
        );
        if let Err(err) = check {
            if let Err(detach_err) = self
                .conn
                .execute(&format!("DETACH DATABASE {}", quoted), [])
            {
                warn!(schema, error = %detach_err, "Failed to detach unreadable schema");
            }
            return Err(err.into());
        }

        if !self.target.is_memory() {
            self.conn.pragma_update_and_check(
                Some(DatabaseName::Attached(schema)),
                "journal_mode",
                "WAL",
                |row| row.get::<_, String>(0),
            )?;
        }
        Ok(())
    }
}

fn timestamp_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn to_sqlite(param: &SqlParam) -> SqliteValue {
    match &param.value {
        Value::Null => SqliteValue::Null,
        Value::Boolean(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Integer(i) => SqliteValue::Integer(*i),
        Value::Real(r) => SqliteValue::Real(*r),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Blob(b) => SqliteValue::Blob(b.clone()),
        Value::Timestamp(ts) => SqliteValue::Text(timestamp_text(ts)),
        Value::Json(json) => SqliteValue::Text(json.to_string()),
    }
}

fn decode(value: ValueRef<'_>, field_type: FieldType, column: usize) -> ConnectorResult<Value> {
    let decode_error = |message: String| BackendError::Decode {
        backend: BackendKind::Sqlite,
        column: column.to_string(),
        message,
    };
    let text = |bytes: &[u8]| {
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| decode_error(e.to_string()))
    };

    let decoded = match (field_type, value) {
        (_, ValueRef::Null) => Value::Null,
        (FieldType::Integer, ValueRef::Integer(i)) => Value::Integer(i),
        (FieldType::Real, ValueRef::Real(r)) => Value::Real(r),
        (FieldType::Real, ValueRef::Integer(i)) => Value::Real(i as f64),
        (FieldType::Boolean, ValueRef::Integer(i)) => Value::Boolean(i != 0),
        (FieldType::Text, ValueRef::Text(t)) => Value::Text(text(t)?),
        (FieldType::Blob, ValueRef::Blob(b)) => Value::Blob(b.to_vec()),
        (FieldType::Timestamp, ValueRef::Text(t)) => {
            let parsed = DateTime::parse_from_rfc3339(&text(t)?)
                .map_err(|e| decode_error(e.to_string()))?;
            Value::Timestamp(parsed.with_timezone(&Utc))
        }
        (FieldType::Json, ValueRef::Text(t)) => Value::Json(
            serde_json::from_slice(t).map_err(|e| decode_error(e.to_string()))?,
        ),
        (field_type, other) => {
            return Err(decode_error(format!(
                "expected {}, found {}",
                field_type,
                other.data_type()
            ))
            .into());
        }
    };
    Ok(decoded)
}

impl Connection for SqliteConnection {
    fn bind_namespace(&mut self, namespace: &Namespace) -> ConnectorResult<()> {
        match namespace.schema() {
            Some(schema) if !self.is_attached(schema)? => self.attach(schema),
            _ => Ok(()),
        }
    }

    fn ensure_namespace(&mut self, _namespace: &Namespace) -> ConnectorResult<()> {
        // Attaching a schema creates its file.
        Ok(())
    }

    fn create_database_if_absent(&mut self, _database: &str) -> ConnectorResult<()> {
        // Opening a file database creates it.
        Ok(())
    }

    fn begin(&mut self) -> ConnectorResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> ConnectorResult<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> ConnectorResult<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn execute(&mut self, sql: &str, params: &[SqlParam]) -> ConnectorResult<u64> {
        let values: Vec<SqliteValue> = params.iter().map(to_sqlite).collect();
        let changed = self.conn.execute(sql, params_from_iter(values.iter()))?;
        Ok(changed as u64)
    }

    fn query(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        columns: &[FieldType],
    ) -> ConnectorResult<Vec<Vec<Value>>> {
        let values: Vec<SqliteValue> = params.iter().map(to_sqlite).collect();
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut decoded = Vec::with_capacity(columns.len());
            for (i, field_type) in columns.iter().enumerate() {
                decoded.push(decode(row.get_ref(i)?, *field_type, i)?);
            }
            result.push(decoded);
        }
        Ok(result)
    }

    fn execute_batch(&mut self, sql: &str) -> ConnectorResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        // Never hand a connection with an open transaction back to the pool.
        if !self.conn.is_autocommit() {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "Failed to roll back connection before release");
            }
        }
    }
}
