//! PostgreSQL backend.
//!
//! Connections are pooled with deadpool-postgres and driven by a small
//! multi-threaded tokio runtime owned by each engine, so the connector API
//! stays synchronous. Do not call into a PostgreSQL engine from inside an
//! async runtime; the blocking calls would panic.
//!
//! - The default namespace is the `public` schema.
//! - Schema tenants are PostgreSQL schemas, created with
//!   `CREATE SCHEMA IF NOT EXISTS` during provisioning.
//! - Database tenants are databases on the same server, created during
//!   provisioning if they do not exist yet.

mod connection;
mod driver;

pub use connection::PostgresConnection;
pub use driver::PostgresDriver;

use crate::entity::FieldType;
use crate::sql::Dialect;
use crate::target::BackendKind;

/// SQL flavour of PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn default_schema(&self) -> Option<&str> {
        Some("public")
    }

    fn column_type(&self, field_type: FieldType) -> &'static str {
        match field_type {
            FieldType::Integer => "BIGINT",
            FieldType::Real => "DOUBLE PRECISION",
            FieldType::Text => "TEXT",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Blob => "BYTEA",
            FieldType::Timestamp => "TIMESTAMPTZ",
            FieldType::Json => "JSONB",
        }
    }

    fn primary_key_column(&self, name: &str) -> String {
        format!(
            "{} BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY",
            self.quote_ident(name)
        )
    }

    fn qualify_references(&self) -> bool {
        true
    }
}
