//! SQLite backend.
//!
//! # Layout
//!
//! A target's `host` is the directory holding the database files and its
//! `database` is the file name (or `:memory:`).
//!
//! - The default namespace is the `main` database of the file.
//! - Schema tenants are attached databases. Tenant `s` of `dir/app.db` is the
//!   file `dir/app.s.db`, attached as `s` on first use by each pooled
//!   connection. On a memory engine the tenant is an attached `:memory:`
//!   database that lives as long as the engine.
//! - Database tenants are separate files in the same directory, each with its
//!   own engine.
//!
//! SQLite caps the number of attached databases per connection (10 in the
//! bundled build), which bounds the number of schema tenants a single
//! connection can serve.
//!
//! # Locking
//!
//! Every session starts with `BEGIN IMMEDIATE`, which takes the write lock of
//! `main` and of every database attached to the pooled connection. Writers on
//! one file engine are therefore serialized across all of its schema tenants:
//! a second session waits up to the busy timeout for the first to finish and
//! then fails with a backend error. Readers are not blocked (WAL). Database
//! tenancy gives each tenant its own file and engine, so sessions of
//! different tenants never wait on each other.
//!
//! # Memory Engines
//!
//! A memory engine pools exactly one connection, so its data survives between
//! sessions. Sessions on a memory engine are therefore serialized: opening a
//! second session while one is still open waits for the connection timeout
//! and then fails with [`ConnectionError::PoolExhausted`](crate::error::ConnectionError::PoolExhausted).

mod connection;
mod driver;

pub use connection::SqliteConnection;
pub use driver::SqliteDriver;

use crate::entity::FieldType;
use crate::sql::Dialect;
use crate::target::BackendKind;

/// SQL flavour of SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn default_schema(&self) -> Option<&str> {
        Some("main")
    }

    fn column_type(&self, field_type: FieldType) -> &'static str {
        match field_type {
            FieldType::Integer | FieldType::Boolean => "INTEGER",
            FieldType::Real => "REAL",
            FieldType::Text | FieldType::Timestamp | FieldType::Json => "TEXT",
            FieldType::Blob => "BLOB",
        }
    }

    fn primary_key_column(&self, name: &str) -> String {
        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.quote_ident(name))
    }

    fn qualify_references(&self) -> bool {
        // Foreign keys always resolve within the child table's database.
        false
    }
}
