//! The driver seam.
//!
//! A [`Driver`] turns a [`ConnectionTarget`] into a [`ConnectionPool`]; the
//! pool hands out [`Connection`]s. Everything above this seam (sessions,
//! provisioning, CRUD) is written once against these traits.

use std::sync::Arc;
use std::time::Duration;

use crate::entity::{FieldType, Value};
use crate::error::{ConnectionError, ConnectorResult};
use crate::sql::{Dialect, SqlParam};
use crate::target::{BackendKind, ConnectionTarget};
use crate::tenant::Namespace;

/// Pool settings handed to drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maximum pooled connections for file and server engines.
    pub max_connections: u32,
    /// How long to wait for a connection.
    pub connection_timeout: Duration,
    /// SQLite busy timeout.
    pub busy_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connection_timeout: Duration::from_millis(30_000),
            busy_timeout: Duration::from_millis(5_000),
        }
    }
}

/// Creates connection pools for one backend kind.
pub trait Driver: Send + Sync {
    /// Backend served by this driver.
    fn backend(&self) -> BackendKind;

    /// Establishes a pool for `target`.
    ///
    /// Implementations must verify the endpoint is reachable before returning
    /// and must not retry.
    fn connect(
        &self,
        target: &ConnectionTarget,
        options: &EngineOptions,
    ) -> Result<Box<dyn ConnectionPool>, ConnectionError>;
}

/// A pool of live connections to one endpoint.
pub trait ConnectionPool: Send + Sync {
    /// SQL dialect of the pooled connections.
    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Checks out a connection.
    fn acquire(&self) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// One checked-out connection.
///
/// Dropping a connection returns it to its pool; callers must end any open
/// transaction first.
pub trait Connection: Send {
    /// Makes the objects of `namespace` addressable on this connection.
    ///
    /// Called before `begin`.
    fn bind_namespace(&mut self, namespace: &Namespace) -> ConnectorResult<()>;

    /// Creates the namespace container if it does not exist.
    fn ensure_namespace(&mut self, namespace: &Namespace) -> ConnectorResult<()>;

    /// Creates `database` on this endpoint if it does not exist.
    ///
    /// Must be called outside a transaction.
    fn create_database_if_absent(&mut self, database: &str) -> ConnectorResult<()>;

    /// Starts a transaction.
    fn begin(&mut self) -> ConnectorResult<()>;

    /// Commits the open transaction.
    fn commit(&mut self) -> ConnectorResult<()>;

    /// Rolls back the open transaction.
    fn rollback(&mut self) -> ConnectorResult<()>;

    /// Executes a statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlParam]) -> ConnectorResult<u64>;

    /// Runs a query, decoding each column with the given type.
    fn query(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        columns: &[FieldType],
    ) -> ConnectorResult<Vec<Vec<Value>>>;

    /// Executes one or more raw statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> ConnectorResult<()>;
}
