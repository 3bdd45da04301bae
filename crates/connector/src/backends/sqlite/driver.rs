//! SQLite driver and pool.

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::debug;

use crate::engine::{Connection, ConnectionPool, Driver, EngineOptions};
use crate::error::ConnectionError;
use crate::sql::Dialect;
use crate::target::{BackendKind, ConnectionTarget};

use super::{SqliteConnection, SqliteDialect};

/// Driver for [`BackendKind::Sqlite`] targets.
#[derive(Debug, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    /// Creates the driver.
    pub fn new() -> Self {
        Self
    }
}

impl Driver for SqliteDriver {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn connect(
        &self,
        target: &ConnectionTarget,
        options: &EngineOptions,
    ) -> Result<Box<dyn ConnectionPool>, ConnectionError> {
        let is_memory = target.is_memory();
        let manager = if is_memory {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(target.sqlite_path())
        };

        let busy_timeout = options.busy_timeout;
        let manager = manager.with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "foreign_keys", true)?;
            if !is_memory {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })?;
            }
            Ok(())
        });

        let builder = Pool::builder()
            .connection_timeout(options.connection_timeout)
            .min_idle(Some(1));
        let builder = if is_memory {
            // The single connection owns the database; it must never be reaped.
            builder.max_size(1).idle_timeout(None).max_lifetime(None)
        } else {
            builder.max_size(options.max_connections)
        };

        // Blocks until the first connection is open, so an unreachable
        // database fails here rather than on first use.
        let pool = builder
            .build(manager)
            .map_err(|e| ConnectionError::Unreachable {
                target: target.redacted(),
                message: e.to_string(),
            })?;

        debug!(target = %target.redacted(), is_memory, "Opened SQLite pool");

        Ok(Box::new(SqlitePool {
            pool,
            target: target.clone(),
            dialect: Arc::new(SqliteDialect),
        }))
    }
}

struct SqlitePool {
    pool: Pool<SqliteConnectionManager>,
    target: ConnectionTarget,
    dialect: Arc<SqliteDialect>,
}

impl ConnectionPool for SqlitePool {
    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    fn acquire(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        let conn = self.pool.get().map_err(|e| ConnectionError::PoolExhausted {
            target: self.target.redacted(),
            message: e.to_string(),
        })?;
        Ok(Box::new(SqliteConnection::new(conn, self.target.clone())))
    }
}
