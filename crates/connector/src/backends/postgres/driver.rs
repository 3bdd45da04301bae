//! PostgreSQL driver and pool.

use std::sync::Arc;

use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use tracing::debug;

use crate::engine::{Connection, ConnectionPool, Driver, EngineOptions};
use crate::error::ConnectionError;
use crate::sql::Dialect;
use crate::target::{BackendKind, ConnectionTarget};

use super::{PostgresConnection, PostgresDialect};

/// Driver for [`BackendKind::Postgres`] targets.
#[derive(Debug, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    /// Creates the driver.
    pub fn new() -> Self {
        Self
    }
}

impl Driver for PostgresDriver {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn connect(
        &self,
        target: &ConnectionTarget,
        options: &EngineOptions,
    ) -> Result<Box<dyn ConnectionPool>, ConnectionError> {
        let unreachable = |message: String| ConnectionError::Unreachable {
            target: target.redacted(),
            message,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("connector-postgres")
            .enable_all()
            .build()
            .map_err(|e| unreachable(format!("failed to start runtime: {}", e)))?;

        let mut cfg = Config::new();
        cfg.host = Some(target.host().to_string());
        cfg.port = target.port();
        cfg.dbname = Some(target.database().to_string());
        if let Some(credentials) = target.credentials() {
            cfg.user = Some(credentials.user().to_string());
            cfg.password = Some(credentials.password().to_string());
        }
        cfg.connect_timeout = Some(options.connection_timeout);

        let pool = cfg
            .builder(NoTls)
            .map_err(|e| unreachable(e.to_string()))?
            .max_size(options.max_connections as usize)
            .wait_timeout(Some(options.connection_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| unreachable(e.to_string()))?;

        // Fail fast on bad credentials or an unreachable server.
        runtime
            .block_on(pool.get())
            .map_err(|e| unreachable(e.to_string()))?;

        debug!(target = %target.redacted(), "Opened PostgreSQL pool");

        Ok(Box::new(PostgresPool {
            pool,
            runtime: Arc::new(runtime),
            target: target.clone(),
            dialect: Arc::new(PostgresDialect),
        }))
    }
}

struct PostgresPool {
    pool: Pool,
    runtime: Arc<tokio::runtime::Runtime>,
    target: ConnectionTarget,
    dialect: Arc<PostgresDialect>,
}

impl ConnectionPool for PostgresPool {
    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    fn acquire(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        let client = self
            .runtime
            .block_on(self.pool.get())
            .map_err(|e| ConnectionError::PoolExhausted {
                target: self.target.redacted(),
                message: e.to_string(),
            })?;
        Ok(Box::new(PostgresConnection::new(
            client,
            self.runtime.clone(),
        )))
    }
}
