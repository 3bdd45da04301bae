//! Connector configuration.
//!
//! Supports programmatic construction, command line arguments and environment
//! variable overrides.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CONNECTOR_DB_TYPE` | sqlite | Backend: sqlite, postgresql, mysql |
//! | `CONNECTOR_DB_HOST` | . | Host name, or directory for sqlite |
//! | `CONNECTOR_DB_PORT` | | Server port |
//! | `CONNECTOR_DB_NAME` | app.db | Database (file) name |
//! | `CONNECTOR_DB_USER` | | Login user |
//! | `CONNECTOR_DB_PASSWORD` | | Login password |
//! | `CONNECTOR_TENANTS` | | Comma-separated tenant names |
//! | `CONNECTOR_TENANCY` | schema | Tenancy mode: schema or database |
//! | `CONNECTOR_MAX_CONNECTIONS` | 10 | Pool size |
//! | `CONNECTOR_CONNECTION_TIMEOUT_MS` | 30000 | Connection checkout timeout |
//! | `CONNECTOR_BUSY_TIMEOUT_MS` | 5000 | SQLite busy timeout |
//!
//! # Example
//!
//! ```rust
//! use helios_connector::ConnectorConfig;
//! use helios_connector::target::BackendKind;
//!
//! let config = ConnectorConfig {
//!     backend: BackendKind::Postgres,
//!     host: "localhost".to_string(),
//!     port: Some(5432),
//!     database: "app".to_string(),
//!     user: Some("app".to_string()),
//!     password: Some("secret".to_string()),
//!     tenants: vec!["schema1".to_string(), "schema2".to_string()],
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::fmt;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::engine::EngineOptions;
use crate::target::{BackendKind, ConnectionTarget, Credentials};
use crate::tenant::{TenancyMode, check_identifier};

/// Configuration of a [`Connector`](crate::Connector).
#[derive(Clone, Parser, Serialize, Deserialize)]
#[command(name = "connector")]
#[command(about = "Multi-tenant database connector")]
pub struct ConnectorConfig {
    /// Database backend.
    #[arg(long, env = "CONNECTOR_DB_TYPE", value_enum, default_value = "sqlite")]
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Host name, or the directory holding database files for sqlite.
    #[arg(long, env = "CONNECTOR_DB_HOST", default_value = ".")]
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port.
    #[arg(long, env = "CONNECTOR_DB_PORT")]
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name (file name for sqlite, or `:memory:`).
    #[arg(long, env = "CONNECTOR_DB_NAME", default_value = "app.db")]
    #[serde(default = "default_database")]
    pub database: String,

    /// Login user.
    #[arg(long, env = "CONNECTOR_DB_USER")]
    #[serde(default)]
    pub user: Option<String>,

    /// Login password.
    #[arg(long, env = "CONNECTOR_DB_PASSWORD", hide_env_values = true)]
    #[serde(default)]
    pub password: Option<String>,

    /// Initial tenant set (comma-separated).
    #[arg(long, env = "CONNECTOR_TENANTS", value_delimiter = ',')]
    #[serde(default)]
    pub tenants: Vec<String>,

    /// Tenancy mode.
    #[arg(long, env = "CONNECTOR_TENANCY", value_enum, default_value = "schema")]
    #[serde(default)]
    pub tenancy: TenancyMode,

    /// Maximum pooled connections per engine.
    #[arg(long, env = "CONNECTOR_MAX_CONNECTIONS", default_value = "10")]
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection checkout timeout in milliseconds.
    #[arg(long, env = "CONNECTOR_CONNECTION_TIMEOUT_MS", default_value = "30000")]
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[arg(long, env = "CONNECTOR_BUSY_TIMEOUT_MS", default_value = "5000")]
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_backend() -> BackendKind {
    BackendKind::Sqlite
}

fn default_host() -> String {
    ".".to_string()
}

fn default_database() -> String {
    "app.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            host: default_host(),
            port: None,
            database: default_database(),
            user: None,
            password: None,
            tenants: Vec::new(),
            tenancy: TenancyMode::default(),
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("tenants", &self.tenants)
            .field("tenancy", &self.tenancy)
            .field("max_connections", &self.max_connections)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .finish()
    }
}

impl ConnectorConfig {
    /// Creates a configuration from environment variables only.
    ///
    /// Command line arguments of the host process are ignored.
    pub fn from_env() -> Self {
        Self::try_parse_from(["connector"]).unwrap_or_default()
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.is_empty() {
            errors.push("Database name cannot be empty".to_string());
        }

        if self.backend.requires_credentials() {
            let missing = |v: &Option<String>| v.as_deref().is_none_or(str::is_empty);
            if missing(&self.user) || missing(&self.password) {
                errors.push(format!(
                    "Backend {} requires both user and password",
                    self.backend
                ));
            }
        }

        for tenant in &self.tenants {
            if let Err(reason) = check_identifier(tenant) {
                errors.push(format!("Invalid tenant name '{}': {}", tenant, reason));
            }
        }

        if self.max_connections == 0 {
            errors.push("Max connections cannot be 0".to_string());
        }

        if self.connection_timeout_ms == 0 {
            errors.push("Connection timeout cannot be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// The base connection target described by this configuration.
    pub fn target(&self) -> ConnectionTarget {
        let mut target = ConnectionTarget::new(self.backend, &self.host, &self.database);
        if let Some(port) = self.port {
            target = target.with_port(port);
        }
        if let Some(user) = &self.user {
            target = target.with_credentials(Credentials::new(
                user,
                self.password.clone().unwrap_or_default(),
            ));
        }
        target
    }

    /// Pool options for engines.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_connections: self.max_connections,
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    /// Creates a configuration suitable for testing.
    ///
    /// Uses a private in-memory SQLite database and short timeouts.
    pub fn for_testing() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            host: format!("test-{}", uuid::Uuid::new_v4()),
            database: crate::target::SQLITE_MEMORY.to_string(),
            connection_timeout_ms: 2000,
            busy_timeout_ms: 1000,
            ..Default::default()
        }
    }
}
