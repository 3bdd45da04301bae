//! Error types for the connector.
//!
//! Every public operation either succeeds or fails with exactly one
//! [`ConnectorError`]. The top-level enum groups failures by category, and
//! [`ConnectorError::kind`] flattens them onto the small taxonomy callers
//! usually branch on.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::target::BackendKind;

/// The primary error type for all connector operations.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Endpoint unreachable, authentication failure, no driver.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Tenant resolution and isolation errors.
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Malformed CRUD payloads and descriptors.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Resource state errors.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Session lifecycle errors.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Statement failures reported by the driver.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Aggregated provisioning failures.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Invalid connector configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Flat classification of a [`ConnectorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    UnknownTenant,
    UnknownField,
    NotFound,
    CrossTenantReference,
    NamespaceMismatch,
    InvalidPayload,
    Session,
    Backend,
    Provision,
    Config,
}

impl ConnectorError {
    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::Connection(_) => ErrorKind::Connection,
            ConnectorError::Tenant(TenantError::UnknownTenant { .. }) => ErrorKind::UnknownTenant,
            ConnectorError::Tenant(TenantError::InvalidTenantName { .. }) => {
                ErrorKind::UnknownTenant
            }
            ConnectorError::Tenant(TenantError::CrossTenantReference { .. }) => {
                ErrorKind::CrossTenantReference
            }
            ConnectorError::Tenant(TenantError::NamespaceMismatch { .. }) => {
                ErrorKind::NamespaceMismatch
            }
            ConnectorError::Validation(ValidationError::UnknownField { .. }) => {
                ErrorKind::UnknownField
            }
            ConnectorError::Validation(_) => ErrorKind::InvalidPayload,
            ConnectorError::Resource(ResourceError::NotFound { .. }) => ErrorKind::NotFound,
            ConnectorError::Session(_) => ErrorKind::Session,
            ConnectorError::Backend(_) => ErrorKind::Backend,
            ConnectorError::Provision(_) => ErrorKind::Provision,
            ConnectorError::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns `true` if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Errors establishing or using a physical endpoint.
///
/// Target strings are always redacted; credentials never appear here.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The endpoint could not be established.
    #[error("failed to connect to {target}: {message}")]
    Unreachable { target: String, message: String },

    /// No driver is registered for the backend.
    #[error("no driver available for backend {backend}")]
    DriverUnavailable { backend: BackendKind },

    /// No connection could be checked out of the engine's pool in time.
    #[error("connection pool for {target} exhausted: {message}")]
    PoolExhausted { target: String, message: String },

    /// The engine was disposed while still referenced.
    #[error("engine for {target} has been disposed")]
    Disposed { target: String },
}

/// Errors related to tenant resolution and isolation.
#[derive(Error, Debug)]
pub enum TenantError {
    /// The tenant is not part of the configured tenant set.
    #[error("unknown tenant: {tenant}")]
    UnknownTenant { tenant: String },

    /// The tenant name cannot be used as a namespace identifier.
    #[error("invalid tenant name '{tenant}': {reason}")]
    InvalidTenantName { tenant: String, reason: String },

    /// A relationship field points at a resource from another namespace.
    #[error(
        "cross-tenant reference not allowed: field '{field}' in {source_namespace} references a resource in {target_namespace}"
    )]
    CrossTenantReference {
        field: String,
        source_namespace: String,
        target_namespace: String,
    },

    /// A caller-supplied session is bound to a different namespace.
    #[error("session is bound to {session_namespace}, operation requested {requested}")]
    NamespaceMismatch {
        session_namespace: String,
        requested: String,
    },
}

/// Errors related to payload and descriptor validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The payload references an attribute the entity does not declare.
    #[error("unknown field '{field}' for entity {entity}")]
    UnknownField { entity: String, field: String },

    /// The value does not match the declared field type.
    #[error("field '{field}' of {entity} expects {expected}, got {found}")]
    TypeMismatch {
        entity: String,
        field: String,
        expected: String,
        found: String,
    },

    /// Null supplied for a non-nullable field.
    #[error("field '{field}' of {entity} is not nullable")]
    NullNotAllowed { entity: String, field: String },

    /// A non-nullable field was not supplied on create.
    #[error("missing required field '{field}' for entity {entity}")]
    MissingRequiredField { entity: String, field: String },

    /// The primary key is generated by the store and cannot be written.
    #[error("primary key '{field}' of {entity} is generated and cannot be set")]
    ImmutablePrimaryKey { entity: String, field: String },

    /// A reference was supplied for a field that cannot hold it.
    #[error("invalid reference in field '{field}' of {entity}: {message}")]
    InvalidReference {
        entity: String,
        field: String,
        message: String,
    },

    /// The entity descriptor itself is malformed.
    #[error("invalid descriptor for entity {entity}: {message}")]
    InvalidDescriptor { entity: String, message: String },

    /// A page was requested with an unsupported limit.
    #[error("limit {limit} out of bounds (1..={max})")]
    LimitOutOfBounds { limit: usize, max: usize },
}

/// Errors related to resource state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// No resource with the primary key exists in the namespace.
    #[error("resource not found: {entity}/{pk} in {namespace}")]
    NotFound {
        entity: String,
        namespace: String,
        pk: i64,
    },
}

/// Errors related to session state.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session already committed, rolled back or closed.
    #[error("session {session_id} is no longer active ({state})")]
    Inactive { session_id: String, state: String },
}

/// Errors originating from a driver while executing statements.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Statement execution failed.
    #[error("query failed on {backend}: {message}")]
    Query {
        backend: BackendKind,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A returned value could not be decoded into the declared field type.
    #[error("failed to decode column '{column}' on {backend}: {message}")]
    Decode {
        backend: BackendKind,
        column: String,
        message: String,
    },
}

/// One namespace that failed to provision.
#[derive(Debug)]
pub struct ProvisionFailure {
    /// Display form of the namespace.
    pub namespace: String,
    /// The error that stopped this namespace.
    pub error: Box<ConnectorError>,
}

impl fmt::Display for ProvisionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.namespace, self.error)
    }
}

/// All per-namespace failures of a provisioning run.
#[derive(Error, Debug)]
#[error("provisioning failed for {} namespace(s): {}", .failures.len(), summarize(.failures))]
pub struct ProvisionError {
    /// Namespaces that failed, in the order they were attempted.
    pub failures: Vec<ProvisionFailure>,
    /// Namespaces that were provisioned successfully.
    pub succeeded: Vec<String>,
}

fn summarize(failures: &[ProvisionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Invalid connector configuration.
#[derive(Error, Debug)]
#[error("invalid configuration: {}", .errors.join(", "))]
pub struct ConfigError {
    pub errors: Vec<String>,
}

/// Result type alias for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        BackendError::Query {
            backend: BackendKind::Sqlite,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for ConnectorError {
    fn from(err: rusqlite::Error) -> Self {
        ConnectorError::Backend(err.into())
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for BackendError {
    fn from(err: tokio_postgres::Error) -> Self {
        BackendError::Query {
            backend: BackendKind::Postgres,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for ConnectorError {
    fn from(err: tokio_postgres::Error) -> Self {
        ConnectorError::Backend(err.into())
    }
}
