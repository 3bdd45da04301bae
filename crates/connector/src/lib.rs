//! Helios Connector
//!
//! A tenant-aware data-access layer. One physical database endpoint is
//! partitioned into logical tenants (schemas inside one database, or separate
//! databases on one server) behind a single API for table provisioning, CRUD
//! and transactional scoping.
//!
//! # Features
//!
//! - **Engine registry**: one lazily created, cached connection pool per
//!   target, created exactly once even under concurrent first use
//! - **Tenant resolution**: tenant names are checked against an allow-list;
//!   a typo never falls back to the default namespace
//! - **Session scopes**: commit on success, roll back on error, drop or panic,
//!   always release the connection
//! - **Provisioning**: idempotent creation of namespaces and tables for every
//!   tenant, with per-tenant failures collected
//! - **CRUD**: validated payloads, cross-tenant reference checks, lazy
//!   restartable listings with pagination
//!
//! # Backend Features
//!
//! - `sqlite` (default) - SQLite with in-memory and file modes, tenants as
//!   attached databases
//! - `postgres` - PostgreSQL, tenants as schemas or databases
//!
//! MySQL targets are recognised, but no driver is built in; register one with
//! [`EngineRegistry::register_driver`].
//!
//! # Architecture
//!
//! - [`target`] - Backend kinds, credentials and connection targets
//! - [`tenant`] - Tenant sets, namespaces and the resolver
//! - [`engine`] - Engines, the registry and the driver seam
//! - [`session`] - Sessions and session scopes
//! - [`entity`] - Entity descriptors, values and resources
//! - [`provision`] - Namespace and table provisioning
//! - [`manager`] - The CRUD façade
//! - [`sql`] - Dialects and statement building
//! - [`config`] - Configuration from flags and environment
//! - [`error`] - Error types for all operations
//! - [`backends`] - Built-in drivers
//!
//! # Quick Start
//!
//! ```
//! use helios_connector::entity::{EntityDescriptor, FieldDescriptor, FieldType};
//! use helios_connector::{Binding, Connector, ConnectorConfig, Fields, Filters};
//!
//! let mut config = ConnectorConfig::for_testing();
//! config.tenants = vec!["schema1".to_string(), "schema2".to_string()];
//! let connector = Connector::new(config)?;
//!
//! let user = EntityDescriptor::builder("User", "users")
//!     .field(FieldDescriptor::new("username", FieldType::Text))
//!     .build()?;
//! connector.provisioner().provision_all(std::slice::from_ref(&user))?;
//!
//! let resources = connector.resources();
//! let pk = resources.create(&user, &Fields::new().set("username", "a"), Binding::tenant("schema1"))?;
//! assert_eq!(pk, 1);
//!
//! let other = resources.list(&user, &Filters::new(), Binding::tenant("schema2"))?;
//! assert!(other.fetch()?.is_empty());
//! # Ok::<(), helios_connector::ConnectorError>(())
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod connector;
pub mod engine;
pub mod entity;
pub mod error;
pub mod manager;
pub mod provision;
pub mod session;
pub mod sql;
pub mod target;
pub mod tenant;

// Re-export commonly used types at crate root
pub use config::ConnectorConfig;
pub use connector::{Connector, ConnectorBuilder};
pub use engine::{Engine, EngineOptions, EngineRegistry};
pub use entity::{EntityDescriptor, Fields, Filters, Resource, ResourceRef, Value};
pub use error::{ConnectorError, ConnectorResult, ErrorKind};
pub use manager::{Binding, Listing, Page, ResourceManager};
pub use provision::{ProvisionReport, SchemaProvisioner};
pub use session::{Session, SessionScope, SessionState};
pub use target::{BackendKind, ConnectionTarget, Credentials};
pub use tenant::{Namespace, TenancyMode, TenantResolver, TenantSet};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
