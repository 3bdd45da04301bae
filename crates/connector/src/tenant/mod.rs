//! Tenants and namespaces.
//!
//! A tenant is a logical partition of one physical endpoint. Depending on the
//! [`TenancyMode`], a tenant is either a schema inside the configured database
//! or a separate database on the same server. Either way it resolves to a
//! [`Namespace`], which is the only thing sessions and statements ever see.
//!
//! # Examples
//!
//! ```
//! use helios_connector::target::ConnectionTarget;
//! use helios_connector::tenant::{TenancyMode, TenantResolver, TenantSet};
//!
//! let target = ConnectionTarget::sqlite("/var/data", "app.db");
//! let tenants = TenantSet::from_names(["schema1", "schema2"]).unwrap();
//! let resolver = TenantResolver::new(tenants, TenancyMode::Schema);
//!
//! let ns = resolver.resolve(&target, Some("schema1")).unwrap();
//! assert_eq!(ns.schema(), Some("schema1"));
//! assert_eq!(ns.target(), &target);
//!
//! assert!(resolver.resolve(&target, Some("schema3")).is_err());
//! ```

mod resolver;

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TenantError;
use crate::target::{BackendKind, ConnectionTarget};

pub use resolver::TenantResolver;

/// Maximum length of a tenant or table identifier (PostgreSQL limit).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

fn identifier_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).expect("identifier pattern is valid"))
}

/// Checks that `name` can be used as an unquoted SQL identifier.
pub(crate) fn check_identifier(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("must not be empty".to_string());
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(format!(
            "exceeds maximum length of {} characters",
            MAX_IDENTIFIER_LENGTH
        ));
    }
    if !identifier_regex().is_match(name) {
        return Err(format!("must match {}", IDENTIFIER_PATTERN));
    }
    Ok(())
}

/// Returns `true` if `name` already has a meaning on `backend` under `mode`,
/// so a tenant of that name would share storage with something else.
///
/// SQLite schema names are case-insensitive; the comparison is too.
fn is_reserved(backend: BackendKind, mode: TenancyMode, name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    match (backend, mode) {
        (BackendKind::Sqlite, TenancyMode::Schema) => matches!(name.as_str(), "main" | "temp"),
        (BackendKind::Sqlite, TenancyMode::Database) => false,
        (BackendKind::Postgres, TenancyMode::Schema) => {
            name == "public" || name == "information_schema" || name.starts_with("pg_")
        }
        (BackendKind::Postgres, TenancyMode::Database) => {
            matches!(name.as_str(), "template0" | "template1")
        }
        (BackendKind::Mysql, _) => matches!(
            name.as_str(),
            "information_schema" | "mysql" | "performance_schema" | "sys"
        ),
    }
}

/// How tenants map onto physical storage.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TenancyMode {
    /// Each tenant is a schema in the configured database.
    #[default]
    Schema,
    /// Each tenant is a separate database on the configured endpoint.
    Database,
}

impl fmt::Display for TenancyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenancyMode::Schema => write!(f, "schema"),
            TenancyMode::Database => write!(f, "database"),
        }
    }
}

/// Ordered allow-list of tenant names.
///
/// Names are unique and validated on insertion. An empty set means only the
/// default namespace is available.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSet {
    names: Vec<String>,
}

impl TenantSet {
    /// Creates an empty tenant set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from names, keeping the first occurrence of duplicates.
    pub fn from_names<I, S>(names: I) -> Result<Self, TenantError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for name in names {
            set.insert(name)?;
        }
        Ok(set)
    }

    /// Adds a tenant. Returns `false` if it was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> Result<bool, TenantError> {
        let name = name.into();
        check_identifier(&name).map_err(|reason| TenantError::InvalidTenantName {
            tenant: name.clone(),
            reason,
        })?;
        if self.contains(&name) {
            return Ok(false);
        }
        self.names.push(name);
        Ok(true)
    }

    /// Removes a tenant. Returns `false` if it was not present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.names.len();
        self.names.retain(|n| n != name);
        self.names.len() != before
    }

    /// Returns `true` if the tenant is in the set.
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Returns the tenant names in insertion order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Iterates over tenant names.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Number of tenants.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if no tenants are configured.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The resolved object-qualification context of a session.
///
/// Two namespaces are equal only if they use the same physical engine and the
/// same schema, so equality is the isolation boundary between tenants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    target: ConnectionTarget,
    schema: Option<String>,
    tenant: Option<String>,
}

impl Namespace {
    /// The default (unqualified) namespace of `target`.
    pub fn default_for(target: &ConnectionTarget) -> Self {
        Self {
            target: target.clone(),
            schema: None,
            tenant: None,
        }
    }

    /// A tenant schema inside `target`.
    pub(crate) fn for_schema(target: &ConnectionTarget, tenant: &str) -> Self {
        Self {
            target: target.clone(),
            schema: Some(tenant.to_string()),
            tenant: Some(tenant.to_string()),
        }
    }

    /// The namespace of `tenant` on `target` under `mode`.
    ///
    /// Fails with [`TenantError::InvalidTenantName`] if the tenant would land
    /// on storage it does not own: a reserved schema or database name, or in
    /// database mode the base database itself.
    pub(crate) fn for_tenant(
        target: &ConnectionTarget,
        tenant: &str,
        mode: TenancyMode,
    ) -> Result<Self, TenantError> {
        let invalid = |reason: String| TenantError::InvalidTenantName {
            tenant: tenant.to_string(),
            reason,
        };
        check_identifier(tenant).map_err(invalid)?;
        if is_reserved(target.backend(), mode, tenant) {
            return Err(invalid(format!(
                "reserved {} name on {}",
                mode,
                target.backend()
            )));
        }

        let namespace = match mode {
            TenancyMode::Schema => Self::for_schema(target, tenant),
            TenancyMode::Database => Self::for_database(target, tenant),
        };
        if namespace.target == *target && namespace.schema.is_none() {
            return Err(invalid("resolves to the base database".to_string()));
        }
        Ok(namespace)
    }

    /// A tenant database on the endpoint of `target`.
    pub(crate) fn for_database(target: &ConnectionTarget, tenant: &str) -> Self {
        let tenant_target = if target.is_memory() {
            ConnectionTarget::sqlite_memory(format!("{}/{}", target.host(), tenant))
        } else {
            target.with_database(tenant)
        };
        Self {
            target: tenant_target,
            schema: None,
            tenant: Some(tenant.to_string()),
        }
    }

    /// The physical engine this namespace lives on.
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// The schema qualifying object names, if any.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// The tenant this namespace was resolved from.
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Returns `true` for the default namespace.
    pub fn is_default(&self) -> bool {
        self.tenant.is_none()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tenant {
            Some(tenant) => f.write_str(tenant),
            None => f.write_str("default"),
        }
    }
}
