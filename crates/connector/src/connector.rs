//! The connector: an explicit context value tying the registry, the tenant
//! resolver and the base target together.

use std::sync::Arc;

use tracing::info;

use crate::config::ConnectorConfig;
use crate::engine::{Driver, EngineOptions, EngineRegistry};
use crate::error::{ConfigError, ConnectorError, ConnectorResult, TenantError};
use crate::manager::ResourceManager;
use crate::provision::SchemaProvisioner;
use crate::session::{Session, SessionScope};
use crate::target::ConnectionTarget;
use crate::tenant::{Namespace, TenancyMode, TenantResolver, TenantSet};

/// Entry point of the crate.
///
/// A `Connector` is `Send + Sync`; share it by reference or in an `Arc`.
/// There is no global instance: every operation goes through a connector
/// value.
#[derive(Debug)]
pub struct Connector {
    target: ConnectionTarget,
    resolver: TenantResolver,
    registry: Arc<EngineRegistry>,
}

impl Connector {
    /// Creates a connector from configuration.
    ///
    /// Fails with [`ConfigError`] if the configuration does not validate, and
    /// with [`TenantError::InvalidTenantName`] if a tenant would share storage
    /// with the default namespace. No connection is opened until first use.
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        config.validate().map_err(|errors| ConfigError { errors })?;
        let tenants = TenantSet::from_names(&config.tenants)?;

        let connector = Self::builder(config.target())
            .tenants(tenants)
            .tenancy(config.tenancy)
            .engine_options(config.engine_options())
            .build();
        connector.resolver.namespaces(&connector.target)?;
        info!(
            target = %connector.target.redacted(),
            tenants = connector.tenants().len(),
            tenancy = %connector.tenancy(),
            "Created connector"
        );
        Ok(connector)
    }

    /// Starts a connector for an explicit target.
    pub fn builder(target: ConnectionTarget) -> ConnectorBuilder {
        ConnectorBuilder {
            target,
            tenants: TenantSet::new(),
            tenancy: TenancyMode::default(),
            options: EngineOptions::default(),
            registry: None,
            drivers: Vec::new(),
        }
    }

    /// The base target.
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// The tenancy mode.
    pub fn tenancy(&self) -> TenancyMode {
        self.resolver.mode()
    }

    /// A snapshot of the configured tenants.
    pub fn tenants(&self) -> TenantSet {
        self.resolver.tenants()
    }

    /// Adds a tenant to the allow-list. Returns `false` if already present.
    ///
    /// The tenant's objects are not created; run the provisioner.
    pub fn add_tenant(&self, name: &str) -> Result<bool, TenantError> {
        self.resolver.add_tenant(&self.target, name)
    }

    /// Removes a tenant from the allow-list. Its data is left untouched.
    pub fn remove_tenant(&self, name: &str) -> bool {
        self.resolver.remove_tenant(name)
    }

    /// The engine registry.
    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    /// The tenant resolver.
    pub fn resolver(&self) -> &TenantResolver {
        &self.resolver
    }

    /// Resolves `tenant` against the base target without any I/O.
    pub fn resolve(&self, tenant: Option<&str>) -> ConnectorResult<Namespace> {
        Ok(self.resolver.resolve(&self.target, tenant)?)
    }

    pub(crate) fn open_scope(&self, namespace: &Namespace) -> ConnectorResult<SessionScope> {
        let engine = self.registry.get_engine(namespace.target())?;
        SessionScope::open(engine, namespace.clone())
    }

    /// Opens a session scope bound to `tenant`.
    ///
    /// Dropping the scope without [`commit`](SessionScope::commit) rolls
    /// back. Do not open a second scope for the same tenant while holding
    /// one; pass the held session to operations instead.
    pub fn session_scope(&self, tenant: Option<&str>) -> ConnectorResult<SessionScope> {
        let namespace = self.resolve(tenant)?;
        self.open_scope(&namespace)
    }

    /// Runs `f` in a new session bound to `tenant`, committing on `Ok` and
    /// rolling back on `Err`. The error from `f` is returned unchanged.
    pub fn with_scope<T, E, F>(&self, tenant: Option<&str>, f: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E>,
        E: From<ConnectorError>,
    {
        self.session_scope(tenant)?.run(f)
    }

    /// Runs raw SQL in a private session bound to `tenant`.
    ///
    /// Names are not rewritten; qualify them yourself.
    pub fn execute(&self, sql: &str, tenant: Option<&str>) -> ConnectorResult<()> {
        self.with_scope(tenant, |session| session.execute_batch(sql))
    }

    /// CRUD operations.
    pub fn resources(&self) -> ResourceManager<'_> {
        ResourceManager::new(self)
    }

    /// Namespace and table provisioning.
    pub fn provisioner(&self) -> SchemaProvisioner<'_> {
        SchemaProvisioner::new(self)
    }

    /// Disposes every engine. Engines are recreated lazily on next use.
    pub fn dispose(&self) -> usize {
        self.registry.dispose_all()
    }
}

/// Builder for [`Connector`].
pub struct ConnectorBuilder {
    target: ConnectionTarget,
    tenants: TenantSet,
    tenancy: TenancyMode,
    options: EngineOptions,
    registry: Option<Arc<EngineRegistry>>,
    drivers: Vec<Arc<dyn Driver>>,
}

impl ConnectorBuilder {
    /// Sets the initial tenant set.
    pub fn tenants(mut self, tenants: TenantSet) -> Self {
        self.tenants = tenants;
        self
    }

    /// Sets the tenancy mode.
    pub fn tenancy(mut self, tenancy: TenancyMode) -> Self {
        self.tenancy = tenancy;
        self
    }

    /// Sets pool options for new engines.
    pub fn engine_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Shares an existing registry instead of creating one.
    ///
    /// The registry's own engine options apply.
    pub fn registry(mut self, registry: Arc<EngineRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Registers an additional driver.
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.drivers.push(driver);
        self
    }

    /// Builds the connector.
    pub fn build(self) -> Connector {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(EngineRegistry::new(self.options)));
        for driver in self.drivers {
            registry.register_driver(driver);
        }
        Connector {
            target: self.target,
            resolver: TenantResolver::new(self.tenants, self.tenancy),
            registry,
        }
    }
}

impl std::fmt::Debug for ConnectorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorBuilder")
            .field("target", &self.target.redacted())
            .field("tenants", &self.tenants)
            .field("tenancy", &self.tenancy)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
