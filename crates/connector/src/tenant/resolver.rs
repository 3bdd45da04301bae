//! Tenant name to namespace resolution.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::TenantError;
use crate::target::ConnectionTarget;

use super::{Namespace, TenancyMode, TenantSet};

/// Resolves tenant names against the configured allow-list.
///
/// Resolution never performs I/O. Clones share the same tenant set, so a
/// tenant added through one handle is visible to all of them.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    tenants: Arc<RwLock<TenantSet>>,
    mode: TenancyMode,
}

impl TenantResolver {
    /// Creates a resolver over `tenants`.
    pub fn new(tenants: TenantSet, mode: TenancyMode) -> Self {
        Self {
            tenants: Arc::new(RwLock::new(tenants)),
            mode,
        }
    }

    /// Returns the tenancy mode.
    pub fn mode(&self) -> TenancyMode {
        self.mode
    }

    /// Resolves `tenant` on `target`.
    ///
    /// `None` or an empty name selects the default namespace of `target`.
    /// Any other name must be in the tenant set, otherwise the call fails with
    /// [`TenantError::UnknownTenant`] instead of falling back to the default.
    /// A name that would share storage with the default namespace fails with
    /// [`TenantError::InvalidTenantName`].
    pub fn resolve(
        &self,
        target: &ConnectionTarget,
        tenant: Option<&str>,
    ) -> Result<Namespace, TenantError> {
        let tenant = match tenant {
            None | Some("") => return Ok(Namespace::default_for(target)),
            Some(tenant) => tenant,
        };

        if !self.tenants.read().contains(tenant) {
            return Err(TenantError::UnknownTenant {
                tenant: tenant.to_string(),
            });
        }

        Namespace::for_tenant(target, tenant, self.mode)
    }

    /// Resolves every configured tenant, or the default namespace when the
    /// tenant set is empty.
    pub fn namespaces(&self, target: &ConnectionTarget) -> Result<Vec<Namespace>, TenantError> {
        let tenants = self.tenants.read();
        if tenants.is_empty() {
            return Ok(vec![Namespace::default_for(target)]);
        }
        tenants
            .iter()
            .map(|tenant| Namespace::for_tenant(target, tenant, self.mode))
            .collect()
    }

    /// Checks that `name` can be a tenant on `target` without adding it.
    pub fn check_tenant(&self, target: &ConnectionTarget, name: &str) -> Result<(), TenantError> {
        Namespace::for_tenant(target, name, self.mode).map(|_| ())
    }

    /// Returns a snapshot of the tenant set.
    pub fn tenants(&self) -> TenantSet {
        self.tenants.read().clone()
    }

    /// Adds a tenant that will be resolved on `target`. Returns `false` if it
    /// was already present.
    pub fn add_tenant(&self, target: &ConnectionTarget, name: &str) -> Result<bool, TenantError> {
        self.check_tenant(target, name)?;
        self.tenants.write().insert(name)
    }

    /// Removes a tenant. Returns `false` if it was not present.
    ///
    /// Existing data of the tenant is left untouched.
    pub fn remove_tenant(&self, name: &str) -> bool {
        self.tenants.write().remove(name)
    }
}
