//! The CRUD façade.
//!
//! Every [`ResourceManager`] operation takes a [`Binding`] that says where it
//! runs:
//!
//! - no session: one private [`SessionScope`](crate::SessionScope) is opened
//!   for the operation and committed or rolled back before it returns;
//! - a caller-owned [`Session`]: the operation joins it, and the caller owns
//!   commit and rollback. If a tenant is given too, it must resolve to the
//!   session's namespace, otherwise the call fails with
//!   [`TenantError::NamespaceMismatch`] before anything is executed.
//!
//! # Examples
//!
//! ```no_run
//! use helios_connector::{Binding, Connector, ConnectorConfig, Fields, Filters};
//! use helios_connector::entity::{EntityDescriptor, FieldDescriptor, FieldType};
//!
//! let connector = Connector::new(ConnectorConfig::for_testing())?;
//! let user = EntityDescriptor::builder("User", "users")
//!     .field(FieldDescriptor::new("username", FieldType::Text))
//!     .build()?;
//! connector.provisioner().provision_all(std::slice::from_ref(&user))?;
//!
//! let resources = connector.resources();
//! let pk = resources.create(&user, &Fields::new().set("username", "a"), Binding::default())?;
//! let found = resources.get(&user, pk, Binding::default())?;
//! assert!(found.is_some());
//!
//! let listing = resources.list(&user, &Filters::new().eq("username", "a"), Binding::default())?;
//! assert_eq!(listing.count()?, 1);
//! # Ok::<(), helios_connector::ConnectorError>(())
//! ```

use tracing::debug;

use crate::connector::Connector;
use crate::entity::{EntityDescriptor, FieldType, Fields, Filters, Resource, Value};
use crate::error::{BackendError, ConnectorResult, ResourceError, TenantError, ValidationError};
use crate::session::Session;
use crate::sql::{SqlBuilder, SqlParam};

/// Largest page [`Listing::page`] will return.
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Where a CRUD operation runs: an optional caller-owned session and an
/// optional tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct Binding<'a> {
    session: Option<&'a Session>,
    tenant: Option<&'a str>,
}

impl<'a> Binding<'a> {
    /// A private session in `tenant`.
    pub fn tenant(tenant: &'a str) -> Self {
        Self {
            session: None,
            tenant: Some(tenant),
        }
    }

    /// Joins a caller-owned session.
    pub fn session(session: &'a Session) -> Self {
        Self {
            session: Some(session),
            tenant: None,
        }
    }

    /// Adds a tenant, checked against the session's namespace if there is one.
    pub fn with_tenant(mut self, tenant: &'a str) -> Self {
        self.tenant = Some(tenant);
        self
    }
}

fn not_found(descriptor: &EntityDescriptor, session: &Session, pk: i64) -> ResourceError {
    ResourceError::NotFound {
        entity: descriptor.name().to_string(),
        namespace: session.namespace().to_string(),
        pk,
    }
}

fn pk_param(pk: i64) -> SqlParam {
    SqlParam::new(Value::Integer(pk), FieldType::Integer)
}

fn column_types(descriptor: &EntityDescriptor) -> Vec<FieldType> {
    descriptor.columns().into_iter().map(|(_, t)| t).collect()
}

/// Creates, reads, updates, deletes and lists resources.
#[derive(Debug, Clone, Copy)]
pub struct ResourceManager<'c> {
    connector: &'c Connector,
}

impl<'c> ResourceManager<'c> {
    pub(crate) fn new(connector: &'c Connector) -> Self {
        Self { connector }
    }

    /// Runs `f` in the session described by `binding`.
    fn run<T>(
        &self,
        binding: Binding<'_>,
        f: impl FnOnce(&Session) -> ConnectorResult<T>,
    ) -> ConnectorResult<T> {
        match binding.session {
            Some(session) => {
                if let Some(tenant) = binding.tenant {
                    let requested = self.connector.resolve(Some(tenant))?;
                    if &requested != session.namespace() {
                        return Err(TenantError::NamespaceMismatch {
                            session_namespace: session.namespace().to_string(),
                            requested: requested.to_string(),
                        }
                        .into());
                    }
                }
                f(session)
            }
            None => {
                let namespace = self.connector.resolve(binding.tenant)?;
                self.connector.open_scope(&namespace)?.run(f)
            }
        }
    }

    /// Persists a new resource and returns its generated primary key.
    ///
    /// Fails with [`ValidationError::UnknownField`] if `fields` names an
    /// attribute `descriptor` does not declare, and with
    /// [`TenantError::CrossTenantReference`] if a relationship field refers to
    /// a resource of another namespace.
    pub fn create(
        &self,
        descriptor: &EntityDescriptor,
        fields: &Fields,
        binding: Binding<'_>,
    ) -> ConnectorResult<i64> {
        self.run(binding, |session| {
            let values = descriptor.prepare_create(fields, session.namespace())?;
            let (columns, params): (Vec<&str>, Vec<SqlParam>) = values
                .into_iter()
                .map(|(field, value)| (field.name(), SqlParam::new(value, field.field_type())))
                .unzip();

            let sql = SqlBuilder::new(session.dialect(), session.namespace()).insert(descriptor, &columns);
            let rows = session.query(&sql, &params, &[FieldType::Integer])?;
            let pk = rows
                .first()
                .and_then(|row| row.first())
                .and_then(Value::as_i64)
                .ok_or_else(|| BackendError::Decode {
                    backend: session.namespace().target().backend(),
                    column: descriptor.primary_key().to_string(),
                    message: "insert returned no primary key".to_string(),
                })?;

            debug!(entity = descriptor.name(), namespace = %session.namespace(), pk, "Created resource");
            Ok(pk)
        })
    }

    /// Looks up a resource by primary key. Absence is `Ok(None)`.
    pub fn get(
        &self,
        descriptor: &EntityDescriptor,
        pk: i64,
        binding: Binding<'_>,
    ) -> ConnectorResult<Option<Resource>> {
        self.run(binding, |session| {
            let sql = SqlBuilder::new(session.dialect(), session.namespace()).select_by_pk(descriptor);
            let rows = session.query(&sql, &[pk_param(pk)], &column_types(descriptor))?;
            debug!(entity = descriptor.name(), namespace = %session.namespace(), pk, found = !rows.is_empty(), "Read resource");
            rows.into_iter()
                .next()
                .map(|row| descriptor.decode_row(session.namespace(), row))
                .transpose()
        })
    }

    /// Like [`get`](Self::get), but reads only the primary key and `fields`.
    ///
    /// Unknown names fail with [`ValidationError::UnknownField`] before any
    /// session is opened.
    pub fn get_fields(
        &self,
        descriptor: &EntityDescriptor,
        pk: i64,
        fields: &[&str],
        binding: Binding<'_>,
    ) -> ConnectorResult<Option<Resource>> {
        let columns = descriptor.projection(fields)?;
        let (names, types): (Vec<&str>, Vec<FieldType>) = columns.iter().copied().unzip();
        self.run(binding, |session| {
            let sql = SqlBuilder::new(session.dialect(), session.namespace())
                .select_columns_by_pk(descriptor, &names);
            let rows = session.query(&sql, &[pk_param(pk)], &types)?;
            rows.into_iter()
                .next()
                .map(|row| descriptor.decode_projected_row(session.namespace(), &columns, row))
                .transpose()
        })
    }

    /// Applies a partial update. Fields not in `fields` are left untouched.
    ///
    /// Fails with [`ResourceError::NotFound`] if `pk` does not exist in the
    /// namespace, including when `fields` is empty.
    pub fn update(
        &self,
        descriptor: &EntityDescriptor,
        pk: i64,
        fields: &Fields,
        binding: Binding<'_>,
    ) -> ConnectorResult<()> {
        self.run(binding, |session| {
            let values = descriptor.prepare_update(fields, session.namespace())?;
            let builder = SqlBuilder::new(session.dialect(), session.namespace());

            if values.is_empty() {
                let rows = session.query(&builder.exists(descriptor), &[pk_param(pk)], &[FieldType::Integer])?;
                if rows.is_empty() {
                    return Err(not_found(descriptor, session, pk).into());
                }
                return Ok(());
            }

            let (columns, mut params): (Vec<&str>, Vec<SqlParam>) = values
                .into_iter()
                .map(|(field, value)| (field.name(), SqlParam::new(value, field.field_type())))
                .unzip();
            params.push(pk_param(pk));

            let updated = session.execute(&builder.update(descriptor, &columns), &params)?;
            if updated == 0 {
                return Err(not_found(descriptor, session, pk).into());
            }
            debug!(entity = descriptor.name(), namespace = %session.namespace(), pk, fields = columns.len(), "Updated resource");
            Ok(())
        })
    }

    /// Deletes a resource.
    ///
    /// Fails with [`ResourceError::NotFound`] if `pk` did not exist, so a
    /// caller can tell a confirmed delete from a no-op.
    pub fn delete(
        &self,
        descriptor: &EntityDescriptor,
        pk: i64,
        binding: Binding<'_>,
    ) -> ConnectorResult<()> {
        self.run(binding, |session| {
            let sql = SqlBuilder::new(session.dialect(), session.namespace()).delete(descriptor);
            let deleted = session.execute(&sql, &[pk_param(pk)])?;
            if deleted == 0 {
                return Err(not_found(descriptor, session, pk).into());
            }
            debug!(entity = descriptor.name(), namespace = %session.namespace(), pk, "Deleted resource");
            Ok(())
        })
    }

    /// Returns `true` if `pk` exists in the namespace.
    pub fn exists(
        &self,
        descriptor: &EntityDescriptor,
        pk: i64,
        binding: Binding<'_>,
    ) -> ConnectorResult<bool> {
        self.run(binding, |session| {
            let sql = SqlBuilder::new(session.dialect(), session.namespace()).exists(descriptor);
            let rows = session.query(&sql, &[pk_param(pk)], &[FieldType::Integer])?;
            Ok(!rows.is_empty())
        })
    }

    /// Returns a lazy listing of resources matching `filters`.
    ///
    /// Filters are validated now; nothing is queried until the listing is
    /// consumed, and every consumption queries again.
    pub fn list<'a>(
        &self,
        descriptor: &'a EntityDescriptor,
        filters: &Filters,
        binding: Binding<'a>,
    ) -> ConnectorResult<Listing<'a>>
    where
        'c: 'a,
    {
        let filters = descriptor.prepare_filters(filters)?;
        Ok(Listing {
            manager: ResourceManager {
                connector: self.connector,
            },
            descriptor,
            filters,
            binding,
        })
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Matches across all pages.
    pub total: u64,
    /// Requested page size.
    pub limit: usize,
    /// Requested offset.
    pub offset: usize,
    /// Resources on this page, ordered by primary key.
    pub elements: Vec<Resource>,
}

impl Page {
    /// Returns `true` if resources remain past this page.
    pub fn has_more(&self) -> bool {
        ((self.offset + self.elements.len()) as u64) < self.total
    }
}

/// A restartable, lazily evaluated listing ordered by primary key.
#[derive(Debug, Clone)]
pub struct Listing<'a> {
    manager: ResourceManager<'a>,
    descriptor: &'a EntityDescriptor,
    filters: Vec<(String, FieldType, Value)>,
    binding: Binding<'a>,
}

impl<'a> Listing<'a> {
    fn select(&self, session: &Session, window: Option<(usize, usize)>) -> ConnectorResult<Vec<Resource>> {
        let (sql, params) =
            SqlBuilder::new(session.dialect(), session.namespace()).select(self.descriptor, &self.filters, window);
        session
            .query(&sql, &params, &column_types(self.descriptor))?
            .into_iter()
            .map(|row| self.descriptor.decode_row(session.namespace(), row))
            .collect()
    }

    fn count_in(&self, session: &Session) -> ConnectorResult<u64> {
        let (sql, params) = SqlBuilder::new(session.dialect(), session.namespace()).count(self.descriptor, &self.filters);
        let rows = session.query(&sql, &params, &[FieldType::Integer])?;
        rows.first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .map(|n| n.max(0) as u64)
            .ok_or_else(|| {
                BackendError::Decode {
                    backend: session.namespace().target().backend(),
                    column: "count".to_string(),
                    message: "count returned no rows".to_string(),
                }
                .into()
            })
    }

    /// Queries and returns every match.
    pub fn fetch(&self) -> ConnectorResult<Vec<Resource>> {
        self.manager.run(self.binding, |session| {
            let resources = self.select(session, None)?;
            debug!(entity = self.descriptor.name(), namespace = %session.namespace(), count = resources.len(), "Listed resources");
            Ok(resources)
        })
    }

    /// Queries and returns an iterator over every match.
    pub fn iter(&self) -> ConnectorResult<std::vec::IntoIter<Resource>> {
        Ok(self.fetch()?.into_iter())
    }

    /// Number of matches.
    pub fn count(&self) -> ConnectorResult<u64> {
        self.manager.run(self.binding, |session| self.count_in(session))
    }

    /// The match with the lowest primary key.
    pub fn first(&self) -> ConnectorResult<Option<Resource>> {
        self.manager
            .run(self.binding, |session| Ok(self.select(session, Some((1, 0)))?.into_iter().next()))
    }

    /// One page of matches plus the total, read in a single session.
    ///
    /// `limit` must be between 1 and [`MAX_PAGE_LIMIT`].
    pub fn page(&self, limit: usize, offset: usize) -> ConnectorResult<Page> {
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(ValidationError::LimitOutOfBounds {
                limit,
                max: MAX_PAGE_LIMIT,
            }
            .into());
        }
        self.manager.run(self.binding, |session| {
            let total = self.count_in(session)?;
            let elements = self.select(session, Some((limit, offset)))?;
            Ok(Page {
                total,
                limit,
                offset,
                elements,
            })
        })
    }
}
