//! Schema provisioning.
//!
//! The [`SchemaProvisioner`] creates the physical objects of every tenant:
//! the namespace container (schema or database) and one table per
//! [`EntityDescriptor`]. Provisioning is idempotent. Existing objects are
//! never dropped or altered, so it is safe to run on every process start.
//!
//! Tables are created parents-first along relation edges, so foreign keys
//! resolve on backends that require the referenced table to exist.
//!
//! A failing namespace does not stop the run; every failure is collected into
//! one [`ProvisionError`].

use std::collections::HashMap;

use tracing::{info, warn};

use crate::connector::Connector;
use crate::entity::EntityDescriptor;
use crate::error::{ConnectorError, ConnectorResult, ProvisionError, ProvisionFailure, ValidationError};
use crate::sql::SqlBuilder;
use crate::tenant::Namespace;

/// Outcome of a successful provisioning run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionReport {
    /// Namespaces provisioned, in order.
    pub namespaces: Vec<Namespace>,
    /// Tables ensured in each namespace, in creation order.
    pub tables: Vec<String>,
}

/// Creates namespaces and tables for a set of tenants.
#[derive(Debug, Clone, Copy)]
pub struct SchemaProvisioner<'c> {
    connector: &'c Connector,
}

impl<'c> SchemaProvisioner<'c> {
    pub(crate) fn new(connector: &'c Connector) -> Self {
        Self { connector }
    }

    /// Provisions every configured tenant, or the default namespace when the
    /// tenant set is empty.
    pub fn provision_all(&self, descriptors: &[EntityDescriptor]) -> ConnectorResult<ProvisionReport> {
        let namespaces = self.connector.resolver().namespaces(self.connector.target())?;
        self.provision(&namespaces, descriptors)
    }

    /// Ensures `descriptors` exist in each of `namespaces`.
    ///
    /// An empty `namespaces` slice provisions the default namespace. A
    /// descriptor set with a relation cycle is rejected before anything is
    /// created.
    pub fn provision(
        &self,
        namespaces: &[Namespace],
        descriptors: &[EntityDescriptor],
    ) -> ConnectorResult<ProvisionReport> {
        let order = creation_order(descriptors)?;

        let namespaces = if namespaces.is_empty() {
            vec![Namespace::default_for(self.connector.target())]
        } else {
            namespaces.to_vec()
        };

        let mut succeeded = Vec::new();
        let mut failures = Vec::new();
        for namespace in namespaces {
            match self.provision_namespace(&namespace, &order) {
                Ok(()) => {
                    info!(namespace = %namespace, tables = order.len(), "Provisioned namespace");
                    succeeded.push(namespace);
                }
                Err(err) => {
                    warn!(namespace = %namespace, error = %err, "Failed to provision namespace");
                    failures.push(ProvisionFailure {
                        namespace: namespace.to_string(),
                        error: Box::new(err),
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Err(ProvisionError {
                failures,
                succeeded: succeeded.iter().map(ToString::to_string).collect(),
            }
            .into());
        }

        Ok(ProvisionReport {
            namespaces: succeeded,
            tables: order.iter().map(|d| d.table().to_string()).collect(),
        })
    }

    fn provision_namespace(
        &self,
        namespace: &Namespace,
        order: &[&EntityDescriptor],
    ) -> ConnectorResult<()> {
        let base = self.connector.target();
        if namespace.target() != base && namespace.target().backend() == base.backend() {
            // Database tenants are created from the base endpoint, outside any
            // transaction.
            let engine = self.connector.registry().get_engine(base)?;
            let mut conn = engine.acquire()?;
            conn.create_database_if_absent(namespace.target().database())?;
        }

        self.connector
            .open_scope(namespace)?
            .run(|session| -> ConnectorResult<()> {
                session.ensure_namespace()?;
                let builder = SqlBuilder::new(session.dialect(), session.namespace());
                for descriptor in order {
                    session.execute_batch(&builder.create_table(descriptor))?;
                }
                Ok(())
            })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Orders descriptors so every referenced table precedes its referrers.
///
/// Independent descriptors keep their input order. Self-references and
/// references to tables outside the set are ignored.
fn creation_order(descriptors: &[EntityDescriptor]) -> Result<Vec<&EntityDescriptor>, ConnectorError> {
    let by_table: HashMap<&str, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| (d.table(), i))
        .collect();
    let mut marks = vec![Mark::Unvisited; descriptors.len()];
    let mut order = Vec::with_capacity(descriptors.len());

    for i in 0..descriptors.len() {
        visit(i, descriptors, &by_table, &mut marks, &mut order)?;
    }
    Ok(order)
}

fn visit<'d>(
    index: usize,
    descriptors: &'d [EntityDescriptor],
    by_table: &HashMap<&str, usize>,
    marks: &mut [Mark],
    order: &mut Vec<&'d EntityDescriptor>,
) -> Result<(), ValidationError> {
    let descriptor = &descriptors[index];
    match marks[index] {
        Mark::Done => return Ok(()),
        Mark::Visiting => {
            return Err(ValidationError::InvalidDescriptor {
                entity: descriptor.name().to_string(),
                message: format!("relation cycle through table '{}'", descriptor.table()),
            });
        }
        Mark::Unvisited => {}
    }

    marks[index] = Mark::Visiting;
    for (_, relation) in descriptor.relations() {
        if relation.table() == descriptor.table() {
            continue;
        }
        if let Some(&parent) = by_table.get(relation.table()) {
            visit(parent, descriptors, by_table, marks, order)?;
        }
    }
    marks[index] = Mark::Done;
    order.push(descriptor);
    Ok(())
}
