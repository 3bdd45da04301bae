//! Persisted resources.

use std::collections::BTreeMap;

use crate::tenant::Namespace;

use super::Value;

/// A row of an entity, read from one namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    entity: String,
    namespace: Namespace,
    pk: i64,
    values: BTreeMap<String, Value>,
}

impl Resource {
    pub(crate) fn new(
        entity: impl Into<String>,
        namespace: Namespace,
        pk: i64,
        values: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            entity: entity.into(),
            namespace,
            pk,
            values,
        }
    }

    /// Name of the entity this resource belongs to.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Namespace the resource was read from.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Primary key.
    pub fn pk(&self) -> i64 {
        self.pk
    }

    /// Returns the value of a field, including the primary key column.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// All column values by name.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// An opaque identity usable as a relationship value.
    pub fn reference(&self) -> ResourceRef {
        ResourceRef {
            entity: self.entity.clone(),
            namespace: self.namespace.clone(),
            pk: self.pk,
        }
    }

    /// Returns the resource as a JSON object of field name to value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}

/// Identity of a persisted resource, bound to its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    entity: String,
    namespace: Namespace,
    pk: i64,
}

impl ResourceRef {
    /// Name of the referenced entity.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Namespace of the referenced resource.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Primary key of the referenced resource.
    pub fn pk(&self) -> i64 {
        self.pk
    }
}

impl From<&Resource> for ResourceRef {
    fn from(resource: &Resource) -> Self {
        resource.reference()
    }
}
