//! Entity descriptors and typed payloads.
//!
//! An [`EntityDescriptor`] declares the shape of a logical record type: its
//! table, primary key, and typed fields, some of which may be relations to
//! other entities. Payloads for writes are built with [`Fields`] and checked
//! against the descriptor before any statement is issued, so an unknown
//! field or a value of the wrong type never reaches the store.
//!
//! # Examples
//!
//! ```
//! use helios_connector::entity::{EntityDescriptor, FieldDescriptor, FieldType, Fields};
//!
//! let user = EntityDescriptor::builder("User", "users")
//!     .field(FieldDescriptor::new("username", FieldType::Text))
//!     .field(FieldDescriptor::new("email", FieldType::Text).nullable())
//!     .build()
//!     .unwrap();
//!
//! let post = EntityDescriptor::builder("Post", "posts")
//!     .field(FieldDescriptor::new("title", FieldType::Text))
//!     .field(FieldDescriptor::relation("author_id", &user))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(post.relations().count(), 1);
//!
//! let fields = Fields::new().set("username", "a");
//! assert_eq!(fields.len(), 1);
//! ```

mod resource;
mod value;

use std::collections::BTreeMap;

use crate::error::{ConnectorResult, TenantError, ValidationError};
use crate::tenant::{Namespace, check_identifier};

pub use resource::{Resource, ResourceRef};
pub use value::{FieldType, Value};

/// Target of a relationship field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relation {
    entity: String,
    table: String,
    primary_key: String,
}

impl Relation {
    /// Describes a relation to `entity` stored in `table`.
    pub fn new(
        entity: impl Into<String>,
        table: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            primary_key: primary_key.into(),
        }
    }

    /// Name of the referenced entity.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Table of the referenced entity.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Primary key column of the referenced entity.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }
}

/// A declared field of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    name: String,
    field_type: FieldType,
    nullable: bool,
    relation: Option<Relation>,
}

impl FieldDescriptor {
    /// A required field of the given type.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            relation: None,
        }
    }

    /// A required relation to `target`, stored as its primary key.
    pub fn relation(name: impl Into<String>, target: &EntityDescriptor) -> Self {
        Self::relation_to(
            name,
            Relation::new(target.name(), target.table(), target.primary_key()),
        )
    }

    /// A required relation described explicitly, e.g. a self-reference.
    pub fn relation_to(name: impl Into<String>, relation: Relation) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Integer,
            nullable: false,
            relation: Some(relation),
        }
    }

    /// Marks the field nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Field (column) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Whether `Null` is accepted.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Relation target, if this is a relationship field.
    pub fn relation_target(&self) -> Option<&Relation> {
        self.relation.as_ref()
    }
}

/// Shape of a logical record type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    primary_key: String,
    fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    /// Starts a descriptor for entity `name` stored in `table`.
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            fields: Vec::new(),
        }
    }

    /// Entity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name, replicated once per namespace.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Primary key column.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Declared fields in order, excluding the primary key.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a declared field.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Relationship fields.
    pub fn relations(&self) -> impl Iterator<Item = (&FieldDescriptor, &Relation)> {
        self.fields
            .iter()
            .filter_map(|f| f.relation.as_ref().map(|r| (f, r)))
    }

    /// Column names and types in select order: primary key first.
    pub(crate) fn columns(&self) -> Vec<(&str, FieldType)> {
        std::iter::once((self.primary_key.as_str(), FieldType::Integer))
            .chain(self.fields.iter().map(|f| (f.name.as_str(), f.field_type)))
            .collect()
    }

    /// The primary key followed by `fields`, in the order given.
    ///
    /// Duplicates and an explicit primary key are dropped. Fails with
    /// [`ValidationError::UnknownField`] for a name the entity does not
    /// declare.
    pub(crate) fn projection<'d>(
        &'d self,
        fields: &[&str],
    ) -> Result<Vec<(&'d str, FieldType)>, ValidationError> {
        let mut columns = vec![(self.primary_key.as_str(), FieldType::Integer)];
        for name in fields {
            if columns.iter().any(|(c, _)| c == name) {
                continue;
            }
            let field = self.field(name).ok_or_else(|| ValidationError::UnknownField {
                entity: self.name.clone(),
                field: name.to_string(),
            })?;
            columns.push((field.name.as_str(), field.field_type));
        }
        Ok(columns)
    }

    /// Validates a create payload.
    ///
    /// Every non-nullable field must be supplied.
    pub(crate) fn prepare_create<'d>(
        &'d self,
        fields: &Fields,
        namespace: &Namespace,
    ) -> ConnectorResult<Vec<(&'d FieldDescriptor, Value)>> {
        let values = self.prepare_write(fields, namespace)?;
        if let Some(missing) = self
            .fields
            .iter()
            .find(|f| !f.nullable && !fields.inputs.contains_key(&f.name))
        {
            return Err(ValidationError::MissingRequiredField {
                entity: self.name.clone(),
                field: missing.name.clone(),
            }
            .into());
        }
        Ok(values)
    }

    /// Validates a partial update payload.
    pub(crate) fn prepare_update<'d>(
        &'d self,
        fields: &Fields,
        namespace: &Namespace,
    ) -> ConnectorResult<Vec<(&'d FieldDescriptor, Value)>> {
        self.prepare_write(fields, namespace)
    }

    fn prepare_write<'d>(
        &'d self,
        fields: &Fields,
        namespace: &Namespace,
    ) -> ConnectorResult<Vec<(&'d FieldDescriptor, Value)>> {
        // Names first, so an unknown field is reported ahead of value errors.
        let mut resolved = Vec::with_capacity(fields.len());
        for (name, input) in &fields.inputs {
            if *name == self.primary_key {
                return Err(ValidationError::ImmutablePrimaryKey {
                    entity: self.name.clone(),
                    field: name.clone(),
                }
                .into());
            }
            let field = self.field(name).ok_or_else(|| ValidationError::UnknownField {
                entity: self.name.clone(),
                field: name.clone(),
            })?;
            resolved.push((field, input));
        }

        resolved
            .into_iter()
            .map(|(field, input)| -> ConnectorResult<(&'d FieldDescriptor, Value)> {
                let value = match input {
                    FieldInput::Value(value) => self.check_value(field, value.clone())?,
                    FieldInput::Reference(reference) => {
                        self.check_reference(field, reference, namespace)?
                    }
                };
                Ok((field, value))
            })
            .collect()
    }

    fn check_value(&self, field: &FieldDescriptor, value: Value) -> ConnectorResult<Value> {
        if value.is_null() && !field.nullable {
            return Err(ValidationError::NullNotAllowed {
                entity: self.name.clone(),
                field: field.name.clone(),
            }
            .into());
        }
        let found = value.type_name();
        field.field_type.accept(value).ok_or_else(|| {
            ValidationError::TypeMismatch {
                entity: self.name.clone(),
                field: field.name.clone(),
                expected: field.field_type.to_string(),
                found: found.to_string(),
            }
            .into()
        })
    }

    fn check_reference(
        &self,
        field: &FieldDescriptor,
        reference: &ResourceRef,
        namespace: &Namespace,
    ) -> ConnectorResult<Value> {
        let relation = field.relation.as_ref().ok_or_else(|| ValidationError::InvalidReference {
            entity: self.name.clone(),
            field: field.name.clone(),
            message: "field is not a relation".to_string(),
        })?;
        if relation.entity != reference.entity() {
            return Err(ValidationError::InvalidReference {
                entity: self.name.clone(),
                field: field.name.clone(),
                message: format!(
                    "expected a {} resource, got {}",
                    relation.entity,
                    reference.entity()
                ),
            }
            .into());
        }
        if reference.namespace() != namespace {
            return Err(TenantError::CrossTenantReference {
                field: field.name.clone(),
                source_namespace: namespace.to_string(),
                target_namespace: reference.namespace().to_string(),
            }
            .into());
        }
        Ok(Value::Integer(reference.pk()))
    }

    /// Validates equality filters. The primary key may be filtered on.
    pub(crate) fn prepare_filters(
        &self,
        filters: &Filters,
    ) -> ConnectorResult<Vec<(String, FieldType, Value)>> {
        filters
            .conditions
            .iter()
            .map(|(name, value)| -> ConnectorResult<(String, FieldType, Value)> {
                let field_type = if *name == self.primary_key {
                    FieldType::Integer
                } else {
                    self.field(name)
                        .ok_or_else(|| ValidationError::UnknownField {
                            entity: self.name.clone(),
                            field: name.clone(),
                        })?
                        .field_type
                };
                let found = value.type_name();
                let value = field_type.accept(value.clone()).ok_or_else(|| {
                    ValidationError::TypeMismatch {
                        entity: self.name.clone(),
                        field: name.clone(),
                        expected: field_type.to_string(),
                        found: found.to_string(),
                    }
                })?;
                Ok((name.clone(), field_type, value))
            })
            .collect()
    }

    /// Builds a resource from a row in [`columns`](Self::columns) order.
    pub(crate) fn decode_row(
        &self,
        namespace: &Namespace,
        row: Vec<Value>,
    ) -> ConnectorResult<Resource> {
        self.decode_projected_row(namespace, &self.columns(), row)
    }

    /// Builds a resource holding only `columns`, which start with the
    /// primary key.
    pub(crate) fn decode_projected_row(
        &self,
        namespace: &Namespace,
        columns: &[(&str, FieldType)],
        row: Vec<Value>,
    ) -> ConnectorResult<Resource> {
        let pk = row.first().and_then(Value::as_i64).ok_or_else(|| {
            crate::error::BackendError::Decode {
                backend: namespace.target().backend(),
                column: self.primary_key.clone(),
                message: "primary key is not an integer".to_string(),
            }
        })?;
        let values: BTreeMap<String, Value> = columns
            .iter()
            .map(|(name, _)| name.to_string())
            .zip(row)
            .collect();
        Ok(Resource::new(self.name.clone(), namespace.clone(), pk, values))
    }
}

/// Builder for [`EntityDescriptor`].
#[derive(Debug, Clone)]
pub struct EntityDescriptorBuilder {
    name: String,
    table: String,
    primary_key: String,
    fields: Vec<FieldDescriptor>,
}

impl EntityDescriptorBuilder {
    /// Sets the primary key column (default `id`).
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    /// Appends a field.
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Validates identifiers and builds the descriptor.
    pub fn build(self) -> Result<EntityDescriptor, ValidationError> {
        let invalid = |message: String| ValidationError::InvalidDescriptor {
            entity: self.name.clone(),
            message,
        };

        check_identifier(&self.table).map_err(|r| invalid(format!("table name {}", r)))?;
        check_identifier(&self.primary_key)
            .map_err(|r| invalid(format!("primary key name {}", r)))?;

        for (i, field) in self.fields.iter().enumerate() {
            check_identifier(&field.name)
                .map_err(|r| invalid(format!("field name '{}' {}", field.name, r)))?;
            if field.name == self.primary_key {
                return Err(invalid(format!(
                    "field '{}' shadows the primary key",
                    field.name
                )));
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(invalid(format!("duplicate field '{}'", field.name)));
            }
            if let Some(relation) = &field.relation {
                check_identifier(&relation.table)
                    .map_err(|r| invalid(format!("relation table {}", r)))?;
                check_identifier(&relation.primary_key)
                    .map_err(|r| invalid(format!("relation key {}", r)))?;
            }
        }

        Ok(EntityDescriptor {
            name: self.name,
            table: self.table,
            primary_key: self.primary_key,
            fields: self.fields,
        })
    }
}

/// One supplied field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldInput {
    /// A plain value.
    Value(Value),
    /// An already-loaded resource, for relationship fields.
    Reference(ResourceRef),
}

/// A write payload: field name to value.
///
/// Setting the same field twice keeps the last value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    inputs: BTreeMap<String, FieldInput>,
}

impl Fields {
    /// An empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a plain value.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), FieldInput::Value(value.into()));
        self
    }

    /// Sets a relationship field to an already-loaded resource.
    pub fn reference(mut self, name: impl Into<String>, resource: impl Into<ResourceRef>) -> Self {
        self.inputs
            .insert(name.into(), FieldInput::Reference(resource.into()));
        self
    }

    /// Iterates over the supplied fields.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldInput)> {
        self.inputs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of supplied fields.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Returns `true` if no fields were supplied.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Equality filters for listings. `Null` matches `IS NULL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    conditions: BTreeMap<String, Value>,
}

impl Filters {
    /// No filters: matches every resource.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `name` to equal `value`.
    pub fn eq(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(name.into(), value.into());
        self
    }

    /// Returns `true` if there are no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}
