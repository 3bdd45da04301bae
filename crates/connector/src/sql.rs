//! Dialect-driven statement building.
//!
//! Drivers describe their SQL flavour through [`Dialect`]; [`SqlBuilder`]
//! turns entity descriptors into statements against one namespace. Every
//! table reference produced here is qualified with the namespace's schema (or
//! the dialect's default schema), so a statement can only ever touch objects
//! of the namespace it was built for.

use crate::entity::{EntityDescriptor, FieldType, Value};
use crate::target::BackendKind;
use crate::tenant::Namespace;

/// SQL flavour of a backend.
pub trait Dialect: Send + Sync {
    /// Backend this dialect belongs to.
    fn backend(&self) -> BackendKind;

    /// Quotes an identifier.
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Positional parameter marker, 1-based.
    fn placeholder(&self, index: usize) -> String;

    /// Schema used to qualify names in the default namespace, if any.
    fn default_schema(&self) -> Option<&str>;

    /// Column type for a field type.
    fn column_type(&self, field_type: FieldType) -> &'static str;

    /// Column definition of a generated integer primary key.
    fn primary_key_column(&self, name: &str) -> String;

    /// Whether `REFERENCES` clauses may be schema-qualified.
    fn qualify_references(&self) -> bool;
}

/// A bound statement parameter.
///
/// The declared type lets drivers bind typed `NULL`s.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParam {
    /// The value to bind.
    pub value: Value,
    /// Declared type of the column it is bound against.
    pub field_type: FieldType,
}

impl SqlParam {
    /// Creates a parameter.
    pub fn new(value: Value, field_type: FieldType) -> Self {
        Self { value, field_type }
    }
}

/// Builds statements for one namespace.
pub(crate) struct SqlBuilder<'a> {
    dialect: &'a dyn Dialect,
    namespace: &'a Namespace,
}

impl<'a> SqlBuilder<'a> {
    pub(crate) fn new(dialect: &'a dyn Dialect, namespace: &'a Namespace) -> Self {
        Self { dialect, namespace }
    }

    /// Fully qualified table name.
    pub(crate) fn table(&self, table: &str) -> String {
        match self.namespace.schema().or(self.dialect.default_schema()) {
            Some(schema) => format!(
                "{}.{}",
                self.dialect.quote_ident(schema),
                self.dialect.quote_ident(table)
            ),
            None => self.dialect.quote_ident(table),
        }
    }

    fn column_list(&self, descriptor: &EntityDescriptor) -> String {
        descriptor
            .columns()
            .iter()
            .map(|(name, _)| self.dialect.quote_ident(name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn create_table(&self, descriptor: &EntityDescriptor) -> String {
        let mut columns = vec![self.dialect.primary_key_column(descriptor.primary_key())];
        for field in descriptor.fields() {
            let mut column = format!(
                "{} {}",
                self.dialect.quote_ident(field.name()),
                self.dialect.column_type(field.field_type())
            );
            if !field.is_nullable() {
                column.push_str(" NOT NULL");
            }
            if let Some(relation) = field.relation_target() {
                let parent = if self.dialect.qualify_references() {
                    self.table(relation.table())
                } else {
                    self.dialect.quote_ident(relation.table())
                };
                column.push_str(&format!(
                    " REFERENCES {} ({})",
                    parent,
                    self.dialect.quote_ident(relation.primary_key())
                ));
            }
            columns.push(column);
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table(descriptor.table()),
            columns.join(", ")
        )
    }

    pub(crate) fn insert(&self, descriptor: &EntityDescriptor, columns: &[&str]) -> String {
        let table = self.table(descriptor.table());
        let pk = self.dialect.quote_ident(descriptor.primary_key());
        if columns.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, pk);
        }
        let names = columns
            .iter()
            .map(|c| self.dialect.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let markers = (1..=columns.len())
            .map(|i| self.dialect.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table, names, markers, pk
        )
    }

    pub(crate) fn select_by_pk(&self, descriptor: &EntityDescriptor) -> String {
        let columns: Vec<&str> = descriptor.columns().into_iter().map(|(c, _)| c).collect();
        self.select_columns_by_pk(descriptor, &columns)
    }

    pub(crate) fn select_columns_by_pk(&self, descriptor: &EntityDescriptor, columns: &[&str]) -> String {
        let names = columns
            .iter()
            .map(|c| self.dialect.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            names,
            self.table(descriptor.table()),
            self.dialect.quote_ident(descriptor.primary_key()),
            self.dialect.placeholder(1)
        )
    }

    pub(crate) fn exists(&self, descriptor: &EntityDescriptor) -> String {
        let pk = self.dialect.quote_ident(descriptor.primary_key());
        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            pk,
            self.table(descriptor.table()),
            pk,
            self.dialect.placeholder(1)
        )
    }

    /// `UPDATE` of `columns`; the primary key binds last.
    pub(crate) fn update(&self, descriptor: &EntityDescriptor, columns: &[&str]) -> String {
        let assignments = columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "{} = {}",
                    self.dialect.quote_ident(c),
                    self.dialect.placeholder(i + 1)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.table(descriptor.table()),
            assignments,
            self.dialect.quote_ident(descriptor.primary_key()),
            self.dialect.placeholder(columns.len() + 1)
        )
    }

    pub(crate) fn delete(&self, descriptor: &EntityDescriptor) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {}",
            self.table(descriptor.table()),
            self.dialect.quote_ident(descriptor.primary_key()),
            self.dialect.placeholder(1)
        )
    }

    /// `WHERE` clause for equality filters and the parameters it binds.
    fn filter_clause(&self, filters: &[(String, FieldType, Value)]) -> (String, Vec<SqlParam>) {
        if filters.is_empty() {
            return (String::new(), Vec::new());
        }
        let mut params = Vec::new();
        let conditions = filters
            .iter()
            .map(|(name, field_type, value)| {
                let column = self.dialect.quote_ident(name);
                if value.is_null() {
                    format!("{} IS NULL", column)
                } else {
                    params.push(SqlParam::new(value.clone(), *field_type));
                    format!("{} = {}", column, self.dialect.placeholder(params.len()))
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        (format!(" WHERE {}", conditions), params)
    }

    /// Filtered select ordered by primary key.
    pub(crate) fn select(
        &self,
        descriptor: &EntityDescriptor,
        filters: &[(String, FieldType, Value)],
        window: Option<(usize, usize)>,
    ) -> (String, Vec<SqlParam>) {
        let (clause, params) = self.filter_clause(filters);
        let mut sql = format!(
            "SELECT {} FROM {}{} ORDER BY {}",
            self.column_list(descriptor),
            self.table(descriptor.table()),
            clause,
            self.dialect.quote_ident(descriptor.primary_key())
        );
        if let Some((limit, offset)) = window {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
        }
        (sql, params)
    }

    pub(crate) fn count(
        &self,
        descriptor: &EntityDescriptor,
        filters: &[(String, FieldType, Value)],
    ) -> (String, Vec<SqlParam>) {
        let (clause, params) = self.filter_clause(filters);
        (
            format!(
                "SELECT COUNT(*) FROM {}{}",
                self.table(descriptor.table()),
                clause
            ),
            params,
        )
    }
}
