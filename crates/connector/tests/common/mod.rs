//! Shared fixtures for the connector integration tests.

#![allow(dead_code)]

use std::path::Path;

use helios_connector::entity::{EntityDescriptor, FieldDescriptor, FieldType};
use helios_connector::{BackendKind, Connector, ConnectorConfig, TenancyMode};

/// A configuration for a file database `app.db` in `dir`.
pub fn file_config(dir: &Path, tenants: &[&str]) -> ConnectorConfig {
    ConnectorConfig {
        backend: BackendKind::Sqlite,
        host: dir.to_string_lossy().into_owned(),
        database: "app.db".to_string(),
        tenants: tenants.iter().map(|t| t.to_string()).collect(),
        connection_timeout_ms: 2000,
        busy_timeout_ms: 2000,
        ..ConnectorConfig::for_testing()
    }
}

/// A connector on a file database in `dir` with schema tenancy.
pub fn file_connector(dir: &Path, tenants: &[&str]) -> Connector {
    Connector::new(file_config(dir, tenants)).expect("Failed to create connector")
}

/// A connector on a file database in `dir` with database tenancy.
pub fn database_tenancy_connector(dir: &Path, tenants: &[&str]) -> Connector {
    let config = ConnectorConfig {
        tenancy: TenancyMode::Database,
        ..file_config(dir, tenants)
    };
    Connector::new(config).expect("Failed to create connector")
}

/// A connector on a private in-memory database.
pub fn memory_connector(tenants: &[&str]) -> Connector {
    let config = ConnectorConfig {
        tenants: tenants.iter().map(|t| t.to_string()).collect(),
        ..ConnectorConfig::for_testing()
    };
    Connector::new(config).expect("Failed to create connector")
}

pub fn user_descriptor() -> EntityDescriptor {
    EntityDescriptor::builder("User", "users")
        .field(FieldDescriptor::new("username", FieldType::Text))
        .field(FieldDescriptor::new("email", FieldType::Text).nullable())
        .field(FieldDescriptor::new("age", FieldType::Integer).nullable())
        .build()
        .expect("valid descriptor")
}

pub fn post_descriptor(user: &EntityDescriptor) -> EntityDescriptor {
    EntityDescriptor::builder("Post", "posts")
        .field(FieldDescriptor::new("title", FieldType::Text))
        .field(FieldDescriptor::relation("author_id", user))
        .build()
        .expect("valid descriptor")
}

/// Provisions users and posts in every configured tenant.
pub fn provision_blog(connector: &Connector) -> (EntityDescriptor, EntityDescriptor) {
    let user = user_descriptor();
    let post = post_descriptor(&user);
    connector
        .provisioner()
        .provision_all(&[post.clone(), user.clone()])
        .expect("Failed to provision");
    (user, post)
}
