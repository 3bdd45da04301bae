//! Tenant isolation integration tests.
//!
//! Resources written through one tenant must never be visible through
//! another, whichever way the tenants are mapped onto storage.

mod common;

use helios_connector::error::TenantError;
use helios_connector::{
    Binding, Connector, ConnectorConfig, ConnectorError, ErrorKind, Fields, Filters, TenancyMode,
    Value,
};

use common::*;

fn assert_isolated(connector: &Connector) {
    let (user, _) = provision_blog(connector);
    let resources = connector.resources();

    let pk = resources
        .create(&user, &Fields::new().set("username", "a"), Binding::tenant("schema1"))
        .unwrap();
    assert_eq!(pk, 1);

    let other = resources
        .list(&user, &Filters::new(), Binding::tenant("schema2"))
        .unwrap();
    assert!(other.fetch().unwrap().is_empty());
    assert!(resources.get(&user, pk, Binding::tenant("schema2")).unwrap().is_none());

    let own = resources
        .list(&user, &Filters::new(), Binding::tenant("schema1"))
        .unwrap()
        .fetch()
        .unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].get("username"), Some(&Value::Text("a".into())));
    assert_eq!(own[0].namespace().tenant(), Some("schema1"));

    // The default namespace is a tenant of its own.
    assert!(resources.get(&user, pk, Binding::default()).unwrap().is_none());
}

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn test_schema_tenants_isolated_in_memory() {
    let connector = memory_connector(&["schema1", "schema2"]);
    assert_isolated(&connector);
}

#[test]
fn test_schema_tenants_isolated_on_file() {
    let dir = tempfile::tempdir().unwrap();
    let connector = file_connector(dir.path(), &["schema1", "schema2"]);
    assert_isolated(&connector);
    assert!(dir.path().join("app.schema1.db").exists());
    assert!(dir.path().join("app.schema2.db").exists());
}

#[test]
fn test_database_tenants_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let connector = database_tenancy_connector(dir.path(), &["schema1", "schema2"]);
    assert_isolated(&connector);
    assert!(dir.path().join("schema1").exists());
    assert!(dir.path().join("schema2").exists());
    // One engine per tenant database.
    assert_eq!(connector.registry().len(), 3);
}

#[test]
fn test_same_pk_in_each_tenant() {
    let dir = tempfile::tempdir().unwrap();
    let connector = file_connector(dir.path(), &["schema1", "schema2"]);
    let (user, _) = provision_blog(&connector);
    let resources = connector.resources();

    for tenant in ["schema1", "schema2"] {
        let pk = resources
            .create(&user, &Fields::new().set("username", tenant), Binding::tenant(tenant))
            .unwrap();
        assert_eq!(pk, 1);
    }

    for tenant in ["schema1", "schema2"] {
        let found = resources.get(&user, 1, Binding::tenant(tenant)).unwrap().unwrap();
        assert_eq!(found.get("username"), Some(&Value::Text(tenant.into())));
    }
}

#[test]
fn test_updates_and_deletes_stay_in_tenant() {
    let dir = tempfile::tempdir().unwrap();
    let connector = file_connector(dir.path(), &["schema1", "schema2"]);
    let (user, _) = provision_blog(&connector);
    let resources = connector.resources();
    resources
        .create(&user, &Fields::new().set("username", "a"), Binding::tenant("schema1"))
        .unwrap();

    let err = resources
        .update(&user, 1, &Fields::new().set("age", 3), Binding::tenant("schema2"))
        .unwrap_err();
    assert!(err.is_not_found());

    let err = resources.delete(&user, 1, Binding::tenant("schema2")).unwrap_err();
    assert!(err.is_not_found());

    assert!(resources.exists(&user, 1, Binding::tenant("schema1")).unwrap());
}

// ============================================================================
// Write locking
// ============================================================================

fn short_busy_timeout(config: ConnectorConfig) -> ConnectorConfig {
    ConnectorConfig {
        busy_timeout_ms: 100,
        ..config
    }
}

#[test]
fn test_schema_tenants_share_the_write_lock() {
    let dir = tempfile::tempdir().unwrap();
    let connector =
        Connector::new(short_busy_timeout(file_config(dir.path(), &["schema1", "schema2"])))
            .unwrap();
    let (user, _) = provision_blog(&connector);
    let resources = connector.resources();

    let scope = connector.session_scope(Some("schema1")).unwrap();
    resources
        .create(&user, &Fields::new().set("username", "a"), Binding::session(&scope))
        .unwrap();

    let err = resources
        .create(&user, &Fields::new().set("username", "b"), Binding::tenant("schema2"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);

    scope.commit().unwrap();
    resources
        .create(&user, &Fields::new().set("username", "b"), Binding::tenant("schema2"))
        .unwrap();
}

#[test]
fn test_database_tenants_write_independently() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConnectorConfig {
        tenancy: TenancyMode::Database,
        ..file_config(dir.path(), &["schema1", "schema2"])
    };
    let connector = Connector::new(short_busy_timeout(config)).unwrap();
    let (user, _) = provision_blog(&connector);
    let resources = connector.resources();

    let scope = connector.session_scope(Some("schema1")).unwrap();
    resources
        .create(&user, &Fields::new().set("username", "a"), Binding::session(&scope))
        .unwrap();
    resources
        .create(&user, &Fields::new().set("username", "b"), Binding::tenant("schema2"))
        .unwrap();
    scope.commit().unwrap();
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn test_unknown_tenant_never_falls_back() {
    let connector = memory_connector(&["schema1"]);
    let (user, _) = provision_blog(&connector);

    let err = connector
        .resources()
        .create(&user, &Fields::new().set("username", "a"), Binding::tenant("schema_1"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownTenant);

    let listing = connector
        .resources()
        .list(&user, &Filters::new(), Binding::default())
        .unwrap();
    assert_eq!(listing.count().unwrap(), 0);
}

#[test]
fn test_resolve_unknown_tenant_without_network() {
    // Nothing listens here; resolution must not try to connect.
    let config = helios_connector::ConnectorConfig {
        backend: helios_connector::BackendKind::Postgres,
        host: "db.invalid".to_string(),
        database: "app".to_string(),
        user: Some("app".to_string()),
        password: Some("secret".to_string()),
        tenants: vec!["schema1".to_string()],
        ..Default::default()
    };
    let connector = Connector::new(config).unwrap();

    let err = connector.resolve(Some("unknown")).unwrap_err();
    assert!(matches!(
        err,
        ConnectorError::Tenant(TenantError::UnknownTenant { ref tenant }) if tenant == "unknown"
    ));
    assert!(connector.registry().is_empty());
}

#[test]
fn test_added_tenant_after_provisioning() {
    let dir = tempfile::tempdir().unwrap();
    let connector = file_connector(dir.path(), &["schema1"]);
    let (user, _) = provision_blog(&connector);

    assert!(connector.add_tenant("schema3").unwrap());
    provision_blog(&connector);

    let pk = connector
        .resources()
        .create(&user, &Fields::new().set("username", "c"), Binding::tenant("schema3"))
        .unwrap();
    assert_eq!(pk, 1);

    connector.remove_tenant("schema3");
    let err = connector
        .resources()
        .get(&user, pk, Binding::tenant("schema3"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownTenant);
}

// ============================================================================
// Tenants that would alias the default namespace
// ============================================================================

fn is_invalid_tenant(err: &ConnectorError, name: &str) -> bool {
    matches!(
        err,
        ConnectorError::Tenant(TenantError::InvalidTenantName { tenant, .. }) if tenant == name
    )
}

#[test]
fn test_default_schema_name_is_not_a_tenant() {
    for name in ["main", "temp", "Main"] {
        let config = ConnectorConfig {
            tenants: vec![name.to_string()],
            ..ConnectorConfig::for_testing()
        };
        let err = Connector::new(config).unwrap_err();
        assert!(is_invalid_tenant(&err, name), "{name}: {err:?}");
    }

    let connector = memory_connector(&["schema1"]);
    let (user, _) = provision_blog(&connector);
    connector
        .resources()
        .create(&user, &Fields::new().set("username", "default_row"), Binding::default())
        .unwrap();

    let err = ConnectorError::from(connector.add_tenant("main").unwrap_err());
    assert!(is_invalid_tenant(&err, "main"));
    assert!(!connector.tenants().contains("main"));
    let err = connector
        .resources()
        .list(&user, &Filters::new(), Binding::tenant("main"))
        .unwrap()
        .fetch()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownTenant);
}

#[test]
fn test_base_database_is_not_a_tenant() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConnectorConfig {
        tenancy: TenancyMode::Database,
        database: "app".to_string(),
        tenants: vec!["schema1".to_string(), "app".to_string()],
        ..file_config(dir.path(), &[])
    };
    let err = Connector::new(config.clone()).unwrap_err();
    assert!(is_invalid_tenant(&err, "app"));

    let connector = Connector::new(ConnectorConfig {
        tenants: vec!["schema1".to_string()],
        ..config
    })
    .unwrap();
    let err = ConnectorError::from(connector.add_tenant("app").unwrap_err());
    assert!(is_invalid_tenant(&err, "app"));

    // The same name is fine as a schema inside the base database.
    let schema_tenancy = file_connector(dir.path(), &["app"]);
    let (user, _) = provision_blog(&schema_tenancy);
    schema_tenancy
        .resources()
        .create(&user, &Fields::new().set("username", "default_row"), Binding::default())
        .unwrap();
    let listing = schema_tenancy
        .resources()
        .list(&user, &Filters::new(), Binding::tenant("app"))
        .unwrap();
    assert_eq!(listing.count().unwrap(), 0);
}

// ============================================================================
// Session binding
// ============================================================================

#[test]
fn test_session_and_tenant_must_agree() {
    let dir = tempfile::tempdir().unwrap();
    let connector = file_connector(dir.path(), &["schema1", "schema2"]);
    let (user, _) = provision_blog(&connector);
    let resources = connector.resources();

    let scope = connector.session_scope(Some("schema1")).unwrap();
    let pk = resources
        .create(
            &user,
            &Fields::new().set("username", "a"),
            Binding::session(&scope).with_tenant("schema1"),
        )
        .unwrap();

    let err = resources
        .get(&user, pk, Binding::session(&scope).with_tenant("schema2"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NamespaceMismatch);
    scope.commit().unwrap();

    assert!(resources.get(&user, pk, Binding::tenant("schema1")).unwrap().is_some());
}
