//! PostgreSQL backend integration tests.
//!
//! The first sections need no server. Tests that do need one run against a
//! PostgreSQL container started through testcontainers and shared by the
//! whole test binary.
//!
//! Run with: `cargo test -p helios-connector --features postgres -- postgres`
//!
//! Skip if no Docker:
//!   `cargo test -p helios-connector --features postgres -- --skip postgres_integration`

#![cfg(feature = "postgres")]

use helios_connector::backends::postgres::PostgresDialect;
use helios_connector::entity::FieldType;
use helios_connector::error::TenantError;
use helios_connector::sql::Dialect;
use helios_connector::{
    BackendKind, Connector, ConnectorConfig, ConnectorError, ErrorKind, TenancyMode,
};

fn offline_config(tenants: &[&str]) -> ConnectorConfig {
    ConnectorConfig {
        backend: BackendKind::Postgres,
        host: "db.invalid".to_string(),
        port: Some(5433),
        database: "app".to_string(),
        user: Some("app".to_string()),
        password: Some("secret".to_string()),
        tenants: tenants.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    }
}

// ============================================================================
// Dialect Tests (no PostgreSQL instance required)
// ============================================================================

#[test]
fn test_postgres_dialect() {
    let dialect = PostgresDialect;
    assert_eq!(dialect.backend(), BackendKind::Postgres);
    assert_eq!(dialect.placeholder(1), "$1");
    assert_eq!(dialect.placeholder(12), "$12");
    assert_eq!(dialect.default_schema(), Some("public"));
    assert_eq!(dialect.quote_ident("users"), "\"users\"");
    assert_eq!(
        dialect.primary_key_column("id"),
        "\"id\" BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY"
    );
    assert!(dialect.qualify_references());
}

#[test]
fn test_postgres_column_types() {
    let dialect = PostgresDialect;
    let expected = [
        (FieldType::Integer, "BIGINT"),
        (FieldType::Real, "DOUBLE PRECISION"),
        (FieldType::Text, "TEXT"),
        (FieldType::Boolean, "BOOLEAN"),
        (FieldType::Blob, "BYTEA"),
        (FieldType::Timestamp, "TIMESTAMPTZ"),
        (FieldType::Json, "JSONB"),
    ];
    for (field_type, column) in expected {
        assert_eq!(dialect.column_type(field_type), column);
    }
}

// ============================================================================
// Configuration Tests (no PostgreSQL instance required)
// ============================================================================

#[test]
fn test_postgres_config_serialization() {
    let config = offline_config(&["schema1"]);
    let json = serde_json::to_string(&config).unwrap();
    let deserialized: ConnectorConfig = serde_json::from_str(&json).unwrap();

    assert_eq!(deserialized.backend, BackendKind::Postgres);
    assert_eq!(deserialized.host, "db.invalid");
    assert_eq!(deserialized.port, Some(5433));
    assert_eq!(deserialized.tenants, vec!["schema1"]);
    assert!(deserialized.validate().is_ok());
}

#[test]
fn test_postgres_config_requires_credentials() {
    let config = ConnectorConfig {
        password: None,
        ..offline_config(&[])
    };
    let err = Connector::new(config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_postgres_target_is_redacted() {
    let target = offline_config(&[]).target();
    assert_eq!(target.backend(), BackendKind::Postgres);
    assert_eq!(target.port(), Some(5433));
    assert!(!target.redacted().contains("secret"));
    assert!(target.uri().contains("secret"));
}

// ============================================================================
// Tenant Resolution Tests (no PostgreSQL instance required)
// ============================================================================

#[test]
fn test_postgres_connector_is_lazy() {
    let connector = Connector::new(offline_config(&["schema1"])).unwrap();
    let ns = connector.resolve(Some("schema1")).unwrap();
    assert_eq!(ns.schema(), Some("schema1"));
    assert!(connector.registry().is_empty());
}

#[test]
fn test_postgres_system_schemas_are_not_tenants() {
    for name in ["public", "information_schema", "pg_catalog", "pg_toast"] {
        let err = Connector::new(offline_config(&[name])).unwrap_err();
        assert!(
            matches!(
                err,
                ConnectorError::Tenant(TenantError::InvalidTenantName { ref tenant, .. }) if tenant == name
            ),
            "{name}: {err:?}"
        );
    }
}

#[test]
fn test_postgres_base_database_is_not_a_tenant() {
    let config = ConnectorConfig {
        tenancy: TenancyMode::Database,
        ..offline_config(&[])
    };
    let connector = Connector::new(config).unwrap();
    assert!(connector.add_tenant("app").is_err());
    assert!(connector.add_tenant("template1").is_err());
    assert!(connector.add_tenant("tenant_a").unwrap());

    let ns = connector.resolve(Some("tenant_a")).unwrap();
    assert_eq!(ns.target().database(), "tenant_a");
    assert_eq!(ns.target().host(), "db.invalid");
}

// ============================================================================
// Integration Tests (requires Docker for testcontainers)
// ============================================================================

/// Integration tests that require a real PostgreSQL instance via testcontainers.
///
/// Run with:
///   cargo test -p helios-connector --features postgres -- postgres_integration
#[cfg(test)]
mod postgres_integration {
    use std::sync::OnceLock;

    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use testcontainers::runners::SyncRunner;
    use testcontainers_modules::postgres::Postgres;

    use helios_connector::entity::{EntityDescriptor, FieldDescriptor, FieldType};
    use helios_connector::{
        BackendKind, Binding, Connector, ConnectorConfig, ErrorKind, Fields, Filters,
        TenancyMode, Value,
    };

    /// Shared PostgreSQL container reused across all tests in this module.
    struct SharedPg {
        host: String,
        port: u16,
        /// Kept alive for the duration of the test binary.
        _container: testcontainers::Container<Postgres>,
    }

    static SHARED_PG: OnceLock<SharedPg> = OnceLock::new();

    fn shared_pg() -> &'static SharedPg {
        SHARED_PG.get_or_init(|| {
            let container = Postgres::default()
                .start()
                .expect("Failed to start PostgreSQL container");
            let port = container
                .get_host_port_ipv4(5432)
                .expect("Failed to get host port");
            let host = container
                .get_host()
                .expect("Failed to get host")
                .to_string();
            SharedPg {
                host,
                port,
                _container: container,
            }
        })
    }

    /// Tenant names unique to one test, since all tests share the server.
    fn unique_tenants(count: usize) -> Vec<String> {
        (0..count)
            .map(|_| format!("t_{}", uuid::Uuid::new_v4().simple()))
            .collect()
    }

    fn create_connector(tenants: &[String], tenancy: TenancyMode) -> Connector {
        let pg = shared_pg();
        let config = ConnectorConfig {
            backend: BackendKind::Postgres,
            host: pg.host.clone(),
            port: Some(pg.port),
            database: "postgres".to_string(),
            user: Some("postgres".to_string()),
            password: Some("postgres".to_string()),
            tenants: tenants.to_vec(),
            tenancy,
            max_connections: 5,
            connection_timeout_ms: 10_000,
            ..Default::default()
        };
        Connector::new(config).expect("Failed to create connector")
    }

    fn user_descriptor() -> EntityDescriptor {
        EntityDescriptor::builder("User", "users")
            .field(FieldDescriptor::new("username", FieldType::Text))
            .field(FieldDescriptor::new("age", FieldType::Integer).nullable())
            .build()
            .expect("valid descriptor")
    }

    fn post_descriptor(user: &EntityDescriptor) -> EntityDescriptor {
        EntityDescriptor::builder("Post", "posts")
            .field(FieldDescriptor::new("title", FieldType::Text))
            .field(FieldDescriptor::relation("author_id", user))
            .build()
            .expect("valid descriptor")
    }

    fn provision(connector: &Connector) -> (EntityDescriptor, EntityDescriptor) {
        let user = user_descriptor();
        let post = post_descriptor(&user);
        connector
            .provisioner()
            .provision_all(&[post.clone(), user.clone()])
            .expect("Failed to provision");
        (user, post)
    }

    // ========================================================================
    // CRUD Tests
    // ========================================================================

    #[test]
    fn postgres_integration_crud() {
        let tenants = unique_tenants(1);
        let connector = create_connector(&tenants, TenancyMode::Schema);
        let (user, _) = provision(&connector);
        let resources = connector.resources();
        let binding = Binding::tenant(&tenants[0]);

        let pk = resources
            .create(&user, &Fields::new().set("username", "a"), binding)
            .unwrap();
        assert_eq!(pk, 1);

        resources
            .update(&user, pk, &Fields::new().set("age", 41), binding)
            .unwrap();
        let found = resources.get(&user, pk, binding).unwrap().unwrap();
        assert_eq!(found.get("age"), Some(&Value::Integer(41)));
        assert_eq!(found.get("username"), Some(&Value::Text("a".into())));

        resources.delete(&user, pk, binding).unwrap();
        assert!(resources.get(&user, pk, binding).unwrap().is_none());
        assert!(resources.delete(&user, pk, binding).unwrap_err().is_not_found());
    }

    #[test]
    fn postgres_integration_all_field_types() {
        let tenants = unique_tenants(1);
        let connector = create_connector(&tenants, TenancyMode::Schema);
        let sample = EntityDescriptor::builder("Sample", "samples")
            .field(FieldDescriptor::new("i", FieldType::Integer).nullable())
            .field(FieldDescriptor::new("r", FieldType::Real).nullable())
            .field(FieldDescriptor::new("t", FieldType::Text).nullable())
            .field(FieldDescriptor::new("b", FieldType::Boolean).nullable())
            .field(FieldDescriptor::new("bytes", FieldType::Blob).nullable())
            .field(FieldDescriptor::new("ts", FieldType::Timestamp).nullable())
            .field(FieldDescriptor::new("doc", FieldType::Json).nullable())
            .build()
            .unwrap();
        connector
            .provisioner()
            .provision_all(std::slice::from_ref(&sample))
            .unwrap();
        let resources = connector.resources();
        let binding = Binding::tenant(&tenants[0]);

        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let fields = Fields::new()
            .set("i", 42)
            .set("r", 2)
            .set("t", "text")
            .set("b", true)
            .set("bytes", vec![0u8, 1, 2])
            .set("ts", ts)
            .set("doc", json!({"tags": ["x", "y"]}));
        let pk = resources.create(&sample, &fields, binding).unwrap();
        let found = resources.get(&sample, pk, binding).unwrap().unwrap();
        assert_eq!(found.get("i"), Some(&Value::Integer(42)));
        assert_eq!(found.get("r"), Some(&Value::Real(2.0)));
        assert_eq!(found.get("t"), Some(&Value::Text("text".into())));
        assert_eq!(found.get("b"), Some(&Value::Boolean(true)));
        assert_eq!(found.get("bytes"), Some(&Value::Blob(vec![0, 1, 2])));
        assert_eq!(found.get("ts"), Some(&Value::Timestamp(ts)));
        assert_eq!(found.get("doc"), Some(&Value::Json(json!({"tags": ["x", "y"]}))));

        // Every column NULL: each one is bound with its own type.
        let nulls = ["i", "r", "t", "b", "bytes", "ts", "doc"]
            .into_iter()
            .fold(Fields::new(), |fields, column| fields.set(column, Value::Null));
        let pk = resources.create(&sample, &nulls, binding).unwrap();
        let empty = resources.get(&sample, pk, binding).unwrap().unwrap();
        for column in ["i", "r", "t", "b", "bytes", "ts", "doc"] {
            assert_eq!(empty.get(column), Some(&Value::Null), "{column}");
        }
        resources
            .update(&sample, pk, &Fields::new().set("ts", Value::Null), binding)
            .unwrap();
    }

    // ========================================================================
    // Tenant Isolation Tests
    // ========================================================================

    #[test]
    fn postgres_integration_schema_tenant_isolation() {
        let tenants = unique_tenants(2);
        let connector = create_connector(&tenants, TenancyMode::Schema);
        let (user, post) = provision(&connector);
        let resources = connector.resources();

        let pk = resources
            .create(&user, &Fields::new().set("username", "a"), Binding::tenant(&tenants[0]))
            .unwrap();
        let author = resources
            .get(&user, pk, Binding::tenant(&tenants[0]))
            .unwrap()
            .unwrap();

        let other = resources
            .list(&user, &Filters::new(), Binding::tenant(&tenants[1]))
            .unwrap();
        assert_eq!(other.count().unwrap(), 0);

        let err = resources
            .create(
                &post,
                &Fields::new().set("title", "t").reference("author_id", &author),
                Binding::tenant(&tenants[1]),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CrossTenantReference);

        let pk = resources
            .create(&user, &Fields::new().set("username", "b"), Binding::tenant(&tenants[1]))
            .unwrap();
        assert_eq!(pk, 1);
    }

    #[test]
    fn postgres_integration_database_tenants() {
        let tenants = unique_tenants(2);
        let connector = create_connector(&tenants, TenancyMode::Database);
        let (user, _) = provision(&connector);
        // Existing databases are reused.
        provision(&connector);

        let resources = connector.resources();
        resources
            .create(&user, &Fields::new().set("username", "a"), Binding::tenant(&tenants[0]))
            .unwrap();
        let listing = resources
            .list(&user, &Filters::new(), Binding::tenant(&tenants[1]))
            .unwrap();
        assert_eq!(listing.count().unwrap(), 0);

        let ns = connector.resolve(Some(tenants[0].as_str())).unwrap();
        assert_eq!(ns.target().database(), tenants[0]);
    }

    // ========================================================================
    // Provisioning and Session Tests
    // ========================================================================

    #[test]
    fn postgres_integration_provision_is_idempotent() {
        let tenants = unique_tenants(1);
        let connector = create_connector(&tenants, TenancyMode::Schema);
        let (user, _) = provision(&connector);
        connector
            .resources()
            .create(&user, &Fields::new().set("username", "a"), Binding::tenant(&tenants[0]))
            .unwrap();

        let report = connector
            .provisioner()
            .provision_all(std::slice::from_ref(&user))
            .unwrap();
        assert_eq!(report.namespaces.len(), 1);
        assert!(connector
            .resources()
            .exists(&user, 1, Binding::tenant(&tenants[0]))
            .unwrap());
    }

    #[test]
    fn postgres_integration_rollback_discards_writes() {
        let tenants = unique_tenants(1);
        let connector = create_connector(&tenants, TenancyMode::Schema);
        let (user, _) = provision(&connector);
        let resources = connector.resources();

        let scope = connector.session_scope(Some(tenants[0].as_str())).unwrap();
        let pk = resources
            .create(&user, &Fields::new().set("username", "a"), Binding::session(&scope))
            .unwrap();
        assert!(resources.exists(&user, pk, Binding::session(&scope)).unwrap());
        scope.rollback().unwrap();

        assert!(!resources
            .exists(&user, pk, Binding::tenant(&tenants[0]))
            .unwrap());
    }
}
