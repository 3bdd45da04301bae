//! Backend drivers.
//!
//! Each backend lives behind a feature flag:
//!
//! | Backend | Feature | Driver crate |
//! |---------|---------|--------------|
//! | SQLite | `sqlite` (default) | rusqlite + r2d2 |
//! | PostgreSQL | `postgres` | tokio-postgres + deadpool-postgres |
//!
//! MySQL is a recognised [`BackendKind`](crate::target::BackendKind) without a
//! bundled driver; register one with
//! [`EngineRegistry::register_driver`](crate::engine::EngineRegistry::register_driver).

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;
