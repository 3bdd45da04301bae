//! Engines and the engine registry.
//!
//! An [`Engine`] is the live connection endpoint (a pool) for exactly one
//! [`ConnectionTarget`]. The [`EngineRegistry`] creates engines lazily and
//! caches them, guaranteeing that concurrent first requests for the same
//! target create a single engine.

mod driver;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::error::ConnectionError;
use crate::sql::Dialect;
use crate::target::{BackendKind, ConnectionTarget};

pub use driver::{Connection, ConnectionPool, Driver, EngineOptions};

struct EngineInner {
    id: Uuid,
    target: ConnectionTarget,
    pool: Box<dyn ConnectionPool>,
    created_at: DateTime<Utc>,
    disposed: AtomicBool,
}

/// A cached connection endpoint for one target.
///
/// Cloning is cheap; all clones share the same pool.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    fn new(target: ConnectionTarget, pool: Box<dyn ConnectionPool>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                id: Uuid::new_v4(),
                target,
                pool,
                created_at: Utc::now(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Unique id of this engine instance.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The target this engine connects to.
    pub fn target(&self) -> &ConnectionTarget {
        &self.inner.target
    }

    /// When the engine was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Returns `true` once the engine has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Returns `true` if both handles refer to the same engine instance.
    pub fn ptr_eq(&self, other: &Engine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn dialect(&self) -> Arc<dyn Dialect> {
        self.inner.pool.dialect()
    }

    pub(crate) fn acquire(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        if self.is_disposed() {
            return Err(ConnectionError::Disposed {
                target: self.inner.target.redacted(),
            });
        }
        self.inner.pool.acquire()
    }

    fn mark_disposed(&self) {
        self.inner.disposed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.inner.id)
            .field("target", &self.inner.target.redacted())
            .field("created_at", &self.inner.created_at)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

type EngineSlot = Arc<Mutex<Option<Engine>>>;

/// Lazily creates and caches one [`Engine`] per [`ConnectionTarget`].
///
/// Each target has its own creation lock, so a slow connect to one endpoint
/// never blocks lookups of another.
pub struct EngineRegistry {
    drivers: RwLock<HashMap<BackendKind, Arc<dyn Driver>>>,
    engines: Mutex<HashMap<ConnectionTarget, EngineSlot>>,
    options: EngineOptions,
    created: AtomicUsize,
}

impl EngineRegistry {
    /// Creates a registry with the drivers compiled into this crate.
    pub fn new(options: EngineOptions) -> Self {
        let registry = Self::without_drivers(options);
        #[cfg(feature = "sqlite")]
        registry.register_driver(Arc::new(crate::backends::sqlite::SqliteDriver::new()));
        #[cfg(feature = "postgres")]
        registry.register_driver(Arc::new(crate::backends::postgres::PostgresDriver::new()));
        registry
    }

    /// Creates a registry with no drivers registered.
    pub fn without_drivers(options: EngineOptions) -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
            engines: Mutex::new(HashMap::new()),
            options,
            created: AtomicUsize::new(0),
        }
    }

    /// Registers (or replaces) the driver for its backend kind.
    pub fn register_driver(&self, driver: Arc<dyn Driver>) {
        self.drivers.write().insert(driver.backend(), driver);
    }

    /// Returns `true` if a driver is registered for `backend`.
    pub fn has_driver(&self, backend: BackendKind) -> bool {
        self.drivers.read().contains_key(&backend)
    }

    /// Pool options used for new engines.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Returns the engine for `target`, creating it on first use.
    ///
    /// A failed connect leaves nothing cached; the next call tries again.
    pub fn get_engine(&self, target: &ConnectionTarget) -> Result<Engine, ConnectionError> {
        loop {
            let slot = {
                let mut engines = self.engines.lock();
                engines.entry(target.clone()).or_default().clone()
            };

            let mut guard = slot.lock();
            if let Some(engine) = guard.as_ref() {
                return Ok(engine.clone());
            }

            let engine = match self.connect(target) {
                Ok(engine) => engine,
                Err(err) => {
                    self.release_slot(target, &slot);
                    return Err(err);
                }
            };

            // A dispose that ran while connecting detached this slot.
            if !self.is_current(target, &slot) {
                Self::retire(&engine);
                continue;
            }
            *guard = Some(engine.clone());
            return Ok(engine);
        }
    }

    fn connect(&self, target: &ConnectionTarget) -> Result<Engine, ConnectionError> {
        let driver = self
            .drivers
            .read()
            .get(&target.backend())
            .cloned()
            .ok_or(ConnectionError::DriverUnavailable {
                backend: target.backend(),
            })?;

        let pool = driver.connect(target, &self.options)?;
        let engine = Engine::new(target.clone(), pool);
        self.created.fetch_add(1, Ordering::SeqCst);
        info!(
            engine_id = %engine.id(),
            target = %target.redacted(),
            "Created engine"
        );
        Ok(engine)
    }

    fn is_current(&self, target: &ConnectionTarget, slot: &EngineSlot) -> bool {
        self.engines
            .lock()
            .get(target)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Forgets an empty slot so failed targets do not accumulate.
    fn release_slot(&self, target: &ConnectionTarget, slot: &EngineSlot) {
        let mut engines = self.engines.lock();
        if engines
            .get(target)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            engines.remove(target);
        }
    }

    /// Disposes the engine for `target`. Returns `false` if none was cached.
    ///
    /// Sessions already open keep their connection; new sessions on a
    /// disposed engine fail with [`ConnectionError::Disposed`].
    pub fn dispose(&self, target: &ConnectionTarget) -> bool {
        let Some(slot) = self.engines.lock().remove(target) else {
            return false;
        };
        let engine = slot.lock().take();
        match engine {
            Some(engine) => {
                Self::retire(&engine);
                true
            }
            None => false,
        }
    }

    /// Disposes every cached engine. Returns how many were disposed.
    pub fn dispose_all(&self) -> usize {
        let slots: Vec<EngineSlot> = self.engines.lock().drain().map(|(_, s)| s).collect();
        let mut disposed = 0;
        for slot in slots {
            if let Some(engine) = slot.lock().take() {
                Self::retire(&engine);
                disposed += 1;
            }
        }
        disposed
    }

    fn retire(engine: &Engine) {
        engine.mark_disposed();
        info!(
            engine_id = %engine.id(),
            target = %engine.target().redacted(),
            "Disposed engine"
        );
    }

    /// Number of live cached engines.
    pub fn len(&self) -> usize {
        let slots: Vec<EngineSlot> = self.engines.lock().values().cloned().collect();
        slots.iter().filter(|s| s.lock().is_some()).count()
    }

    /// Returns `true` if no engines are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total engines ever created by this registry.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("drivers", &self.drivers.read().keys().collect::<Vec<_>>())
            .field("created", &self.created_count())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{FieldType, Value};
    use crate::error::ConnectorResult;
    use crate::sql::SqlParam;
    use crate::tenant::Namespace;
    use std::sync::{Barrier, mpsc};
    use std::thread;
    use std::time::Duration;

    struct NullDialect;

    impl Dialect for NullDialect {
        fn backend(&self) -> BackendKind {
            BackendKind::Mysql
        }
        fn placeholder(&self, _index: usize) -> String {
            "?".to_string()
        }
        fn default_schema(&self) -> Option<&str> {
            None
        }
        fn column_type(&self, _field_type: FieldType) -> &'static str {
            "TEXT"
        }
        fn primary_key_column(&self, name: &str) -> String {
            format!("{} SERIAL PRIMARY KEY", name)
        }
        fn qualify_references(&self) -> bool {
            true
        }
    }

    struct NullConnection;

    impl Connection for NullConnection {
        fn bind_namespace(&mut self, _namespace: &Namespace) -> ConnectorResult<()> {
            Ok(())
        }
        fn ensure_namespace(&mut self, _namespace: &Namespace) -> ConnectorResult<()> {
            Ok(())
        }
        fn create_database_if_absent(&mut self, _database: &str) -> ConnectorResult<()> {
            Ok(())
        }
        fn begin(&mut self) -> ConnectorResult<()> {
            Ok(())
        }
        fn commit(&mut self) -> ConnectorResult<()> {
            Ok(())
        }
        fn rollback(&mut self) -> ConnectorResult<()> {
            Ok(())
        }
        fn execute(&mut self, _sql: &str, _params: &[SqlParam]) -> ConnectorResult<u64> {
            Ok(0)
        }
        fn query(
            &mut self,
            _sql: &str,
            _params: &[SqlParam],
            _columns: &[FieldType],
        ) -> ConnectorResult<Vec<Vec<Value>>> {
            Ok(Vec::new())
        }
        fn execute_batch(&mut self, _sql: &str) -> ConnectorResult<()> {
            Ok(())
        }
    }

    struct NullPool;

    impl ConnectionPool for NullPool {
        fn dialect(&self) -> Arc<dyn Dialect> {
            Arc::new(NullDialect)
        }
        fn acquire(&self) -> Result<Box<dyn Connection>, ConnectionError> {
            Ok(Box::new(NullConnection))
        }
    }

    /// Slow driver so concurrent callers overlap inside `connect`.
    struct SlowDriver {
        connects: AtomicUsize,
        fail: bool,
    }

    impl Driver for SlowDriver {
        fn backend(&self) -> BackendKind {
            BackendKind::Mysql
        }
        fn connect(
            &self,
            target: &ConnectionTarget,
            _options: &EngineOptions,
        ) -> Result<Box<dyn ConnectionPool>, ConnectionError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            if self.fail {
                return Err(ConnectionError::Unreachable {
                    target: target.redacted(),
                    message: "refused".to_string(),
                });
            }
            Ok(Box::new(NullPool))
        }
    }

    fn target(db: &str) -> ConnectionTarget {
        ConnectionTarget::new(BackendKind::Mysql, "localhost", db).with_credentials(
            crate::target::Credentials::new("root", "topsecret"),
        )
    }

    fn registry(fail: bool) -> (Arc<EngineRegistry>, Arc<SlowDriver>) {
        let registry = Arc::new(EngineRegistry::without_drivers(EngineOptions::default()));
        let driver = Arc::new(SlowDriver {
            connects: AtomicUsize::new(0),
            fail,
        });
        registry.register_driver(driver.clone());
        (registry, driver)
    }

    #[test]
    fn test_get_engine_caches() {
        let (registry, driver) = registry(false);
        let a = registry.get_engine(&target("app")).unwrap();
        let b = registry.get_engine(&target("app")).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(registry.created_count(), 1);
        assert_eq!(driver.connects.load(Ordering::SeqCst), 1);

        let c = registry.get_engine(&target("other")).unwrap();
        assert!(!a.ptr_eq(&c));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_first_access_creates_once() {
        let (registry, driver) = registry(false);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_engine(&target("app")).unwrap()
                })
            })
            .collect();

        let engines: Vec<Engine> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(engines.iter().all(|e| e.ptr_eq(&engines[0])));
        assert_eq!(registry.created_count(), 1);
        assert_eq!(driver.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_driver() {
        let registry = EngineRegistry::without_drivers(EngineOptions::default());
        let err = registry.get_engine(&target("app")).unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::DriverUnavailable {
                backend: BackendKind::Mysql
            }
        ));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_failed_connect_is_not_cached_and_redacts() {
        let (registry, driver) = registry(true);
        let err = registry.get_engine(&target("app")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("localhost"));
        assert!(!message.contains("topsecret"));

        assert!(registry.get_engine(&target("app")).is_err());
        assert_eq!(driver.connects.load(Ordering::SeqCst), 2);
        assert_eq!(registry.created_count(), 0);
        assert!(registry.is_empty());
        assert!(registry.engines.lock().is_empty());
    }

    #[test]
    fn test_missing_driver_leaves_no_slot() {
        let registry = EngineRegistry::without_drivers(EngineOptions::default());
        for db in ["a", "b", "c"] {
            assert!(registry.get_engine(&target(db)).is_err());
        }
        assert!(registry.engines.lock().is_empty());
    }

    /// Blocks its first connect until released.
    struct GatedDriver {
        connects: AtomicUsize,
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Driver for GatedDriver {
        fn backend(&self) -> BackendKind {
            BackendKind::Mysql
        }
        fn connect(
            &self,
            _target: &ConnectionTarget,
            _options: &EngineOptions,
        ) -> Result<Box<dyn ConnectionPool>, ConnectionError> {
            if self.connects.fetch_add(1, Ordering::SeqCst) == 0 {
                self.started.lock().send(()).ok();
                self.release.lock().recv().ok();
            }
            Ok(Box::new(NullPool))
        }
    }

    #[test]
    fn test_dispose_all_during_connect_keeps_returned_engine_cached() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let registry = Arc::new(EngineRegistry::without_drivers(EngineOptions::default()));
        let driver = Arc::new(GatedDriver {
            connects: AtomicUsize::new(0),
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        registry.register_driver(driver.clone());

        let creator = {
            let registry = registry.clone();
            thread::spawn(move || registry.get_engine(&target("app")).unwrap())
        };
        started_rx.recv().unwrap();

        let disposer = {
            let registry = registry.clone();
            thread::spawn(move || registry.dispose_all())
        };
        while !registry.engines.lock().is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        release_tx.send(()).unwrap();

        let engine = creator.join().unwrap();
        assert_eq!(disposer.join().unwrap(), 0);
        assert!(!engine.is_disposed());
        assert!(registry.get_engine(&target("app")).unwrap().ptr_eq(&engine));
        assert_eq!(driver.connects.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dispose() {
        let (registry, _) = registry(false);
        let engine = registry.get_engine(&target("app")).unwrap();

        assert!(registry.dispose(&target("app")));
        assert!(!registry.dispose(&target("app")));
        assert!(engine.is_disposed());
        assert!(matches!(
            engine.acquire().err(),
            Some(ConnectionError::Disposed { .. })
        ));

        let fresh = registry.get_engine(&target("app")).unwrap();
        assert!(!fresh.ptr_eq(&engine));
        assert_eq!(registry.created_count(), 2);
    }

    #[test]
    fn test_dispose_all() {
        let (registry, _) = registry(false);
        registry.get_engine(&target("a")).unwrap();
        registry.get_engine(&target("b")).unwrap();
        assert_eq!(registry.dispose_all(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_engine_debug_redacts() {
        let (registry, _) = registry(false);
        let engine = registry.get_engine(&target("app")).unwrap();
        let debug = format!("{:?}", engine);
        assert!(!debug.contains("topsecret"));
        assert!(debug.contains("***"));
    }
}
