//! Sessions and session scopes.
//!
//! A [`Session`] is one unit of work: a connection checked out of an
//! [`Engine`], bound to one [`Namespace`] for its whole life, with an open
//! transaction. Sessions are only handed out through a [`SessionScope`],
//! which guarantees that the transaction ends exactly once (commit or
//! rollback) and that the connection is released exactly once, however
//! control leaves the scope: normal return, error, early drop or panic.
//!
//! # Thread Safety
//!
//! `Session` is `Send` but not `Sync`. A session may move to another thread
//! together with its scope, but it can never be shared by two threads at the
//! same time; concurrent callers each open their own scope.
//!
//! # Examples
//!
//! ```no_run
//! use helios_connector::{Connector, ConnectorConfig};
//!
//! let connector = Connector::new(ConnectorConfig::default())?;
//!
//! // Closure form: commit on Ok, roll back on Err.
//! connector.with_scope(None, |session| {
//!     session.execute_batch("CREATE TABLE IF NOT EXISTS main.t (x INTEGER)")
//! })?;
//!
//! // Guard form: dropping without commit rolls back.
//! let scope = connector.session_scope(None)?;
//! scope.execute_batch("INSERT INTO main.t (x) VALUES (1)")?;
//! scope.commit()?;
//! # Ok::<(), helios_connector::ConnectorError>(())
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::{Connection, Engine};
use crate::entity::{FieldType, Value};
use crate::error::{ConnectorError, ConnectorResult, SessionError};
use crate::sql::{Dialect, SqlParam};
use crate::tenant::Namespace;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transaction open.
    Active,
    /// Committed and released.
    Committed,
    /// Rolled back and released.
    RolledBack,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Active => write!(f, "active"),
            SessionState::Committed => write!(f, "committed"),
            SessionState::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// A unit of work bound to one engine and one namespace.
pub struct Session {
    id: Uuid,
    engine: Engine,
    namespace: Namespace,
    dialect: Arc<dyn Dialect>,
    conn: RefCell<Option<Box<dyn Connection>>>,
    state: Cell<SessionState>,
}

impl Session {
    fn open(engine: Engine, namespace: Namespace) -> ConnectorResult<Self> {
        let mut conn = engine.acquire()?;
        conn.bind_namespace(&namespace)?;
        conn.begin()?;

        let session = Self {
            id: Uuid::new_v4(),
            dialect: engine.dialect(),
            engine,
            namespace,
            conn: RefCell::new(Some(conn)),
            state: Cell::new(SessionState::Active),
        };
        debug!(session_id = %session.id, namespace = %session.namespace, "Opened session");
        Ok(session)
    }

    /// Unique id of this session.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The namespace every statement of this session runs in.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The engine the session's connection came from.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Returns `true` while the transaction is open.
    pub fn is_active(&self) -> bool {
        self.state.get() == SessionState::Active && self.conn.borrow().is_some()
    }

    /// Runs raw SQL inside this session's transaction.
    ///
    /// Names are not rewritten for the namespace; qualify them yourself.
    pub fn execute_batch(&self, sql: &str) -> ConnectorResult<()> {
        self.with_conn(|conn| conn.execute_batch(sql))
    }

    pub(crate) fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub(crate) fn execute(&self, sql: &str, params: &[SqlParam]) -> ConnectorResult<u64> {
        debug!(session_id = %self.id, sql, "Executing statement");
        self.with_conn(|conn| conn.execute(sql, params))
    }

    pub(crate) fn query(
        &self,
        sql: &str,
        params: &[SqlParam],
        columns: &[FieldType],
    ) -> ConnectorResult<Vec<Vec<Value>>> {
        debug!(session_id = %self.id, sql, "Running query");
        self.with_conn(|conn| conn.query(sql, params, columns))
    }

    pub(crate) fn ensure_namespace(&self) -> ConnectorResult<()> {
        let namespace = &self.namespace;
        self.with_conn(|conn| conn.ensure_namespace(namespace))
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut dyn Connection) -> ConnectorResult<T>,
    ) -> ConnectorResult<T> {
        let mut slot = self.conn.borrow_mut();
        match slot.as_mut() {
            Some(conn) if self.state.get() == SessionState::Active => f(conn.as_mut()),
            _ => Err(self.inactive()),
        }
    }

    fn inactive(&self) -> ConnectorError {
        SessionError::Inactive {
            session_id: self.id.to_string(),
            state: self.state.get().to_string(),
        }
        .into()
    }

    fn commit(&self) -> ConnectorResult<()> {
        self.with_conn(|conn| conn.commit())?;
        self.state.set(SessionState::Committed);
        debug!(session_id = %self.id, namespace = %self.namespace, "Committed session");
        Ok(())
    }

    fn rollback(&self) -> ConnectorResult<()> {
        let result = self.with_conn(|conn| conn.rollback());
        // A failed rollback still ends the unit of work.
        self.state.set(SessionState::RolledBack);
        debug!(session_id = %self.id, namespace = %self.namespace, "Rolled back session");
        result
    }

    fn close(&self) {
        if self.conn.borrow_mut().take().is_some() {
            debug!(session_id = %self.id, "Closed session");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("engine_id", &self.engine.id())
            .field("namespace", &self.namespace.to_string())
            .field("state", &self.state.get())
            .finish()
    }
}

/// Scoped ownership of a [`Session`].
///
/// Ends the session's transaction exactly once and always releases its
/// connection. [`commit`](Self::commit) and [`rollback`](Self::rollback)
/// consume the scope; dropping an unfinished scope rolls back.
pub struct SessionScope {
    session: Session,
    finished: bool,
}

impl SessionScope {
    /// Opens a session on `engine` bound to `namespace`.
    pub(crate) fn open(engine: Engine, namespace: Namespace) -> ConnectorResult<Self> {
        Ok(Self {
            session: Session::open(engine, namespace)?,
            finished: false,
        })
    }

    /// The scoped session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Commits and releases the session.
    ///
    /// If the commit fails the transaction is rolled back and the commit
    /// error is returned.
    pub fn commit(mut self) -> ConnectorResult<()> {
        self.finished = true;
        let result = self.session.commit();
        if let Err(ref err) = result {
            warn!(session_id = %self.session.id, error = %err, "Commit failed, rolling back");
            if let Err(rollback_err) = self.session.rollback() {
                warn!(session_id = %self.session.id, error = %rollback_err, "Rollback after failed commit failed");
            }
        }
        self.session.close();
        result
    }

    /// Rolls back and releases the session.
    pub fn rollback(mut self) -> ConnectorResult<()> {
        self.finished = true;
        let result = self.session.rollback();
        self.session.close();
        result
    }

    /// Runs `f` with the session, committing on `Ok` and rolling back on
    /// `Err`.
    ///
    /// The error returned by `f` is passed through unchanged; a failing
    /// rollback is logged but never replaces it.
    pub fn run<T, E, F>(self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E>,
        E: From<ConnectorError>,
    {
        match f(&self.session) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                let session_id = self.session.id;
                if let Err(rollback_err) = self.rollback() {
                    warn!(%session_id, error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

impl Deref for SessionScope {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.session.is_active() {
            warn!(
                session_id = %self.session.id,
                namespace = %self.session.namespace,
                "Session scope dropped without commit, rolling back"
            );
            if let Err(err) = self.session.rollback() {
                warn!(session_id = %self.session.id, error = %err, "Rollback failed");
            }
        }
        self.session.close();
    }
}

impl fmt::Debug for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionScope")
            .field("session", &self.session)
            .field("finished", &self.finished)
            .finish()
    }
}
