//! Per-thread connection state.
//!
//! A [`ThreadContext`] owns at most one [`LazyConnection`] and the depth of
//! the transaction scopes currently open on it. It is `!Sync`: code either
//! keeps one per worker and passes it by reference, or uses the free
//! functions of this crate, which go through a `thread_local!` context bound
//! to the engine installed with [`crate::engine::init`].

use std::{
    cell::{Cell, OnceCell, RefCell},
    sync::Arc,
};

use crate::{
    ConnectionScope, Cursor, DatabaseError, DatabaseValue, Engine, LazyConnection,
    TransactionScope,
};

thread_local! {
    static CONTEXT: OnceCell<ThreadContext> = const { OnceCell::new() };
}

#[derive(Debug)]
pub struct ThreadContext {
    engine: Arc<Engine>,
    connection: RefCell<Option<LazyConnection>>,
    transactions: Cell<usize>,
}

impl ThreadContext {
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        log::trace!("open thread context on engine <{}>", engine.id());
        Self {
            engine,
            connection: RefCell::new(None),
            transactions: Cell::new(0),
        }
    }

    #[must_use]
    pub const fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.connection.borrow().is_some()
    }

    /// Number of transaction scopes currently open on this context.
    #[must_use]
    pub fn transactions(&self) -> usize {
        self.transactions.get()
    }

    pub(crate) fn set_transactions(&self, depth: usize) {
        self.transactions.set(depth);
    }

    /// Attaches a fresh, not yet connected [`LazyConnection`] and resets the
    /// transaction depth.
    ///
    /// # Errors
    ///
    /// * [`DatabaseError::ContextAlreadyInitialized`] if a connection is already attached
    pub fn init(&self) -> Result<(), DatabaseError> {
        if self.attach() {
            Ok(())
        } else {
            Err(DatabaseError::ContextAlreadyInitialized)
        }
    }

    /// Attaches a connection unless one is already attached. Returns whether
    /// this call attached it.
    pub(crate) fn attach(&self) -> bool {
        let mut connection = self.connection.borrow_mut();
        if connection.is_some() {
            return false;
        }
        log::trace!("open lazy connection...");
        *connection = Some(LazyConnection::new(self.engine.clone()));
        self.transactions.set(0);
        true
    }

    /// Closes and detaches the connection.
    ///
    /// # Errors
    ///
    /// * [`DatabaseError::NotInitialized`] if no connection is attached
    /// * If the driver fails to close the physical connection
    pub fn cleanup(&self) -> Result<(), DatabaseError> {
        let mut connection = self
            .connection
            .borrow_mut()
            .take()
            .ok_or(DatabaseError::NotInitialized)?;
        self.transactions.set(0);
        connection.cleanup()
    }

    /// Runs `f` with a cursor on this thread's connection, connecting first
    /// if needed.
    ///
    /// # Errors
    ///
    /// * [`DatabaseError::NotInitialized`] if called outside of a scope
    /// * If connecting fails, or whatever `f` returns
    pub fn with_cursor<T>(
        &self,
        f: impl FnOnce(&mut Cursor<'_>) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let mut connection = self.connection.borrow_mut();
        let connection = connection.as_mut().ok_or(DatabaseError::NotInitialized)?;
        f(&mut connection.cursor()?)
    }

    /// # Errors
    ///
    /// * [`DatabaseError::NotInitialized`] if called outside of a scope
    /// * If the driver rejects the commit
    pub fn commit(&self) -> Result<(), DatabaseError> {
        self.connection
            .borrow_mut()
            .as_mut()
            .ok_or(DatabaseError::NotInitialized)?
            .commit()
    }

    /// # Errors
    ///
    /// * [`DatabaseError::NotInitialized`] if called outside of a scope
    /// * If the driver fails to roll back
    pub fn rollback(&self) -> Result<(), DatabaseError> {
        self.connection
            .borrow_mut()
            .as_mut()
            .ok_or(DatabaseError::NotInitialized)?
            .rollback()
    }

    /// Enters a [`ConnectionScope`] on this context.
    #[must_use]
    pub fn connection(&self) -> ConnectionScope<'_> {
        ConnectionScope::enter(self)
    }

    /// Enters a [`TransactionScope`] on this context.
    #[must_use]
    pub fn transaction(&self) -> TransactionScope<'_> {
        TransactionScope::enter(self)
    }

    /// Runs `f` with a connection available, closing it afterwards only if
    /// this call opened it.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        let scope = self.connection();
        let value = f(self);
        if let Err(e) = scope.release() {
            log::error!("Failed to close connection: {e:?}");
        }
        value
    }

    /// Runs `f` inside a transaction. Nested calls join the outermost
    /// transaction, which commits if its closure returns `Ok` and rolls back
    /// if it returns `Err` (or panics).
    ///
    /// # Errors
    ///
    /// * Whatever `f` returns
    /// * If the outermost commit fails (after a rollback attempt)
    /// * If the outermost rollback fails
    pub fn with_transaction<T, E: From<DatabaseError> + std::fmt::Debug>(
        &self,
        f: impl FnOnce(&Self) -> Result<T, E>,
    ) -> Result<T, E> {
        let scope = self.transaction();
        match f(self) {
            Ok(value) => {
                scope.complete()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = scope.abort() {
                    log::error!("rollback failed: {rollback_error}. block error was: {e:?}");
                    return Err(rollback_error.into());
                }
                Err(e)
            }
        }
    }

    /// Runs `sql` as-is on the active connection: no placeholder translation
    /// and no auto-commit.
    ///
    /// # Errors
    ///
    /// * [`DatabaseError::NotInitialized`] if called outside of a scope
    /// * If the driver fails to run the statement
    pub fn execute_raw(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64, DatabaseError> {
        self.with_cursor(|cursor| cursor.execute(sql, params))
    }
}

/// Runs `f` with this thread's context, creating it on first use.
///
/// # Errors
///
/// * [`DatabaseError::EngineNotInitialized`] if [`crate::engine::init`] was never called
pub fn current<T>(f: impl FnOnce(&ThreadContext) -> T) -> Result<T, DatabaseError> {
    let engine = crate::engine::get().ok_or(DatabaseError::EngineNotInitialized)?;
    Ok(CONTEXT.with(|context| f(context.get_or_init(|| ThreadContext::new(engine)))))
}

/// [`ThreadContext::with_connection`] on this thread's context.
///
/// # Errors
///
/// * [`DatabaseError::EngineNotInitialized`] if no engine was installed
pub fn with_connection<T>(f: impl FnOnce() -> T) -> Result<T, DatabaseError> {
    current(|context| context.with_connection(|_| f()))
}

/// [`ThreadContext::with_transaction`] on this thread's context.
///
/// # Errors
///
/// * [`DatabaseError::EngineNotInitialized`] if no engine was installed
/// * Whatever `f` returns, or the commit/rollback failure
pub fn with_transaction<T, E: From<DatabaseError> + std::fmt::Debug>(
    f: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    current(|context| context.with_transaction(|_| f()))?
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::connection::tests::{Event, recording_engine};

    #[test_log::test]
    fn init_and_cleanup_follow_preconditions() {
        let (engine, _events) = recording_engine(false, vec![]);
        let context = ThreadContext::new(engine);

        assert!(!context.is_initialized());
        assert!(matches!(
            context.cleanup(),
            Err(DatabaseError::NotInitialized)
        ));

        context.init().unwrap();
        assert!(context.is_initialized());
        assert!(matches!(
            context.init(),
            Err(DatabaseError::ContextAlreadyInitialized)
        ));

        context.cleanup().unwrap();
        assert!(!context.is_initialized());
    }

    #[test_log::test]
    fn cursor_outside_scope_fails() {
        let (engine, events) = recording_engine(false, vec![]);
        let context = ThreadContext::new(engine);

        let result = context.with_cursor(|cursor| cursor.execute("select 1", &[]));

        assert!(matches!(result, Err(DatabaseError::NotInitialized)));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test_log::test]
    fn cleanup_closes_opened_connection() {
        let (engine, events) = recording_engine(false, vec![]);
        let context = ThreadContext::new(engine);

        context.init().unwrap();
        context.execute_raw("create table t (id int)", &[]).unwrap();
        context.cleanup().unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                Event::Connect,
                Event::Execute("create table t (id int)".into()),
                Event::Close
            ]
        );
    }

    #[test_log::test]
    fn with_connection_passes_value_through() {
        let (engine, events) = recording_engine(false, vec![]);
        let context = ThreadContext::new(engine);

        let value = context.with_connection(|context| {
            assert!(context.is_initialized());
            42
        });

        assert_eq!(value, 42);
        assert!(!context.is_initialized());
        // nothing ran, so nothing connected
        assert!(events.lock().unwrap().is_empty());
    }

    #[test_log::test]
    fn attach_reports_whether_it_attached() {
        let (engine, _events) = recording_engine(false, vec![]);
        let context = ThreadContext::new(engine);

        assert!(context.attach());
        assert!(!context.attach());
        assert!(matches!(
            context.init(),
            Err(DatabaseError::ContextAlreadyInitialized)
        ));
        context.cleanup().unwrap();
        assert!(context.attach());
    }
}
