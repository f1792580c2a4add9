//! Physical connections, the lazy wrapper that opens them on demand, and the
//! cursor statements run through.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{DatabaseError, DatabaseValue, Engine, PlaceholderStyle, Row};

const SLOW_STATEMENT: Duration = Duration::from_millis(100);

/// A driver-level connection.
///
/// Implementations must not auto-commit: every statement stays part of the
/// pending transaction until [`Connection::commit`] or
/// [`Connection::rollback`] is called.
pub trait Connection: Send + std::fmt::Debug {
    /// Marker the driver expects for positional parameters.
    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Runs a statement that produces rows.
    ///
    /// # Errors
    ///
    /// * If the driver fails to prepare or run the statement
    fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>, DatabaseError>;

    /// Runs a statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// * If the driver fails to prepare or run the statement
    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64, DatabaseError>;

    /// # Errors
    ///
    /// * If the driver rejects the commit (e.g. a deferred constraint violation)
    fn commit(&mut self) -> Result<(), DatabaseError>;

    /// # Errors
    ///
    /// * If the driver fails to roll back
    fn rollback(&mut self) -> Result<(), DatabaseError>;

    /// # Errors
    ///
    /// * If the driver fails to close the connection cleanly
    fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        Ok(())
    }
}

/// Borrow of an open physical connection used to run statements.
///
/// SQL handed to a cursor must already use the driver's own placeholders.
pub struct Cursor<'a> {
    connection: &'a mut dyn Connection,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(connection: &'a mut dyn Connection) -> Self {
        Self { connection }
    }

    #[must_use]
    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.connection.placeholder_style()
    }

    /// # Errors
    ///
    /// * If the driver fails to run the statement
    pub fn fetch_all(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Vec<Row>, DatabaseError> {
        log::debug!("SQL: {sql}, ARGS: {params:?}");
        let start = Instant::now();
        let result = self.connection.query(sql, params);
        profile(start, sql);
        result
    }

    /// # Errors
    ///
    /// * If the driver fails to run the statement
    pub fn fetch_one(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Option<Row>, DatabaseError> {
        Ok(self.fetch_all(sql, params)?.into_iter().next())
    }

    /// # Errors
    ///
    /// * If the driver fails to run the statement
    pub fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64, DatabaseError> {
        log::debug!("SQL: {sql}, ARGS: {params:?}");
        let start = Instant::now();
        let result = self.connection.execute(sql, params);
        profile(start, sql);
        result
    }
}

fn profile(start: Instant, sql: &str) {
    let elapsed = start.elapsed();
    if elapsed > SLOW_STATEMENT {
        log::warn!("[PROFILING] [DB] {elapsed:?}: {sql}");
    } else {
        log::debug!("[PROFILING] [DB] {elapsed:?}: {sql}");
    }
}

/// Wraps at most one physical connection, opened through the [`Engine`] the
/// first time a cursor is requested.
#[derive(Debug)]
pub struct LazyConnection {
    engine: Arc<Engine>,
    connection: Option<Box<dyn Connection>>,
}

impl LazyConnection {
    #[must_use]
    pub const fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            connection: None,
        }
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Returns a cursor, connecting first if this is the first request.
    ///
    /// # Errors
    ///
    /// * If the engine fails to open the physical connection
    pub fn cursor(&mut self) -> Result<Cursor<'_>, DatabaseError> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                let connection = self.engine.connect()?;
                log::info!(
                    "[CONNECTION] [OPEN] connection {:p} (engine <{}>)",
                    &*connection,
                    self.engine.id()
                );
                connection
            }
        };

        Ok(Cursor::new(self.connection.insert(connection).as_mut()))
    }

    /// Commits the pending transaction. Nothing is pending if no cursor was
    /// ever handed out, so that case is a no-op.
    ///
    /// # Errors
    ///
    /// * If the driver rejects the commit
    pub fn commit(&mut self) -> Result<(), DatabaseError> {
        match &mut self.connection {
            Some(connection) => connection.commit(),
            None => {
                log::trace!("commit: connection never opened");
                Ok(())
            }
        }
    }

    /// # Errors
    ///
    /// * If the driver fails to roll back
    pub fn rollback(&mut self) -> Result<(), DatabaseError> {
        match &mut self.connection {
            Some(connection) => connection.rollback(),
            None => {
                log::trace!("rollback: connection never opened");
                Ok(())
            }
        }
    }

    /// Closes the physical connection if one was opened. Safe to call again.
    ///
    /// # Errors
    ///
    /// * If the driver fails to close the connection cleanly
    pub fn cleanup(&mut self) -> Result<(), DatabaseError> {
        if let Some(connection) = self.connection.take() {
            log::info!("[CONNECTION] [CLOSE] connection {:p}", &*connection);
            connection.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Event {
        Connect,
        Query(String),
        Execute(String),
        Commit,
        Rollback,
        Close,
    }

    /// Which operations of a [`RecordingConnection`] fail.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Failures {
        pub statement: bool,
        pub commit: bool,
        pub rollback: bool,
        pub close: bool,
    }

    /// Records everything done to it; each operation fails with
    /// `"<operation> failed"` while its switch in `failures` is set.
    #[derive(Debug)]
    pub struct RecordingConnection {
        pub events: Arc<Mutex<Vec<Event>>>,
        pub failures: Failures,
        pub rows: Vec<Row>,
    }

    fn outcome(fail: bool, operation: &str) -> Result<(), DatabaseError> {
        if fail {
            return Err(DatabaseError::InvalidRequest(format!("{operation} failed")));
        }
        Ok(())
    }

    impl Connection for RecordingConnection {
        fn placeholder_style(&self) -> PlaceholderStyle {
            PlaceholderStyle::DollarNumber
        }

        fn query(
            &mut self,
            sql: &str,
            _params: &[DatabaseValue],
        ) -> Result<Vec<Row>, DatabaseError> {
            self.events.lock().unwrap().push(Event::Query(sql.to_string()));
            outcome(self.failures.statement, "statement")?;
            Ok(self.rows.clone())
        }

        fn execute(&mut self, sql: &str, _params: &[DatabaseValue]) -> Result<u64, DatabaseError> {
            self.events.lock().unwrap().push(Event::Execute(sql.to_string()));
            outcome(self.failures.statement, "statement")?;
            Ok(1)
        }

        fn commit(&mut self) -> Result<(), DatabaseError> {
            self.events.lock().unwrap().push(Event::Commit);
            outcome(self.failures.commit, "commit")
        }

        fn rollback(&mut self) -> Result<(), DatabaseError> {
            self.events.lock().unwrap().push(Event::Rollback);
            outcome(self.failures.rollback, "rollback")
        }

        fn close(self: Box<Self>) -> Result<(), DatabaseError> {
            self.events.lock().unwrap().push(Event::Close);
            outcome(self.failures.close, "close")
        }
    }

    /// An engine whose connections record into the returned event log.
    pub fn recording_engine(
        fail_commit: bool,
        rows: Vec<Row>,
    ) -> (Arc<Engine>, Arc<Mutex<Vec<Event>>>) {
        failing_engine(
            Failures {
                commit: fail_commit,
                ..Failures::default()
            },
            rows,
        )
    }

    /// [`recording_engine`] with any set of operations failing.
    pub fn failing_engine(
        failures: Failures,
        rows: Vec<Row>,
    ) -> (Arc<Engine>, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(vec![]));
        let log = events.clone();
        let engine = Engine::new(move || {
            log.lock().unwrap().push(Event::Connect);
            Ok(Box::new(RecordingConnection {
                events: log.clone(),
                failures,
                rows: rows.clone(),
            }))
        });
        (Arc::new(engine), events)
    }

    #[test_log::test]
    fn cursor_connects_once() {
        let (engine, events) = recording_engine(false, vec![]);
        let mut connection = LazyConnection::new(engine);

        assert!(!connection.is_connected());
        connection.cursor().unwrap().execute("a", &[]).unwrap();
        connection.cursor().unwrap().execute("b", &[]).unwrap();
        assert!(connection.is_connected());

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                Event::Connect,
                Event::Execute("a".into()),
                Event::Execute("b".into())
            ]
        );
    }

    #[test_log::test]
    fn commit_and_rollback_without_connection_are_noops() {
        let (engine, events) = recording_engine(false, vec![]);
        let mut connection = LazyConnection::new(engine);

        connection.commit().unwrap();
        connection.rollback().unwrap();

        assert!(events.lock().unwrap().is_empty());
    }

    #[test_log::test]
    fn cleanup_is_idempotent() {
        let (engine, events) = recording_engine(false, vec![]);
        let mut connection = LazyConnection::new(engine);

        connection.cursor().unwrap();
        connection.cleanup().unwrap();
        connection.cleanup().unwrap();

        assert!(!connection.is_connected());
        assert_eq!(*events.lock().unwrap(), vec![Event::Connect, Event::Close]);
    }

    #[test_log::test]
    fn failed_connect_leaves_connection_unopened() {
        let engine = Arc::new(Engine::new(|| {
            Err(DatabaseError::InvalidRequest("refused".into()))
        }));
        let mut connection = LazyConnection::new(engine);

        assert!(connection.cursor().is_err());
        assert!(!connection.is_connected());
    }

    #[test_log::test]
    fn fetch_one_returns_first_row() {
        let rows = vec![
            Row::from_columns([("id".to_string(), DatabaseValue::Int64(1))]),
            Row::from_columns([("id".to_string(), DatabaseValue::Int64(2))]),
        ];
        let (engine, _events) = recording_engine(false, rows);
        let mut connection = LazyConnection::new(engine);

        let row = connection.cursor().unwrap().fetch_one("select", &[]).unwrap();

        assert_eq!(row.and_then(|r| r.id()), Some(DatabaseValue::Int64(1)));
    }
}
