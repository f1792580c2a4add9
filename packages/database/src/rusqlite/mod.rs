//! `SQLite` backend over `rusqlite`.
//!
//! `SQLite` has no session-level "autocommit off" switch, so the connection
//! opens a write transaction (`BEGIN IMMEDIATE`) right before the first
//! statement that may write and keeps it open until
//! [`crate::Connection::commit`] or [`crate::Connection::rollback`]. Reads
//! outside of a pending write see the latest committed data. Closing a
//! connection with a pending write discards it.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use rusqlite::{Statement, types::Value};

use crate::{DatabaseError, DatabaseValue, Engine, PlaceholderStyle, Row, TryFromError};

/// How long a writer waits on another connection's lock before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug)]
pub struct RusqliteConnection {
    connection: rusqlite::Connection,
}

impl RusqliteConnection {
    /// Opens (creating if missing) the database file at `path`. `":memory:"`
    /// opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// * If the file can't be opened as a `SQLite` database
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let connection = rusqlite::Connection::open(path)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { connection })
    }

    /// Whether a write transaction is currently pending.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        !self.connection.is_autocommit()
    }

    fn prepare(&self, sql: &str, params: &[DatabaseValue]) -> Result<Statement<'_>, DatabaseError> {
        let mut statement = self.connection.prepare(sql)?;
        if !statement.readonly() && self.connection.is_autocommit() {
            log::trace!("BEGIN IMMEDIATE");
            self.connection.execute_batch("BEGIN IMMEDIATE")?;
        }
        bind_values(&mut statement, params)?;
        Ok(statement)
    }
}

impl crate::Connection for RusqliteConnection {
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::NumberedQuestionMark
    }

    fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>, DatabaseError> {
        let mut statement = self.prepare(sql, params)?;
        let column_names = statement
            .column_names()
            .into_iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        let mut rows = statement.raw_query();
        let mut results = vec![];

        while let Some(row) = rows.next()? {
            let mut columns = Vec::with_capacity(column_names.len());
            for (i, name) in column_names.iter().enumerate() {
                columns.push((name.clone(), row.get::<_, Value>(i)?.into()));
            }
            results.push(Row::from_columns(columns));
        }

        log::trace!(
            "Got {} row{}",
            results.len(),
            if results.len() == 1 { "" } else { "s" }
        );

        Ok(results)
    }

    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64, DatabaseError> {
        let mut statement = self.prepare(sql, params)?;
        let affected = statement.raw_execute()?;
        Ok(affected as u64)
    }

    fn commit(&mut self) -> Result<(), DatabaseError> {
        if self.in_transaction() {
            self.connection.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DatabaseError> {
        if self.in_transaction() {
            self.connection.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        self.connection.close().map_err(|(_, e)| e.into())
    }
}

impl From<Value> for DatabaseValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Integer(value) => Self::Int64(value),
            Value::Real(value) => Self::Real64(value),
            Value::Text(value) => Self::String(value),
            Value::Blob(value) => Self::Bytes(value),
        }
    }
}

fn bind_values(statement: &mut Statement<'_>, values: &[DatabaseValue]) -> Result<(), DatabaseError> {
    for (i, value) in values.iter().enumerate() {
        let i = i + 1;
        match value {
            DatabaseValue::Null => statement.raw_bind_parameter(i, rusqlite::types::Null)?,
            DatabaseValue::String(value) => statement.raw_bind_parameter(i, value)?,
            DatabaseValue::Bool(value) => statement.raw_bind_parameter(i, i32::from(*value))?,
            DatabaseValue::Int64(value) => statement.raw_bind_parameter(i, value)?,
            DatabaseValue::UInt64(value) => {
                let signed = i64::try_from(*value).map_err(TryFromError::from)?;
                statement.raw_bind_parameter(i, signed)?;
            }
            DatabaseValue::Real64(value) => statement.raw_bind_parameter(i, value)?,
            DatabaseValue::Bytes(value) => statement.raw_bind_parameter(i, value)?,
            DatabaseValue::DateTime(value) => {
                statement.raw_bind_parameter(i, value.format(DATETIME_FORMAT).to_string())?;
            }
        }
    }
    Ok(())
}

/// An [`Engine`] opening a new connection to the database file at `path`
/// for every connect request.
#[must_use]
pub fn engine(path: impl Into<PathBuf>) -> Engine {
    let path = path.into();
    log::debug!("sqlite engine on {}", path.display());
    Engine::new(move || {
        Ok(Box::new(RusqliteConnection::open(&path)?) as Box<dyn crate::Connection>)
    })
}
