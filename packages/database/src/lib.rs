//! Per-thread lazy database connections with merged nested transactions.
//!
//! A process builds one [`Engine`] (a connection factory) and every thread
//! that touches the database gets its own [`ThreadContext`]. Query functions
//! open a [`ConnectionScope`] around each statement, transaction functions open
//! a [`TransactionScope`], and both reuse whatever the calling thread already
//! has open, so nested calls share a single physical connection and a single
//! commit/rollback boundary.
//!
//! ```rust,ignore
//! use transwarp_database::{insert, params, select_one, update, with_transaction};
//!
//! transwarp_database::engine::init(transwarp_database::simulator::engine()?)?;
//!
//! with_transaction(|| {
//!     insert("user", &[("id", 1.into()), ("name", "Alice".into())])?;
//!     update("update user set name=? where id=?", params!["Bob", 1])?;
//!     Ok::<_, transwarp_database::DatabaseError>(())
//! })?;
//!
//! let user = select_one("select * from user where id=?", params![1])?;
//! ```

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub mod connection;
pub mod context;
pub mod engine;
pub mod id;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod query;
pub mod query_transform;
#[cfg(feature = "sqlite-rusqlite")]
pub mod rusqlite;
pub mod scope;
#[cfg(feature = "simulator")]
pub mod simulator;

use std::num::TryFromIntError;

use chrono::NaiveDateTime;
use thiserror::Error;

pub use connection::{Connection, Cursor, LazyConnection};
pub use context::{ThreadContext, with_connection, with_transaction};
pub use engine::Engine;
pub use query::{execute_raw, insert, select_all, select_int, select_one, select_scalar, update};
pub use query_transform::PlaceholderStyle;
pub use scope::{ConnectionScope, TransactionScope};

/// Builds a `&[DatabaseValue]` argument list from anything convertible into
/// a [`DatabaseValue`].
///
/// ```rust
/// use transwarp_database::{DatabaseValue, params};
///
/// let args = params![5, "alice", None::<i64>];
/// assert_eq!(args[1], DatabaseValue::String("alice".to_string()));
/// assert_eq!(args[2], DatabaseValue::Null);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        &[] as &[$crate::DatabaseValue]
    };
    ($($value:expr),+ $(,)?) => {
        &[$($crate::DatabaseValue::from($value)),+] as &[$crate::DatabaseValue]
    };
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    String(String),
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Real64(f64),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
}

impl DatabaseValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(value) => Some(*value),
            #[allow(clippy::cast_possible_wrap)]
            Self::UInt64(value) if *value <= i64::MAX as u64 => Some(*value as i64),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real64(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::Int64(0) | Self::UInt64(0) => Some(false),
            Self::Int64(1) | Self::UInt64(1) => Some(true),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(value) => Some(value),
            Self::String(value) => Some(value.as_bytes()),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(value) => Some(*value),
            _ => None,
        }
    }
}

impl<T: Into<Self>> From<Option<T>> for DatabaseValue {
    fn from(val: Option<T>) -> Self {
        val.map_or(Self::Null, std::convert::Into::into)
    }
}

impl From<bool> for DatabaseValue {
    fn from(val: bool) -> Self {
        Self::Bool(val)
    }
}

impl From<&str> for DatabaseValue {
    fn from(val: &str) -> Self {
        Self::String(val.to_string())
    }
}

impl From<&String> for DatabaseValue {
    fn from(val: &String) -> Self {
        Self::String(val.clone())
    }
}

impl From<String> for DatabaseValue {
    fn from(val: String) -> Self {
        Self::String(val)
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(val: Vec<u8>) -> Self {
        Self::Bytes(val)
    }
}

impl From<&[u8]> for DatabaseValue {
    fn from(val: &[u8]) -> Self {
        Self::Bytes(val.to_vec())
    }
}

impl From<f32> for DatabaseValue {
    fn from(val: f32) -> Self {
        Self::Real64(f64::from(val))
    }
}

impl From<f64> for DatabaseValue {
    fn from(val: f64) -> Self {
        Self::Real64(val)
    }
}

impl From<NaiveDateTime> for DatabaseValue {
    fn from(val: NaiveDateTime) -> Self {
        Self::DateTime(val)
    }
}

macro_rules! impl_from_signed {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for DatabaseValue {
                fn from(val: $ty) -> Self {
                    Self::Int64(i64::from(val))
                }
            }
        )+
    };
}

macro_rules! impl_from_unsigned {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for DatabaseValue {
                fn from(val: $ty) -> Self {
                    Self::UInt64(u64::from(val))
                }
            }
        )+
    };
}

impl_from_signed!(i8, i16, i32, i64);
impl_from_unsigned!(u8, u16, u32, u64);

impl From<isize> for DatabaseValue {
    fn from(val: isize) -> Self {
        Self::Int64(val as i64)
    }
}

impl From<usize> for DatabaseValue {
    fn from(val: usize) -> Self {
        Self::UInt64(val as u64)
    }
}

#[derive(Debug, Error)]
pub enum TryFromError {
    #[error("Could not convert to type '{0}'")]
    CouldNotConvert(String),
    #[error(transparent)]
    TryFromInt(#[from] TryFromIntError),
}

impl TryFrom<DatabaseValue> for i64 {
    type Error = TryFromError;

    fn try_from(value: DatabaseValue) -> Result<Self, Self::Error> {
        match value {
            DatabaseValue::Int64(value) => Ok(value),
            DatabaseValue::UInt64(value) => Ok(Self::try_from(value)?),
            _ => Err(TryFromError::CouldNotConvert("i64".into())),
        }
    }
}

impl TryFrom<DatabaseValue> for u64 {
    type Error = TryFromError;

    fn try_from(value: DatabaseValue) -> Result<Self, Self::Error> {
        match value {
            DatabaseValue::Int64(value) => Ok(Self::try_from(value)?),
            DatabaseValue::UInt64(value) => Ok(value),
            _ => Err(TryFromError::CouldNotConvert("u64".into())),
        }
    }
}

impl TryFrom<DatabaseValue> for i32 {
    type Error = TryFromError;

    fn try_from(value: DatabaseValue) -> Result<Self, Self::Error> {
        match value {
            DatabaseValue::Int64(value) => Ok(Self::try_from(value)?),
            DatabaseValue::UInt64(value) => Ok(Self::try_from(value)?),
            _ => Err(TryFromError::CouldNotConvert("i32".into())),
        }
    }
}

impl TryFrom<DatabaseValue> for f64 {
    type Error = TryFromError;

    fn try_from(value: DatabaseValue) -> Result<Self, Self::Error> {
        match value {
            DatabaseValue::Real64(value) => Ok(value),
            _ => Err(TryFromError::CouldNotConvert("f64".into())),
        }
    }
}

impl TryFrom<DatabaseValue> for bool {
    type Error = TryFromError;

    fn try_from(value: DatabaseValue) -> Result<Self, Self::Error> {
        value
            .as_bool()
            .ok_or_else(|| TryFromError::CouldNotConvert("bool".into()))
    }
}

impl TryFrom<DatabaseValue> for String {
    type Error = TryFromError;

    fn try_from(value: DatabaseValue) -> Result<Self, Self::Error> {
        match value {
            DatabaseValue::String(value) => Ok(value),
            DatabaseValue::Bytes(value) => {
                Self::from_utf8(value).map_err(|_| TryFromError::CouldNotConvert("String".into()))
            }
            _ => Err(TryFromError::CouldNotConvert("String".into())),
        }
    }
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[cfg(feature = "mysql")]
    #[error(transparent)]
    Mysql(#[from] ::mysql::Error),
    #[cfg(feature = "sqlite-rusqlite")]
    #[error(transparent)]
    Rusqlite(#[from] ::rusqlite::Error),
    #[error("Engine is already initialized")]
    EngineAlreadyInitialized,
    #[error("Engine is not initialized")]
    EngineNotInitialized,
    #[error("Thread context is already initialized")]
    ContextAlreadyInitialized,
    #[error("Thread context is not initialized")]
    NotInitialized,
    #[error("Expected only one column, got {0}")]
    MultiColumn(usize),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    TryFrom(#[from] TryFromError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A result record: column names mapped to values, in the order the driver
/// returned the columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub columns: Vec<(String, DatabaseValue)>,
}

impl Row {
    /// Builds a row from driver output. A repeated column name keeps the
    /// position of its first occurrence and the value of its last.
    #[must_use]
    pub fn from_columns(columns: impl IntoIterator<Item = (String, DatabaseValue)>) -> Self {
        let mut row = Self::default();
        for (name, value) in columns {
            row.insert(name, value);
        }
        row
    }

    fn insert(&mut self, name: String, value: DatabaseValue) {
        if let Some(existing) = self.columns.iter_mut().find(|(c, _)| *c == name) {
            existing.1 = value;
        } else {
            self.columns.push((name, value));
        }
    }

    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<DatabaseValue> {
        self.columns
            .iter()
            .find(|c| c.0 == column_name)
            .map(|c| c.1.clone())
    }

    #[must_use]
    pub fn id(&self) -> Option<DatabaseValue> {
        self.get("id")
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn into_values(self) -> Vec<DatabaseValue> {
        self.columns.into_iter().map(|(_, value)| value).collect()
    }
}
