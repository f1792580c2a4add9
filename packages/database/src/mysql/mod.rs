//! `MySQL` backend over the synchronous `mysql` driver.
//!
//! Every session is opened with `autocommit=0`, so statements accumulate in
//! an implicit transaction until the owning scope commits or rolls back.

use chrono::{Datelike as _, NaiveDate, NaiveDateTime, Timelike as _};
use mysql::{Conn, Opts, OptsBuilder, Params, Value, prelude::Queryable as _};

use crate::{DatabaseError, DatabaseValue, Engine, PlaceholderStyle, Row, TryFromError};

pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_CHARSET: &str = "utf8";
pub const DEFAULT_COLLATION: &str = "utf8_general_ci";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub charset: String,
    pub collation: String,
    /// Extra statements run on every new session, after the charset and
    /// autocommit setup.
    pub init: Vec<String>,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            charset: DEFAULT_CHARSET.to_string(),
            collation: DEFAULT_COLLATION.to_string(),
            init: vec![],
        }
    }
}

impl MysqlConfig {
    /// Statements every new session runs before it is handed out.
    #[must_use]
    pub fn init_statements(&self) -> Vec<String> {
        let mut statements = vec![
            format!("SET NAMES {} COLLATE {}", self.charset, self.collation),
            "SET autocommit=0".to_string(),
        ];
        statements.extend(self.init.iter().cloned());
        statements
    }

    #[must_use]
    pub fn opts(&self) -> Opts {
        OptsBuilder::new()
            .ip_or_hostname(Some(self.host.clone()))
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(Some(self.password.clone()))
            .db_name(Some(self.database.clone()).filter(|name| !name.is_empty()))
            .init(self.init_statements())
            .into()
    }
}

pub struct MysqlConnection {
    connection: Conn,
}

impl std::fmt::Debug for MysqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlConnection")
            .field("connection_id", &self.connection.connection_id())
            .finish()
    }
}

impl MysqlConnection {
    /// # Errors
    ///
    /// * If the server can't be reached or rejects the session setup
    pub fn connect(opts: Opts) -> Result<Self, DatabaseError> {
        Ok(Self {
            connection: Conn::new(opts)?,
        })
    }
}

impl crate::Connection for MysqlConnection {
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }

    fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>, DatabaseError> {
        let result = self.connection.exec_iter(sql, to_params(params)?)?;
        let mut rows = vec![];

        for row in result {
            let mut row = row?;
            let names = row
                .columns_ref()
                .iter()
                .map(|column| column.name_str().into_owned())
                .collect::<Vec<_>>();
            let columns = names
                .into_iter()
                .enumerate()
                .map(|(i, name)| {
                    let value = row.take::<Value, usize>(i).unwrap_or(Value::NULL);
                    (name, value.into())
                })
                .collect::<Vec<_>>();
            rows.push(Row::from_columns(columns));
        }

        log::trace!(
            "Got {} row{}",
            rows.len(),
            if rows.len() == 1 { "" } else { "s" }
        );

        Ok(rows)
    }

    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64, DatabaseError> {
        self.connection.exec_drop(sql, to_params(params)?)?;
        Ok(self.connection.affected_rows())
    }

    fn commit(&mut self) -> Result<(), DatabaseError> {
        self.connection.query_drop("COMMIT").map_err(Into::into)
    }

    fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.connection.query_drop("ROLLBACK").map_err(Into::into)
    }
}

fn to_params(values: &[DatabaseValue]) -> Result<Params, DatabaseError> {
    if values.is_empty() {
        return Ok(Params::Empty);
    }
    Ok(Params::Positional(
        values.iter().map(to_value).collect::<Result<_, _>>()?,
    ))
}

/// # Errors
///
/// * [`DatabaseError::TryFrom`] if a datetime's year doesn't fit `MySQL`'s
///   unsigned 16-bit year
#[allow(clippy::cast_possible_truncation)]
fn to_value(value: &DatabaseValue) -> Result<Value, DatabaseError> {
    Ok(match value {
        DatabaseValue::Null => Value::NULL,
        DatabaseValue::String(value) => Value::Bytes(value.as_bytes().to_vec()),
        DatabaseValue::Bool(value) => Value::Int(i64::from(*value)),
        DatabaseValue::Int64(value) => Value::Int(*value),
        DatabaseValue::UInt64(value) => Value::UInt(*value),
        DatabaseValue::Real64(value) => Value::Double(*value),
        DatabaseValue::Bytes(value) => Value::Bytes(value.clone()),
        DatabaseValue::DateTime(value) => Value::Date(
            u16::try_from(value.year()).map_err(TryFromError::from)?,
            value.month() as u8,
            value.day() as u8,
            value.hour() as u8,
            value.minute() as u8,
            value.second() as u8,
            value.nanosecond() / 1000,
        ),
    })
}

fn to_datetime(
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    micros: u32,
) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))?.and_hms_micro_opt(
        u32::from(hour),
        u32::from(minute),
        u32::from(second),
        micros,
    )
}

impl From<Value> for DatabaseValue {
    fn from(value: Value) -> Self {
        match value {
            Value::NULL => Self::Null,
            Value::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(value) => Self::String(value),
                Err(e) => Self::Bytes(e.into_bytes()),
            },
            Value::Int(value) => Self::Int64(value),
            Value::UInt(value) => Self::UInt64(value),
            Value::Float(value) => Self::Real64(f64::from(value)),
            Value::Double(value) => Self::Real64(value),
            Value::Date(year, month, day, hour, minute, second, micros) => {
                // zero dates ('0000-00-00') have no calendar equivalent
                to_datetime(year, month, day, hour, minute, second, micros)
                    .map_or(Self::Null, Self::DateTime)
            }
            Value::Time(negative, days, hours, minutes, seconds, micros) => Self::String(format!(
                "{}{}:{minutes:02}:{seconds:02}.{micros:06}",
                if negative { "-" } else { "" },
                u32::from(hours) + days * 24,
            )),
        }
    }
}

/// An [`Engine`] opening a new `MySQL` session per connect request.
#[must_use]
pub fn engine(config: &MysqlConfig) -> Engine {
    let opts = config.opts();
    log::debug!(
        "mysql engine on {}:{}/{}",
        config.host,
        config.port,
        config.database
    );
    Engine::new(move || {
        Ok(Box::new(MysqlConnection::connect(opts.clone())?) as Box<dyn crate::Connection>)
    })
}
