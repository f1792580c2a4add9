//! Read and write helpers.
//!
//! SQL is written with the portable `?` placeholder and translated to the
//! driver's marker right before it runs. Every helper opens a
//! [`crate::ConnectionScope`] around itself, so it reuses the calling
//! thread's connection (and transaction) when one is open.

use crate::{
    ConnectionScope, DatabaseError, DatabaseValue, Row, ThreadContext, context::current,
    query_transform::translate_placeholders,
};

impl ThreadContext {
    fn run<T>(
        &self,
        sql: &str,
        params: &[DatabaseValue],
        f: impl FnOnce(&mut crate::Cursor<'_>, &str) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let scope = self.connection();
        let result = self.with_cursor(|cursor| {
            let (sql, count) = translate_placeholders(sql, cursor.placeholder_style());
            if count != params.len() {
                log::debug!(
                    "placeholder count {count} does not match argument count {}",
                    params.len()
                );
            }
            f(cursor, &sql)
        });
        finish(scope, result)
    }

    /// First row of the result, or `None` when nothing matched.
    ///
    /// # Errors
    ///
    /// * If connecting or running the statement fails
    pub fn select_one(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Option<Row>, DatabaseError> {
        self.run(sql, params, |cursor, sql| cursor.fetch_one(sql, params))
    }

    /// Every row of the result; empty when nothing matched.
    ///
    /// # Errors
    ///
    /// * If connecting or running the statement fails
    pub fn select_all(&self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>, DatabaseError> {
        self.run(sql, params, |cursor, sql| cursor.fetch_all(sql, params))
    }

    /// The single column of the first row, or `None` when nothing matched.
    ///
    /// # Errors
    ///
    /// * [`DatabaseError::MultiColumn`] if the row has more than one column
    /// * If connecting or running the statement fails
    pub fn select_scalar(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Option<DatabaseValue>, DatabaseError> {
        let Some(row) = self.select_one(sql, params)? else {
            return Ok(None);
        };
        if row.len() != 1 {
            return Err(DatabaseError::MultiColumn(row.len()));
        }
        Ok(row.into_values().into_iter().next())
    }

    /// [`Self::select_scalar`] read as an integer (`select count(*) ...`).
    ///
    /// # Errors
    ///
    /// * [`DatabaseError::MultiColumn`] if the row has more than one column
    /// * [`DatabaseError::TryFrom`] if the value is not an integer
    /// * If connecting or running the statement fails
    pub fn select_int(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Option<i64>, DatabaseError> {
        self.select_scalar(sql, params)?
            .map(i64::try_from)
            .transpose()
            .map_err(Into::into)
    }

    /// Runs a write and returns the affected-row count. Outside of a
    /// transaction scope the write is committed immediately; inside one the
    /// enclosing scope decides.
    ///
    /// # Errors
    ///
    /// * If connecting, running the statement, or the auto-commit fails
    pub fn update(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64, DatabaseError> {
        let scope = self.connection();
        let result = self
            .with_cursor(|cursor| {
                let (sql, _) = translate_placeholders(sql, cursor.placeholder_style());
                cursor.execute(&sql, params)
            })
            .and_then(|affected| {
                if self.transactions() == 0 {
                    log::debug!("auto commit");
                    self.commit()?;
                }
                Ok(affected)
            });
        finish(scope, result)
    }

    /// Inserts one row built from ordered `(column, value)` pairs.
    ///
    /// # Errors
    ///
    /// * [`DatabaseError::InvalidRequest`] if `columns` is empty
    /// * Whatever [`Self::update`] returns
    pub fn insert(
        &self,
        table: &str,
        columns: &[(&str, DatabaseValue)],
    ) -> Result<u64, DatabaseError> {
        let (sql, params) = build_insert(table, columns)?;
        self.update(&sql, &params)
    }
}

/// Releases `scope`. A failure to close the connection is only returned when
/// the statement itself succeeded; otherwise the statement's error wins.
fn finish<T>(
    scope: ConnectionScope<'_>,
    result: Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    match (result, scope.release()) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_error)) => {
            log::error!("Failed to release connection after error {e}: {release_error:?}");
            Err(e)
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn build_insert(
    table: &str,
    columns: &[(&str, DatabaseValue)],
) -> Result<(String, Vec<DatabaseValue>), DatabaseError> {
    if columns.is_empty() {
        return Err(DatabaseError::InvalidRequest(format!(
            "insert into {table} without columns"
        )));
    }

    let names = columns
        .iter()
        .map(|(name, _)| quote_identifier(name))
        .collect::<Vec<_>>()
        .join(",");
    let placeholders = vec!["?"; columns.len()].join(",");
    let sql = format!(
        "insert into {} ({names}) values ({placeholders})",
        quote_identifier(table)
    );

    Ok((sql, columns.iter().map(|(_, value)| value.clone()).collect()))
}

/// [`ThreadContext::select_one`] on this thread's context.
///
/// # Errors
///
/// * [`DatabaseError::EngineNotInitialized`] if no engine was installed
/// * If connecting or running the statement fails
pub fn select_one(sql: &str, params: &[DatabaseValue]) -> Result<Option<Row>, DatabaseError> {
    current(|context| context.select_one(sql, params))?
}

/// [`ThreadContext::select_all`] on this thread's context.
///
/// # Errors
///
/// * [`DatabaseError::EngineNotInitialized`] if no engine was installed
/// * If connecting or running the statement fails
pub fn select_all(sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>, DatabaseError> {
    current(|context| context.select_all(sql, params))?
}

/// [`ThreadContext::select_scalar`] on this thread's context.
///
/// # Errors
///
/// * [`DatabaseError::EngineNotInitialized`] if no engine was installed
/// * [`DatabaseError::MultiColumn`] if the row has more than one column
/// * If connecting or running the statement fails
pub fn select_scalar(
    sql: &str,
    params: &[DatabaseValue],
) -> Result<Option<DatabaseValue>, DatabaseError> {
    current(|context| context.select_scalar(sql, params))?
}

/// [`ThreadContext::select_int`] on this thread's context.
///
/// # Errors
///
/// * [`DatabaseError::EngineNotInitialized`] if no engine was installed
/// * [`DatabaseError::MultiColumn`] if the row has more than one column
/// * [`DatabaseError::TryFrom`] if the value is not an integer
pub fn select_int(sql: &str, params: &[DatabaseValue]) -> Result<Option<i64>, DatabaseError> {
    current(|context| context.select_int(sql, params))?
}

/// [`ThreadContext::update`] on this thread's context.
///
/// # Errors
///
/// * [`DatabaseError::EngineNotInitialized`] if no engine was installed
/// * If connecting, running the statement, or the auto-commit fails
pub fn update(sql: &str, params: &[DatabaseValue]) -> Result<u64, DatabaseError> {
    current(|context| context.update(sql, params))?
}

/// [`ThreadContext::insert`] on this thread's context.
///
/// # Errors
///
/// * [`DatabaseError::EngineNotInitialized`] if no engine was installed
/// * [`DatabaseError::InvalidRequest`] if `columns` is empty
/// * Whatever [`update`] returns
pub fn insert(table: &str, columns: &[(&str, DatabaseValue)]) -> Result<u64, DatabaseError> {
    current(|context| context.insert(table, columns))?
}

/// [`ThreadContext::execute_raw`] on this thread's context, inside an
/// implicit connection scope.
///
/// # Errors
///
/// * [`DatabaseError::EngineNotInitialized`] if no engine was installed
/// * If connecting or running the statement fails
pub fn execute_raw(sql: &str, params: &[DatabaseValue]) -> Result<u64, DatabaseError> {
    current(|context| context.with_connection(|context| context.execute_raw(sql, params)))?
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        connection::tests::{Event, Failures, failing_engine, recording_engine},
        params,
    };

    fn row(columns: &[(&str, DatabaseValue)]) -> Row {
        Row::from_columns(
            columns
                .iter()
                .map(|(name, value)| ((*name).to_string(), value.clone())),
        )
    }

    #[test_log::test]
    fn translates_placeholders_before_running() {
        let (engine, events) = recording_engine(false, vec![]);
        let context = ThreadContext::new(engine);

        context
            .select_all("select * from t where a=? and b=?", params![1, 2])
            .unwrap();

        assert_eq!(
            events.lock().unwrap()[1],
            Event::Query("select * from t where a=$1 and b=$2".into())
        );
    }

    #[test_log::test]
    fn select_one_without_rows_is_none() {
        let (engine, _events) = recording_engine(false, vec![]);
        let context = ThreadContext::new(engine);

        assert_eq!(context.select_one("select 1", params![]).unwrap(), None);
        assert_eq!(context.select_all("select 1", params![]).unwrap(), vec![]);
        assert_eq!(context.select_scalar("select 1", params![]).unwrap(), None);
    }

    #[test_log::test]
    fn select_scalar_rejects_multiple_columns() {
        let rows = vec![row(&[("id", 1.into()), ("name", "a".into())])];
        let (engine, _events) = recording_engine(false, rows);
        let context = ThreadContext::new(engine);

        let result = context.select_scalar("select id, name from t", params![]);

        assert!(matches!(result, Err(DatabaseError::MultiColumn(2))));
    }

    #[test_log::test]
    fn select_int_reads_single_column() {
        let rows = vec![row(&[("count(*)", 5.into())])];
        let (engine, _events) = recording_engine(false, rows);
        let context = ThreadContext::new(engine);

        assert_eq!(context.select_int("select count(*) from t", params![]).unwrap(), Some(5));
    }

    #[test_log::test]
    fn select_int_rejects_text() {
        let rows = vec![row(&[("name", "a".into())])];
        let (engine, _events) = recording_engine(false, rows);
        let context = ThreadContext::new(engine);

        let result = context.select_int("select name from t", params![]);

        assert!(matches!(result, Err(DatabaseError::TryFrom(_))));
    }

    #[test_log::test]
    fn update_outside_transaction_auto_commits() {
        let (engine, events) = recording_engine(false, vec![]);
        let context = ThreadContext::new(engine);

        let affected = context
            .update("update t set x=? where id=?", params![5, 1])
            .unwrap();

        assert_eq!(affected, 1);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                Event::Connect,
                Event::Execute("update t set x=$1 where id=$2".into()),
                Event::Commit,
                Event::Close,
            ]
        );
    }

    #[test_log::test]
    fn update_inside_transaction_defers_commit() {
        let (engine, events) = recording_engine(false, vec![]);
        let context = ThreadContext::new(engine);

        context
            .with_transaction(|context| {
                context.update("update t set x=? where id=?", params![5, 1])?;
                assert!(!events.lock().unwrap().contains(&Event::Commit));
                context.update("update t set x=? where id=?", params![6, 2])
            })
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            events.iter().filter(|e| **e == Event::Commit).count(),
            1,
            "{events:?}"
        );
        assert_eq!(events.last(), Some(&Event::Close));
    }

    #[test_log::test]
    fn statements_share_connection_inside_connection_scope() {
        let (engine, events) = recording_engine(false, vec![]);
        let context = ThreadContext::new(engine);

        context.with_connection(|context| {
            context.select_all("select 1", params![]).unwrap();
            context.select_all("select 2", params![]).unwrap();
        });

        let events = events.lock().unwrap();
        assert_eq!(events.iter().filter(|e| **e == Event::Connect).count(), 1);
        assert_eq!(events.iter().filter(|e| **e == Event::Close).count(), 1);
    }

    #[test_log::test]
    fn builds_insert_from_ordered_columns() {
        let (sql, params) = build_insert(
            "user",
            &[("id", 1.into()), ("na`me", "Bob".into())],
        )
        .unwrap();

        assert_eq!(sql, "insert into `user` (`id`,`na``me`) values (?,?)");
        assert_eq!(params, vec![DatabaseValue::Int64(1), "Bob".into()]);
    }

    #[test_log::test]
    fn insert_without_columns_is_rejected() {
        let (engine, events) = recording_engine(false, vec![]);
        let context = ThreadContext::new(engine);

        let result = context.insert("user", &[]);

        assert!(matches!(result, Err(DatabaseError::InvalidRequest(_))));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test_log::test]
    fn statement_error_wins_over_close_error() {
        let (engine, events) = failing_engine(
            Failures {
                statement: true,
                close: true,
                ..Failures::default()
            },
            vec![],
        );
        let context = ThreadContext::new(engine);

        let select = context.select_one("selec 1", params![]);
        let update = context.update("updat t", params![]);

        assert!(
            matches!(&select, Err(DatabaseError::InvalidRequest(message)) if message == "statement failed"),
            "unexpected result: {select:?}"
        );
        assert!(
            matches!(&update, Err(DatabaseError::InvalidRequest(message)) if message == "statement failed"),
            "unexpected result: {update:?}"
        );
        assert_eq!(
            events.lock().unwrap().iter().filter(|e| **e == Event::Close).count(),
            2
        );
        assert!(!context.is_initialized());
    }

    #[test_log::test]
    fn close_error_is_returned_after_successful_statement() {
        let (engine, _events) = failing_engine(
            Failures {
                close: true,
                ..Failures::default()
            },
            vec![],
        );
        let context = ThreadContext::new(engine);

        let result = context.select_all("select 1", params![]);

        assert!(
            matches!(&result, Err(DatabaseError::InvalidRequest(message)) if message == "close failed"),
            "unexpected result: {result:?}"
        );
    }
}
