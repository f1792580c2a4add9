//! Re-entrant guards over a [`ThreadContext`].
//!
//! Both guards remember whether they initialized the context. Only that guard
//! tears it down, so scopes nest freely and share one physical connection.
//! A [`TransactionScope`] also moves the transaction depth; the scope whose
//! exit brings it back to zero is the one that commits or rolls back.

use crate::{DatabaseError, ThreadContext};

#[must_use = "the connection is released as soon as the scope is dropped"]
#[derive(Debug)]
pub struct ConnectionScope<'a> {
    context: &'a ThreadContext,
    owns_connection: bool,
}

impl<'a> ConnectionScope<'a> {
    pub(crate) fn enter(context: &'a ThreadContext) -> Self {
        let owns_connection = context.attach();
        log::trace!("enter connection scope (owns_connection={owns_connection})");
        Self {
            context,
            owns_connection,
        }
    }

    #[must_use]
    pub const fn owns_connection(&self) -> bool {
        self.owns_connection
    }

    #[must_use]
    pub const fn context(&self) -> &'a ThreadContext {
        self.context
    }

    /// Leaves the scope, reporting a failure to close the connection instead
    /// of only logging it as dropping would.
    ///
    /// # Errors
    ///
    /// * If this scope opened the connection and closing it fails
    pub fn release(mut self) -> Result<(), DatabaseError> {
        self.exit()
    }

    fn exit(&mut self) -> Result<(), DatabaseError> {
        log::trace!(
            "exit connection scope (owns_connection={})",
            self.owns_connection
        );
        if std::mem::take(&mut self.owns_connection) {
            self.context.cleanup()?;
        }
        Ok(())
    }
}

impl Drop for ConnectionScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.exit() {
            log::error!("Failed to release connection: {e:?}");
        }
    }
}

/// A transaction boundary. Dropping a scope that was neither completed nor
/// aborted counts as an error exit, so an early return or a panic rolls the
/// outermost transaction back.
#[must_use = "dropping the scope immediately exits it with a rollback"]
#[derive(Debug)]
pub struct TransactionScope<'a> {
    context: &'a ThreadContext,
    owns_connection: bool,
    exited: bool,
}

impl<'a> TransactionScope<'a> {
    pub(crate) fn enter(context: &'a ThreadContext) -> Self {
        let owns_connection = context.attach();

        let depth = context.transactions() + 1;
        context.set_transactions(depth);
        if depth == 1 {
            log::info!("begin transaction...");
        } else {
            log::info!("join current transaction (depth {depth})...");
        }

        Self {
            context,
            owns_connection,
            exited: false,
        }
    }

    #[must_use]
    pub const fn owns_connection(&self) -> bool {
        self.owns_connection
    }

    #[must_use]
    pub const fn context(&self) -> &'a ThreadContext {
        self.context
    }

    /// Normal exit. Commits if this is the outermost scope.
    ///
    /// # Errors
    ///
    /// * If the commit fails; a rollback has been attempted before returning
    pub fn complete(mut self) -> Result<(), DatabaseError> {
        self.exit(true)
    }

    /// Error exit. Rolls back if this is the outermost scope.
    ///
    /// # Errors
    ///
    /// * If the rollback fails
    pub fn abort(mut self) -> Result<(), DatabaseError> {
        self.exit(false)
    }

    fn exit(&mut self, success: bool) -> Result<(), DatabaseError> {
        if self.exited {
            return Ok(());
        }
        self.exited = true;

        let depth = self.context.transactions().saturating_sub(1);
        self.context.set_transactions(depth);

        let result = if depth > 0 {
            log::trace!("leave nested transaction (depth {depth})");
            Ok(())
        } else if success {
            self.commit()
        } else {
            self.rollback()
        };

        if self.owns_connection
            && let Err(e) = self.context.cleanup()
        {
            // the transaction outcome is the more useful error to report
            return result.and(Err(e));
        }

        result
    }

    fn commit(&self) -> Result<(), DatabaseError> {
        log::info!("commit transaction...");
        if let Err(e) = self.context.commit() {
            log::warn!("commit failed: {e}. try rollback...");
            match self.context.rollback() {
                Ok(()) => log::warn!("rollback ok."),
                Err(rollback_error) => {
                    log::error!("rollback after failed commit failed: {rollback_error}");
                }
            }
            return Err(e);
        }
        log::info!("commit ok.");
        Ok(())
    }

    fn rollback(&self) -> Result<(), DatabaseError> {
        log::warn!("rollback transaction...");
        self.context.rollback()?;
        log::info!("rollback ok.");
        Ok(())
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if !self.exited
            && let Err(e) = self.exit(false)
        {
            log::error!("Failed to roll back abandoned transaction: {e:?}");
        }
    }
}
