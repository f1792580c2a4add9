//! Connection factory shared by every thread of the process.

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU64, Ordering},
};

use crate::{Connection, DatabaseError};

type Connector = dyn Fn() -> Result<Box<dyn Connection>, DatabaseError> + Send + Sync;

static ENGINE: OnceLock<Arc<Engine>> = OnceLock::new();

/// Holds the function that opens physical connections. Immutable once built,
/// so it can be read from any thread without locking.
pub struct Engine {
    id: u64,
    connect: Box<Connector>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Engine {
    /// Wraps `connect` without calling it. Connections are only opened when a
    /// [`crate::LazyConnection`] hands out its first cursor.
    pub fn new(
        connect: impl Fn() -> Result<Box<dyn Connection>, DatabaseError> + Send + Sync + 'static,
    ) -> Self {
        static ID: AtomicU64 = AtomicU64::new(1);

        let id = ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("Created engine <{id}>");

        Self {
            id,
            connect: Box::new(connect),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// # Errors
    ///
    /// * Whatever the driver reports while connecting (network, authentication, ...)
    pub fn connect(&self) -> Result<Box<dyn Connection>, DatabaseError> {
        (self.connect)()
    }
}

/// Installs the process-wide engine used by the thread-local API
/// ([`crate::select_one`], [`crate::with_transaction`], ...).
///
/// # Errors
///
/// * [`DatabaseError::EngineAlreadyInitialized`] if an engine was already installed
pub fn init(engine: Engine) -> Result<Arc<Engine>, DatabaseError> {
    let engine = Arc::new(engine);
    ENGINE
        .set(engine.clone())
        .map_err(|_| DatabaseError::EngineAlreadyInitialized)?;

    log::info!("Init engine <{}> ok", engine.id);

    Ok(engine)
}

#[must_use]
pub fn get() -> Option<Arc<Engine>> {
    ENGINE.get().cloned()
}

#[must_use]
pub fn is_initialized() -> bool {
    ENGINE.get().is_some()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn new_does_not_connect() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let engine = Engine::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(DatabaseError::InvalidRequest("unreachable".into()))
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(engine.connect().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test_log::test]
    fn connect_errors_propagate_unchanged() {
        let engine = Engine::new(|| Err(DatabaseError::InvalidRequest("auth failed".into())));

        let err = engine.connect().unwrap_err();

        assert!(
            matches!(&err, DatabaseError::InvalidRequest(message) if message == "auth failed"),
            "unexpected error: {err:?}"
        );
    }

    #[test_log::test]
    fn engines_get_distinct_ids() {
        let a = Engine::new(|| Err(DatabaseError::NotInitialized));
        let b = Engine::new(|| Err(DatabaseError::NotInitialized));

        assert_ne!(a.id(), b.id());
    }
}
