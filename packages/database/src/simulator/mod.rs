//! Throw-away `SQLite` engines for tests and demos.
//!
//! Each engine gets its own database file in a fresh temporary directory.
//! All of its connections see the same data, and the directory is removed
//! when the engine is dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{DatabaseError, Engine, rusqlite::RusqliteConnection};

/// # Errors
///
/// * [`DatabaseError::Io`] if the temporary directory can't be created
pub fn engine() -> Result<Engine, DatabaseError> {
    static ID: AtomicU64 = AtomicU64::new(0);

    let dir = tempfile::Builder::new()
        .prefix("transwarp_simulator_")
        .tempdir()?;
    let file_name = format!("db_{}.sqlite", ID.fetch_add(1, Ordering::Relaxed));

    log::debug!("simulator database at {}", dir.path().join(&file_name).display());

    // the closure owns the directory, so it lives exactly as long as the engine
    Ok(Engine::new(move || {
        let connection = RusqliteConnection::open(dir.path().join(&file_name))?;
        Ok(Box::new(connection) as Box<dyn crate::Connection>)
    }))
}
