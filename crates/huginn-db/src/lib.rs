//! `huginn-db` — SQLite plumbing shared by every subsystem.
//!
//! One database file, one `Connection` per subsystem. WAL journaling gives
//! concurrent readers with serialized writers, which is the whole
//! shared-resource policy of the core: the database is the only shared
//! mutable store.

pub mod error;
pub mod loglayer;
pub mod migrate;

use std::path::Path;

use rusqlite::Connection;

pub use error::{DbError, Result};
pub use loglayer::SqliteLogLayer;

/// Open a connection to the database at `path` with the standard pragmas.
///
/// Does not run migrations — the gateway runs [`migrate::run_migrations`]
/// exactly once at startup before any subsystem connection is handed out.
pub fn open(path: &str) -> Result<Connection> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| DbError::Open(e.to_string()))?;
        }
    }
    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (tests and ephemeral runs).
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}
