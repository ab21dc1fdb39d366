//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the persistence core.
//! - Create the shared `objects` audit table before any mapper runs.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Mappers must not touch the store before migrations succeed.
//! - Type-specific tables are owned by the application, not by this module.

use thiserror::Error;

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Store-level failure surfaced by the connection or the bootstrap.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}
