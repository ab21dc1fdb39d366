//! Unit-of-work persistence over SQLite.
//!
//! A [`PersistenceManager`] keeps one in-memory instance per object id,
//! records which objects are new or dirty, and writes them through per-type
//! [`Mapper`]s on `flush`. Every object carries versioned audit metadata in
//! the shared `objects` table, and updates use optimistic concurrency.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod manager;
pub mod mapper;
pub mod model;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ManagerConfig, TombstonePolicy};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use error::{PersistError, PersistResult};
pub use logging::{
    default_log_level, init_logging, logging_status, LogConfig, LogTarget, LoggingError,
};
pub use manager::{
    FlushReport, ManagerHandle, PersistenceManager, TypeInitializer, TypeKey, TypeRegistry,
};
pub use mapper::sql::{SqlMapper, SqlRecord};
pub use mapper::Mapper;
pub use model::id::ObjectId;
pub use model::link::EntityLink;
pub use model::metadata::Metadata;
pub use model::object::{downcast, ObjectCore, ObjectRef, PersistenceCapable};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
