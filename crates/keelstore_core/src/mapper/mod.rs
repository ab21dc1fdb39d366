//! Mapper contract between in-memory objects and the relational store.
//!
//! # Responsibility
//! - Define the per-type read/upsert/delete contract the manager drives.
//! - Keep the shared audit-store protocol in one place for every type.
//!
//! # Invariants
//! - Mappers never consult the identity map; single-representative
//!   semantics belong to the manager.
//! - Mappers never commit or roll back; the caller owns the transaction.
//! - A version mismatch is detected before any type-specific write.

pub mod audit;
pub mod sql;

use crate::error::PersistResult;
use crate::manager::ManagerHandle;
use crate::model::id::ObjectId;
use crate::model::object::{ObjectRef, PersistenceCapable};
use rusqlite::Connection;
use std::sync::Arc;

/// Per-type adapter between an instance and its stored rows.
pub trait Mapper: Send {
    /// Hydrates exactly one object, including its audit metadata.
    ///
    /// Fails with `NotFound` when no row exists for `id`.
    fn read(&self, id: ObjectId, conn: &Connection) -> PersistResult<ObjectRef>;

    /// Inserts or updates the object after checking its held version.
    fn upsert(&self, object: &dyn PersistenceCapable, conn: &Connection) -> PersistResult<()>;

    /// Removes the object's audit row; the store cascades the rest.
    fn delete(&self, object: &dyn PersistenceCapable, conn: &Connection) -> PersistResult<()>;
}

/// Builds a mapper bound to one manager.
pub type MapperFactory = Arc<dyn Fn(ManagerHandle) -> Box<dyn Mapper> + Send + Sync>;
