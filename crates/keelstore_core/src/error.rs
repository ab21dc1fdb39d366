//! Error taxonomy for manager and mapper operations.
//!
//! # Invariants
//! - Every failure reaches the immediate caller unchanged; nothing here is
//!   retried or swallowed.
//! - Only `OptimisticConflict` is worth retrying, and only by re-running the
//!   whole unit of work.

use crate::db::DbError;
use crate::model::id::ObjectId;
use thiserror::Error;

pub type PersistResult<T> = Result<T, PersistError>;

#[derive(Debug, Error)]
pub enum PersistError {
    /// No constructor or mapper factory is registered for the type key.
    #[error("type `{0}` has no registered constructor or mapper")]
    UnregisteredType(String),

    /// The mapper found no row for the id.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// The audit row is tombstoned and the manager rejects tombstones.
    #[error("object is deleted: {0}")]
    Deleted(ObjectId),

    /// Held version differs from the audit store's version.
    #[error("optimistic conflict on {id}: expected version {expected}, found {actual}")]
    OptimisticConflict {
        id: ObjectId,
        expected: i64,
        actual: i64,
    },

    /// Instance registered under `type_key` is not the requested Rust type.
    #[error("object {id} registered as `{type_key}` has an unexpected concrete type")]
    TypeMismatch { id: ObjectId, type_key: String },

    #[error("object is not tracked by this manager: {0}")]
    Untracked(ObjectId),

    /// A `ManagerHandle` was used after its manager was dropped.
    #[error("persistence manager has been released")]
    ManagerReleased,

    #[error("invalid persisted data: {0}")]
    InvalidData(String),

    /// Tracking bookkeeping is inconsistent. Abort the unit of work.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("store failure: {0}")]
    Store(#[from] DbError),
}

impl PersistError {
    /// Returns whether re-running the unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OptimisticConflict { .. })
    }
}

impl From<rusqlite::Error> for PersistError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(DbError::Sqlite(value))
    }
}
