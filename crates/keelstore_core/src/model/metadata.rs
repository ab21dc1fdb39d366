//! Per-object audit and versioning state.
//!
//! # Invariants
//! - `version` is `None` until the object has been written or read; an
//!   absent version reads as 0.
//! - `version` only grows, one step per persisted upsert.
//! - `deleted` mirrors the audit store; setting it never removes the object
//!   from the identity map.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: Option<i64>,
    pub deleted: bool,
    /// Unix epoch milliseconds.
    pub created_at: Option<i64>,
    /// Unix epoch milliseconds of the latest version increment.
    pub updated_at: Option<i64>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl Metadata {
    /// Version the caller holds, with an absent version read as 0.
    pub fn current_version(&self) -> i64 {
        self.version.unwrap_or(0)
    }

    /// Stamps creation fields once; later calls keep the first stamp.
    pub fn ensure_created(&mut self, at_ms: i64, by: Option<&str>) {
        if self.created_at.is_none() {
            self.created_at = Some(at_ms);
            self.created_by = by.map(str::to_string);
        }
    }

    /// Bumps the version by one and stamps the update fields.
    ///
    /// Returns the new version.
    pub fn increment_version(&mut self, at_ms: i64, by: Option<&str>) -> i64 {
        let next = self.current_version() + 1;
        self.version = Some(next);
        self.updated_at = Some(at_ms);
        self.updated_by = by.map(str::to_string);
        next
    }
}
