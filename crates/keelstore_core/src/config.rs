//! Persistence manager configuration.
//!
//! # Invariants
//! - Configuration is fixed for the lifetime of a manager.
//! - `Default` is usable as-is: system clock, no actor, tombstones rejected.

use crate::clock::{Clock, SystemClock};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// What a store read does with a row whose audit entry is tombstoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TombstonePolicy {
    /// Fail with `PersistError::Deleted` and keep the object out of the
    /// identity map.
    #[default]
    Reject,
    /// Install and return the object with `deleted` set in its metadata.
    Expose,
}

#[derive(Clone)]
pub struct ManagerConfig {
    /// Written to `created_by`/`updated_by` on audit rows.
    pub actor: Option<String>,
    pub tombstones: TombstonePolicy,
    pub clock: Arc<dyn Clock>,
}

impl ManagerConfig {
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_tombstone_policy(mut self, policy: TombstonePolicy) -> Self {
        self.tombstones = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            actor: None,
            tombstones: TombstonePolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl Debug for ManagerConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("actor", &self.actor)
            .field("tombstones", &self.tombstones)
            .field("now_ms", &self.clock.now_ms())
            .finish()
    }
}
