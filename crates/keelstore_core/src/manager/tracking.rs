//! New/dirty bookkeeping for one unit of work.
//!
//! # Invariants
//! - `new` and `dirty` are disjoint at all times.
//! - Ids leave either set only through `remove_*`, `settle_*` or `forget`.
//! - Every dirty notification bumps the id's generation, even while the id
//!   is new or already dirty. Settling compares against a snapshot of it.
//! - Snapshots list ids in the order they were first marked, so objects
//!   created in the same millisecond still flush in creation order.

use crate::error::{PersistError, PersistResult};
use crate::model::id::ObjectId;
use std::collections::{BTreeMap, HashMap};

/// Outcome of a dirty notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyMark {
    /// The id was added to the dirty set.
    Marked,
    /// The id was already dirty.
    AlreadyDirty,
    /// The id is awaiting its first insert; it stays new.
    PendingInsert,
    /// The id is nil.
    Ignored,
}

/// Id set that iterates in insertion order.
#[derive(Debug, Default, Clone)]
struct OrderedIds {
    next_seq: u64,
    by_seq: BTreeMap<u64, ObjectId>,
    seq_of: HashMap<ObjectId, u64>,
}

impl OrderedIds {
    fn insert(&mut self, id: ObjectId) -> bool {
        if self.seq_of.contains_key(&id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_seq.insert(seq, id);
        self.seq_of.insert(id, seq);
        true
    }

    fn remove(&mut self, id: &ObjectId) -> bool {
        match self.seq_of.remove(id) {
            Some(seq) => {
                self.by_seq.remove(&seq);
                true
            }
            None => false,
        }
    }

    fn contains(&self, id: &ObjectId) -> bool {
        self.seq_of.contains_key(id)
    }

    fn ids(&self) -> Vec<ObjectId> {
        self.by_seq.values().copied().collect()
    }

    fn len(&self) -> usize {
        self.by_seq.len()
    }
}

#[derive(Debug, Default, Clone)]
pub struct TrackingSets {
    new: OrderedIds,
    dirty: OrderedIds,
    generations: HashMap<ObjectId, u64>,
}

impl TrackingSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an object awaiting its first insert.
    pub fn mark_new(&mut self, id: ObjectId) -> PersistResult<()> {
        if id.is_nil() {
            return Err(PersistError::InvariantViolation(
                "cannot track a new object without id".to_string(),
            ));
        }
        if self.dirty.contains(&id) {
            return Err(PersistError::InvariantViolation(format!(
                "object {id} is dirty and cannot become new"
            )));
        }
        self.new.insert(id);
        Ok(())
    }

    pub fn mark_dirty(&mut self, id: ObjectId) -> DirtyMark {
        if id.is_nil() {
            return DirtyMark::Ignored;
        }
        *self.generations.entry(id).or_insert(0) += 1;
        if self.new.contains(&id) {
            return DirtyMark::PendingInsert;
        }
        if self.dirty.insert(id) {
            DirtyMark::Marked
        } else {
            DirtyMark::AlreadyDirty
        }
    }

    pub fn is_new(&self, id: &ObjectId) -> bool {
        self.new.contains(id)
    }

    pub fn is_dirty(&self, id: &ObjectId) -> bool {
        self.dirty.contains(id)
    }

    pub fn remove_new(&mut self, id: &ObjectId) -> bool {
        self.new.remove(id)
    }

    pub fn remove_dirty(&mut self, id: &ObjectId) -> bool {
        self.dirty.remove(id)
    }

    /// Number of dirty notifications since the id was last settled clean.
    pub fn generation(&self, id: &ObjectId) -> u64 {
        self.generations.get(id).copied().unwrap_or(0)
    }

    /// Settles a new id after its insert succeeded.
    ///
    /// Returns `false` when the object was dirtied after `seen` was taken; the
    /// id then moves to the dirty set instead of becoming clean.
    pub fn settle_new(&mut self, id: ObjectId, seen: u64) -> bool {
        if !self.new.remove(&id) {
            return true;
        }
        if self.generation(&id) == seen {
            self.generations.remove(&id);
            return true;
        }
        self.dirty.insert(id);
        false
    }

    /// Settles a dirty id after its update succeeded.
    ///
    /// Returns `false` and keeps the id dirty when it was dirtied again after
    /// `seen` was taken.
    pub fn settle_dirty(&mut self, id: ObjectId, seen: u64) -> bool {
        if !self.dirty.contains(&id) {
            return true;
        }
        if self.generation(&id) != seen {
            return false;
        }
        self.dirty.remove(&id);
        self.generations.remove(&id);
        true
    }

    /// Drops every trace of the id.
    pub fn forget(&mut self, id: &ObjectId) {
        self.new.remove(id);
        self.dirty.remove(id);
        self.generations.remove(id);
    }

    /// Fails when any id is both new and dirty.
    pub fn check_disjoint(&self) -> PersistResult<()> {
        match self.new.seq_of.keys().find(|id| self.dirty.contains(id)) {
            Some(id) => Err(PersistError::InvariantViolation(format!(
                "object {id} is tracked as both new and dirty"
            ))),
            None => Ok(()),
        }
    }

    pub fn new_ids(&self) -> Vec<ObjectId> {
        self.new.ids()
    }

    pub fn dirty_ids(&self) -> Vec<ObjectId> {
        self.dirty.ids()
    }

    /// Returns `(new, dirty)` counts.
    pub fn counts(&self) -> (usize, usize) {
        (self.new.len(), self.dirty.len())
    }

    pub fn is_empty(&self) -> bool {
        self.new.len() == 0 && self.dirty.len() == 0
    }
}
