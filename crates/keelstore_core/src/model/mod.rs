//! Persistence-capable object model.
//!
//! # Responsibility
//! - Define identity, metadata and the contract generated types implement.
//! - Define how relationships refer to entities without owning them.
//!
//! # Invariants
//! - Every object is identified by a stable, time-ordered `ObjectId`.
//! - `deleted` mirrors the audit row; it never evicts an object by itself.

pub mod id;
pub mod link;
pub mod metadata;
pub mod object;
