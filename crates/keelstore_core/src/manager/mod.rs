//! Unit-of-work manager and its bookkeeping.

pub mod identity_map;
pub mod persistence_manager;
pub mod registry;
pub mod tracking;

pub use identity_map::IdentityMap;
pub use persistence_manager::{FlushReport, ManagerHandle, PersistenceManager};
pub use registry::{TypeConstructor, TypeInitializer, TypeKey, TypeRegistry};
pub use tracking::{DirtyMark, TrackingSets};
