//! Persistence-capable contract shared by every entity and relationship.
//!
//! # Responsibility
//! - Give the manager and mappers uniform access to id and metadata without
//!   knowing the concrete type.
//! - Route field mutations back to the owning manager as dirty notifications.
//!
//! # Invariants
//! - The id is written at most once; after that it never changes.
//! - An object is bound to at most one manager, and the binding is weak.

use crate::manager::ManagerHandle;
use crate::model::id::{self, ObjectId};
use crate::model::metadata::Metadata;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Shared reference to a tracked instance.
pub type ObjectRef = Arc<dyn PersistenceCapable>;

/// Contract implemented by generated entity and relationship types.
///
/// Implementors embed one [`ObjectCore`] and keep their own fields behind
/// interior mutability; setters call [`ObjectCore::mark_dirty`] after the
/// write.
pub trait PersistenceCapable: Send + Sync + 'static {
    fn core(&self) -> &ObjectCore;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn id(&self) -> ObjectId {
        self.core().id()
    }

    /// Snapshot of the current metadata.
    fn metadata(&self) -> Metadata {
        self.core().metadata()
    }
}

/// Converts a shared instance into its concrete type.
pub fn downcast<T: PersistenceCapable>(object: ObjectRef) -> Option<Arc<T>> {
    object.into_any().downcast::<T>().ok()
}

/// Identity, metadata and manager binding embedded in every instance.
pub struct ObjectCore {
    id: OnceCell<ObjectId>,
    metadata: Mutex<Metadata>,
    manager: OnceCell<ManagerHandle>,
}

impl ObjectCore {
    /// Creates a core with a freshly generated id.
    pub fn new() -> Self {
        Self::with_id(id::generate())
    }

    /// Creates a core with a caller-provided id.
    ///
    /// Used by mappers hydrating stored rows.
    pub fn with_id(id: ObjectId) -> Self {
        let core = Self::unassigned();
        if !id.is_nil() {
            let _ = core.id.set(id);
        }
        core
    }

    /// Creates a core whose id is assigned later by the manager.
    pub fn unassigned() -> Self {
        Self {
            id: OnceCell::new(),
            metadata: Mutex::new(Metadata::default()),
            manager: OnceCell::new(),
        }
    }

    /// Returns the id, or nil when none has been assigned.
    pub fn id(&self) -> ObjectId {
        self.id.get().copied().unwrap_or_else(Uuid::nil)
    }

    /// Assigns `id` unless one is already set. Returns the effective id.
    pub(crate) fn assign_id(&self, id: ObjectId) -> ObjectId {
        *self.id.get_or_init(|| id)
    }

    pub fn metadata(&self) -> Metadata {
        self.metadata.lock().clone()
    }

    /// Runs `f` with exclusive access to the metadata.
    pub fn with_metadata<R>(&self, f: impl FnOnce(&mut Metadata) -> R) -> R {
        f(&mut self.metadata.lock())
    }

    /// Binds this object to a manager. A second binding is ignored.
    pub(crate) fn bind(&self, handle: ManagerHandle) -> bool {
        self.manager.set(handle).is_ok()
    }

    pub fn manager(&self) -> Option<&ManagerHandle> {
        self.manager.get()
    }

    /// Notifies the bound manager that a field changed.
    ///
    /// No-op for unbound objects or after the manager is gone.
    pub fn mark_dirty(&self) {
        if let Some(handle) = self.manager.get() {
            handle.mark_dirty(self.id());
        }
    }
}

impl Default for ObjectCore {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ObjectCore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCore")
            .field("id", &self.id())
            .field("metadata", &*self.metadata.lock())
            .field("bound", &self.manager.get().is_some())
            .finish()
    }
}
