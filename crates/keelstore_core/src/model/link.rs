//! Non-owning references from relationships to the entities they relate.
//!
//! A link remembers the target id and a weak pointer to the target instance.
//! The manager's identity map is the owner; a link never keeps a target alive.

use crate::error::PersistResult;
use crate::manager::ManagerHandle;
use crate::model::id::ObjectId;
use crate::model::object::PersistenceCapable;
use rusqlite::Connection;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};

pub struct EntityLink<T: PersistenceCapable> {
    id: ObjectId,
    target: Weak<T>,
}

impl<T: PersistenceCapable> EntityLink<T> {
    /// Links to an instance the caller already holds.
    pub fn to(target: &Arc<T>) -> Self {
        Self {
            id: target.id(),
            target: Arc::downgrade(target),
        }
    }

    /// Links by id only; call [`EntityLink::resolve`] to attach the instance.
    pub fn unresolved(id: ObjectId) -> Self {
        Self {
            id,
            target: Weak::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Returns the target while the identity map still holds it.
    pub fn get(&self) -> Option<Arc<T>> {
        self.target.upgrade()
    }

    pub fn is_resolved(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Attaches the identity-map representative of the target, reading it
    /// through `manager` when it is not attached yet.
    pub fn resolve(
        &mut self,
        manager: &ManagerHandle,
        type_key: &str,
        conn: &Connection,
    ) -> PersistResult<Arc<T>> {
        if let Some(target) = self.get() {
            return Ok(target);
        }
        let target = manager.read_as::<T>(self.id, type_key, conn)?;
        self.target = Arc::downgrade(&target);
        Ok(target)
    }
}

impl<T: PersistenceCapable> Clone for EntityLink<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            target: self.target.clone(),
        }
    }
}

impl<T: PersistenceCapable> Debug for EntityLink<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityLink")
            .field("id", &self.id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
