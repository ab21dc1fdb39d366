//! Identity map: one live instance per object id.
//!
//! Not synchronized on its own; the manager guards it together with the
//! tracking sets so lookup-or-insert and new/dirty updates are one step.

use crate::manager::registry::TypeKey;
use crate::model::id::ObjectId;
use crate::model::object::ObjectRef;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct IdentityMap {
    objects: HashMap<ObjectId, ObjectRef>,
    types: HashMap<ObjectId, TypeKey>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ObjectId) -> Option<ObjectRef> {
        self.objects.get(id).cloned()
    }

    /// Type key the object was created or read under.
    pub fn type_of(&self, id: &ObjectId) -> Option<TypeKey> {
        self.types.get(id).cloned()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Installs `object` unless the id is already mapped.
    ///
    /// Returns the resident instance and whether it is the one just offered.
    pub fn insert_if_absent(
        &mut self,
        object: ObjectRef,
        type_key: TypeKey,
    ) -> (ObjectRef, bool) {
        let id = object.id();
        if let Some(resident) = self.objects.get(&id) {
            return (Arc::clone(resident), false);
        }
        self.objects.insert(id, Arc::clone(&object));
        self.types.insert(id, type_key);
        (object, true)
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<ObjectRef> {
        self.types.remove(id);
        self.objects.remove(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
