//! Type registry: type key to constructor and mapper factory.
//!
//! # Invariants
//! - Registration is append-only; registering a key again replaces the
//!   previous factory without error.
//! - A type is usable only when both a constructor and a mapper factory
//!   are registered under its key.
//! - The registry is shared read-mostly state; managers hold it by `Arc`.

use crate::manager::ManagerHandle;
use crate::mapper::{Mapper, MapperFactory};
use crate::model::object::{ObjectRef, PersistenceCapable};
use dashmap::DashMap;
use log::debug;
use std::sync::Arc;

/// Registered name of a persisted type.
pub type TypeKey = Arc<str>;

/// Builds a fresh, untracked instance.
pub type TypeConstructor = Arc<dyn Fn() -> ObjectRef + Send + Sync>;

/// Startup hook that registers every persisted type at once.
pub trait TypeInitializer {
    fn register_all(&self, registry: &TypeRegistry);
}

#[derive(Default)]
pub struct TypeRegistry {
    constructors: DashMap<TypeKey, TypeConstructor>,
    mappers: DashMap<TypeKey, MapperFactory>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry populated by `initializer`.
    pub fn with_initializer(initializer: &dyn TypeInitializer) -> Self {
        let registry = Self::new();
        initializer.register_all(&registry);
        registry
    }

    pub fn register_type<T, F>(&self, key: &str, constructor: F)
    where
        T: PersistenceCapable,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let constructor: TypeConstructor = Arc::new(move || -> ObjectRef { Arc::new(constructor()) });
        if self.constructors.insert(Arc::from(key), constructor).is_some() {
            debug!("event=register_type module=registry status=replaced type={key}");
        }
    }

    pub fn register_mapper<M, F>(&self, key: &str, factory: F)
    where
        M: Mapper + 'static,
        F: Fn(ManagerHandle) -> M + Send + Sync + 'static,
    {
        let factory: MapperFactory =
            Arc::new(move |manager| -> Box<dyn Mapper> { Box::new(factory(manager)) });
        if self.mappers.insert(Arc::from(key), factory).is_some() {
            debug!("event=register_mapper module=registry status=replaced type={key}");
        }
    }

    pub fn constructor(&self, key: &str) -> Option<TypeConstructor> {
        self.constructors.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn mapper_factory(&self, key: &str) -> Option<MapperFactory> {
        self.mappers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the canonical key and factory of a mapper, ignoring whether a
    /// constructor exists. Hydration only needs the mapper.
    pub fn resolve_mapper(&self, key: &str) -> Option<(TypeKey, MapperFactory)> {
        self.mappers
            .get(key)
            .map(|entry| (Arc::clone(entry.key()), Arc::clone(entry.value())))
    }

    /// Returns the canonical key when both factories are registered.
    pub fn resolve_key(&self, key: &str) -> Option<TypeKey> {
        if !self.mappers.contains_key(key) {
            return None;
        }
        self.constructors
            .get(key)
            .map(|entry| Arc::clone(entry.key()))
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.resolve_key(key).is_some()
    }

    /// Returns sorted keys that have both a constructor and a mapper.
    pub fn type_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .constructors
            .iter()
            .filter(|entry| self.mappers.contains_key(entry.key()))
            .map(|entry| entry.key().to_string())
            .collect();
        keys.sort();
        keys
    }
}
