//! Unit-of-work orchestrator.
//!
//! # Responsibility
//! - Create and read objects while keeping one in-memory instance per id.
//! - Collect new and dirty objects and write them out on `flush`.
//!
//! # Invariants
//! - At most one instance per id is installed in the identity map.
//! - New and dirty sets are disjoint subsets of the identity map's ids.
//! - Flush writes every new object before any dirty object.
//! - Flushes are serialized; at most one runs per manager.
//! - A change made while its object is being written keeps the object dirty.
//! - No state lock is held while a mapper runs; mappers may call back in.
//! - Flush never commits or rolls back the caller's transaction.
//!
//! # Lifecycle per object
//!
//! ```text
//! UNTRACKED -(create)-> NEW -(flush)-> CLEAN
//! UNTRACKED -(read)-> CLEAN -(mark dirty)-> DIRTY -(flush)-> CLEAN
//! NEW -(mark dirty)-> NEW
//! NEW -(mark dirty during flush)-> DIRTY
//! ```

use crate::clock::system_now_ms;
use crate::config::{ManagerConfig, TombstonePolicy};
use crate::error::{PersistError, PersistResult};
use crate::manager::identity_map::IdentityMap;
use crate::manager::registry::{TypeKey, TypeRegistry};
use crate::manager::tracking::{DirtyMark, TrackingSets};
use crate::mapper::audit::AuditStamp;
use crate::mapper::Mapper;
use crate::model::id::{self, ObjectId};
use crate::model::object::{downcast, ObjectRef, PersistenceCapable};
use log::{debug, error, info};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Counts of objects written by one successful flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Default)]
struct UnitState {
    identity: IdentityMap,
    tracking: TrackingSets,
}

struct ManagerInner {
    registry: Arc<TypeRegistry>,
    config: ManagerConfig,
    state: Mutex<UnitState>,
    flush_lock: Mutex<()>,
}

/// Persistence manager for one unit of work.
///
/// Cloning yields another handle to the same identity map and tracking sets.
#[derive(Clone)]
pub struct PersistenceManager {
    inner: Arc<ManagerInner>,
}

/// Weak back-reference from tracked objects and mappers to their manager.
///
/// Never keeps the manager alive.
#[derive(Clone)]
pub struct ManagerHandle {
    inner: Weak<ManagerInner>,
}

impl PersistenceManager {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::with_config(registry, ManagerConfig::default())
    }

    pub fn with_config(registry: Arc<TypeRegistry>, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry,
                config,
                state: Mutex::new(UnitState::default()),
                flush_lock: Mutex::new(()),
            }),
        }
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Constructs, identifies and tracks a new object of `type_key`.
    ///
    /// # Errors
    /// - `UnregisteredType` when the key lacks a constructor or a mapper; the
    ///   identity map is left untouched.
    /// - `InvariantViolation` when the constructor reuses a tracked id.
    pub fn create(&self, type_key: &str) -> PersistResult<ObjectRef> {
        let key = self.require_type(type_key)?;
        let constructor = self
            .inner
            .registry
            .constructor(&key)
            .ok_or_else(|| PersistError::UnregisteredType(type_key.to_string()))?;

        let object = constructor();
        let core = object.core();
        let id = if core.id().is_nil() {
            core.assign_id(id::generate())
        } else {
            core.id()
        };

        let stamp = self.handle().audit_stamp();
        core.with_metadata(|metadata| metadata.ensure_created(stamp.at_ms, stamp.actor.as_deref()));
        core.bind(self.handle());

        {
            let mut state = self.inner.state.lock();
            if state.identity.contains(&id) {
                return Err(PersistError::InvariantViolation(format!(
                    "constructor for `{type_key}` produced already tracked id {id}"
                )));
            }
            state.tracking.mark_new(id)?;
            state.identity.insert_if_absent(Arc::clone(&object), key);
        }

        debug!("event=create module=manager status=ok type={type_key} id={id}");
        Ok(object)
    }

    /// Typed variant of [`PersistenceManager::create`].
    pub fn create_as<T: PersistenceCapable>(&self, type_key: &str) -> PersistResult<Arc<T>> {
        let object = self.create(type_key)?;
        let id = object.id();
        downcast::<T>(object).ok_or_else(|| PersistError::TypeMismatch {
            id,
            type_key: type_key.to_string(),
        })
    }

    /// Returns the single in-memory instance for `id`, hydrating it through
    /// the mapper registered for `type_key` on first access.
    ///
    /// An identity-map hit does not touch `conn` or the mapper. A miss needs
    /// only a mapper for `type_key`, not a constructor.
    pub fn read(&self, id: ObjectId, type_key: &str, conn: &Connection) -> PersistResult<ObjectRef> {
        if let Some(resident) = self.inner.state.lock().identity.get(&id) {
            return Ok(resident);
        }

        let (key, factory) = self
            .inner
            .registry
            .resolve_mapper(type_key)
            .ok_or_else(|| PersistError::UnregisteredType(type_key.to_string()))?;
        let hydrated = factory(self.handle()).read(id, conn)?;

        if hydrated.id() != id {
            return Err(PersistError::InvariantViolation(format!(
                "mapper for `{type_key}` returned {} when reading {id}",
                hydrated.id()
            )));
        }
        if hydrated.metadata().deleted && self.inner.config.tombstones == TombstonePolicy::Reject
        {
            debug!("event=read module=manager status=rejected type={type_key} id={id} reason=deleted");
            return Err(PersistError::Deleted(id));
        }

        hydrated.core().bind(self.handle());
        let (resident, installed) = self
            .inner
            .state
            .lock()
            .identity
            .insert_if_absent(hydrated, key);

        debug!("event=read module=manager status=ok type={type_key} id={id} installed={installed}");
        Ok(resident)
    }

    /// Typed variant of [`PersistenceManager::read`].
    pub fn read_as<T: PersistenceCapable>(
        &self,
        id: ObjectId,
        type_key: &str,
        conn: &Connection,
    ) -> PersistResult<Arc<T>> {
        let object = self.read(id, type_key, conn)?;
        downcast::<T>(object).ok_or_else(|| PersistError::TypeMismatch {
            id,
            type_key: type_key.to_string(),
        })
    }

    /// Records that `object` changed since it was last written.
    ///
    /// Objects still awaiting their first insert stay new. Untracked objects
    /// and nil ids are ignored.
    pub fn dirty(&self, object: &dyn PersistenceCapable) {
        self.mark_dirty(object.id());
    }

    fn mark_dirty(&self, id: ObjectId) {
        let mut state = self.inner.state.lock();
        if !id.is_nil() && !state.identity.contains(&id) {
            debug!("event=dirty module=manager status=ignored id={id} reason=untracked");
            return;
        }
        let mark = state.tracking.mark_dirty(id);
        if mark == DirtyMark::Marked {
            debug!("event=dirty module=manager status=ok id={id}");
        }
    }

    /// Upserts every new object, then every dirty object, through their
    /// mappers on `conn`.
    ///
    /// Each id leaves its set as soon as its own upsert succeeds. The first
    /// failure is returned immediately; ids not reached yet stay tracked and
    /// earlier ones stay removed.
    ///
    /// Concurrent calls wait for the running flush. An object dirtied while
    /// its upsert is running stays dirty for the next flush.
    pub fn flush(&self, conn: &Connection) -> PersistResult<FlushReport> {
        let _flushing = self.inner.flush_lock.lock();
        let started_at = Instant::now();
        let (new_batch, dirty_batch) = {
            let state = self.inner.state.lock();
            state.tracking.check_disjoint()?;
            (
                collect_batch(&state, state.tracking.new_ids())?,
                collect_batch(&state, state.tracking.dirty_ids())?,
            )
        };
        info!(
            "event=flush module=manager status=start new={} dirty={}",
            new_batch.len(),
            dirty_batch.len()
        );

        let mut report = FlushReport::default();
        for (object, key, seen) in &new_batch {
            self.flush_one(object, key, conn, "new")?;
            let clean = self.inner.state.lock().tracking.settle_new(object.id(), *seen);
            log_requeued(clean, key, object.id());
            report.inserted += 1;
        }
        for (object, key, seen) in &dirty_batch {
            self.flush_one(object, key, conn, "dirty")?;
            let clean = self.inner.state.lock().tracking.settle_dirty(object.id(), *seen);
            log_requeued(clean, key, object.id());
            report.updated += 1;
        }

        info!(
            "event=flush module=manager status=ok inserted={} updated={} duration_ms={}",
            report.inserted,
            report.updated,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    fn flush_one(
        &self,
        object: &ObjectRef,
        key: &TypeKey,
        conn: &Connection,
        phase: &str,
    ) -> PersistResult<()> {
        let result = self
            .mapper_for(key)
            .and_then(|mapper| mapper.upsert(object.as_ref(), conn));
        if let Err(err) = &result {
            error!(
                "event=flush module=manager status=error phase={phase} type={key} id={} error={err}",
                object.id()
            );
        }
        result
    }

    /// Deletes `object` from the store and stops tracking it.
    ///
    /// Takes effect immediately rather than at the next flush. Only the
    /// installed instance can be deleted; another instance carrying the same
    /// id fails with `Untracked`.
    pub fn delete(&self, object: &dyn PersistenceCapable, conn: &Connection) -> PersistResult<()> {
        let id = object.id();
        let key = {
            let state = self.inner.state.lock();
            match (state.identity.get(&id), state.identity.type_of(&id)) {
                (Some(resident), Some(key)) if is_same_instance(&resident, object) => key,
                _ => {
                    debug!("event=delete module=manager status=rejected id={id} reason=not_resident");
                    return Err(PersistError::Untracked(id));
                }
            }
        };

        self.mapper_for(&key)?.delete(object, conn)?;

        let mut state = self.inner.state.lock();
        state.tracking.forget(&id);
        state.identity.remove(&id);
        debug!("event=delete module=manager status=ok type={key} id={id}");
        Ok(())
    }

    pub fn is_tracked(&self, id: &ObjectId) -> bool {
        self.inner.state.lock().identity.contains(id)
    }

    pub fn is_new(&self, id: &ObjectId) -> bool {
        self.inner.state.lock().tracking.is_new(id)
    }

    pub fn is_dirty(&self, id: &ObjectId) -> bool {
        self.inner.state.lock().tracking.is_dirty(id)
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.state.lock().identity.len()
    }

    /// Returns `(new, dirty)` counts awaiting flush.
    pub fn pending(&self) -> (usize, usize) {
        self.inner.state.lock().tracking.counts()
    }

    fn require_type(&self, type_key: &str) -> PersistResult<TypeKey> {
        self.inner
            .registry
            .resolve_key(type_key)
            .ok_or_else(|| PersistError::UnregisteredType(type_key.to_string()))
    }

    fn mapper_for(&self, key: &str) -> PersistResult<Box<dyn Mapper>> {
        let factory = self
            .inner
            .registry
            .mapper_factory(key)
            .ok_or_else(|| PersistError::UnregisteredType(key.to_string()))?;
        Ok(factory(self.handle()))
    }
}

/// Snapshot of tracked objects with the dirty generation seen at flush start.
fn collect_batch(
    state: &UnitState,
    ids: Vec<ObjectId>,
) -> PersistResult<Vec<(ObjectRef, TypeKey, u64)>> {
    ids.into_iter()
        .map(|id| match (state.identity.get(&id), state.identity.type_of(&id)) {
            (Some(object), Some(key)) => Ok((object, key, state.tracking.generation(&id))),
            _ => Err(PersistError::InvariantViolation(format!(
                "tracked id {id} is missing from the identity map"
            ))),
        })
        .collect()
}

fn is_same_instance(resident: &ObjectRef, object: &dyn PersistenceCapable) -> bool {
    std::ptr::eq(Arc::as_ptr(resident) as *const (), object as *const _ as *const ())
}

fn log_requeued(clean: bool, key: &TypeKey, id: ObjectId) {
    if !clean {
        debug!("event=flush module=manager status=requeued type={key} id={id} reason=changed_during_write");
    }
}

impl ManagerHandle {
    /// Returns the manager while it is still alive.
    pub fn upgrade(&self) -> Option<PersistenceManager> {
        self.inner
            .upgrade()
            .map(|inner| PersistenceManager { inner })
    }

    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Reads through the manager, failing with `ManagerReleased` once it is gone.
    pub fn read_as<T: PersistenceCapable>(
        &self,
        id: ObjectId,
        type_key: &str,
        conn: &Connection,
    ) -> PersistResult<Arc<T>> {
        self.upgrade()
            .ok_or(PersistError::ManagerReleased)?
            .read_as::<T>(id, type_key, conn)
    }

    /// Current time and actor from the manager's configuration.
    ///
    /// Falls back to wall-clock time without actor once the manager is gone.
    pub fn audit_stamp(&self) -> AuditStamp {
        match self.inner.upgrade() {
            Some(inner) => AuditStamp {
                at_ms: inner.config.clock.now_ms(),
                actor: inner.config.actor.clone(),
            },
            None => AuditStamp {
                at_ms: system_now_ms(),
                actor: None,
            },
        }
    }

    pub(crate) fn mark_dirty(&self, id: ObjectId) {
        if let Some(manager) = self.upgrade() {
            manager.mark_dirty(id);
        }
    }
}
