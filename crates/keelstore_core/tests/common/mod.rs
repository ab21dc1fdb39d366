#![allow(dead_code)]

use keelstore_core::error::PersistResult;
use keelstore_core::mapper::sql::{id_value, parse_id, text_value};
use keelstore_core::{
    open_db, open_db_in_memory, EntityLink, FixedClock, ManagerConfig, ManagerHandle, Mapper,
    ObjectCore, ObjectId, ObjectRef, PersistenceCapable, SqlMapper, SqlRecord, TypeInitializer,
    TypeRegistry,
};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use std::any::Any;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

pub const PERSON: &str = "person";
pub const ORGANIZATION: &str = "organization";
pub const EMPLOYMENT: &str = "employment";
pub const ACTOR: &str = "tester";
pub const START_MS: i64 = 1_700_000_000_000;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS persons (
    id TEXT PRIMARY KEY NOT NULL REFERENCES objects (id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    email TEXT
);
CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY NOT NULL REFERENCES objects (id) ON DELETE CASCADE,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS employments (
    id TEXT PRIMARY KEY NOT NULL REFERENCES objects (id) ON DELETE CASCADE,
    person_id TEXT NOT NULL REFERENCES persons (id),
    organization_id TEXT NOT NULL REFERENCES organizations (id),
    title TEXT NOT NULL
);
";

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PersonFields {
    name: String,
    email: Option<String>,
}

#[derive(Debug)]
pub struct Person {
    core: ObjectCore,
    fields: Mutex<PersonFields>,
}

impl Person {
    pub fn name(&self) -> String {
        self.fields.lock().name.clone()
    }

    pub fn email(&self) -> Option<String> {
        self.fields.lock().email.clone()
    }

    pub fn set_name(&self, name: &str) {
        self.fields.lock().name = name.to_string();
        self.core.mark_dirty();
    }

    pub fn set_email(&self, email: Option<&str>) {
        self.fields.lock().email = email.map(str::to_string);
        self.core.mark_dirty();
    }
}

impl PersistenceCapable for Person {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[derive(Debug)]
pub struct Organization {
    core: ObjectCore,
    name: Mutex<String>,
}

impl Organization {
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_string();
        self.core.mark_dirty();
    }
}

impl PersistenceCapable for Organization {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

struct EmploymentFields {
    person: EntityLink<Person>,
    organization: EntityLink<Organization>,
    title: String,
}

/// Relationship between a person and an organization.
pub struct Employment {
    core: ObjectCore,
    fields: Mutex<EmploymentFields>,
}

impl Employment {
    pub fn person(&self) -> EntityLink<Person> {
        self.fields.lock().person.clone()
    }

    pub fn organization(&self) -> EntityLink<Organization> {
        self.fields.lock().organization.clone()
    }

    pub fn title(&self) -> String {
        self.fields.lock().title.clone()
    }

    pub fn connect(&self, person: &Arc<Person>, organization: &Arc<Organization>, title: &str) {
        {
            let mut fields = self.fields.lock();
            fields.person = EntityLink::to(person);
            fields.organization = EntityLink::to(organization);
            fields.title = title.to_string();
        }
        self.core.mark_dirty();
    }

    /// Points at stored ids without holding the instances.
    pub fn connect_ids(&self, person: ObjectId, organization: ObjectId, title: &str) {
        {
            let mut fields = self.fields.lock();
            fields.person = EntityLink::unresolved(person);
            fields.organization = EntityLink::unresolved(organization);
            fields.title = title.to_string();
        }
        self.core.mark_dirty();
    }
}

impl PersistenceCapable for Employment {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PersonRecord;

impl SqlRecord for PersonRecord {
    type Object = Person;

    fn type_key(&self) -> &str {
        PERSON
    }

    fn select_sql(&self) -> &str {
        "SELECT id, name, email FROM persons WHERE id = ?1;"
    }

    fn upsert_sql(&self) -> &str {
        "INSERT INTO persons (id, name, email)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (id) DO UPDATE SET
            name = excluded.name,
            email = excluded.email;"
    }

    fn to_params(&self, person: &Person) -> Vec<Value> {
        let fields = person.fields.lock();
        vec![
            id_value(person.id()),
            Value::Text(fields.name.clone()),
            text_value(fields.email.as_deref()),
        ]
    }

    fn from_row(&self, row: &Row<'_>) -> PersistResult<Person> {
        let id: String = row.get("id")?;
        Ok(Person {
            core: ObjectCore::with_id(parse_id(&id, "persons.id")?),
            fields: Mutex::new(PersonFields {
                name: row.get("name")?,
                email: row.get("email")?,
            }),
        })
    }
}

#[derive(Clone)]
pub struct OrganizationRecord;

impl SqlRecord for OrganizationRecord {
    type Object = Organization;

    fn type_key(&self) -> &str {
        ORGANIZATION
    }

    fn select_sql(&self) -> &str {
        "SELECT id, name FROM organizations WHERE id = ?1;"
    }

    fn upsert_sql(&self) -> &str {
        "INSERT INTO organizations (id, name)
         VALUES (?1, ?2)
         ON CONFLICT (id) DO UPDATE SET name = excluded.name;"
    }

    fn to_params(&self, organization: &Organization) -> Vec<Value> {
        vec![
            id_value(organization.id()),
            Value::Text(organization.name()),
        ]
    }

    fn from_row(&self, row: &Row<'_>) -> PersistResult<Organization> {
        let id: String = row.get("id")?;
        Ok(Organization {
            core: ObjectCore::with_id(parse_id(&id, "organizations.id")?),
            name: Mutex::new(row.get("name")?),
        })
    }
}

#[derive(Clone)]
pub struct EmploymentRecord;

impl SqlRecord for EmploymentRecord {
    type Object = Employment;

    fn type_key(&self) -> &str {
        EMPLOYMENT
    }

    fn select_sql(&self) -> &str {
        "SELECT id, person_id, organization_id, title FROM employments WHERE id = ?1;"
    }

    fn upsert_sql(&self) -> &str {
        "INSERT INTO employments (id, person_id, organization_id, title)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (id) DO UPDATE SET
            person_id = excluded.person_id,
            organization_id = excluded.organization_id,
            title = excluded.title;"
    }

    fn to_params(&self, employment: &Employment) -> Vec<Value> {
        let fields = employment.fields.lock();
        vec![
            id_value(employment.id()),
            id_value(fields.person.id()),
            id_value(fields.organization.id()),
            Value::Text(fields.title.clone()),
        ]
    }

    fn from_row(&self, row: &Row<'_>) -> PersistResult<Employment> {
        let id: String = row.get("id")?;
        let person_id: String = row.get("person_id")?;
        let organization_id: String = row.get("organization_id")?;
        Ok(Employment {
            core: ObjectCore::with_id(parse_id(&id, "employments.id")?),
            fields: Mutex::new(EmploymentFields {
                person: EntityLink::unresolved(parse_id(&person_id, "employments.person_id")?),
                organization: EntityLink::unresolved(parse_id(
                    &organization_id,
                    "employments.organization_id",
                )?),
                title: row.get("title")?,
            }),
        })
    }

    fn resolve_links(
        &self,
        employment: &Employment,
        manager: &ManagerHandle,
        conn: &Connection,
    ) -> PersistResult<()> {
        let mut fields = employment.fields.lock();
        fields.person.resolve(manager, PERSON, conn)?;
        fields.organization.resolve(manager, ORGANIZATION, conn)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry, counting and store helpers
// ---------------------------------------------------------------------------

pub struct Directory;

impl TypeInitializer for Directory {
    fn register_all(&self, registry: &TypeRegistry) {
        registry.register_type(PERSON, || Person {
            core: ObjectCore::unassigned(),
            fields: Mutex::new(PersonFields::default()),
        });
        registry.register_mapper(PERSON, SqlMapper::factory(PersonRecord));

        registry.register_type(ORGANIZATION, || Organization {
            core: ObjectCore::new(),
            name: Mutex::new(String::new()),
        });
        registry.register_mapper(ORGANIZATION, SqlMapper::factory(OrganizationRecord));

        registry.register_type(EMPLOYMENT, || Employment {
            core: ObjectCore::new(),
            fields: Mutex::new(EmploymentFields {
                person: EntityLink::unresolved(ObjectId::nil()),
                organization: EntityLink::unresolved(ObjectId::nil()),
                title: String::new(),
            }),
        });
        registry.register_mapper(EMPLOYMENT, SqlMapper::factory(EmploymentRecord));
    }
}

pub fn registry() -> Arc<TypeRegistry> {
    Arc::new(TypeRegistry::with_initializer(&Directory))
}

/// Mapper invocation counters.
#[derive(Debug, Default)]
pub struct MapperCalls {
    pub reads: AtomicUsize,
    pub upserts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MapperCalls {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

pub struct CountingMapper<M: Mapper> {
    inner: M,
    calls: Arc<MapperCalls>,
}

impl<M: Mapper> Mapper for CountingMapper<M> {
    fn read(&self, id: ObjectId, conn: &Connection) -> PersistResult<ObjectRef> {
        self.calls.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(id, conn)
    }

    fn upsert(&self, object: &dyn PersistenceCapable, conn: &Connection) -> PersistResult<()> {
        self.calls.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(object, conn)
    }

    fn delete(&self, object: &dyn PersistenceCapable, conn: &Connection) -> PersistResult<()> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(object, conn)
    }
}

/// Full registry whose person mapper counts its calls.
pub fn counted_registry() -> (Arc<TypeRegistry>, Arc<MapperCalls>) {
    let registry = registry();
    let calls = Arc::new(MapperCalls::default());
    let counter = Arc::clone(&calls);
    registry.register_mapper(PERSON, move |manager| CountingMapper {
        inner: SqlMapper::new(PersonRecord, manager),
        calls: Arc::clone(&counter),
    });
    (registry, calls)
}

/// Holds one upsert open after its write until the test releases it.
pub struct UpsertGate {
    armed: AtomicBool,
    reached: Barrier,
    resume: Barrier,
}

impl UpsertGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            armed: AtomicBool::new(false),
            reached: Barrier::new(2),
            resume: Barrier::new(2),
        })
    }

    /// Makes the next upsert pause.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Blocks until the armed upsert has written its row.
    pub fn wait_reached(&self) {
        self.reached.wait();
    }

    pub fn release(&self) {
        self.resume.wait();
    }

    fn pause_if_armed(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.wait();
            self.resume.wait();
        }
    }
}

pub struct GatedMapper<M: Mapper> {
    inner: CountingMapper<M>,
    gate: Arc<UpsertGate>,
}

impl<M: Mapper> Mapper for GatedMapper<M> {
    fn read(&self, id: ObjectId, conn: &Connection) -> PersistResult<ObjectRef> {
        self.inner.read(id, conn)
    }

    fn upsert(&self, object: &dyn PersistenceCapable, conn: &Connection) -> PersistResult<()> {
        self.inner.upsert(object, conn)?;
        self.gate.pause_if_armed();
        Ok(())
    }

    fn delete(&self, object: &dyn PersistenceCapable, conn: &Connection) -> PersistResult<()> {
        self.inner.delete(object, conn)
    }
}

/// Full registry whose person mapper counts its calls and can pause after
/// writing.
pub fn gated_registry() -> (Arc<TypeRegistry>, Arc<UpsertGate>, Arc<MapperCalls>) {
    let registry = registry();
    let gate = UpsertGate::new();
    let calls = Arc::new(MapperCalls::default());
    let (gate_ref, counter) = (Arc::clone(&gate), Arc::clone(&calls));
    registry.register_mapper(PERSON, move |manager| GatedMapper {
        inner: CountingMapper {
            inner: SqlMapper::new(PersonRecord, manager),
            calls: Arc::clone(&counter),
        },
        gate: Arc::clone(&gate_ref),
    });
    (registry, gate, calls)
}

pub fn config(clock: &Arc<FixedClock>) -> ManagerConfig {
    ManagerConfig::default()
        .with_actor(ACTOR)
        .with_clock(Arc::clone(clock) as Arc<dyn keelstore_core::Clock>)
}

pub fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(START_MS))
}

pub fn open_store() -> Connection {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn
}

pub fn open_store_at(path: &Path) -> Connection {
    let conn = open_db(path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn
}

pub fn stored_version(conn: &Connection, id: ObjectId) -> Option<i64> {
    keelstore_core::mapper::audit::current_version(conn, id).unwrap()
}

pub fn stored_person_name(conn: &Connection, id: ObjectId) -> Option<String> {
    conn.query_row(
        "SELECT name FROM persons WHERE id = ?1;",
        [id.to_string()],
        |row| row.get(0),
    )
    .ok()
}
