//! Generic SQL mapper driven by per-type record descriptions.
//!
//! A persisted type supplies its SQL and row conversion through
//! [`SqlRecord`]; [`SqlMapper`] turns that into a full [`Mapper`],
//! including the audit-store version protocol.

use crate::error::{PersistError, PersistResult};
use crate::manager::ManagerHandle;
use crate::mapper::audit;
use crate::mapper::Mapper;
use crate::model::id::ObjectId;
use crate::model::object::{ObjectRef, PersistenceCapable};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::sync::Arc;
use uuid::Uuid;

/// Table-level description of one persisted type.
pub trait SqlRecord: Send + Sync + 'static {
    type Object: PersistenceCapable;

    /// Key the type is registered under. Written to `objects.type_key`.
    fn type_key(&self) -> &str;

    /// Selects exactly one row; `?1` is the id text.
    fn select_sql(&self) -> &str;

    /// Inserts or overwrites one row; placeholders follow [`SqlRecord::to_params`].
    fn upsert_sql(&self) -> &str;

    fn to_params(&self, object: &Self::Object) -> Vec<Value>;

    fn from_row(&self, row: &Row<'_>) -> PersistResult<Self::Object>;

    /// Attaches linked entities after hydration.
    fn resolve_links(
        &self,
        _object: &Self::Object,
        _manager: &ManagerHandle,
        _conn: &Connection,
    ) -> PersistResult<()> {
        Ok(())
    }
}

/// [`Mapper`] implementation shared by every [`SqlRecord`].
pub struct SqlMapper<R: SqlRecord> {
    record: R,
    manager: ManagerHandle,
}

impl<R: SqlRecord> SqlMapper<R> {
    pub fn new(record: R, manager: ManagerHandle) -> Self {
        Self { record, manager }
    }

    /// Returns a factory suitable for `register_mapper`.
    pub fn factory(record: R) -> impl Fn(ManagerHandle) -> Self + Send + Sync + 'static
    where
        R: Clone,
    {
        move |manager| Self::new(record.clone(), manager)
    }

    pub fn record(&self) -> &R {
        &self.record
    }

    fn select(&self, id: ObjectId, conn: &Connection) -> PersistResult<Option<R::Object>> {
        let mut stmt = conn.prepare(self.record.select_sql())?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(self.record.from_row(row)?));
        }

        Ok(None)
    }

    fn concrete<'a>(&self, object: &'a dyn PersistenceCapable) -> PersistResult<&'a R::Object> {
        object
            .as_any()
            .downcast_ref::<R::Object>()
            .ok_or_else(|| PersistError::TypeMismatch {
                id: object.id(),
                type_key: self.record.type_key().to_string(),
            })
    }
}

impl<R: SqlRecord> Mapper for SqlMapper<R> {
    fn read(&self, id: ObjectId, conn: &Connection) -> PersistResult<ObjectRef> {
        let object = self.select(id, conn)?.ok_or(PersistError::NotFound(id))?;

        if object.id() != id {
            return Err(PersistError::InvalidData(format!(
                "`{}` row for {id} hydrated with id {}",
                self.record.type_key(),
                object.id()
            )));
        }

        let audit_row = audit::load(conn, id)?.ok_or_else(|| {
            PersistError::InvalidData(format!(
                "`{}` row {id} has no entry in objects",
                self.record.type_key()
            ))
        })?;
        object
            .core()
            .with_metadata(|metadata| audit_row.apply_to(metadata));

        self.record.resolve_links(&object, &self.manager, conn)?;

        debug!(
            "event=mapper_read module=mapper status=ok type={} id={id} version={} deleted={}",
            self.record.type_key(),
            audit_row.version,
            audit_row.deleted
        );
        Ok(Arc::new(object))
    }

    fn upsert(&self, object: &dyn PersistenceCapable, conn: &Connection) -> PersistResult<()> {
        let record = self.concrete(object)?;
        let id = object.id();
        if id.is_nil() {
            return Err(PersistError::InvariantViolation(format!(
                "`{}` object has no id at upsert",
                self.record.type_key()
            )));
        }

        let stamp = self.manager.audit_stamp();
        let held = object.metadata().current_version();

        let created = audit::ensure_row(conn, id, self.record.type_key(), &stamp)?;
        let expected = if created {
            0
        } else {
            let actual = audit::current_version(conn, id)?.ok_or(PersistError::NotFound(id))?;
            if actual != held {
                return Err(PersistError::OptimisticConflict {
                    id,
                    expected: held,
                    actual,
                });
            }
            held
        };

        let next = audit::advance_version(conn, id, expected, &stamp)?;
        conn.execute(
            self.record.upsert_sql(),
            params_from_iter(self.record.to_params(record)),
        )?;

        object.core().with_metadata(|metadata| {
            if created {
                metadata.version = Some(0);
                metadata.ensure_created(stamp.at_ms, stamp.actor.as_deref());
            }
            metadata.increment_version(stamp.at_ms, stamp.actor.as_deref());
        });

        debug!(
            "event=mapper_upsert module=mapper status=ok type={} id={id} created={created} version={next}",
            self.record.type_key()
        );
        Ok(())
    }

    fn delete(&self, object: &dyn PersistenceCapable, conn: &Connection) -> PersistResult<()> {
        let id = object.id();
        if !audit::remove(conn, id)? {
            return Err(PersistError::NotFound(id));
        }
        object.core().with_metadata(|metadata| metadata.deleted = true);

        debug!(
            "event=mapper_delete module=mapper status=ok type={} id={id}",
            self.record.type_key()
        );
        Ok(())
    }
}

/// Binds an id as SQL text.
pub fn id_value(id: ObjectId) -> Value {
    Value::Text(id.to_string())
}

/// Parses an id column, naming the column in the error.
pub fn parse_id(text: &str, column: &str) -> PersistResult<ObjectId> {
    Uuid::parse_str(text)
        .map_err(|_| PersistError::InvalidData(format!("invalid uuid value `{text}` in {column}")))
}

/// Binds optional text, mapping `None` to SQL NULL.
pub fn text_value(value: Option<&str>) -> Value {
    match value {
        Some(text) => Value::Text(text.to_string()),
        None => Value::Null,
    }
}
