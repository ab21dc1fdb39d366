//! Shared identity/audit store operations.
//!
//! Every persisted object owns one row in `objects`, keyed by id. The row
//! carries the version counter used for optimistic concurrency, the tombstone
//! flag and the audit trail. Type-specific tables reference it with
//! `ON DELETE CASCADE`, so removing the audit row removes the object.

use crate::error::{PersistError, PersistResult};
use crate::model::id::ObjectId;
use crate::model::metadata::Metadata;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Time and actor written to audit columns by one mapper call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditStamp {
    pub at_ms: i64,
    pub actor: Option<String>,
}

/// One `objects` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    pub type_key: String,
    pub version: i64,
    pub deleted: bool,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl AuditRow {
    /// Overwrites `metadata` with the stored audit state.
    pub fn apply_to(&self, metadata: &mut Metadata) {
        metadata.version = Some(self.version);
        metadata.deleted = self.deleted;
        metadata.created_at = self.created_at;
        metadata.updated_at = self.updated_at;
        metadata.created_by = self.created_by.clone();
        metadata.updated_by = self.updated_by.clone();
    }
}

/// Inserts the audit row for `id` at version 0 unless it already exists.
///
/// Returns `true` when this call created the row.
pub fn ensure_row(
    conn: &Connection,
    id: ObjectId,
    type_key: &str,
    stamp: &AuditStamp,
) -> PersistResult<bool> {
    let inserted = conn.execute(
        "INSERT INTO objects (id, type_key, version, deleted, created_at, created_by)
         VALUES (?1, ?2, 0, 0, ?3, ?4)
         ON CONFLICT (id) DO NOTHING;",
        params![
            id.to_string(),
            type_key,
            stamp.at_ms,
            stamp.actor.as_deref()
        ],
    )?;
    Ok(inserted == 1)
}

pub fn load(conn: &Connection, id: ObjectId) -> PersistResult<Option<AuditRow>> {
    let mut stmt = conn.prepare(
        "SELECT
            type_key,
            version,
            deleted,
            created_at,
            updated_at,
            created_by,
            updated_by
         FROM objects
         WHERE id = ?1;",
    )?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_audit_row(row)?));
    }

    Ok(None)
}

pub fn current_version(conn: &Connection, id: ObjectId) -> PersistResult<Option<i64>> {
    let version = conn
        .query_row(
            "SELECT version FROM objects WHERE id = ?1;",
            [id.to_string()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(version)
}

/// Moves the stored version from `expected` to `expected + 1`.
///
/// The update only matches while the stored version still equals
/// `expected`; otherwise the row changed underneath the caller and the call
/// fails with `OptimisticConflict` carrying the version actually stored.
pub fn advance_version(
    conn: &Connection,
    id: ObjectId,
    expected: i64,
    stamp: &AuditStamp,
) -> PersistResult<i64> {
    let next = expected + 1;
    let changed = conn.execute(
        "UPDATE objects
         SET
            version = ?1,
            updated_at = ?2,
            updated_by = ?3
         WHERE id = ?4 AND version = ?5;",
        params![
            next,
            stamp.at_ms,
            stamp.actor.as_deref(),
            id.to_string(),
            expected
        ],
    )?;

    if changed == 0 {
        let actual = current_version(conn, id)?.ok_or(PersistError::NotFound(id))?;
        return Err(PersistError::OptimisticConflict {
            id,
            expected,
            actual,
        });
    }

    Ok(next)
}

/// Deletes the audit row; the store cascades to type-specific rows.
///
/// Returns `false` when no row existed.
pub fn remove(conn: &Connection, id: ObjectId) -> PersistResult<bool> {
    let changed = conn.execute("DELETE FROM objects WHERE id = ?1;", [id.to_string()])?;
    Ok(changed > 0)
}

/// Returns `(type_key, row_count)` pairs sorted by type key.
pub fn count_by_type(conn: &Connection) -> PersistResult<Vec<(String, u64)>> {
    let mut stmt = conn.prepare(
        "SELECT type_key, COUNT(*)
         FROM objects
         GROUP BY type_key
         ORDER BY type_key ASC;",
    )?;
    let mut rows = stmt.query([])?;
    let mut counts = Vec::new();
    while let Some(row) = rows.next()? {
        let type_key: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        counts.push((type_key, u64::try_from(count).unwrap_or(0)));
    }
    Ok(counts)
}

fn parse_audit_row(row: &Row<'_>) -> PersistResult<AuditRow> {
    let deleted = match row.get::<_, i64>("deleted")? {
        0 => false,
        1 => true,
        other => {
            return Err(PersistError::InvalidData(format!(
                "invalid deleted value `{other}` in objects.deleted"
            )));
        }
    };

    Ok(AuditRow {
        type_key: row.get("type_key")?,
        version: row.get("version")?,
        deleted,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        created_by: row.get("created_by")?,
        updated_by: row.get("updated_by")?,
    })
}
