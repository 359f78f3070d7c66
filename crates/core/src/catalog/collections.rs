use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{from_micros, labels, now_micros};
use crate::domain::Collection;
use crate::error::{from_store, ConstraintExt, Error, Result};

const COLUMNS: &str = "id, owner_id, name, is_default, created_at, updated_at";

/// Row without labels; callers attach them with `labels::for_collection`.
fn from_row(row: &Row<'_>) -> rusqlite::Result<Collection> {
    Ok(Collection {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        is_default: row.get(3)?,
        labels: Vec::new(),
        created_at: from_micros(row.get(4)?),
        updated_at: from_micros(row.get(5)?),
    })
}

fn with_labels(conn: &Connection, mut collection: Collection) -> Result<Collection> {
    collection.labels = labels::for_collection(conn, collection.id)?;
    Ok(collection)
}

pub fn insert(
    conn: &Connection,
    id: Uuid,
    owner_id: Uuid,
    name: &str,
    is_default: bool,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO collections (id, owner_id, name, is_default, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, owner_id, name, is_default, now],
    )
    .on_conflict(|| Error::Conflict("owner already has a default collection".to_string()))?;
    Ok(())
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<Collection>> {
    let collection = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM collections WHERE id = ?1"),
            params![id],
            from_row,
        )
        .optional()?;
    collection.map(|c| with_labels(conn, c)).transpose()
}

pub fn default_for_owner(conn: &Connection, owner_id: Uuid) -> Result<Option<Collection>> {
    let collection = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM collections WHERE owner_id = ?1 AND is_default = 1"),
            params![owner_id],
            from_row,
        )
        .optional()?;
    collection.map(|c| with_labels(conn, c)).transpose()
}

pub fn list_for_owner(conn: &Connection, owner_id: Uuid) -> Result<Vec<Collection>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM collections WHERE owner_id = ?1
         ORDER BY is_default DESC, created_at, rowid"
    ))?;
    let rows = stmt
        .query_map(params![owner_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(|c| with_labels(conn, c)).collect()
}

pub fn rename(conn: &Connection, id: Uuid, name: &str) -> Result<()> {
    conn.execute(
        "UPDATE collections SET name = ?1, updated_at = ?2 WHERE id = ?3",
        params![name, now_micros(), id],
    )
    .map_err(from_store)?;
    Ok(())
}

pub fn touch(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE collections SET updated_at = ?1 WHERE id = ?2",
        params![now_micros(), id],
    )?;
    Ok(())
}

/// Ids of the images in a collection, oldest first.
pub fn image_ids(conn: &Connection, id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM images WHERE collection_id = ?1 ORDER BY created_at, rowid",
    )?;
    let ids = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Delete the collection row. The default-collection trigger surfaces as
/// `InvariantViolation`.
pub fn delete(conn: &Connection, id: Uuid) -> Result<bool> {
    let removed = conn
        .execute("DELETE FROM collections WHERE id = ?1", params![id])
        .map_err(from_store)?;
    Ok(removed == 1)
}
