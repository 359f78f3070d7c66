use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{duplicates, from_micros, grants, labels, now_micros};
use crate::domain::Image;
use crate::error::{from_store, ConstraintExt, Error, Result};

const COLUMNS: &str = "id, owner_id, collection_id, original_filename, stored_filename, \
                       mime_type, size_bytes, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Image> {
    Ok(Image {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        collection_id: row.get(2)?,
        original_filename: row.get(3)?,
        stored_filename: row.get(4)?,
        mime_type: row.get(5)?,
        size_bytes: row.get::<_, i64>(6)? as u64,
        labels: Vec::new(),
        created_at: from_micros(row.get(7)?),
        updated_at: from_micros(row.get(8)?),
    })
}

fn with_labels(conn: &Connection, mut image: Image) -> Result<Image> {
    image.labels = labels::for_image(conn, image.id)?;
    Ok(image)
}

/// Insert an image row. The owner is taken from the collection inside the
/// statement so it can never disagree with it.
#[allow(clippy::too_many_arguments)]
pub fn insert(
    conn: &Connection,
    id: Uuid,
    collection_id: Uuid,
    original_filename: &str,
    stored_filename: &str,
    mime_type: &str,
    size_bytes: u64,
    now: i64,
) -> Result<()> {
    let inserted = conn
        .execute(
            "INSERT INTO images (id, owner_id, collection_id, original_filename, stored_filename,
                                 mime_type, size_bytes, created_at, updated_at)
             SELECT ?1, owner_id, id, ?3, ?4, ?5, ?6, ?7, ?7 FROM collections WHERE id = ?2",
            params![
                id,
                collection_id,
                original_filename,
                stored_filename,
                mime_type,
                size_bytes as i64,
                now,
            ],
        )
        .on_conflict(|| Error::Conflict(format!("stored filename '{stored_filename}' is taken")))?;
    if inserted == 0 {
        return Err(Error::CollectionNotFound(collection_id));
    }
    Ok(())
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<Image>> {
    let image = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM images WHERE id = ?1"),
            params![id],
            from_row,
        )
        .optional()?;
    image.map(|i| with_labels(conn, i)).transpose()
}

pub fn list_in_collection(conn: &Connection, collection_id: Uuid) -> Result<Vec<Image>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM images WHERE collection_id = ?1 ORDER BY created_at, rowid"
    ))?;
    let rows = stmt
        .query_map(params![collection_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(|i| with_labels(conn, i)).collect()
}

pub fn rename(conn: &Connection, id: Uuid, original_filename: &str) -> Result<()> {
    conn.execute(
        "UPDATE images SET original_filename = ?1, updated_at = ?2 WHERE id = ?3",
        params![original_filename, now_micros(), id],
    )
    .map_err(from_store)?;
    Ok(())
}

/// Move an image to another collection and recompute its owner from it.
pub fn move_to(conn: &Connection, id: Uuid, collection_id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE images
         SET collection_id = ?1,
             owner_id = (SELECT owner_id FROM collections WHERE id = ?1),
             updated_at = ?2
         WHERE id = ?3",
        params![collection_id, now_micros(), id],
    )
    .map_err(from_store)?;
    Ok(())
}

pub fn touch(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE images SET updated_at = ?1 WHERE id = ?2",
        params![now_micros(), id],
    )?;
    Ok(())
}

/// Delete an image with its fingerprint and outgoing duplicate link. Images
/// that duplicate it are re-rooted first.
pub fn delete(conn: &Connection, id: Uuid) -> Result<bool> {
    duplicates::promote_dependents(conn, id)?;
    grants::delete_for_resource(conn, "image", id)?;
    let removed = conn
        .execute("DELETE FROM images WHERE id = ?1", params![id])
        .map_err(from_store)?;
    Ok(removed == 1)
}
