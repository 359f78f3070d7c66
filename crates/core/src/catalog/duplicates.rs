use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::{fingerprints, from_micros};
use crate::domain::{Fingerprint, ImageDuplicate, MatchKind};
use crate::error::{ConstraintExt, Error, Result};
use crate::matching;

fn from_row(row: &Row<'_>) -> rusqlite::Result<ImageDuplicate> {
    let kind: String = row.get(2)?;
    let kind = MatchKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown match kind {kind:?}").into(),
        )
    })?;
    Ok(ImageDuplicate {
        image_id: row.get(0)?,
        original_id: row.get(1)?,
        kind,
        distance: row.get(3)?,
        created_at: from_micros(row.get(4)?),
    })
}

pub fn insert_link(
    conn: &Connection,
    image_id: Uuid,
    original_id: Uuid,
    kind: MatchKind,
    distance: u32,
    now: i64,
) -> Result<ImageDuplicate> {
    conn.execute(
        "INSERT INTO duplicate_links (image_id, original_id, kind, distance, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![image_id, original_id, kind.as_str(), distance, now],
    )
    .on_conflict(|| Error::Conflict(format!("image {image_id} is already linked as a duplicate")))?;
    Ok(ImageDuplicate {
        image_id,
        original_id,
        kind,
        distance,
        created_at: from_micros(now),
    })
}

pub fn get_link(conn: &Connection, image_id: Uuid) -> Result<Option<ImageDuplicate>> {
    let link = conn
        .query_row(
            "SELECT image_id, original_id, kind, distance, created_at
             FROM duplicate_links WHERE image_id = ?1",
            params![image_id],
            from_row,
        )
        .optional()?;
    Ok(link)
}

pub fn delete_link(conn: &Connection, image_id: Uuid) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM duplicate_links WHERE image_id = ?1",
        params![image_id],
    )?;
    Ok(removed == 1)
}

/// Links pointing at `original_id`, oldest duplicate image first.
pub fn links_to(conn: &Connection, original_id: Uuid) -> Result<Vec<ImageDuplicate>> {
    let mut stmt = conn.prepare(
        "SELECT d.image_id, d.original_id, d.kind, d.distance, d.created_at
         FROM duplicate_links d JOIN images i ON i.id = d.image_id
         WHERE d.original_id = ?1
         ORDER BY i.created_at, i.rowid",
    )?;
    let links = stmt
        .query_map(params![original_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(links)
}

/// Every link whose duplicate image belongs to `owner_id`.
pub fn list_for_owner(conn: &Connection, owner_id: Uuid) -> Result<Vec<ImageDuplicate>> {
    let mut stmt = conn.prepare(
        "SELECT d.image_id, d.original_id, d.kind, d.distance, d.created_at
         FROM duplicate_links d JOIN images i ON i.id = d.image_id
         WHERE i.owner_id = ?1
         ORDER BY d.original_id, i.created_at, i.rowid",
    )?;
    let links = stmt
        .query_map(params![owner_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(links)
}

/// The chain root for an image. Links always point at roots, so one hop is
/// enough.
pub fn root_of(conn: &Connection, image_id: Uuid) -> Result<Uuid> {
    Ok(get_link(conn, image_id)?
        .map(|link| link.original_id)
        .unwrap_or(image_id))
}

fn stored_fingerprint(conn: &Connection, image_id: Uuid) -> Result<Fingerprint> {
    fingerprints::get(conn, image_id)?
        .map(|fp| fp.fingerprint)
        .ok_or_else(|| Error::InvariantViolation(format!("image {image_id} has no fingerprint")))
}

/// Re-root the duplicates of an image that is about to be removed or leave
/// its owner. The oldest dependent becomes the new root; the rest are
/// repointed at it and re-measured against its fingerprint.
pub fn promote_dependents(conn: &Connection, id: Uuid) -> Result<Option<Uuid>> {
    let dependents = links_to(conn, id)?;
    let Some((first, rest)) = dependents.split_first() else {
        return Ok(None);
    };
    let root = first.image_id;
    delete_link(conn, root)?;
    if !rest.is_empty() {
        let root_fp = stored_fingerprint(conn, root)?;
        for link in rest {
            let (kind, distance) =
                matching::measure(&stored_fingerprint(conn, link.image_id)?, &root_fp);
            conn.execute(
                "UPDATE duplicate_links SET original_id = ?1, kind = ?2, distance = ?3
                 WHERE image_id = ?4",
                params![root, kind.as_str(), distance, link.image_id],
            )?;
        }
    }
    debug!(removed = %id, new_root = %root, repointed = rest.len(), "promoted duplicate");
    Ok(Some(root))
}
