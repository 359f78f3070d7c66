use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{from_micros, now_micros};
use crate::domain::Principal;
use crate::error::{ConstraintExt, Error, Result};

const COLUMNS: &str = "id, username, display_name, credential_hash, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Principal> {
    Ok(Principal {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        credential_hash: row.get(3)?,
        created_at: from_micros(row.get(4)?),
        updated_at: from_micros(row.get(5)?),
    })
}

pub fn insert(
    conn: &Connection,
    id: Uuid,
    username: &str,
    display_name: &str,
    credential_hash: &str,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO principals (id, username, display_name, credential_hash, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, username, display_name, credential_hash, now],
    )
    .on_conflict(|| Error::Conflict(format!("username '{username}' is already taken")))?;
    Ok(())
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<Principal>> {
    let principal = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM principals WHERE id = ?1"),
            params![id],
            from_row,
        )
        .optional()?;
    Ok(principal)
}

pub fn get_by_username(conn: &Connection, username: &str) -> Result<Option<Principal>> {
    let principal = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM principals WHERE username = ?1"),
            params![username],
            from_row,
        )
        .optional()?;
    Ok(principal)
}

pub fn username_taken(conn: &Connection, username: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM principals WHERE username = ?1)",
        params![username],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Swap the credential hash only if `current` still matches. Returns false when
/// it does not.
pub fn replace_credential(conn: &Connection, id: Uuid, current: &str, new: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE principals SET credential_hash = ?1, updated_at = ?2
         WHERE id = ?3 AND credential_hash = ?4",
        params![new, now_micros(), id, current],
    )?;
    Ok(changed == 1)
}
