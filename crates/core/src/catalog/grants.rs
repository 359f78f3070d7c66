use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::Result;

/// Record that `principal_id` holds `permission` on a resource. Granting twice
/// is a no-op.
pub fn insert(
    conn: &Connection,
    principal_id: Uuid,
    resource_type: &str,
    resource_id: Uuid,
    permission: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO grants (principal_id, resource_type, resource_id, permission)
         VALUES (?1, ?2, ?3, ?4)",
        params![principal_id, resource_type, resource_id, permission],
    )?;
    Ok(())
}

pub fn delete(
    conn: &Connection,
    principal_id: Uuid,
    resource_type: &str,
    resource_id: Uuid,
    permission: &str,
) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM grants
         WHERE principal_id = ?1 AND resource_type = ?2 AND resource_id = ?3 AND permission = ?4",
        params![principal_id, resource_type, resource_id, permission],
    )?;
    Ok(removed == 1)
}

pub fn has(
    conn: &Connection,
    principal_id: Uuid,
    resource_type: &str,
    resource_id: Uuid,
    permission: &str,
) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM grants
         WHERE principal_id = ?1 AND resource_type = ?2 AND resource_id = ?3 AND permission = ?4)",
        params![principal_id, resource_type, resource_id, permission],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Drop every grant on a resource that is being deleted.
pub fn delete_for_resource(conn: &Connection, resource_type: &str, resource_id: Uuid) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM grants WHERE resource_type = ?1 AND resource_id = ?2",
        params![resource_type, resource_id],
    )?;
    Ok(removed)
}
