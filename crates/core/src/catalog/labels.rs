use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{from_micros, now_micros};
use crate::domain::Label;
use crate::error::{ConstraintExt, Error, Result};

fn from_row(row: &Row<'_>) -> rusqlite::Result<Label> {
    Ok(Label {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        text: row.get(2)?,
        created_at: from_micros(row.get(3)?),
        updated_at: from_micros(row.get(4)?),
    })
}

fn conflict(text: &str) -> Error {
    Error::Conflict(format!("label '{text}' already exists for this owner"))
}

pub fn insert(conn: &Connection, owner_id: Uuid, text: &str) -> Result<Label> {
    let id = Uuid::new_v4();
    let now = now_micros();
    conn.execute(
        "INSERT INTO labels (id, owner_id, text, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id, owner_id, text, now],
    )
    .on_conflict(|| conflict(text))?;
    Ok(Label {
        id,
        owner_id,
        text: text.to_string(),
        created_at: from_micros(now),
        updated_at: from_micros(now),
    })
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<Label>> {
    let label = conn
        .query_row(
            "SELECT id, owner_id, text, created_at, updated_at FROM labels WHERE id = ?1",
            params![id],
            from_row,
        )
        .optional()?;
    Ok(label)
}

pub fn find(conn: &Connection, owner_id: Uuid, text: &str) -> Result<Option<Label>> {
    let label = conn
        .query_row(
            "SELECT id, owner_id, text, created_at, updated_at FROM labels
             WHERE owner_id = ?1 AND text = ?2",
            params![owner_id, text],
            from_row,
        )
        .optional()?;
    Ok(label)
}

pub fn list_for_owner(conn: &Connection, owner_id: Uuid) -> Result<Vec<Label>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, text, created_at, updated_at FROM labels
         WHERE owner_id = ?1 ORDER BY text",
    )?;
    let labels = stmt
        .query_map(params![owner_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(labels)
}

pub fn rename(conn: &Connection, id: Uuid, text: &str) -> Result<()> {
    conn.execute(
        "UPDATE labels SET text = ?1, updated_at = ?2 WHERE id = ?3",
        params![text, now_micros(), id],
    )
    .on_conflict(|| conflict(text))?;
    Ok(())
}

/// Delete a label. Join rows go with it; tagged images and collections stay.
pub fn delete(conn: &Connection, id: Uuid) -> Result<bool> {
    let removed = conn.execute("DELETE FROM labels WHERE id = ?1", params![id])?;
    Ok(removed == 1)
}

/// Resolve each text to the owner's label, creating the missing ones.
/// Safe against a concurrent writer creating the same label.
pub fn ensure(conn: &Connection, owner_id: Uuid, texts: &[String]) -> Result<Vec<Label>> {
    let mut labels = Vec::with_capacity(texts.len());
    for text in texts {
        let now = now_micros();
        conn.execute(
            "INSERT INTO labels (id, owner_id, text, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (owner_id, text) DO NOTHING",
            params![Uuid::new_v4(), owner_id, text, now],
        )?;
        let label = find(conn, owner_id, text)?
            .ok_or_else(|| Error::Conflict(format!("label '{text}' vanished during resolution")))?;
        labels.push(label);
    }
    Ok(labels)
}

pub fn for_image(conn: &Connection, image_id: Uuid) -> Result<Vec<Label>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.owner_id, l.text, l.created_at, l.updated_at
         FROM labels l JOIN image_labels il ON il.label_id = l.id
         WHERE il.image_id = ?1 ORDER BY l.text",
    )?;
    let labels = stmt
        .query_map(params![image_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(labels)
}

pub fn for_collection(conn: &Connection, collection_id: Uuid) -> Result<Vec<Label>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.owner_id, l.text, l.created_at, l.updated_at
         FROM labels l JOIN collection_labels cl ON cl.label_id = l.id
         WHERE cl.collection_id = ?1 ORDER BY l.text",
    )?;
    let labels = stmt
        .query_map(params![collection_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(labels)
}

pub fn set_for_image(conn: &Connection, image_id: Uuid, labels: &[Label]) -> Result<()> {
    conn.execute("DELETE FROM image_labels WHERE image_id = ?1", params![image_id])?;
    let mut stmt = conn.prepare("INSERT INTO image_labels (image_id, label_id) VALUES (?1, ?2)")?;
    for label in labels {
        stmt.execute(params![image_id, label.id])?;
    }
    Ok(())
}

pub fn set_for_collection(conn: &Connection, collection_id: Uuid, labels: &[Label]) -> Result<()> {
    conn.execute(
        "DELETE FROM collection_labels WHERE collection_id = ?1",
        params![collection_id],
    )?;
    let mut stmt =
        conn.prepare("INSERT INTO collection_labels (collection_id, label_id) VALUES (?1, ?2)")?;
    for label in labels {
        stmt.execute(params![collection_id, label.id])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support;

    #[test]
    fn test_insert_and_find() {
        let catalog = test_support::catalog();
        let owner = test_support::principal(catalog.conn(), "alice");

        let label = insert(catalog.conn(), owner, "beach").unwrap();
        let found = find(catalog.conn(), owner, "beach").unwrap().unwrap();
        assert_eq!(found, label);
        assert!(find(catalog.conn(), owner, "Beach").unwrap().is_none());
    }

    #[test]
    fn test_same_text_is_conflict_per_owner_only() {
        let catalog = test_support::catalog();
        let alice = test_support::principal(catalog.conn(), "alice");
        let bob = test_support::principal(catalog.conn(), "bob");

        insert(catalog.conn(), alice, "beach").unwrap();
        let err = insert(catalog.conn(), alice, "beach").unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        insert(catalog.conn(), bob, "beach").unwrap();
    }

    #[test]
    fn test_rename_onto_existing_is_conflict() {
        let catalog = test_support::catalog();
        let owner = test_support::principal(catalog.conn(), "alice");
        insert(catalog.conn(), owner, "beach").unwrap();
        let other = insert(catalog.conn(), owner, "forest").unwrap();

        let err = rename(catalog.conn(), other.id, "beach").unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        rename(catalog.conn(), other.id, "woods").unwrap();
        assert_eq!(get(catalog.conn(), other.id).unwrap().unwrap().text, "woods");
    }

    #[test]
    fn test_ensure_reuses_existing_labels() {
        let catalog = test_support::catalog();
        let owner = test_support::principal(catalog.conn(), "alice");
        let beach = insert(catalog.conn(), owner, "beach").unwrap();

        let labels = ensure(catalog.conn(), owner, &["beach".into(), "sunset".into()]).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].id, beach.id);
        assert_eq!(list_for_owner(catalog.conn(), owner).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_detaches_from_collection() {
        let catalog = test_support::catalog();
        let owner = test_support::principal(catalog.conn(), "alice");
        let collection = test_support::collection(catalog.conn(), owner, "trips", false);
        let labels = ensure(catalog.conn(), owner, &["a".into(), "b".into()]).unwrap();
        set_for_collection(catalog.conn(), collection, &labels).unwrap();

        assert!(delete(catalog.conn(), labels[0].id).unwrap());
        let remaining = for_collection(catalog.conn(), collection).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].text, "b");
        assert!(!delete(catalog.conn(), labels[0].id).unwrap());
    }
}
