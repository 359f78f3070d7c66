use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS principals (
            id              BLOB PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            display_name    TEXT NOT NULL,
            credential_hash TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS labels (
            id          BLOB PRIMARY KEY,
            owner_id    BLOB NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
            text        TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL,
            UNIQUE (owner_id, text)
        );

        CREATE TABLE IF NOT EXISTS collections (
            id          BLOB PRIMARY KEY,
            owner_id    BLOB NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
            name        TEXT NOT NULL,
            is_default  INTEGER NOT NULL DEFAULT 0 CHECK (is_default IN (0, 1)),
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_collections_owner ON collections(owner_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_collections_one_default
            ON collections(owner_id) WHERE is_default = 1;

        CREATE TABLE IF NOT EXISTS collection_labels (
            collection_id BLOB NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
            label_id      BLOB NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
            PRIMARY KEY (collection_id, label_id)
        );

        CREATE TABLE IF NOT EXISTS images (
            id                BLOB PRIMARY KEY,
            owner_id          BLOB NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
            collection_id     BLOB NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
            original_filename TEXT NOT NULL,
            stored_filename   TEXT NOT NULL UNIQUE,
            mime_type         TEXT NOT NULL,
            size_bytes        INTEGER NOT NULL,
            created_at        INTEGER NOT NULL,
            updated_at        INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_images_collection ON images(collection_id);
        CREATE INDEX IF NOT EXISTS idx_images_owner ON images(owner_id);

        CREATE TABLE IF NOT EXISTS image_labels (
            image_id  BLOB NOT NULL REFERENCES images(id) ON DELETE CASCADE,
            label_id  BLOB NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
            PRIMARY KEY (image_id, label_id)
        );

        CREATE TABLE IF NOT EXISTS fingerprints (
            image_id    BLOB PRIMARY KEY REFERENCES images(id) ON DELETE CASCADE,
            sha256      TEXT NOT NULL,
            phash       INTEGER NOT NULL,
            embedding   BLOB NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_fingerprints_sha256 ON fingerprints(sha256);
        CREATE INDEX IF NOT EXISTS idx_fingerprints_phash ON fingerprints(phash);

        CREATE TABLE IF NOT EXISTS duplicate_links (
            image_id    BLOB PRIMARY KEY REFERENCES images(id) ON DELETE CASCADE,
            original_id BLOB NOT NULL REFERENCES images(id),
            kind        TEXT NOT NULL,
            distance    INTEGER NOT NULL,
            created_at  INTEGER NOT NULL,
            CHECK (image_id != original_id)
        );

        CREATE INDEX IF NOT EXISTS idx_duplicate_links_original ON duplicate_links(original_id);

        CREATE TABLE IF NOT EXISTS grants (
            principal_id  BLOB NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
            resource_type TEXT NOT NULL,
            resource_id   BLOB NOT NULL,
            permission    TEXT NOT NULL,
            PRIMARY KEY (principal_id, resource_type, resource_id, permission)
        );

        CREATE INDEX IF NOT EXISTS idx_grants_resource ON grants(resource_type, resource_id);

        CREATE TRIGGER IF NOT EXISTS trg_collections_default_immutable
        BEFORE UPDATE OF is_default ON collections
        WHEN NEW.is_default IS NOT OLD.is_default
        BEGIN
            SELECT RAISE(ABORT, 'is_default cannot be changed after creation');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_collections_owner_immutable
        BEFORE UPDATE OF owner_id ON collections
        WHEN NEW.owner_id IS NOT OLD.owner_id
        BEGIN
            SELECT RAISE(ABORT, 'collection owner cannot be changed');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_collections_default_undeletable
        BEFORE DELETE ON collections
        WHEN OLD.is_default = 1
        BEGIN
            SELECT RAISE(ABORT, 'the default collection cannot be deleted');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_images_owner_insert
        BEFORE INSERT ON images
        WHEN NEW.owner_id IS NOT (SELECT owner_id FROM collections WHERE id = NEW.collection_id)
        BEGIN
            SELECT RAISE(ABORT, 'image owner must match collection owner');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_images_owner_update
        BEFORE UPDATE OF owner_id, collection_id ON images
        WHEN NEW.owner_id IS NOT (SELECT owner_id FROM collections WHERE id = NEW.collection_id)
        BEGIN
            SELECT RAISE(ABORT, 'image owner must match collection owner');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_images_stored_filename_immutable
        BEFORE UPDATE OF stored_filename ON images
        WHEN NEW.stored_filename IS NOT OLD.stored_filename
        BEGIN
            SELECT RAISE(ABORT, 'stored_filename cannot be changed');
        END;
        ",
    )?;
    Ok(())
}

/// Record the schema version on fresh databases and refuse databases written
/// by a newer build.
pub fn migrate(conn: &Connection) -> Result<()> {
    let current: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match current.and_then(|v| v.parse::<u32>().ok()) {
        None => {
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
        }
        Some(v) if v > SCHEMA_VERSION => {
            return Err(Error::SchemaTooNew {
                db: v,
                code: SCHEMA_VERSION,
            });
        }
        Some(_) => {}
    }
    Ok(())
}
