use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{from_micros, now_micros};
use crate::domain::{Fingerprint, ImageFingerprint};
use crate::error::{ConstraintExt, Error, Result};

/// A stored perceptual hash with the ordering keys used for tie-breaks.
#[derive(Debug, Clone, Copy)]
pub struct PhashCandidate {
    pub image_id: Uuid,
    pub phash: u64,
    pub created_at: i64,
    pub seq: i64,
}

pub fn insert(conn: &Connection, image_id: Uuid, fp: &Fingerprint, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO fingerprints (image_id, sha256, phash, embedding, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            image_id,
            fp.content_hash,
            fp.perceptual_hash as i64,
            embedding_to_bytes(&fp.embedding),
            now,
        ],
    )
    .on_conflict(|| Error::Conflict(format!("image {image_id} already has a fingerprint")))?;
    Ok(())
}

/// Overwrite a fingerprint after an explicit re-index.
pub fn replace(conn: &Connection, image_id: Uuid, fp: &Fingerprint) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE fingerprints SET sha256 = ?1, phash = ?2, embedding = ?3, updated_at = ?4
         WHERE image_id = ?5",
        params![
            fp.content_hash,
            fp.perceptual_hash as i64,
            embedding_to_bytes(&fp.embedding),
            now_micros(),
            image_id,
        ],
    )?;
    Ok(changed == 1)
}

pub fn get(conn: &Connection, image_id: Uuid) -> Result<Option<ImageFingerprint>> {
    let fp = conn
        .query_row(
            "SELECT image_id, sha256, phash, embedding, created_at, updated_at
             FROM fingerprints WHERE image_id = ?1",
            params![image_id],
            |row| {
                let bytes: Vec<u8> = row.get(3)?;
                Ok(ImageFingerprint {
                    image_id: row.get(0)?,
                    fingerprint: Fingerprint {
                        content_hash: row.get(1)?,
                        perceptual_hash: row.get::<_, i64>(2)? as u64,
                        embedding: bytes_to_embedding(&bytes),
                    },
                    created_at: from_micros(row.get(4)?),
                    updated_at: from_micros(row.get(5)?),
                })
            },
        )
        .optional()?;
    Ok(fp)
}

/// Earliest image with this content hash, optionally limited to one owner.
pub fn earliest_with_sha256(
    conn: &Connection,
    sha256: &str,
    owner: Option<Uuid>,
    exclude: Uuid,
) -> Result<Option<Uuid>> {
    let id = conn
        .query_row(
            "SELECT i.id FROM fingerprints f JOIN images i ON i.id = f.image_id
             WHERE f.sha256 = ?1 AND (?2 IS NULL OR i.owner_id = ?2) AND i.id != ?3
             ORDER BY i.created_at, i.rowid
             LIMIT 1",
            params![sha256, owner, exclude],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Every stored perceptual hash in scope.
pub fn phash_candidates(
    conn: &Connection,
    owner: Option<Uuid>,
    exclude: Uuid,
) -> Result<Vec<PhashCandidate>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, f.phash, i.created_at, i.rowid
         FROM fingerprints f JOIN images i ON i.id = f.image_id
         WHERE (?1 IS NULL OR i.owner_id = ?1) AND i.id != ?2",
    )?;
    let rows = stmt
        .query_map(params![owner, exclude], |row| {
            Ok(PhashCandidate {
                image_id: row.get(0)?,
                phash: row.get::<_, i64>(1)? as u64,
                created_at: row.get(2)?,
                seq: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// (image id, embedding) pairs in scope.
pub fn embeddings(conn: &Connection, owner: Option<Uuid>) -> Result<Vec<(Uuid, Vec<f32>)>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, f.embedding
         FROM fingerprints f JOIN images i ON i.id = f.image_id
         WHERE (?1 IS NULL OR i.owner_id = ?1)",
    )?;
    let rows = stmt
        .query_map(params![owner], |row| {
            let bytes: Vec<u8> = row.get(1)?;
            Ok((row.get(0)?, bytes_to_embedding(&bytes)))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
