use std::fmt;

use rayon::prelude::*;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{self, duplicates, fingerprints, images, labels, now_micros};
use crate::config::{DuplicateConfig, DuplicateScope, UploadConfig};
use crate::domain::*;
use crate::error::{Error, Result};
use crate::hasher::{self, embedding::{cosine_similarity, EmbeddingExtractor}};
use crate::{matching, validate, ImageBank};

/// Where an ingestion is, or where it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Validating,
    Fingerprinting,
    ResolvingDuplicate,
    Persisting,
    Committed,
    /// The input was refused; nothing was written.
    Rejected,
    /// The store or storage failed; nothing was committed.
    Failed,
}

impl IngestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStage::Validating => "validating",
            IngestStage::Fingerprinting => "fingerprinting",
            IngestStage::ResolvingDuplicate => "resolving_duplicate",
            IngestStage::Persisting => "persisting",
            IngestStage::Committed => "committed",
            IngestStage::Rejected => "rejected",
            IngestStage::Failed => "failed",
        }
    }

    /// Terminal stage for an error raised during ingestion.
    pub fn for_error(err: &Error) -> Self {
        if err.is_rejection() || matches!(err, Error::Embedding(_)) {
            IngestStage::Rejected
        } else {
            IngestStage::Failed
        }
    }
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress reported by `ImageBank::ingest_batch`.
pub enum BatchProgress {
    /// Fingerprints for the whole batch have been computed.
    Fingerprinted { count: usize },
    /// One upload finished, successfully or not.
    UploadDone { index: usize, committed: bool },
}

fn enter(image_id: Uuid, stage: IngestStage) {
    debug!(%image_id, %stage, "ingest stage");
}

/// Validated upload with its fingerprint, ready to persist.
struct Prepared<'a> {
    id: Uuid,
    bytes: &'a [u8],
    original_filename: String,
    mime_type: String,
    labels: Vec<String>,
    fingerprint: Fingerprint,
}

struct Checked {
    original_filename: String,
    mime_type: String,
    labels: Vec<String>,
}

fn check(upload: &Upload, config: &UploadConfig) -> Result<Checked> {
    Ok(Checked {
        mime_type: validate::mime_type(&upload.mime_type, config)?,
        original_filename: validate::bounded_text(
            "original filename",
            &upload.original_filename,
            MAX_FILENAME_LEN,
        )?,
        labels: validate::label_set(&upload.labels, config.max_labels)?,
    })
}

/// Validate and fingerprint one upload. Touches no rows, so it can run on
/// the rayon pool.
fn prepare<'a>(
    id: Uuid,
    upload: &'a Upload,
    config: &UploadConfig,
    embedder: &dyn EmbeddingExtractor,
) -> Result<Prepared<'a>> {
    enter(id, IngestStage::Validating);
    let checked = check(upload, config)?;
    enter(id, IngestStage::Fingerprinting);
    let fingerprint = hasher::compute(&upload.bytes, &checked.mime_type, embedder)?;
    Ok(Prepared {
        id,
        bytes: &upload.bytes,
        original_filename: checked.original_filename,
        mime_type: checked.mime_type,
        labels: checked.labels,
        fingerprint,
    })
}

/// Drop every link touching `id` and resolve it again for `owner_id`.
fn relink(
    conn: &rusqlite::Connection,
    owner_id: Uuid,
    id: Uuid,
    config: &DuplicateConfig,
) -> Result<Option<ImageDuplicate>> {
    duplicates::promote_dependents(conn, id)?;
    duplicates::delete_link(conn, id)?;
    let fingerprint = fingerprints::get(conn, id)?.ok_or(Error::ImageNotFound(id))?;
    let decision = matching::resolve(conn, owner_id, id, &fingerprint.fingerprint, config)?;
    let link = match decision.original {
        Some(m) => Some(duplicates::insert_link(
            conn,
            id,
            m.original_id,
            m.kind,
            m.distance,
            now_micros(),
        )?),
        None => None,
    };
    debug!(image_id = %id, %owner_id, original = ?link.as_ref().map(|l| l.original_id), "duplicate relinked");
    Ok(link)
}

fn stored_filename(id: Uuid, mime_type: &str) -> String {
    format!("{id}.{}", validate::mime_subtype(mime_type))
}

impl ImageBank {
    /// Resolve and persist a prepared upload in one transaction. The object is
    /// written before commit and removed again if the commit fails.
    fn persist(&mut self, collection_id: Uuid, prepared: Prepared<'_>) -> Result<Ingested> {
        let id = prepared.id;
        let tx = self.catalog.write()?;
        let collection = catalog::collections::get(&tx, collection_id)?
            .ok_or(Error::CollectionNotFound(collection_id))?;
        let owner_id = collection.owner_id;

        enter(id, IngestStage::ResolvingDuplicate);
        let decision = matching::resolve(
            &tx,
            owner_id,
            id,
            &prepared.fingerprint,
            &self.config.duplicates,
        )?;

        enter(id, IngestStage::Persisting);
        let now = now_micros();
        let stored = stored_filename(id, &prepared.mime_type);
        images::insert(
            &tx,
            id,
            collection_id,
            &prepared.original_filename,
            &stored,
            &prepared.mime_type,
            prepared.bytes.len() as u64,
            now,
        )?;
        let attached = labels::ensure(&tx, owner_id, &prepared.labels)?;
        labels::set_for_image(&tx, id, &attached)?;
        fingerprints::insert(&tx, id, &prepared.fingerprint, now)?;
        let duplicate = match decision.original {
            Some(m) => Some(duplicates::insert_link(
                &tx,
                id,
                m.original_id,
                m.kind,
                m.distance,
                now,
            )?),
            None => None,
        };
        let image = images::get(&tx, id)?.ok_or(Error::ImageNotFound(id))?;
        let fingerprint = fingerprints::get(&tx, id)?.ok_or(Error::ImageNotFound(id))?;

        self.storage.put(&stored, prepared.bytes)?;
        if let Err(e) = tx.commit() {
            if let Err(cleanup) = self.storage.delete(&stored) {
                warn!(key = %stored, error = %cleanup, "stored object left behind");
            }
            return Err(e.into());
        }

        enter(id, IngestStage::Committed);
        info!(
            image_id = %id,
            %owner_id,
            %collection_id,
            duplicate_of = ?duplicate.as_ref().map(|d| d.original_id),
            "image ingested"
        );
        Ok(Ingested {
            image,
            fingerprint,
            duplicate,
        })
    }

    fn log_outcome<T>(image_id: Uuid, result: &Result<T>) {
        if let Err(e) = result {
            let stage = IngestStage::for_error(e);
            warn!(%image_id, %stage, error = %e, "ingestion did not commit");
        }
    }

    /// Ingest one upload into a collection. The image's owner is the
    /// collection's owner. Either everything is committed (image, labels,
    /// fingerprint, duplicate link, stored bytes) or nothing is.
    pub fn ingest(&mut self, collection_id: Uuid, upload: Upload) -> Result<Ingested> {
        let id = Uuid::new_v4();
        let result = self.ingest_with_id(id, collection_id, &upload);
        Self::log_outcome(id, &result);
        result
    }

    fn ingest_with_id(&mut self, id: Uuid, collection_id: Uuid, upload: &Upload) -> Result<Ingested> {
        if catalog::collections::get(self.catalog.conn(), collection_id)?.is_none() {
            return Err(Error::CollectionNotFound(collection_id));
        }
        let prepared = prepare(id, upload, &self.config.upload, &*self.embedder)?;
        self.persist(collection_id, prepared)
    }

    /// Ingest several uploads into one collection. Fingerprints are computed
    /// in parallel; each upload is then persisted in its own transaction, in
    /// input order. One result per upload.
    pub fn ingest_batch(
        &mut self,
        collection_id: Uuid,
        uploads: &[Upload],
        mut progress: Option<&mut dyn FnMut(BatchProgress)>,
    ) -> Result<Vec<Result<Ingested>>> {
        if catalog::collections::get(self.catalog.conn(), collection_id)?.is_none() {
            return Err(Error::CollectionNotFound(collection_id));
        }

        let config = &self.config.upload;
        let embedder: &dyn EmbeddingExtractor = &*self.embedder;
        let prepared: Vec<(Uuid, Result<Prepared<'_>>)> = uploads
            .par_iter()
            .map(|upload| {
                let id = Uuid::new_v4();
                (id, prepare(id, upload, config, embedder))
            })
            .collect();
        if let Some(ref mut cb) = progress {
            cb(BatchProgress::Fingerprinted {
                count: prepared.len(),
            });
        }

        let mut results = Vec::with_capacity(prepared.len());
        for (index, (id, prepared)) in prepared.into_iter().enumerate() {
            let result = prepared.and_then(|p| self.persist(collection_id, p));
            Self::log_outcome(id, &result);
            if let Some(ref mut cb) = progress {
                cb(BatchProgress::UploadDone {
                    index,
                    committed: result.is_ok(),
                });
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Rename an image, move it to another collection, or replace its labels.
    /// A move recomputes the owner from the target collection; labels follow
    /// the new owner. Under per-owner scope, a move to another owner hands the
    /// image's dependents a new root and resolves the image again among the
    /// new owner's images.
    pub fn update_image(&mut self, id: Uuid, patch: ImagePatch) -> Result<Image> {
        let max_labels = self.config.upload.max_labels;
        let duplicate_config = self.config.duplicates.clone();
        let tx = self.catalog.write()?;
        let current = images::get(&tx, id)?.ok_or(Error::ImageNotFound(id))?;

        if let Some(name) = &patch.original_filename {
            let name = validate::bounded_text("original filename", name, MAX_FILENAME_LEN)?;
            images::rename(&tx, id, &name)?;
        }

        let mut owner_id = current.owner_id;
        if let Some(target) = patch.collection_id.filter(|c| *c != current.collection_id) {
            let collection = catalog::collections::get(&tx, target)?
                .ok_or(Error::CollectionNotFound(target))?;
            images::move_to(&tx, id, target)?;
            owner_id = collection.owner_id;
            if owner_id != current.owner_id && duplicate_config.scope == DuplicateScope::Owner {
                relink(&tx, owner_id, id, &duplicate_config)?;
            }
        }

        let texts = match &patch.labels {
            Some(texts) => Some(validate::label_set(texts, max_labels)?),
            None if owner_id != current.owner_id => {
                Some(current.labels.iter().map(|l| l.text.clone()).collect())
            }
            None => None,
        };
        if let Some(texts) = texts {
            let attached = labels::ensure(&tx, owner_id, &texts)?;
            labels::set_for_image(&tx, id, &attached)?;
            images::touch(&tx, id)?;
        }

        let updated = images::get(&tx, id)?.ok_or(Error::ImageNotFound(id))?;
        tx.commit()?;
        info!(image_id = %id, %owner_id, "image updated");
        Ok(updated)
    }

    /// Recompute an image's fingerprint from its bytes. Duplicate links are
    /// left as they are.
    pub fn reindex(&mut self, id: Uuid, bytes: &[u8]) -> Result<ImageFingerprint> {
        let image = self.image(id)?;
        let fingerprint = hasher::compute(bytes, &image.mime_type, &*self.embedder)?;

        let tx = self.catalog.write()?;
        if !fingerprints::replace(&tx, id, &fingerprint)? {
            if images::get(&tx, id)?.is_none() {
                return Err(Error::ImageNotFound(id));
            }
            fingerprints::insert(&tx, id, &fingerprint, now_micros())?;
        }
        let stored = fingerprints::get(&tx, id)?.ok_or(Error::ImageNotFound(id))?;
        tx.commit()?;
        info!(image_id = %id, "image reindexed");
        Ok(stored)
    }

    /// Delete an image with its fingerprint and outgoing duplicate link. If
    /// other images duplicate it, the oldest of them becomes their new root.
    pub fn delete_image(&mut self, id: Uuid) -> Result<()> {
        let tx = self.catalog.write()?;
        let image = images::get(&tx, id)?.ok_or(Error::ImageNotFound(id))?;
        images::delete(&tx, id)?;
        tx.commit()?;

        if let Err(e) = self.storage.delete(&image.stored_filename) {
            warn!(key = %image.stored_filename, error = %e, "stored object left behind");
        }
        info!(image_id = %id, owner_id = %image.owner_id, "image deleted");
        Ok(())
    }

    pub fn image(&self, id: Uuid) -> Result<Image> {
        images::get(self.catalog.conn(), id)?.ok_or(Error::ImageNotFound(id))
    }

    pub fn fingerprint(&self, image_id: Uuid) -> Result<ImageFingerprint> {
        fingerprints::get(self.catalog.conn(), image_id)?.ok_or(Error::ImageNotFound(image_id))
    }

    /// The link recorded for `image_id`, if it is a duplicate.
    pub fn duplicate_of(&self, image_id: Uuid) -> Result<Option<ImageDuplicate>> {
        duplicates::get_link(self.catalog.conn(), image_id)
    }

    /// Images linked to `original_id`, oldest first.
    pub fn duplicates_of(&self, original_id: Uuid) -> Result<Vec<ImageDuplicate>> {
        duplicates::links_to(self.catalog.conn(), original_id)
    }

    /// Every duplicate link among the owner's images.
    pub fn duplicate_links(&self, owner_id: Uuid) -> Result<Vec<ImageDuplicate>> {
        duplicates::list_for_owner(self.catalog.conn(), owner_id)
    }

    /// Images ranked by embedding cosine similarity to `image_id`, within the
    /// configured duplicate scope. The image itself is excluded.
    pub fn similar_images(&self, image_id: Uuid, limit: usize) -> Result<Vec<SimilarImage>> {
        let image = self.image(image_id)?;
        let target = self.fingerprint(image_id)?.fingerprint.embedding;
        let owner = matching::scope_owner(&self.config.duplicates, image.owner_id);

        let mut ranked: Vec<SimilarImage> =
            fingerprints::embeddings(self.catalog.conn(), owner)?
                .into_iter()
                .filter(|(id, _)| *id != image_id)
                .map(|(id, embedding)| SimilarImage {
                    image_id: id,
                    similarity: cosine_similarity(&target, &embedding),
                })
                .collect();
        ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        ranked.truncate(limit);
        Ok(ranked)
    }
}
