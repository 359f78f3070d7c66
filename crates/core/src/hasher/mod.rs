pub mod embedding;
pub mod perceptual;

use image::{DynamicImage, ImageFormat};
use sha2::{Digest, Sha256};

use crate::domain::{Fingerprint, EMBEDDING_DIM};
use crate::error::{Error, Result};
use embedding::EmbeddingExtractor;

/// Lowercase hex SHA-256 of an upload.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Decode an upload, refusing content whose signature disagrees with the
/// declared MIME type.
pub fn decode(bytes: &[u8], mime_type: &str) -> Result<DynamicImage> {
    let declared = ImageFormat::from_mime_type(mime_type)
        .ok_or_else(|| Error::UnsupportedFormat(format!("no decoder for {mime_type}")))?;
    let sniffed = image::guess_format(bytes)
        .map_err(|_| Error::UnsupportedFormat("content is not a recognised image".to_string()))?;
    if sniffed != declared {
        return Err(Error::UnsupportedFormat(format!(
            "declared {mime_type} but content looks like {sniffed:?}"
        )));
    }
    image::load_from_memory_with_format(bytes, declared)
        .map_err(|e| Error::UnsupportedFormat(e.to_string()))
}

/// Compute the full fingerprint for an upload.
///
/// EXIF orientation is applied before hashing so a rotated original and its
/// physically rotated export hash alike. The embedder is called exactly once.
pub fn compute(
    bytes: &[u8],
    mime_type: &str,
    embedder: &dyn EmbeddingExtractor,
) -> Result<Fingerprint> {
    let content_hash = sha256_bytes(bytes);
    let image = decode(bytes, mime_type)?;
    let image = perceptual::orient(image, perceptual::read_exif_orientation(bytes));
    let perceptual_hash = perceptual::compute_dhash(&image)?;
    let embedding = embedder.extract(bytes)?;
    if embedding.len() != EMBEDDING_DIM {
        return Err(Error::Embedding(format!(
            "extractor returned {} values, expected {EMBEDDING_DIM}",
            embedding.len()
        )));
    }
    Ok(Fingerprint {
        content_hash,
        perceptual_hash,
        embedding,
    })
}
