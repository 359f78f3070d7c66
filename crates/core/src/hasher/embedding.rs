use image::DynamicImage;

use super::perceptual::{gray_thumbnail, orient, read_exif_orientation};
use crate::domain::EMBEDDING_DIM;
use crate::error::{Error, Result};

/// Produces the feature vector stored with every fingerprint.
///
/// Implementations receive the raw upload bytes and must return exactly
/// `EMBEDDING_DIM` values. They run on the rayon pool during batch ingestion.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<f32>>;
}

const THUMB_WIDTH: u32 = 32;
const THUMB_HEIGHT: u32 = 16;

/// Deterministic built-in extractor: a 32x16 grayscale thumbnail, mean-centred
/// and L2-normalised.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbnailEmbedder;

impl ThumbnailEmbedder {
    /// Embed an already decoded, upright image.
    pub fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let pixels = gray_thumbnail(image, THUMB_WIDTH, THUMB_HEIGHT)?;
        debug_assert_eq!(pixels.len(), EMBEDDING_DIM);

        let mean = pixels.iter().map(|&p| p as f32).sum::<f32>() / pixels.len() as f32;
        let mut values: Vec<f32> = pixels.iter().map(|&p| p as f32 - mean).collect();
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut values {
                *v /= norm;
            }
        }
        Ok(values)
    }
}

impl EmbeddingExtractor for ThumbnailEmbedder {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let image = image::load_from_memory(bytes).map_err(|e| Error::Embedding(e.to_string()))?;
        self.embed_image(&orient(image, read_exif_orientation(bytes)))
    }
}

/// Cosine similarity in [-1, 1]. Zero vectors and mismatched lengths score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
