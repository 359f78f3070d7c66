use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name given to the collection created alongside every principal.
pub const DEFAULT_COLLECTION_NAME: &str = "DEFAULT";

/// Dimension of the feature embedding stored with every fingerprint.
pub const EMBEDDING_DIM: usize = 512;

pub const MAX_LABEL_LEN: usize = 64;
pub const MAX_COLLECTION_NAME_LEN: usize = 64;
pub const MAX_FILENAME_LEN: usize = 256;
pub const MAX_USERNAME_LEN: usize = 150;
pub const MAX_DISPLAY_NAME_LEN: usize = 128;

/// An authenticated owner of collections, images and labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

/// Registration input. The credential hash is produced upstream.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub username: String,
    pub display_name: String,
    pub credential_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub is_default: bool,
    pub labels: Vec<Label>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Requested changes to a collection. `is_default` and `owner_id` exist only so
/// that attempts to change them can be rejected explicitly.
#[derive(Debug, Clone, Default)]
pub struct CollectionPatch {
    pub name: Option<String>,
    pub labels: Option<Vec<String>>,
    pub is_default: Option<bool>,
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub collection_id: Uuid,
    pub original_filename: String,
    pub stored_filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub labels: Vec<Label>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Requested changes to an image. The owner always follows the collection.
#[derive(Debug, Clone, Default)]
pub struct ImagePatch {
    pub original_filename: Option<String>,
    pub collection_id: Option<Uuid>,
    pub labels: Option<Vec<String>>,
}

/// One upload handed to `ImageBank::ingest_batch`.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub original_filename: String,
    pub mime_type: String,
    pub labels: Vec<String>,
}

/// The triple identifying an image's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Lowercase hex SHA-256 of the raw bytes.
    pub content_hash: String,
    /// 64-bit difference hash.
    pub perceptual_hash: u64,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFingerprint {
    pub image_id: Uuid,
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a duplicate was recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchKind {
    /// Identical content hash.
    Exact,
    /// Perceptual hash within the near-duplicate threshold.
    Near,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Near => "near",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(MatchKind::Exact),
            "near" => Some(MatchKind::Near),
            _ => None,
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link from a duplicate image to the chain root it duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDuplicate {
    pub image_id: Uuid,
    pub original_id: Uuid,
    pub kind: MatchKind,
    /// Hamming distance between perceptual hashes; 0 for exact matches.
    pub distance: u32,
    pub created_at: DateTime<Utc>,
}

/// The original a new image should be linked to, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateMatch {
    pub original_id: Uuid,
    pub kind: MatchKind,
    pub distance: u32,
}

/// Outcome of duplicate resolution. `original == None` means the image is new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DuplicateDecision {
    pub original: Option<DuplicateMatch>,
}

impl DuplicateDecision {
    pub fn is_duplicate(&self) -> bool {
        self.original.is_some()
    }
}

/// Result of a committed ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub image: Image,
    pub fingerprint: ImageFingerprint,
    pub duplicate: Option<ImageDuplicate>,
}

/// Image ranked by embedding similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarImage {
    pub image_id: Uuid,
    pub similarity: f32,
}

/// Row counts for the status summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BankStats {
    pub principals: usize,
    pub collections: usize,
    pub images: usize,
    pub duplicates: usize,
    pub labels: usize,
}
