use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Process-wide settings. Built once at startup and handed to `ImageBank::open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory for stored image bytes. Bytes are discarded when unset.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub duplicates: DuplicateConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,

    /// Upper bound on labels attached to one image or collection.
    #[serde(default = "default_max_labels")]
    pub max_labels: usize,
}

/// Which fingerprints a new image is compared against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateScope {
    /// Only images owned by the same principal.
    #[default]
    Owner,
    /// Every image in the bank.
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DuplicateConfig {
    #[serde(default)]
    pub scope: DuplicateScope,

    /// Perceptual hashes closer than this many bits are near-duplicates.
    #[serde(default = "default_near_threshold")]
    pub near_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// How long a writer waits for another writer's transaction to finish.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("imagebank.db")
}

fn default_allowed_mime_types() -> Vec<String> {
    vec![
        "image/jpeg".to_string(),
        "image/png".to_string(),
        "image/webp".to_string(),
        "image/bmp".to_string(),
        "image/tiff".to_string(),
    ]
}

fn default_max_labels() -> usize {
    16
}

fn default_near_threshold() -> u32 {
    4 // strictly below: at most 3 differing bits of 64
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl UploadConfig {
    /// `mime` must already be normalised to lowercase.
    pub fn allows_mime_type(&self, mime: &str) -> bool {
        self.allowed_mime_types.iter().any(|m| m == mime)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_mime_types: default_allowed_mime_types(),
            max_labels: default_max_labels(),
        }
    }
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            scope: DuplicateScope::default(),
            near_threshold: default_near_threshold(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            storage_dir: None,
            upload: UploadConfig::default(),
            duplicates: DuplicateConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn normalize(&mut self) {
        for mime in &mut self.upload.allowed_mime_types {
            *mime = mime.trim().to_ascii_lowercase();
        }
    }
}
