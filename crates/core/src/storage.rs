use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Byte storage addressed by an image's stored filename.
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove an object. Missing objects are not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Stores each object as a file directly under `root`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(Error::Validation(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(key))
    }
}

impl ObjectStore for DirectoryStore {
    /// Write through a temporary file so a crash never leaves a partial object
    /// under the final name.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let target = self.path_for(key)?;
        fs::create_dir_all(&self.root)?;
        let partial = self.root.join(format!(".{key}.partial"));
        fs::write(&partial, bytes)?;
        fs::rename(&partial, &target)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Accepts and drops every object. Used when no storage directory is
/// configured and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardStore;

impl ObjectStore for DiscardStore {
    fn put(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}
