pub mod catalog;
pub mod collections;
pub mod config;
pub mod domain;
pub mod error;
pub mod hasher;
pub mod ingest;
pub mod labels;
pub mod matching;
pub mod permissions;
pub mod storage;
pub mod validate;

use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use catalog::{now_micros, principals, Catalog};
use config::Config;
use domain::*;
use error::{Error, Result};
use hasher::embedding::{EmbeddingExtractor, ThumbnailEmbedder};
use storage::{DirectoryStore, DiscardStore, ObjectStore};

/// The main entry point for the image bank library.
///
/// One handle owns one catalog connection. Threads that write concurrently
/// open a handle each; SQLite serialises their write transactions.
pub struct ImageBank {
    catalog: Catalog,
    config: Config,
    embedder: Box<dyn EmbeddingExtractor>,
    storage: Box<dyn ObjectStore>,
}

impl ImageBank {
    /// Open or create the bank described by `config`.
    pub fn open(config: Config) -> Result<Self> {
        let catalog = Catalog::open(
            &config.db_path,
            Duration::from_millis(config.store.busy_timeout_ms),
        )?;
        Ok(Self::from_parts(catalog, config))
    }

    /// Open a bank backed by an in-memory catalog (for testing).
    pub fn open_in_memory(config: Config) -> Result<Self> {
        let catalog = Catalog::open_in_memory()?;
        Ok(Self::from_parts(catalog, config))
    }

    fn from_parts(catalog: Catalog, config: Config) -> Self {
        let storage: Box<dyn ObjectStore> = match &config.storage_dir {
            Some(dir) => Box::new(DirectoryStore::new(dir.clone())),
            None => Box::new(DiscardStore),
        };
        Self {
            catalog,
            config,
            embedder: Box::new(ThumbnailEmbedder),
            storage,
        }
    }

    /// Replace the built-in thumbnail embedder.
    pub fn with_embedder(mut self, embedder: impl EmbeddingExtractor + 'static) -> Self {
        self.embedder = Box::new(embedder);
        self
    }

    /// Replace the object store chosen from `config.storage_dir`.
    pub fn with_object_store(mut self, storage: impl ObjectStore + 'static) -> Self {
        self.storage = Box::new(storage);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a principal together with its default collection.
    pub fn create_principal(&mut self, new: NewPrincipal) -> Result<(Principal, Collection)> {
        let username = validate::bounded_text("username", &new.username, MAX_USERNAME_LEN)?;
        let display_name =
            validate::bounded_text("display name", &new.display_name, MAX_DISPLAY_NAME_LEN)?;
        if new.credential_hash.is_empty() {
            return Err(Error::Validation("credential hash must not be empty".to_string()));
        }

        let tx = self.catalog.write()?;
        if principals::username_taken(&tx, &username)? {
            return Err(Error::Conflict(format!("username '{username}' is already taken")));
        }
        let id = Uuid::new_v4();
        principals::insert(&tx, id, &username, &display_name, &new.credential_hash, now_micros())?;
        let default = collections::insert_default(&tx, id)?;
        let principal = principals::get(&tx, id)?
            .ok_or_else(|| Error::PrincipalNotFound(id.to_string()))?;
        tx.commit()?;

        info!(owner_id = %id, username = %principal.username, "principal created");
        Ok((principal, default))
    }

    pub fn principal(&self, id: Uuid) -> Result<Principal> {
        principals::get(self.catalog.conn(), id)?
            .ok_or_else(|| Error::PrincipalNotFound(id.to_string()))
    }

    pub fn principal_by_username(&self, username: &str) -> Result<Principal> {
        principals::get_by_username(self.catalog.conn(), username.trim())?
            .ok_or_else(|| Error::PrincipalNotFound(username.to_string()))
    }

    /// Replace a credential hash. The caller must present the current one.
    pub fn change_credential(&mut self, id: Uuid, current: &str, new: &str) -> Result<()> {
        if new.is_empty() {
            return Err(Error::Validation("credential hash must not be empty".to_string()));
        }
        let tx = self.catalog.write()?;
        if principals::get(&tx, id)?.is_none() {
            return Err(Error::PrincipalNotFound(id.to_string()));
        }
        if !principals::replace_credential(&tx, id, current, new)? {
            return Err(Error::CredentialMismatch);
        }
        tx.commit()?;
        info!(owner_id = %id, "credential changed");
        Ok(())
    }

    pub fn stats(&self) -> Result<BankStats> {
        self.catalog.stats()
    }
}
