use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{self, grants, images, labels, now_micros, principals};
use crate::domain::{
    Collection, CollectionPatch, Image, DEFAULT_COLLECTION_NAME, MAX_COLLECTION_NAME_LEN,
};
use crate::error::{Error, Result};
use crate::{validate, ImageBank};

/// Insert the default collection for `owner_id`. A second default for the
/// same owner is a `Conflict`, whether caught here or by the unique index.
pub(crate) fn insert_default(conn: &Connection, owner_id: Uuid) -> Result<Collection> {
    if catalog::collections::default_for_owner(conn, owner_id)?.is_some() {
        return Err(Error::Conflict(format!(
            "principal {owner_id} already has a default collection"
        )));
    }
    let id = Uuid::new_v4();
    catalog::collections::insert(conn, id, owner_id, DEFAULT_COLLECTION_NAME, true, now_micros())?;
    catalog::collections::get(conn, id)?.ok_or(Error::CollectionNotFound(id))
}

impl ImageBank {
    /// Create the owner's default collection. Principal creation already does
    /// this, so on a registered principal it fails with `Conflict`.
    pub fn create_default_collection(&mut self, owner_id: Uuid) -> Result<Collection> {
        let tx = self.catalog.write()?;
        if principals::get(&tx, owner_id)?.is_none() {
            return Err(Error::PrincipalNotFound(owner_id.to_string()));
        }
        let collection = insert_default(&tx, owner_id)?;
        tx.commit()?;
        info!(collection_id = %collection.id, %owner_id, "default collection created");
        Ok(collection)
    }

    pub fn create_collection(
        &mut self,
        owner_id: Uuid,
        name: &str,
        label_texts: &[String],
    ) -> Result<Collection> {
        let name = validate::bounded_text("collection name", name, MAX_COLLECTION_NAME_LEN)?;
        let label_texts = validate::label_set(label_texts, self.config.upload.max_labels)?;

        let tx = self.catalog.write()?;
        if principals::get(&tx, owner_id)?.is_none() {
            return Err(Error::PrincipalNotFound(owner_id.to_string()));
        }
        let id = Uuid::new_v4();
        catalog::collections::insert(&tx, id, owner_id, &name, false, now_micros())?;
        let attached = labels::ensure(&tx, owner_id, &label_texts)?;
        labels::set_for_collection(&tx, id, &attached)?;
        let collection =
            catalog::collections::get(&tx, id)?.ok_or(Error::CollectionNotFound(id))?;
        tx.commit()?;

        info!(collection_id = %id, %owner_id, name = %collection.name, "collection created");
        Ok(collection)
    }

    /// Apply a patch. Changing `is_default` or the owner is refused outright;
    /// restating the current value is accepted.
    pub fn update_collection(&mut self, id: Uuid, patch: CollectionPatch) -> Result<Collection> {
        let max_labels = self.config.upload.max_labels;
        let tx = self.catalog.write()?;
        let current = catalog::collections::get(&tx, id)?.ok_or(Error::CollectionNotFound(id))?;

        if patch.is_default.is_some_and(|v| v != current.is_default) {
            return Err(Error::InvariantViolation(
                "is_default cannot be changed after creation".to_string(),
            ));
        }
        if patch.owner_id.is_some_and(|o| o != current.owner_id) {
            return Err(Error::InvariantViolation(
                "collection owner cannot be changed".to_string(),
            ));
        }

        if let Some(name) = &patch.name {
            let name = validate::bounded_text("collection name", name, MAX_COLLECTION_NAME_LEN)?;
            catalog::collections::rename(&tx, id, &name)?;
        }
        if let Some(texts) = &patch.labels {
            let texts = validate::label_set(texts, max_labels)?;
            let attached = labels::ensure(&tx, current.owner_id, &texts)?;
            labels::set_for_collection(&tx, id, &attached)?;
            catalog::collections::touch(&tx, id)?;
        }
        let updated = catalog::collections::get(&tx, id)?.ok_or(Error::CollectionNotFound(id))?;
        tx.commit()?;

        info!(collection_id = %id, "collection updated");
        Ok(updated)
    }

    /// Delete a non-default collection and every image in it. Returns the
    /// number of images removed.
    pub fn delete_collection(&mut self, id: Uuid) -> Result<usize> {
        let tx = self.catalog.write()?;
        let collection =
            catalog::collections::get(&tx, id)?.ok_or(Error::CollectionNotFound(id))?;
        if collection.is_default {
            return Err(Error::InvariantViolation(
                "the default collection cannot be deleted".to_string(),
            ));
        }

        let mut stored = Vec::new();
        for image_id in catalog::collections::image_ids(&tx, id)? {
            if let Some(image) = images::get(&tx, image_id)? {
                stored.push(image.stored_filename);
            }
            images::delete(&tx, image_id)?;
        }
        grants::delete_for_resource(&tx, "collection", id)?;
        catalog::collections::delete(&tx, id)?;
        tx.commit()?;

        for key in &stored {
            if let Err(e) = self.storage.delete(key) {
                warn!(key = %key, error = %e, "stored object left behind");
            }
        }
        info!(collection_id = %id, images = stored.len(), "collection deleted");
        Ok(stored.len())
    }

    pub fn collection(&self, id: Uuid) -> Result<Collection> {
        catalog::collections::get(self.catalog.conn(), id)?.ok_or(Error::CollectionNotFound(id))
    }

    /// The owner's collections, default first.
    pub fn collections(&self, owner_id: Uuid) -> Result<Vec<Collection>> {
        catalog::collections::list_for_owner(self.catalog.conn(), owner_id)
    }

    pub fn default_collection(&self, owner_id: Uuid) -> Result<Collection> {
        catalog::collections::default_for_owner(self.catalog.conn(), owner_id)?
            .ok_or_else(|| Error::PrincipalNotFound(owner_id.to_string()))
    }

    pub fn images_in_collection(&self, id: Uuid) -> Result<Vec<Image>> {
        if catalog::collections::get(self.catalog.conn(), id)?.is_none() {
            return Err(Error::CollectionNotFound(id));
        }
        images::list_in_collection(self.catalog.conn(), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_support::*;

    fn texts(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_second_default_is_conflict() {
        let mut bank = bank();
        let (alice, _) = principal(&mut bank, "alice");
        let err = bank.create_default_collection(alice).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(bank.collections(alice).unwrap().len(), 1);
    }

    #[test]
    fn test_default_for_unknown_principal() {
        let mut bank = bank();
        let err = bank.create_default_collection(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, Error::PrincipalNotFound(_)));
    }

    #[test]
    fn test_concurrent_default_creation_has_one_winner() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            db_path: tmp.path().join("bank.db"),
            ..Config::default()
        };
        // A principal row without a default collection.
        let owner = {
            let bank = ImageBank::open(config.clone()).unwrap();
            catalog::test_support::principal(bank.catalog.conn(), "alice")
        };

        const WRITERS: usize = 8;
        let results: Vec<Result<Collection>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..WRITERS)
                .map(|_| {
                    let config = config.clone();
                    s.spawn(move || {
                        let mut bank = ImageBank::open(config)?;
                        bank.create_default_collection(owner)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(Error::Conflict(_))))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(conflicts, WRITERS - 1);

        let bank = ImageBank::open(config).unwrap();
        let defaults = bank
            .collections(owner)
            .unwrap()
            .into_iter()
            .filter(|c| c.is_default)
            .count();
        assert_eq!(defaults, 1);
    }

    #[test]
    fn test_create_collection_is_never_default() {
        let mut bank = bank();
        let (alice, _) = principal(&mut bank, "alice");
        let trips = bank
            .create_collection(alice, " trips ", &texts(&["beach", "sun"]))
            .unwrap();
        assert!(!trips.is_default);
        assert_eq!(trips.name, "trips");
        let names: Vec<_> = trips.labels.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(names, vec!["beach", "sun"]);
    }

    #[test]
    fn test_create_collection_rejects_repeated_labels() {
        let mut bank = bank();
        let (alice, _) = principal(&mut bank, "alice");
        let err = bank
            .create_collection(alice, "trips", &texts(&["beach", "beach"]))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(bank.collections(alice).unwrap().len(), 1);
    }

    #[test]
    fn test_create_collection_reuses_owner_labels() {
        let mut bank = bank();
        let (alice, _) = principal(&mut bank, "alice");
        let beach = bank.create_label(alice, "beach").unwrap();
        let c = bank.create_collection(alice, "trips", &texts(&["beach"])).unwrap();
        assert_eq!(c.labels[0].id, beach.id);
        assert_eq!(bank.labels(alice).unwrap().len(), 1);
    }

    #[test]
    fn test_update_rejects_is_default_change() {
        let mut bank = bank();
        let (alice, default) = principal(&mut bank, "alice");

        let err = bank
            .update_collection(
                default,
                CollectionPatch {
                    is_default: Some(false),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));

        let trips = bank.create_collection(alice, "trips", &[]).unwrap();
        let err = bank
            .update_collection(
                trips.id,
                CollectionPatch {
                    is_default: Some(true),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn test_update_rejects_owner_change() {
        let mut bank = bank();
        let (alice, _) = principal(&mut bank, "alice");
        let (bob, _) = principal(&mut bank, "bob");
        let trips = bank.create_collection(alice, "trips", &[]).unwrap();

        let err = bank
            .update_collection(
                trips.id,
                CollectionPatch {
                    owner_id: Some(bob),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert_eq!(bank.collection(trips.id).unwrap().owner_id, alice);
    }

    #[test]
    fn test_update_name_and_labels() {
        let mut bank = bank();
        let (alice, _) = principal(&mut bank, "alice");
        let trips = bank.create_collection(alice, "trips", &texts(&["a"])).unwrap();

        let updated = bank
            .update_collection(
                trips.id,
                CollectionPatch {
                    name: Some("holidays".to_string()),
                    labels: Some(texts(&["b", "c"])),
                    is_default: Some(false),
                    owner_id: Some(alice),
                },
            )
            .unwrap();
        assert_eq!(updated.name, "holidays");
        let names: Vec<_> = updated.labels.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert!(updated.updated_at >= trips.updated_at);
    }

    #[test]
    fn test_delete_default_is_invariant_violation() {
        let mut bank = bank();
        let (_, default) = principal(&mut bank, "alice");
        let err = bank.delete_collection(default).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert!(bank.collection(default).is_ok());
    }

    #[test]
    fn test_delete_collection_removes_images() {
        let mut bank = bank();
        let (alice, _) = principal(&mut bank, "alice");
        let trips = bank.create_collection(alice, "trips", &[]).unwrap();
        let a = bank
            .ingest(trips.id, upload(png(8, 8, |x, _| [x as u8 * 30, 0, 0]), "a.png"))
            .unwrap();
        bank.ingest(trips.id, upload(png(8, 8, |_, y| [0, y as u8 * 30, 0]), "b.png"))
            .unwrap();

        assert_eq!(bank.delete_collection(trips.id).unwrap(), 2);
        assert!(matches!(
            bank.collection(trips.id),
            Err(Error::CollectionNotFound(_))
        ));
        assert!(matches!(
            bank.image(a.image.id),
            Err(Error::ImageNotFound(_))
        ));
        assert_eq!(bank.stats().unwrap().images, 0);
    }

    #[test]
    fn test_delete_collection_promotes_duplicates_elsewhere() {
        let mut bank = bank();
        let (alice, default) = principal(&mut bank, "alice");
        let trips = bank.create_collection(alice, "trips", &[]).unwrap();
        let bytes = png(8, 8, |x, y| [(x * y) as u8, 10, 20]);

        let original = bank.ingest(trips.id, upload(bytes.clone(), "a.png")).unwrap();
        let copy = bank.ingest(default, upload(bytes, "b.png")).unwrap();
        assert_eq!(
            copy.duplicate.as_ref().map(|d| d.original_id),
            Some(original.image.id)
        );

        bank.delete_collection(trips.id).unwrap();
        assert!(bank.duplicate_of(copy.image.id).unwrap().is_none());
    }

    #[test]
    fn test_images_in_missing_collection() {
        let bank = bank();
        assert!(matches!(
            bank.images_in_collection(Uuid::new_v4()),
            Err(Error::CollectionNotFound(_))
        ));
    }
}
