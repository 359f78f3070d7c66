use std::io::Cursor;

use imagebank_core::config::{Config, DuplicateScope};
use imagebank_core::domain::{
    CollectionPatch, ImagePatch, MatchKind, NewPrincipal, Upload, DEFAULT_COLLECTION_NAME,
};
use imagebank_core::error::Error;
use imagebank_core::hasher::perceptual::hamming_distance;
use imagebank_core::permissions::{Action, Authorizer, Resource};
use imagebank_core::ImageBank;
use uuid::Uuid;

fn png(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Vec<u8> {
    let img = image::GrayImage::from_fn(width, height, |x, y| image::Luma([f(x, y)]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Bright on the left. Every dHash bit is set.
fn falling(width: u32) -> Vec<u8> {
    png(width, 48, move |x, _| 255 - (x * 255 / (width - 1)) as u8)
}

/// Bright on the right. No dHash bit is set.
fn rising(width: u32) -> Vec<u8> {
    png(width, 48, move |x, _| (x * 255 / (width - 1)) as u8)
}

fn upload(bytes: Vec<u8>, name: &str) -> Upload {
    Upload {
        bytes,
        original_filename: name.to_string(),
        mime_type: "image/png".to_string(),
        labels: Vec::new(),
    }
}

fn register(bank: &mut ImageBank, username: &str) -> (Uuid, Uuid) {
    let (principal, default) = bank
        .create_principal(NewPrincipal {
            username: username.to_string(),
            display_name: username.to_uppercase(),
            credential_hash: format!("hash-of-{username}"),
        })
        .unwrap();
    (principal.id, default.id)
}

fn memory_bank() -> ImageBank {
    ImageBank::open_in_memory(Config::default()).unwrap()
}

// ── Default collections ──────────────────────────────────────────

#[test]
fn test_alice_scenario() {
    let mut bank = memory_bank();
    let (alice, _) = register(&mut bank, "alice");

    let collections = bank.collections(alice).unwrap();
    let defaults: Vec<_> = collections.iter().filter(|c| c.is_default).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].name, DEFAULT_COLLECTION_NAME);
    let default = defaults[0].id;

    assert!(matches!(
        bank.delete_collection(default),
        Err(Error::InvariantViolation(_))
    ));
    assert!(matches!(
        bank.update_collection(
            default,
            CollectionPatch {
                is_default: Some(false),
                ..Default::default()
            }
        ),
        Err(Error::InvariantViolation(_))
    ));
    assert!(bank.collection(default).unwrap().is_default);
}

#[test]
fn test_concurrent_registrations_keep_one_default_each() {
    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        db_path: tmp.path().join("bank.db"),
        ..Config::default()
    };
    let alice = {
        let mut bank = ImageBank::open(config.clone()).unwrap();
        register(&mut bank, "alice").0
    };

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let config = config.clone();
                s.spawn(move || {
                    let mut bank = ImageBank::open(config).unwrap();
                    bank.create_default_collection(alice)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(results.iter().all(|r| matches!(r, Err(Error::Conflict(_)))));

    let bank = ImageBank::open(config).unwrap();
    let defaults = bank
        .collections(alice)
        .unwrap()
        .into_iter()
        .filter(|c| c.is_default)
        .count();
    assert_eq!(defaults, 1);
}

// ── Labels ───────────────────────────────────────────────────────

#[test]
fn test_label_text_unique_per_owner() {
    let mut bank = memory_bank();
    let (alice, _) = register(&mut bank, "alice");
    let (bob, _) = register(&mut bank, "bob");

    bank.create_label(alice, "sunset").unwrap();
    assert!(matches!(
        bank.create_label(alice, "sunset"),
        Err(Error::Conflict(_))
    ));
    bank.create_label(bob, "sunset").unwrap();
    assert_eq!(bank.labels(alice).unwrap().len(), 1);
}

#[test]
fn test_repeated_label_in_one_set_is_validation() {
    let mut bank = memory_bank();
    let (_, default) = register(&mut bank, "alice");
    let mut up = upload(falling(64), "a.png");
    up.labels = vec!["sea".to_string(), "sea".to_string()];
    assert!(matches!(bank.ingest(default, up), Err(Error::Validation(_))));
}

// ── Collections ──────────────────────────────────────────────────

#[test]
fn test_delete_collection_removes_contained_images() {
    let mut bank = memory_bank();
    let (alice, default) = register(&mut bank, "alice");
    let trips = bank.create_collection(alice, "trips", &[]).unwrap();
    let a = bank.ingest(trips.id, upload(falling(64), "a.png")).unwrap();
    let b = bank.ingest(trips.id, upload(rising(64), "b.png")).unwrap();
    let kept = bank.ingest(default, upload(rising(80), "c.png")).unwrap();

    assert_eq!(bank.delete_collection(trips.id).unwrap(), 2);
    for id in [a.image.id, b.image.id] {
        assert!(matches!(bank.image(id), Err(Error::ImageNotFound(_))));
    }
    assert!(bank.image(kept.image.id).is_ok());
    // `kept` was a near copy of `b`; it is its own root now.
    assert!(bank.duplicate_of(kept.image.id).unwrap().is_none());
}

// ── Ingestion and duplicates ─────────────────────────────────────

#[test]
fn test_identical_bytes_link_to_first_image() {
    let mut bank = memory_bank();
    let (_, default) = register(&mut bank, "alice");

    let first = bank.ingest(default, upload(falling(64), "a.png")).unwrap();
    let second = bank.ingest(default, upload(falling(64), "a-copy.png")).unwrap();

    assert!(first.duplicate.is_none());
    let link = second.duplicate.unwrap();
    assert_eq!(link.image_id, second.image.id);
    assert_eq!(link.original_id, first.image.id);
    assert_eq!(link.kind, MatchKind::Exact);
    assert_eq!(
        first.fingerprint.fingerprint.content_hash,
        second.fingerprint.fingerprint.content_hash
    );
}

#[test]
fn test_text_plain_rejected_without_rows() {
    let mut bank = memory_bank();
    let (_, default) = register(&mut bank, "alice");
    let before = bank.stats().unwrap();

    let mut up = upload(b"just some words".to_vec(), "notes.txt");
    up.mime_type = "text/plain".to_string();
    up.labels = vec!["notes".to_string()];
    assert!(matches!(bank.ingest(default, up), Err(Error::Validation(_))));

    let after = bank.stats().unwrap();
    assert_eq!(after.images, before.images);
    assert_eq!(after.labels, before.labels);
}

#[test]
fn test_near_duplicate_is_linked_as_near() {
    let mut bank = memory_bank();
    let (_, default) = register(&mut bank, "alice");

    let original = bank.ingest(default, upload(falling(64), "a.png")).unwrap();
    let resized = bank.ingest(default, upload(falling(96), "a-large.png")).unwrap();
    let unrelated = bank.ingest(default, upload(rising(64), "b.png")).unwrap();

    let link = resized.duplicate.unwrap();
    assert_eq!(link.original_id, original.image.id);
    assert_eq!(link.kind, MatchKind::Near);
    assert!(link.distance < bank.config().duplicates.near_threshold);
    assert!(unrelated.duplicate.is_none());
}

#[test]
fn test_chain_collapses_to_root() {
    let mut bank = memory_bank();
    let (_, default) = register(&mut bank, "alice");

    let a = bank.ingest(default, upload(falling(64), "a.png")).unwrap();
    let b = bank.ingest(default, upload(falling(96), "b.png")).unwrap();
    let c = bank.ingest(default, upload(falling(96), "c.png")).unwrap();

    assert_eq!(b.duplicate.as_ref().unwrap().original_id, a.image.id);
    let link = c.duplicate.unwrap();
    assert_eq!(link.original_id, a.image.id);
    // C has B's bytes, not A's, so the collapsed link is measured against A.
    let (a_fp, c_fp) = (&a.fingerprint.fingerprint, &c.fingerprint.fingerprint);
    assert_ne!(a_fp.content_hash, c_fp.content_hash);
    assert_eq!(link.kind, MatchKind::Near);
    assert_eq!(
        link.distance,
        hamming_distance(a_fp.perceptual_hash, c_fp.perceptual_hash)
    );
    assert_eq!(bank.duplicates_of(a.image.id).unwrap().len(), 2);
    assert!(bank.duplicates_of(b.image.id).unwrap().is_empty());
}

#[test]
fn test_deleting_original_promotes_oldest_duplicate() {
    let mut bank = memory_bank();
    let (alice, default) = register(&mut bank, "alice");

    let a = bank.ingest(default, upload(falling(64), "a.png")).unwrap();
    let b = bank.ingest(default, upload(falling(96), "b.png")).unwrap();
    let c = bank.ingest(default, upload(falling(64), "c.png")).unwrap();

    bank.delete_image(a.image.id).unwrap();

    assert!(bank.duplicate_of(b.image.id).unwrap().is_none());
    assert_eq!(c.duplicate.as_ref().unwrap().kind, MatchKind::Exact);
    let link = bank.duplicate_of(c.image.id).unwrap().unwrap();
    assert_eq!(link.original_id, b.image.id);
    // C was an exact copy of A; against B it is only a near match.
    let (b_fp, c_fp) = (&b.fingerprint.fingerprint, &c.fingerprint.fingerprint);
    assert_eq!(link.kind, MatchKind::Near);
    assert_eq!(
        link.distance,
        hamming_distance(b_fp.perceptual_hash, c_fp.perceptual_hash)
    );
    assert_eq!(bank.duplicate_links(alice).unwrap().len(), 1);

    // New uploads now resolve to the promoted root.
    let d = bank.ingest(default, upload(falling(64), "d.png")).unwrap();
    assert_eq!(d.duplicate.unwrap().original_id, b.image.id);
}

#[test]
fn test_duplicate_scope() {
    let mut owner_scoped = memory_bank();
    let (_, alice_default) = register(&mut owner_scoped, "alice");
    let (_, bob_default) = register(&mut owner_scoped, "bob");
    owner_scoped
        .ingest(alice_default, upload(falling(64), "a.png"))
        .unwrap();
    let bobs = owner_scoped
        .ingest(bob_default, upload(falling(64), "a.png"))
        .unwrap();
    assert!(bobs.duplicate.is_none());

    let mut config = Config::default();
    config.duplicates.scope = DuplicateScope::Global;
    let mut global = ImageBank::open_in_memory(config).unwrap();
    let (_, alice_default) = register(&mut global, "alice");
    let (_, bob_default) = register(&mut global, "bob");
    let alices = global
        .ingest(alice_default, upload(falling(64), "a.png"))
        .unwrap();
    let bobs = global
        .ingest(bob_default, upload(falling(64), "a.png"))
        .unwrap();
    assert_eq!(bobs.duplicate.unwrap().original_id, alices.image.id);
}

#[test]
fn test_move_to_another_owner_keeps_links_within_owner() {
    let mut bank = memory_bank();
    let (alice, alice_default) = register(&mut bank, "alice");
    let (bob, bob_default) = register(&mut bank, "bob");
    let move_to = |collection_id| ImagePatch {
        collection_id: Some(collection_id),
        ..Default::default()
    };

    let a = bank.ingest(alice_default, upload(falling(64), "a.png")).unwrap().image;
    let m = bank.ingest(alice_default, upload(falling(64), "m.png")).unwrap().image;
    let k = bank.ingest(alice_default, upload(falling(64), "k.png")).unwrap().image;

    // A moved duplicate leaves its old original behind.
    let moved = bank.update_image(m.id, move_to(bob_default)).unwrap();
    assert_eq!(moved.owner_id, bob);
    assert!(bank.duplicate_of(m.id).unwrap().is_none());

    let n = bank.ingest(bob_default, upload(falling(64), "n.png")).unwrap();
    let link = n.duplicate.unwrap();
    assert_eq!(link.original_id, m.id);
    assert_eq!(bank.image(link.original_id).unwrap().owner_id, bob);

    // A moved original hands its dependents a new root and rejoins the new
    // owner's chain.
    bank.update_image(a.id, move_to(bob_default)).unwrap();
    assert!(bank.duplicate_of(k.id).unwrap().is_none());
    let relinked = bank.duplicate_of(a.id).unwrap().unwrap();
    assert_eq!(relinked.original_id, m.id);
    assert_eq!((relinked.kind, relinked.distance), (MatchKind::Exact, 0));

    for (owner, expected) in [(alice, 0), (bob, 2)] {
        let links = bank.duplicate_links(owner).unwrap();
        assert_eq!(links.len(), expected);
        for link in links {
            assert_eq!(bank.image(link.original_id).unwrap().owner_id, owner);
        }
    }
}

#[test]
fn test_concurrent_identical_ingests_link_to_one_original() {
    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        db_path: tmp.path().join("bank.db"),
        ..Config::default()
    };
    let default = {
        let mut bank = ImageBank::open(config.clone()).unwrap();
        register(&mut bank, "alice").1
    };

    const WRITERS: usize = 4;
    let bytes = falling(64);
    let ingested: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let config = config.clone();
                let bytes = bytes.clone();
                s.spawn(move || {
                    let mut bank = ImageBank::open(config).unwrap();
                    bank.ingest(default, upload(bytes, &format!("{i}.png")))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let originals: Vec<_> = ingested.iter().filter(|i| i.duplicate.is_none()).collect();
    assert_eq!(originals.len(), 1);
    let root = originals[0].image.id;
    for other in ingested.iter().filter(|i| i.image.id != root) {
        assert_eq!(other.duplicate.as_ref().unwrap().original_id, root);
    }
}

#[test]
fn test_reopen_persists_catalog_and_objects() {
    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        db_path: tmp.path().join("catalog/bank.db"),
        storage_dir: Some(tmp.path().join("objects")),
        ..Config::default()
    };

    let (alice, image) = {
        let mut bank = ImageBank::open(config.clone()).unwrap();
        let (alice, default) = register(&mut bank, "alice");
        let image = bank.ingest(default, upload(falling(64), "a.png")).unwrap().image;
        (alice, image)
    };
    assert!(tmp.path().join("objects").join(&image.stored_filename).exists());

    let mut bank = ImageBank::open(config).unwrap();
    assert_eq!(bank.image(image.id).unwrap().owner_id, alice);
    bank.delete_image(image.id).unwrap();
    assert!(!tmp.path().join("objects").join(&image.stored_filename).exists());
}

// ── Sharing ──────────────────────────────────────────────────────

#[test]
fn test_shared_collection_visible_to_grantee() {
    let mut bank = memory_bank();
    let (alice, default) = register(&mut bank, "alice");
    let (bob, _) = register(&mut bank, "bob");
    let image = bank.ingest(default, upload(falling(64), "a.png")).unwrap().image;

    assert!(bank.check(alice, Resource::Image(image.id), Action::Delete).unwrap());
    assert!(!bank.check(bob, Resource::Image(image.id), Action::View).unwrap());

    bank.share_collection(default, bob, &[Action::View, Action::Add])
        .unwrap();
    assert!(bank.check(bob, Resource::Collection(default), Action::Add).unwrap());
    assert!(bank.check(bob, Resource::Image(image.id), Action::View).unwrap());
    assert!(!bank.check(bob, Resource::Image(image.id), Action::Delete).unwrap());
}
