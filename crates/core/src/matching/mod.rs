use std::collections::HashMap;

use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{duplicates, fingerprints, fingerprints::PhashCandidate};
use crate::config::{DuplicateConfig, DuplicateScope};
use crate::domain::{DuplicateDecision, DuplicateMatch, Fingerprint, MatchKind};
use crate::error::{Error, Result};
use crate::hasher::perceptual::hamming_distance;

/// BK-tree for Hamming distance nearest-neighbor search over perceptual
/// hashes.
struct BkTree {
    root: Option<BkNode>,
}

struct BkNode {
    candidate: PhashCandidate,
    children: HashMap<u32, BkNode>,
}

impl BkTree {
    fn new() -> Self {
        Self { root: None }
    }

    fn insert(&mut self, candidate: PhashCandidate) {
        match self.root {
            None => {
                self.root = Some(BkNode {
                    candidate,
                    children: HashMap::new(),
                });
            }
            Some(ref mut root) => Self::insert_into(root, candidate),
        }
    }

    fn insert_into(node: &mut BkNode, candidate: PhashCandidate) {
        let dist = hamming_distance(node.candidate.phash, candidate.phash);
        if let Some(child) = node.children.get_mut(&dist) {
            Self::insert_into(child, candidate);
        } else {
            node.children.insert(
                dist,
                BkNode {
                    candidate,
                    children: HashMap::new(),
                },
            );
        }
    }

    /// Every candidate within `max_distance` of `query`, with its distance.
    fn find_within(&self, query: u64, max_distance: u32) -> Vec<(PhashCandidate, u32)> {
        let mut results = Vec::new();
        if let Some(ref root) = self.root {
            Self::search(root, query, max_distance, &mut results);
        }
        results
    }

    fn search(
        node: &BkNode,
        query: u64,
        max_distance: u32,
        results: &mut Vec<(PhashCandidate, u32)>,
    ) {
        let dist = hamming_distance(node.candidate.phash, query);
        if dist <= max_distance {
            results.push((node.candidate, dist));
        }
        let low = dist.saturating_sub(max_distance);
        let high = dist + max_distance;
        for d in low..=high {
            if let Some(child) = node.children.get(&d) {
                Self::search(child, query, max_distance, results);
            }
        }
    }
}

/// Owner filter for fingerprint lookups; `None` searches the whole bank.
pub(crate) fn scope_owner(config: &DuplicateConfig, owner_id: Uuid) -> Option<Uuid> {
    match config.scope {
        DuplicateScope::Owner => Some(owner_id),
        DuplicateScope::Global => None,
    }
}

/// How `query` relates to `original`: `Exact` only for identical content
/// hashes, with the Hamming distance between their perceptual hashes.
pub fn measure(query: &Fingerprint, original: &Fingerprint) -> (MatchKind, u32) {
    let distance = hamming_distance(query.perceptual_hash, original.perceptual_hash);
    if query.content_hash == original.content_hash {
        (MatchKind::Exact, distance)
    } else {
        (MatchKind::Near, distance)
    }
}

/// Closest perceptual match strictly under `threshold`. Ties go to the
/// earliest stored image.
pub fn nearest(
    candidates: Vec<PhashCandidate>,
    query: u64,
    threshold: u32,
) -> Option<(PhashCandidate, u32)> {
    if threshold == 0 {
        return None;
    }
    let mut tree = BkTree::new();
    for candidate in candidates {
        tree.insert(candidate);
    }
    tree.find_within(query, threshold - 1)
        .into_iter()
        .min_by_key(|(c, dist)| (*dist, c.created_at, c.seq))
}

/// Decide whether `image_id` duplicates an image already in the catalog.
///
/// An identical content hash wins over a perceptual match. Whatever matches,
/// the link targets the matched image's chain root so chains never grow
/// deeper than one hop. A link to a root other than the matched image is
/// measured against the root's own fingerprint.
pub fn resolve(
    conn: &Connection,
    owner_id: Uuid,
    image_id: Uuid,
    fingerprint: &Fingerprint,
    config: &DuplicateConfig,
) -> Result<DuplicateDecision> {
    let owner = scope_owner(config, owner_id);

    let matched = match fingerprints::earliest_with_sha256(
        conn,
        &fingerprint.content_hash,
        owner,
        image_id,
    )? {
        Some(found) => Some((found, MatchKind::Exact, 0)),
        None => {
            let candidates = fingerprints::phash_candidates(conn, owner, image_id)?;
            nearest(candidates, fingerprint.perceptual_hash, config.near_threshold)
                .map(|(c, dist)| (c.image_id, MatchKind::Near, dist))
        }
    };

    let Some((found, kind, distance)) = matched else {
        return Ok(DuplicateDecision::default());
    };
    let original_id = duplicates::root_of(conn, found)?;
    let (kind, distance) = if original_id == found {
        (kind, distance)
    } else {
        let root = fingerprints::get(conn, original_id)?.ok_or_else(|| {
            Error::InvariantViolation(format!("image {original_id} has no fingerprint"))
        })?;
        measure(fingerprint, &root.fingerprint)
    };
    debug!(image = %image_id, matched = %found, root = %original_id, %kind, distance, "duplicate resolved");
    Ok(DuplicateDecision {
        original: Some(DuplicateMatch {
            original_id,
            kind,
            distance,
        }),
    })
}
