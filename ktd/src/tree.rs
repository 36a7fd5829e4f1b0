// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The sparse Merkle map: a perfect binary tree of depth 256 indexed by VRF
//! output, stored as versioned `(depth, prefix) -> hash` records. Only paths
//! to occupied leaves are materialized; everything else reads as the
//! precomputed empty constant of its depth. Each epoch writes only the nodes
//! on touched paths, so unchanged subtrees are shared with every earlier
//! epoch through the storage layer's `<= epoch` reads.

use crate::errors::TreeError;
use crate::storage::types::{DbRecord, TreeNodeRecord};
use crate::storage::{Database, StorageManager};

use ktd_core::hash::{empty_at, inner_hash, leaf_hash, Digest};
use ktd_core::types::{Index, TreeProof};
use ktd_core::TREE_DEPTH;

use std::collections::{BTreeSet, HashMap};

// The index bits above `depth`, remaining bits zeroed; the storage key of the
// node at `depth` on the path to `index`.
fn mask_bytes(bytes: &[u8; 32], depth: u16) -> [u8; 32] {
    let mut out = [0u8; 32];
    let full_bytes = (depth / 8) as usize;
    out[..full_bytes].copy_from_slice(&bytes[..full_bytes]);
    let rem = depth % 8;
    if rem != 0 {
        out[full_bytes] = bytes[full_bytes] & (0xffu8 << (8 - rem));
    }
    out
}

fn set_bit(bytes: &mut [u8; 32], i: u16) {
    bytes[(i / 8) as usize] |= 1 << (7 - (i % 8));
}

// The off-path child at `child_depth` along the path to `index`: the path
// prefix with its last bit flipped.
fn sibling_prefix(index: &Index, child_depth: u16) -> [u8; 32] {
    let mut prefix = mask_bytes(index.as_bytes(), child_depth);
    prefix[((child_depth - 1) / 8) as usize] ^= 1 << (7 - ((child_depth - 1) % 8));
    prefix
}

/// The published root of the map as of `epoch`
pub async fn root_at<Db: Database>(
    storage: &StorageManager<Db>,
    epoch: u64,
) -> Result<Digest, TreeError> {
    Ok(storage
        .get_tree_node(0, &[0u8; 32], epoch)
        .await?
        .unwrap_or_else(|| empty_at(0)))
}

/// Build the tree for `new_epoch` by applying `leaves` (pairs of index and
/// entry commitment) on top of the tree at `prior_epoch`. Returns the new
/// root and the node records the caller must persist atomically with the
/// rest of the epoch; nothing is written here.
///
/// Duplicate indices within one batch are a programming error in the caller
/// and fail with DUPLICATE_INDEX.
pub async fn batch_insert<Db: Database>(
    storage: &StorageManager<Db>,
    prior_epoch: u64,
    new_epoch: u64,
    leaves: &[(Index, Digest)],
) -> Result<(Digest, Vec<DbRecord>), TreeError> {
    if leaves.is_empty() {
        return Ok((root_at(storage, prior_epoch).await?, Vec::new()));
    }

    let mut staged: HashMap<(u16, [u8; 32]), Digest> = HashMap::new();
    let mut frontier: BTreeSet<[u8; 32]> = BTreeSet::new();

    let depth = TREE_DEPTH as u16;
    for (index, value) in leaves {
        if !frontier.insert(*index.as_bytes()) {
            return Err(TreeError::DuplicateIndex(*index));
        }
        staged.insert(
            (depth, *index.as_bytes()),
            leaf_hash(index, TREE_DEPTH as u32, value),
        );
    }

    // recompute hashes bottom-up along touched paths only
    for level in (0..depth).rev() {
        let parents: BTreeSet<[u8; 32]> = frontier
            .iter()
            .map(|prefix| mask_bytes(prefix, level))
            .collect();

        for parent in &parents {
            let left = *parent;
            let mut right = *parent;
            set_bit(&mut right, level);

            let left_hash = match staged.get(&(level + 1, left)) {
                Some(hash) => *hash,
                None => storage
                    .get_tree_node(level + 1, &left, prior_epoch)
                    .await?
                    .unwrap_or_else(|| empty_at(level as usize + 1)),
            };
            let right_hash = match staged.get(&(level + 1, right)) {
                Some(hash) => *hash,
                None => storage
                    .get_tree_node(level + 1, &right, prior_epoch)
                    .await?
                    .unwrap_or_else(|| empty_at(level as usize + 1)),
            };

            staged.insert((level, *parent), inner_hash(&left_hash, &right_hash));
        }
        frontier = parents;
    }

    let root = staged[&(0, [0u8; 32])];
    let mut records: Vec<DbRecord> = staged
        .into_iter()
        .map(|((depth, prefix), hash)| {
            DbRecord::TreeNode(TreeNodeRecord {
                depth,
                prefix,
                epoch: new_epoch,
                hash,
            })
        })
        .collect();
    // deterministic persistence order
    records.sort_by(|a, b| match (a, b) {
        (DbRecord::TreeNode(x), DbRecord::TreeNode(y)) => {
            (x.depth, x.prefix).cmp(&(y.depth, y.prefix))
        }
        _ => core::cmp::Ordering::Equal,
    });

    Ok((root, records))
}

/// Produce the inclusion (or absence) proof for `index` in the tree as of
/// `epoch`: the leaf hash at the index plus the 256 sibling hashes along the
/// path, root side first
pub async fn inclusion_proof<Db: Database>(
    storage: &StorageManager<Db>,
    epoch: u64,
    index: &Index,
) -> Result<TreeProof, TreeError> {
    let depth = TREE_DEPTH as u16;
    let leaf = storage
        .get_tree_node(depth, index.as_bytes(), epoch)
        .await?
        .unwrap_or_else(|| empty_at(TREE_DEPTH));

    let mut siblings = Vec::with_capacity(TREE_DEPTH);
    for child_depth in 1..=depth {
        let prefix = sibling_prefix(index, child_depth);
        let sibling = storage
            .get_tree_node(child_depth, &prefix, epoch)
            .await?
            .unwrap_or_else(|| empty_at(child_depth as usize));
        siblings.push(sibling);
    }

    Ok(TreeProof {
        leaf_hash: leaf,
        siblings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryDb;
    use ktd_core::hash::hash;
    use ktd_core::verify::tree::{is_empty_leaf, verify_tree_proof};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn manager() -> StorageManager<InMemoryDb> {
        StorageManager::new(InMemoryDb::new())
    }

    fn random_index(rng: &mut StdRng) -> Index {
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes);
        Index::from(bytes)
    }

    #[tokio::test]
    async fn empty_tree_has_the_empty_root() {
        let storage = manager();
        assert_eq!(root_at(&storage, 0).await.unwrap(), empty_at(0));
    }

    #[tokio::test]
    async fn single_leaf_inclusion_and_absence() {
        let storage = manager();
        let mut rng = StdRng::seed_from_u64(61);
        let index = random_index(&mut rng);
        let value = hash(b"commitment");

        let (root, records) = batch_insert(&storage, 0, 1, &[(index, value)]).await.unwrap();
        storage.db().write_batch(records).await.unwrap();
        assert_ne!(root, empty_at(0));
        assert_eq!(root_at(&storage, 1).await.unwrap(), root);

        let proof = inclusion_proof(&storage, 1, &index).await.unwrap();
        assert!(!is_empty_leaf(&proof.leaf_hash));
        verify_tree_proof(&root, &index, &proof).unwrap();

        let absent = random_index(&mut rng);
        let absence = inclusion_proof(&storage, 1, &absent).await.unwrap();
        assert!(is_empty_leaf(&absence.leaf_hash));
        verify_tree_proof(&root, &absent, &absence).unwrap();
    }

    #[tokio::test]
    async fn every_batched_leaf_proves_and_every_other_index_is_absent() {
        let storage = manager();
        let mut rng = StdRng::seed_from_u64(67);

        let leaves: Vec<(Index, Digest)> = (0..25)
            .map(|i| {
                (
                    random_index(&mut rng),
                    hash(format!("value-{i}").as_bytes()),
                )
            })
            .collect();
        let (root, records) = batch_insert(&storage, 0, 1, &leaves).await.unwrap();
        storage.db().write_batch(records).await.unwrap();

        for (index, _) in &leaves {
            let proof = inclusion_proof(&storage, 1, index).await.unwrap();
            assert!(!is_empty_leaf(&proof.leaf_hash));
            verify_tree_proof(&root, index, &proof).unwrap();
        }
        for _ in 0..10 {
            let absent = random_index(&mut rng);
            let proof = inclusion_proof(&storage, 1, &absent).await.unwrap();
            assert!(is_empty_leaf(&proof.leaf_hash));
            verify_tree_proof(&root, &absent, &proof).unwrap();
        }
    }

    #[tokio::test]
    async fn prior_epoch_snapshots_remain_provable() {
        let storage = manager();
        let mut rng = StdRng::seed_from_u64(71);
        let first = random_index(&mut rng);
        let second = random_index(&mut rng);

        let (root1, records) = batch_insert(&storage, 0, 1, &[(first, hash(b"one"))])
            .await
            .unwrap();
        storage.db().write_batch(records).await.unwrap();

        let (root2, records) = batch_insert(&storage, 1, 2, &[(second, hash(b"two"))])
            .await
            .unwrap();
        storage.db().write_batch(records).await.unwrap();
        assert_ne!(root1, root2);

        // the epoch-1 view still verifies: second is absent there
        let proof = inclusion_proof(&storage, 1, &second).await.unwrap();
        assert!(is_empty_leaf(&proof.leaf_hash));
        verify_tree_proof(&root1, &second, &proof).unwrap();

        // and both are present at epoch 2
        for index in [&first, &second] {
            let proof = inclusion_proof(&storage, 2, index).await.unwrap();
            assert!(!is_empty_leaf(&proof.leaf_hash));
            verify_tree_proof(&root2, index, &proof).unwrap();
        }
    }

    #[tokio::test]
    async fn updating_a_leaf_changes_only_its_value() {
        let storage = manager();
        let mut rng = StdRng::seed_from_u64(73);
        let index = random_index(&mut rng);

        let (_, records) = batch_insert(&storage, 0, 1, &[(index, hash(b"v1"))])
            .await
            .unwrap();
        storage.db().write_batch(records).await.unwrap();

        let (root2, records) = batch_insert(&storage, 1, 2, &[(index, hash(b"v2"))])
            .await
            .unwrap();
        storage.db().write_batch(records).await.unwrap();

        let proof = inclusion_proof(&storage, 2, &index).await.unwrap();
        assert_eq!(
            proof.leaf_hash,
            leaf_hash(&index, TREE_DEPTH as u32, &hash(b"v2"))
        );
        verify_tree_proof(&root2, &index, &proof).unwrap();
    }

    #[tokio::test]
    async fn duplicate_indices_in_one_batch_are_refused() {
        let storage = manager();
        let index = Index::from([9u8; 32]);
        let result = batch_insert(
            &storage,
            0,
            1,
            &[(index, hash(b"a")), (index, hash(b"b"))],
        )
        .await;
        assert!(matches!(result, Err(TreeError::DuplicateIndex(_))));
    }
}
