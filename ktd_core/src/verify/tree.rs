// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Verification of sparse map tree inclusion and absence proofs.

use super::VerificationError;
use crate::hash::{empty_at, inner_hash, Digest};
use crate::types::{Index, TreeProof};
use crate::TREE_DEPTH;

/// Fold a [TreeProof] from its leaf hash up to the root and compare. The
/// proof's `siblings` are ordered root side first: `siblings[d]` is the
/// off-path child at depth `d + 1`.
///
/// A proof whose `leaf_hash` is the empty leaf constant proves absence;
/// deciding which case applies is the caller's concern (see
/// [is_empty_leaf]).
pub fn verify_tree_proof(
    root_hash: &Digest,
    index: &Index,
    proof: &TreeProof,
) -> Result<(), VerificationError> {
    if proof.siblings.len() != TREE_DEPTH {
        return Err(VerificationError::TreeProof(format!(
            "expected {} siblings, got {}",
            TREE_DEPTH,
            proof.siblings.len()
        )));
    }

    let mut current = proof.leaf_hash;
    for depth in (0..TREE_DEPTH).rev() {
        let sibling = &proof.siblings[depth];
        current = if index.bit(depth) == 0 {
            inner_hash(&current, sibling)
        } else {
            inner_hash(sibling, &current)
        };
    }

    if current == *root_hash {
        Ok(())
    } else {
        Err(VerificationError::TreeProof(format!(
            "proof for index {index} did not fold to the published root"
        )))
    }
}

/// Whether a proof's leaf hash is the empty leaf constant, i.e. whether the
/// proof demonstrates absence
pub fn is_empty_leaf(leaf_hash: &Digest) -> bool {
    *leaf_hash == empty_at(TREE_DEPTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{empty_at, leaf_hash};

    // a proof over the completely empty tree: every sibling is the empty
    // constant of its depth
    fn empty_tree_proof() -> TreeProof {
        TreeProof {
            leaf_hash: empty_at(TREE_DEPTH),
            siblings: (1..=TREE_DEPTH).map(empty_at).collect(),
        }
    }

    #[test]
    fn absence_in_the_empty_tree_verifies() {
        let proof = empty_tree_proof();
        let root = empty_at(0);
        let index = Index::from([0xabu8; 32]);
        assert!(verify_tree_proof(&root, &index, &proof).is_ok());
        assert!(is_empty_leaf(&proof.leaf_hash));
    }

    #[test]
    fn single_leaf_inclusion_verifies() {
        // with exactly one occupied leaf, every sibling on its own path is an
        // empty constant, so the root is the straight fold of the leaf
        let index = Index::from([0x5au8; 32]);
        let value = crate::hash::hash(b"commitment");
        let leaf = leaf_hash(&index, TREE_DEPTH as u32, &value);

        let proof = TreeProof {
            leaf_hash: leaf,
            siblings: (1..=TREE_DEPTH).map(empty_at).collect(),
        };

        let mut root = leaf;
        for depth in (0..TREE_DEPTH).rev() {
            let sibling = empty_at(depth + 1);
            root = if index.bit(depth) == 0 {
                inner_hash(&root, &sibling)
            } else {
                inner_hash(&sibling, &root)
            };
        }

        assert!(verify_tree_proof(&root, &index, &proof).is_ok());
        // a different index folds to a different root
        let other = Index::from([0xa5u8; 32]);
        assert!(verify_tree_proof(&root, &other, &proof).is_err());
    }

    #[test]
    fn short_sibling_array_is_rejected() {
        let mut proof = empty_tree_proof();
        proof.siblings.pop();
        let err =
            verify_tree_proof(&empty_at(0), &Index::from([0u8; 32]), &proof).unwrap_err();
        assert!(matches!(err, VerificationError::TreeProof(_)));
    }
}
