// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! RFC 6962 Merkle tree math for the append-only log of signed map heads:
//! root computation, audit paths, consistency paths and their verifiers.
//! The functions here are pure; the storage-backed log that feeds them lives
//! in the server crate.
//!
//! Leaves enter as raw bytes and are hashed as `H(0x00 || data)`; interior
//! nodes are `H(0x01 || left || right)`, matching the prefixes used by the
//! map tree so the two structures share one domain-separation convention.

use crate::hash::{hash, Digest, INNER_PREFIX, LEAF_PREFIX};

/// Hash a log leaf: `H(0x00 || data)`
pub fn leaf_hash(data: &[u8]) -> Digest {
    let mut buf = Vec::with_capacity(1 + data.len());
    buf.push(LEAF_PREFIX);
    buf.extend_from_slice(data);
    hash(&buf)
}

/// Hash two log subtree roots into their parent: `H(0x01 || left || right)`
pub fn node_hash(left: &Digest, right: &Digest) -> Digest {
    let mut buf = Vec::with_capacity(1 + 2 * 32);
    buf.push(INNER_PREFIX);
    buf.extend_from_slice(left);
    buf.extend_from_slice(right);
    hash(&buf)
}

/// The root of the empty log: the hash of the empty string
pub fn empty_root() -> Digest {
    hash(&[])
}

// The largest power of two strictly smaller than n, i.e. k with k < n <= 2k.
// Callers guarantee n >= 2.
fn split_point(n: usize) -> usize {
    debug_assert!(n >= 2);
    n.next_power_of_two() / 2
}

/// Compute the root over already-hashed leaves
pub fn root_from_leaf_hashes(leaves: &[Digest]) -> Digest {
    match leaves.len() {
        0 => empty_root(),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            node_hash(
                &root_from_leaf_hashes(&leaves[..k]),
                &root_from_leaf_hashes(&leaves[k..]),
            )
        }
    }
}

/// The RFC 6962 audit path for leaf `m` over already-hashed leaves, ordered
/// leaf side first
pub fn inclusion_path(m: usize, leaves: &[Digest]) -> Vec<Digest> {
    let n = leaves.len();
    debug_assert!(m < n);
    if n <= 1 {
        return Vec::new();
    }
    let k = split_point(n);
    if m < k {
        let mut path = inclusion_path(m, &leaves[..k]);
        path.push(root_from_leaf_hashes(&leaves[k..]));
        path
    } else {
        let mut path = inclusion_path(m - k, &leaves[k..]);
        path.push(root_from_leaf_hashes(&leaves[..k]));
        path
    }
}

/// The RFC 6962 consistency path proving the first `m` leaves are a prefix of
/// all `n` leaves. `m` must satisfy `0 < m < n`.
pub fn consistency_path(m: usize, leaves: &[Digest]) -> Vec<Digest> {
    debug_assert!(m > 0 && m < leaves.len());
    subproof(m, leaves, true)
}

fn subproof(m: usize, leaves: &[Digest], whole_subtree: bool) -> Vec<Digest> {
    let n = leaves.len();
    if m == n {
        return if whole_subtree {
            Vec::new()
        } else {
            vec![root_from_leaf_hashes(leaves)]
        };
    }
    let k = split_point(n);
    if m <= k {
        let mut path = subproof(m, &leaves[..k], whole_subtree);
        path.push(root_from_leaf_hashes(&leaves[k..]));
        path
    } else {
        let mut path = subproof(m - k, &leaves[k..], false);
        path.push(root_from_leaf_hashes(&leaves[..k]));
        path
    }
}

/// Check that `leaf` sits at `leaf_index` in a log of `tree_size` leaves with
/// the given `root`. Implements the iterative verifier of RFC 9162 §2.1.3.2.
pub fn verify_inclusion(
    leaf: &Digest,
    leaf_index: u64,
    tree_size: u64,
    path: &[Digest],
    root: &Digest,
) -> bool {
    if leaf_index >= tree_size {
        return false;
    }
    let mut idx = leaf_index;
    let mut last = tree_size - 1;
    let mut current = *leaf;
    for sibling in path {
        if last == 0 {
            return false;
        }
        if idx % 2 == 1 || idx == last {
            current = node_hash(sibling, &current);
            if idx % 2 == 0 {
                while idx % 2 == 0 && idx != 0 {
                    idx >>= 1;
                    last >>= 1;
                }
            }
        } else {
            current = node_hash(&current, sibling);
        }
        idx >>= 1;
        last >>= 1;
    }
    last == 0 && current == *root
}

/// Check that the log of `first_size` leaves with root `first_root` is a
/// prefix of the log of `second_size` leaves with root `second_root`.
/// Implements the iterative verifier of RFC 9162 §2.1.4.2.
pub fn verify_consistency(
    first_size: u64,
    second_size: u64,
    first_root: &Digest,
    second_root: &Digest,
    path: &[Digest],
) -> bool {
    if first_size > second_size {
        return false;
    }
    if first_size == second_size {
        return path.is_empty() && first_root == second_root;
    }
    if first_size == 0 {
        // every log extends the empty log
        return path.is_empty();
    }

    // when first_size is a power of two, first_root itself is the first
    // component of the walk
    let mut full_path: Vec<Digest> = Vec::with_capacity(path.len() + 1);
    if first_size.is_power_of_two() {
        full_path.push(*first_root);
    }
    full_path.extend_from_slice(path);
    if full_path.is_empty() {
        return false;
    }

    let mut idx = first_size - 1;
    let mut last = second_size - 1;
    while idx % 2 == 1 {
        idx >>= 1;
        last >>= 1;
    }

    let mut first_computed = full_path[0];
    let mut second_computed = full_path[0];
    for sibling in &full_path[1..] {
        if last == 0 {
            return false;
        }
        if idx % 2 == 1 || idx == last {
            first_computed = node_hash(sibling, &first_computed);
            second_computed = node_hash(sibling, &second_computed);
            if idx % 2 == 0 {
                while idx % 2 == 0 && idx != 0 {
                    idx >>= 1;
                    last >>= 1;
                }
            }
        } else {
            second_computed = node_hash(&second_computed, sibling);
        }
        idx >>= 1;
        last >>= 1;
    }

    last == 0 && first_computed == *first_root && second_computed == *second_root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Digest> {
        (0..n)
            .map(|i| leaf_hash(format!("leaf-{i}").as_bytes()))
            .collect()
    }

    #[test]
    fn empty_log_root_is_hash_of_nothing() {
        assert_eq!(root_from_leaf_hashes(&[]), empty_root());
    }

    #[test]
    fn single_leaf_root_is_the_leaf_hash() {
        let l = leaves(1);
        assert_eq!(root_from_leaf_hashes(&l), l[0]);
    }

    #[test]
    fn inclusion_proofs_verify_at_every_size() {
        for n in 1..=20usize {
            let l = leaves(n);
            let root = root_from_leaf_hashes(&l);
            for m in 0..n {
                let path = inclusion_path(m, &l);
                assert!(
                    verify_inclusion(&l[m], m as u64, n as u64, &path, &root),
                    "inclusion failed for leaf {m} of {n}"
                );
            }
        }
    }

    #[test]
    fn inclusion_proof_fails_for_wrong_leaf() {
        let l = leaves(7);
        let root = root_from_leaf_hashes(&l);
        let path = inclusion_path(3, &l);
        let wrong = leaf_hash(b"not-the-leaf");
        assert!(!verify_inclusion(&wrong, 3, 7, &path, &root));
        // and for the right leaf at the wrong position
        assert!(!verify_inclusion(&l[3], 4, 7, &path, &root));
    }

    #[test]
    fn consistency_proofs_verify_at_every_size_pair() {
        for n2 in 1..=16usize {
            let l2 = leaves(n2);
            let root2 = root_from_leaf_hashes(&l2);
            for n1 in 1..n2 {
                let root1 = root_from_leaf_hashes(&l2[..n1]);
                let path = consistency_path(n1, &l2);
                assert!(
                    verify_consistency(n1 as u64, n2 as u64, &root1, &root2, &path),
                    "consistency failed for {n1} -> {n2}"
                );
            }
        }
    }

    #[test]
    fn consistency_proof_fails_for_rewritten_prefix() {
        let mut l = leaves(12);
        let root2 = root_from_leaf_hashes(&l);
        let path = consistency_path(5, &l);

        // a history where leaf 2 was different produces a first root no
        // consistency path can connect to root2
        l[2] = leaf_hash(b"rewritten");
        let forged_root1 = root_from_leaf_hashes(&l[..5]);
        assert!(!verify_consistency(5, 12, &forged_root1, &root2, &path));
    }

    #[test]
    fn equal_sizes_are_consistent_only_with_equal_roots() {
        let l = leaves(6);
        let root = root_from_leaf_hashes(&l);
        assert!(verify_consistency(6, 6, &root, &root, &[]));
        let other = leaf_hash(b"other");
        assert!(!verify_consistency(6, 6, &root, &other, &[]));
    }
}
