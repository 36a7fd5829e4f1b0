// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Hashing utilities for the map tree and the head log. All hashing in the
//! directory is SHA-256; node hashes are domain separated by a single prefix
//! byte so a leaf can never be confused with an interior node.

use crate::types::Index;
use once_cell::sync::Lazy;
use sha2::Digest as Sha2Digest;

/// A hash digest of [DIGEST_BYTES] bytes
pub type Digest = [u8; DIGEST_BYTES];

/// The number of bytes in a SHA-256 digest
pub const DIGEST_BYTES: usize = 32;

/// Represents an empty digest, with no data contained
pub const EMPTY_DIGEST: Digest = [0u8; DIGEST_BYTES];

/// The distinguished `previous_hash` of the first revision of an entry
pub const NIL_ENTRY_HASH: Digest = [0u8; DIGEST_BYTES];

/// Domain prefix for leaf (and empty-leaf) node hashes
pub const LEAF_PREFIX: u8 = 0x00;

/// Domain prefix for interior node hashes
pub const INNER_PREFIX: u8 = 0x01;

/// Hash a single byte array
pub fn hash(item: &[u8]) -> Digest {
    let output = sha2::Sha256::digest(item);
    let mut digest = EMPTY_DIGEST;
    digest.copy_from_slice(&output);
    digest
}

/// The hash of an occupied leaf at the given depth:
/// `H(0x00 || index || u32(depth) || value)` where `value` is the 32-byte
/// commitment of the entry stored at `index`.
pub fn leaf_hash(index: &Index, depth: u32, value: &Digest) -> Digest {
    let mut data = [0u8; 1 + DIGEST_BYTES + 4 + DIGEST_BYTES];
    data[0] = LEAF_PREFIX;
    data[1..1 + DIGEST_BYTES].copy_from_slice(index.as_bytes());
    data[1 + DIGEST_BYTES..1 + DIGEST_BYTES + 4].copy_from_slice(&depth.to_be_bytes());
    data[1 + DIGEST_BYTES + 4..].copy_from_slice(value);
    hash(&data)
}

/// The hash of an interior node: `H(0x01 || left || right)`
pub fn inner_hash(left: &Digest, right: &Digest) -> Digest {
    let mut data = [0u8; 1 + 2 * DIGEST_BYTES];
    data[0] = INNER_PREFIX;
    data[1..1 + DIGEST_BYTES].copy_from_slice(left);
    data[1 + DIGEST_BYTES..].copy_from_slice(right);
    hash(&data)
}

// The table of empty subtree hashes, one per depth. The empty leaf hash is
// prefix-independent so that a single constant per depth suffices; this is
// what makes a 2^256-leaf tree tractable, since no empty node is ever
// materialized.
static EMPTY_SUBTREE: Lazy<Vec<Digest>> = Lazy::new(|| {
    let mut table = vec![EMPTY_DIGEST; crate::TREE_DEPTH + 1];
    table[crate::TREE_DEPTH] = leaf_hash(
        &Index::from(EMPTY_DIGEST),
        crate::TREE_DEPTH as u32,
        &EMPTY_DIGEST,
    );
    for depth in (0..crate::TREE_DEPTH).rev() {
        table[depth] = inner_hash(&table[depth + 1], &table[depth + 1]);
    }
    table
});

/// The hash of a fully-empty subtree whose root sits at `depth`. `empty_at(256)`
/// is the empty leaf constant, and `empty_at(0)` is the root hash of a map
/// with no entries at all.
pub fn empty_at(depth: usize) -> Digest {
    EMPTY_SUBTREE[depth]
}

/// Try and parse a digest from an unknown length of bytes. Helpful for
/// converting a `Vec<u8>` to a [Digest]
pub fn try_parse_digest(value: &[u8]) -> Result<Digest, String> {
    if value.len() != DIGEST_BYTES {
        Err(format!(
            "Failed to parse Digest. Expected {} bytes but the value has {} bytes",
            DIGEST_BYTES,
            value.len()
        ))
    } else {
        let mut arr = EMPTY_DIGEST;
        arr.copy_from_slice(value);
        Ok(arr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_is_consistent() {
        // every level is the inner hash of two copies of the level below
        for depth in 0..crate::TREE_DEPTH {
            assert_eq!(
                empty_at(depth),
                inner_hash(&empty_at(depth + 1), &empty_at(depth + 1))
            );
        }
        // and the deepest level is the empty leaf constant
        assert_eq!(
            empty_at(crate::TREE_DEPTH),
            leaf_hash(
                &Index::from(EMPTY_DIGEST),
                crate::TREE_DEPTH as u32,
                &EMPTY_DIGEST
            )
        );
    }

    #[test]
    fn leaf_and_inner_domains_are_separated() {
        let index = Index::from([0x42u8; 32]);
        let value = hash(b"value");
        let leaf = leaf_hash(&index, 256, &value);
        let inner = inner_hash(&value, &value);
        assert_ne!(leaf, inner);
        assert_ne!(leaf, EMPTY_DIGEST);
    }
}
