// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The append-only log of signed map heads. Heads are stored in epoch order
//! by the storage layer; this module derives RFC 6962 roots, inclusion
//! proofs and consistency proofs from them (the pure tree math lives in
//! `ktd_core::logtree`). The log is what gives all readers one linearizable
//! view of history: epoch `n` is appended only after `n - 1`, and any
//! rewritten prefix becomes unprovable to a client holding an earlier root.

use crate::errors::LogError;
use crate::storage::types::DbRecord;
use crate::storage::{Database, StorageManager};

use ktd_core::hash::Digest;
use ktd_core::logtree;
use ktd_core::types::{LogConsistencyProof, LogInclusionProof, SignedMapHead};

/// The current number of log leaves (equivalently, published epochs)
pub async fn size<Db: Database>(storage: &StorageManager<Db>) -> Result<u64, LogError> {
    Ok(storage
        .latest_epoch()
        .await?
        .map(|record| record.log_size)
        .unwrap_or(0))
}

async fn leaf_hashes<Db: Database>(
    storage: &StorageManager<Db>,
    count: u64,
) -> Result<Vec<Digest>, LogError> {
    let heads = storage.get_map_heads(count).await?;
    Ok(heads
        .iter()
        .map(|head| logtree::leaf_hash(&head.to_wire()))
        .collect())
}

/// The log root over the first `tree_size` heads
pub async fn root<Db: Database>(
    storage: &StorageManager<Db>,
    tree_size: u64,
) -> Result<Digest, LogError> {
    let leaves = leaf_hashes(storage, tree_size).await?;
    Ok(logtree::root_from_leaf_hashes(&leaves))
}

/// The size and root of the log as it will stand once `pending` is appended.
/// Used by the sequencer to sign the new log root inside the same atomic
/// batch that persists the head.
pub async fn root_with_pending<Db: Database>(
    storage: &StorageManager<Db>,
    pending: &SignedMapHead,
) -> Result<(u64, Digest), LogError> {
    let mut leaves = leaf_hashes(storage, pending.epoch).await?;
    leaves.push(logtree::leaf_hash(&pending.to_wire()));
    let size = leaves.len() as u64;
    Ok((size, logtree::root_from_leaf_hashes(&leaves)))
}

/// Validate that `head` extends the log contiguously and wrap it as the
/// record to persist. `head.epoch` must equal the current log size.
pub async fn append_record<Db: Database>(
    storage: &StorageManager<Db>,
    head: SignedMapHead,
) -> Result<DbRecord, LogError> {
    let current = size(storage).await?;
    if head.epoch != current {
        return Err(LogError::NonContiguousEpoch {
            expected: current,
            got: head.epoch,
        });
    }
    Ok(DbRecord::MapHead(head))
}

/// Prove that the head at `leaf_index` is included in the log of `tree_size`
pub async fn inclusion_proof<Db: Database>(
    storage: &StorageManager<Db>,
    leaf_index: u64,
    tree_size: u64,
) -> Result<LogInclusionProof, LogError> {
    if leaf_index >= tree_size {
        return Err(LogError::HeadNotFound(leaf_index));
    }
    let leaves = leaf_hashes(storage, tree_size).await?;
    Ok(LogInclusionProof {
        leaf_index,
        tree_size,
        path: logtree::inclusion_path(leaf_index as usize, &leaves),
    })
}

/// Prove that the log at `first_size` is a prefix of the log at
/// `second_size`. A `first_size` of zero (a client with no trusted view yet)
/// yields the empty proof.
pub async fn consistency_proof<Db: Database>(
    storage: &StorageManager<Db>,
    first_size: u64,
    second_size: u64,
) -> Result<LogConsistencyProof, LogError> {
    let path = if first_size == 0 || first_size >= second_size {
        Vec::new()
    } else {
        let leaves = leaf_hashes(storage, second_size).await?;
        logtree::consistency_path(first_size as usize, &leaves)
    };
    Ok(LogConsistencyProof {
        first_size,
        second_size,
        path,
    })
}
