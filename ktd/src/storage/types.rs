// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Record types persisted by the storage layer. A [DbRecord] is the unit of
//! an atomic batched write: the sequencer composes one `Vec<DbRecord>` per
//! epoch and either all of it lands or none of it does.

use crate::monitor::MonitorVerdict;
use ktd_core::hash::Digest;
use ktd_core::types::{CommittedValue, Entry, Index, MutationRecord, SignedLogRoot, SignedMapHead};

use serde::{Deserialize, Serialize};

/// A versioned node of the sparse map tree. Only nodes on paths touched by
/// some epoch are ever written; absent nodes read as the empty constant of
/// their depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNodeRecord {
    /// Depth of the node; 0 is the root, 256 a leaf
    pub depth: u16,
    /// The index bits above `depth`, remaining bits zeroed
    pub prefix: [u8; 32],
    /// The epoch this node value was written in
    pub epoch: u64,
    /// The node hash
    pub hash: Digest,
}

/// A revision of an entry, keyed by index and the epoch it committed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Tree coordinate of the identifier
    pub index: Index,
    /// Epoch the revision committed in
    pub epoch: u64,
    /// The committed entry
    pub entry: Entry,
}

/// A commitment opening, stored so lookups can return the payload to the
/// account owner. Keyed by the commitment itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedRecord {
    /// The commitment the opening belongs to
    pub commitment: Digest,
    /// The nonce and payload
    pub value: CommittedValue,
}

/// The durable summary of a published epoch. Its presence is what makes an
/// epoch tick idempotent: a sequencer restarting after a crash reads the
/// latest record and never re-runs a committed epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// The published epoch
    pub epoch: u64,
    /// The highest queue id consumed through this epoch
    pub last_mutation_id: u64,
    /// The map root published for this epoch
    pub root_hash: Digest,
    /// The head log size after this epoch's append
    pub log_size: u64,
    /// Publication time carried in the signed head
    pub timestamp_ns: u64,
}

/// The unit of atomic persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbRecord {
    /// A sparse map tree node version
    TreeNode(TreeNodeRecord),
    /// An entry revision
    Entry(EntryRecord),
    /// A commitment opening
    Committed(CommittedRecord),
    /// A signed map head, appended to the head log
    MapHead(SignedMapHead),
    /// A signed log root at some size
    LogRoot(SignedLogRoot),
    /// A processed mutation with its outcome
    Mutation(MutationRecord),
    /// The epoch summary; always the last record of an epoch batch
    Epoch(EpochRecord),
    /// A monitor attestation or inconsistency report
    Verdict(MonitorVerdict),
}
