// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An implementation of a key transparency directory (ktd): a verifiable,
//! append-only mapping from opaque user identifiers to small committed
//! payloads, typically public keys.
//!
//! # Overview
//!
//! A directory stores one entry per `(app_id, user_id)` identifier in a
//! sparse Merkle map indexed by a VRF over the identifier. Each batch of
//! accepted updates becomes an epoch: a new map root, signed as a map head
//! and appended to an RFC 6962 log of heads. Account owners can audit what
//! the directory publishes under their name, relying parties verify entries
//! against a globally consistent view, and independent monitors replay every
//! epoch to catch a misbehaving operator.
//!
//! The crate splits along the trust boundary: everything a client needs
//! (types, crypto, proof verification) lives in `ktd_core`; this crate adds
//! the server side — the tree, the head log, mutation validation, the
//! sequencer, the read surface and the monitor.
//!
//! ## Setup
//!
//! A directory needs storage, a VRF key and two signing keys (map and log).
//! The [sequencer::Sequencer] is the single writer; [directory::Directory]
//! serves reads and admits updates into the queue the sequencer drains.
//! ```
//! use ktd::directory::Directory;
//! use ktd::sequencer::Sequencer;
//! use ktd::signer::{InMemoryVrfKey, LocalSigner, Signer};
//! use ktd::storage::memory::InMemoryDb;
//! use ktd::storage::StorageManager;
//! use ktd_core::ecvrf::VrfKeyStorage;
//! use ktd_core::types::DirectoryParams;
//!
//! # tokio_test::block_on(async {
//! let mut rng = rand::thread_rng();
//! let map_signer = LocalSigner::generate(&mut rng);
//! let log_signer = LocalSigner::generate(&mut rng);
//! let vrf = InMemoryVrfKey::generate(&mut rng);
//!
//! let params = DirectoryParams {
//!     directory_id: "example".to_string(),
//!     vrf_public_key: *vrf.get_vrf_public_key().await.unwrap().as_bytes(),
//!     map_public_key: map_signer.public_key(),
//!     log_public_key: log_signer.public_key(),
//!     min_interval_ms: 100,
//!     max_interval_ms: 10_000,
//! };
//!
//! let storage = StorageManager::new(InMemoryDb::new());
//! let sequencer = Sequencer::new(
//!     storage.clone(),
//!     params.clone(),
//!     map_signer,
//!     log_signer,
//!     "sequencer-1",
//! )
//! .unwrap();
//! // publishes epoch 0 over the empty map
//! sequencer.initialize(0).await.unwrap();
//!
//! let directory = Directory::new(storage, vrf, params).await.unwrap();
//! # });
//! ```
//!
//! ## Updates and lookups
//!
//! Updates enter through [directory::Directory::queue_update], are validated
//! by the [mutator] when the sequencer next ticks, and become visible in the
//! epoch that tick publishes. [directory::Directory::get_entry] returns the
//! full proof bundle — VRF proof, tree proof, signed map head, log inclusion
//! and consistency proofs — which clients check end to end with
//! `ktd_core::verify::verify_entry_response`.
//!
//! ## Monitoring
//!
//! A [monitor::Monitor] keeps its own copy of the map, replays each epoch's
//! persisted mutations through the same validation pipeline and compares the
//! recomputed root with the operator's signed head, emitting signed
//! attestations or a signed inconsistency report.

#![warn(missing_docs)]

pub mod directory;
pub mod errors;
pub mod headlog;
pub mod monitor;
pub mod mutator;
pub mod sequencer;
pub mod signer;
pub mod storage;
pub mod tree;

#[cfg(test)]
mod tests;

pub use errors::KtdError;
pub use ktd_core::hash::Digest;
pub use ktd_core::types::{
    AppId, DirectoryParams, Entry, EntryResponse, EntryUpdate, EpochHash, Index, UserId,
};
pub use ktd_core::{MAX_ENTRY_BYTES, TREE_DEPTH};
