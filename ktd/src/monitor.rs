// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The monitor: an independent process that replays every epoch from its
//! full mutation list and checks the recomputed map root against the
//! operator's signed head. A clean replay yields a signed attestation; a
//! divergence yields a signed inconsistency report and the monitor stops
//! advancing. Inconsistencies are verdicts for other parties to consume, not
//! errors.
//!
//! The monitor maintains its own map state in its own storage, seeded from
//! epoch 0, and runs exactly the sequencer's validation rules over exactly
//! the persisted update bytes; determinism of that pipeline is what makes
//! the root comparison meaningful.

use crate::errors::MonitorError;
use crate::signer::Signer;
use crate::storage::types::{DbRecord, EntryRecord};
use crate::storage::{Database, StorageManager};
use crate::{mutator, tree};

use ktd_core::hash::Digest;
use ktd_core::sign::{attestation_preimage, inconsistency_preimage, verify_raw};
use ktd_core::types::{
    DirectoryParams, Entry, EpochResponse, Index, MutationRecord, PublicKeyBytes, TrustedLogRoot,
};
use ktd_core::verify::verify_epoch_response;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A monitor's signed judgement on one epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorVerdict {
    /// The epoch replayed cleanly to the published root
    Attestation {
        /// The attested epoch
        epoch: u64,
        /// Hash of the signed map head being attested
        head_hash: Digest,
        /// The monitor's public key
        monitor_key: PublicKeyBytes,
        /// Signature over the attestation preimage
        signature: Vec<u8>,
    },
    /// The published root does not match the replayed state
    Inconsistency {
        /// The divergent epoch
        epoch: u64,
        /// The root the operator published
        expected_root: Digest,
        /// The root the monitor recomputed
        observed_root: Digest,
        /// The monitor's public key
        monitor_key: PublicKeyBytes,
        /// Signature over the inconsistency preimage
        signature: Vec<u8>,
    },
}

impl MonitorVerdict {
    /// Check the verdict's signature against its embedded monitor key
    pub fn verify(&self) -> bool {
        match self {
            MonitorVerdict::Attestation {
                epoch,
                head_hash,
                monitor_key,
                signature,
            } => verify_raw(monitor_key, &attestation_preimage(*epoch, head_hash), signature)
                .is_ok(),
            MonitorVerdict::Inconsistency {
                epoch,
                expected_root,
                observed_root,
                monitor_key,
                signature,
            } => verify_raw(
                monitor_key,
                &inconsistency_preimage(*epoch, expected_root, observed_root),
                signature,
            )
            .is_ok(),
        }
    }
}

/// An independent replayer of one directory's history
pub struct Monitor<Db, S> {
    replay_storage: StorageManager<Db>,
    signer: S,
    params: DirectoryParams,
    trusted: TrustedLogRoot,
    next_epoch: u64,
    halted: bool,
}

impl<Db: Database, S: Signer> Monitor<Db, S> {
    /// Construct a monitor over its own (empty) replay storage. The monitor
    /// starts at epoch 0 with no trusted log view.
    pub fn new(replay_storage: StorageManager<Db>, signer: S, params: DirectoryParams) -> Self {
        Self {
            replay_storage,
            signer,
            params,
            trusted: TrustedLogRoot::genesis(),
            next_epoch: 0,
            halted: false,
        }
    }

    /// The next epoch the monitor expects to process
    pub fn next_epoch(&self) -> u64 {
        self.next_epoch
    }

    /// The monitor's current trusted log view
    pub fn trusted(&self) -> TrustedLogRoot {
        self.trusted
    }

    /// Whether the monitor has reported an inconsistency and stopped
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Process one epoch: verify the head's signatures and log evidence,
    /// replay the epoch's mutations against the locally maintained map, and
    /// return a signed verdict. Restarting a cancelled monitor is safe; its
    /// state advances only when an epoch attests cleanly.
    pub async fn process_epoch(
        &mut self,
        view: &EpochResponse,
        mutations: &[MutationRecord],
    ) -> Result<MonitorVerdict, MonitorError> {
        if self.halted {
            return Err(MonitorError::Halted(self.next_epoch));
        }
        let epoch = view.map_head.epoch;
        if epoch != self.next_epoch {
            return Err(MonitorError::EpochGap {
                expected: self.next_epoch,
                got: epoch,
            });
        }

        // 1. the head must be properly signed and placed in a log that
        // extends what this monitor has already seen
        let mut trusted = self.trusted;
        verify_epoch_response(&self.params, view, &mut trusted)?;

        // 2. replay the full mutation list through the same validation
        // pipeline the sequencer ran, deriving outcomes independently
        let prior_epoch = epoch.saturating_sub(1);
        let mut ordered: Vec<&MutationRecord> = mutations.iter().collect();
        ordered.sort_by_key(|record| record.sequence);

        let mut pending: HashMap<Index, Entry> = HashMap::new();
        for record in ordered {
            let current = match pending.get(&record.index) {
                Some(entry) => Some(entry.clone()),
                None => self
                    .replay_storage
                    .get_entry_lte_epoch(&record.index, prior_epoch)
                    .await?
                    .map(|(_, entry)| entry),
            };
            match mutator::apply(current.as_ref(), &record.update) {
                Ok(new_entry) => {
                    pending.insert(record.index, new_entry);
                }
                Err(reason) => {
                    log::debug!(
                        "Monitor replay rejected mutation {} at epoch {epoch}: {reason}",
                        record.mutation_id
                    );
                }
            }
        }

        // 3. recompute the root and compare to the published one
        let mut leaves: Vec<(Index, Digest)> = pending
            .iter()
            .map(|(index, entry)| (*index, entry.commitment))
            .collect();
        leaves.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
        let (observed_root, node_records) =
            tree::batch_insert(&self.replay_storage, prior_epoch, epoch, &leaves).await?;

        let expected_root = view.map_head.root_hash;
        if observed_root != expected_root {
            self.halted = true;
            log::error!(
                "Monitor found divergence at epoch {epoch}: published {} but replayed {}",
                hex::encode(expected_root),
                hex::encode(observed_root)
            );
            let signature = self
                .signer
                .sign(&inconsistency_preimage(epoch, &expected_root, &observed_root));
            return Ok(MonitorVerdict::Inconsistency {
                epoch,
                expected_root,
                observed_root,
                monitor_key: self.signer.public_key(),
                signature,
            });
        }

        // 4. commit the replayed state and attest
        let mut batch = node_records;
        for (index, entry) in pending {
            batch.push(DbRecord::Entry(EntryRecord {
                index,
                epoch,
                entry,
            }));
        }
        self.replay_storage.write_batch(batch).await?;

        self.trusted = trusted;
        self.next_epoch = epoch + 1;

        let head_hash = view.map_head.head_hash();
        log::info!(
            "Monitor attested epoch {epoch} of directory {}",
            self.params.directory_id
        );
        let signature = self.signer.sign(&attestation_preimage(epoch, &head_hash));
        Ok(MonitorVerdict::Attestation {
            epoch,
            head_hash,
            monitor_key: self.signer.public_key(),
            signature,
        })
    }
}
