// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The sequencer: the single writer that advances a directory epoch by
//! epoch. Each tick drains the accepted mutation queue in id order, validates
//! every mutation against the evolving entry state, rebuilds the touched tree
//! paths, signs the new map head, appends it to the head log and persists the
//! whole epoch in one atomic batch.
//!
//! Crash idempotence comes from the batch: the epoch summary record commits
//! together with everything else, so a restart either sees the fully
//! published epoch (and does not re-run it) or sees nothing of it. A second
//! sequencer on the same directory is a safety violation, prevented by a
//! storage-level exclusive lease keyed on the directory id.

use crate::errors::SequencerError;
use crate::headlog;
use crate::mutator;
use crate::signer::Signer;
use crate::storage::types::{CommittedRecord, DbRecord, EntryRecord, EpochRecord};
use crate::storage::{Database, StorageManager};
use crate::tree;

use ktd_core::hash::{Digest, NIL_ENTRY_HASH};
use ktd_core::types::{
    DirectoryParams, Entry, EntryUpdate, EpochHash, Index, MutationOutcome, MutationRecord,
    SignedLogRoot, SignedMapHead,
};

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::time::Instant;

/// Upper bound on mutations drained into one epoch; the remainder waits for
/// the next tick
pub const MAX_BATCH_SIZE: usize = 1024;

/// The epoch driver for one directory
pub struct Sequencer<Db, S> {
    storage: StorageManager<Db>,
    params: DirectoryParams,
    map_signer: S,
    log_signer: S,
    holder: String,
    epoch_tx: watch::Sender<u64>,
}

impl<Db: Database, S: Signer> Sequencer<Db, S> {
    /// Construct a sequencer. The signers' public keys must match the
    /// directory metadata, otherwise every published head would fail client
    /// verification.
    pub fn new(
        storage: StorageManager<Db>,
        params: DirectoryParams,
        map_signer: S,
        log_signer: S,
        holder: impl Into<String>,
    ) -> Result<Self, SequencerError> {
        if map_signer.public_key() != params.map_public_key {
            return Err(SequencerError::KeyMismatch(
                "map signer key does not match directory metadata".to_string(),
            ));
        }
        if log_signer.public_key() != params.log_public_key {
            return Err(SequencerError::KeyMismatch(
                "log signer key does not match directory metadata".to_string(),
            ));
        }
        let (epoch_tx, _) = watch::channel(0);
        Ok(Self {
            storage,
            params,
            map_signer,
            log_signer,
            holder: holder.into(),
            epoch_tx,
        })
    }

    /// A stream of published epoch numbers; the in-process backing of the
    /// epoch feed endpoint
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.epoch_tx.subscribe()
    }

    fn now_ns() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64
    }

    fn now_ms() -> u64 {
        Self::now_ns() / 1_000_000
    }

    async fn acquire_lease(&self) -> Result<(), SequencerError> {
        // the lease outlives two silent max intervals so a stalled holder
        // expires rather than wedging the directory
        let ttl_ms = self.params.max_interval_ms.saturating_mul(2).max(10_000);
        let acquired = self
            .storage
            .try_acquire_lease(
                &self.params.directory_id,
                &self.holder,
                ttl_ms,
                Self::now_ms(),
            )
            .await?;
        if acquired {
            Ok(())
        } else {
            Err(SequencerError::LeaseHeld(self.params.directory_id.clone()))
        }
    }

    fn sign_head(&self, epoch: u64, root: Digest, now_ns: u64) -> SignedMapHead {
        let metadata_hash = self.params.metadata_hash();
        let preimage = SignedMapHead::signing_preimage(
            &self.params.directory_id,
            epoch,
            &root,
            now_ns,
            &metadata_hash,
        );
        SignedMapHead {
            directory_id: self.params.directory_id.clone(),
            epoch,
            root_hash: root,
            timestamp_ns: now_ns,
            metadata_hash,
            signature: self.map_signer.sign(&preimage),
        }
    }

    fn sign_log_root(&self, tree_size: u64, root_hash: Digest) -> SignedLogRoot {
        let preimage = SignedLogRoot::signing_preimage(tree_size, &root_hash);
        SignedLogRoot {
            tree_size,
            root_hash,
            signature: self.log_signer.sign(&preimage),
        }
    }

    /// Publish epoch 0 over the empty map if the directory has no epochs
    /// yet. Idempotent: an already-initialized directory returns its current
    /// epoch unchanged.
    pub async fn initialize(&self, now_ns: u64) -> Result<EpochHash, SequencerError> {
        if let Some(latest) = self.storage.latest_epoch().await? {
            return Ok(EpochHash(latest.epoch, latest.root_hash));
        }

        let root = tree::root_at(&self.storage, 0).await?;
        let head = self.sign_head(0, root, now_ns);
        let head_record = headlog::append_record(&self.storage, head.clone()).await?;
        let (log_size, log_root) = headlog::root_with_pending(&self.storage, &head).await?;

        self.storage
            .write_batch(vec![
                head_record,
                DbRecord::LogRoot(self.sign_log_root(log_size, log_root)),
                DbRecord::Epoch(EpochRecord {
                    epoch: 0,
                    last_mutation_id: 0,
                    root_hash: root,
                    log_size,
                    timestamp_ns: now_ns,
                }),
            ])
            .await?;

        log::info!(
            "Directory {} initialized at epoch 0, root {}",
            self.params.directory_id,
            hex::encode(root)
        );
        Ok(EpochHash(0, root))
    }

    /// Run one epoch: drain, validate, rebuild, sign, append, persist.
    /// Always publishes a head, even when the queue was empty; empty epochs
    /// are the liveness evidence monitors watch for.
    pub async fn tick_once(&self, now_ns: u64) -> Result<EpochHash, SequencerError> {
        let latest = self
            .storage
            .latest_epoch()
            .await?
            .ok_or(SequencerError::Uninitialized)?;
        let prior_epoch = latest.epoch;
        let next_epoch = prior_epoch + 1;

        // 1. snapshot the queue in acceptance order
        let queued = self
            .storage
            .queued_after(latest.last_mutation_id, MAX_BATCH_SIZE)
            .await?;

        // 2. validate each mutation against the evolving state; within the
        // epoch, later mutations for an index chain onto earlier accepted
        // ones through the pending overlay, and only the last accepted one
        // reaches the tree
        let mut pending: HashMap<Index, Entry> = HashMap::new();
        let mut mutation_records: Vec<MutationRecord> = Vec::with_capacity(queued.len());
        let mut committed_records: Vec<DbRecord> = Vec::new();
        let mut last_mutation_id = latest.last_mutation_id;

        for (sequence, queued_mutation) in queued.iter().enumerate() {
            last_mutation_id = queued_mutation.id;
            let current = match pending.get(&queued_mutation.index) {
                Some(entry) => Some(entry.clone()),
                None => self
                    .storage
                    .get_entry_lte_epoch(&queued_mutation.index, prior_epoch)
                    .await?
                    .map(|(_, entry)| entry),
            };
            let old_entry_hash = current.as_ref().map(Entry::hash).unwrap_or(NIL_ENTRY_HASH);

            match mutator::apply(current.as_ref(), &queued_mutation.update) {
                Ok(new_entry) => {
                    // apply() proved the bytes decode; keep the opening so
                    // lookups can return the payload
                    if let Ok(update) = EntryUpdate::from_wire(&queued_mutation.update) {
                        committed_records.push(DbRecord::Committed(CommittedRecord {
                            commitment: new_entry.commitment,
                            value: update.committed,
                        }));
                    }
                    mutation_records.push(MutationRecord {
                        epoch: next_epoch,
                        sequence: sequence as u64,
                        mutation_id: queued_mutation.id,
                        index: queued_mutation.index,
                        old_entry_hash,
                        new_entry_hash: new_entry.hash(),
                        update: queued_mutation.update.clone(),
                        outcome: MutationOutcome::Applied,
                    });
                    pending.insert(queued_mutation.index, new_entry);
                }
                Err(reason) => {
                    log::warn!(
                        "Mutation {} for index {} rejected: {reason}",
                        queued_mutation.id,
                        queued_mutation.index
                    );
                    mutation_records.push(MutationRecord {
                        epoch: next_epoch,
                        sequence: sequence as u64,
                        mutation_id: queued_mutation.id,
                        index: queued_mutation.index,
                        old_entry_hash,
                        new_entry_hash: NIL_ENTRY_HASH,
                        update: queued_mutation.update.clone(),
                        outcome: MutationOutcome::Rejected(reason),
                    });
                }
            }
        }

        // 3. rebuild the touched tree paths
        let mut leaves: Vec<(Index, Digest)> = pending
            .iter()
            .map(|(index, entry)| (*index, entry.commitment))
            .collect();
        leaves.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
        let (root, node_records) =
            tree::batch_insert(&self.storage, prior_epoch, next_epoch, &leaves).await?;

        // 4-5. sign the head, extend the log, sign the log root
        let head = self.sign_head(next_epoch, root, now_ns);
        let head_record = headlog::append_record(&self.storage, head.clone()).await?;
        let (log_size, log_root) = headlog::root_with_pending(&self.storage, &head).await?;
        let signed_log_root = self.sign_log_root(log_size, log_root);

        // 6. persist everything atomically; nothing above was externally
        // visible until this batch lands
        let mut batch = node_records;
        let mut entry_records: Vec<(Index, Entry)> = pending.into_iter().collect();
        entry_records.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
        for (index, entry) in entry_records {
            batch.push(DbRecord::Entry(EntryRecord {
                index,
                epoch: next_epoch,
                entry,
            }));
        }
        batch.extend(committed_records);
        let applied = mutation_records
            .iter()
            .filter(|r| r.outcome == MutationOutcome::Applied)
            .count();
        let rejected = mutation_records.len() - applied;
        batch.extend(mutation_records.into_iter().map(DbRecord::Mutation));
        batch.push(head_record);
        batch.push(DbRecord::LogRoot(signed_log_root));
        batch.push(DbRecord::Epoch(EpochRecord {
            epoch: next_epoch,
            last_mutation_id,
            root_hash: root,
            log_size,
            timestamp_ns: now_ns,
        }));
        self.storage.write_batch(batch).await?;

        let _ = self.epoch_tx.send(next_epoch);
        log::info!(
            "Directory {} published epoch {next_epoch} ({applied} applied, {rejected} rejected), root {}",
            self.params.directory_id,
            hex::encode(root)
        );
        Ok(EpochHash(next_epoch, root))
    }

    /// The tick loop. Fires an epoch when mutations are pending and
    /// `min_interval` has elapsed, or unconditionally when `max_interval`
    /// has elapsed. Holds the exclusive lease for the life of the loop and
    /// stops cleanly when `cancel` flips to true; a cancelled loop never
    /// leaves a partially persisted epoch behind because the tick itself is
    /// atomic.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> Result<(), SequencerError> {
        let min_interval = Duration::from_millis(self.params.min_interval_ms);
        let max_interval = Duration::from_millis(self.params.max_interval_ms);

        self.acquire_lease().await?;
        self.initialize(Self::now_ns()).await?;
        let mut last_tick = Instant::now();

        loop {
            if *cancel.borrow() {
                let _ = self
                    .storage
                    .release_lease(&self.params.directory_id, &self.holder)
                    .await;
                return Ok(());
            }

            let latest = self
                .storage
                .latest_epoch()
                .await?
                .ok_or(SequencerError::Uninitialized)?;
            let has_pending = !self
                .storage
                .queued_after(latest.last_mutation_id, 1)
                .await?
                .is_empty();

            let elapsed = last_tick.elapsed();
            if (has_pending && elapsed >= min_interval) || elapsed >= max_interval {
                self.acquire_lease().await?;
                self.tick_once(Self::now_ns()).await?;
                last_tick = Instant::now();
                continue;
            }

            let wait = if has_pending {
                min_interval.saturating_sub(elapsed)
            } else {
                max_interval.saturating_sub(elapsed)
            }
            .max(Duration::from_millis(10));

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = cancel.changed() => {
                    // a dropped sender counts as cancellation
                    if changed.is_err() {
                        let _ = self
                            .storage
                            .release_lease(&self.params.directory_id, &self.holder)
                            .await;
                        return Ok(());
                    }
                }
            }
        }
    }
}
