// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Storage module for the key transparency directory. The [Database] trait is
//! the named interface behind which all shared state lives; any provider
//! satisfying it is pluggable. [StorageManager] wraps a database with the
//! retry policy for transient backend errors.

use crate::errors::StorageError;
use crate::monitor::MonitorVerdict;
use crate::storage::types::{DbRecord, EpochRecord};

use ktd_core::hash::Digest;
use ktd_core::types::{CommittedValue, Entry, Index, MutationRecord, QueuedMutation, SignedLogRoot, SignedMapHead};

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

pub mod memory;
pub mod types;

/// Updated storage layer with support of asynchronous work and batched
/// atomic writes
#[async_trait]
pub trait Database: Clone + Send + Sync + 'static {
    /// Apply a group of records atomically. Either every record in the batch
    /// becomes visible or none does; this is the sequencer's commit point.
    async fn write_batch(&self, records: Vec<DbRecord>) -> Result<(), StorageError>;

    /// Read a map tree node as of `epoch`: the value written at the largest
    /// epoch less than or equal to `epoch`, or `None` if the node was never
    /// materialized by then
    async fn get_tree_node(
        &self,
        depth: u16,
        prefix: &[u8; 32],
        epoch: u64,
    ) -> Result<Option<Digest>, StorageError>;

    /// Read the latest entry revision for `index` committed at or before
    /// `epoch`, together with the epoch it committed in
    async fn get_entry_lte_epoch(
        &self,
        index: &Index,
        epoch: u64,
    ) -> Result<Option<(u64, Entry)>, StorageError>;

    /// The epochs in which `index` committed a revision, ascending
    async fn get_entry_epochs(&self, index: &Index) -> Result<Vec<u64>, StorageError>;

    /// Read a commitment opening by its commitment
    async fn get_committed(&self, commitment: &Digest)
        -> Result<Option<CommittedValue>, StorageError>;

    /// Read the signed map head for one epoch
    async fn get_map_head(&self, epoch: u64) -> Result<Option<SignedMapHead>, StorageError>;

    /// Read the first `count` signed map heads in epoch order
    async fn get_map_heads(&self, count: u64) -> Result<Vec<SignedMapHead>, StorageError>;

    /// Read the signed log root at one size
    async fn get_log_root(&self, tree_size: u64) -> Result<Option<SignedLogRoot>, StorageError>;

    /// The most recent epoch summary, or `None` before genesis
    async fn latest_epoch(&self) -> Result<Option<EpochRecord>, StorageError>;

    /// Durably enqueue an update for sequencing, returning the
    /// storage-assigned monotone id that fixes its evaluation order
    async fn enqueue_mutation(&self, index: Index, update: Vec<u8>) -> Result<u64, StorageError>;

    /// Read up to `limit` queued mutations with ids greater than `after_id`,
    /// in id order
    async fn queued_after(
        &self,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<QueuedMutation>, StorageError>;

    /// Read the mutation records of one epoch, in sequence order
    async fn mutations_for_epoch(&self, epoch: u64) -> Result<Vec<MutationRecord>, StorageError>;

    /// All persisted monitor verdicts, in insertion order
    async fn list_verdicts(&self) -> Result<Vec<MonitorVerdict>, StorageError>;

    /// Try to take (or renew) the exclusive sequencer lease for a directory.
    /// Returns `true` when `holder` owns the lease after the call. A lease
    /// expires `ttl_ms` after `now_ms` and may then be claimed by another
    /// holder.
    async fn try_acquire_lease(
        &self,
        directory_id: &str,
        holder: &str,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StorageError>;

    /// Release a lease held by `holder`, if any
    async fn release_lease(&self, directory_id: &str, holder: &str) -> Result<(), StorageError>;
}

/// The retry policy for transient storage errors: exponential backoff with
/// base 1 ms, factor 1.5 and cap 1 s, bounded by a per-operation deadline.
/// Verification errors never pass through here.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First backoff delay
    pub base: Duration,
    /// Upper bound on a single delay
    pub cap: Duration,
    /// Total time budget for one logical operation
    pub op_deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1),
            cap: Duration::from_secs(1),
            op_deadline: Duration::from_secs(30),
        }
    }
}

/// Wraps a [Database] with the transient-error retry policy. All server
/// components go through a manager rather than the raw database.
#[derive(Debug, Clone)]
pub struct StorageManager<Db> {
    db: Db,
    retry: RetryPolicy,
}

impl<Db: Database> StorageManager<Db> {
    /// Wrap `db` with the default retry policy
    pub fn new(db: Db) -> Self {
        Self {
            db,
            retry: RetryPolicy::default(),
        }
    }

    /// Wrap `db` with an explicit retry policy
    pub fn with_policy(db: Db, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }

    /// Direct access to the underlying database, bypassing retries
    pub fn db(&self) -> &Db {
        &self.db
    }

    async fn with_retry<T, F, Fut>(&self, f: F) -> Result<T, StorageError>
    where
        F: Fn(Db) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let deadline = Instant::now() + self.retry.op_deadline;
        let mut delay = self.retry.base;
        loop {
            match f(self.db.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if Instant::now() + delay >= deadline {
                        return Err(StorageError::Deadline(format!(
                            "operation deadline elapsed; last error: {err}"
                        )));
                    }
                    log::debug!("transient storage error, backing off {delay:?}: {err}");
                    tokio::time::sleep(delay).await;
                    delay = core::cmp::min(delay.mul_f32(1.5), self.retry.cap);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// See [Database::write_batch]
    pub async fn write_batch(&self, records: Vec<DbRecord>) -> Result<(), StorageError> {
        self.with_retry(|db| {
            let records = records.clone();
            async move { db.write_batch(records).await }
        })
        .await
    }

    /// See [Database::get_tree_node]
    pub async fn get_tree_node(
        &self,
        depth: u16,
        prefix: &[u8; 32],
        epoch: u64,
    ) -> Result<Option<Digest>, StorageError> {
        let prefix = *prefix;
        self.with_retry(|db| async move { db.get_tree_node(depth, &prefix, epoch).await })
            .await
    }

    /// See [Database::get_entry_lte_epoch]
    pub async fn get_entry_lte_epoch(
        &self,
        index: &Index,
        epoch: u64,
    ) -> Result<Option<(u64, Entry)>, StorageError> {
        let index = *index;
        self.with_retry(|db| async move { db.get_entry_lte_epoch(&index, epoch).await })
            .await
    }

    /// See [Database::get_entry_epochs]
    pub async fn get_entry_epochs(&self, index: &Index) -> Result<Vec<u64>, StorageError> {
        let index = *index;
        self.with_retry(|db| async move { db.get_entry_epochs(&index).await })
            .await
    }

    /// See [Database::get_committed]
    pub async fn get_committed(
        &self,
        commitment: &Digest,
    ) -> Result<Option<CommittedValue>, StorageError> {
        let commitment = *commitment;
        self.with_retry(|db| async move { db.get_committed(&commitment).await })
            .await
    }

    /// See [Database::get_map_head]
    pub async fn get_map_head(&self, epoch: u64) -> Result<Option<SignedMapHead>, StorageError> {
        self.with_retry(|db| async move { db.get_map_head(epoch).await })
            .await
    }

    /// See [Database::get_map_heads]
    pub async fn get_map_heads(&self, count: u64) -> Result<Vec<SignedMapHead>, StorageError> {
        self.with_retry(|db| async move { db.get_map_heads(count).await })
            .await
    }

    /// See [Database::get_log_root]
    pub async fn get_log_root(
        &self,
        tree_size: u64,
    ) -> Result<Option<SignedLogRoot>, StorageError> {
        self.with_retry(|db| async move { db.get_log_root(tree_size).await })
            .await
    }

    /// See [Database::latest_epoch]
    pub async fn latest_epoch(&self) -> Result<Option<EpochRecord>, StorageError> {
        self.with_retry(|db| async move { db.latest_epoch().await })
            .await
    }

    /// See [Database::enqueue_mutation]
    pub async fn enqueue_mutation(
        &self,
        index: Index,
        update: Vec<u8>,
    ) -> Result<u64, StorageError> {
        self.with_retry(|db| {
            let update = update.clone();
            async move { db.enqueue_mutation(index, update).await }
        })
        .await
    }

    /// See [Database::queued_after]
    pub async fn queued_after(
        &self,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<QueuedMutation>, StorageError> {
        self.with_retry(|db| async move { db.queued_after(after_id, limit).await })
            .await
    }

    /// See [Database::mutations_for_epoch]
    pub async fn mutations_for_epoch(
        &self,
        epoch: u64,
    ) -> Result<Vec<MutationRecord>, StorageError> {
        self.with_retry(|db| async move { db.mutations_for_epoch(epoch).await })
            .await
    }

    /// See [Database::list_verdicts]
    pub async fn list_verdicts(&self) -> Result<Vec<MonitorVerdict>, StorageError> {
        self.with_retry(|db| async move { db.list_verdicts().await })
            .await
    }

    /// See [Database::try_acquire_lease]
    pub async fn try_acquire_lease(
        &self,
        directory_id: &str,
        holder: &str,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StorageError> {
        self.with_retry(|db| {
            let directory_id = directory_id.to_string();
            let holder = holder.to_string();
            async move {
                db.try_acquire_lease(&directory_id, &holder, ttl_ms, now_ms)
                    .await
            }
        })
        .await
    }

    /// See [Database::release_lease]
    pub async fn release_lease(
        &self,
        directory_id: &str,
        holder: &str,
    ) -> Result<(), StorageError> {
        self.with_retry(|db| {
            let directory_id = directory_id.to_string();
            let holder = holder.to_string();
            async move { db.release_lease(&directory_id, &holder).await }
        })
        .await
    }
}
