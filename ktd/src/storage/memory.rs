// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An in-memory database for the directory. The reference implementation for
//! tests, monitors (which keep their replay state in one) and small
//! deployments; production storage implements the same [Database] trait over
//! a durable backend.

use crate::errors::StorageError;
use crate::monitor::MonitorVerdict;
use crate::storage::types::{DbRecord, EpochRecord};
use crate::storage::Database;

use ktd_core::hash::Digest;
use ktd_core::types::{
    CommittedValue, Entry, Index, MutationRecord, QueuedMutation, SignedLogRoot, SignedMapHead,
};

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

type NodeVersions = BTreeMap<u64, Digest>;
type EntryVersions = BTreeMap<u64, Entry>;

#[derive(Debug, Default)]
struct Lease {
    holder: String,
    expires_ms: u64,
}

#[derive(Debug, Default)]
struct Inner {
    // guards write_batch so an epoch's records land together
    commit_lock: Mutex<()>,
    tree: DashMap<(u16, [u8; 32]), NodeVersions>,
    entries: DashMap<Index, EntryVersions>,
    committed: DashMap<Digest, CommittedValue>,
    heads: RwLock<Vec<SignedMapHead>>,
    log_roots: DashMap<u64, SignedLogRoot>,
    epochs: RwLock<Vec<EpochRecord>>,
    queue: Mutex<Vec<QueuedMutation>>,
    next_queue_id: AtomicU64,
    mutations: DashMap<u64, Vec<MutationRecord>>,
    verdicts: Mutex<Vec<MonitorVerdict>>,
    leases: Mutex<HashMap<String, Lease>>,
}

/// This struct represents a basic in-memory database
#[derive(Debug, Default, Clone)]
pub struct InMemoryDb {
    inner: Arc<Inner>,
}

impl InMemoryDb {
    /// Creates a new in-memory db
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&self, record: DbRecord) -> Result<(), StorageError> {
        match record {
            DbRecord::TreeNode(node) => {
                self.inner
                    .tree
                    .entry((node.depth, node.prefix))
                    .or_default()
                    .insert(node.epoch, node.hash);
            }
            DbRecord::Entry(entry) => {
                self.inner
                    .entries
                    .entry(entry.index)
                    .or_default()
                    .insert(entry.epoch, entry.entry);
            }
            DbRecord::Committed(record) => {
                self.inner.committed.insert(record.commitment, record.value);
            }
            DbRecord::MapHead(head) => {
                let mut heads = self
                    .inner
                    .heads
                    .write()
                    .map_err(|_| StorageError::Unavailable("heads lock poisoned".to_string()))?;
                let size = heads.len() as u64;
                match head.epoch {
                    epoch if epoch == size => heads.push(head),
                    epoch if epoch < size => {
                        // idempotent re-application of a committed batch
                        if heads[epoch as usize] != head {
                            return Err(StorageError::Conflict(format!(
                                "head {epoch} already exists with different content"
                            )));
                        }
                    }
                    epoch => {
                        return Err(StorageError::Transaction(format!(
                            "head {epoch} would leave a gap in a log of size {size}"
                        )))
                    }
                }
            }
            DbRecord::LogRoot(root) => {
                self.inner.log_roots.insert(root.tree_size, root);
            }
            DbRecord::Mutation(record) => {
                self.inner
                    .mutations
                    .entry(record.epoch)
                    .or_default()
                    .push(record);
            }
            DbRecord::Epoch(record) => {
                let mut epochs = self
                    .inner
                    .epochs
                    .write()
                    .map_err(|_| StorageError::Unavailable("epochs lock poisoned".to_string()))?;
                let expected = epochs.last().map(|r| r.epoch + 1).unwrap_or(0);
                match record.epoch {
                    epoch if epoch == expected => epochs.push(record),
                    epoch if epoch < expected => {
                        if epochs[epoch as usize] != record {
                            return Err(StorageError::Conflict(format!(
                                "epoch {epoch} already committed with different content"
                            )));
                        }
                    }
                    epoch => {
                        return Err(StorageError::Transaction(format!(
                            "epoch {epoch} would leave a gap after {expected}"
                        )))
                    }
                }
            }
            DbRecord::Verdict(verdict) => {
                self.inner
                    .verdicts
                    .lock()
                    .map_err(|_| StorageError::Unavailable("verdict lock poisoned".to_string()))?
                    .push(verdict);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Database for InMemoryDb {
    async fn write_batch(&self, records: Vec<DbRecord>) -> Result<(), StorageError> {
        let _guard = self
            .inner
            .commit_lock
            .lock()
            .map_err(|_| StorageError::Unavailable("commit lock poisoned".to_string()))?;
        for record in records {
            self.apply(record)?;
        }
        Ok(())
    }

    async fn get_tree_node(
        &self,
        depth: u16,
        prefix: &[u8; 32],
        epoch: u64,
    ) -> Result<Option<Digest>, StorageError> {
        Ok(self
            .inner
            .tree
            .get(&(depth, *prefix))
            .and_then(|versions| versions.range(..=epoch).next_back().map(|(_, hash)| *hash)))
    }

    async fn get_entry_lte_epoch(
        &self,
        index: &Index,
        epoch: u64,
    ) -> Result<Option<(u64, Entry)>, StorageError> {
        Ok(self.inner.entries.get(index).and_then(|versions| {
            versions
                .range(..=epoch)
                .next_back()
                .map(|(epoch, entry)| (*epoch, entry.clone()))
        }))
    }

    async fn get_entry_epochs(&self, index: &Index) -> Result<Vec<u64>, StorageError> {
        Ok(self
            .inner
            .entries
            .get(index)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn get_committed(
        &self,
        commitment: &Digest,
    ) -> Result<Option<CommittedValue>, StorageError> {
        Ok(self.inner.committed.get(commitment).map(|v| v.clone()))
    }

    async fn get_map_head(&self, epoch: u64) -> Result<Option<SignedMapHead>, StorageError> {
        let heads = self
            .inner
            .heads
            .read()
            .map_err(|_| StorageError::Unavailable("heads lock poisoned".to_string()))?;
        Ok(heads.get(epoch as usize).cloned())
    }

    async fn get_map_heads(&self, count: u64) -> Result<Vec<SignedMapHead>, StorageError> {
        let heads = self
            .inner
            .heads
            .read()
            .map_err(|_| StorageError::Unavailable("heads lock poisoned".to_string()))?;
        if count as usize > heads.len() {
            return Err(StorageError::NotFound(format!(
                "only {} heads exist, {count} requested",
                heads.len()
            )));
        }
        Ok(heads[..count as usize].to_vec())
    }

    async fn get_log_root(&self, tree_size: u64) -> Result<Option<SignedLogRoot>, StorageError> {
        Ok(self.inner.log_roots.get(&tree_size).map(|r| r.clone()))
    }

    async fn latest_epoch(&self) -> Result<Option<EpochRecord>, StorageError> {
        let epochs = self
            .inner
            .epochs
            .read()
            .map_err(|_| StorageError::Unavailable("epochs lock poisoned".to_string()))?;
        Ok(epochs.last().cloned())
    }

    async fn enqueue_mutation(&self, index: Index, update: Vec<u8>) -> Result<u64, StorageError> {
        let id = self.inner.next_queue_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut queue = self
            .inner
            .queue
            .lock()
            .map_err(|_| StorageError::Unavailable("queue lock poisoned".to_string()))?;
        queue.push(QueuedMutation { id, index, update });
        Ok(id)
    }

    async fn queued_after(
        &self,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<QueuedMutation>, StorageError> {
        let queue = self
            .inner
            .queue
            .lock()
            .map_err(|_| StorageError::Unavailable("queue lock poisoned".to_string()))?;
        let mut out: Vec<QueuedMutation> = queue
            .iter()
            .filter(|m| m.id > after_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.id);
        out.truncate(limit);
        Ok(out)
    }

    async fn mutations_for_epoch(&self, epoch: u64) -> Result<Vec<MutationRecord>, StorageError> {
        let mut out = self
            .inner
            .mutations
            .get(&epoch)
            .map(|records| records.clone())
            .unwrap_or_default();
        out.sort_by_key(|r| r.sequence);
        Ok(out)
    }

    async fn list_verdicts(&self) -> Result<Vec<MonitorVerdict>, StorageError> {
        Ok(self
            .inner
            .verdicts
            .lock()
            .map_err(|_| StorageError::Unavailable("verdict lock poisoned".to_string()))?
            .clone())
    }

    async fn try_acquire_lease(
        &self,
        directory_id: &str,
        holder: &str,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StorageError> {
        let mut leases = self
            .inner
            .leases
            .lock()
            .map_err(|_| StorageError::Unavailable("lease lock poisoned".to_string()))?;
        match leases.get_mut(directory_id) {
            Some(lease) if lease.holder != holder && lease.expires_ms > now_ms => Ok(false),
            Some(lease) => {
                lease.holder = holder.to_string();
                lease.expires_ms = now_ms + ttl_ms;
                Ok(true)
            }
            None => {
                leases.insert(
                    directory_id.to_string(),
                    Lease {
                        holder: holder.to_string(),
                        expires_ms: now_ms + ttl_ms,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, directory_id: &str, holder: &str) -> Result<(), StorageError> {
        let mut leases = self
            .inner
            .leases
            .lock()
            .map_err(|_| StorageError::Unavailable("lease lock poisoned".to_string()))?;
        if let Some(lease) = leases.get(directory_id) {
            if lease.holder == holder {
                leases.remove(directory_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::TreeNodeRecord;
    use ktd_core::hash::hash;

    #[tokio::test]
    async fn tree_nodes_version_by_epoch() {
        let db = InMemoryDb::new();
        let prefix = [1u8; 32];
        db.write_batch(vec![
            DbRecord::TreeNode(TreeNodeRecord {
                depth: 4,
                prefix,
                epoch: 1,
                hash: hash(b"v1"),
            }),
            DbRecord::TreeNode(TreeNodeRecord {
                depth: 4,
                prefix,
                epoch: 3,
                hash: hash(b"v3"),
            }),
        ])
        .await
        .unwrap();

        assert_eq!(db.get_tree_node(4, &prefix, 0).await.unwrap(), None);
        assert_eq!(
            db.get_tree_node(4, &prefix, 1).await.unwrap(),
            Some(hash(b"v1"))
        );
        // epoch 2 sees the epoch-1 value; unchanged subtrees share structure
        assert_eq!(
            db.get_tree_node(4, &prefix, 2).await.unwrap(),
            Some(hash(b"v1"))
        );
        assert_eq!(
            db.get_tree_node(4, &prefix, 7).await.unwrap(),
            Some(hash(b"v3"))
        );
    }

    #[tokio::test]
    async fn queue_ids_are_monotone_and_drained_in_order() {
        let db = InMemoryDb::new();
        let index = Index::from([2u8; 32]);
        let a = db.enqueue_mutation(index, vec![1]).await.unwrap();
        let b = db.enqueue_mutation(index, vec![2]).await.unwrap();
        assert!(b > a);

        let drained = db.queued_after(0, 10).await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id, a);
        assert_eq!(drained[1].id, b);

        let rest = db.queued_after(a, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, b);
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_expiry() {
        let db = InMemoryDb::new();
        assert!(db.try_acquire_lease("dir", "a", 100, 0).await.unwrap());
        assert!(!db.try_acquire_lease("dir", "b", 100, 50).await.unwrap());
        // holder a can renew
        assert!(db.try_acquire_lease("dir", "a", 100, 50).await.unwrap());
        // expired lease can be claimed
        assert!(db.try_acquire_lease("dir", "b", 100, 200).await.unwrap());
        // and released
        db.release_lease("dir", "b").await.unwrap();
        assert!(db.try_acquire_lease("dir", "c", 100, 201).await.unwrap());
    }
}
