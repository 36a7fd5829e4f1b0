// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The read and intake surface of one directory: entry lookups with full
//! proof bundles, entry history, epoch queries, mutation listings and the
//! durable update queue. Everything here is read-only against storage except
//! [Directory::queue_update], which appends to the intake queue; the
//! sequencer is the only writer of epochs.

use crate::errors::DirectoryError;
use crate::headlog;
use crate::storage::types::EpochRecord;
use crate::storage::{Database, StorageManager};
use crate::tree;

use ktd_core::commitment;
use ktd_core::ecvrf::VrfKeyStorage;
use ktd_core::types::{
    AppId, DirectoryParams, EntryResponse, EntryUpdate, EpochResponse, MutationRecord, UserId,
};

/// A page of mutation records plus the cursor of the next page, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationPage {
    /// Records in sequence order
    pub mutations: Vec<MutationRecord>,
    /// Sequence number to pass as the next page's start, when more exist
    pub next_page: Option<u64>,
}

/// The representation of one key transparency directory
pub struct Directory<Db, V> {
    storage: StorageManager<Db>,
    vrf: V,
    params: DirectoryParams,
}

impl<Db: Database, V: VrfKeyStorage> Clone for Directory<Db, V> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            vrf: self.vrf.clone(),
            params: self.params.clone(),
        }
    }
}

impl<Db: Database, V: VrfKeyStorage> Directory<Db, V> {
    /// Create a directory handle over existing storage. The VRF key must be
    /// the one whose public half is in the directory metadata, otherwise
    /// every issued proof would fail client verification.
    pub async fn new(
        storage: StorageManager<Db>,
        vrf: V,
        params: DirectoryParams,
    ) -> Result<Self, DirectoryError> {
        let vrf_pk = vrf.get_vrf_public_key().await?;
        if *vrf_pk.as_bytes() != params.vrf_public_key {
            return Err(DirectoryError::InvalidArgument(
                "VRF key does not match directory metadata".to_string(),
            ));
        }
        Ok(Self {
            storage,
            vrf,
            params,
        })
    }

    /// The directory's immutable metadata and public keys
    pub fn params(&self) -> &DirectoryParams {
        &self.params
    }

    async fn latest(&self) -> Result<EpochRecord, DirectoryError> {
        self.storage
            .latest_epoch()
            .await?
            .ok_or_else(|| DirectoryError::NotFound("directory has no epochs yet".to_string()))
    }

    /// Admit an update into the durable queue, returning its storage-assigned
    /// mutation id. Admission screens what can be checked without the current
    /// entry: canonical shape, the size bound and the commitment opening.
    /// Chain, authorization and replay rules run at sequencing time, and a
    /// mutation they reject is persisted with its reason rather than dropped.
    pub async fn queue_update(
        &self,
        app_id: &AppId,
        user_id: &UserId,
        update: &EntryUpdate,
    ) -> Result<u64, DirectoryError> {
        let encoded = update.new_entry.to_wire();
        if encoded.len() > ktd_core::MAX_ENTRY_BYTES {
            return Err(DirectoryError::Rejected(
                ktd_core::types::Rejection::TooLarge(encoded.len()),
            ));
        }
        commitment::verify(
            &update.committed.nonce,
            app_id,
            &update.committed.data,
            &update.new_entry.commitment,
        )?;

        let (index, _) = self.vrf.index_and_proof(app_id, user_id).await?;
        // the sequencer and monitors re-decode these bytes; queue them only
        // if they round-trip canonically
        let blob = update.to_wire();
        if let Err(err) = EntryUpdate::from_wire(&blob) {
            return Err(DirectoryError::Rejected(
                ktd_core::types::Rejection::Malformed(err.to_string()),
            ));
        }
        let id = self.storage.enqueue_mutation(index, blob).await?;
        log::info!(
            "Directory {} queued mutation {id} for index {index}",
            self.params.directory_id
        );
        Ok(id)
    }

    /// The full proof bundle for `(app_id, user_id)` at the latest epoch.
    /// `trusted_size` is the log size of the caller's last verified view (0
    /// for a first contact); the bundled consistency proof extends exactly
    /// that view.
    pub async fn get_entry(
        &self,
        app_id: &AppId,
        user_id: &UserId,
        trusted_size: u64,
    ) -> Result<EntryResponse, DirectoryError> {
        let latest = self.latest().await?;
        self.entry_response_at(app_id, user_id, latest.epoch, trusted_size)
            .await
    }

    /// The proof bundle for `(app_id, user_id)` as of a specific epoch,
    /// proven inside the latest published log view
    pub async fn entry_response_at(
        &self,
        app_id: &AppId,
        user_id: &UserId,
        epoch: u64,
        trusted_size: u64,
    ) -> Result<EntryResponse, DirectoryError> {
        let latest = self.latest().await?;
        if epoch > latest.epoch {
            return Err(DirectoryError::NotFound(format!(
                "epoch {epoch} has not been published; latest is {}",
                latest.epoch
            )));
        }

        let (index, vrf_proof) = self.vrf.index_and_proof(app_id, user_id).await?;
        let entry = self
            .storage
            .get_entry_lte_epoch(&index, epoch)
            .await?
            .map(|(_, entry)| entry);
        let committed = match &entry {
            Some(entry) => {
                let opening = self
                    .storage
                    .get_committed(&entry.commitment)
                    .await?
                    .ok_or_else(|| {
                        DirectoryError::NotFound(format!(
                            "no opening stored for commitment {}",
                            hex::encode(entry.commitment)
                        ))
                    })?;
                Some(opening)
            }
            None => None,
        };

        let tree_proof = tree::inclusion_proof(&self.storage, epoch, &index).await?;
        let epoch_bundle = self.epoch_response(epoch, trusted_size).await?;

        Ok(EntryResponse {
            vrf_proof,
            entry,
            committed,
            tree_proof,
            map_head: epoch_bundle.map_head,
            log_inclusion: epoch_bundle.log_inclusion,
            log_consistency: epoch_bundle.log_consistency,
            signed_log_root: epoch_bundle.signed_log_root,
        })
    }

    /// One proof bundle per epoch in `[first_epoch, last_epoch]` in which the
    /// identifier committed a revision; the entry's audit trail
    pub async fn entry_history(
        &self,
        app_id: &AppId,
        user_id: &UserId,
        first_epoch: u64,
        last_epoch: u64,
        trusted_size: u64,
    ) -> Result<Vec<EntryResponse>, DirectoryError> {
        if first_epoch > last_epoch {
            return Err(DirectoryError::InvalidArgument(format!(
                "bad epoch range {first_epoch}..{last_epoch}"
            )));
        }
        let (index, _) = self.vrf.index_and_proof(app_id, user_id).await?;
        let epochs = self.storage.get_entry_epochs(&index).await?;

        let mut responses = Vec::new();
        for epoch in epochs
            .into_iter()
            .filter(|e| (first_epoch..=last_epoch).contains(e))
        {
            responses.push(
                self.entry_response_at(app_id, user_id, epoch, trusted_size)
                    .await?,
            );
        }
        Ok(responses)
    }

    /// The signed map head for `epoch` with its log inclusion proof, a
    /// consistency proof from the caller's trusted view, and the latest
    /// signed log root
    pub async fn epoch_response(
        &self,
        epoch: u64,
        trusted_size: u64,
    ) -> Result<EpochResponse, DirectoryError> {
        let latest = self.latest().await?;
        let map_head = self
            .storage
            .get_map_head(epoch)
            .await?
            .ok_or_else(|| DirectoryError::NotFound(format!("no head for epoch {epoch}")))?;

        let signed_log_root = self
            .storage
            .get_log_root(latest.log_size)
            .await?
            .ok_or_else(|| {
                DirectoryError::NotFound(format!("no signed root at size {}", latest.log_size))
            })?;
        let log_inclusion =
            headlog::inclusion_proof(&self.storage, epoch, latest.log_size).await?;
        let log_consistency =
            headlog::consistency_proof(&self.storage, trusted_size, latest.log_size).await?;

        Ok(EpochResponse {
            map_head,
            log_inclusion,
            log_consistency,
            signed_log_root,
        })
    }

    /// The latest epoch's proof bundle
    pub async fn latest_epoch_response(
        &self,
        trusted_size: u64,
    ) -> Result<EpochResponse, DirectoryError> {
        let latest = self.latest().await?;
        self.epoch_response(latest.epoch, trusted_size).await
    }

    /// A page of the mutation records sequenced into `epoch`, starting at
    /// sequence `page_start`
    pub async fn list_mutations(
        &self,
        epoch: u64,
        page_start: u64,
        page_size: usize,
    ) -> Result<MutationPage, DirectoryError> {
        let latest = self.latest().await?;
        if epoch > latest.epoch {
            return Err(DirectoryError::NotFound(format!(
                "epoch {epoch} has not been published"
            )));
        }
        let all = self.storage.mutations_for_epoch(epoch).await?;
        let mutations: Vec<MutationRecord> = all
            .into_iter()
            .filter(|record| record.sequence >= page_start)
            .take(page_size)
            .collect();
        let next_page = match mutations.last() {
            Some(last) if mutations.len() == page_size => Some(last.sequence + 1),
            _ => None,
        };
        Ok(MutationPage {
            mutations,
            next_page,
        })
    }
}
