// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! End-to-end verification of a `GetEntry` response. A relying party treats
//! a successful return from [verify_entry_response] as the only signal that
//! the answer is authentic; any failure leaves the caller's trusted log view
//! untouched.

use super::epoch::verify_map_head_in_log;
use super::tree::{is_empty_leaf, verify_tree_proof};
use super::VerificationError;
use crate::commitment;
use crate::ecvrf::VrfPublicKey;
use crate::hash::leaf_hash;
use crate::types::{
    vrf_input, AppId, DirectoryParams, Entry, EntryResponse, TrustedLogRoot, UserId,
};
use crate::TREE_DEPTH;

use core::convert::TryFrom;

/// The payload a verified response vouches for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifiedEntry {
    /// The identifier has a committed entry at the response's epoch
    Present {
        /// Epoch of the map head the proof is rooted in
        epoch: u64,
        /// The committed entry
        entry: Entry,
        /// The opened payload bytes
        data: Vec<u8>,
    },
    /// The identifier has no entry at the response's epoch
    Absent {
        /// Epoch of the map head the proof is rooted in
        epoch: u64,
    },
}

/// Verify every layer of `response` for `(app_id, user_id)` against the
/// directory's public keys, then extend `trusted` to the response's log view.
///
/// The checks run in dependency order: VRF index, map tree proof, commitment
/// opening, map head signature, log inclusion under a signed log root, and
/// finally consistency with the caller's previous trusted root. `trusted` is
/// updated only when everything passed.
pub fn verify_entry_response(
    params: &DirectoryParams,
    app_id: &AppId,
    user_id: &UserId,
    response: &EntryResponse,
    trusted: &mut TrustedLogRoot,
) -> Result<VerifiedEntry, VerificationError> {
    // 1. the VRF proof fixes the tree coordinate for this identifier
    let vrf_pk = VrfPublicKey::try_from(&params.vrf_public_key[..])?;
    let index = vrf_pk.verify_bytes(&response.vrf_proof, &vrf_input(app_id, user_id))?;

    // 2. the tree proof places the leaf (or its absence) under the head root
    let head = &response.map_head;
    verify_tree_proof(&head.root_hash, &index, &response.tree_proof)?;

    let verified = if is_empty_leaf(&response.tree_proof.leaf_hash) {
        if response.entry.is_some() || response.committed.is_some() {
            return Err(VerificationError::Response(
                "absence proof accompanied by entry material".to_string(),
            ));
        }
        VerifiedEntry::Absent { epoch: head.epoch }
    } else {
        let entry = response
            .entry
            .as_ref()
            .ok_or_else(|| {
                VerificationError::Response("occupied leaf without an entry".to_string())
            })?
            .clone();
        let expected_leaf = leaf_hash(&index, TREE_DEPTH as u32, &entry.commitment);
        if expected_leaf != response.tree_proof.leaf_hash {
            return Err(VerificationError::TreeProof(
                "leaf hash does not match the committed entry".to_string(),
            ));
        }

        // 3. the opening proves what the commitment binds
        let committed = response.committed.as_ref().ok_or_else(|| {
            VerificationError::Response("entry without its commitment opening".to_string())
        })?;
        commitment::verify(&committed.nonce, app_id, &committed.data, &entry.commitment)?;

        VerifiedEntry::Present {
            epoch: head.epoch,
            entry,
            data: committed.data.clone(),
        }
    };

    // 4-6. the head must be signed, sit in the signed log at its epoch, and
    // the published log must extend this client's trusted view
    verify_map_head_in_log(
        params,
        head,
        &response.log_inclusion,
        &response.log_consistency,
        &response.signed_log_root,
        trusted,
    )?;

    Ok(verified)
}
