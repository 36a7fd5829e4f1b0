// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Verification of an epoch's map head against the signed append-only log:
//! head signature, directory binding, log inclusion and consistency with the
//! caller's trusted view. Shared by the entry verifier and by monitors, which
//! run it for every epoch before replaying mutations.

use super::VerificationError;
use crate::logtree;
use crate::sign;
use crate::types::{
    DirectoryParams, EpochResponse, LogConsistencyProof, LogInclusionProof, SignedLogRoot,
    SignedMapHead, TrustedLogRoot,
};

/// Verify a map head and its log evidence, then extend `trusted` to the
/// response's log view. On any failure `trusted` is left untouched.
pub fn verify_map_head_in_log(
    params: &DirectoryParams,
    head: &SignedMapHead,
    inclusion: &LogInclusionProof,
    consistency: &LogConsistencyProof,
    signed_log_root: &SignedLogRoot,
    trusted: &mut TrustedLogRoot,
) -> Result<(), VerificationError> {
    // the head must be signed by this directory's map key over this
    // directory's metadata
    if head.directory_id != params.directory_id {
        return Err(VerificationError::MapHead(format!(
            "head for directory {:?}, expected {:?}",
            head.directory_id, params.directory_id
        )));
    }
    if head.metadata_hash != params.metadata_hash() {
        return Err(VerificationError::MapHead(
            "head bound to different directory metadata".to_string(),
        ));
    }
    sign::verify_map_head(&params.map_public_key, head)
        .map_err(|e| VerificationError::MapHead(e.to_string()))?;

    // the head must sit at position `epoch` in the signed log
    if inclusion.leaf_index != head.epoch {
        return Err(VerificationError::LogInclusion(format!(
            "head for epoch {} proven at log position {}",
            head.epoch, inclusion.leaf_index
        )));
    }
    if inclusion.tree_size != signed_log_root.tree_size {
        return Err(VerificationError::LogInclusion(
            "inclusion proof and signed root cover different sizes".to_string(),
        ));
    }
    let head_leaf = logtree::leaf_hash(&head.to_wire());
    if !logtree::verify_inclusion(
        &head_leaf,
        inclusion.leaf_index,
        inclusion.tree_size,
        &inclusion.path,
        &signed_log_root.root_hash,
    ) {
        return Err(VerificationError::LogInclusion(
            "audit path did not reach the signed log root".to_string(),
        ));
    }
    sign::verify_log_root(&params.log_public_key, signed_log_root)
        .map_err(VerificationError::LogSignature)?;

    // the signed log view must extend what the caller already trusts
    if consistency.first_size != trusted.tree_size
        || consistency.second_size != signed_log_root.tree_size
    {
        return Err(VerificationError::LogConsistency(format!(
            "consistency proof covers {} -> {}, expected {} -> {}",
            consistency.first_size,
            consistency.second_size,
            trusted.tree_size,
            signed_log_root.tree_size
        )));
    }
    if !logtree::verify_consistency(
        trusted.tree_size,
        signed_log_root.tree_size,
        &trusted.root_hash,
        &signed_log_root.root_hash,
        &consistency.path,
    ) {
        return Err(VerificationError::LogConsistency(
            "published log does not extend the trusted view".to_string(),
        ));
    }

    *trusted = TrustedLogRoot {
        tree_size: signed_log_root.tree_size,
        root_hash: signed_log_root.root_hash,
    };
    Ok(())
}

/// Verify a full `GetEpoch` answer and extend `trusted` on success
pub fn verify_epoch_response(
    params: &DirectoryParams,
    response: &EpochResponse,
    trusted: &mut TrustedLogRoot,
) -> Result<(), VerificationError> {
    verify_map_head_in_log(
        params,
        &response.map_head,
        &response.log_inclusion,
        &response.log_consistency,
        &response.signed_log_root,
        trusted,
    )
}
