// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Storage trait for the VRF private key. The key must never rotate (a
//! rotation would silently re-map every identifier to a new coordinate), so
//! implementations are encouraged to fetch the key bytes once and cache them
//! for the life of the process.

use super::ecvrf_impl::ExpandedPrivateKey;
use super::{VrfError, VrfPrivateKey, VrfProof, VrfPublicKey};
use crate::types::{vrf_input, AppId, Index, UserId};

use async_trait::async_trait;
use core::convert::TryInto;

/// Represents a secure storage of the VRF private key
#[async_trait]
pub trait VrfKeyStorage: Clone + Sync + Send {
    /* ======= To be implemented ====== */

    /// Retrieve the VRF private key as a vector of bytes
    async fn retrieve(&self) -> Result<Vec<u8>, VrfError>;

    /* ======= Common trait functionality ====== */

    /// Retrieve the properly constructed VRF private key
    async fn get_vrf_private_key(&self) -> Result<VrfPrivateKey, VrfError> {
        let bytes = self.retrieve().await?;
        let bytes_ref: &[u8] = &bytes;
        bytes_ref.try_into()
    }

    /// Retrieve the VRF public key
    async fn get_vrf_public_key(&self) -> Result<VrfPublicKey, VrfError> {
        self.get_vrf_private_key().await.map(|key| (&key).into())
    }

    /// Evaluate the VRF for one identifier, returning the tree index and the
    /// serialized proof
    async fn index_and_proof(
        &self,
        app_id: &AppId,
        user_id: &UserId,
    ) -> Result<(Index, Vec<u8>), VrfError> {
        let key = self.get_vrf_private_key().await?;
        let (index, proof) = key.evaluate(&vrf_input(app_id, user_id));
        Ok((index, proof.to_bytes().to_vec()))
    }

    /// Evaluate the VRF for a collection of identifiers with a single fetch
    /// of the private key, expanding it once for the whole batch
    async fn batch_indices(
        &self,
        identifiers: &[(AppId, UserId)],
    ) -> Result<Vec<((AppId, UserId), Index)>, VrfError> {
        let key = self.get_vrf_private_key().await?;
        let expanded = ExpandedPrivateKey::from(&key);
        let pk = VrfPublicKey::from(&key);

        let mut results = Vec::with_capacity(identifiers.len());
        for (app_id, user_id) in identifiers {
            let proof: VrfProof = expanded.prove(&pk, &vrf_input(app_id, user_id));
            results.push(((app_id.clone(), user_id.clone()), proof.to_index()));
        }
        Ok(results)
    }
}
