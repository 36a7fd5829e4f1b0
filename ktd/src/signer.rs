// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Server-side signing. The [Signer] trait abstracts the map and log signing
//! keys so deployments can back them with an HSM or key-management service;
//! [LocalSigner] holds an Ed25519 key in process memory. The VRF private key
//! has its own storage trait in `ktd_core`; [InMemoryVrfKey] is its in-process
//! counterpart.

use ktd_core::ecvrf::{VrfError, VrfKeyStorage};
use ktd_core::sign::sign_raw;
use ktd_core::types::PublicKeyBytes;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use rand::{CryptoRng, Rng};
use std::sync::Arc;

/// A provider of detached signatures under one long-lived key. Signing of
/// in-memory material must not block; providers that talk to external
/// hardware should cache or pipeline internally.
pub trait Signer: Clone + Send + Sync {
    /// The public half of the signing key
    fn public_key(&self) -> PublicKeyBytes;

    /// Produce a detached signature over `message`
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

/// An Ed25519 signing key held in process memory
#[derive(Clone)]
pub struct LocalSigner {
    key: Arc<SigningKey>,
}

impl LocalSigner {
    /// Construct from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: Arc::new(SigningKey::from_bytes(seed)),
        }
    }

    /// Generate a fresh key
    pub fn generate<R: CryptoRng + Rng>(rng: &mut R) -> Self {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }
}

impl core::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "LocalSigner({})", hex::encode(self.public_key()))
    }
}

impl Signer for LocalSigner {
    fn public_key(&self) -> PublicKeyBytes {
        self.key.verifying_key().to_bytes()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        sign_raw(&self.key, message)
    }
}

/// A VRF key held in process memory. The key bytes are fixed at construction;
/// the VRF key must never rotate for the life of a directory.
#[derive(Clone)]
pub struct InMemoryVrfKey {
    seed: [u8; 32],
}

impl InMemoryVrfKey {
    /// Construct from the 32-byte private key
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { seed }
    }

    /// Generate a fresh key
    pub fn generate<R: CryptoRng + Rng>(rng: &mut R) -> Self {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        Self { seed }
    }
}

impl core::fmt::Debug for InMemoryVrfKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "InMemoryVrfKey(..)")
    }
}

#[async_trait]
impl VrfKeyStorage for InMemoryVrfKey {
    async fn retrieve(&self) -> Result<Vec<u8>, VrfError> {
        Ok(self.seed.to_vec())
    }
}
