// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The verifiable random function that maps user identifiers to tree
//! coordinates. Indexing by a plain hash of the identifier would let anyone
//! run an offline dictionary over the tree; the keyed VRF forces an online
//! query against the directory while keeping each issued index publicly
//! checkable against the VRF public key.
//!
//! The construction is ECVRF over edwards25519 with SHA-512 and
//! try-and-increment encode-to-curve, per RFC 9381. The 256-bit
//! [crate::types::Index] is the truncation of the 64-byte VRF hash output.

mod ecvrf_impl;
mod traits;

pub use ecvrf_impl::{
    VrfPrivateKey, VrfProof, VrfPublicKey, PROOF_LENGTH, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
};
pub use traits::VrfKeyStorage;

/// A error related to the VRF: key handling, proof decoding or verification
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum VrfError {
    /// A problem deserializing or validating the public key
    PublicKey(String),
    /// A problem with the private key bytes
    PrivateKey(String),
    /// The proof failed to decode or to verify; the BAD_VRF condition
    Verification(String),
}

impl core::fmt::Display for VrfError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let code = match &self {
            VrfError::PublicKey(msg) => format!("(Public key) - {msg}"),
            VrfError::PrivateKey(msg) => format!("(Private key) - {msg}"),
            VrfError::Verification(msg) => format!("BAD_VRF - {msg}"),
        };
        write!(f, "VRF error {code}")
    }
}

#[cfg(test)]
mod tests;
