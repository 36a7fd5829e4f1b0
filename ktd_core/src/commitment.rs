// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The hiding-and-binding commitment over entry payloads. The tree stores
//! only the 32-byte commitment; the nonce and payload are delivered
//! out-of-band inside the update and on lookup, so an auditor that walks the
//! tree learns nothing about payloads.
//!
//! `commit(nonce, app_id, data) = HMAC-SHA256(nonce, "commit" || len(app_id) || app_id || data)`
//!
//! Binding follows from HMAC collision resistance; hiding from the nonce
//! carrying 128 bits of entropy.

use crate::hash::{Digest, DIGEST_BYTES};
use crate::types::{AppId, NONCE_BYTES};
use crate::wire::i2osp_array;

use hmac::{Hmac, Mac};
use rand::{CryptoRng, Rng};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// An error opening a commitment
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum CommitmentError {
    /// The recomputed commitment does not match the published one
    Mismatch,
    /// The payload exceeds the bound the directory accepts
    PayloadTooLarge(usize),
}

impl core::fmt::Display for CommitmentError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CommitmentError::Mismatch => {
                write!(f, "BAD_COMMITMENT: opening does not match commitment")
            }
            CommitmentError::PayloadTooLarge(size) => {
                write!(f, "BAD_COMMITMENT: payload of {size} bytes exceeds bound")
            }
        }
    }
}

/// Generate a fresh 16-byte commitment nonce
pub fn gen_nonce<R: CryptoRng + Rng>(rng: &mut R) -> [u8; NONCE_BYTES] {
    let mut nonce = [0u8; NONCE_BYTES];
    rng.fill_bytes(&mut nonce);
    nonce
}

fn mac(nonce: &[u8; NONCE_BYTES], app_id: &AppId, data: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so new_from_slice on a fixed-size
    // nonce cannot fail
    let mut mac = HmacSha256::new_from_slice(nonce)
        .expect("HMAC construction accepts any key length");
    mac.update(b"commit");
    mac.update(&i2osp_array(app_id));
    mac.update(data);
    mac
}

/// Commit to `(app_id, data)` under `nonce`
pub fn commit(
    nonce: &[u8; NONCE_BYTES],
    app_id: &AppId,
    data: &[u8],
) -> Result<Digest, CommitmentError> {
    if data.len() > crate::MAX_ENTRY_BYTES {
        return Err(CommitmentError::PayloadTooLarge(data.len()));
    }
    let tag = mac(nonce, app_id, data).finalize().into_bytes();
    let mut out = [0u8; DIGEST_BYTES];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Recompute the commitment from its opening and compare in constant time
pub fn verify(
    nonce: &[u8; NONCE_BYTES],
    app_id: &AppId,
    data: &[u8],
    commitment: &Digest,
) -> Result<(), CommitmentError> {
    if data.len() > crate::MAX_ENTRY_BYTES {
        return Err(CommitmentError::PayloadTooLarge(data.len()));
    }
    mac(nonce, app_id, data)
        .verify_slice(commitment)
        .map_err(|_| CommitmentError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn commit_is_deterministic() {
        let nonce = [3u8; NONCE_BYTES];
        let app = AppId::from("app");
        let a = commit(&nonce, &app, b"data").unwrap();
        let b = commit(&nonce, &app, b"data").unwrap();
        assert_eq!(a, b);
        assert!(verify(&nonce, &app, b"data", &a).is_ok());
    }

    #[test]
    fn any_input_change_flips_the_commitment() {
        let mut rng = StdRng::seed_from_u64(13);
        let nonce = gen_nonce(&mut rng);
        let base = commit(&nonce, &AppId::from("app"), b"data").unwrap();

        let mut other_nonce = nonce;
        other_nonce[0] ^= 1;
        assert_ne!(base, commit(&other_nonce, &AppId::from("app"), b"data").unwrap());
        assert_ne!(base, commit(&nonce, &AppId::from("app2"), b"data").unwrap());
        assert_ne!(base, commit(&nonce, &AppId::from("app"), b"datb").unwrap());
    }

    #[test]
    fn app_id_length_is_bound_into_the_mac() {
        // the app_id is length-prefixed, so shifting a byte across the
        // app_id/data boundary must change the commitment
        let nonce = [5u8; NONCE_BYTES];
        let a = commit(&nonce, &AppId::from("ab"), b"c").unwrap();
        let b = commit(&nonce, &AppId::from("a"), b"bc").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn mismatched_opening_is_rejected() {
        let nonce = [7u8; NONCE_BYTES];
        let app = AppId::from("app");
        let commitment = commit(&nonce, &app, b"data").unwrap();
        assert_eq!(
            verify(&nonce, &app, b"other", &commitment),
            Err(CommitmentError::Mismatch)
        );
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let nonce = [7u8; NONCE_BYTES];
        let app = AppId::from("app");
        let payload = vec![0u8; crate::MAX_ENTRY_BYTES + 1];
        assert!(matches!(
            commit(&nonce, &app, &payload),
            Err(CommitmentError::PayloadTooLarge(_))
        ));
    }
}
