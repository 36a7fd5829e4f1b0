// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Ed25519 signing and verification over the directory's domain-separated
//! canonical encodings. Every signed artifact carries its own prefix ("SMH",
//! "SLR", "ENT", "ATT", "INC") so a signature can never be replayed across
//! protocols or artifact kinds.

use crate::hash::Digest;
use crate::types::{Entry, EntryUpdate, PublicKeyBytes, SignedLogRoot, SignedMapHead};
use crate::wire::put_u64;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// An error produced while checking a signature
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum SigError {
    /// The public key bytes did not decode to a valid key
    InvalidKey(String),
    /// The signature did not decode or did not verify
    InvalidSignature,
}

impl core::fmt::Display for SigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SigError::InvalidKey(msg) => write!(f, "Invalid public key: {msg}"),
            SigError::InvalidSignature => write!(f, "Signature did not verify"),
        }
    }
}

/// Sign an arbitrary preimage, returning the detached 64-byte signature
pub fn sign_raw(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    key.sign(message).to_bytes().to_vec()
}

/// Verify a detached signature over `message` under raw public key bytes
pub fn verify_raw(
    public_key: &PublicKeyBytes,
    message: &[u8],
    signature: &[u8],
) -> Result<(), SigError> {
    let key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| SigError::InvalidKey(e.to_string()))?;
    let signature = Signature::from_slice(signature).map_err(|_| SigError::InvalidSignature)?;
    key.verify(message, &signature)
        .map_err(|_| SigError::InvalidSignature)
}

/// Verify the signature of a signed map head under the map public key
pub fn verify_map_head(public_key: &PublicKeyBytes, head: &SignedMapHead) -> Result<(), SigError> {
    let preimage = SignedMapHead::signing_preimage(
        &head.directory_id,
        head.epoch,
        &head.root_hash,
        head.timestamp_ns,
        &head.metadata_hash,
    );
    verify_raw(public_key, &preimage, &head.signature)
}

/// Verify the signature of a signed log root under the log public key
pub fn verify_log_root(public_key: &PublicKeyBytes, root: &SignedLogRoot) -> Result<(), SigError> {
    let preimage = SignedLogRoot::signing_preimage(root.tree_size, &root.root_hash);
    verify_raw(public_key, &preimage, &root.signature)
}

/// Whether any of `signatures` is a valid signature on `entry` by any of
/// `authorized_keys`. This is the mutator's quorum rule: a single valid
/// signature admits the update. Malformed keys or signatures in the lists
/// simply don't count.
pub fn any_authorized_signature(
    authorized_keys: &[PublicKeyBytes],
    entry: &Entry,
    signatures: &[Vec<u8>],
) -> bool {
    let preimage = EntryUpdate::signing_preimage(entry);
    signatures.iter().any(|sig| {
        authorized_keys
            .iter()
            .any(|key| verify_raw(key, &preimage, sig).is_ok())
    })
}

/// The preimage of a monitor attestation that epoch `epoch` replayed
/// cleanly to the head with hash `head_hash`
pub fn attestation_preimage(epoch: u64, head_hash: &Digest) -> Vec<u8> {
    let mut out = b"ATT".to_vec();
    put_u64(&mut out, epoch);
    out.extend_from_slice(head_hash);
    out
}

/// The preimage of a monitor inconsistency report for `epoch`
pub fn inconsistency_preimage(epoch: u64, expected_root: &Digest, observed_root: &Digest) -> Vec<u8> {
    let mut out = b"INC".to_vec();
    put_u64(&mut out, epoch);
    out.extend_from_slice(expected_root);
    out.extend_from_slice(observed_root);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash, NIL_ENTRY_HASH};
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn signing_key(rng: &mut StdRng) -> SigningKey {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        SigningKey::from_bytes(&seed)
    }

    #[test]
    fn map_head_signature_round_trip() {
        let mut rng = StdRng::seed_from_u64(43);
        let key = signing_key(&mut rng);
        let preimage =
            SignedMapHead::signing_preimage("dir", 4, &hash(b"root"), 1234, &hash(b"meta"));
        let head = SignedMapHead {
            directory_id: "dir".to_string(),
            epoch: 4,
            root_hash: hash(b"root"),
            timestamp_ns: 1234,
            metadata_hash: hash(b"meta"),
            signature: sign_raw(&key, &preimage),
        };
        let pk = key.verifying_key().to_bytes();
        assert!(verify_map_head(&pk, &head).is_ok());

        let mut tampered = head;
        tampered.epoch = 5;
        assert_eq!(verify_map_head(&pk, &tampered), Err(SigError::InvalidSignature));
    }

    #[test]
    fn log_root_domain_is_separate_from_map_head() {
        // a signature over an SLR preimage must not validate an SMH with the
        // same numeric fields
        let mut rng = StdRng::seed_from_u64(47);
        let key = signing_key(&mut rng);
        let root = hash(b"root");
        let slr = SignedLogRoot {
            tree_size: 4,
            root_hash: root,
            signature: sign_raw(&key, &SignedLogRoot::signing_preimage(4, &root)),
        };
        let pk = key.verifying_key().to_bytes();
        assert!(verify_log_root(&pk, &slr).is_ok());

        let head = SignedMapHead {
            directory_id: String::new(),
            epoch: 4,
            root_hash: root,
            timestamp_ns: 0,
            metadata_hash: root,
            signature: slr.signature.clone(),
        };
        assert!(verify_map_head(&pk, &head).is_err());
    }

    #[test]
    fn entry_signature_quorum() {
        let mut rng = StdRng::seed_from_u64(53);
        let authorized = signing_key(&mut rng);
        let stranger = signing_key(&mut rng);

        let entry = Entry {
            commitment: hash(b"c"),
            authorized_keys: vec![authorized.verifying_key().to_bytes()],
            previous_hash: NIL_ENTRY_HASH,
        };
        let preimage = EntryUpdate::signing_preimage(&entry);
        let keys = entry.authorized_keys.clone();

        let good = sign_raw(&authorized, &preimage);
        let bad = sign_raw(&stranger, &preimage);

        assert!(any_authorized_signature(&keys, &entry, &[good.clone()]));
        // one good signature among garbage is enough
        assert!(any_authorized_signature(
            &keys,
            &entry,
            &[vec![0u8; 64], bad.clone(), good]
        ));
        assert!(!any_authorized_signature(&keys, &entry, &[bad]));
        assert!(!any_authorized_signature(&keys, &entry, &[]));
    }
}
