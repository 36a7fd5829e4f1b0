// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Raw ECVRF implementation: key types, proof generation and verification.
//! Follows RFC 9381 with the try-and-increment encode-to-curve variant over
//! edwards25519.

use super::VrfError;
use crate::types::Index;

use core::convert::TryFrom;
use curve25519_dalek::digest::Update;
use curve25519_dalek::traits::IsIdentity;
use curve25519_dalek::{
    constants::ED25519_BASEPOINT_POINT,
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
};
use ed25519_dalek::Sha512;
use ed25519_dalek::{Digest, SigningKey, VerifyingKey};
use zeroize::Zeroize;

const SUITE: u8 = 0x03;
const ZERO: u8 = 0x00;
const ONE: u8 = 0x01;
const TWO: u8 = 0x02;
const THREE: u8 = 0x03;

/// The number of bytes in a VRF private key seed
pub const SECRET_KEY_LENGTH: usize = 32;
/// The number of bytes in a serialized VRF public key
pub const PUBLIC_KEY_LENGTH: usize = 32;
/// The number of bytes in a serialized proof
pub const PROOF_LENGTH: usize = 80;

/// The number of bytes of the full VRF hash output, before truncation to an
/// [Index]
const OUTPUT_LENGTH: usize = 64;

/// An ECVRF private key
#[derive(Clone)]
pub struct VrfPrivateKey(pub(crate) [u8; SECRET_KEY_LENGTH]);

impl Drop for VrfPrivateKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl core::fmt::Debug for VrfPrivateKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // never render key bytes
        write!(f, "VrfPrivateKey(..)")
    }
}

/// An ECVRF public key
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct VrfPublicKey(VerifyingKey);

impl VrfPublicKey {
    /// The serialized public key bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        self.0.as_bytes()
    }
}

/// The scalar expansion of a private key, kept around when many proofs are
/// generated against one key
pub(crate) struct ExpandedPrivateKey {
    key: Scalar,
    nonce: [u8; 32],
}

impl Drop for ExpandedPrivateKey {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
    }
}

impl TryFrom<&[u8]> for VrfPrivateKey {
    type Error = VrfError;

    fn try_from(bytes: &[u8]) -> Result<VrfPrivateKey, VrfError> {
        if bytes.len() != SECRET_KEY_LENGTH {
            return Err(VrfError::PrivateKey(
                "Wrong length, expected 32 byte private key".to_string(),
            ));
        }
        let mut key = [0u8; SECRET_KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(VrfPrivateKey(key))
    }
}

impl TryFrom<&[u8]> for VrfPublicKey {
    type Error = VrfError;

    fn try_from(bytes: &[u8]) -> Result<VrfPublicKey, Self::Error> {
        if bytes.len() != PUBLIC_KEY_LENGTH {
            return Err(VrfError::PublicKey("Wrong length".to_string()));
        }

        let mut bits: [u8; PUBLIC_KEY_LENGTH] = [0u8; PUBLIC_KEY_LENGTH];
        bits.copy_from_slice(&bytes[..PUBLIC_KEY_LENGTH]);

        let compressed = CompressedEdwardsY(bits);
        let point = compressed
            .decompress()
            .ok_or_else(|| VrfError::PublicKey("Deserialization failed".to_string()))?;

        // Reject points on a small subgroup; ed25519 has cofactor 8
        if point.is_small_order() {
            return Err(VrfError::PublicKey("Small subgroup".to_string()));
        }

        match VerifyingKey::from_bytes(&bits) {
            Ok(result) => Ok(VrfPublicKey(result)),
            Err(sig_err) => Err(VrfError::PublicKey(format!("Signature error {sig_err}"))),
        }
    }
}

impl<'a> From<&'a VrfPrivateKey> for VrfPublicKey {
    fn from(private_key: &'a VrfPrivateKey) -> Self {
        let signing_key = SigningKey::from_bytes(&private_key.0);
        VrfPublicKey(VerifyingKey::from(&signing_key))
    }
}

impl<'a> From<&'a VrfPrivateKey> for ExpandedPrivateKey {
    fn from(private_key: &'a VrfPrivateKey) -> Self {
        let mut h: Sha512 = Sha512::default();
        let mut hash: [u8; 64] = [0u8; 64];
        let mut lower: [u8; 32] = [0u8; 32];
        let mut upper: [u8; 32] = [0u8; 32];

        Update::update(&mut h, &private_key.0);
        hash.copy_from_slice(h.finalize().as_slice());

        lower.copy_from_slice(&hash[00..32]);
        upper.copy_from_slice(&hash[32..64]);

        lower[0] &= 248;
        lower[31] &= 63;
        lower[31] |= 64;

        ExpandedPrivateKey {
            #[allow(deprecated)] // from_bits keeps the clamped scalar unreduced
            key: Scalar::from_bits(lower),
            nonce: upper,
        }
    }
}

impl VrfPrivateKey {
    /// Evaluate the VRF on `alpha`, returning the tree index and the proof
    /// that lets anyone check the index against the public key. Identical
    /// inputs always produce identical outputs.
    pub fn evaluate(&self, alpha: &[u8]) -> (Index, VrfProof) {
        let expanded = ExpandedPrivateKey::from(self);
        let pk = VrfPublicKey::from(self);
        let proof = expanded.prove(&pk, alpha);
        (proof.to_index(), proof)
    }
}

impl ExpandedPrivateKey {
    pub(crate) fn prove(&self, pk: &VrfPublicKey, alpha: &[u8]) -> VrfProof {
        let h_point = pk.encode_to_curve(alpha);
        let h_point_bytes = h_point.compress().to_bytes();
        let k_scalar =
            Scalar::from_bytes_mod_order_wide(&nonce_generation_bytes(self.nonce, &h_point_bytes));
        let gamma = h_point * self.key;
        let c_scalar = hash_points(
            &pk.0,
            &h_point_bytes,
            &[
                gamma,
                curve25519_dalek::constants::ED25519_BASEPOINT_TABLE * &k_scalar,
                h_point * k_scalar,
            ],
        );

        VrfProof {
            gamma,
            c: c_scalar,
            s: k_scalar + c_scalar * self.key,
        }
    }
}

impl VrfPublicKey {
    /// Check `proof` against `alpha` and this key, returning the index the
    /// proof commits to. Fails with a verification error when the proof does
    /// not match.
    pub fn verify(&self, proof: &VrfProof, alpha: &[u8]) -> Result<Index, VrfError> {
        let h_point = self.encode_to_curve(alpha);
        let pk_point = match CompressedEdwardsY::from_slice(self.as_bytes())
            .map_err(|_| {
                VrfError::Verification(
                    "Failed to parse public key, incorrect byte string length".to_string(),
                )
            })?
            .decompress()
        {
            Some(pt) => pt,
            None => {
                return Err(VrfError::Verification(
                    "Failed to decompress public key into Edwards point".to_string(),
                ))
            }
        };
        let cprime = hash_points(
            &self.0,
            &h_point.compress().to_bytes(),
            &[
                proof.gamma,
                ED25519_BASEPOINT_POINT * proof.s - pk_point * proof.c,
                h_point * proof.s - proof.gamma * proof.c,
            ],
        );

        if proof.c == cprime {
            Ok(proof.to_index())
        } else {
            Err(VrfError::Verification(
                "The proof failed to verify for this public key".to_string(),
            ))
        }
    }

    /// Decode `proof_bytes` and verify in one step, the form servers hand to
    /// clients
    pub fn verify_bytes(&self, proof_bytes: &[u8], alpha: &[u8]) -> Result<Index, VrfError> {
        let proof = VrfProof::try_from(proof_bytes)?;
        self.verify(&proof, alpha)
    }

    /// Implements the [ECVRF_encode_to_curve_try_and_increment](https://www.ietf.org/rfc/rfc9381.html#section-5.4.1.1) algorithm
    fn encode_to_curve(&self, alpha: &[u8]) -> EdwardsPoint {
        let mut hash_result = [0u8; 32];
        let mut counter = 0;
        loop {
            let hash = Sha512::new()
                .chain([SUITE, ONE])
                .chain(self.0.as_bytes())
                .chain(alpha)
                .chain([counter, ZERO])
                .finalize();
            hash_result.copy_from_slice(&hash[..32]);
            let wrapped_point = interpret_hash_value_as_a_point(hash_result);
            counter += 1;
            if let Some(wp) = wrapped_point {
                let result = wp.mul_by_cofactor();

                // Never return the identity point
                if !result.is_identity() {
                    return result;
                }
            }
        }
    }
}

/// As defined in [Section 5.1.3 of RFC 8032](https://www.rfc-editor.org/rfc/rfc8032#section-5.1.3)
///
/// Returns Some(point) if the hash value can be interpreted as a point, and
/// None otherwise.
fn interpret_hash_value_as_a_point(hash: [u8; 32]) -> Option<EdwardsPoint> {
    // If the input bytes are such that bytes 1 to 30 have value 255, byte 31
    // has value 255 or 127, and byte 0 has value 256 - i for value i in the
    // (1, 3, 4, 5, 9, 10, 13, 14, 15, 16) list, then the encoding is invalid.
    let is_invalid = hash[1..=30].iter().all(|b| *b == 255)
        && (hash[31] == 255 || hash[31] == 127)
        && [1u8, 3, 4, 5, 9, 10, 13, 14, 15, 16].contains(&((256u16 - hash[0] as u16) as u8));
    if is_invalid {
        return None;
    }
    CompressedEdwardsY::from_slice(&hash).ok()?.decompress()
}

/// A VRF proof that can be used to validate an input against a public key
#[derive(Copy, Clone)]
pub struct VrfProof {
    gamma: EdwardsPoint,
    c: Scalar,
    s: Scalar,
}

impl VrfProof {
    /// Converts a proof into bytes: compressed gamma, the 16 significant
    /// bytes of `c`, then `s`
    pub fn to_bytes(&self) -> [u8; PROOF_LENGTH] {
        let mut ret = [0u8; PROOF_LENGTH];
        ret[..32].copy_from_slice(&self.gamma.compress().to_bytes()[..]);
        ret[32..48].copy_from_slice(&self.c.to_bytes()[..16]);
        ret[48..].copy_from_slice(&self.s.to_bytes()[..]);
        ret
    }

    /// The tree index this proof commits to: the leading 32 bytes of the VRF
    /// hash output derived from gamma
    pub fn to_index(&self) -> Index {
        let mut output = [0u8; OUTPUT_LENGTH];
        output.copy_from_slice(
            &Sha512::new()
                .chain([SUITE, THREE])
                .chain(self.gamma.mul_by_cofactor().compress().as_bytes())
                .chain([ZERO])
                .finalize()[..],
        );
        let mut truncated = [0u8; 32];
        truncated.copy_from_slice(&output[..32]);
        Index::from(truncated)
    }
}

impl TryFrom<&[u8]> for VrfProof {
    type Error = VrfError;

    fn try_from(bytes: &[u8]) -> Result<VrfProof, VrfError> {
        if bytes.len() != PROOF_LENGTH {
            return Err(VrfError::Verification(format!(
                "Invalid proof length, expected {PROOF_LENGTH} bytes"
            )));
        }
        let mut c_buf = [0u8; 32];
        c_buf[..16].copy_from_slice(&bytes[32..48]);
        let mut s_buf = [0u8; 32];
        s_buf.copy_from_slice(&bytes[48..]);

        let gamma = match CompressedEdwardsY::from_slice(&bytes[..32]) {
            Ok(compressed) => match compressed.decompress() {
                Some(pt) => pt,
                None => {
                    return Err(VrfError::Verification(
                        "Failed to decompress gamma into an Edwards point".to_string(),
                    ))
                }
            },
            Err(_) => {
                return Err(VrfError::Verification(
                    "Failed to parse gamma bytes".to_string(),
                ))
            }
        };

        Ok(VrfProof {
            gamma,
            c: Scalar::from_bytes_mod_order(c_buf),
            s: Scalar::from_bytes_mod_order(s_buf),
        })
    }
}

fn nonce_generation_bytes(nonce: [u8; 32], h_point_bytes: &[u8]) -> [u8; 64] {
    let mut k_buf = [0u8; 64];
    k_buf.copy_from_slice(&Sha512::new().chain(nonce).chain(h_point_bytes).finalize()[..]);
    k_buf
}

fn hash_points(pk: &VerifyingKey, h_point_bytes: &[u8], points: &[EdwardsPoint]) -> Scalar {
    let mut result = [0u8; 32];
    let mut hash = Sha512::new()
        .chain([SUITE, TWO])
        .chain(pk.to_bytes())
        .chain(h_point_bytes);
    for point in points.iter() {
        hash = hash.chain(point.compress().to_bytes());
    }
    result[..16].copy_from_slice(&hash.chain([ZERO]).finalize()[..16]);
    Scalar::from_bytes_mod_order(result)
}
