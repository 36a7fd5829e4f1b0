// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Tests for the elliptic-curve VRF: determinism, proof round trips and
//! rejection of tampered material.

use super::*;
use crate::types::{vrf_input, AppId, UserId};

use core::convert::TryFrom;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

fn random_key(rng: &mut StdRng) -> VrfPrivateKey {
    let mut bytes = [0u8; SECRET_KEY_LENGTH];
    rng.fill_bytes(&mut bytes);
    VrfPrivateKey::try_from(&bytes[..]).unwrap()
}

#[test]
fn evaluation_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(17);
    let key = random_key(&mut rng);
    let alpha = vrf_input(&AppId::from("app"), &UserId::from("user@example.com"));

    let (index_a, proof_a) = key.evaluate(&alpha);
    let (index_b, proof_b) = key.evaluate(&alpha);
    assert_eq!(index_a, index_b);
    assert_eq!(proof_a.to_bytes(), proof_b.to_bytes());
}

#[test]
fn verify_returns_the_evaluated_index() {
    let mut rng = StdRng::seed_from_u64(19);
    let key = random_key(&mut rng);
    let pk = VrfPublicKey::from(&key);
    let alpha = vrf_input(&AppId::from("app"), &UserId::from("user@example.com"));

    let (index, proof) = key.evaluate(&alpha);
    let verified = pk.verify_bytes(&proof.to_bytes(), &alpha).unwrap();
    assert_eq!(index, verified);
}

#[test]
fn distinct_inputs_produce_distinct_indices() {
    let mut rng = StdRng::seed_from_u64(23);
    let key = random_key(&mut rng);

    let (index_a, _) = key.evaluate(&vrf_input(&AppId::from("app"), &UserId::from("a@x")));
    let (index_b, _) = key.evaluate(&vrf_input(&AppId::from("app"), &UserId::from("b@x")));
    assert_ne!(index_a, index_b);
}

#[test]
fn proof_for_wrong_message_is_rejected() {
    let mut rng = StdRng::seed_from_u64(29);
    let key = random_key(&mut rng);
    let pk = VrfPublicKey::from(&key);

    let alpha = vrf_input(&AppId::from("app"), &UserId::from("a@x"));
    let other = vrf_input(&AppId::from("app"), &UserId::from("b@x"));
    let (_, proof) = key.evaluate(&alpha);
    assert!(pk.verify_bytes(&proof.to_bytes(), &other).is_err());
}

#[test]
fn proof_under_wrong_key_is_rejected() {
    let mut rng = StdRng::seed_from_u64(31);
    let key = random_key(&mut rng);
    let other_pk = VrfPublicKey::from(&random_key(&mut rng));

    let alpha = vrf_input(&AppId::from("app"), &UserId::from("a@x"));
    let (_, proof) = key.evaluate(&alpha);
    assert!(other_pk.verify_bytes(&proof.to_bytes(), &alpha).is_err());
}

#[test]
fn truncated_proof_fails_to_decode() {
    let mut rng = StdRng::seed_from_u64(37);
    let key = random_key(&mut rng);
    let pk = VrfPublicKey::from(&key);

    let alpha = vrf_input(&AppId::from("app"), &UserId::from("a@x"));
    let (_, proof) = key.evaluate(&alpha);
    let bytes = proof.to_bytes();
    assert!(pk.verify_bytes(&bytes[..PROOF_LENGTH - 1], &alpha).is_err());
}

#[test]
fn public_key_bytes_round_trip() {
    let mut rng = StdRng::seed_from_u64(41);
    let key = random_key(&mut rng);
    let pk = VrfPublicKey::from(&key);
    let restored = VrfPublicKey::try_from(&pk.as_bytes()[..]).unwrap();
    assert_eq!(pk, restored);
}
