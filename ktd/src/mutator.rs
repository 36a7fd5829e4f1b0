// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The mutation engine: a pure, deterministic validator deciding whether a
//! proposed update may replace the current entry. The rule pipeline is fixed
//! and ordered; extensibility here would break the determinism monitors rely
//! on to replay epochs. Both the sequencer and every monitor run exactly this
//! function over the same persisted update bytes.

use ktd_core::hash::NIL_ENTRY_HASH;
use ktd_core::sign::any_authorized_signature;
use ktd_core::types::{Entry, EntryUpdate, Rejection};
use ktd_core::MAX_ENTRY_BYTES;

/// Validate `update_bytes` against the current entry and return the entry
/// that should replace it.
///
/// Rules, in order:
/// 1. the bytes must decode canonically (MALFORMED);
/// 2. an update identical to the current entry is a resubmission (REPLAY);
/// 3. `previous_hash` must chain to the current entry, or to the nil hash on
///    first claim (WRONG_PREVIOUS);
/// 4. at least one signature must verify against a key authorized by the
///    current entry, or by the new entry itself on first claim
///    (UNAUTHORIZED);
/// 5. the entry encoding must fit the size bound (TOO_LARGE).
///
/// The replay check runs ahead of the chain check so that resubmitting the
/// exact bytes of an already-accepted update reports REPLAY rather than a
/// chain mismatch.
pub fn apply(prev: Option<&Entry>, update_bytes: &[u8]) -> Result<Entry, Rejection> {
    let update = EntryUpdate::from_wire(update_bytes)
        .map_err(|err| Rejection::Malformed(err.to_string()))?;
    let new_entry = update.new_entry;

    if let Some(prev) = prev {
        if new_entry == *prev {
            return Err(Rejection::Replay);
        }
    }

    let expected_previous = prev.map(Entry::hash).unwrap_or(NIL_ENTRY_HASH);
    if new_entry.previous_hash != expected_previous {
        return Err(Rejection::WrongPrevious);
    }

    // on first claim the update self-authorizes: the keys inside the new
    // entry vouch for it
    let authorized_keys = match prev {
        Some(prev) => &prev.authorized_keys,
        None => &new_entry.authorized_keys,
    };
    if !any_authorized_signature(authorized_keys, &new_entry, &update.signatures) {
        return Err(Rejection::Unauthorized);
    }

    let encoded_len = new_entry.to_wire().len();
    if encoded_len > MAX_ENTRY_BYTES {
        return Err(Rejection::TooLarge(encoded_len));
    }

    Ok(new_entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ktd_core::commitment;
    use ktd_core::sign::sign_raw;
    use ktd_core::types::{AppId, CommittedValue, EntryUpdate};

    use ed25519_dalek::SigningKey;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn key(rng: &mut StdRng) -> SigningKey {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        SigningKey::from_bytes(&seed)
    }

    fn update_bytes(
        prev: Option<&Entry>,
        new_keys: &[&SigningKey],
        signing_keys: &[&SigningKey],
        data: &[u8],
        rng: &mut StdRng,
    ) -> Vec<u8> {
        let nonce = commitment::gen_nonce(rng);
        let app = AppId::from("app");
        let entry = Entry {
            commitment: commitment::commit(&nonce, &app, data).unwrap(),
            authorized_keys: new_keys.iter().map(|k| k.verifying_key().to_bytes()).collect(),
            previous_hash: prev.map(Entry::hash).unwrap_or(NIL_ENTRY_HASH),
        };
        let preimage = EntryUpdate::signing_preimage(&entry);
        EntryUpdate {
            new_entry: entry,
            signatures: signing_keys.iter().map(|k| sign_raw(k, &preimage)).collect(),
            committed: CommittedValue {
                nonce,
                data: data.to_vec(),
            },
        }
        .to_wire()
    }

    #[test]
    fn first_claim_self_authorizes() {
        let mut rng = StdRng::seed_from_u64(79);
        let owner = key(&mut rng);
        let bytes = update_bytes(None, &[&owner], &[&owner], b"v1", &mut rng);
        let entry = apply(None, &bytes).unwrap();
        assert!(entry.is_first_revision());
    }

    #[test]
    fn first_claim_signed_by_a_stranger_is_unauthorized() {
        let mut rng = StdRng::seed_from_u64(83);
        let owner = key(&mut rng);
        let stranger = key(&mut rng);
        let bytes = update_bytes(None, &[&owner], &[&stranger], b"v1", &mut rng);
        assert_eq!(apply(None, &bytes), Err(Rejection::Unauthorized));
    }

    #[test]
    fn rotation_requires_the_previous_key() {
        let mut rng = StdRng::seed_from_u64(89);
        let old_key = key(&mut rng);
        let new_key = key(&mut rng);

        let first = apply(
            None,
            &update_bytes(None, &[&old_key], &[&old_key], b"v1", &mut rng),
        )
        .unwrap();

        // rotating to new_key, signed by the old key: accepted
        let rotated = apply(
            Some(&first),
            &update_bytes(Some(&first), &[&new_key], &[&old_key], b"v2", &mut rng),
        )
        .unwrap();
        assert_eq!(
            rotated.authorized_keys,
            vec![new_key.verifying_key().to_bytes()]
        );

        // a further update still signed by the retired key: unauthorized
        let stale = update_bytes(Some(&rotated), &[&old_key], &[&old_key], b"v3", &mut rng);
        assert_eq!(apply(Some(&rotated), &stale), Err(Rejection::Unauthorized));
    }

    #[test]
    fn wrong_previous_hash_is_rejected() {
        let mut rng = StdRng::seed_from_u64(97);
        let owner = key(&mut rng);
        let first = apply(
            None,
            &update_bytes(None, &[&owner], &[&owner], b"v1", &mut rng),
        )
        .unwrap();

        // chains to nil instead of the live entry
        let detached = update_bytes(None, &[&owner], &[&owner], b"v2", &mut rng);
        assert_eq!(apply(Some(&first), &detached), Err(Rejection::WrongPrevious));
    }

    #[test]
    fn resubmitting_accepted_bytes_is_a_replay() {
        let mut rng = StdRng::seed_from_u64(101);
        let owner = key(&mut rng);
        let bytes = update_bytes(None, &[&owner], &[&owner], b"v1", &mut rng);
        let entry = apply(None, &bytes).unwrap();
        assert_eq!(apply(Some(&entry), &bytes), Err(Rejection::Replay));
    }

    #[test]
    fn oversized_entry_is_rejected_by_the_size_rule() {
        let mut rng = StdRng::seed_from_u64(107);
        let owner = key(&mut rng);
        // 600 authorized keys push the entry encoding past the 16 KiB bound
        let mut filler = [0u8; 32];
        let entry = Entry {
            commitment: commitment::commit(
                &commitment::gen_nonce(&mut rng),
                &AppId::from("app"),
                b"v1",
            )
            .unwrap(),
            authorized_keys: (0..600)
                .map(|_| {
                    rng.fill_bytes(&mut filler);
                    filler
                })
                .chain([owner.verifying_key().to_bytes()])
                .collect(),
            previous_hash: NIL_ENTRY_HASH,
        };
        let preimage = EntryUpdate::signing_preimage(&entry);
        let bytes = EntryUpdate {
            new_entry: entry,
            signatures: vec![sign_raw(&owner, &preimage)],
            committed: CommittedValue {
                nonce: [0u8; 16],
                data: b"v1".to_vec(),
            },
        }
        .to_wire();
        assert!(matches!(apply(None, &bytes), Err(Rejection::TooLarge(_))));
    }

    #[test]
    fn garbage_bytes_are_malformed() {
        assert!(matches!(
            apply(None, b"not an update"),
            Err(Rejection::Malformed(_))
        ));
    }

    #[test]
    fn truncated_update_is_malformed() {
        let mut rng = StdRng::seed_from_u64(103);
        let owner = key(&mut rng);
        let bytes = update_bytes(None, &[&owner], &[&owner], b"v1", &mut rng);
        assert!(matches!(
            apply(None, &bytes[..bytes.len() - 3]),
            Err(Rejection::Malformed(_))
        ));
    }
}
