// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Protocol-level tests: fixtures wiring storage, sequencer, directory and
//! monitor together over the in-memory database, plus helpers for producing
//! signed updates. Every test seeds its randomness.


use crate::directory::Directory;
use crate::sequencer::Sequencer;
use crate::signer::{InMemoryVrfKey, LocalSigner, Signer};
use crate::storage::memory::InMemoryDb;
use crate::storage::StorageManager;

use ktd_core::commitment;
use ktd_core::ecvrf::VrfKeyStorage;
use ktd_core::hash::NIL_ENTRY_HASH;
use ktd_core::sign::sign_raw;
use ktd_core::types::{AppId, CommittedValue, DirectoryParams, Entry, EntryUpdate};

use ed25519_dalek::SigningKey;
use rand::rngs::StdRng;
use rand::RngCore;

pub(crate) struct TestDirectory {
    pub storage: StorageManager<InMemoryDb>,
    pub directory: Directory<InMemoryDb, InMemoryVrfKey>,
    pub sequencer: Sequencer<InMemoryDb, LocalSigner>,
    pub params: DirectoryParams,
}

/// Stand up a complete single-directory deployment over fresh in-memory
/// storage, with epoch 0 already published
pub(crate) async fn setup(rng: &mut StdRng) -> TestDirectory {
    let map_signer = LocalSigner::generate(rng);
    let log_signer = LocalSigner::generate(rng);
    let vrf = InMemoryVrfKey::generate(rng);

    let params = DirectoryParams {
        directory_id: "test-directory".to_string(),
        vrf_public_key: *vrf.get_vrf_public_key().await.unwrap().as_bytes(),
        map_public_key: map_signer.public_key(),
        log_public_key: log_signer.public_key(),
        min_interval_ms: 10,
        max_interval_ms: 1_000,
    };

    let storage = StorageManager::new(InMemoryDb::new());
    let sequencer = Sequencer::new(
        storage.clone(),
        params.clone(),
        map_signer,
        log_signer,
        "test-sequencer",
    )
    .unwrap();
    sequencer.initialize(1_000).await.unwrap();

    let directory = Directory::new(storage.clone(), vrf, params.clone())
        .await
        .unwrap();

    TestDirectory {
        storage,
        directory,
        sequencer,
        params,
    }
}

pub(crate) fn signing_key(rng: &mut StdRng) -> SigningKey {
    let mut seed = [0u8; 32];
    rng.fill_bytes(&mut seed);
    SigningKey::from_bytes(&seed)
}

/// Build a correctly chained and signed update: `new_keys` become the
/// authorized keys of the new revision, `signers` produce the signatures
/// (authorized keys of the previous revision, or of the new one on first
/// claim)
pub(crate) fn signed_update(
    prev: Option<&Entry>,
    new_keys: &[&SigningKey],
    signers: &[&SigningKey],
    app_id: &AppId,
    data: &[u8],
    rng: &mut StdRng,
) -> EntryUpdate {
    let nonce = commitment::gen_nonce(rng);
    let entry = Entry {
        commitment: commitment::commit(&nonce, app_id, data).unwrap(),
        authorized_keys: new_keys
            .iter()
            .map(|key| key.verifying_key().to_bytes())
            .collect(),
        previous_hash: prev.map(Entry::hash).unwrap_or(NIL_ENTRY_HASH),
    };
    let preimage = EntryUpdate::signing_preimage(&entry);
    EntryUpdate {
        new_entry: entry,
        signatures: signers.iter().map(|key| sign_raw(key, &preimage)).collect(),
        committed: CommittedValue {
            nonce,
            data: data.to_vec(),
        },
    }
}
