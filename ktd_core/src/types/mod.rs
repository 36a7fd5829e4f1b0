// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Shared type definitions for the directory: identifiers, entries, updates,
//! signed map heads, proofs and mutation records. Types that are hashed or
//! signed carry a `to_wire` canonical encoding (see [crate::wire]); serde is
//! only for operator tooling and never feeds a hash.

use crate::hash::{hash, Digest, DIGEST_BYTES, NIL_ENTRY_HASH};
use crate::wire::{put_bytes, put_u64, Reader, WireError};

use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};

/// An Ed25519 public key as raw bytes, the form carried in entries and
/// directory metadata
pub type PublicKeyBytes = [u8; 32];

/// The number of bytes in a commitment nonce
pub const NONCE_BYTES: usize = 16;

/// Largest number of authorized keys a decoder will accept. Entries near
/// this bound still fail the mutator's TOO_LARGE size rule; the decoder
/// bound only guards allocation.
pub const MAX_AUTHORIZED_KEYS: usize = 1024;

/// Largest number of signatures a single update may carry
pub const MAX_UPDATE_SIGNATURES: usize = 128;

// ============================================
// Identifiers
// ============================================

/// The application namespace component of an identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppId(pub Vec<u8>);

/// The user component of an identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub Vec<u8>);

macro_rules! byte_newtype {
    ($name:ident) => {
        impl core::ops::Deref for $name {
            type Target = Vec<u8>;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl core::convert::From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.as_bytes().to_vec())
            }
        }

        impl $name {
            /// Gets a random value, for tests
            pub fn random<R: CryptoRng + Rng>(rng: &mut R) -> Self {
                let mut bytes = [0u8; 32];
                rng.fill_bytes(&mut bytes);
                Self(bytes.to_vec())
            }
        }
    };
}

byte_newtype!(AppId);
byte_newtype!(UserId);

/// The VRF input message for an identifier: the canonical encoding of the
/// `(app_id, user_id)` pair. Both components are length-prefixed so that
/// `("ab", "c")` and `("a", "bc")` map to different tree coordinates.
pub fn vrf_input(app_id: &AppId, user_id: &UserId) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + app_id.len() + user_id.len());
    put_bytes(&mut out, app_id);
    put_bytes(&mut out, user_id);
    out
}

// ============================================
// Tree coordinates
// ============================================

/// A 256-bit coordinate in the sparse map tree, produced by the VRF
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Index([u8; 32]);

impl From<[u8; 32]> for Index {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Index {
    /// The raw index bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The `i`-th bit of the index, most significant bit first. Bit `i`
    /// selects the child taken when descending from depth `i` to depth
    /// `i + 1`: 0 is left, 1 is right.
    pub fn bit(&self, i: usize) -> u8 {
        (self.0[i / 8] >> (7 - (i % 8))) & 1
    }
}

impl core::fmt::Display for Index {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ============================================
// Entries and updates
// ============================================

/// The per-identifier committed state at some epoch. The tree leaf binds only
/// `commitment`; the other fields govern who may author the next revision and
/// how revisions chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Hiding commitment to the `(app_id, data)` payload
    pub commitment: Digest,
    /// Public keys permitted to sign the next mutation of this entry
    pub authorized_keys: Vec<PublicKeyBytes>,
    /// Hash of the canonical encoding of the immediately prior revision, or
    /// [NIL_ENTRY_HASH] for the first revision
    pub previous_hash: Digest,
}

impl Entry {
    /// Canonical encoding: `commitment || u64(n) || keys || previous_hash`
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(2 * DIGEST_BYTES + 8 + 32 * self.authorized_keys.len());
        out.extend_from_slice(&self.commitment);
        put_u64(&mut out, self.authorized_keys.len() as u64);
        for key in &self.authorized_keys {
            out.extend_from_slice(key);
        }
        out.extend_from_slice(&self.previous_hash);
        out
    }

    /// Strict decode of [Entry::to_wire] bytes
    pub fn from_wire(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let entry = Self::read_from(&mut reader)?;
        reader.finish()?;
        Ok(entry)
    }

    pub(crate) fn read_from(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        let commitment = reader.take_digest()?;
        let count = reader.take_u64()?;
        if count > MAX_AUTHORIZED_KEYS as u64 {
            return Err(WireError::FieldTooLong(count));
        }
        let mut authorized_keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            authorized_keys.push(reader.take_digest()?);
        }
        let previous_hash = reader.take_digest()?;
        Ok(Self {
            commitment,
            authorized_keys,
            previous_hash,
        })
    }

    /// SHA-256 of the canonical encoding; what the next revision's
    /// `previous_hash` must equal
    pub fn hash(&self) -> Digest {
        hash(&self.to_wire())
    }

    /// Whether this entry's `previous_hash` marks it as a first revision
    pub fn is_first_revision(&self) -> bool {
        self.previous_hash == NIL_ENTRY_HASH
    }

    /// A tombstone entry retires an identifier without deleting history: no
    /// payload and no keys that could author a successor.
    pub fn is_tombstone(&self) -> bool {
        self.authorized_keys.is_empty()
    }
}

/// The out-of-band opening of an entry's commitment: the nonce and raw
/// payload delivered alongside the update and returned to the account owner
/// on lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedValue {
    /// 16 fresh random bytes per revision
    pub nonce: [u8; NONCE_BYTES],
    /// The application payload, typically a serialized public key set
    pub data: Vec<u8>,
}

/// A signed transition from one entry revision to the next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryUpdate {
    /// The proposed next revision
    pub new_entry: Entry,
    /// Signatures over [EntryUpdate::signing_preimage] by keys authorized in
    /// the previous revision (or in `new_entry` itself on first claim)
    pub signatures: Vec<Vec<u8>>,
    /// The commitment opening for `new_entry.commitment`
    pub committed: CommittedValue,
}

impl EntryUpdate {
    /// The byte string entry signatures are computed over
    pub fn signing_preimage(entry: &Entry) -> Vec<u8> {
        let mut out = b"ENT".to_vec();
        out.extend_from_slice(&entry.to_wire());
        out
    }

    /// Canonical encoding of the full update, the form queued and persisted
    /// in mutation records
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_bytes(&mut out, &self.new_entry.to_wire());
        put_u64(&mut out, self.signatures.len() as u64);
        for sig in &self.signatures {
            put_bytes(&mut out, sig);
        }
        out.extend_from_slice(&self.committed.nonce);
        put_bytes(&mut out, &self.committed.data);
        out
    }

    /// Strict decode of [EntryUpdate::to_wire] bytes
    pub fn from_wire(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        // decode accepts entries beyond MAX_ENTRY_BYTES so that the mutator
        // can reject them with the size rule rather than as malformed
        let entry_bytes = reader.take_bytes(4 * crate::MAX_ENTRY_BYTES)?;
        let new_entry = Entry::from_wire(&entry_bytes)?;
        let count = reader.take_u64()?;
        if count > MAX_UPDATE_SIGNATURES as u64 {
            return Err(WireError::FieldTooLong(count));
        }
        let mut signatures = Vec::with_capacity(count as usize);
        for _ in 0..count {
            signatures.push(reader.take_bytes(64)?);
        }
        let mut nonce = [0u8; NONCE_BYTES];
        nonce.copy_from_slice(reader.take(NONCE_BYTES)?);
        let data = reader.take_bytes(crate::MAX_ENTRY_BYTES)?;
        reader.finish()?;
        Ok(Self {
            new_entry,
            signatures,
            committed: CommittedValue { nonce, data },
        })
    }
}

// ============================================
// Signed heads and log artifacts
// ============================================

/// A signed snapshot of the map at one epoch. The wire encoding (signature
/// included) is the leaf of the append-only head log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMapHead {
    /// The directory this head belongs to
    pub directory_id: String,
    /// Epoch number; dense and strictly increasing from 0
    pub epoch: u64,
    /// Root hash of the sparse map tree at this epoch
    pub root_hash: Digest,
    /// Publication time in nanoseconds since the Unix epoch
    pub timestamp_ns: u64,
    /// Hash of the directory's immutable metadata
    pub metadata_hash: Digest,
    /// Ed25519 signature by the map key over the domain-separated preimage
    pub signature: Vec<u8>,
}

impl SignedMapHead {
    /// The domain-separated byte string the map key signs:
    /// `"SMH" || u64(epoch) || directory_id || root || u64(ts_ns) || meta_hash`
    pub fn signing_preimage(
        directory_id: &str,
        epoch: u64,
        root_hash: &Digest,
        timestamp_ns: u64,
        metadata_hash: &Digest,
    ) -> Vec<u8> {
        let mut out = b"SMH".to_vec();
        put_u64(&mut out, epoch);
        put_bytes(&mut out, directory_id.as_bytes());
        out.extend_from_slice(root_hash);
        put_u64(&mut out, timestamp_ns);
        out.extend_from_slice(metadata_hash);
        out
    }

    /// Canonical encoding including the signature; the head-log leaf bytes
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_bytes(&mut out, self.directory_id.as_bytes());
        put_u64(&mut out, self.epoch);
        out.extend_from_slice(&self.root_hash);
        put_u64(&mut out, self.timestamp_ns);
        out.extend_from_slice(&self.metadata_hash);
        put_bytes(&mut out, &self.signature);
        out
    }

    /// SHA-256 of the wire encoding; what monitors attest to
    pub fn head_hash(&self) -> Digest {
        hash(&self.to_wire())
    }
}

/// A signed root of the head log at some size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedLogRoot {
    /// Number of leaves (equivalently, epochs) covered
    pub tree_size: u64,
    /// RFC 6962 root over the first `tree_size` head-log leaves
    pub root_hash: Digest,
    /// Ed25519 signature by the log key over `"SLR" || u64(size) || root`
    pub signature: Vec<u8>,
}

impl SignedLogRoot {
    /// The domain-separated byte string the log key signs
    pub fn signing_preimage(tree_size: u64, root_hash: &Digest) -> Vec<u8> {
        let mut out = b"SLR".to_vec();
        put_u64(&mut out, tree_size);
        out.extend_from_slice(root_hash);
        out
    }
}

/// The client's durable record of the most recently verified log view.
/// Updated only after a full response verification succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedLogRoot {
    /// Size of the log at the trusted view; 0 means no view yet
    pub tree_size: u64,
    /// Root at that size; meaningless when `tree_size` is 0
    pub root_hash: Digest,
}

impl TrustedLogRoot {
    /// The state of a client that has never verified a response
    pub fn genesis() -> Self {
        Self {
            tree_size: 0,
            root_hash: crate::hash::EMPTY_DIGEST,
        }
    }
}

// ============================================
// Proofs
// ============================================

/// Inclusion (or absence) proof for one index in the sparse map tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeProof {
    /// The leaf node hash at depth 256; the per-depth empty constant when the
    /// index is unoccupied
    pub leaf_hash: Digest,
    /// Sibling hashes along the path, root side first; always 256 entries
    pub siblings: Vec<Digest>,
}

/// Proof that a head-log leaf is included in a log of a given size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogInclusionProof {
    /// Position of the leaf, which equals the head's epoch
    pub leaf_index: u64,
    /// Size of the log the proof is rooted in
    pub tree_size: u64,
    /// Audit path, leaf side first (RFC 6962 ordering)
    pub path: Vec<Digest>,
}

/// Proof that the log at one size is a prefix of the log at a later size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConsistencyProof {
    /// The earlier (trusted) size
    pub first_size: u64,
    /// The later size
    pub second_size: u64,
    /// Consistency path (RFC 6962 ordering)
    pub path: Vec<Digest>,
}

/// Everything a client needs to verify one `GetEntry` answer end to end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryResponse {
    /// VRF proof binding the queried identifier to its tree index
    pub vrf_proof: Vec<u8>,
    /// The entry at the index, absent if the identifier has no revision yet
    pub entry: Option<Entry>,
    /// Commitment opening for `entry`; present exactly when `entry` is
    pub committed: Option<CommittedValue>,
    /// Map tree inclusion/absence proof against `map_head.root_hash`
    pub tree_proof: TreeProof,
    /// The signed map head the proof is rooted in
    pub map_head: SignedMapHead,
    /// Proof that `map_head` sits at position `map_head.epoch` in the log
    pub log_inclusion: LogInclusionProof,
    /// Proof extending the client's trusted log view to this response's view
    pub log_consistency: LogConsistencyProof,
    /// The signed root of the log at `log_inclusion.tree_size`
    pub signed_log_root: SignedLogRoot,
}

/// The proof bundle for one epoch, the `GetEpoch` answer: a signed map head
/// together with the log evidence that places it in history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochResponse {
    /// The signed map head for the requested epoch
    pub map_head: SignedMapHead,
    /// Proof that `map_head` sits at position `map_head.epoch` in the log
    pub log_inclusion: LogInclusionProof,
    /// Proof extending the caller's trusted log view to this response's view
    pub log_consistency: LogConsistencyProof,
    /// The signed root of the log at `log_inclusion.tree_size`
    pub signed_log_root: SignedLogRoot,
}

// ============================================
// Mutations
// ============================================

/// Why the mutator refused an update. Rejections are persisted alongside the
/// mutation so that monitors replay identical decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    /// The update bytes did not decode canonically
    Malformed(String),
    /// `previous_hash` does not match the current revision
    WrongPrevious,
    /// No signature verified against an authorized key
    Unauthorized,
    /// The update re-submits the current revision
    Replay,
    /// The entry encoding exceeds [crate::MAX_ENTRY_BYTES]
    TooLarge(usize),
}

impl core::fmt::Display for Rejection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Rejection::Malformed(msg) => write!(f, "MALFORMED: {msg}"),
            Rejection::WrongPrevious => write!(f, "WRONG_PREVIOUS: previous entry hash mismatch"),
            Rejection::Unauthorized => {
                write!(f, "UNAUTHORIZED: no valid signature by an authorized key")
            }
            Rejection::Replay => write!(f, "REPLAY: update matches the current entry"),
            Rejection::TooLarge(size) => {
                write!(f, "TOO_LARGE: entry encodes to {size} bytes")
            }
        }
    }
}

/// The terminal state of one sequenced mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationOutcome {
    /// The mutation passed validation and contributed to the epoch
    Applied,
    /// The mutation failed validation; the map is unchanged by it
    Rejected(Rejection),
}

/// An update waiting in the durable intake queue. Ids are storage-assigned
/// and strictly increasing; they fix the evaluation order within an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMutation {
    /// Storage-assigned monotone id
    pub id: u64,
    /// Tree coordinate of the target identifier
    pub index: Index,
    /// Canonical [EntryUpdate] bytes
    pub update: Vec<u8>,
}

/// The persisted record of one mutation processed in one epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Epoch the mutation was sequenced into
    pub epoch: u64,
    /// Position within the epoch's ordered batch
    pub sequence: u64,
    /// The queue id the mutation arrived with
    pub mutation_id: u64,
    /// Tree coordinate of the target identifier
    pub index: Index,
    /// Hash of the entry the mutation was evaluated against, or
    /// [NIL_ENTRY_HASH] for a first claim
    pub old_entry_hash: Digest,
    /// Hash of the accepted new entry; [NIL_ENTRY_HASH] when rejected
    pub new_entry_hash: Digest,
    /// Canonical [EntryUpdate] bytes, for replay
    pub update: Vec<u8>,
    /// Applied or rejected-with-reason
    pub outcome: MutationOutcome,
}

// ============================================
// Directory metadata
// ============================================

/// The immutable configuration of one directory: its identity, public keys
/// and epoch cadence. Hash of the canonical encoding is carried in every map
/// head as `metadata_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryParams {
    /// Namespace identifier
    pub directory_id: String,
    /// VRF public key
    pub vrf_public_key: PublicKeyBytes,
    /// Map-head signing public key
    pub map_public_key: PublicKeyBytes,
    /// Log-root signing public key
    pub log_public_key: PublicKeyBytes,
    /// Shortest allowed gap between epochs, in milliseconds
    pub min_interval_ms: u64,
    /// Longest allowed gap between epochs, in milliseconds; an empty epoch is
    /// forced when it elapses
    pub max_interval_ms: u64,
}

impl DirectoryParams {
    /// Hash of the canonical metadata encoding, bound into every map head
    pub fn metadata_hash(&self) -> Digest {
        let mut out = Vec::new();
        put_bytes(&mut out, self.directory_id.as_bytes());
        out.extend_from_slice(&self.vrf_public_key);
        out.extend_from_slice(&self.map_public_key);
        out.extend_from_slice(&self.log_public_key);
        put_u64(&mut out, self.min_interval_ms);
        put_u64(&mut out, self.max_interval_ms);
        hash(&out)
    }
}

/// An epoch paired with the root hash published for it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochHash(pub u64, pub Digest);

impl EpochHash {
    /// The epoch
    pub fn epoch(&self) -> u64 {
        self.0
    }
    /// The root hash
    pub fn hash(&self) -> Digest {
        self.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_entry(rng: &mut StdRng) -> Entry {
        Entry {
            commitment: hash(b"commitment"),
            authorized_keys: vec![
                {
                    let mut k = [0u8; 32];
                    rng.fill(&mut k);
                    k
                },
                {
                    let mut k = [0u8; 32];
                    rng.fill(&mut k);
                    k
                },
            ],
            previous_hash: NIL_ENTRY_HASH,
        }
    }

    #[test]
    fn entry_wire_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        let entry = sample_entry(&mut rng);
        let decoded = Entry::from_wire(&entry.to_wire()).unwrap();
        assert_eq!(entry, decoded);
        assert_eq!(entry.hash(), decoded.hash());
    }

    #[test]
    fn entry_decode_rejects_trailing_bytes() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut bytes = sample_entry(&mut rng).to_wire();
        bytes.push(0);
        assert!(Entry::from_wire(&bytes).is_err());
    }

    #[test]
    fn update_wire_round_trip() {
        let mut rng = StdRng::seed_from_u64(11);
        let update = EntryUpdate {
            new_entry: sample_entry(&mut rng),
            signatures: vec![vec![1u8; 64], vec![2u8; 64]],
            committed: CommittedValue {
                nonce: [9u8; NONCE_BYTES],
                data: b"payload".to_vec(),
            },
        };
        let decoded = EntryUpdate::from_wire(&update.to_wire()).unwrap();
        assert_eq!(update, decoded);
    }

    #[test]
    fn index_bits_are_msb_first() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0b1000_0001;
        bytes[31] = 0b0000_0001;
        let index = Index::from(bytes);
        assert_eq!(index.bit(0), 1);
        assert_eq!(index.bit(1), 0);
        assert_eq!(index.bit(7), 1);
        assert_eq!(index.bit(255), 1);
        assert_eq!(index.bit(254), 0);
    }

    #[test]
    fn distinct_identifier_splits_have_distinct_vrf_inputs() {
        assert_ne!(
            vrf_input(&AppId::from("ab"), &UserId::from("c")),
            vrf_input(&AppId::from("a"), &UserId::from("bc")),
        );
    }
}
