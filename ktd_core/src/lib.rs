// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Core utilities for the `ktd` key transparency directory and its clients.
//! This crate contains (1) hashing and canonical wire encoding, (2) the ECVRF
//! used to derive tree coordinates from user identifiers, (3) the hiding
//! commitment scheme over entry payloads, (4) domain-separated signing of map
//! heads and log roots, and (5) the complete client-side verification of an
//! entry response.
//!
//! # How identifiers become tree leaves
//!
//! A directory entry is addressed by an `(app_id, user_id)` pair. The server
//! evaluates a VRF over the canonical encoding of the pair, producing a
//! 256-bit [Index] together with a proof that any party can check against the
//! directory's VRF public key. The index is the coordinate of the entry's
//! leaf in a depth-256 sparse Merkle tree.
//!
//! The leaf itself never carries the entry payload. The server commits to the
//! payload with an HMAC-based hiding commitment (see [commitment]) and stores
//! `H(0x00 || index || depth || commitment)` in the tree. The commitment
//! nonce and payload travel out-of-band inside the update and are returned to
//! the account owner on lookup, so only parties that already know the payload
//! can check what the tree binds.
//!
//! Each published epoch is a [types::SignedMapHead] over the tree root, and
//! the sequence of signed map heads is itself committed into an RFC 6962
//! style append-only log (see [logtree]), which is what lets clients and
//! monitors detect equivocation or rewritten history.

#![warn(missing_docs)]

pub mod commitment;
pub mod ecvrf;
pub mod hash;
pub mod logtree;
pub mod sign;
pub mod verify;
pub mod wire;

pub mod types;
pub use types::*;

/// The depth of the sparse map tree. Every leaf sits at this depth and every
/// inclusion proof carries exactly this many sibling hashes.
pub const TREE_DEPTH: usize = 256;

/// Upper bound on the canonical encoding of a single [types::Entry].
/// Mutations whose entry encodes beyond this bound are rejected as TOO_LARGE.
pub const MAX_ENTRY_BYTES: usize = 16 * 1024;
