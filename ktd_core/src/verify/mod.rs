// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Client-side verification. [entry::verify_entry_response] is the single
//! end-to-end check a relying party runs over a `GetEntry` answer; the
//! submodules expose the individual proof verifiers it composes.

pub mod entry;
pub mod epoch;
pub mod tree;

use crate::commitment::CommitmentError;
use crate::ecvrf::VrfError;
use crate::sign::SigError;

pub use entry::{verify_entry_response, VerifiedEntry};
pub use epoch::{verify_epoch_response, verify_map_head_in_log};

/// Proof verification error types. Every variant is terminal for the current
/// operation: verification failures are never retried, and a client updates
/// no trusted state when one is raised.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum VerificationError {
    /// The VRF proof failed; BAD_VRF
    Vrf(VrfError),
    /// The commitment opening failed; BAD_COMMITMENT
    Commitment(CommitmentError),
    /// The map tree inclusion proof failed; BAD_PROOF
    TreeProof(String),
    /// The map head signature or binding failed; BAD_SMH
    MapHead(String),
    /// The log inclusion proof failed; BAD_INCLUSION
    LogInclusion(String),
    /// The log consistency proof failed; BAD_CONSISTENCY
    LogConsistency(String),
    /// The signed log root failed; BAD_LOG_SIG
    LogSignature(SigError),
    /// The response bundle was internally inconsistent; INVALID_ARGUMENT
    Response(String),
}

impl core::fmt::Display for VerificationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let code = match &self {
            VerificationError::Vrf(err) => format!("BAD_VRF - {err}"),
            VerificationError::Commitment(err) => format!("BAD_COMMITMENT - {err}"),
            VerificationError::TreeProof(err) => format!("BAD_PROOF - {err}"),
            VerificationError::MapHead(err) => format!("BAD_SMH - {err}"),
            VerificationError::LogInclusion(err) => format!("BAD_INCLUSION - {err}"),
            VerificationError::LogConsistency(err) => format!("BAD_CONSISTENCY - {err}"),
            VerificationError::LogSignature(err) => format!("BAD_LOG_SIG - {err}"),
            VerificationError::Response(err) => format!("INVALID_ARGUMENT - {err}"),
        };
        write!(f, "Verification error {code}")
    }
}

impl From<VrfError> for VerificationError {
    fn from(input: VrfError) -> Self {
        VerificationError::Vrf(input)
    }
}

impl From<CommitmentError> for VerificationError {
    fn from(input: CommitmentError) -> Self {
        VerificationError::Commitment(input)
    }
}
