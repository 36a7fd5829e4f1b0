// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Errors for the server-side data structures and processes.

use core::fmt;

use ktd_core::commitment::CommitmentError;
use ktd_core::ecvrf::VrfError;
use ktd_core::types::{Index, Rejection};
use ktd_core::verify::VerificationError;

/// Symbolizes a KtdError, thrown by the directory server components
#[derive(Debug)]
pub enum KtdError {
    /// Error propagation
    Tree(TreeError),
    /// Error propagation
    Log(LogError),
    /// Error propagation
    Directory(DirectoryError),
    /// Error propagation
    Sequencer(SequencerError),
    /// Error propagation
    Storage(StorageError),
}

impl From<TreeError> for KtdError {
    fn from(error: TreeError) -> Self {
        Self::Tree(error)
    }
}

impl From<LogError> for KtdError {
    fn from(error: LogError) -> Self {
        Self::Log(error)
    }
}

impl From<DirectoryError> for KtdError {
    fn from(error: DirectoryError) -> Self {
        Self::Directory(error)
    }
}

impl From<SequencerError> for KtdError {
    fn from(error: SequencerError) -> Self {
        Self::Sequencer(error)
    }
}

impl From<StorageError> for KtdError {
    fn from(error: StorageError) -> Self {
        Self::Storage(error)
    }
}

impl fmt::Display for KtdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tree(err) => write!(f, "Tree error: {err}"),
            Self::Log(err) => write!(f, "Log error: {err}"),
            Self::Directory(err) => write!(f, "Directory error: {err}"),
            Self::Sequencer(err) => write!(f, "Sequencer error: {err}"),
            Self::Storage(err) => write!(f, "Storage error: {err}"),
        }
    }
}

/// An error thrown by the sparse map tree
#[derive(Debug, PartialEq, Eq)]
pub enum TreeError {
    /// Two leaves in one batch targeted the same index; a programming error
    /// in the caller. DUPLICATE_INDEX
    DuplicateIndex(Index),
    /// Error propagation
    Storage(StorageError),
}

impl From<StorageError> for TreeError {
    fn from(error: StorageError) -> Self {
        Self::Storage(error)
    }
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateIndex(index) => {
                write!(f, "DUPLICATE_INDEX: two updates target index {index}")
            }
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

/// An error thrown by the append-only head log
#[derive(Debug, PartialEq, Eq)]
pub enum LogError {
    /// An append whose epoch is not the current log size
    NonContiguousEpoch {
        /// The size the log is at
        expected: u64,
        /// The epoch the append carried
        got: u64,
    },
    /// A requested head does not exist
    HeadNotFound(u64),
    /// Error propagation
    Storage(StorageError),
}

impl From<StorageError> for LogError {
    fn from(error: StorageError) -> Self {
        Self::Storage(error)
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonContiguousEpoch { expected, got } => write!(
                f,
                "appending epoch {got} to a log of size {expected}; epochs must be dense"
            ),
            Self::HeadNotFound(epoch) => write!(f, "NOT_FOUND: no head for epoch {epoch}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

/// The errors surfaced by the directory's read and intake operations
#[derive(Debug)]
pub enum DirectoryError {
    /// The requested object does not exist. NOT_FOUND
    NotFound(String),
    /// A request parameter was unusable. INVALID_ARGUMENT
    InvalidArgument(String),
    /// An update was refused at admission with a mutation rejection reason
    Rejected(Rejection),
    /// An update's commitment opening did not match. BAD_COMMITMENT
    Commitment(CommitmentError),
    /// Error propagation
    Vrf(VrfError),
    /// Error propagation
    Tree(TreeError),
    /// Error propagation
    Log(LogError),
    /// Error propagation
    Storage(StorageError),
}

impl From<StorageError> for DirectoryError {
    fn from(error: StorageError) -> Self {
        Self::Storage(error)
    }
}

impl From<TreeError> for DirectoryError {
    fn from(error: TreeError) -> Self {
        Self::Tree(error)
    }
}

impl From<LogError> for DirectoryError {
    fn from(error: LogError) -> Self {
        Self::Log(error)
    }
}

impl From<VrfError> for DirectoryError {
    fn from(error: VrfError) -> Self {
        Self::Vrf(error)
    }
}

impl From<CommitmentError> for DirectoryError {
    fn from(error: CommitmentError) -> Self {
        Self::Commitment(error)
    }
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "NOT_FOUND: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "INVALID_ARGUMENT: {msg}"),
            Self::Rejected(reason) => write!(f, "update rejected: {reason}"),
            Self::Commitment(err) => write!(f, "{err}"),
            Self::Vrf(err) => write!(f, "{err}"),
            Self::Tree(err) => write!(f, "tree error: {err}"),
            Self::Log(err) => write!(f, "log error: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

/// An error thrown while sequencing an epoch
#[derive(Debug)]
pub enum SequencerError {
    /// Another sequencer holds the exclusive lease for this directory
    LeaseHeld(String),
    /// The directory has no genesis epoch yet
    Uninitialized,
    /// A signer's public key does not match the directory metadata
    KeyMismatch(String),
    /// The run loop observed its cancellation signal
    Cancelled,
    /// Error propagation
    Tree(TreeError),
    /// Error propagation
    Log(LogError),
    /// Error propagation
    Storage(StorageError),
}

impl From<StorageError> for SequencerError {
    fn from(error: StorageError) -> Self {
        Self::Storage(error)
    }
}

impl From<TreeError> for SequencerError {
    fn from(error: TreeError) -> Self {
        Self::Tree(error)
    }
}

impl From<LogError> for SequencerError {
    fn from(error: LogError) -> Self {
        Self::Log(error)
    }
}

impl fmt::Display for SequencerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LeaseHeld(holder) => {
                write!(f, "CONFLICT: sequencer lease held by {holder}")
            }
            Self::Uninitialized => write!(f, "directory has no genesis epoch"),
            Self::KeyMismatch(msg) => write!(f, "INVALID_ARGUMENT: {msg}"),
            Self::Cancelled => write!(f, "epoch tick cancelled"),
            Self::Tree(err) => write!(f, "tree error: {err}"),
            Self::Log(err) => write!(f, "log error: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

/// An error thrown by a monitor while processing an epoch
#[derive(Debug)]
pub enum MonitorError {
    /// The monitor already emitted an inconsistency and will not advance
    Halted(u64),
    /// The supplied epoch does not follow the last processed one
    EpochGap {
        /// The epoch the monitor expected next
        expected: u64,
        /// The epoch that was supplied
        got: u64,
    },
    /// The epoch's head or log evidence failed cryptographic verification
    Verification(VerificationError),
    /// Error propagation
    Tree(TreeError),
    /// Error propagation
    Storage(StorageError),
}

impl From<VerificationError> for MonitorError {
    fn from(error: VerificationError) -> Self {
        Self::Verification(error)
    }
}

impl From<TreeError> for MonitorError {
    fn from(error: TreeError) -> Self {
        Self::Tree(error)
    }
}

impl From<StorageError> for MonitorError {
    fn from(error: StorageError) -> Self {
        Self::Storage(error)
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halted(epoch) => write!(
                f,
                "monitor halted at epoch {epoch} after reporting an inconsistency"
            ),
            Self::EpochGap { expected, got } => {
                write!(f, "expected epoch {expected}, was handed {got}")
            }
            Self::Verification(err) => write!(f, "{err}"),
            Self::Tree(err) => write!(f, "tree error: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

/// Represents a storage-layer error
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum StorageError {
    /// The requested record was not found. NOT_FOUND
    NotFound(String),
    /// The storage backend could not be reached. UNAVAILABLE; retried
    Unavailable(String),
    /// A per-operation deadline elapsed while retrying. DEADLINE
    Deadline(String),
    /// A write conflicted with a concurrent writer. CONFLICT; retried
    Conflict(String),
    /// A batched write could not be applied atomically
    Transaction(String),
}

impl StorageError {
    /// Whether an operation that raised this error should be retried with
    /// backoff. Verification and validation failures never reach here;
    /// only backend availability and contention qualify.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Conflict(_))
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "NOT_FOUND: {msg}"),
            Self::Unavailable(msg) => write!(f, "UNAVAILABLE: {msg}"),
            Self::Deadline(msg) => write!(f, "DEADLINE: {msg}"),
            Self::Conflict(msg) => write!(f, "CONFLICT: {msg}"),
            Self::Transaction(msg) => write!(f, "transaction failed: {msg}"),
        }
    }
}
