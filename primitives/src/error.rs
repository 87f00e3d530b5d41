// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Behavioral error kinds, named after spec.md §7. These are the kinds a
/// caller is expected to branch on; ordinary validation failures that
/// only ever produce a [`crate::ReceiveResult`] are not represented as
/// `Error` at all (they never escape the receive entrypoint that
/// produced them).
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Malformed input. Reject; flag the sender if it is a known
    /// finalizer/baker.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Internal state inconsistency. Not locally recoverable.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The blob store failed at the I/O level. Fatal: abort the current
    /// operation without mutating any index.
    #[error("blob store I/O error: {0}")]
    BlobStoreIo(#[from] std::io::Error),

    /// A trie operation could not complete (malformed stem split, bad
    /// tag byte on deserialize, etc).
    #[error("trie error: {0}")]
    Trie(String),

    /// An LFMB-tree operation addressed an index past the tree's size.
    #[error("LFMB tree error: {0}")]
    Lfmb(String),

    /// The account map's LMDB-backed layer failed or was asked to
    /// resolve an index beyond the current account-table size.
    #[error("account map error: {0}")]
    AccountMap(String),

    /// Signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,

    /// A certificate or finalization proof failed structural
    /// validation.
    #[error("invalid proof: {0}")]
    InvalidProof(String),
}

impl ConsensusError {
    /// Whether this error must propagate to the top of the consensus
    /// task and stop it, per the propagation policy of spec.md §7.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsensusError::BlobStoreIo(_) | ConsensusError::InvariantViolation(_)
        )
    }
}
