// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::quorum_cert::QuorumCertificate;
use primitives::HashValue;
use serde::{Deserialize, Serialize};

/// `(finalized_qc, successor_qc, successor_proof)` (spec.md §3). Witness
/// that `successor_qc.round = finalized_qc.round + 1` and
/// `successor_qc.block_hash = H(header(round, epoch, finalized_qc.block_hash)
/// || successor_proof)` — existence of this entry finalizes
/// `finalized_qc.block` and every ancestor back to the previously
/// finalized block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizationEntry {
    pub finalized_qc: QuorumCertificate,
    pub successor_qc: QuorumCertificate,
    pub successor_proof: HashValue,
}

impl FinalizationEntry {
    /// Structural check of the round/hash relationship between the two
    /// QCs (spec.md §3 invariant). Does not verify signatures — that is
    /// the caller's job via `SignatureScheme`.
    pub fn is_structurally_valid(&self) -> bool {
        self.successor_qc.round == self.finalized_qc.round + 1
            && self.successor_qc.epoch == self.finalized_qc.epoch
            && self.successor_qc.block_hash
                == Self::expected_successor_block_hash(
                    self.successor_qc.round,
                    self.successor_qc.epoch,
                    self.finalized_qc.block_hash,
                    self.successor_proof,
                )
    }

    pub fn expected_successor_block_hash(
        round: primitives::Round,
        epoch: primitives::Epoch,
        finalized_block_hash: HashValue,
        successor_proof: HashValue,
    ) -> HashValue {
        let header = crate::block::header_hash(round, epoch, finalized_block_hash);
        HashValue::combine(&header, &successor_proof)
    }

    /// Whether this entry opens a new epoch (spec.md §3: "a finalization
    /// entry, if present, attests that the block opens a new epoch").
    pub fn opens_new_epoch(&self, finalized_block_epoch: primitives::Epoch) -> bool {
        self.successor_qc.epoch != finalized_block_epoch
    }
}
