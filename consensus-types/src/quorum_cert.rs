// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::finalizer_set::FinalizerSet;
use primitives::crypto::AggregateSignature;
use primitives::{Epoch, HashValue, Round};
use serde::{Deserialize, Serialize};

/// `(block_hash, round, epoch, aggregate_bls_signature, finalizer_set)`
/// (spec.md §3). A QC attests that at least `signature_threshold` of
/// `epoch`'s committee weight signed a quorum message for `block_hash`
/// at `round`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub block_hash: HashValue,
    pub round: Round,
    pub epoch: Epoch,
    pub aggregate_signature: AggregateSignature,
    pub finalizer_set: FinalizerSet,
}

impl QuorumCertificate {
    /// A manufactured QC for the genesis block: round/epoch 0, no real
    /// signers (nothing needed signing a block that exists by fiat).
    pub fn genesis(genesis_hash: HashValue, committee_size: usize) -> Self {
        QuorumCertificate {
            block_hash: genesis_hash,
            round: 0,
            epoch: 0,
            aggregate_signature: AggregateSignature(Vec::new()),
            finalizer_set: FinalizerSet::empty(committee_size),
        }
    }
}
