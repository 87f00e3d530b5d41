// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::finalizer_set::FinalizerSet;
use primitives::crypto::AggregateSignature;
use primitives::Round;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `(round, map<qc_round, finalizer_set>, aggregate_bls_signature)`
/// (spec.md §3). Records, for each distinct highest-QC-round signers
/// reported, which finalizers attested having seen that round — the
/// hybrid shape that lets one combined BLS verify cover signers who
/// disagreed on their own highest QC round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutCertificate {
    pub round: Round,
    pub by_qc_round: BTreeMap<Round, FinalizerSet>,
    pub aggregate_signature: AggregateSignature,
}

impl TimeoutCertificate {
    /// The highest QC round any signer of this TC reported having
    /// seen — what `advance_round` needs to pick up the right
    /// `highest_qc` alongside `previous_round_tc` (spec.md §4.10).
    pub fn max_qc_round(&self) -> Option<Round> {
        self.by_qc_round.keys().next_back().copied()
    }
}
