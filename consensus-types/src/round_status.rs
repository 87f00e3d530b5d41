// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::finalization::FinalizationEntry;
use crate::quorum_cert::QuorumCertificate;
use crate::timeout_cert::TimeoutCertificate;
use primitives::{Epoch, HashValue, Round};
use serde::{Deserialize, Serialize};

/// `(current_round, current_epoch, highest_qc, previous_round_tc?,
/// leadership_election_nonce, latest_epoch_finalization_entry?)`
/// (spec.md §3). The persistent round/epoch bookkeeping a node must
/// survive a restart with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStatus {
    pub current_round: Round,
    pub current_epoch: Epoch,
    pub highest_qc: QuorumCertificate,
    pub previous_round_tc: Option<TimeoutCertificate>,
    pub leadership_election_nonce: HashValue,
    pub latest_epoch_finalization_entry: Option<FinalizationEntry>,
}

impl RoundStatus {
    pub fn genesis(genesis_hash: HashValue, committee_size: usize, initial_nonce: HashValue) -> Self {
        RoundStatus {
            current_round: 1,
            current_epoch: 0,
            highest_qc: QuorumCertificate::genesis(genesis_hash, committee_size),
            previous_round_tc: None,
            leadership_election_nonce: initial_nonce,
            latest_epoch_finalization_entry: None,
        }
    }
}
