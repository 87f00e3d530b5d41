// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Round advancement and epoch change (spec.md §4.10): resetting the
//! per-round quorum/timeout accumulators, recording the evidence that
//! justified the advance, and — when a block carries an epoch-opening
//! finalization entry — recomputing the leadership-election nonce.

use crate::{Engine, QuorumRoundState, Storage, TimeoutRoundState, TreeState};
use consensus_types::{FinalizationEntry, QuorumCertificate, TimeoutCertificate};
use primitives::{HashValue, Round};
use std::time::Duration;

/// What justified a round advance: a QC certifies the previous round
/// directly, a TC attests a quorum of the committee timed it out.
pub enum AdvanceEvidence {
    Qc(QuorumCertificate),
    Tc(TimeoutCertificate),
}

/// Advance to round `to` if it is beyond the current round, resetting
/// the per-round accumulator tables and recording `evidence` into
/// `round_status`. Returns the duration the caller should arm its next
/// timeout timer for (spec.md §4.10: `timeout_base *
/// growth_factor^consecutive_timeouts`) — arming the actual timer is a
/// background-task concern this crate does not own (spec.md §5).
pub fn advance_round(tree: &mut TreeState, engine: &Engine, to: Round, evidence: AdvanceEvidence) -> Duration {
    if to <= tree.round_status.current_round {
        return engine.config.timeout_for(tree.consecutive_timeouts);
    }

    match &evidence {
        AdvanceEvidence::Qc(_) => tree.consecutive_timeouts = 0,
        AdvanceEvidence::Tc(_) => tree.consecutive_timeouts += 1,
    }

    tree.round_status.current_round = to;
    tree.quorum_round = QuorumRoundState::for_round(to);
    tree.timeout_round = TimeoutRoundState::for_round(to);

    match evidence {
        AdvanceEvidence::Qc(qc) => {
            tree.round_status.highest_qc = qc;
            tree.round_status.previous_round_tc = None;
        }
        AdvanceEvidence::Tc(tc) => {
            tree.round_status.previous_round_tc = Some(tc);
        }
    }

    engine.config.timeout_for(tree.consecutive_timeouts)
}

/// A certified block `qc.block_hash`: advance the round past it, and if
/// its own embedded `parent_qc` plus this new `qc` together witness a
/// finalization, run it (spec.md §4.8's "process_certified_block").
pub fn process_certified_block(
    tree: &mut TreeState,
    storage: &Storage,
    engine: &Engine,
    qc: QuorumCertificate,
) -> anyhow::Result<()> {
    let certified = tree.node(&qc.block_hash);
    advance_round(tree, engine, qc.round + 1, AdvanceEvidence::Qc(qc.clone()));

    let Some(certified) = certified else {
        return Ok(());
    };
    let Some(parent_qc) = certified.block.parent_qc.clone() else {
        return Ok(());
    };
    if parent_qc.round + 1 != qc.round || parent_qc.epoch != qc.epoch {
        return Ok(());
    }

    let entry = FinalizationEntry {
        finalized_qc: parent_qc,
        successor_qc: qc,
        successor_proof: certified.block.quasi_hash(),
    };
    if entry.is_structurally_valid() {
        crate::finalization::finalize(tree, storage, engine, entry)?;
    }
    Ok(())
}

/// Recompute the leadership-election nonce (spec.md §4.10:
/// `H("NONCE" || previous_nonce || new_epoch || finalized_block_hash)`)
/// when `entry` opens a new epoch. A no-op otherwise.
pub fn apply_epoch_change(tree: &mut TreeState, entry: &FinalizationEntry) -> anyhow::Result<()> {
    if !entry.opens_new_epoch(entry.finalized_qc.epoch) {
        return Ok(());
    }
    let new_epoch = entry.successor_qc.epoch;
    let previous_nonce = tree.round_status.leadership_election_nonce;
    let new_nonce = HashValue::combine_tagged(
        b"NONCE",
        &[
            previous_nonce.as_bytes(),
            &new_epoch.to_be_bytes(),
            entry.finalized_qc.block_hash.as_bytes(),
        ],
    );
    tree.round_status.current_epoch = new_epoch;
    tree.round_status.leadership_election_nonce = new_nonce;
    tree.round_status.latest_epoch_finalization_entry = Some(entry.clone());
    Ok(())
}
