// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Quorum message aggregation (spec.md §4.8): one finalizer's vote per
//! round, accumulated per target block hash until the committee's
//! `signature_threshold` is met, at which point a [`QuorumCertificate`]
//! is formed and handed to [`crate::round::process_certified_block`].

use crate::{BlockStatus, Engine, QuorumAccumulator, Storage, TreeState};
use consensus_types::{signing, QuorumCertificate, QuorumMessage};
use primitives::{Flag, ReceiveResult, Verdict};

pub fn receive_quorum_message(
    tree: &mut TreeState,
    storage: &Storage,
    engine: &Engine,
    qm: QuorumMessage,
) -> anyhow::Result<Verdict> {
    if tree.consensus_shutdown {
        return Ok(Verdict::plain(ReceiveResult::ConsensusShutdown));
    }
    if qm.epoch > tree.round_status.current_epoch {
        return Ok(Verdict::plain(ReceiveResult::Unverifiable));
    }
    if qm.round < tree.round_status.current_round {
        return Ok(Verdict::plain(ReceiveResult::Stale));
    }
    if qm.round > tree.round_status.current_round {
        // Only the current round's accumulator exists; a vote for a
        // future round cannot yet be validated against a committee this
        // node has not elected into scope.
        return Ok(Verdict::plain(ReceiveResult::Unverifiable));
    }

    let committee = engine.committee_provider.committee_for_epoch(qm.epoch)?;
    let Some(member) = committee.member(qm.signer) else {
        return Ok(Verdict::plain(ReceiveResult::Invalid));
    };

    let double_signing = match tree.quorum_round.signer_messages.get(&qm.signer) {
        Some(prior) if *prior == qm => return Ok(Verdict::plain(ReceiveResult::Duplicate)),
        Some(_) => true,
        None => false,
    };

    let signing_bytes = signing::quorum_signing_bytes(tree.genesis_hash, qm.block_hash);
    if !engine.signature_scheme.verify(&signing_bytes, &member.public_key, &qm.signature) {
        return Ok(Verdict::flagged(ReceiveResult::Invalid, Flag::InvalidSignature));
    }

    match tree.block_status(&qm.block_hash) {
        BlockStatus::Finalized => {
            return Ok(Verdict::flagged(ReceiveResult::Invalid, Flag::RoundInconsistency));
        }
        BlockStatus::Dead => return Ok(Verdict::plain(ReceiveResult::Invalid)),
        BlockStatus::Unknown | BlockStatus::Pending => {
            return Ok(Verdict::plain(ReceiveResult::Unverifiable));
        }
        BlockStatus::Alive => {
            let node = tree
                .node(&qm.block_hash)
                .expect("BlockStatus::Alive implies a resolvable BlockNode");
            if node.block.round != qm.round || node.block.epoch != qm.epoch {
                return Ok(Verdict::flagged(ReceiveResult::Invalid, Flag::RoundInconsistency));
            }
        }
    }

    tree.quorum_round.signer_messages.insert(qm.signer, qm.clone());
    let weight = {
        let entry = tree
            .quorum_round
            .by_block
            .entry(qm.block_hash)
            .or_insert_with(|| QuorumAccumulator::empty(committee.size()));
        if !entry.finalizer_set.contains(qm.signer) {
            entry.weight += member.weight;
            entry.signatures.push(qm.signature.clone());
            entry.finalizer_set.insert(qm.signer);
        }
        entry.weight
    };

    let verdict = if double_signing {
        Verdict::flagged(ReceiveResult::Success, Flag::DoubleSigning)
    } else {
        Verdict::ok()
    };

    if committee.meets_threshold(weight, engine.config.signature_threshold) {
        let entry = tree.quorum_round.by_block.get(&qm.block_hash).expect("just inserted above");
        let qc = QuorumCertificate {
            block_hash: qm.block_hash,
            round: qm.round,
            epoch: qm.epoch,
            aggregate_signature: engine.signature_scheme.aggregate(&entry.signatures),
            finalizer_set: entry.finalizer_set.clone(),
        };
        crate::round::process_certified_block(tree, storage, engine, qc)?;
    }

    Ok(verdict)
}
