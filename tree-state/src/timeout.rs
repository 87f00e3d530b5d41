// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Timeout message aggregation (spec.md §4.9): one finalizer's timeout
//! per round, reporting the highest QC round it has observed. Messages
//! are indexed by `qc_round` because signers may disagree on it; once
//! the committee's `signature_threshold` is met across all buckets, one
//! hybrid `verify_aggregate_multi` call covers every distinct message.

use crate::{Engine, Storage, TimeoutAccumulator, TreeState};
use consensus_types::{signing, TimeoutCertificate, TimeoutMessage};
use primitives::{Flag, ReceiveResult, Verdict};

pub fn receive_timeout_message(
    tree: &mut TreeState,
    storage: &Storage,
    engine: &Engine,
    tm: TimeoutMessage,
) -> anyhow::Result<Verdict> {
    if tree.consensus_shutdown {
        return Ok(Verdict::plain(ReceiveResult::ConsensusShutdown));
    }
    if tm.epoch > tree.round_status.current_epoch {
        return Ok(Verdict::plain(ReceiveResult::Unverifiable));
    }
    if tm.round < tree.round_status.current_round {
        return Ok(Verdict::plain(ReceiveResult::Stale));
    }
    if tm.round > tree.round_status.current_round {
        return Ok(Verdict::plain(ReceiveResult::Unverifiable));
    }

    let committee = engine.committee_provider.committee_for_epoch(tm.epoch)?;
    let Some(member) = committee.member(tm.signer) else {
        return Ok(Verdict::plain(ReceiveResult::Invalid));
    };

    let double_signing = match tree.timeout_round.signer_messages.get(&tm.signer) {
        Some(prior) if *prior == tm => return Ok(Verdict::plain(ReceiveResult::Duplicate)),
        Some(_) => true,
        None => false,
    };

    let signing_bytes = signing::timeout_signing_bytes(tree.genesis_hash, tm.round, tm.qc_round);
    if !engine.signature_scheme.verify(&signing_bytes, &member.public_key, &tm.signature) {
        return Ok(Verdict::flagged(ReceiveResult::Invalid, Flag::InvalidSignature));
    }

    tree.timeout_round.signer_messages.insert(tm.signer, tm.clone());
    let accumulator = tree
        .timeout_round
        .accumulator
        .get_or_insert_with(|| TimeoutAccumulator::empty(committee.size()));
    if !accumulator.signers_committed.contains(tm.signer) {
        accumulator.weight += member.weight;
        accumulator.signers_committed.insert(tm.signer);
    }
    accumulator
        .by_qc_round
        .entry(tm.qc_round)
        .or_insert_with(|| consensus_types::FinalizerSet::empty(committee.size()))
        .insert(tm.signer);
    accumulator
        .messages
        .push((signing_bytes, member.public_key.clone(), tm.signature.clone()));
    let weight = accumulator.weight;

    let verdict = if double_signing {
        Verdict::flagged(ReceiveResult::Success, Flag::DoubleSigning)
    } else {
        Verdict::ok()
    };

    if committee.meets_threshold(weight, engine.config.signature_threshold) {
        let accumulator = tree
            .timeout_round
            .accumulator
            .as_ref()
            .expect("just populated above");
        let message_refs: Vec<(&[u8], primitives::crypto::PublicKey)> = accumulator
            .messages
            .iter()
            .map(|(bytes, key, _)| (bytes.as_slice(), key.clone()))
            .collect();
        let signatures: Vec<primitives::crypto::Signature> =
            accumulator.messages.iter().map(|(_, _, sig)| sig.clone()).collect();
        let aggregate_signature = engine.signature_scheme.aggregate(&signatures);
        anyhow::ensure!(
            engine.signature_scheme.verify_aggregate_multi(&message_refs, &aggregate_signature),
            "freshly aggregated timeout signatures failed their own verification"
        );
        let tc = TimeoutCertificate {
            round: tm.round,
            by_qc_round: accumulator.by_qc_round.clone(),
            aggregate_signature,
        };
        let evidence_qc_round = tc.max_qc_round().unwrap_or(tree.round_status.highest_qc.round);
        let _ = evidence_qc_round;
        crate::round::advance_round(tree, engine, tm.round + 1, crate::round::AdvanceEvidence::Tc(tc));
    }

    Ok(verdict)
}
