// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Block ingestion: the Unknown → Pending → Alive transition (spec.md
//! §4.7), verification, execution, and draining of any pending blocks
//! that were only waiting on this one's parent to become alive.

use crate::{BlockNode, Engine, Storage, TreeState};
use account_map::DifferenceMap;
use consensus_types::signing;
use consensus_types::Block;
use primitives::crypto::PublicKey;
use primitives::{Flag, HashValue, ReceiveResult, Verdict};
use std::sync::Arc;

pub fn receive_block(
    tree: &mut TreeState,
    storage: &Storage,
    engine: &Engine,
    block: Block,
) -> anyhow::Result<Verdict> {
    if tree.consensus_shutdown {
        return Ok(Verdict::plain(ReceiveResult::ConsensusShutdown));
    }
    let hash = block.hash();
    if tree.known(&hash) {
        return Ok(Verdict::plain(ReceiveResult::Duplicate));
    }

    let parent_hash = block.parent_hash();
    let mut to_drain = Vec::new();
    let verdict = match tree.node(&parent_hash) {
        None => {
            tree.insert_pending(hash, parent_hash, block);
            Verdict::plain(ReceiveResult::PendingBlock)
        }
        Some(parent) => {
            let verdict = process_block(tree, storage, engine, hash, block, &parent)?;
            if verdict.result == ReceiveResult::Success {
                to_drain.push(hash);
            }
            verdict
        }
    };

    while let Some(ready_parent) = to_drain.pop() {
        let Some(children) = tree.pending_by_parent.remove(&ready_parent) else {
            continue;
        };
        let Some(parent) = tree.node(&ready_parent) else {
            continue;
        };
        for child_hash in children {
            let Some(child_block) = tree.pending.remove(&child_hash) else {
                continue;
            };
            tree.remove_from_pending_queue(child_block.round, child_hash);
            let child_verdict = process_block(tree, storage, engine, child_hash, child_block, &parent)?;
            if child_verdict.result == ReceiveResult::Success {
                to_drain.push(child_hash);
            }
        }
    }

    Ok(verdict)
}

/// Verify, execute and (on success) insert `block` as a child of
/// `parent`, which is already known to be Alive or Finalized.
fn process_block(
    tree: &mut TreeState,
    storage: &Storage,
    engine: &Engine,
    hash: HashValue,
    block: Block,
    parent: &Arc<BlockNode>,
) -> anyhow::Result<Verdict> {
    match verify_block(tree, engine, hash, &block, parent) {
        VerifyOutcome::Invalid(flag) => {
            tree.mark_dead(hash);
            return Ok(match flag {
                Some(flag) => Verdict::flagged(ReceiveResult::Invalid, flag),
                None => Verdict::plain(ReceiveResult::Invalid),
            });
        }
        VerifyOutcome::Valid => {}
    }

    let output = engine.executor.execute(parent.state.as_ref(), &block.transactions)?;
    if output.state_hash != block.state_hash || output.outcomes_hash != block.transaction_outcomes_hash {
        tree.mark_dead(hash);
        return Ok(Verdict::plain(ReceiveResult::Invalid));
    }

    let mut accounts = DifferenceMap::new_child(Arc::clone(&parent.accounts));
    for (address, index) in &output.new_accounts {
        accounts.insert(*address, *index);
    }

    let finalization_entry = block.finalization_entry.clone();
    let round = block.round;
    let transactions = block.transactions.clone();

    let node = Arc::new(BlockNode {
        block,
        hash,
        height: parent.height + 1,
        parent_hash: parent.hash,
        state: Arc::new(output.state),
        accounts: Arc::new(accounts),
    });
    tree.alive.insert(hash, Arc::clone(&node));
    tree.focus_block = hash;

    for tx in &transactions {
        crate::transactions::receive_transaction(
            tree,
            storage,
            tx.clone(),
            consensus_types::TransactionOrigin::Block,
            Some(round),
        )?;
    }

    if let Some(entry) = finalization_entry {
        crate::round::apply_epoch_change(tree, &entry)?;
    }

    Ok(Verdict::ok())
}

enum VerifyOutcome {
    Valid,
    Invalid(Option<Flag>),
}

/// spec.md §4.7's block-verification checks: round succession, leader
/// eligibility, VRF nonce, signature, and the embedded parent QC (and,
/// if present, timeout certificate).
fn verify_block(tree: &TreeState, engine: &Engine, hash: HashValue, block: &Block, parent: &Arc<BlockNode>) -> VerifyOutcome {
    if block.round <= parent.block.round {
        return VerifyOutcome::Invalid(None);
    }
    if !block.round_succession_is_valid() {
        return VerifyOutcome::Invalid(None);
    }

    let committee = match engine.committee_provider.committee_for_epoch(block.epoch) {
        Ok(committee) => committee,
        Err(_) => return VerifyOutcome::Invalid(None),
    };

    let Some(baker) = &block.baker else {
        return VerifyOutcome::Invalid(None);
    };
    let leader = engine
        .leader_election
        .elect(tree.round_status.leadership_election_nonce, block.round, &committee);
    if baker.baker_id as u32 != leader {
        return VerifyOutcome::Invalid(Some(Flag::InvalidProof));
    }

    let seed = signing::vrf_nonce_seed_bytes(parent.block.vrf_nonce, block.round);
    if !engine
        .signature_scheme
        .verify_vrf_nonce(&seed, &baker.baker_key, block.vrf_nonce.as_bytes())
    {
        return VerifyOutcome::Invalid(Some(Flag::InvalidProof));
    }

    let Some(signature) = &block.signature else {
        return VerifyOutcome::Invalid(None);
    };
    if !engine
        .signature_scheme
        .verify(&signing::block_signing_bytes(hash), &baker.baker_key, signature)
    {
        return VerifyOutcome::Invalid(Some(Flag::InvalidSignature));
    }

    if let Some(outcome) = verify_quorum_certificate(tree, engine, block) {
        return outcome;
    }
    if let Some(outcome) = verify_timeout_certificate(tree, engine, block) {
        return outcome;
    }

    VerifyOutcome::Valid
}

fn verify_quorum_certificate(tree: &TreeState, engine: &Engine, block: &Block) -> Option<VerifyOutcome> {
    let qc = block.parent_qc.as_ref()?;
    let committee = match engine.committee_provider.committee_for_epoch(qc.epoch) {
        Ok(committee) => committee,
        Err(_) => return Some(VerifyOutcome::Invalid(None)),
    };

    let mut signer_keys = Vec::with_capacity(qc.finalizer_set.count());
    let mut weight = 0u64;
    for id in qc.finalizer_set.iter() {
        let Some(member) = committee.member(id) else {
            return Some(VerifyOutcome::Invalid(Some(Flag::InvalidProof)));
        };
        signer_keys.push(member.public_key.clone());
        weight += member.weight;
    }
    if !committee.meets_threshold(weight, engine.config.signature_threshold) {
        return Some(VerifyOutcome::Invalid(Some(Flag::InvalidProof)));
    }

    let message = signing::quorum_signing_bytes(tree.genesis_hash, qc.block_hash);
    if !engine
        .signature_scheme
        .verify_aggregate(&message, &signer_keys, &qc.aggregate_signature)
    {
        return Some(VerifyOutcome::Invalid(Some(Flag::InvalidSignature)));
    }
    None
}

fn verify_timeout_certificate(tree: &TreeState, engine: &Engine, block: &Block) -> Option<VerifyOutcome> {
    let tc = block.timeout_cert.as_ref()?;
    let committee = match engine.committee_provider.committee_for_epoch(block.epoch) {
        Ok(committee) => committee,
        Err(_) => return Some(VerifyOutcome::Invalid(None)),
    };

    let mut messages: Vec<(Vec<u8>, PublicKey)> = Vec::new();
    let mut weight = 0u64;
    for (qc_round, signers) in &tc.by_qc_round {
        let message = signing::timeout_signing_bytes(tree.genesis_hash, tc.round, *qc_round);
        for id in signers.iter() {
            let Some(member) = committee.member(id) else {
                return Some(VerifyOutcome::Invalid(Some(Flag::InvalidProof)));
            };
            messages.push((message.clone(), member.public_key.clone()));
            weight += member.weight;
        }
    }
    if !committee.meets_threshold(weight, engine.config.signature_threshold) {
        return Some(VerifyOutcome::Invalid(Some(Flag::InvalidProof)));
    }

    let refs: Vec<(&[u8], PublicKey)> = messages.iter().map(|(m, k)| (m.as_slice(), k.clone())).collect();
    if !engine.signature_scheme.verify_aggregate_multi(&refs, &tc.aggregate_signature) {
        return Some(VerifyOutcome::Invalid(Some(Flag::InvalidSignature)));
    }
    None
}
