// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Finalization (spec.md §4.11): given a structurally-valid
//! [`FinalizationEntry`], collapse every alive block off the newly
//! finalized ancestor chain, flush state, persist account creations,
//! purge stale pending blocks, and move the `last_finalized` pointer.

use crate::{Engine, Storage, TreeState};
use account_map::DifferenceMap;
use consensus_types::FinalizationEntry;
use primitives::HashValue;
use std::sync::Arc;

/// Whether `start`'s ancestor chain (walked through `alive` only) passes
/// through `target` — true for `target` itself and every live
/// descendant of it, false for a sibling branch or a stale block whose
/// chain runs out before reaching `target`.
fn reaches(tree: &TreeState, mut hash: HashValue, target: HashValue) -> bool {
    loop {
        if hash == target {
            return true;
        }
        match tree.alive.get(&hash) {
            Some(node) => hash = node.parent_hash,
            None => return false,
        }
    }
}

/// Run the six-step finalization procedure for `entry.finalized_qc`'s
/// block. A no-op if that block is already `last_finalized` (idempotent
/// under re-delivery of the same certified block).
pub fn finalize(tree: &mut TreeState, storage: &Storage, engine: &Engine, entry: FinalizationEntry) -> anyhow::Result<()> {
    let _ = engine;
    anyhow::ensure!(entry.is_structurally_valid(), "finalization entry fails structural validation");

    let finalized_hash = entry.finalized_qc.block_hash;
    if finalized_hash == tree.last_finalized.hash {
        return Ok(());
    }
    let finalized_node = tree
        .node(&finalized_hash)
        .ok_or_else(|| anyhow::anyhow!("finalize: block {finalized_hash:?} is not in the live tree"))?;

    // The ancestor chain from the previous last_finalized (exclusive) up
    // to the newly finalized block (inclusive), oldest first.
    let mut chain = vec![Arc::clone(&finalized_node)];
    let mut cursor = Arc::clone(&finalized_node);
    while cursor.parent_hash != tree.last_finalized.hash {
        let parent = tree
            .node(&cursor.parent_hash)
            .ok_or_else(|| anyhow::anyhow!("finalize: ancestor chain is broken before reaching last_finalized"))?;
        chain.push(Arc::clone(&parent));
        cursor = parent;
    }
    chain.reverse();

    // Steps 1+2: every alive block off the finalized chain — whether a
    // sibling branch or a stale non-ancestor below the finalized
    // block's height — dies. Live descendants of the finalized block
    // (already-alive children extending the canonical chain forward,
    // e.g. the very block whose QC triggered this finalization) are not
    // "off" the chain and survive.
    let condemned: Vec<HashValue> = tree
        .alive
        .keys()
        .filter(|hash| !reaches(tree, **hash, finalized_hash))
        .copied()
        .collect();
    for hash in condemned {
        tree.mark_dead(hash);
    }
    // Step 3 (trim trailing empty branch levels) has no separate
    // representation: `alive` is a flat map, so removing the dead
    // branches above already collapses any empty levels.

    // Step 4: flush state and persist account creations, oldest to
    // newest, detaching every still-live child's difference map from
    // the chain as each block's own creations land in LMDB.
    for node in &chain {
        node.state.flush(storage.store)?;
        let direct_children: Vec<Arc<DifferenceMap>> = tree
            .alive
            .values()
            .filter(|candidate| candidate.parent_hash == node.hash)
            .map(|candidate| Arc::clone(&candidate.accounts))
            .collect();
        account_map::write_accounts_created(storage.lmdb, &node.accounts, &direct_children)?;
    }
    // The chain itself is subsumed by the `last_finalized` pointer set
    // below; only the newest entry needs a full `BlockNode` kept around
    // at all, and that one lives in `tree.last_finalized`, not `alive`.
    for node in &chain {
        tree.alive.remove(&node.hash);
    }

    // Step 5: purge pending blocks at or below the finalized round —
    // they can never become part of the canonical chain.
    let finalized_round = finalized_node.block.round;
    let stale_rounds: Vec<primitives::Round> = tree.pending_queue.range(..=finalized_round).map(|(round, _)| *round).collect();
    for round in stale_rounds {
        if let Some(hashes) = tree.pending_queue.remove(&round) {
            for hash in hashes {
                if let Some(block) = tree.pending.remove(&hash) {
                    if let Some(siblings) = tree.pending_by_parent.get_mut(&block.parent_hash()) {
                        siblings.retain(|h| *h != hash);
                    }
                }
            }
        }
    }

    // Step 6: a queue of blocks only awaiting a later `last_finalized`
    // pointer to resolve their parent has no separate representation
    // here either — `TreeState::node` already falls back to whichever
    // block `last_finalized` names, so moving the pointer below is
    // itself what unblocks them the next time they are looked up.
    tree.last_finalized = finalized_node;
    if !tree.alive.contains_key(&tree.focus_block) && tree.focus_block != tree.last_finalized.hash {
        tree.focus_block = tree.last_finalized.hash;
    }

    crate::transactions::commit_finalized(tree, &chain);

    Ok(())
}

