// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Consensus metrics (SPEC_FULL.md §2): a small set of `prometheus`
//! gauges/counters mirroring the teacher's `consensus::counters`
//! module, registered once against the global default registry and
//! updated at the same call sites the teacher instruments its own
//! `chained_bft` block-store mutations — round/epoch advancement,
//! finalization, and the size of the in-memory pending/dead-cache
//! bookkeeping. `lazy_static` is the teacher's own idiom for this;
//! this crate uses `once_cell::sync::Lazy` instead, the same
//! still-maintained substitution `buffered-ref` already makes for its
//! single-assignment cell.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

pub static CURRENT_ROUND: Lazy<IntGauge> =
    Lazy::new(|| register_int_gauge!("consensus_current_round", "Current consensus round").unwrap());

pub static CURRENT_EPOCH: Lazy<IntGauge> =
    Lazy::new(|| register_int_gauge!("consensus_current_epoch", "Current consensus epoch").unwrap());

pub static LAST_COMMITTED_ROUND: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "consensus_last_committed_round",
        "Round of the most recently finalized block"
    )
    .unwrap()
});

pub static PENDING_BLOCKS: Lazy<IntGauge> =
    Lazy::new(|| register_int_gauge!("consensus_pending_blocks", "Blocks awaiting their parent").unwrap());

pub static DEAD_CACHE_SIZE: Lazy<IntGauge> =
    Lazy::new(|| register_int_gauge!("consensus_dead_cache_size", "Entries in the bounded dead-block cache").unwrap());

pub static QUORUM_MESSAGES_BUFFERED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "consensus_quorum_messages_buffered",
        "Quorum messages buffered for the current round"
    )
    .unwrap()
});

pub static BLOCKS_RECEIVED: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("consensus_blocks_received_total", "Blocks accepted by receive_block").unwrap());

pub static BLOCKS_REJECTED: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("consensus_blocks_rejected_total", "Blocks marked Dead on verification/execution failure").unwrap());

pub static TIMEOUTS_TRIGGERED: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("consensus_timeouts_triggered_total", "Local timeout-timer firings").unwrap());

pub static FINALIZATIONS: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("consensus_finalizations_total", "Finalization entries produced").unwrap());

pub static SECURITY_FLAGS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "consensus_security_flags_total",
        "Misbehavior flags raised (double signing, invalid signature, round inconsistency)"
    )
    .unwrap()
});

/// Refresh the gauges that reflect point-in-time tree-state size
/// rather than a monotonic counter. Called after every `receive_*`
/// entrypoint returns, the way the teacher refreshes `BlockStore`
/// gauges after each `insert_block`/`prune_tree` call.
pub fn observe_tree_state(tree: &tree_state::TreeState) {
    CURRENT_ROUND.set(tree.round_status.current_round as i64);
    CURRENT_EPOCH.set(tree.round_status.current_epoch as i64);
    LAST_COMMITTED_ROUND.set(tree.last_finalized().block.round as i64);
    PENDING_BLOCKS.set(tree.pending_count() as i64);
    DEAD_CACHE_SIZE.set(tree.dead_cache_len() as i64);
    QUORUM_MESSAGES_BUFFERED.set(tree.quorum_messages_buffered() as i64);
}
