// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! The transaction pool (spec.md §4.12): an individually-submitted
//! transaction is nonce-gated against the focus block's executed state;
//! one observed inside a block is not (the block's own execution
//! already validated it). Finalization moves a transaction's lifecycle
//! to its terminal state by dropping it from the pool entirely — the
//! archival destination for finalized transactions is an external
//! concern (spec.md §1 excludes transaction wire encoding).

use crate::{BlockNode, Storage, TreeState};
use consensus_types::{Transaction, TransactionOrigin};
use primitives::{HashValue, ReceiveResult, Round};
use std::sync::Arc;

/// Where in its lifecycle a live transaction sits (spec.md §4.12).
#[derive(Clone, Debug)]
pub struct LiveStatus {
    pub origin: TransactionOrigin,
    /// The highest round at which a block containing this transaction
    /// has been observed, if any.
    pub commit_point: Option<Round>,
}

pub(crate) struct TransactionEntry {
    pub transaction: Transaction,
    pub status: LiveStatus,
}

/// Accept or reject a transaction into the pool (spec.md §4.12).
pub fn receive_transaction(
    tree: &mut TreeState,
    storage: &Storage,
    transaction: Transaction,
    origin: TransactionOrigin,
    round_seen: Option<Round>,
) -> anyhow::Result<ReceiveResult> {
    if tree.consensus_shutdown {
        return Ok(ReceiveResult::ConsensusShutdown);
    }

    let hash = transaction.hash();
    if let Some(entry) = tree.transaction_table.get_mut(&hash) {
        if let Some(round) = round_seen {
            entry.status.commit_point = Some(entry.status.commit_point.map_or(round, |seen| seen.max(round)));
        }
        return Ok(ReceiveResult::Duplicate);
    }

    let next_nonce = tree.next_available_nonce(storage, &transaction.sender)?;
    match origin {
        TransactionOrigin::Individual => {
            if transaction.nonce < next_nonce {
                return Ok(ReceiveResult::Stale);
            }
            if transaction.nonce > next_nonce {
                tree.pending_transactions
                    .entry(transaction.sender)
                    .or_default()
                    .insert(transaction.nonce, transaction);
                return Ok(ReceiveResult::PendingFinalization);
            }
        }
        TransactionOrigin::Block => {
            if transaction.nonce > next_nonce {
                tree.pending_transactions
                    .entry(transaction.sender)
                    .or_default()
                    .insert(transaction.nonce, transaction.clone());
            }
        }
    }

    tree.transaction_table.insert(
        hash,
        TransactionEntry {
            transaction,
            status: LiveStatus {
                origin,
                commit_point: round_seen,
            },
        },
    );
    Ok(ReceiveResult::Success)
}

pub fn status(tree: &TreeState, hash: &HashValue) -> Option<LiveStatus> {
    tree.transaction_table.get(hash).map(|entry| entry.status.clone())
}

/// Remove every transaction carried by a newly finalized chain from the
/// pool — both the main table and the nonce-ordered pending-by-sender
/// queue.
pub(crate) fn commit_finalized(tree: &mut TreeState, chain: &[Arc<BlockNode>]) {
    for node in chain {
        for tx in &node.block.transactions {
            let hash = tx.hash();
            tree.transaction_table.remove(&hash);
            if let Some(queue) = tree.pending_transactions.get_mut(&tx.sender) {
                queue.remove(&tx.nonce);
                if queue.is_empty() {
                    tree.pending_transactions.remove(&tx.sender);
                }
            }
        }
    }
}
