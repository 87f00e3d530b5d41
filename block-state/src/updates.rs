// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Update queues: a pending change queue per chain-parameter kind,
//! each a `VecDeque<(effective_time, payload)>`. `ChainParameters`
//! itself — the values an update eventually takes effect on — are
//! external scheduler/economics values and only need to be held and
//! hashed; reward/economic semantics stay out of scope here.

use primitives::{HashValue, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// What kind of chain parameter an update queue entry mutates. A closed
/// enum rather than an open string tag: every update kind this protocol
/// knows about is fixed at compile time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UpdateKind {
    ElectionDifficulty,
    EuroPerEnergy,
    MicroCcdPerEuro,
    FoundationAccount,
    MintDistribution,
    TransactionFeeDistribution,
    GasRewards,
    RootKeys,
    Level1Keys,
    Level2Keys,
}

/// A pending, not-yet-effective parameter change: opaque payload bytes,
/// the concrete parameter encoding being a chain-parameter concern this
/// crate does not interpret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub effective_time: Timestamp,
    pub payload: serde_bytes::ByteBuf,
}

impl PendingUpdate {
    fn hash(&self) -> HashValue {
        HashValue::sha3(&bcs::to_bytes(self).expect("PendingUpdate always serializes"))
    }
}

#[derive(Default)]
pub struct UpdateQueues {
    queues: BTreeMap<UpdateKind, VecDeque<PendingUpdate>>,
}

impl UpdateQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, kind: UpdateKind, update: PendingUpdate) {
        self.queues.entry(kind).or_default().push_back(update);
    }

    /// Pop every entry whose `effective_time` has passed, in queue
    /// (FIFO) order, for every update kind.
    pub fn take_effective(&mut self, now: Timestamp) -> Vec<(UpdateKind, PendingUpdate)> {
        let mut effective = Vec::new();
        for (kind, queue) in self.queues.iter_mut() {
            while matches!(queue.front(), Some(u) if u.effective_time <= now) {
                effective.push((*kind, queue.pop_front().unwrap()));
            }
        }
        effective
    }

    pub fn pending_len(&self, kind: UpdateKind) -> usize {
        self.queues.get(&kind).map(|q| q.len()).unwrap_or(0)
    }

    /// Order-sensitive: queue kinds are visited in a fixed (enum) order,
    /// and within a kind, FIFO order — two queues holding the same
    /// updates in a different arrival order hash differently, matching
    /// what a real pending-change queue must preserve.
    pub fn hash(&self) -> HashValue {
        let mut acc = HashValue::sha3(b"UPDATE_QUEUES::EMPTY");
        for (kind, queue) in &self.queues {
            for update in queue {
                acc = HashValue::combine_tagged(
                    b"UPDATE_QUEUES::ENTRY",
                    &[acc.as_bytes(), &(*kind as u8).to_be_bytes(), update.hash().as_bytes()],
                );
            }
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(at: Timestamp, payload: u8) -> PendingUpdate {
        PendingUpdate {
            effective_time: at,
            payload: serde_bytes::ByteBuf::from(vec![payload]),
        }
    }

    #[test]
    fn take_effective_pops_in_fifo_order_per_kind() {
        let mut queues = UpdateQueues::new();
        queues.enqueue(UpdateKind::EuroPerEnergy, update(10, 1));
        queues.enqueue(UpdateKind::EuroPerEnergy, update(20, 2));
        queues.enqueue(UpdateKind::MintDistribution, update(5, 3));

        let effective = queues.take_effective(15);
        assert_eq!(effective.len(), 2);
        assert_eq!(queues.pending_len(UpdateKind::EuroPerEnergy), 1);
        assert_eq!(queues.pending_len(UpdateKind::MintDistribution), 0);
    }

    #[test]
    fn hash_is_sensitive_to_arrival_order() {
        let mut a = UpdateQueues::new();
        a.enqueue(UpdateKind::RootKeys, update(1, 1));
        a.enqueue(UpdateKind::RootKeys, update(2, 2));

        let mut b = UpdateQueues::new();
        b.enqueue(UpdateKind::RootKeys, update(2, 2));
        b.enqueue(UpdateKind::RootKeys, update(1, 1));

        assert_ne!(a.hash(), b.hash());
    }
}
