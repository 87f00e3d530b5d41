// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Committee membership: the weighted subset of bakers empowered to
//! sign quorum/timeout messages for a given epoch (spec.md glossary:
//! "Finalizer"). Recomputation from a stake snapshot on epoch change is
//! delegated to a [`CommitteeProvider`] — the snapshot mechanics
//! themselves are a scheduler/staking concern excluded by spec.md §1.

use primitives::crypto::PublicKey;
use primitives::{Epoch, FinalizerId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitteeMember {
    pub id: FinalizerId,
    pub public_key: PublicKey,
    pub weight: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committee {
    pub members: Vec<CommitteeMember>,
    pub total_weight: u64,
}

impl Committee {
    pub fn new(members: Vec<CommitteeMember>) -> Self {
        let total_weight = members.iter().map(|m| m.weight).sum();
        Committee { members, total_weight }
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn member(&self, id: FinalizerId) -> Option<&CommitteeMember> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: FinalizerId) -> bool {
        self.member(id).is_some()
    }

    /// `accumulated_weight / total_weight ≥ signature_threshold`
    /// (spec.md §4.8).
    pub fn meets_threshold(&self, accumulated_weight: u64, signature_threshold: f64) -> bool {
        if self.total_weight == 0 {
            return false;
        }
        (accumulated_weight as f64) / (self.total_weight as f64) >= signature_threshold
    }
}

/// Resolves the committee for an epoch (spec.md §4.10: "committee
/// membership recomputed from stake snapshot"). A real node backs this
/// with its staking/scheduler state; this crate only calls through it.
pub trait CommitteeProvider: Send + Sync {
    fn committee_for_epoch(&self, epoch: Epoch) -> anyhow::Result<Committee>;
}
