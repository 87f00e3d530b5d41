// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Leader election for `(leadership_election_nonce, round)` is an
//! explicit Open Question in spec.md §9 ("computeLeadershipElectionNonce
//! = undefined in one branch... this specification does not mandate
//! one"). [`LeaderElection`] is the seam; [`StakeWeightedLeaderElection`]
//! is the concrete, deterministic, stake-weighted draw this workspace
//! picked to resolve it (see DESIGN.md).

use crate::committee::Committee;
use primitives::{FinalizerId, HashValue, Round};

pub trait LeaderElection: Send + Sync {
    /// Deterministically select the elected leader's committee-member id
    /// for `(nonce, round)`.
    fn elect(&self, nonce: HashValue, round: Round, committee: &Committee) -> FinalizerId;
}

/// `H("LEADER" || nonce || round)` reduced mod total committee weight,
/// then walked against each member's cumulative weight range — a
/// draw whose probability of selecting a member is exactly
/// proportional to stake, and whose output depends only on `(nonce,
/// round)` and committee composition (spec.md §4.7's "deterministic in
/// (leadership_election_nonce, round)").
pub struct StakeWeightedLeaderElection;

impl LeaderElection for StakeWeightedLeaderElection {
    fn elect(&self, nonce: HashValue, round: Round, committee: &Committee) -> FinalizerId {
        assert!(committee.total_weight > 0, "empty committee cannot elect a leader");
        let draw = HashValue::combine_tagged(b"LEADER", &[nonce.as_bytes(), &round.to_be_bytes()]);
        let draw_u64 = u64::from_be_bytes(draw.as_bytes()[..8].try_into().unwrap());
        let target = draw_u64 % committee.total_weight;
        let mut cumulative = 0u64;
        for member in &committee.members {
            cumulative += member.weight;
            if target < cumulative {
                return member.id;
            }
        }
        unreachable!("target is always below total_weight by construction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committee::CommitteeMember;
    use primitives::crypto::PublicKey;

    fn committee(weights: &[u64]) -> Committee {
        Committee::new(
            weights
                .iter()
                .enumerate()
                .map(|(i, w)| CommitteeMember {
                    id: i as FinalizerId,
                    public_key: PublicKey(vec![]),
                    weight: *w,
                })
                .collect(),
        )
    }

    #[test]
    fn election_is_deterministic() {
        let committee = committee(&[10, 20, 30]);
        let nonce = HashValue::sha3(b"nonce");
        let a = StakeWeightedLeaderElection.elect(nonce, 5, &committee);
        let b = StakeWeightedLeaderElection.elect(nonce, 5, &committee);
        assert_eq!(a, b);
    }

    #[test]
    fn election_always_returns_a_member() {
        let committee = committee(&[1, 1, 1, 1, 1]);
        for round in 0..50u64 {
            let nonce = HashValue::sha3(&round.to_be_bytes());
            let leader = StakeWeightedLeaderElection.elect(nonce, round, &committee);
            assert!(committee.contains(leader));
        }
    }
}
