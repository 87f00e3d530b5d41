// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bank status (the `bank` field of block state): total supply, encrypted-
//! amount pool total, reward-rate snapshot. A single hashed value, not
//! a collection — no LFMB tree or trie needed. Reward *rates* are
//! carried as opaque values only; the reward formulas that derive new
//! rates are an out-of-scope scheduler/economics concern.

use primitives::HashValue;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRate {
    pub mint_per_slot_micro: u64,
    pub transaction_fee_baker_fraction_permille: u16,
    pub gas_rewards_baker_permille: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankStatus {
    pub total_amount: u64,
    pub total_encrypted_amount: u64,
    pub total_staked_capital: u64,
    pub reward_rate: RewardRate,
}

impl BankStatus {
    pub fn hash(&self) -> HashValue {
        HashValue::sha3(&bcs::to_bytes(self).expect("BankStatus always serializes"))
    }
}
