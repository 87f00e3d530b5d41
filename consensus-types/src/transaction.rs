// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transactions are opaque payloads to this crate (spec.md §1 excludes
//! "the wire encoding of transaction payloads"); only the header fields
//! the tree state and transaction pool actually branch on — sender,
//! nonce, and a content hash — are named types here.

use primitives::{AccountAddress, HashValue};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: AccountAddress,
    pub nonce: u64,
    /// The externally-defined wire payload (scheduler operations, token
    /// transfers, contract calls, ...): opaque bytes to this crate.
    pub payload: serde_bytes::ByteBuf,
}

impl Transaction {
    pub fn hash(&self) -> HashValue {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.sender.as_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        HashValue::sha3(&buf)
    }
}

/// Where a transaction was first observed (spec.md §4.12): an
/// individually-submitted transaction is nonce-gated against the focus
/// block; one arriving inside a block is not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionOrigin {
    Individual,
    Block,
}

/// The executor's verdict for a single transaction (spec.md §1: outcomes
/// are opaque data the engine only compares/hashes, never interprets).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub success: bool,
    pub data: serde_bytes::ByteBuf,
}

/// Combines a list of per-transaction outcomes into the single hash a
/// block commits to (spec.md §3: `transaction_outcomes_hash`).
pub fn outcomes_hash(outcomes: &[TransactionOutcome]) -> HashValue {
    let mut acc = HashValue::sha3(b"OUTCOMES::EMPTY");
    for outcome in outcomes {
        let bytes = bcs::to_bytes(outcome).expect("TransactionOutcome always serializes");
        acc = HashValue::combine(&acc, &HashValue::sha3(&bytes));
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_sensitive_to_nonce() {
        let base = Transaction {
            sender: AccountAddress::new([1u8; 32]),
            nonce: 0,
            payload: serde_bytes::ByteBuf::from(vec![1, 2, 3]),
        };
        let mut bumped = base.clone();
        bumped.nonce = 1;
        assert_ne!(base.hash(), bumped.hash());
    }

    #[test]
    fn outcomes_hash_is_order_sensitive() {
        let a = TransactionOutcome {
            success: true,
            data: serde_bytes::ByteBuf::from(vec![1]),
        };
        let b = TransactionOutcome {
            success: false,
            data: serde_bytes::ByteBuf::from(vec![2]),
        };
        assert_ne!(outcomes_hash(&[a.clone(), b.clone()]), outcomes_hash(&[b, a]));
    }
}
