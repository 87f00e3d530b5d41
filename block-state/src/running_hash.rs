// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! A running hash: an append-only accumulator updated incrementally on
//! each insert/remove, as opposed to an LFMB tree's true Merkle root —
//! "modules (trie + running hash)" is a distinct shape from the
//! accounts/instances LFMB trees. Used here for every trie-backed
//! collection in `BlockState` with no dedicated Merkle scheme of its
//! own: modules and the baker aggregation-key index.

use primitives::HashValue;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningHash(HashValue);

impl RunningHash {
    pub fn empty() -> Self {
        RunningHash(HashValue::sha3(b"RUNNING_HASH::EMPTY"))
    }

    pub fn get(&self) -> HashValue {
        self.0
    }

    pub fn insert(&mut self, key: &[u8], value_hash: HashValue) {
        self.0 = HashValue::combine_tagged(
            b"RUNNING_HASH::INSERT",
            &[self.0.as_bytes(), key, value_hash.as_bytes()],
        );
    }

    pub fn remove(&mut self, key: &[u8]) {
        self.0 = HashValue::combine_tagged(b"RUNNING_HASH::REMOVE", &[self.0.as_bytes(), key]);
    }
}

impl Default for RunningHash {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove_do_not_commute_with_plain_equality() {
        let mut a = RunningHash::empty();
        a.insert(b"k1", HashValue::sha3(b"v1"));
        a.insert(b"k2", HashValue::sha3(b"v2"));
        let mut b = RunningHash::empty();
        b.insert(b"k2", HashValue::sha3(b"v2"));
        b.insert(b"k1", HashValue::sha3(b"v1"));
        // Order-sensitive by construction: a running hash is a log, not
        // a set digest.
        assert_ne!(a.get(), b.get());
    }

    #[test]
    fn remove_changes_the_hash() {
        let mut h = RunningHash::empty();
        h.insert(b"k", HashValue::sha3(b"v"));
        let after_insert = h.get();
        h.remove(b"k");
        assert_ne!(after_insert, h.get());
    }
}
