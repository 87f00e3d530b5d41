// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length in bytes of a `HashValue`. The underlying digest is opaque to
/// this crate (spec.md excludes the concrete hash primitive) but every
/// call site needs a fixed-size, orderable, hashable digest, so a
/// SHA-256-shaped 32-byte value stands in for it.
pub const HASH_LENGTH: usize = 32;

/// A 32-byte Merkle/content digest used throughout the tree state and
/// block-state composition. Combination is associative left-to-right:
/// `combine(a, b) = H(a || b)`, matching the header/quasi-hash and
/// Merkle-composition formulas of spec.md §3/§4.6.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HashValue(#[serde(with = "serde_bytes_array")] [u8; HASH_LENGTH]);

impl HashValue {
    pub const LENGTH: usize = HASH_LENGTH;

    pub fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        HashValue(bytes)
    }

    pub fn zero() -> Self {
        HashValue([0u8; HASH_LENGTH])
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Digest of an arbitrary byte string. Stands in for the opaque
    /// hash primitive spec.md excludes from scope.
    pub fn sha3(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; HASH_LENGTH];
        out.copy_from_slice(&digest);
        HashValue(out)
    }

    /// `H(a || b)`, the building block of every header/quasi-hash and
    /// Merkle combination in the spec.
    pub fn combine(a: &HashValue, b: &HashValue) -> Self {
        let mut buf = Vec::with_capacity(HASH_LENGTH * 2);
        buf.extend_from_slice(&a.0);
        buf.extend_from_slice(&b.0);
        Self::sha3(&buf)
    }

    /// `H(tag || a || b || ...)` for named combinations such as the
    /// `"QUORUM."`/`"TIMEOUT."`/`"NONCE"` message formats of spec.md §6.
    pub fn combine_tagged(tag: &[u8], parts: &[&[u8]]) -> Self {
        let mut buf = Vec::from(tag);
        for p in parts {
            buf.extend_from_slice(p);
        }
        Self::sha3(&buf)
    }

    pub fn short_str(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Fold a non-empty slice of leaves into a single hash via
    /// pairwise, left-to-right combination: the "fixed balanced tree"
    /// composition used both by a block's quasi-hash (spec.md §3) and
    /// by the block-state root hash (spec.md §4.6). A dangling leaf at
    /// the end of an odd-sized level carries forward unchanged rather
    /// than being combined with itself.
    pub fn balanced_combine(leaves: &[HashValue]) -> HashValue {
        assert!(!leaves.is_empty(), "balanced_combine requires at least one leaf");
        let mut level = leaves.to_vec();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                if pair.len() == 2 {
                    next.push(HashValue::combine(&pair[0], &pair[1]));
                } else {
                    next.push(pair[0]);
                }
            }
            level = next;
        }
        level[0]
    }
}

impl fmt::Debug for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for HashValue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        anyhow::ensure!(bytes.len() == HASH_LENGTH, "hash string has wrong length");
        let mut out = [0u8; HASH_LENGTH];
        out.copy_from_slice(&bytes);
        Ok(HashValue(out))
    }
}

impl AsRef<[u8]> for HashValue {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

mod serde_bytes_array {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serde_bytes::serialize(&bytes[..], serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let slice: Vec<u8> = serde_bytes::deserialize(deserializer)?;
        slice
            .try_into()
            .map_err(|_| D::Error::custom("hash value must be 32 bytes"))
    }
}

#[cfg(any(test, feature = "fuzzing"))]
impl proptest::arbitrary::Arbitrary for HashValue {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;
        any::<[u8; HASH_LENGTH]>().prop_map(HashValue).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_is_deterministic() {
        let a = HashValue::sha3(b"a");
        let b = HashValue::sha3(b"b");
        assert_eq!(HashValue::combine(&a, &b), HashValue::combine(&a, &b));
        assert_ne!(HashValue::combine(&a, &b), HashValue::combine(&b, &a));
    }

    #[test]
    fn serde_round_trip() {
        let h = HashValue::sha3(b"hello");
        let bytes = bcs::to_bytes(&h).unwrap();
        let back: HashValue = bcs::from_bytes(&bytes).unwrap();
        assert_eq!(h, back);
    }
}
