// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! A bit-vector over a committee, used by both [`crate::quorum_cert::QuorumCertificate`]
//! and [`crate::timeout_cert::TimeoutCertificate`] to record which finalizers
//! contributed to an aggregate signature. The finalizer set is a
//! bit-vector over the current epoch's committee; serialization is canonical
//! (minimum-byte big-endian, no leading zero byte).

use bitvec::order::Msb0;
use bitvec::vec::BitVec;
use primitives::FinalizerId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizerSet {
    bits: BitVec<u8, Msb0>,
}

impl FinalizerSet {
    pub fn empty(committee_size: usize) -> Self {
        FinalizerSet {
            bits: BitVec::repeat(false, committee_size),
        }
    }

    pub fn committee_size(&self) -> usize {
        self.bits.len()
    }

    pub fn insert(&mut self, id: FinalizerId) {
        self.bits.set(id as usize, true);
    }

    pub fn contains(&self, id: FinalizerId) -> bool {
        self.bits.get(id as usize).map(|b| *b).unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn iter(&self) -> impl Iterator<Item = FinalizerId> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.then_some(i as FinalizerId))
    }

    /// Bitwise union, used to accumulate signers across a round (spec.md
    /// §4.8: `finalizer_set ∪ {i}`).
    pub fn union(&self, other: &FinalizerSet) -> Self {
        debug_assert_eq!(self.committee_size(), other.committee_size());
        let mut bits = self.bits.clone();
        bits |= other.bits.clone();
        FinalizerSet { bits }
    }

    /// Minimum-byte big-endian encoding with no leading zero byte: the bit
    /// vector is treated as a big-endian bitstring and trailing whole-zero
    /// leading bytes are dropped, exactly as a canonical big integer would
    /// be encoded.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.bits.len().div_ceil(8));
        for chunk in self.bits.chunks(8) {
            let mut byte = 0u8;
            for (i, b) in chunk.iter().enumerate() {
                if *b {
                    byte |= 1 << (7 - i);
                }
            }
            bytes.push(byte);
        }
        let first_nonzero = bytes.iter().position(|b| *b != 0);
        match first_nonzero {
            Some(idx) => bytes[idx..].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn from_canonical_bytes(committee_size: usize, bytes: &[u8]) -> anyhow::Result<Self> {
        let full_len = committee_size.div_ceil(8);
        anyhow::ensure!(
            bytes.len() <= full_len,
            "finalizer set encoding longer than committee size admits"
        );
        if !bytes.is_empty() {
            anyhow::ensure!(bytes[0] != 0, "finalizer set encoding has a leading zero byte");
        }
        let mut padded = vec![0u8; full_len - bytes.len()];
        padded.extend_from_slice(bytes);
        let mut bits = BitVec::<u8, Msb0>::from_vec(padded);
        bits.truncate(committee_size);
        Ok(FinalizerSet { bits })
    }
}

impl Serialize for FinalizerSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.committee_size() as u32, self.to_canonical_bytes()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FinalizerSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (committee_size, bytes): (u32, Vec<u8>) = Deserialize::deserialize(deserializer)?;
        FinalizerSet::from_canonical_bytes(committee_size as usize, &bytes)
            .map_err(serde::de::Error::custom)
    }
}
