// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Baker records ("birk" parameters): current, previous
//! and next-epoch committees, plus an aggregation-key trie used to
//! reject duplicate BLS aggregation keys across bakers.

use crate::running_hash::RunningHash;
use blob_store::BlobStore;
use patricia_trie::{Alteration, PatriciaTrie};
use primitives::crypto::PublicKey;
use primitives::{AccountAddress, HashValue};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakerInfo {
    pub baker_id: u64,
    pub baker_account: AccountAddress,
    pub election_key: PublicKey,
    pub signature_key: PublicKey,
    pub aggregation_key: PublicKey,
    pub stake: u64,
}
buffered_ref::impl_flush_nested_noop!(BakerInfo);

impl BakerInfo {
    fn hash(&self) -> HashValue {
        HashValue::sha3(&bcs::to_bytes(self).expect("BakerInfo always serializes"))
    }
}

/// Fixed-length key derived from an aggregation key so it can live in a
/// [`PatriciaTrie`] (which, per `patricia-trie`'s own documented
/// simplification, requires one fixed key length per trie instance):
/// the key's own content hash.
fn aggregation_key_id(key: &PublicKey) -> HashValue {
    HashValue::sha3(&key.0)
}

pub struct EpochBakers {
    bakers: Vec<BakerInfo>,
    aggregation_keys: PatriciaTrie<()>,
    aggregation_running_hash: RunningHash,
}

impl Default for EpochBakers {
    fn default() -> Self {
        EpochBakers {
            bakers: Vec::new(),
            aggregation_keys: PatriciaTrie::new(),
            aggregation_running_hash: RunningHash::empty(),
        }
    }
}

impl EpochBakers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bakers(&self) -> &[BakerInfo] {
        &self.bakers
    }

    pub fn total_stake(&self) -> u64 {
        self.bakers.iter().map(|b| b.stake).sum()
    }

    pub fn has_aggregation_key(&self, store: &BlobStore, key: &PublicKey) -> anyhow::Result<bool> {
        Ok(self
            .aggregation_keys
            .get(store, aggregation_key_id(key).as_bytes())?
            .is_some())
    }

    /// Register a new baker. Rejects a duplicate aggregation key, using
    /// the same trie structure for this de-duplication check as a
    /// Concordium-style baker registry.
    pub fn add_baker(&mut self, store: &BlobStore, baker: BakerInfo) -> anyhow::Result<()> {
        let key_id = aggregation_key_id(&baker.aggregation_key);
        let (new_trie, alteration) =
            self.aggregation_keys
                .alter(store, key_id.as_bytes(), |existing| match existing {
                    Some(_) => Alteration::NoChange,
                    None => Alteration::Insert(()),
                })?;
        anyhow::ensure!(
            matches!(alteration, Alteration::Insert(())),
            "duplicate baker aggregation key"
        );
        self.aggregation_keys = new_trie;
        self.aggregation_running_hash.insert(key_id.as_bytes(), baker.hash());
        self.bakers.push(baker);
        Ok(())
    }

    pub fn flush(&self, store: &BlobStore) -> anyhow::Result<()> {
        self.aggregation_keys.flush(store)?;
        Ok(())
    }

    pub fn hash(&self) -> HashValue {
        let mut bakers_hash = HashValue::sha3(b"BAKERS::EMPTY");
        for baker in &self.bakers {
            bakers_hash = HashValue::combine(&bakers_hash, &baker.hash());
        }
        HashValue::combine(&bakers_hash, &self.aggregation_running_hash.get())
    }
}

pub struct BirkParameters {
    pub current_epoch_bakers: EpochBakers,
    pub previous_epoch_bakers: EpochBakers,
    pub next_epoch_bakers: EpochBakers,
}

impl Default for BirkParameters {
    fn default() -> Self {
        BirkParameters {
            current_epoch_bakers: EpochBakers::new(),
            previous_epoch_bakers: EpochBakers::new(),
            next_epoch_bakers: EpochBakers::new(),
        }
    }
}

impl BirkParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flush(&self, store: &BlobStore) -> anyhow::Result<()> {
        self.current_epoch_bakers.flush(store)?;
        self.previous_epoch_bakers.flush(store)?;
        self.next_epoch_bakers.flush(store)?;
        Ok(())
    }

    pub fn hash(&self) -> HashValue {
        HashValue::combine_tagged(
            b"BIRK",
            &[
                self.current_epoch_bakers.hash().as_bytes(),
                self.previous_epoch_bakers.hash().as_bytes(),
                self.next_epoch_bakers.hash().as_bytes(),
            ],
        )
    }

    /// Roll the epoch forward: the next epoch's committee (computed
    /// ahead of time from a stake snapshot) becomes current, the old
    /// current becomes previous.
    pub fn advance_epoch(&mut self, new_next: EpochBakers) {
        self.previous_epoch_bakers = std::mem::replace(&mut self.current_epoch_bakers, EpochBakers::new());
        self.current_epoch_bakers = std::mem::replace(&mut self.next_epoch_bakers, EpochBakers::new());
        self.next_epoch_bakers = new_next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn baker(id: u64, agg_key: u8) -> BakerInfo {
        BakerInfo {
            baker_id: id,
            baker_account: AccountAddress::new([id as u8; 32]),
            election_key: PublicKey(vec![1]),
            signature_key: PublicKey(vec![2]),
            aggregation_key: PublicKey(vec![agg_key]),
            stake: 100,
        }
    }

    #[test]
    fn duplicate_aggregation_key_is_rejected() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("b")).unwrap();
        let mut bakers = EpochBakers::new();
        bakers.add_baker(&store, baker(1, 9)).unwrap();
        assert!(bakers.add_baker(&store, baker(2, 9)).is_err());
        assert_eq!(bakers.bakers().len(), 1);
    }

    #[test]
    fn advance_epoch_rotates_committees() {
        let mut birk = BirkParameters::new();
        let mut next = EpochBakers::new();
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("b")).unwrap();
        next.add_baker(&store, baker(7, 77)).unwrap();
        let next_hash = next.hash();
        birk.advance_epoch(next);
        assert_eq!(birk.current_epoch_bakers.hash(), next_hash);
    }
}
