// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Identity providers and anonymity revokers: the
//! two registries an identity-issuance scheme needs to validate
//! credentials against. Both are small, rarely-changing sets keyed by
//! a dense `u32` id, so each is a plain running-hashed map rather than
//! an LFMB tree or trie — neither collection needs any
//! operation beyond "is present in the composed root hash".

use crate::running_hash::RunningHash;
use primitives::HashValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProvider {
    pub id: u32,
    pub description: String,
    pub verification_key: serde_bytes::ByteBuf,
}

impl IdentityProvider {
    fn hash(&self) -> HashValue {
        HashValue::sha3(&bcs::to_bytes(self).expect("IdentityProvider always serializes"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymityRevoker {
    pub id: u32,
    pub description: String,
    pub public_key: serde_bytes::ByteBuf,
}

impl AnonymityRevoker {
    fn hash(&self) -> HashValue {
        HashValue::sha3(&bcs::to_bytes(self).expect("AnonymityRevoker always serializes"))
    }
}

/// A small append-mostly registry keyed by dense `u32` id, hashed with a
/// running accumulator (mirrors `crate::modules::Modules`'s shape for
/// the same reason: neither collection needs true Merkle proofs, only a
/// hash that changes when membership does).
#[derive(Default)]
pub struct Registry<V> {
    entries: BTreeMap<u32, V>,
    running_hash: RunningHash,
}

impl<V> Registry<V> {
    pub fn new() -> Self {
        Registry {
            entries: BTreeMap::new(),
            running_hash: RunningHash::empty(),
        }
    }

    pub fn get(&self, id: u32) -> Option<&V> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hash(&self) -> HashValue {
        self.running_hash.get()
    }

    fn insert(&mut self, id: u32, value: V, value_hash: HashValue) -> anyhow::Result<()> {
        anyhow::ensure!(!self.entries.contains_key(&id), "duplicate registry id {id}");
        self.entries.insert(id, value);
        self.running_hash.insert(&id.to_be_bytes(), value_hash);
        Ok(())
    }
}

pub type IdentityProviders = Registry<IdentityProvider>;
pub type AnonymityRevokers = Registry<AnonymityRevoker>;

impl IdentityProviders {
    pub fn add(&mut self, provider: IdentityProvider) -> anyhow::Result<()> {
        let hash = provider.hash();
        self.insert(provider.id, provider, hash)
    }
}

impl AnonymityRevokers {
    pub fn add(&mut self, revoker: AnonymityRevoker) -> anyhow::Result<()> {
        let hash = revoker.hash();
        self.insert(revoker.id, revoker, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_identity_provider_id_is_rejected() {
        let mut providers = IdentityProviders::new();
        providers
            .add(IdentityProvider {
                id: 1,
                description: "idp-1".to_string(),
                verification_key: serde_bytes::ByteBuf::from(vec![1]),
            })
            .unwrap();
        let err = providers.add(IdentityProvider {
            id: 1,
            description: "idp-1-dup".to_string(),
            verification_key: serde_bytes::ByteBuf::from(vec![2]),
        });
        assert!(err.is_err());
        assert_eq!(providers.len(), 1);
    }

    #[test]
    fn hash_changes_on_insert() {
        let mut revokers = AnonymityRevokers::new();
        let before = revokers.hash();
        revokers
            .add(AnonymityRevoker {
                id: 1,
                description: "ar-1".to_string(),
                public_key: serde_bytes::ByteBuf::from(vec![9]),
            })
            .unwrap();
        assert_ne!(before, revokers.hash());
    }
}
