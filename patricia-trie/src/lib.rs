// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! A 256-ary trie over fixed-length byte keys. Nodes are
//! one of `Branch` (256 optional children), `Stem` (a shared path
//! prefix plus one child) or `Tip` (a value). `alter` walks the key
//! once, splitting and collapsing nodes as needed, and reports an
//! [`Alteration`] so a caller can tell a real write from a no-op.
//!
//! Keys of differing lengths are never mixed in the same trie: callers
//! are expected to use one fixed key length per trie instance, which is
//! what lets a `Tip` always be reached with an empty remaining key —
//! there is no case of one key being a strict prefix of another.

use blob_store::{BlobRef, BlobStore};
use buffered_ref::{BufferedRef, FlushNested};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;

const TAG_BRANCH: u8 = 1;
const TAG_TIP: u8 = 2;
const TAG_STEM_ESCAPE: u8 = 255;
/// Inline stem lengths run from 1 to `STEM_INLINE_MAX` via tags
/// `3..=254`; longer stems use the escape tag with a length prefix.
const STEM_INLINE_MAX: usize = 251;

/// The outcome `alter` applied to a key: nothing changed, an existing
/// value was removed, or a value was written (fresh or replacing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alteration<V> {
    NoChange,
    Remove,
    Insert(V),
}

pub enum TrieNode<V> {
    Branch(Vec<Option<BufferedRef<TrieNode<V>>>>),
    Stem(Vec<u8>, Box<BufferedRef<TrieNode<V>>>),
    Tip(V),
}

impl<V> FlushNested for TrieNode<V>
where
    V: Serialize + DeserializeOwned + FlushNested,
{
    fn flush_nested(&self, store: &BlobStore) -> anyhow::Result<()> {
        match self {
            TrieNode::Branch(children) => {
                for child in children.iter().flatten() {
                    child.flush(store)?;
                }
                Ok(())
            }
            TrieNode::Stem(_, child) => {
                child.flush(store)?;
                Ok(())
            }
            TrieNode::Tip(_) => Ok(()),
        }
    }
}

impl<V: Serialize> Serialize for TrieNode<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let bytes = encode(self).map_err(serde::ser::Error::custom)?;
        serde_bytes::serialize(&bytes[..], serializer)
    }
}

impl<'de, V: DeserializeOwned> Deserialize<'de> for TrieNode<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde_bytes::deserialize(deserializer)?;
        decode(&bytes).map_err(serde::de::Error::custom)
    }
}

fn encode<V: Serialize>(node: &TrieNode<V>) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    match node {
        TrieNode::Branch(children) => {
            out.push(TAG_BRANCH);
            for child in children {
                let r = child.as_ref().map(|c| {
                    c.blob_ref()
                        .ok_or_else(|| anyhow::anyhow!("trie child serialized before flush"))
                });
                let r = match r {
                    Some(Ok(r)) => r,
                    Some(Err(e)) => return Err(e),
                    None => BlobRef::NULL,
                };
                out.extend_from_slice(&r.0.to_be_bytes());
            }
        }
        TrieNode::Stem(path, child) => {
            anyhow::ensure!(!path.is_empty(), "a stem must cover at least one byte");
            if path.len() <= STEM_INLINE_MAX {
                out.push(3 + path.len() as u8);
            } else {
                out.push(TAG_STEM_ESCAPE);
                out.extend_from_slice(&(path.len() as u64).to_be_bytes());
            }
            out.extend_from_slice(path);
            let r = child
                .blob_ref()
                .ok_or_else(|| anyhow::anyhow!("trie child serialized before flush"))?;
            out.extend_from_slice(&r.0.to_be_bytes());
        }
        TrieNode::Tip(v) => {
            out.push(TAG_TIP);
            out.extend_from_slice(&bcs::to_bytes(v)?);
        }
    }
    Ok(out)
}

fn decode<V: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<TrieNode<V>> {
    anyhow::ensure!(!bytes.is_empty(), "empty trie node encoding");
    let tag = bytes[0];
    let rest = &bytes[1..];
    match tag {
        0 => anyhow::bail!("trie node tag 0 is reserved"),
        TAG_BRANCH => {
            anyhow::ensure!(rest.len() == 256 * 8, "malformed branch encoding");
            let mut children = Vec::with_capacity(256);
            for chunk in rest.chunks_exact(8) {
                let offset = u64::from_be_bytes(chunk.try_into().unwrap());
                let r = BlobRef(offset);
                children.push(if r.is_null() {
                    None
                } else {
                    Some(BufferedRef::on_disk(r))
                });
            }
            Ok(TrieNode::Branch(children))
        }
        TAG_TIP => {
            let v = bcs::from_bytes(rest)?;
            Ok(TrieNode::Tip(v))
        }
        TAG_STEM_ESCAPE => {
            anyhow::ensure!(rest.len() >= 8, "truncated long-stem length prefix");
            let len = u64::from_be_bytes(rest[0..8].try_into().unwrap()) as usize;
            let rest = &rest[8..];
            anyhow::ensure!(rest.len() == len + 8, "malformed long-stem encoding");
            let path = rest[..len].to_vec();
            let offset = u64::from_be_bytes(rest[len..len + 8].try_into().unwrap());
            Ok(TrieNode::Stem(path, Box::new(BufferedRef::on_disk(BlobRef(offset)))))
        }
        n => {
            let len = (n - 3) as usize;
            anyhow::ensure!(rest.len() == len + 8, "malformed inline-stem encoding");
            let path = rest[..len].to_vec();
            let offset = u64::from_be_bytes(rest[len..len + 8].try_into().unwrap());
            Ok(TrieNode::Stem(path, Box::new(BufferedRef::on_disk(BlobRef(offset)))))
        }
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// A 256-ary trie keyed by fixed-length byte strings.
pub struct PatriciaTrie<V> {
    root: Option<BufferedRef<TrieNode<V>>>,
}

impl<V> Default for PatriciaTrie<V> {
    fn default() -> Self {
        PatriciaTrie { root: None }
    }
}

impl<V> PatriciaTrie<V>
where
    V: Clone + Serialize + DeserializeOwned + FlushNested,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Read-only lookup; never writes to the store.
    pub fn get(&self, store: &BlobStore, key: &[u8]) -> anyhow::Result<Option<Arc<V>>> {
        let mut node = match &self.root {
            Some(r) => r.clone(),
            None => return Ok(None),
        };
        let mut remaining = key;
        loop {
            let loaded = node.load(store)?;
            match loaded.as_ref() {
                TrieNode::Tip(v) => {
                    anyhow::ensure!(remaining.is_empty(), "key longer than trie depth");
                    return Ok(Some(Arc::new(v.clone())));
                }
                TrieNode::Stem(path, child) => {
                    if remaining.len() < path.len() || &remaining[..path.len()] != path.as_slice()
                    {
                        return Ok(None);
                    }
                    remaining = &remaining[path.len()..];
                    node = (**child).clone();
                }
                TrieNode::Branch(children) => {
                    anyhow::ensure!(!remaining.is_empty(), "key shorter than trie depth");
                    match &children[remaining[0] as usize] {
                        None => return Ok(None),
                        Some(c) => {
                            node = c.clone();
                            remaining = &remaining[1..];
                        }
                    }
                }
            }
        }
    }

    /// Apply `f` to the current value (if any) at `key`, returning a new
    /// trie sharing every subtree the walk didn't touch, plus the
    /// [`Alteration`] actually applied. `f` returning `NoChange` never
    /// causes a write.
    pub fn alter<F>(
        &self,
        store: &BlobStore,
        key: &[u8],
        mut f: F,
    ) -> anyhow::Result<(Self, Alteration<V>)>
    where
        F: FnMut(Option<&V>) -> Alteration<V>,
    {
        let (new_root, alteration) = alter_node(store, self.root.clone(), key, &mut f)?;
        Ok((PatriciaTrie { root: new_root }, alteration))
    }

    pub fn insert(&self, store: &BlobStore, key: &[u8], value: V) -> anyhow::Result<Self> {
        let (new_self, _) = self.alter(store, key, |_| Alteration::Insert(value.clone()))?;
        Ok(new_self)
    }

    pub fn remove(&self, store: &BlobStore, key: &[u8]) -> anyhow::Result<Self> {
        let (new_self, _) = self.alter(store, key, |existing| match existing {
            Some(_) => Alteration::Remove,
            None => Alteration::NoChange,
        })?;
        Ok(new_self)
    }

    pub fn flush(&self, store: &BlobStore) -> anyhow::Result<Option<BlobRef>> {
        match &self.root {
            None => Ok(None),
            Some(root) => Ok(Some(root.flush(store)?)),
        }
    }
}

fn alter_node<V, F>(
    store: &BlobStore,
    node: Option<BufferedRef<TrieNode<V>>>,
    key: &[u8],
    f: &mut F,
) -> anyhow::Result<(Option<BufferedRef<TrieNode<V>>>, Alteration<V>)>
where
    V: Clone + Serialize + DeserializeOwned + FlushNested,
    F: FnMut(Option<&V>) -> Alteration<V>,
{
    let node = match node {
        None => return alter_empty(key, f),
        Some(n) => n,
    };
    let loaded = node.load(store)?;
    match loaded.as_ref() {
        TrieNode::Tip(v) => {
            anyhow::ensure!(key.is_empty(), "key longer than trie depth at a tip");
            match f(Some(v)) {
                Alteration::NoChange => Ok((Some(node), Alteration::NoChange)),
                Alteration::Remove => Ok((None, Alteration::Remove)),
                Alteration::Insert(newv) => Ok((
                    Some(BufferedRef::make(TrieNode::Tip(newv.clone()))),
                    Alteration::Insert(newv),
                )),
            }
        }
        TrieNode::Stem(path, child) => {
            let common = common_prefix_len(key, path);
            if common == path.len() {
                let (new_child, alteration) =
                    alter_node(store, Some((**child).clone()), &key[common..], f)?;
                match alteration {
                    Alteration::NoChange => Ok((Some(node), Alteration::NoChange)),
                    _ => {
                        let rebuilt = match new_child {
                            None => None,
                            Some(c) => Some(BufferedRef::make(TrieNode::Stem(
                                path.clone(),
                                Box::new(c),
                            ))),
                        };
                        Ok((rebuilt, alteration))
                    }
                }
            } else {
                match f(None) {
                    Alteration::NoChange => Ok((Some(node), Alteration::NoChange)),
                    Alteration::Remove => Ok((Some(node), Alteration::NoChange)),
                    Alteration::Insert(v) => {
                        anyhow::ensure!(
                            common < key.len(),
                            "fixed-length key collided with a longer stem"
                        );
                        let old_rest = &path[common..];
                        let new_rest = &key[common..];
                        let mut branch_children: Vec<Option<BufferedRef<TrieNode<V>>>> =
                            vec![None; 256];
                        branch_children[old_rest[0] as usize] = Some(if old_rest.len() > 1 {
                            BufferedRef::make(TrieNode::Stem(
                                old_rest[1..].to_vec(),
                                child.clone(),
                            ))
                        } else {
                            (**child).clone()
                        });
                        branch_children[new_rest[0] as usize] = Some(if new_rest.len() > 1 {
                            BufferedRef::make(TrieNode::Stem(
                                new_rest[1..].to_vec(),
                                Box::new(BufferedRef::make(TrieNode::Tip(v.clone()))),
                            ))
                        } else {
                            BufferedRef::make(TrieNode::Tip(v.clone()))
                        });
                        let branch = BufferedRef::make(TrieNode::Branch(branch_children));
                        let result = if common > 0 {
                            BufferedRef::make(TrieNode::Stem(path[..common].to_vec(), Box::new(branch)))
                        } else {
                            branch
                        };
                        Ok((Some(result), Alteration::Insert(v)))
                    }
                }
            }
        }
        TrieNode::Branch(children) => {
            anyhow::ensure!(!key.is_empty(), "key shorter than trie depth at a branch");
            let idx = key[0] as usize;
            let (new_child, alteration) =
                alter_node(store, children[idx].clone(), &key[1..], f)?;
            match alteration {
                Alteration::NoChange => Ok((Some(node), Alteration::NoChange)),
                _ => {
                    let mut new_children = children.clone();
                    new_children[idx] = new_child;
                    let remaining: Vec<(usize, &BufferedRef<TrieNode<V>>)> = new_children
                        .iter()
                        .enumerate()
                        .filter_map(|(i, c)| c.as_ref().map(|c| (i, c)))
                        .collect();
                    let rebuilt = match remaining.len() {
                        0 => None,
                        1 => {
                            let (only_idx, only_child) = remaining[0];
                            Some(BufferedRef::make(TrieNode::Stem(
                                vec![only_idx as u8],
                                Box::new(only_child.clone()),
                            )))
                        }
                        _ => Some(BufferedRef::make(TrieNode::Branch(new_children))),
                    };
                    Ok((rebuilt, alteration))
                }
            }
        }
    }
}

fn alter_empty<V, F>(
    key: &[u8],
    f: &mut F,
) -> anyhow::Result<(Option<BufferedRef<TrieNode<V>>>, Alteration<V>)>
where
    V: Clone + Serialize + DeserializeOwned + FlushNested,
    F: FnMut(Option<&V>) -> Alteration<V>,
{
    match f(None) {
        Alteration::NoChange => Ok((None, Alteration::NoChange)),
        Alteration::Remove => Ok((None, Alteration::NoChange)),
        Alteration::Insert(v) => {
            let tip = BufferedRef::make(TrieNode::Tip(v.clone()));
            let node = if key.is_empty() {
                tip
            } else {
                BufferedRef::make(TrieNode::Stem(key.to_vec(), Box::new(tip)))
            };
            Ok((Some(node), Alteration::Insert(v)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
    struct Val(u64);
    buffered_ref::impl_flush_nested_noop!(Val);

    fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("trie")).unwrap();
        (dir, store)
    }

    fn key(bytes: &[u8]) -> Vec<u8> {
        let mut k = vec![0u8; 4];
        k[..bytes.len()].copy_from_slice(bytes);
        k
    }

    #[test]
    fn insert_then_get_round_trips() {
        let (_dir, store) = store();
        let trie = PatriciaTrie::<Val>::new();
        let trie = trie.insert(&store, &key(&[1, 2, 3, 4]), Val(42)).unwrap();
        assert_eq!(*trie.get(&store, &key(&[1, 2, 3, 4])).unwrap().unwrap(), Val(42));
        assert!(trie.get(&store, &key(&[9, 9, 9, 9])).unwrap().is_none());
    }

    #[test]
    fn diverging_keys_split_into_a_branch() {
        let (_dir, store) = store();
        let trie = PatriciaTrie::<Val>::new();
        let trie = trie.insert(&store, &key(&[1, 2, 3, 4]), Val(1)).unwrap();
        let trie = trie.insert(&store, &key(&[1, 2, 9, 9]), Val(2)).unwrap();
        assert_eq!(*trie.get(&store, &key(&[1, 2, 3, 4])).unwrap().unwrap(), Val(1));
        assert_eq!(*trie.get(&store, &key(&[1, 2, 9, 9])).unwrap().unwrap(), Val(2));
    }

    #[test]
    fn remove_is_a_noop_on_missing_key() {
        let (_dir, store) = store();
        let trie = PatriciaTrie::<Val>::new();
        let trie = trie.insert(&store, &key(&[1, 1, 1, 1]), Val(7)).unwrap();
        let (same, alteration) = trie.alter(&store, &key(&[2, 2, 2, 2]), |existing| {
            assert!(existing.is_none());
            Alteration::NoChange
        }).unwrap();
        assert_eq!(alteration, Alteration::NoChange);
        assert_eq!(
            *same.get(&store, &key(&[1, 1, 1, 1])).unwrap().unwrap(),
            Val(7)
        );
    }

    #[test]
    fn remove_collapses_a_two_child_branch_to_one_stem() {
        let (_dir, store) = store();
        let trie = PatriciaTrie::<Val>::new();
        let trie = trie.insert(&store, &key(&[1, 2, 3, 4]), Val(1)).unwrap();
        let trie = trie.insert(&store, &key(&[1, 2, 9, 9]), Val(2)).unwrap();
        let trie = trie.remove(&store, &key(&[1, 2, 3, 4])).unwrap();
        assert!(trie.get(&store, &key(&[1, 2, 3, 4])).unwrap().is_none());
        assert_eq!(*trie.get(&store, &key(&[1, 2, 9, 9])).unwrap().unwrap(), Val(2));
    }

    #[test]
    fn insert_many_and_get_all() {
        let (_dir, store) = store();
        let mut trie = PatriciaTrie::<Val>::new();
        for i in 0u32..200 {
            trie = trie.insert(&store, &i.to_be_bytes(), Val(i as u64)).unwrap();
        }
        for i in 0u32..200 {
            assert_eq!(
                *trie.get(&store, &i.to_be_bytes()).unwrap().unwrap(),
                Val(i as u64)
            );
        }
    }

    proptest! {
        /// Trie law: `lookup(k, insert(k, v, t)) = Some(v)`
        /// for every key in a randomly-built trie.
        #[test]
        fn lookup_after_insert_is_always_some(
            entries in proptest::collection::hash_map(any::<u32>(), any::<u64>(), 1..60)
        ) {
            let (_dir, store) = store();
            let mut trie = PatriciaTrie::<Val>::new();
            for (k, v) in &entries {
                trie = trie.insert(&store, &k.to_be_bytes(), Val(*v)).unwrap();
            }
            for (k, v) in &entries {
                prop_assert_eq!(*trie.get(&store, &k.to_be_bytes()).unwrap().unwrap(), Val(*v));
            }
        }

        /// Trie law: inserting then deleting every key yields an empty trie.
        #[test]
        fn insert_then_delete_every_key_yields_empty_trie(
            keys in proptest::collection::hash_set(any::<u32>(), 1..60)
        ) {
            let (_dir, store) = store();
            let mut trie = PatriciaTrie::<Val>::new();
            for k in &keys {
                trie = trie.insert(&store, &k.to_be_bytes(), Val(*k as u64)).unwrap();
            }
            for k in &keys {
                trie = trie.remove(&store, &k.to_be_bytes()).unwrap();
            }
            prop_assert!(trie.is_empty());
            for k in &keys {
                prop_assert!(trie.get(&store, &k.to_be_bytes()).unwrap().is_none());
            }
        }

        /// Trie law: the final key-value mapping is invariant under
        /// reordering of the inserts that produced it — two different
        /// insertion orders of the same entry set agree on every lookup.
        #[test]
        fn final_mapping_is_invariant_under_insertion_order(
            entries in proptest::collection::hash_map(any::<u32>(), any::<u64>(), 1..40),
            seed in any::<u64>(),
        ) {
            let (_dir, store) = store();
            let mut forward = PatriciaTrie::<Val>::new();
            let mut ordered: Vec<_> = entries.iter().collect();
            for (k, v) in &ordered {
                forward = forward.insert(&store, &k.to_be_bytes(), Val(**v)).unwrap();
            }
            // A deterministic pseudo-shuffle keyed on `seed`, not real randomness.
            ordered.sort_by_key(|(k, _)| (**k as u64).wrapping_mul(seed | 1));
            let mut reordered = PatriciaTrie::<Val>::new();
            for (k, v) in &ordered {
                reordered = reordered.insert(&store, &k.to_be_bytes(), Val(**v)).unwrap();
            }
            for (k, v) in &entries {
                prop_assert_eq!(*forward.get(&store, &k.to_be_bytes()).unwrap().unwrap(), Val(*v));
                prop_assert_eq!(*reordered.get(&store, &k.to_be_bytes()).unwrap().unwrap(), Val(*v));
            }
        }
    }
}
