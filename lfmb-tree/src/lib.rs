// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! A left-full Merkle binary tree indexed by a dense 64-bit
//! `AccountIndex`. Appending the `n`-th leaf places it
//! at the unique position that keeps the tree left-full: splitting at
//! the largest power of two strictly less than the new size, exactly
//! the shape used by RFC 6962-style history trees. The resulting root
//! hash depends only on the tree's size and its leaf hashes, never on
//! the order flush/uncache happened to run in.

use blob_store::BlobStore;
use buffered_ref::{BufferedRef, FlushNested};
use primitives::HashValue;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

/// A value storable as an LFMB leaf: must be able to produce its own
/// Merkle hash independent of its position in the tree.
pub trait Hashable {
    fn hash(&self) -> HashValue;
}

const EMPTY_TAG: &[u8] = b"LFMB::EMPTY";
const LEAF_TAG: &[u8] = b"LFMB::LEAF";
const NODE_TAG: &[u8] = b"LFMB::NODE";

fn empty_hash() -> HashValue {
    HashValue::sha3(EMPTY_TAG)
}

fn leaf_hash(h: HashValue) -> HashValue {
    HashValue::combine_tagged(LEAF_TAG, &[h.as_bytes()])
}

fn branch_hash(left: HashValue, right: HashValue) -> HashValue {
    HashValue::combine_tagged(NODE_TAG, &[left.as_bytes(), right.as_bytes()])
}

/// Largest power of two strictly less than `n` (`n > 1`).
fn split_point(n: u64) -> u64 {
    debug_assert!(n > 1);
    let mut k = 1u64;
    while k * 2 < n {
        k *= 2;
    }
    k
}

#[derive(Serialize, Deserialize)]
pub enum Node<V> {
    Leaf(V),
    Branch {
        left_size: u64,
        left_hash: HashValue,
        left: BufferedRef<Node<V>>,
        right_size: u64,
        right_hash: HashValue,
        right: BufferedRef<Node<V>>,
    },
}

impl<V> FlushNested for Node<V>
where
    V: Serialize + DeserializeOwned + FlushNested,
{
    fn flush_nested(&self, store: &BlobStore) -> anyhow::Result<()> {
        if let Node::Branch { left, right, .. } = self {
            left.flush(store)?;
            right.flush(store)?;
        }
        Ok(())
    }
}

impl<V> Node<V>
where
    V: Hashable,
{
    fn hash(&self) -> HashValue {
        match self {
            Node::Leaf(v) => leaf_hash(v.hash()),
            Node::Branch {
                left_hash,
                right_hash,
                ..
            } => branch_hash(*left_hash, *right_hash),
        }
    }
}

/// A left-full Merkle binary tree. Append-only; `update` returns a new
/// tree sharing every subtree not on the path to the updated leaf.
pub struct LfmbTree<V> {
    size: u64,
    root: Option<BufferedRef<Node<V>>>,
}

impl<V> Default for LfmbTree<V> {
    fn default() -> Self {
        LfmbTree {
            size: 0,
            root: None,
        }
    }
}

impl<V> LfmbTree<V>
where
    V: Hashable + Serialize + DeserializeOwned + FlushNested,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The root hash: `H(empty_marker)` when the tree holds no leaves,
    /// otherwise the hash of the root node.
    pub fn root_hash(&self, store: &BlobStore) -> anyhow::Result<HashValue> {
        match &self.root {
            None => Ok(empty_hash()),
            Some(root) => Ok(node_hash(root, store)?),
        }
    }

    /// Append a new leaf; it is placed at the unique index that keeps
    /// the tree left-full.
    pub fn append(&self, store: &BlobStore, value: V) -> anyhow::Result<Self> {
        let new_size = self.size + 1;
        let new_root = match (&self.root, self.size) {
            (None, _) => BufferedRef::make(Node::Leaf(value)),
            (Some(root), size) => insert_rightmost(root, size, value, store)?,
        };
        Ok(LfmbTree {
            size: new_size,
            root: Some(new_root),
        })
    }

    /// Replace the leaf at `index`, returning a new tree that shares
    /// every subtree not on the path to `index`.
    pub fn update(&self, store: &BlobStore, index: u64, value: V) -> anyhow::Result<Self> {
        anyhow::ensure!(index < self.size, "update index out of range");
        let root = self.root.as_ref().expect("size > 0 implies a root");
        let new_root = update_at(root, self.size, index, value, store)?;
        Ok(LfmbTree {
            size: self.size,
            root: Some(new_root),
        })
    }

    /// Visit leaves in ascending index order.
    pub fn mfold<F: FnMut(u64, &V) -> anyhow::Result<()>>(
        &self,
        store: &BlobStore,
        mut f: F,
    ) -> anyhow::Result<()> {
        if let Some(root) = &self.root {
            walk_ascending(root, 0, self.size, store, &mut f)?;
        }
        Ok(())
    }

    /// Visit leaves in descending index order.
    pub fn mfold_desc<F: FnMut(u64, &V) -> anyhow::Result<()>>(
        &self,
        store: &BlobStore,
        mut f: F,
    ) -> anyhow::Result<()> {
        if let Some(root) = &self.root {
            walk_descending(root, 0, self.size, store, &mut f)?;
        }
        Ok(())
    }

    /// Flush every node to the blob store and return the root's
    /// `BlobRef`. Idempotent.
    pub fn flush(&self, store: &BlobStore) -> anyhow::Result<Option<blob_store::BlobRef>> {
        match &self.root {
            None => Ok(None),
            Some(root) => Ok(Some(root.flush(store)?)),
        }
    }
}

impl<V> LfmbTree<V>
where
    V: Hashable + Serialize + DeserializeOwned + FlushNested + Clone,
{
    /// Fetch the leaf at `index`, if it has been appended yet.
    pub fn get(&self, store: &BlobStore, index: u64) -> anyhow::Result<Option<Arc<V>>> {
        if index >= self.size {
            return Ok(None);
        }
        let root = match &self.root {
            Some(r) => r,
            None => return Ok(None),
        };
        get_at(root, self.size, index, store)
    }
}

fn node_hash<V: Hashable + Serialize + DeserializeOwned + FlushNested>(
    node: &BufferedRef<Node<V>>,
    store: &BlobStore,
) -> anyhow::Result<HashValue> {
    let loaded = node.load(store)?;
    Ok(loaded.hash())
}

/// Insert a new rightmost leaf into a tree of the given current
/// `size`, preserving the left-full shape.
fn insert_rightmost<V>(
    node: &BufferedRef<Node<V>>,
    size: u64,
    value: V,
    store: &BlobStore,
) -> anyhow::Result<BufferedRef<Node<V>>>
where
    V: Hashable + Serialize + DeserializeOwned + FlushNested,
{
    if size == 1 {
        // The current subtree is a single leaf; it becomes the left
        // child of a new branch whose right child is the new leaf.
        let left_hash = node_hash(node, store)?;
        let new_leaf = BufferedRef::make(Node::Leaf(value));
        let right_hash = node_hash(&new_leaf, store)?;
        return Ok(BufferedRef::make(Node::Branch {
            left_size: 1,
            left_hash,
            left: node.clone(),
            right_size: 1,
            right_hash,
            right: new_leaf,
        }));
    }
    let loaded = node.load(store)?;
    match loaded.as_ref() {
        Node::Leaf(_) => unreachable!("a leaf subtree must have size 1"),
        Node::Branch {
            left_size,
            left,
            right_size,
            right,
            ..
        } => {
            let k = split_point(size + 1);
            if *left_size == k {
                // Left subtree is already at its final (perfect) size;
                // the new leaf goes into the right subtree.
                let new_right = insert_rightmost(right, *right_size, value, store)?;
                let left_hash = node_hash(left, store)?;
                let right_hash = node_hash(&new_right, store)?;
                Ok(BufferedRef::make(Node::Branch {
                    left_size: *left_size,
                    left_hash,
                    left: left.clone(),
                    right_size: right_size + 1,
                    right_hash,
                    right: new_right,
                }))
            } else {
                // Left subtree still needs growing.
                let new_left = insert_rightmost(left, *left_size, value, store)?;
                let left_hash = node_hash(&new_left, store)?;
                let right_hash = node_hash(right, store)?;
                Ok(BufferedRef::make(Node::Branch {
                    left_size: left_size + 1,
                    left_hash,
                    left: new_left,
                    right_size: *right_size,
                    right_hash,
                    right: right.clone(),
                }))
            }
        }
    }
}

fn get_at<V>(
    node: &BufferedRef<Node<V>>,
    size: u64,
    index: u64,
    store: &BlobStore,
) -> anyhow::Result<Option<Arc<V>>>
where
    V: Hashable + Serialize + DeserializeOwned + FlushNested + Clone,
{
    if size == 1 {
        let loaded = node.load(store)?;
        return match loaded.as_ref() {
            Node::Leaf(_) => {
                // Reload as an owned Arc<V> by projecting out of the Arc<Node<V>>.
                match Arc::try_unwrap(loaded) {
                    Ok(Node::Leaf(v)) => Ok(Some(Arc::new(v))),
                    Err(arc) => match arc.as_ref() {
                        Node::Leaf(_) => Ok(Some(project_leaf(&arc))),
                        _ => unreachable!(),
                    },
                    _ => unreachable!(),
                }
            }
            Node::Branch { .. } => unreachable!("a size-1 subtree must be a leaf"),
        };
    }
    let loaded = node.load(store)?;
    match loaded.as_ref() {
        Node::Leaf(_) => unreachable!("a subtree of size > 1 must be a branch"),
        Node::Branch {
            left_size,
            left,
            right_size,
            right,
            ..
        } => {
            if index < *left_size {
                get_at(left, *left_size, index, store)
            } else {
                get_at(right, *right_size, index - left_size, store)
            }
        }
    }
}

fn project_leaf<V: Clone>(node: &Node<V>) -> Arc<V> {
    match node {
        Node::Leaf(v) => Arc::new(v.clone()),
        Node::Branch { .. } => unreachable!(),
    }
}

fn update_at<V>(
    node: &BufferedRef<Node<V>>,
    size: u64,
    index: u64,
    value: V,
    store: &BlobStore,
) -> anyhow::Result<BufferedRef<Node<V>>>
where
    V: Hashable + Serialize + DeserializeOwned + FlushNested,
{
    if size == 1 {
        return Ok(BufferedRef::make(Node::Leaf(value)));
    }
    let loaded = node.load(store)?;
    match loaded.as_ref() {
        Node::Leaf(_) => unreachable!("a subtree of size > 1 must be a branch"),
        Node::Branch {
            left_size,
            left,
            right_size,
            right,
            ..
        } => {
            if index < *left_size {
                let new_left = update_at(left, *left_size, index, value, store)?;
                let left_hash = node_hash(&new_left, store)?;
                let right_hash = node_hash(right, store)?;
                Ok(BufferedRef::make(Node::Branch {
                    left_size: *left_size,
                    left_hash,
                    left: new_left,
                    right_size: *right_size,
                    right_hash,
                    right: right.clone(),
                }))
            } else {
                let new_right = update_at(right, *right_size, index - left_size, value, store)?;
                let left_hash = node_hash(left, store)?;
                let right_hash = node_hash(&new_right, store)?;
                Ok(BufferedRef::make(Node::Branch {
                    left_size: *left_size,
                    left_hash,
                    left: left.clone(),
                    right_size: *right_size,
                    right_hash,
                    right: new_right,
                }))
            }
        }
    }
}

fn walk_ascending<V, F>(
    node: &BufferedRef<Node<V>>,
    base_index: u64,
    size: u64,
    store: &BlobStore,
    f: &mut F,
) -> anyhow::Result<()>
where
    V: Hashable + Serialize + DeserializeOwned + FlushNested,
    F: FnMut(u64, &V) -> anyhow::Result<()>,
{
    let loaded = node.load(store)?;
    match loaded.as_ref() {
        Node::Leaf(v) => f(base_index, v),
        Node::Branch {
            left_size,
            left,
            right_size,
            right,
            ..
        } => {
            walk_ascending(left, base_index, *left_size, store, f)?;
            walk_ascending(right, base_index + left_size, *right_size, store, f)
        }
    }
}

fn walk_descending<V, F>(
    node: &BufferedRef<Node<V>>,
    base_index: u64,
    size: u64,
    store: &BlobStore,
    f: &mut F,
) -> anyhow::Result<()>
where
    V: Hashable + Serialize + DeserializeOwned + FlushNested,
    F: FnMut(u64, &V) -> anyhow::Result<()>,
{
    let loaded = node.load(store)?;
    match loaded.as_ref() {
        Node::Leaf(v) => f(base_index, v),
        Node::Branch {
            left_size,
            left,
            right_size,
            right,
            ..
        } => {
            walk_descending(right, base_index + left_size, *right_size, store, f)?;
            walk_descending(left, base_index, *left_size, store, f)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
    struct Val(u64);
    impl Hashable for Val {
        fn hash(&self) -> HashValue {
            HashValue::sha3(&self.0.to_be_bytes())
        }
    }
    buffered_ref::impl_flush_nested_noop!(Val);

    fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("lfmb")).unwrap();
        (dir, store)
    }

    #[test]
    fn append_and_get_round_trip() {
        let (_dir, store) = store();
        let mut tree = LfmbTree::<Val>::new();
        for i in 0..37u64 {
            tree = tree.append(&store, Val(i)).unwrap();
        }
        assert_eq!(tree.size(), 37);
        for i in 0..37u64 {
            assert_eq!(*tree.get(&store, i).unwrap().unwrap(), Val(i));
        }
        assert!(tree.get(&store, 37).unwrap().is_none());
    }

    #[test]
    fn root_hash_depends_only_on_size_and_leaves() {
        let (_dir, store) = store();
        let mut a = LfmbTree::<Val>::new();
        let mut b = LfmbTree::<Val>::new();
        for i in 0..20u64 {
            a = a.append(&store, Val(i)).unwrap();
        }
        for i in 0..20u64 {
            b = b.append(&store, Val(i)).unwrap();
            // Interleave flush/uncache churn; shouldn't affect the hash.
            b.flush(&store).unwrap();
        }
        assert_eq!(
            a.root_hash(&store).unwrap(),
            b.root_hash(&store).unwrap()
        );
    }

    #[test]
    fn update_shares_unrelated_subtrees() {
        let (_dir, store) = store();
        let mut tree = LfmbTree::<Val>::new();
        for i in 0..16u64 {
            tree = tree.append(&store, Val(i)).unwrap();
        }
        let updated = tree.update(&store, 3, Val(999)).unwrap();
        assert_eq!(*updated.get(&store, 3).unwrap().unwrap(), Val(999));
        assert_eq!(*tree.get(&store, 3).unwrap().unwrap(), Val(3));
        assert_eq!(*updated.get(&store, 10).unwrap().unwrap(), Val(10));
    }

    #[test]
    fn mfold_visits_in_ascending_order() {
        let (_dir, store) = store();
        let mut tree = LfmbTree::<Val>::new();
        for i in 0..11u64 {
            tree = tree.append(&store, Val(i)).unwrap();
        }
        let mut seen = vec![];
        tree.mfold(&store, |idx, v| {
            seen.push((idx, v.0));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, (0..11).map(|i| (i, i)).collect::<Vec<_>>());
    }

    proptest! {
        /// LFMB determinism: building a tree by `size`
        /// successive appends yields the same root hash regardless of
        /// how flush/uncache calls are interleaved between appends.
        #[test]
        fn root_hash_is_independent_of_flush_interleaving(
            values in proptest::collection::vec(any::<u64>(), 1..80),
            flush_mask in proptest::collection::vec(any::<bool>(), 1..80),
        ) {
            let (_dir, store) = store();
            let mut plain = LfmbTree::<Val>::new();
            let mut churned = LfmbTree::<Val>::new();
            for (i, v) in values.iter().enumerate() {
                plain = plain.append(&store, Val(*v)).unwrap();
                churned = churned.append(&store, Val(*v)).unwrap();
                if flush_mask.get(i).copied().unwrap_or(false) {
                    churned.flush(&store).unwrap();
                }
            }
            prop_assert_eq!(
                plain.root_hash(&store).unwrap(),
                churned.root_hash(&store).unwrap()
            );
        }
    }
}
