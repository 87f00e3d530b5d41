// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! The account-address-to-index map: an LMDB-backed
//! persistent layer for finalized accounts, plus a chain of in-memory
//! [`DifferenceMap`]s for accounts created by live, not-yet-finalized
//! blocks. A lookup checks its own difference map, then its ancestors'
//! in order, and falls through to LMDB only once the whole chain has
//! been exhausted.

use lmdb::{Cursor, Database, Environment, RwTransaction, Transaction, WriteFlags};
use parking_lot::RwLock;
use primitives::address::{AccountAddress, AccountAddressEq};
use primitives::AccountIndex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Name of the LMDB sub-database holding the persistent address→index
/// mapping.
const DB_NAME: &str = "account_map";

fn encode_index(index: AccountIndex) -> [u8; 8] {
    index.to_be_bytes()
}

fn decode_index(bytes: &[u8]) -> anyhow::Result<AccountIndex> {
    anyhow::ensure!(bytes.len() == 8, "malformed account-index value");
    Ok(AccountIndex::from_be_bytes(bytes.try_into().unwrap()))
}

/// The persistent layer: a single LMDB database mapping the full
/// 32-byte `AccountAddress` to its `AccountIndex`.
pub struct LmdbAccountIndex {
    env: Environment,
    db: Database,
}

impl LmdbAccountIndex {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::open_with_map_size(path, 1 << 30)
    }

    /// As [`Self::open`], but with an explicit LMDB map size (the
    /// embedding node's `ConsensusConfig::account_map_lmdb_map_size`).
    pub fn open_with_map_size(path: impl AsRef<Path>, map_size: usize) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&path)?;
        let env = Environment::new()
            .set_max_dbs(1)
            .set_map_size(map_size)
            .open(path.as_ref())?;
        let db = env.create_db(Some(DB_NAME), lmdb::DatabaseFlags::empty())?;
        Ok(LmdbAccountIndex { env, db })
    }

    /// Exact lookup of a single address.
    pub fn get(&self, address: &AccountAddress) -> anyhow::Result<Option<AccountIndex>> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.db, &address.as_bytes()) {
            Ok(bytes) => Ok(Some(decode_index(bytes)?)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Equivalence-class lookup: the first stored address (if any)
    /// whose canonical 29-byte prefix matches `eq`. Addresses sort by
    /// their full byte representation, so every alias of `eq` forms a
    /// contiguous range starting at `eq`'s prefix padded with zeros.
    pub fn get_equivalent(
        &self,
        eq: &AccountAddressEq,
    ) -> anyhow::Result<Option<(AccountAddress, AccountIndex)>> {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.db)?;
        let mut range_start = [0u8; 32];
        range_start[..eq.as_bytes().len()].copy_from_slice(eq.as_bytes());
        for item in cursor.iter_from(&range_start[..]) {
            let (key, value) = item?;
            anyhow::ensure!(key.len() == 32, "malformed account-address key");
            let mut addr_bytes = [0u8; 32];
            addr_bytes.copy_from_slice(key);
            let address = AccountAddress::new(addr_bytes);
            if &address.canonical() != eq {
                return Ok(None);
            }
            return Ok(Some((address, decode_index(value)?)));
        }
        Ok(None)
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> anyhow::Result<usize> {
        let txn = self.env.begin_ro_txn()?;
        Ok(txn.stat(self.db)?.entries())
    }

    pub fn is_empty(&self) -> anyhow::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Atomically insert every `(address, index)` pair. Used both by
    /// `write_accounts_created` (finalization) and, at startup, by
    /// `populate_from_accounts`.
    pub fn insert_all<I>(&self, entries: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = (AccountAddress, AccountIndex)>,
    {
        let mut txn = self.env.begin_rw_txn()?;
        write_entries(&mut txn, self.db, entries)?;
        txn.commit()?;
        Ok(())
    }
}

fn write_entries<I>(txn: &mut RwTransaction<'_>, db: Database, entries: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = (AccountAddress, AccountIndex)>,
{
    for (address, index) in entries {
        txn.put(
            db,
            &address.as_bytes(),
            &encode_index(index),
            WriteFlags::empty(),
        )?;
    }
    Ok(())
}

/// A per-block, in-memory overlay of account creations not yet
/// finalized. `entries` is keyed by the canonical equivalence class so
/// alias lookups resolve within a single in-progress block exactly as
/// they would against LMDB; the associated full address is retained so
/// a later `write_accounts_created` can write the real LMDB key.
pub struct DifferenceMap {
    entries: HashMap<AccountAddressEq, (AccountAddress, AccountIndex)>,
    parent: RwLock<Option<Arc<DifferenceMap>>>,
}

impl DifferenceMap {
    /// The difference map of a block with no live, unfinalized
    /// ancestor — its own LMDB insertions have already landed.
    pub fn new_root() -> Self {
        DifferenceMap {
            entries: HashMap::new(),
            parent: RwLock::new(None),
        }
    }

    pub fn new_child(parent: Arc<DifferenceMap>) -> Self {
        DifferenceMap {
            entries: HashMap::new(),
            parent: RwLock::new(Some(parent)),
        }
    }

    pub fn insert(&mut self, address: AccountAddress, index: AccountIndex) {
        self.entries.insert(address.canonical(), (address, index));
    }

    /// Search this map, then each ancestor in order, then fall through
    /// to LMDB. `current_size` bounds-checks the result against the
    /// live account count, guarding against a stale index surviving a
    /// rollback.
    pub fn lookup(
        &self,
        lmdb: &LmdbAccountIndex,
        address: &AccountAddress,
        current_size: AccountIndex,
    ) -> anyhow::Result<Option<AccountIndex>> {
        let found = self.lookup_unbounded(lmdb, address)?;
        Ok(found.filter(|idx| *idx < current_size))
    }

    fn lookup_unbounded(
        &self,
        lmdb: &LmdbAccountIndex,
        address: &AccountAddress,
    ) -> anyhow::Result<Option<AccountIndex>> {
        let eq = address.canonical();
        if let Some((_, index)) = self.entries.get(&eq) {
            return Ok(Some(*index));
        }
        // Atomic load: a concurrent finalization may clear this exact
        // instant, but either outcome (see the parent, or see None and
        // fall through) is a valid observation.
        let parent = self.parent.read().clone();
        match parent {
            Some(parent) => parent.lookup_unbounded(lmdb, address),
            None => Ok(lmdb.get_equivalent(&eq)?.map(|(_, idx)| idx)),
        }
    }

    /// Every entry held by this map and all of its ancestors, in
    /// ascending address order. Entries lower in the chain (closer to
    /// `self`) shadow same-address entries from ancestors, though in
    /// practice an account is only ever created once.
    pub fn flatten(&self) -> Vec<(AccountAddress, AccountIndex)> {
        let mut seen = HashMap::new();
        self.collect_into(&mut seen);
        let mut out: Vec<_> = seen.into_values().collect();
        out.sort_by_key(|(addr, _)| *addr);
        out
    }

    fn collect_into(&self, seen: &mut HashMap<AccountAddressEq, (AccountAddress, AccountIndex)>) {
        for (eq, entry) in &self.entries {
            seen.entry(*eq).or_insert(*entry);
        }
        if let Some(parent) = self.parent.read().clone() {
            parent.collect_into(seen);
        }
    }

    /// Detach from the parent chain: called on every live child of a
    /// block once that block has been finalized and its own creations
    /// written to LMDB, so lookups fall straight through to LMDB
    /// instead of re-walking a now-finalized ancestor.
    pub fn clear_parent(&self) {
        *self.parent.write() = None;
    }

    pub fn has_parent(&self) -> bool {
        self.parent.read().is_some()
    }
}

/// Flatten `map`'s own entries (not its ancestors') into LMDB in one
/// write transaction, then detach every map in `live_children` from
/// it. Called when the block owning `map` is finalized.
pub fn write_accounts_created(
    lmdb: &LmdbAccountIndex,
    map: &DifferenceMap,
    live_children: &[Arc<DifferenceMap>],
) -> anyhow::Result<()> {
    let own_entries: Vec<_> = map.entries.values().copied().collect();
    lmdb.insert_all(own_entries)?;
    for child in live_children {
        child.clear_parent();
    }
    Ok(())
}

/// Startup path: if LMDB is empty, seed it from the current account
/// table in ascending index order, in one transaction.
pub fn populate_from_accounts<I>(lmdb: &LmdbAccountIndex, accounts: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = (AccountAddress, AccountIndex)>,
{
    if lmdb.is_empty()? {
        lmdb.insert_all(accounts)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// A distinct account address for each `tag`: varies a byte inside
    /// the 29-byte canonical prefix so that different tags are never
    /// accidental aliases of each other (the last three bytes, which
    /// aliasing ignores, stay fixed).
    fn addr(tag: u8) -> AccountAddress {
        let mut bytes = [7u8; 32];
        bytes[0] = tag;
        AccountAddress::new(bytes)
    }

    fn open_store() -> (tempfile::TempDir, LmdbAccountIndex) {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbAccountIndex::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn exact_and_equivalence_lookup() {
        let (_dir, lmdb) = open_store();
        lmdb.insert_all(vec![(addr(1), 0u64)]).unwrap();
        assert_eq!(lmdb.get(&addr(1)).unwrap(), Some(0));
        assert_eq!(lmdb.get(&addr(2)).unwrap(), None);

        let mut aliased = *addr(1).as_bytes();
        aliased[29] = 250;
        let aliased = AccountAddress::new(aliased);
        assert_eq!(
            lmdb.get_equivalent(&aliased.canonical())
                .unwrap()
                .map(|(_, i)| i),
            Some(0)
        );
    }

    #[test]
    fn difference_map_chain_falls_through_to_lmdb() {
        let (_dir, lmdb) = open_store();
        lmdb.insert_all(vec![(addr(1), 0u64)]).unwrap();

        let root = Arc::new(DifferenceMap::new_root());
        let mut child = DifferenceMap::new_child(Arc::clone(&root));
        child.insert(addr(2), 1);

        assert_eq!(child.lookup(&lmdb, &addr(1), 2).unwrap(), Some(0));
        assert_eq!(child.lookup(&lmdb, &addr(2), 2).unwrap(), Some(1));
        assert_eq!(child.lookup(&lmdb, &addr(3), 2).unwrap(), None);
    }

    #[test]
    fn lookup_bounds_checks_against_current_size() {
        let (_dir, lmdb) = open_store();
        let mut root = DifferenceMap::new_root();
        root.insert(addr(1), 5);
        // current_size of 3 means index 5 must not be visible (rollback guard).
        assert_eq!(root.lookup(&lmdb, &addr(1), 3).unwrap(), None);
        assert_eq!(root.lookup(&lmdb, &addr(1), 6).unwrap(), Some(5));
    }

    #[test]
    fn finalization_clears_parent_of_live_children() {
        let (_dir, lmdb) = open_store();
        let mut parent = DifferenceMap::new_root();
        parent.insert(addr(1), 0);
        let parent = Arc::new(parent);
        let child = Arc::new(DifferenceMap::new_child(Arc::clone(&parent)));
        assert!(child.has_parent());

        write_accounts_created(&lmdb, &parent, &[Arc::clone(&child)]).unwrap();

        assert!(!child.has_parent());
        assert_eq!(lmdb.get(&addr(1)).unwrap(), Some(0));
        assert_eq!(child.lookup(&lmdb, &addr(1), 1).unwrap(), Some(0));
    }

    #[test]
    fn flatten_orders_by_address_ascending() {
        let mut root = DifferenceMap::new_root();
        root.insert(addr(9), 0);
        let root = Arc::new(root);
        let mut child = DifferenceMap::new_child(Arc::clone(&root));
        child.insert(addr(1), 1);
        let flat = child.flatten();
        assert_eq!(flat, vec![(addr(1), 1), (addr(9), 0)]);
    }

    proptest! {
        /// Account-map equivalence: `lookup(addr) = Some(i)`
        /// iff `(addr, i)` is in the union of LMDB and the difference-map
        /// chain, bounded by the current account-table size.
        #[test]
        fn lookup_matches_the_union_of_lmdb_and_difference_map(
            lmdb_entries in proptest::collection::hash_map(1u8..=250, 0u64..50, 0..10),
            diff_entries in proptest::collection::hash_map(1u8..=250, 0u64..50, 0..10),
            bound in 0u64..60,
        ) {
            let (_dir, lmdb) = open_store();
            lmdb.insert_all(lmdb_entries.iter().map(|(last, idx)| (addr(*last), *idx)).collect()).unwrap();

            let mut diff = DifferenceMap::new_root();
            for (last, idx) in &diff_entries {
                diff.insert(addr(*last), *idx);
            }

            // Expected: the difference map shadows LMDB for the same address.
            let mut expected: HashMap<u8, u64> = lmdb_entries.clone();
            expected.extend(diff_entries.iter().map(|(k, v)| (*k, *v)));

            for last in 1u8..=250 {
                let got = diff.lookup(&lmdb, &addr(last), bound).unwrap();
                match expected.get(&last) {
                    Some(idx) if *idx < bound => prop_assert_eq!(got, Some(*idx)),
                    _ => prop_assert_eq!(got, None),
                }
            }
        }
    }
}
