// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! An account's release schedule: a flat vector of per-transaction
//! release entries. The hash is computed incrementally
//! over the (sorted) entries still outstanding.
//!
//! The boundary condition where `rse_next_release_index` equals the
//! release vector length (i.e. the entry should be removed) is
//! resolved here (see DESIGN.md) by never keeping a separate index at
//! all: `release_due` removes every entry whose timestamp has passed
//! outright, so there is no index to ever equal (or overrun) the
//! vector length in the first place — a total function rather than an
//! index invariant to maintain by hand.

use primitives::{HashValue, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEntry {
    pub timestamp: Timestamp,
    pub amount: u64,
    /// Hash of the transaction that scheduled this release, carried so
    /// two distinct schedules releasing the same amount at the same
    /// time still hash distinctly.
    pub source_transaction: HashValue,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReleaseSchedule {
    /// Kept sorted ascending by `timestamp`.
    entries: Vec<ReleaseEntry>,
}

impl ReleaseSchedule {
    pub fn empty() -> Self {
        ReleaseSchedule { entries: Vec::new() }
    }

    pub fn total_locked(&self) -> u64 {
        self.entries.iter().map(|e| e.amount).sum()
    }

    pub fn schedule(&mut self, entry: ReleaseEntry) {
        let idx = self
            .entries
            .partition_point(|e| e.timestamp <= entry.timestamp);
        self.entries.insert(idx, entry);
    }

    /// Remove and return every entry due at or before `now`, along with
    /// their total amount.
    pub fn release_due(&mut self, now: Timestamp) -> (u64, Vec<ReleaseEntry>) {
        let split = self.entries.partition_point(|e| e.timestamp <= now);
        let released: Vec<_> = self.entries.drain(..split).collect();
        let amount = released.iter().map(|e| e.amount).sum();
        (amount, released)
    }

    pub fn hash(&self) -> HashValue {
        let mut acc = HashValue::sha3(b"RELEASE_SCHEDULE::EMPTY");
        for entry in &self.entries {
            let bytes = bcs::to_bytes(entry).expect("ReleaseEntry always serializes");
            acc = HashValue::combine(&acc, &HashValue::sha3(&bytes));
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: Timestamp, amount: u64) -> ReleaseEntry {
        ReleaseEntry {
            timestamp: ts,
            amount,
            source_transaction: HashValue::sha3(&ts.to_be_bytes()),
        }
    }

    #[test]
    fn release_due_removes_entries_outright() {
        let mut schedule = ReleaseSchedule::empty();
        schedule.schedule(entry(10, 5));
        schedule.schedule(entry(20, 7));
        schedule.schedule(entry(30, 11));

        let (released, entries) = schedule.release_due(20);
        assert_eq!(released, 12);
        assert_eq!(entries.len(), 2);
        assert_eq!(schedule.total_locked(), 11);

        let (released_again, entries_again) = schedule.release_due(20);
        assert_eq!(released_again, 0);
        assert!(entries_again.is_empty());
    }

    #[test]
    fn hash_changes_when_an_entry_is_released() {
        let mut schedule = ReleaseSchedule::empty();
        schedule.schedule(entry(10, 5));
        let before = schedule.hash();
        schedule.release_due(10);
        assert_ne!(before, schedule.hash());
        assert_eq!(schedule.hash(), ReleaseSchedule::empty().hash());
    }
}
