// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

/// Static configuration for a consensus node. Parsing this from a
/// config file or CLI is out of scope (spec.md §1 excludes "CLI/config"
/// as an external collaborator) — an embedding node constructs this
/// struct however it likes and hands it to [`crate`] the way the
/// teacher's `consensus` crate is handed an already-parsed
/// `libra_config::NodeConfig`.
#[derive(Clone, Debug)]
pub struct ConsensusConfig {
    /// Base timeout duration for round 1 of a streak of consecutive
    /// timeouts (spec.md §4.10).
    pub timeout_base: Duration,
    /// Multiplicative growth factor applied per consecutive timeout.
    pub timeout_growth_factor: f64,
    /// Fraction of total committee weight required to form a QC or TC
    /// (spec.md §4.8: "accumulated_weight / total_weight ≥
    /// signature_threshold").
    pub signature_threshold: f64,
    /// Maximum number of pruned blocks kept resident in memory after
    /// finalization (teacher's `max_pruned_blocks_in_mem`).
    pub max_pruned_blocks_in_mem: usize,
    /// Capacity of the bounded FIFO `dead_cache` (spec.md §3).
    pub dead_cache_capacity: usize,
    /// Path to the append-only blob store file.
    pub blob_store_path: PathBuf,
    /// Path to the LMDB environment backing the account map.
    pub account_map_lmdb_path: PathBuf,
    /// LMDB map size in bytes.
    pub account_map_lmdb_map_size: usize,
}

impl ConsensusConfig {
    /// Reasonable defaults for tests and local development, mirroring
    /// the magnitude of values a real deployment would use.
    pub fn for_testing(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        ConsensusConfig {
            timeout_base: Duration::from_millis(2_500),
            timeout_growth_factor: 1.2,
            signature_threshold: 2.0 / 3.0,
            max_pruned_blocks_in_mem: 10,
            dead_cache_capacity: 1_000,
            blob_store_path: data_dir.join("blocks.blob"),
            account_map_lmdb_path: data_dir.join("accountmap.lmdb"),
            account_map_lmdb_map_size: 1 << 30,
        }
    }

    pub fn timeout_for(&self, consecutive_timeouts: u32) -> Duration {
        let factor = self.timeout_growth_factor.powi(consecutive_timeouts as i32);
        Duration::from_secs_f64(self.timeout_base.as_secs_f64() * factor)
    }
}
