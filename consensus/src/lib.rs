// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! The node-facing binding layer (spec.md §5): owns the single
//! `parking_lot::Mutex`-guarded [`tree_state::TreeState`], the blob
//! store and account-map LMDB handles it shares with every `receive_*`
//! call, and the background timer tasks spec.md §5 permits alongside
//! the serial consensus task. Everything in `primitives`,
//! `consensus-types`, `block-state`, `account-map` and `tree-state` is
//! pure logic over explicit arguments; this crate is the only place
//! that owns storage handles and a lock, mirroring the teacher's own
//! split between `chained_bft`'s pure `BlockTree` and `BlockStore`'s
//! `Arc<RwLock<BlockTree<T>>>` wrapper plus its `PersistentStorage`
//! handle.

pub mod counters;
pub mod persistent_store;
pub mod timers;

use account_map::LmdbAccountIndex;
use blob_store::BlobStore;
use block_state::BlockState;
use consensus_types::{CommitteeProvider, Executor, LeaderElection};
use persistent_store::{BlockMetadata, PersistentStore};
use primitives::crypto::SignatureScheme;
use primitives::{ConsensusConfig, HashValue, ReceiveResult, Verdict};
use std::sync::Arc;
use timers::{FinalizationCatchupTimer, TimeoutTimer, TimerEvent};
use tokio::sync::mpsc;
use tree_state::{Engine, GenesisData, Storage, TreeState};

/// The trait-object collaborators a running node wires in, bundled so
/// [`ConsensusRunner::new`] doesn't take five separate `Arc` parameters
/// (spec.md §1's external collaborators: the executor, the opaque
/// crypto seam, committee/leader-election resolution).
pub struct Collaborators {
    pub signature_scheme: Arc<dyn SignatureScheme>,
    pub committee_provider: Arc<dyn CommitteeProvider>,
    pub leader_election: Arc<dyn LeaderElection>,
    pub executor: Arc<dyn Executor<State = BlockState>>,
}

/// Owns every mutable resource a consensus node's single logical task
/// touches: the in-memory tree (behind one lock, per spec.md §5), the
/// blob store, the account-map LMDB environment, and the
/// [`PersistentStore`] for blocks/metadata/round status. Every public
/// method here corresponds to one of spec.md §2's "receive-block /
/// receive-quorum-message / receive-timeout-message / receive-
/// transaction" entrypoints, or to the round/epoch/timer plumbing of
/// §5 that drives them.
pub struct ConsensusRunner {
    config: ConsensusConfig,
    blob_store: BlobStore,
    lmdb_accounts: LmdbAccountIndex,
    persistent_store: Arc<dyn PersistentStore>,
    collaborators: Collaborators,
    tree: parking_lot::Mutex<TreeState>,
}

impl ConsensusRunner {
    /// Bootstrap a fresh node: opens the blob store and account-map
    /// LMDB environment at the configured paths, builds the genesis
    /// block, and seeds an empty [`TreeState`] (spec.md §4.6's
    /// bootstrap path). A node resuming from disk uses [`Self::resume`]
    /// instead.
    pub fn bootstrap(
        config: ConsensusConfig,
        persistent_store: Arc<dyn PersistentStore>,
        collaborators: Collaborators,
        genesis_state: BlockState,
        committee_size: usize,
        initial_nonce: HashValue,
    ) -> anyhow::Result<Self> {
        let blob_store = BlobStore::open(&config.blob_store_path)?;
        let lmdb_accounts = LmdbAccountIndex::open_with_map_size(&config.account_map_lmdb_path, config.account_map_lmdb_map_size)?;

        let tree = {
            let storage = Storage {
                store: &blob_store,
                lmdb: &lmdb_accounts,
            };
            TreeState::new(
                &storage,
                &config,
                GenesisData {
                    state: genesis_state,
                    committee_size,
                    initial_nonce,
                },
            )?
        };
        persistent_store.put_round_status(&tree.round_status)?;

        Ok(ConsensusRunner {
            config,
            blob_store,
            lmdb_accounts,
            persistent_store,
            collaborators,
            tree: parking_lot::Mutex::new(tree),
        })
    }

    fn storage(&self) -> Storage<'_> {
        Storage {
            store: &self.blob_store,
            lmdb: &self.lmdb_accounts,
        }
    }

    fn engine(&self) -> Engine<'_> {
        Engine {
            config: &self.config,
            signature_scheme: self.collaborators.signature_scheme.as_ref(),
            committee_provider: self.collaborators.committee_provider.as_ref(),
            leader_election: self.collaborators.leader_election.as_ref(),
            executor: self.collaborators.executor.as_ref(),
        }
    }

    /// `receive_block` (spec.md §4.7). On acceptance, persists the
    /// block and its metadata and refreshes the persisted round status
    /// before returning, so a crash right after cannot lose the write
    /// the in-memory tree already reflects.
    pub fn receive_block(&self, block: consensus_types::Block) -> anyhow::Result<Verdict> {
        let hash = block.hash();
        let parent_hash = block.parent_hash();
        let storage = self.storage();
        let engine = self.engine();
        let mut tree = self.tree.lock();
        let verdict = tree_state::receive_block::receive_block(&mut tree, &storage, &engine, block.clone())?;
        if verdict.result == ReceiveResult::Success {
            counters::BLOCKS_RECEIVED.inc();
            let height = tree
                .node(&hash)
                .map(|node| node.height)
                .unwrap_or_default();
            self.persistent_store.put_block(hash, &block, &BlockMetadata { height, parent_hash })?;
            self.persistent_store.put_round_status(&tree.round_status)?;
        } else if verdict.result == ReceiveResult::Invalid {
            counters::BLOCKS_REJECTED.inc();
        }
        if verdict.flag.is_some() {
            counters::SECURITY_FLAGS.inc();
        }
        counters::observe_tree_state(&tree);
        Ok(verdict)
    }

    /// `receive_quorum_message` (spec.md §4.8).
    pub fn receive_quorum_message(&self, qm: consensus_types::QuorumMessage) -> anyhow::Result<Verdict> {
        let storage = self.storage();
        let engine = self.engine();
        let mut tree = self.tree.lock();
        let verdict = tree_state::quorum::receive_quorum_message(&mut tree, &storage, &engine, qm)?;
        if verdict.result == ReceiveResult::Success {
            self.persistent_store.put_round_status(&tree.round_status)?;
        }
        if verdict.flag.is_some() {
            counters::SECURITY_FLAGS.inc();
        }
        counters::observe_tree_state(&tree);
        Ok(verdict)
    }

    /// `receive_timeout_message` (spec.md §4.9).
    pub fn receive_timeout_message(&self, tm: consensus_types::TimeoutMessage) -> anyhow::Result<Verdict> {
        let storage = self.storage();
        let engine = self.engine();
        let mut tree = self.tree.lock();
        let verdict = tree_state::timeout::receive_timeout_message(&mut tree, &storage, &engine, tm)?;
        if verdict.result == ReceiveResult::Success {
            self.persistent_store.put_round_status(&tree.round_status)?;
        }
        if verdict.flag.is_some() {
            counters::SECURITY_FLAGS.inc();
        }
        counters::observe_tree_state(&tree);
        Ok(verdict)
    }

    /// `receive_transaction` (spec.md §4.12), for individually
    /// submitted transactions (origin `Individual`).
    pub fn receive_transaction(&self, transaction: consensus_types::Transaction) -> anyhow::Result<ReceiveResult> {
        let storage = self.storage();
        let mut tree = self.tree.lock();
        tree_state::transactions::receive_transaction(
            &mut tree,
            &storage,
            transaction,
            consensus_types::TransactionOrigin::Individual,
            None,
        )
    }

    /// Apply a fired [`TimerEvent`] to the consensus task. A round
    /// timeout with no evidence yet is recorded only as a counter —
    /// the actual timeout *message* this node sends is built and
    /// signed by the embedding node (it needs this node's own signing
    /// key, which the opaque `SignatureScheme` seam does not expose a
    /// "sign with my key" operation for, by design: spec.md §1 treats
    /// signing as the caller's concern).
    pub fn handle_timer_event(&self, event: TimerEvent) {
        match event {
            TimerEvent::RoundTimeout => counters::TIMEOUTS_TRIGGERED.inc(),
            TimerEvent::FinalizationCatchup => {}
        }
    }

    /// Flip `consensus_shutdown`; every `receive_*` entrypoint then
    /// returns `ConsensusShutdown` without mutating state (spec.md §5).
    pub fn shutdown(&self) {
        self.tree.lock().consensus_shutdown = true;
    }

    pub fn is_shutdown(&self) -> bool {
        self.tree.lock().consensus_shutdown
    }

    /// Current round, for the baker loop's `time_until_next_slot` poll
    /// (spec.md §5's optional baker loop).
    pub fn current_round(&self) -> primitives::Round {
        self.tree.lock().round_status.current_round
    }

    pub fn last_finalized_round(&self) -> primitives::Round {
        self.tree.lock().last_finalized().block.round
    }

    /// Arm a [`TimeoutTimer`] against this runner's configured
    /// base/growth timeout for the node's current consecutive-timeout
    /// streak.
    pub fn arm_timeout_timer(&self, timer: &mut TimeoutTimer) {
        let consecutive_timeouts = self.tree.lock().consecutive_timeouts;
        timer.reset(self.config.timeout_for(consecutive_timeouts));
    }

    pub fn start_finalization_catchup_timer(&self, period: std::time::Duration) -> (FinalizationCatchupTimer, mpsc::UnboundedReceiver<TimerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FinalizationCatchupTimer::start(tx, period), rx)
    }
}
