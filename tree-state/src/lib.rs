// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! The in-memory forest of live blocks (spec.md §3/§4.7-§4.12): the
//! five-state block lifecycle, the quorum/timeout protocol, round and
//! epoch bookkeeping, finalization, and the transaction pool. Every
//! public entrypoint takes `&mut TreeState` directly — this crate owns
//! no lock of its own; spec.md §5's single-logical-task concurrency
//! model is the caller's concern, not this one's.

pub mod finalization;
pub mod quorum;
pub mod receive_block;
pub mod round;
pub mod timeout;
pub mod transactions;

#[cfg(test)]
mod test_support;

use account_map::{DifferenceMap, LmdbAccountIndex};
use blob_store::BlobStore;
use block_state::BlockState;
use consensus_types::{Block, CommitteeProvider, Executor, LeaderElection, RoundStatus};
use primitives::crypto::{PublicKey, Signature, SignatureScheme};
use primitives::{AccountAddress, ConsensusConfig, HashValue, Round};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub use transactions::LiveStatus;

/// A live block tied to its executed state (spec.md §3: "each tree-state
/// block pointer owns `(block, state, difference_map)`"). `block-state`
/// has no dependency on `account-map`, so this is the layer that pairs a
/// block with both of its derived artifacts.
pub struct BlockNode {
    pub block: Block,
    pub hash: HashValue,
    pub height: u64,
    pub parent_hash: HashValue,
    pub state: Arc<BlockState>,
    pub accounts: Arc<DifferenceMap>,
}

/// The lifecycle state of a known block hash (spec.md §3: Unknown →
/// Pending → Alive → Finalized/Dead). `Unknown` is never constructed
/// directly; it is the absence of an entry anywhere else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    Unknown,
    Pending,
    Alive,
    Finalized,
    Dead,
}

/// Collaborators bundled together so the `receive_*`/round/finalization
/// functions do not each take five trait-object parameters individually.
pub struct Engine<'a> {
    pub config: &'a ConsensusConfig,
    pub signature_scheme: &'a dyn SignatureScheme,
    pub committee_provider: &'a dyn CommitteeProvider,
    pub leader_election: &'a dyn LeaderElection,
    pub executor: &'a dyn Executor<State = BlockState>,
}

/// The two storage handles every mutating entrypoint threads through
/// (mirroring `block-state`'s own convention of taking `&BlobStore`
/// explicitly rather than owning one): the blob store backing
/// `BlockState`'s `BufferedRef` tree, and the LMDB environment backing
/// the account map.
pub struct Storage<'a> {
    pub store: &'a BlobStore,
    pub lmdb: &'a LmdbAccountIndex,
}

/// Bootstrap inputs for [`TreeState::new`] (spec.md §4.6: a node's
/// initial state before any block beyond genesis exists).
pub struct GenesisData {
    pub state: BlockState,
    pub committee_size: usize,
    pub initial_nonce: HashValue,
}

pub(crate) struct QuorumAccumulator {
    pub weight: u64,
    pub signatures: Vec<Signature>,
    pub finalizer_set: consensus_types::FinalizerSet,
}

impl QuorumAccumulator {
    pub(crate) fn empty(committee_size: usize) -> Self {
        QuorumAccumulator {
            weight: 0,
            signatures: Vec::new(),
            finalizer_set: consensus_types::FinalizerSet::empty(committee_size),
        }
    }
}

#[derive(Default)]
pub(crate) struct QuorumRoundState {
    pub round: Round,
    pub signer_messages: HashMap<primitives::FinalizerId, consensus_types::QuorumMessage>,
    pub by_block: HashMap<HashValue, QuorumAccumulator>,
}

impl QuorumRoundState {
    pub(crate) fn for_round(round: Round) -> Self {
        QuorumRoundState {
            round,
            signer_messages: HashMap::new(),
            by_block: HashMap::new(),
        }
    }
}

pub(crate) struct TimeoutAccumulator {
    /// Signers already counted toward `weight`, across every `qc_round`
    /// bucket — a double-signing finalizer reporting two different
    /// `qc_round`s this round is recorded in both buckets but must not
    /// inflate the committee-weight total twice.
    pub signers_committed: consensus_types::FinalizerSet,
    pub weight: u64,
    pub by_qc_round: BTreeMap<Round, consensus_types::FinalizerSet>,
    pub messages: Vec<(Vec<u8>, PublicKey, Signature)>,
}

impl TimeoutAccumulator {
    pub(crate) fn empty(committee_size: usize) -> Self {
        TimeoutAccumulator {
            signers_committed: consensus_types::FinalizerSet::empty(committee_size),
            weight: 0,
            by_qc_round: BTreeMap::new(),
            messages: Vec::new(),
        }
    }
}

#[derive(Default)]
pub(crate) struct TimeoutRoundState {
    pub round: Round,
    pub signer_messages: HashMap<primitives::FinalizerId, consensus_types::TimeoutMessage>,
    pub accumulator: Option<TimeoutAccumulator>,
}

impl TimeoutRoundState {
    pub(crate) fn for_round(round: Round) -> Self {
        TimeoutRoundState {
            round,
            signer_messages: HashMap::new(),
            accumulator: None,
        }
    }
}

/// Bounded FIFO of hashes of blocks that failed verification or were
/// orphaned by finalization (spec.md §3: `dead_cache`), so a duplicate
/// of a recently-rejected block is recognized cheaply instead of being
/// re-verified.
struct DeadCache {
    capacity: usize,
    order: VecDeque<HashValue>,
    set: HashSet<HashValue>,
}

impl DeadCache {
    fn new(capacity: usize) -> Self {
        DeadCache {
            capacity,
            order: VecDeque::new(),
            set: HashSet::new(),
        }
    }

    fn insert(&mut self, hash: HashValue) {
        if !self.set.insert(hash) {
            return;
        }
        self.order.push_back(hash);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
    }

    fn contains(&self, hash: &HashValue) -> bool {
        self.set.contains(hash)
    }
}

/// The forest of live blocks plus round/epoch/transaction-pool
/// bookkeeping (spec.md §3's "Tree State" component).
pub struct TreeState {
    pub genesis_hash: HashValue,
    pub round_status: RoundStatus,
    pub consecutive_timeouts: u32,
    pub consensus_shutdown: bool,
    pub focus_block: HashValue,

    pub(crate) alive: HashMap<HashValue, Arc<BlockNode>>,
    pub(crate) pending: HashMap<HashValue, Block>,
    pub(crate) pending_by_parent: HashMap<HashValue, Vec<HashValue>>,
    pub(crate) pending_queue: BTreeMap<Round, Vec<HashValue>>,
    dead_cache: DeadCache,

    pub(crate) quorum_round: QuorumRoundState,
    pub(crate) timeout_round: TimeoutRoundState,

    pub(crate) transaction_table: HashMap<HashValue, transactions::TransactionEntry>,
    pub(crate) pending_transactions: HashMap<AccountAddress, BTreeMap<u64, consensus_types::Transaction>>,

    pub(crate) last_finalized: Arc<BlockNode>,
}

impl TreeState {
    /// Bootstrap a fresh tree state rooted at a newly-built genesis
    /// block (spec.md §4.6).
    pub fn new(storage: &Storage, config: &ConsensusConfig, genesis: GenesisData) -> anyhow::Result<Self> {
        let state_hash = genesis.state.root_hash(storage.store)?;
        let block = Block::genesis(state_hash);
        let hash = block.hash();
        let node = Arc::new(BlockNode {
            block,
            hash,
            height: 0,
            parent_hash: hash,
            state: Arc::new(genesis.state),
            accounts: Arc::new(DifferenceMap::new_root()),
        });
        let round_status = RoundStatus::genesis(hash, genesis.committee_size, genesis.initial_nonce);
        Ok(TreeState {
            genesis_hash: hash,
            round_status,
            consecutive_timeouts: 0,
            consensus_shutdown: false,
            focus_block: hash,
            alive: HashMap::new(),
            pending: HashMap::new(),
            pending_by_parent: HashMap::new(),
            pending_queue: BTreeMap::new(),
            dead_cache: DeadCache::new(config.dead_cache_capacity),
            quorum_round: QuorumRoundState::for_round(1),
            timeout_round: TimeoutRoundState::for_round(1),
            transaction_table: HashMap::new(),
            pending_transactions: HashMap::new(),
            last_finalized: node,
        })
    }

    /// The `BlockNode` for an alive hash, or the last-finalized node if
    /// `hash` is its hash (the only finalized block this crate keeps a
    /// full node for — everything further back has been pruned per
    /// spec.md §4.11).
    pub fn node(&self, hash: &HashValue) -> Option<Arc<BlockNode>> {
        if let Some(node) = self.alive.get(hash) {
            return Some(Arc::clone(node));
        }
        if *hash == self.last_finalized.hash {
            return Some(Arc::clone(&self.last_finalized));
        }
        None
    }

    pub fn last_finalized(&self) -> &Arc<BlockNode> {
        &self.last_finalized
    }

    pub fn is_alive(&self, hash: &HashValue) -> bool {
        self.alive.contains_key(hash)
    }

    pub fn is_pending(&self, hash: &HashValue) -> bool {
        self.pending.contains_key(hash)
    }

    /// Whether `hash` has already been fully processed once (spec.md
    /// §4.8's "Duplicate" check for blocks): alive, pending, the current
    /// finalized tip, or recently dead.
    pub fn known(&self, hash: &HashValue) -> bool {
        self.is_alive(hash) || self.is_pending(hash) || *hash == self.last_finalized.hash || self.dead_cache.contains(hash)
    }

    pub fn block_status(&self, hash: &HashValue) -> BlockStatus {
        if self.is_alive(hash) {
            BlockStatus::Alive
        } else if self.is_pending(hash) {
            BlockStatus::Pending
        } else if *hash == self.last_finalized.hash {
            BlockStatus::Finalized
        } else if self.dead_cache.contains(hash) {
            BlockStatus::Dead
        } else {
            BlockStatus::Unknown
        }
    }

    /// Number of blocks awaiting their parent (spec.md §3:
    /// `pending_by_parent`), exposed for the embedding node's metrics.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Size of the bounded FIFO `dead_cache` (spec.md §3), exposed for
    /// the embedding node's metrics.
    pub fn dead_cache_len(&self) -> usize {
        self.dead_cache.set.len()
    }

    /// Number of distinct finalizers who have sent a quorum message for
    /// the current round, exposed for the embedding node's metrics.
    pub fn quorum_messages_buffered(&self) -> usize {
        self.quorum_round.signer_messages.len()
    }

    pub(crate) fn insert_pending(&mut self, hash: HashValue, parent_hash: HashValue, block: Block) {
        self.pending_by_parent.entry(parent_hash).or_default().push(hash);
        self.pending_queue.entry(block.round).or_default().push(hash);
        self.pending.insert(hash, block);
    }

    pub(crate) fn mark_dead(&mut self, hash: HashValue) {
        self.alive.remove(&hash);
        self.dead_cache.insert(hash);
    }

    pub(crate) fn remove_from_pending_queue(&mut self, round: Round, hash: HashValue) {
        if let Some(hashes) = self.pending_queue.get_mut(&round) {
            hashes.retain(|h| *h != hash);
            if hashes.is_empty() {
                self.pending_queue.remove(&round);
            }
        }
    }

    /// `sender`'s next-available nonce against the focus block's
    /// executed state (spec.md §4.12).
    pub fn next_available_nonce(&self, storage: &Storage, sender: &AccountAddress) -> anyhow::Result<u64> {
        let focus = self
            .node(&self.focus_block)
            .expect("focus_block always resolves to a known node");
        let size = focus.state.account_count();
        match focus.accounts.lookup(storage.lmdb, sender, size)? {
            Some(index) => {
                let account = focus.state.get_account(storage.store, index)?;
                Ok(account.map(|a| a.nonce + 1).unwrap_or(0))
            }
            None => Ok(0),
        }
    }
}
