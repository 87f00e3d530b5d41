// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fakes for the external collaborators `Engine` bundles (spec.md §1:
//! the signature scheme, committee/leader-election resolution, and the
//! executor are all opaque seams a real node backs with BLS
//! cryptography, a staking module and a VM respectively). Every fake
//! here accepts whatever it is given — these tests exercise the tree
//! state's own bookkeeping, not cryptographic correctness, the same
//! division `primitives::crypto`'s doc comment describes.

use crate::{Engine, GenesisData, Storage, TreeState};
use account_map::LmdbAccountIndex;
use block_state::bank::{BankStatus, RewardRate};
use block_state::cryptographic_parameters::CryptographicParameters;
use block_state::BlockState;
use blob_store::BlobStore;
use consensus_types::{
    signing, BakerData, Block, Committee, CommitteeMember, CommitteeProvider, Executor, ExecutionOutput, FinalizerSet,
    LeaderElection, QuorumMessage, StakeWeightedLeaderElection, Transaction, TimeoutMessage,
};
use primitives::crypto::{AggregateSignature, PublicKey, Signature, SignatureScheme};
use primitives::{AccountAddress, AccountIndex, ConsensusConfig, Epoch, FinalizerId, HashValue, Round};
use std::cell::Cell;
use std::sync::Arc;

/// Accepts any signature/aggregate as valid and produces trivial,
/// content-blind aggregates — the opaque crypto seam spec.md §1 treats
/// as an external collaborator, stubbed the way `primitives::crypto`'s
/// own doc comment anticipates.
pub struct FakeSignatureScheme;

impl SignatureScheme for FakeSignatureScheme {
    fn verify(&self, _message: &[u8], _signer: &PublicKey, _signature: &Signature) -> bool {
        true
    }

    fn aggregate(&self, signatures: &[Signature]) -> AggregateSignature {
        AggregateSignature(signatures.iter().flat_map(|s| s.0.clone()).collect())
    }

    fn verify_aggregate(&self, _message: &[u8], _signers: &[PublicKey], _signature: &AggregateSignature) -> bool {
        true
    }

    fn verify_aggregate_multi(&self, _messages: &[(&[u8], PublicKey)], _signature: &AggregateSignature) -> bool {
        true
    }

    fn verify_vrf_nonce(&self, _seed: &[u8], _signer: &PublicKey, _nonce: &[u8]) -> bool {
        true
    }
}

/// A single fixed committee for every epoch a test ever asks about —
/// real committee recomputation on epoch change is a staking/scheduler
/// concern spec.md §1 excludes.
pub struct FixedCommitteeProvider(pub Committee);

impl CommitteeProvider for FixedCommitteeProvider {
    fn committee_for_epoch(&self, _epoch: Epoch) -> anyhow::Result<Committee> {
        Ok(self.0.clone())
    }
}

/// `n` equally-weighted finalizers, ids `0..n`.
pub fn uniform_committee(n: u32) -> Committee {
    Committee::new(
        (0..n)
            .map(|id| CommitteeMember {
                id,
                public_key: PublicKey(id.to_be_bytes().to_vec()),
                weight: 1,
            })
            .collect(),
    )
}

/// A deterministic, account-tree-free executor: always returns the same
/// empty [`BlockState`] (its hash is therefore constant across every
/// block, which these tests never rely on varying) and fabricates
/// [`ExecutionOutput::new_accounts`] from a transaction convention
/// private to this harness — a transaction whose payload is exactly
/// `b"CREATE:" || address` (39 bytes) creates that address at the next
/// index from a monotonic counter shared across every call. Real
/// account-tree mutation is `block-state`'s own concern and is already
/// exercised by its own tests; what `tree-state` needs verified here is
/// only that a block's `DifferenceMap` chain and lookups behave
/// correctly given whatever the executor reports.
pub struct FakeExecutor {
    store: BlobStore,
    state_hash: HashValue,
    next_index: Cell<AccountIndex>,
}

impl FakeExecutor {
    pub fn new(dir: &std::path::Path) -> Self {
        let store = BlobStore::open(dir.join("fake-executor.blob")).expect("open fake executor blob store");
        let state = empty_state();
        let state_hash = state.root_hash(&store).expect("empty state always hashes");
        FakeExecutor {
            store,
            state_hash,
            next_index: Cell::new(0),
        }
    }

    pub fn state_hash(&self) -> HashValue {
        self.state_hash
    }
}

fn empty_state() -> BlockState {
    BlockState::genesis(
        CryptographicParameters(serde_bytes::ByteBuf::from(vec![1, 2, 3])),
        BankStatus {
            total_amount: 0,
            total_encrypted_amount: 0,
            total_staked_capital: 0,
            reward_rate: RewardRate {
                mint_per_slot_micro: 0,
                transaction_fee_baker_fraction_permille: 0,
                gas_rewards_baker_permille: 0,
            },
        },
    )
}

const CREATE_PREFIX: &[u8] = b"CREATE:";

/// Build a transaction that `FakeExecutor` interprets as "create
/// `address`".
pub fn create_account_tx(sender: AccountAddress, nonce: u64, address: AccountAddress) -> Transaction {
    let mut payload = CREATE_PREFIX.to_vec();
    payload.extend_from_slice(address.as_bytes());
    Transaction {
        sender,
        nonce,
        payload: serde_bytes::ByteBuf::from(payload),
    }
}

impl Executor for FakeExecutor {
    type State = BlockState;

    fn execute(&self, _parent_state: &BlockState, transactions: &[Transaction]) -> anyhow::Result<ExecutionOutput<BlockState>> {
        let _ = &self.store;
        let mut new_accounts = Vec::new();
        for tx in transactions {
            if tx.payload.len() == CREATE_PREFIX.len() + 32 && tx.payload.starts_with(CREATE_PREFIX) {
                let mut raw = [0u8; 32];
                raw.copy_from_slice(&tx.payload[CREATE_PREFIX.len()..]);
                let index = self.next_index.get();
                self.next_index.set(index + 1);
                new_accounts.push((AccountAddress::new(raw), index));
            }
        }
        Ok(ExecutionOutput {
            state: empty_state(),
            state_hash: self.state_hash,
            outcomes: Vec::new(),
            outcomes_hash: consensus_types::outcomes_hash(&[]),
            new_accounts,
        })
    }
}

/// Everything a scenario test needs alive for its duration: the
/// config, storage handles, collaborators and the `TreeState` itself.
/// Held together so tests can build an [`Engine`]/[`Storage`] pair on
/// demand without repeating the wiring.
pub struct Harness {
    pub config: ConsensusConfig,
    pub committee: Committee,
    pub signature_scheme: FakeSignatureScheme,
    pub committee_provider: FixedCommitteeProvider,
    pub leader_election: StakeWeightedLeaderElection,
    pub executor: FakeExecutor,
    pub blob_store: BlobStore,
    pub lmdb: LmdbAccountIndex,
    pub tree: TreeState,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(committee_size: u32) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ConsensusConfig::for_testing(dir.path());
        let committee = uniform_committee(committee_size);
        let blob_store = BlobStore::open(dir.path().join("blocks.blob")).expect("open blob store");
        let lmdb = LmdbAccountIndex::open(dir.path().join("accounts.lmdb")).expect("open account map");
        let executor = FakeExecutor::new(dir.path());

        let genesis_state = empty_state();
        let tree = {
            let storage = Storage {
                store: &blob_store,
                lmdb: &lmdb,
            };
            TreeState::new(
                &storage,
                &config,
                GenesisData {
                    state: genesis_state,
                    committee_size: committee_size as usize,
                    initial_nonce: HashValue::sha3(b"initial-nonce"),
                },
            )
            .expect("bootstrap genesis tree state")
        };

        let committee_provider = FixedCommitteeProvider(committee.clone());
        Harness {
            config,
            committee,
            signature_scheme: FakeSignatureScheme,
            committee_provider,
            leader_election: StakeWeightedLeaderElection,
            executor,
            blob_store,
            lmdb,
            tree,
            _dir: dir,
        }
    }

    pub fn storage(&self) -> Storage<'_> {
        Storage {
            store: &self.blob_store,
            lmdb: &self.lmdb,
        }
    }

    pub fn engine(&self) -> Engine<'_> {
        Engine {
            config: &self.config,
            signature_scheme: &self.signature_scheme,
            committee_provider: &self.committee_provider,
            leader_election: &self.leader_election,
            executor: &self.executor,
        }
    }

    /// The finalizer id `StakeWeightedLeaderElection` elects for
    /// `round` against the current leadership-election nonce.
    pub fn leader_for(&self, round: Round) -> FinalizerId {
        self.leader_election
            .elect(self.tree.round_status.leadership_election_nonce, round, &self.committee)
    }

    /// Build and sign (via the fake scheme, so any bytes do) a block
    /// extending `parent_hash` at `round`, with `parent_qc` as its
    /// embedded certificate and `transactions` executed through the
    /// precomputed [`FakeExecutor`] state hash.
    pub fn build_block(
        &self,
        round: Round,
        parent_qc: consensus_types::QuorumCertificate,
        timeout_cert: Option<consensus_types::TimeoutCertificate>,
        transactions: Vec<Transaction>,
    ) -> Block {
        let baker_id = self.leader_for(round) as u64;
        let vrf_nonce = HashValue::sha3(format!("vrf-round-{round}").as_bytes());
        let mut block = Block {
            round,
            epoch: 0,
            timestamp: round * 1000,
            baker: Some(BakerData {
                baker_id,
                baker_key: PublicKey(baker_id.to_be_bytes().to_vec()),
            }),
            parent_qc: Some(parent_qc),
            timeout_cert,
            finalization_entry: None,
            vrf_nonce,
            transactions,
            transaction_outcomes_hash: consensus_types::outcomes_hash(&[]),
            state_hash: self.executor.state_hash(),
            signature: None,
        };
        let hash = block.hash();
        block.signature = Some(Signature(signing::block_signing_bytes(hash).into_iter().take(1).collect()));
        block
    }

    /// Build a signed [`QuorumMessage`] from `signer` for `block_hash`
    /// at `round` (any bytes verify under [`FakeSignatureScheme`]).
    pub fn quorum_message(&self, signer: FinalizerId, block_hash: HashValue, round: Round) -> QuorumMessage {
        QuorumMessage {
            signer,
            block_hash,
            round,
            epoch: 0,
            signature: Signature(vec![signer as u8]),
        }
    }

    /// Build a signed [`TimeoutMessage`] from `signer` for `round`,
    /// reporting `qc_round` as the highest QC round it has observed.
    pub fn timeout_message(&self, signer: FinalizerId, round: Round, qc_round: Round) -> TimeoutMessage {
        TimeoutMessage {
            signer,
            round,
            qc_round,
            epoch: 0,
            signature: Signature(vec![signer as u8]),
        }
    }

    /// Deliver `qm` from every id in `signers`, returning the verdicts
    /// in order.
    pub fn send_quorum(&mut self, block_hash: HashValue, round: Round, signers: &[FinalizerId]) -> Vec<primitives::Verdict> {
        let storage = self.storage();
        let engine = self.engine();
        signers
            .iter()
            .map(|&signer| {
                let qm = self.quorum_message(signer, block_hash, round);
                crate::quorum::receive_quorum_message(&mut self.tree, &storage, &engine, qm).expect("receive_quorum_message")
            })
            .collect()
    }

    pub fn send_timeouts(&mut self, round: Round, qc_round: Round, signers: &[FinalizerId]) -> Vec<primitives::Verdict> {
        let storage = self.storage();
        let engine = self.engine();
        signers
            .iter()
            .map(|&signer| {
                let tm = self.timeout_message(signer, round, qc_round);
                crate::timeout::receive_timeout_message(&mut self.tree, &storage, &engine, tm).expect("receive_timeout_message")
            })
            .collect()
    }

    pub fn receive_block(&mut self, block: Block) -> primitives::Verdict {
        let storage = self.storage();
        let engine = self.engine();
        crate::receive_block::receive_block(&mut self.tree, &storage, &engine, block).expect("receive_block")
    }

    /// The genesis QC (round 0), usable as `parent_qc` for round-1
    /// blocks.
    pub fn genesis_qc(&self) -> consensus_types::QuorumCertificate {
        self.tree.round_status.highest_qc.clone()
    }

    pub fn empty_finalizer_set(&self) -> FinalizerSet {
        FinalizerSet::empty(self.committee.size())
    }
}
