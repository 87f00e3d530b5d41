// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Persistent block state: a Merkle composition of
//! accounts, contract instances, bakers, modules, bank status,
//! identity providers, anonymity revokers, update queues and
//! cryptographic parameters into one hashed state root. Every child is
//! itself hashed independently of payload-loading, so `root_hash` never
//! needs to touch the blob store for anything already flushed.
//!
//! `BlockState` values form a persistent (in the data-structure sense)
//! forest: every block in `tree-state`'s live map owns a `BlockState`
//! snapshot, most of which share the bulk of their accounts/instances/
//! modules structure with their parent via `Arc`-backed subtrees —
//! each tree-state block pointer shares (by reference-count) its
//! block-state snapshot.

pub mod account;
pub mod bakers;
pub mod bank;
pub mod cryptographic_parameters;
pub mod identity;
pub mod instance;
pub mod modules;
pub mod release_schedule;
pub mod running_hash;
pub mod updates;

use account::{Account, AccountVersion, IdentityMigration, MigrateAccount, PersistingData};
use bakers::BirkParameters;
use bank::BankStatus;
use blob_store::BlobStore;
use buffered_ref::HashedBufferedRef;
use cryptographic_parameters::CryptographicParameters;
use identity::{AnonymityRevokers, IdentityProviders};
use instance::Instance;
use lfmb_tree::LfmbTree;
use modules::Modules;
use primitives::{AccountAddress, AccountIndex, HashValue};
use updates::UpdateQueues;

/// The nine children combined into the state root, in
/// the fixed order the balanced Merkle composition is taken over:
/// `Merkle(H(birk), H(cryptographic_parameters), H(identity_providers),
/// H(anonymity_revokers), H(modules), H(bank), H(accounts),
/// H(instances), H(updates))`.
pub struct BlockState {
    pub birk: BirkParameters,
    pub cryptographic_parameters: HashedBufferedRef<CryptographicParameters>,
    pub identity_providers: IdentityProviders,
    pub anonymity_revokers: AnonymityRevokers,
    pub modules: Modules,
    pub bank: BankStatus,
    pub accounts: LfmbTree<Account>,
    pub instances: LfmbTree<Instance>,
    pub updates: UpdateQueues,
}

impl BlockState {
    /// A freshly bootstrapped, empty state, as `tree-state` needs to
    /// construct the genesis block's state before any account exists.
    pub fn genesis(cryptographic_parameters: CryptographicParameters, bank: BankStatus) -> Self {
        let hash = cryptographic_parameters.hash();
        BlockState {
            birk: BirkParameters::new(),
            cryptographic_parameters: HashedBufferedRef::new(cryptographic_parameters, hash),
            identity_providers: IdentityProviders::new(),
            anonymity_revokers: AnonymityRevokers::new(),
            modules: Modules::new(),
            bank,
            accounts: LfmbTree::new(),
            instances: LfmbTree::new(),
            updates: UpdateQueues::new(),
        }
    }

    pub fn account_count(&self) -> AccountIndex {
        self.accounts.size()
    }

    pub fn get_account(
        &self,
        store: &BlobStore,
        index: AccountIndex,
    ) -> anyhow::Result<Option<std::sync::Arc<Account>>> {
        self.accounts.get(store, index)
    }

    /// Append a freshly created account, returning its assigned index
    /// (the caller is responsible for also inserting `(address, index)`
    /// into the block's `DifferenceMap`, `account-map`'s job, not this
    /// crate's).
    pub fn create_account(
        &mut self,
        store: &BlobStore,
        account: Account,
    ) -> anyhow::Result<AccountIndex> {
        let index = self.accounts.size();
        self.accounts = self.accounts.append(store, account)?;
        Ok(index)
    }

    pub fn update_account(
        &mut self,
        store: &BlobStore,
        index: AccountIndex,
        account: Account,
    ) -> anyhow::Result<()> {
        self.accounts = self.accounts.update(store, index, account)?;
        Ok(())
    }

    pub fn create_instance(&mut self, store: &BlobStore, instance: Instance) -> anyhow::Result<u64> {
        let index = self.instances.size();
        self.instances = self.instances.append(store, instance)?;
        Ok(index)
    }

    pub fn update_instance(
        &mut self,
        store: &BlobStore,
        index: u64,
        instance: Instance,
    ) -> anyhow::Result<()> {
        self.instances = self.instances.update(store, index, instance)?;
        Ok(())
    }

    /// Migrate every account's hashing scheme forward using `migration`
    /// (protocol-version upgrade migration, resolved as a
    /// total function per `account::MigrateAccount`). Rebuilds the
    /// accounts tree leaf by leaf; instances, bakers and the rest of
    /// the composition are untouched (the migration boundary here is
    /// account-version only).
    pub fn migrate_accounts(
        &mut self,
        store: &BlobStore,
        migration: &dyn MigrateAccount,
    ) -> anyhow::Result<()> {
        let mut migrated = LfmbTree::<Account>::new();
        self.accounts.mfold(store, |_, account| {
            migrated = migrated.append(store, migration.migrate(account))?;
            Ok(())
        })?;
        self.accounts = migrated;
        Ok(())
    }

    /// `root_hash`: a fixed balanced Merkle combination
    /// of the nine children's hashes, none of which requires loading a
    /// not-yet-cached payload.
    pub fn root_hash(&self, store: &BlobStore) -> anyhow::Result<HashValue> {
        let leaves = [
            self.birk.hash(),
            self.cryptographic_parameters.hash(),
            self.identity_providers.hash(),
            self.anonymity_revokers.hash(),
            self.modules.hash(),
            self.bank.hash(),
            self.accounts.root_hash(store)?,
            self.instances.root_hash(store)?,
            self.updates.hash(),
        ];
        Ok(HashValue::balanced_combine(&leaves))
    }

    /// Flush every nested `BufferedRef`/LFMB-tree/trie to the blob
    /// store. Called on finalization, as the step that flushes the
    /// block-state `BufferedRef` tree.
    pub fn flush(&self, store: &BlobStore) -> anyhow::Result<()> {
        self.birk.flush(store)?;
        self.cryptographic_parameters.flush(store)?;
        self.modules.flush(store)?;
        self.accounts.flush(store)?;
        self.instances.flush(store)?;
        Ok(())
    }
}

/// Per-field account-version migration map, `StateMigrationParameters`.
/// The only migration this workspace resolves concretely is the
/// account V0→V1 identity mapping (see DESIGN.md); other fields carry
/// across a protocol-version boundary unchanged, since no other field
/// is versioned.
pub struct StateMigrationParameters {
    pub account_migration: Box<dyn MigrateAccount>,
}

impl Default for StateMigrationParameters {
    fn default() -> Self {
        StateMigrationParameters {
            account_migration: Box::new(IdentityMigration),
        }
    }
}

pub fn default_persisting_data(
    credentials: Vec<u8>,
    encryption_key: Vec<u8>,
    verification_keys: Vec<u8>,
) -> HashedBufferedRef<PersistingData> {
    let data = PersistingData {
        credentials: serde_bytes::ByteBuf::from(credentials),
        encryption_key: serde_bytes::ByteBuf::from(encryption_key),
        verification_keys: serde_bytes::ByteBuf::from(verification_keys),
    };
    let hash = data.hash();
    HashedBufferedRef::new(data, hash)
}

pub fn new_account(
    store: &BlobStore,
    version: AccountVersion,
    persisting: HashedBufferedRef<PersistingData>,
) -> Account {
    let _ = store;
    Account::new(version, persisting, account::StakeState::NotInPool)
}

pub fn canonical_address(address: &AccountAddress) -> primitives::AccountAddressEq {
    address.canonical()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bank::RewardRate;
    use tempfile::tempdir;

    fn genesis_state() -> BlockState {
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

    #[test]
    fn root_hash_changes_when_an_account_is_created() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("b")).unwrap();
        let mut state = genesis_state();
        let before = state.root_hash(&store).unwrap();

        let persisting = default_persisting_data(vec![1], vec![2], vec![3]);
        let account = new_account(&store, AccountVersion::V0, persisting);
        let index = state.create_account(&store, account).unwrap();
        assert_eq!(index, 0);

        let after = state.root_hash(&store).unwrap();
        assert_ne!(before, after);
        assert_eq!(state.account_count(), 1);
    }

    #[test]
    fn migration_changes_account_hash_scheme_but_not_count() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("b")).unwrap();
        let mut state = genesis_state();
        let persisting = default_persisting_data(vec![1], vec![2], vec![3]);
        state
            .create_account(&store, new_account(&store, AccountVersion::V0, persisting))
            .unwrap();

        let migration = StateMigrationParameters::default();
        state.migrate_accounts(&store, migration.account_migration.as_ref()).unwrap();

        assert_eq!(state.account_count(), 1);
        let migrated = state.get_account(&store, 0).unwrap().unwrap();
        assert_eq!(migrated.version, AccountVersion::V1);
    }

    #[test]
    fn flush_then_root_hash_is_stable() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("b")).unwrap();
        let state = genesis_state();
        let before = state.root_hash(&store).unwrap();
        state.flush(&store).unwrap();
        let after = state.root_hash(&store).unwrap();
        assert_eq!(before, after);
    }
}
