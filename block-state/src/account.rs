// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! An account: `(persisting_ref, nonce, amount,
//! encrypted_amount, release_schedule, stake_state)`. `persisting_ref`
//! hides credentials, encryption keys and verification keys behind a
//! blob reference and a precomputed hash, so an account's Merkle hash
//! never requires loading that rarely-changed data.

use crate::release_schedule::ReleaseSchedule;
use buffered_ref::{FlushNested, HashedBufferedRef};
use lfmb_tree::Hashable;
use primitives::HashValue;
use serde::{Deserialize, Serialize};

/// Credentials, encryption keys and verification keys: set once at
/// account creation and rarely touched again, so it is worth keeping
/// behind a `BufferedRef` rather than inline in every `Account`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistingData {
    pub credentials: serde_bytes::ByteBuf,
    pub encryption_key: serde_bytes::ByteBuf,
    pub verification_keys: serde_bytes::ByteBuf,
}
buffered_ref::impl_flush_nested_noop!(PersistingData);

impl PersistingData {
    pub fn hash(&self) -> HashValue {
        HashValue::sha3(&bcs::to_bytes(self).expect("PersistingData always serializes"))
    }
}

/// An account's participation in baking/delegation. Staking mechanics
/// themselves are out of scope here — scheduler-internal rules for
/// token transfers and staking operations are external; only
/// the shape needed to hash and carry the account forward lives here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeState {
    NotInPool,
    Baker { baker_id: u64, staked_amount: u64, restake_earnings: bool },
    Delegator { target_baker_id: u64, staked_amount: u64 },
}

impl StakeState {
    fn hash(&self) -> HashValue {
        HashValue::sha3(&bcs::to_bytes(self).expect("StakeState always serializes"))
    }
}

/// Opaque encrypted-balance pool for an account: this crate never
/// interprets the ciphertext, only hashes and carries it (concrete
/// cryptographic primitives are out of scope).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedAmount(pub serde_bytes::ByteBuf);

impl EncryptedAmount {
    pub fn empty() -> Self {
        EncryptedAmount(serde_bytes::ByteBuf::new())
    }

    fn hash(&self) -> HashValue {
        HashValue::sha3(&self.0)
    }
}

/// Which of the two hashing schemes an account uses. Represented as a
/// closed enum rather than a
/// compile-time trait-per-version marker (see DESIGN.md): the workspace
/// needs to hold both versions side by side in one `LfmbTree<Account>`
/// across a migration boundary, which a type-level tag would make
/// awkward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountVersion {
    V0,
    V1,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub version: AccountVersion,
    pub persisting_ref: HashedBufferedRef<PersistingData>,
    pub nonce: u64,
    pub amount: u64,
    pub encrypted_amount: EncryptedAmount,
    pub release_schedule: ReleaseSchedule,
    pub stake_state: StakeState,
}

impl Account {
    pub fn new(
        version: AccountVersion,
        persisting_ref: HashedBufferedRef<PersistingData>,
        stake_state: StakeState,
    ) -> Self {
        Account {
            version,
            persisting_ref,
            nonce: 0,
            amount: 0,
            encrypted_amount: EncryptedAmount::empty(),
            release_schedule: ReleaseSchedule::empty(),
            stake_state,
        }
    }

    /// V0: `H(next_nonce, amount, encrypted_hash, release_schedule_hash,
    /// persisting_hash, stake_hash)`.
    fn hash_v0(&self) -> HashValue {
        HashValue::combine_tagged(
            b"ACCOUNT::V0",
            &[
                &self.nonce.to_be_bytes(),
                &self.amount.to_be_bytes(),
                self.encrypted_amount.hash().as_bytes(),
                self.release_schedule.hash().as_bytes(),
                self.persisting_ref.hash().as_bytes(),
                self.stake_state.hash().as_bytes(),
            ],
        )
    }

    /// V1: a Merkle combination of a balance-level subhash (nonce,
    /// amount, encrypted amount, release schedule, stake) and a
    /// data-level subhash (persisting data) — the first, and only,
    /// successor hash scheme this workspace implements.
    fn hash_v1(&self) -> HashValue {
        let balance_hash = HashValue::combine_tagged(
            b"ACCOUNT::V1::BALANCE",
            &[
                &self.nonce.to_be_bytes(),
                &self.amount.to_be_bytes(),
                self.encrypted_amount.hash().as_bytes(),
                self.release_schedule.hash().as_bytes(),
                self.stake_state.hash().as_bytes(),
            ],
        );
        let data_hash =
            HashValue::combine_tagged(b"ACCOUNT::V1::DATA", &[self.persisting_ref.hash().as_bytes()]);
        HashValue::combine(&balance_hash, &data_hash)
    }
}

impl Hashable for Account {
    fn hash(&self) -> HashValue {
        match self.version {
            AccountVersion::V0 => self.hash_v0(),
            AccountVersion::V1 => self.hash_v1(),
        }
    }
}

impl FlushNested for Account {
    fn flush_nested(&self, store: &blob_store::BlobStore) -> anyhow::Result<()> {
        self.persisting_ref.flush_nested(store)
    }
}

/// Migration between account-version formats, resolved here as a
/// total function (see DESIGN.md). `MigrateAccount::migrate` must be
/// total: every V0 account has a well-defined V1 image.
pub trait MigrateAccount {
    fn migrate(&self, account: &Account) -> Account;
}

/// The identity migration: V0 fields carry across unchanged, only the
/// version tag (and therefore the hash scheme) changes. Chosen as the
/// default because no field-level transformation beyond "map each
/// field" is required — with no renamed, split, or dropped field
/// between V0 and V1, the identity mapping *is* that map.
pub struct IdentityMigration;

impl MigrateAccount for IdentityMigration {
    fn migrate(&self, account: &Account) -> Account {
        let mut migrated = account.clone();
        migrated.version = AccountVersion::V1;
        migrated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_store::BlobStore;

    fn sample_account(version: AccountVersion) -> Account {
        let persisting = HashedBufferedRef::new(
            PersistingData {
                credentials: serde_bytes::ByteBuf::from(vec![1, 2, 3]),
                encryption_key: serde_bytes::ByteBuf::from(vec![4, 5]),
                verification_keys: serde_bytes::ByteBuf::from(vec![6]),
            },
            HashValue::sha3(b"persisting"),
        );
        let mut account = Account::new(version, persisting, StakeState::NotInPool);
        account.nonce = 3;
        account.amount = 1_000;
        account
    }

    #[test]
    fn v0_and_v1_hash_schemes_disagree() {
        let v0 = sample_account(AccountVersion::V0);
        let mut v1 = v0.clone();
        v1.version = AccountVersion::V1;
        assert_ne!(v0.hash(), v1.hash());
    }

    #[test]
    fn identity_migration_preserves_every_field_but_version() {
        let v0 = sample_account(AccountVersion::V0);
        let migrated = IdentityMigration.migrate(&v0);
        assert_eq!(migrated.version, AccountVersion::V1);
        assert_eq!(migrated.nonce, v0.nonce);
        assert_eq!(migrated.amount, v0.amount);
        assert_eq!(migrated.hash(), {
            let mut expected = v0.clone();
            expected.version = AccountVersion::V1;
            expected.hash()
        });
    }

    #[test]
    fn persisting_ref_flushes_through_flush_nested() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("b")).unwrap();
        let account = sample_account(AccountVersion::V0);
        account.flush_nested(&store).unwrap();
        assert!(account.persisting_ref.flush(&store).is_ok());
    }
}
