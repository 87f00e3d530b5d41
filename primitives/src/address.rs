// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Full account address: 32 bytes, the LMDB key width of spec.md §6.
pub const ADDRESS_LENGTH: usize = 32;

/// Length of the canonical prefix used for address-equivalence lookups
/// (spec.md glossary: "Canonical account address"). Two addresses are
/// aliases of the same account iff this prefix matches.
pub const CANONICAL_PREFIX_LENGTH: usize = 29;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountAddress([u8; ADDRESS_LENGTH]);

impl AccountAddress {
    pub fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        AccountAddress(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// The 29-byte prefix used for account-address aliasing.
    pub fn canonical(&self) -> AccountAddressEq {
        let mut prefix = [0u8; CANONICAL_PREFIX_LENGTH];
        prefix.copy_from_slice(&self.0[..CANONICAL_PREFIX_LENGTH]);
        AccountAddressEq(prefix)
    }
}

impl fmt::Debug for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// The equivalence class of an [`AccountAddress`]: its canonical 29-byte
/// prefix. Two addresses with equal `AccountAddressEq` refer to the same
/// account for the purposes of the account map (spec.md §4.5).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountAddressEq([u8; CANONICAL_PREFIX_LENGTH]);

impl AccountAddressEq {
    pub fn as_bytes(&self) -> &[u8; CANONICAL_PREFIX_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for AccountAddressEq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(any(test, feature = "fuzzing"))]
impl proptest::arbitrary::Arbitrary for AccountAddress {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;
        any::<[u8; ADDRESS_LENGTH]>().prop_map(AccountAddress).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliasing_ignores_last_three_bytes() {
        let mut a = [7u8; ADDRESS_LENGTH];
        let mut b = a;
        a[29] = 1;
        a[30] = 2;
        b[29] = 9;
        b[30] = 9;
        let (a, b) = (AccountAddress::new(a), AccountAddress::new(b));
        assert_eq!(a.canonical(), b.canonical());
        assert_ne!(a, b);
    }
}
