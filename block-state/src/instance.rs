// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Contract instances, mirrored 1:1 off the account LFMB tree: append
//! on creation, update (via `LfmbTree::update`) on every mutating
//! call.

use buffered_ref::FlushNested;
use lfmb_tree::Hashable;
use primitives::{AccountAddress, HashValue};
use serde::{Deserialize, Serialize};

/// The instance's own state is VM-owned (contract-initialization
/// scheduler rules are out of scope here); this crate carries only
/// the pre-hashed state root the executor reports back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub module_ref: HashValue,
    pub owner: AccountAddress,
    pub amount: u64,
    pub state_hash: HashValue,
    pub receive_functions: Vec<String>,
}
buffered_ref::impl_flush_nested_noop!(Instance);

impl Hashable for Instance {
    fn hash(&self) -> HashValue {
        let mut functions_hash = HashValue::sha3(b"INSTANCE::FUNCTIONS::EMPTY");
        for name in &self.receive_functions {
            functions_hash = HashValue::combine(&functions_hash, &HashValue::sha3(name.as_bytes()));
        }
        HashValue::combine_tagged(
            b"INSTANCE",
            &[
                self.module_ref.as_bytes(),
                self.owner.as_bytes(),
                &self.amount.to_be_bytes(),
                self.state_hash.as_bytes(),
                functions_hash.as_bytes(),
            ],
        )
    }
}
