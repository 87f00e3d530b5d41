// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! The executor seam (spec.md §1: "the engine only invokes an executor
//! with `(parent_state, transactions) → (new_state, outcomes)` and
//! consumes its success/failure"). Generic over the state type so this
//! crate never has to depend on `block-state` — `tree-state` is the
//! crate that actually wires `Executor<State = block_state::BlockState>`.

use crate::transaction::{Transaction, TransactionOutcome};
use primitives::{AccountAddress, AccountIndex, HashValue};

pub struct ExecutionOutput<State> {
    pub state: State,
    pub state_hash: HashValue,
    pub outcomes: Vec<TransactionOutcome>,
    pub outcomes_hash: HashValue,
    /// Accounts the executor created while applying `transactions`, in
    /// the order their indices were assigned. The account-map layer
    /// (a concern external to the executor seam) needs the address
    /// half of this pairing; the account-state tree only ever stores
    /// accounts by dense index.
    pub new_accounts: Vec<(AccountAddress, AccountIndex)>,
}

/// Transaction execution semantics (the VM and fee schedule) are
/// deliberately excluded from this workspace's scope (spec.md §1); a
/// real node supplies one.
pub trait Executor: Send + Sync {
    type State;

    fn execute(
        &self,
        parent_state: &Self::State,
        transactions: &[Transaction],
    ) -> anyhow::Result<ExecutionOutput<Self::State>>;
}
