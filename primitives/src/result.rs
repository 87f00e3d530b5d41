// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Misbehavior markers recorded as a side effect of message validation
/// (spec.md §4.8/§4.9/§7). Flagging never aborts processing; it is
/// reported to downstream misbehavior tracking only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flag {
    /// The signer produced two distinct messages for the same round.
    DoubleSigning,
    /// A single-signature or aggregate verification failed.
    InvalidSignature,
    /// A block/QC/TC referenced a round inconsistent with observed
    /// state (e.g. the target block was already finalized at a
    /// different round).
    RoundInconsistency,
    /// A finalization or certificate proof was structurally invalid.
    InvalidProof,
}

/// Result codes returned by the four receive entrypoints
/// (`receive_block`, `receive_quorum_message`, `receive_timeout_message`,
/// `receive_transaction`), matching spec.md §6 verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveResult {
    Success,
    Duplicate,
    Stale,
    PendingBlock,
    PendingFinalization,
    Invalid,
    Unverifiable,
    ConsensusShutdown,
}

impl ReceiveResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ReceiveResult::Success)
    }
}

/// A `ReceiveResult` together with an optional misbehavior flag, the
/// shape every `receive_*` entrypoint actually returns (spec.md §4.8:
/// "flag the baker/finalizer" is a side channel alongside the verdict).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub result: ReceiveResult,
    pub flag: Option<Flag>,
}

impl Verdict {
    pub fn ok() -> Self {
        Verdict {
            result: ReceiveResult::Success,
            flag: None,
        }
    }

    pub fn plain(result: ReceiveResult) -> Self {
        Verdict { result, flag: None }
    }

    pub fn flagged(result: ReceiveResult, flag: Flag) -> Self {
        Verdict {
            result,
            flag: Some(flag),
        }
    }
}
