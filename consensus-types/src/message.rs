// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-finalizer signed messages (spec.md §3: "`quorum_messages`:
//! `map<finalizer_id, quorum_message>`..."). Neither message is named as
//! a standalone wire type anywhere in spec.md §3/§6, but §4.8/§4.9 both
//! describe one signer producing exactly one of these per round, so they
//! get the same treatment as every other wire type in this crate.

use primitives::crypto::Signature;
use primitives::{Epoch, FinalizerId, HashValue, Round};
use serde::{Deserialize, Serialize};

/// One finalizer's vote for `block_hash` at `round` (spec.md §4.8). The
/// signed byte string is `crate::signing::quorum_signing_bytes(genesis_hash,
/// block_hash)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumMessage {
    pub signer: FinalizerId,
    pub block_hash: HashValue,
    pub round: Round,
    pub epoch: Epoch,
    pub signature: Signature,
}

/// One finalizer's timeout for `round`, reporting the highest QC round it
/// has observed (spec.md §4.9). The signed byte string is
/// `crate::signing::timeout_signing_bytes(genesis_hash, round, qc_round)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutMessage {
    pub signer: FinalizerId,
    pub round: Round,
    pub qc_round: Round,
    pub epoch: Epoch,
    pub signature: Signature,
}
