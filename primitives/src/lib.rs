// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Types shared by every layer of the tree-state and finalization engine:
//! the opaque [`HashValue`], account addressing, the small set of
//! behavioral error kinds from the error-handling design, and the
//! `Flag`/`ReceiveResult` vocabulary the receive entrypoints return.
//!
//! Cryptographic primitives (BLS aggregation, VRF, signature
//! verification) are deliberately *not* implemented here: the engine
//! only ever calls through the [`SignatureScheme`] trait, which a
//! real node wires to its crypto library of choice.

pub mod address;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod result;

pub use address::{AccountAddress, AccountAddressEq};
pub use config::ConsensusConfig;
pub use crypto::SignatureScheme;
pub use error::ConsensusError;
pub use hash::HashValue;
pub use result::{Flag, ReceiveResult, Verdict};

/// A round number. Rounds are single leader-election slots; at most one
/// block can become certified per round (spec.md §4).
pub type Round = u64;

/// An epoch number. A contiguous range of rounds sharing a committee and
/// leadership-election nonce.
pub type Epoch = u64;

/// Dense index of an account inside the LFMB accounts tree.
pub type AccountIndex = u64;

/// Identifier of a member of the finalization committee, the index into
/// that epoch's committee vector.
pub type FinalizerId = u32;

/// Microsecond UNIX timestamp, matching the wire format's `timestamp:u64 be`.
pub type Timestamp = u64;
