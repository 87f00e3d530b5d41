// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cryptographic primitives (BLS aggregation, VRF, hashing) are
//! excluded from this crate's scope (spec.md §1): the engine treats
//! them as opaque verified operations reached only through
//! [`SignatureScheme`]. A real node supplies an implementation backed
//! by whatever curve library it chooses; tests use a trivial
//! in-memory fake (see `tree-state`'s test harness).

use serde::{Deserialize, Serialize};

/// An individual signature, opaque to this crate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

/// A BLS-style aggregate signature combining any number of individual
/// signatures over (possibly distinct) messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSignature(pub Vec<u8>);

/// A public key, opaque to this crate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub Vec<u8>);

/// Verification/aggregation surface the tree-state and quorum/timeout
/// protocol call through. None of the methods below are implemented
/// here; this is the seam spec.md §1 calls out as an external
/// collaborator ("BLS aggregation, VRF, SHA-256, Ed25519 — treated as
/// opaque verified operations").
pub trait SignatureScheme: Send + Sync {
    /// Verify a single signature over `message` by `signer`.
    fn verify(&self, message: &[u8], signer: &PublicKey, signature: &Signature) -> bool;

    /// Combine individual signatures into a running aggregate
    /// (`aggregate ⊕ sig` in spec.md §4.8).
    fn aggregate(&self, signatures: &[Signature]) -> AggregateSignature;

    /// Verify an aggregate signature over a single message by the given
    /// set of signers (used for QC verification).
    fn verify_aggregate(
        &self,
        message: &[u8],
        signers: &[PublicKey],
        signature: &AggregateSignature,
    ) -> bool;

    /// Verify a hybrid aggregate over possibly-distinct per-signer
    /// messages (used for TC verification, spec.md §4.9: "one combined
    /// BLS verify with the multi-message API").
    fn verify_aggregate_multi(
        &self,
        messages: &[(&[u8], PublicKey)],
        signature: &AggregateSignature,
    ) -> bool;

    /// Deterministic, stake-weighted VRF-style draw used for block
    /// nonces. Opaque: spec.md excludes the concrete VRF.
    fn verify_vrf_nonce(&self, seed: &[u8], signer: &PublicKey, nonce: &[u8]) -> bool;
}
