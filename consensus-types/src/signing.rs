// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! The exact byte strings signed by each message kind (spec.md §6). These
//! are handed to [`crate::executor::SignatureScheme`] (via `primitives`) as
//! the `message` argument; this crate owns no cryptography itself.

use primitives::{HashValue, Round};

/// `"QUORUM." || genesis_hash || block_hash`
pub fn quorum_signing_bytes(genesis_hash: HashValue, block_hash: HashValue) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 + 2 * HashValue::LENGTH);
    out.extend_from_slice(b"QUORUM.");
    out.extend_from_slice(genesis_hash.as_bytes());
    out.extend_from_slice(block_hash.as_bytes());
    out
}

/// `"TIMEOUT." || genesis_hash || round || qc_round`
pub fn timeout_signing_bytes(genesis_hash: HashValue, round: Round, qc_round: Round) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + HashValue::LENGTH + 16);
    out.extend_from_slice(b"TIMEOUT.");
    out.extend_from_slice(genesis_hash.as_bytes());
    out.extend_from_slice(&round.to_be_bytes());
    out.extend_from_slice(&qc_round.to_be_bytes());
    out
}

/// A baker signs the block hash directly.
pub fn block_signing_bytes(block_hash: HashValue) -> Vec<u8> {
    block_hash.to_vec()
}

/// `"NONCE" || prev_nonce || round`, the VRF seed for a block's nonce
/// (spec.md §6). Distinct from the epoch-change nonce formula of §4.10,
/// which reuses `HashValue::combine_tagged` directly.
pub fn vrf_nonce_seed_bytes(prev_nonce: HashValue, round: Round) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + HashValue::LENGTH + 8);
    out.extend_from_slice(b"NONCE");
    out.extend_from_slice(prev_nonce.as_bytes());
    out.extend_from_slice(&round.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_strings_are_distinguishable_by_prefix() {
        let g = HashValue::sha3(b"genesis");
        let b = HashValue::sha3(b"block");
        let q = quorum_signing_bytes(g, b);
        let t = timeout_signing_bytes(g, 1, 0);
        assert_eq!(&q[..7], b"QUORUM.");
        assert_eq!(&t[..8], b"TIMEOUT.");
        assert_ne!(q, t);
    }
}
