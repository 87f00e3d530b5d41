// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Global cryptographic parameters (`H(cryptographic_parameters)`,
//! one of the nine children of the state root). Opaque bytes to this
//! crate — the concrete parameter set (pairing curve generators, a
//! zero-knowledge proof system's common reference string) is owned by
//! the out-of-scope crypto layer.

use primitives::HashValue;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptographicParameters(pub serde_bytes::ByteBuf);
buffered_ref::impl_flush_nested_noop!(CryptographicParameters);

impl CryptographicParameters {
    pub fn hash(&self) -> HashValue {
        HashValue::sha3(&self.0)
    }
}
