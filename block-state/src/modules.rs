// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Smart-contract modules: a 256-ary trie keyed by module reference
//! plus a running hash.

use crate::running_hash::RunningHash;
use blob_store::BlobStore;
use buffered_ref::{BufferedRef, FlushNested};
use patricia_trie::{Alteration, PatriciaTrie};
use primitives::HashValue;
use serde::{Deserialize, Serialize};

/// Compiled module bytecode, opaque to this crate (the VM interprets
/// it; execution semantics are out of scope here).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlob(pub serde_bytes::ByteBuf);
buffered_ref::impl_flush_nested_noop!(CodeBlob);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub code: BufferedRef<CodeBlob>,
    pub code_hash: HashValue,
    pub exported_functions: Vec<String>,
}

impl FlushNested for Module {
    fn flush_nested(&self, store: &BlobStore) -> anyhow::Result<()> {
        self.code.flush(store)?;
        Ok(())
    }
}

/// Module references are 32-byte content hashes of their own code,
/// used directly as the fixed-length trie key.
pub const MODULE_KEY_LEN: usize = HashValue::LENGTH;

pub struct Modules {
    trie: PatriciaTrie<Module>,
    running_hash: RunningHash,
}

impl Default for Modules {
    fn default() -> Self {
        Modules {
            trie: PatriciaTrie::new(),
            running_hash: RunningHash::empty(),
        }
    }
}

impl Modules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, store: &BlobStore, module_ref: HashValue) -> anyhow::Result<Option<std::sync::Arc<Module>>> {
        self.trie.get(store, module_ref.as_bytes())
    }

    pub fn insert(&mut self, store: &BlobStore, module_ref: HashValue, module: Module) -> anyhow::Result<()> {
        let module_hash = module.code_hash;
        let (new_trie, alteration) = self
            .trie
            .alter(store, module_ref.as_bytes(), |existing| match existing {
                Some(_) => Alteration::NoChange,
                None => Alteration::Insert(module.clone()),
            })?;
        if let Alteration::Insert(_) = alteration {
            self.running_hash.insert(module_ref.as_bytes(), module_hash);
        }
        self.trie = new_trie;
        Ok(())
    }

    pub fn flush(&self, store: &BlobStore) -> anyhow::Result<()> {
        self.trie.flush(store)?;
        Ok(())
    }

    pub fn hash(&self) -> HashValue {
        self.running_hash.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn inserting_a_module_is_idempotent_in_the_trie_but_not_the_running_hash() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("b")).unwrap();
        let mut modules = Modules::new();
        let module_ref = HashValue::sha3(b"module-1");
        let module = Module {
            code: BufferedRef::make(CodeBlob(serde_bytes::ByteBuf::from(vec![1, 2, 3]))),
            code_hash: HashValue::sha3(b"code"),
            exported_functions: vec!["init".to_string()],
        };
        modules.insert(&store, module_ref, module.clone()).unwrap();
        let hash_after_first = modules.hash();
        modules.insert(&store, module_ref, module).unwrap();
        // Re-inserting an existing key is a NoChange alteration, so the
        // running hash must not move even though the trie call ran again.
        assert_eq!(modules.hash(), hash_after_first);
        assert!(modules.get(&store, module_ref).unwrap().is_some());
    }
}
