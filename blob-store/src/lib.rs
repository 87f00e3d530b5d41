// Copyright (c) The Konsensus Contributors
// SPDX-License-Identifier: Apache-2.0

//! An append-only file of length-prefixed blobs (spec.md §4.1/§6).
//! `BlobRef`s are byte offsets into the file and remain stable for the
//! lifetime of the store — they are never reused or renumbered.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Byte offset of a blob's length prefix within the store file. Stable
/// for the lifetime of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobRef(pub u64);

impl BlobRef {
    /// `2^64 - 1`, the sentinel "no blob" reference (spec.md §6).
    pub const NULL: BlobRef = BlobRef(u64::MAX);

    pub fn is_null(&self) -> bool {
        *self == BlobRef::NULL
    }
}

struct Inner {
    file: File,
    /// Cached end-of-file offset, valid only while `at_end` holds.
    end_offset: u64,
    /// True exactly when the file cursor is known to sit at
    /// `end_offset`, letting the next write skip a seek.
    at_end: bool,
}

/// An append-only, randomly-readable blob store backed by one file.
/// All access goes through a single lock: "a process-wide lock
/// serializes file access" (spec.md §4.1).
pub struct BlobStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl BlobStore {
    /// Open (creating if absent) the blob store file at `path`.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let end_offset = file.seek(SeekFrom::End(0))?;
        Ok(BlobStore {
            path,
            inner: Mutex::new(Inner {
                file,
                end_offset,
                at_end: true,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `bytes` as a new length-prefixed record and return its
    /// stable `BlobRef`.
    pub fn write(&self, bytes: &[u8]) -> anyhow::Result<BlobRef> {
        let mut inner = self.inner.lock();
        if !inner.at_end {
            let offset = inner.file.seek(SeekFrom::End(0))?;
            inner.end_offset = offset;
            inner.at_end = true;
        }
        let offset = inner.end_offset;
        let write_result = (|| -> std::io::Result<()> {
            inner.file.write_u64::<BigEndian>(bytes.len() as u64)?;
            inner.file.write_all(bytes)?;
            Ok(())
        })();
        match write_result {
            Ok(()) => {
                inner.end_offset = offset + 8 + bytes.len() as u64;
                Ok(BlobRef(offset))
            }
            Err(e) => {
                // Exceptions during write invalidate the "at end" flag
                // (spec.md §4.1): the next write reseeks from scratch.
                inner.at_end = false;
                Err(e.into())
            }
        }
    }

    /// Read the blob stored at `blob_ref`.
    pub fn read(&self, blob_ref: BlobRef) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(!blob_ref.is_null(), "attempted to read the null BlobRef");
        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(blob_ref.0))?;
        let len = inner.file.read_u64::<BigEndian>()?;
        let mut buf = vec![0u8; len as usize];
        inner.file.read_exact(&mut buf)?;
        // A read moves the cursor away from end-of-file.
        inner.at_end = false;
        Ok(buf)
    }

    /// fsync the underlying file.
    pub fn flush(&self) -> anyhow::Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_all()?;
        Ok(())
    }

    /// Close the store and delete its backing file.
    pub fn destroy(self) -> anyhow::Result<()> {
        drop(self.inner);
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("blobs")).unwrap();
        let r1 = store.write(b"hello").unwrap();
        let r2 = store.write(b"world, a bit longer").unwrap();
        assert_eq!(store.read(r1).unwrap(), b"hello");
        assert_eq!(store.read(r2).unwrap(), b"world, a bit longer");
    }

    #[test]
    fn reopening_preserves_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs");
        let r1 = {
            let store = BlobStore::open(&path).unwrap();
            store.write(b"persisted").unwrap()
        };
        let store = BlobStore::open(&path).unwrap();
        assert_eq!(store.read(r1).unwrap(), b"persisted");
        let r2 = store.write(b"appended-after-reopen").unwrap();
        assert_eq!(store.read(r2).unwrap(), b"appended-after-reopen");
    }

    proptest! {
        #[test]
        fn round_trip_arbitrary_blobs(blobs in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..512), 1..200)) {
            let dir = tempfile::tempdir().unwrap();
            let store = BlobStore::open(dir.path().join("blobs")).unwrap();
            let refs: Vec<_> = blobs.iter().map(|b| store.write(b).unwrap()).collect();
            for (r, b) in refs.iter().zip(blobs.iter()) {
                prop_assert_eq!(&store.read(*r).unwrap(), b);
            }
        }
    }
}
