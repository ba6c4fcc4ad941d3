// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! A minimal on-disk `KvStore` backend.
//!
//! One append-only log file per store, replayed into an in-memory offset
//! index on open — the same discipline the teacher's `store::btree::wal`
//! module uses for crash-safety, simplified for SynapsD's access pattern
//! (exact-key and short-range lookups only; no ordered page structure is
//! needed). Writes go through an `fs2` advisory lock for the duration of
//! a `transaction`, the same RAII-release pattern as the teacher's
//! `concurrent::lock::TableLock`. Reads of the log's already-durable
//! prefix are served from a `memmap2` mapping so a cold `get` doesn't pay
//! a syscall per lookup.

use crate::error::{SynapsdError, SynapsdResult};
use crate::store::{KeyRange, KvEntry, KvStore};
use fs2::FileExt;
use memmap2::Mmap;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

const TOMBSTONE: u8 = 0;
const LIVE: u8 = 1;

/// On-disk, single-file `KvStore`. Safe for one process at a time; the
/// advisory lock only protects `transaction` bodies against interleaving,
/// per spec.md's "concurrent writers across OS processes" non-goal.
pub struct FileStore {
    path: PathBuf,
    file: Mutex<File>,
    index: RwLock<BTreeMap<Vec<u8>, u64>>,
    mmap: RwLock<Option<Mmap>>,
    txn_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if absent) the log file at `path`, replaying any
    /// existing records into the offset index.
    pub fn open(path: &Path) -> SynapsdResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let index = replay(&mut file)?;
        let store = Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index: RwLock::new(index),
            mmap: RwLock::new(None),
            txn_lock: Mutex::new(()),
        };
        store.refresh_mmap()?;
        Ok(store)
    }

    fn refresh_mmap(&self) -> SynapsdResult<()> {
        let file = self.file.lock().expect("file store lock poisoned");
        let len = file.metadata()?.len();
        let mapped = if len == 0 {
            None
        } else {
            // Safety: the mapping is read-only and is rebuilt (dropped,
            // then remapped) after every append, so it never observes a
            // length shorter than what it was created against.
            Some(unsafe { Mmap::map(&*file)? })
        };
        *self.mmap.write().expect("mmap lock poisoned") = mapped;
        Ok(())
    }

    fn read_at(&self, offset: u64) -> SynapsdResult<Option<Vec<u8>>> {
        let guard = self.mmap.read().expect("mmap lock poisoned");
        let Some(mmap) = guard.as_ref() else {
            return Ok(None);
        };
        let bytes = &mmap[offset as usize..];
        let record = decode_record(bytes)?;
        Ok(record.map(|r| r.value))
    }

    fn append_record(&self, key: &[u8], value: Option<&[u8]>) -> SynapsdResult<u64> {
        let mut file = self.file.lock().expect("file store lock poisoned");
        let offset = file.seek(SeekFrom::End(0))?;
        let flag = if value.is_some() { LIVE } else { TOMBSTONE };
        let value = value.unwrap_or(&[]);
        let mut buf = Vec::with_capacity(1 + 4 + key.len() + 4 + value.len());
        buf.push(flag);
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buf.extend_from_slice(value);
        file.write_all(&buf)?;
        file.flush()?;
        drop(file);
        self.refresh_mmap()?;
        Ok(offset)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct Record {
    key: Vec<u8>,
    value: Vec<u8>,
}

/// Decode a single record at the start of `bytes`, returning `None` for a
/// tombstone (a delete record carries no value).
fn decode_record(bytes: &[u8]) -> SynapsdResult<Option<Record>> {
    if bytes.len() < 1 + 4 {
        return Err(SynapsdError::BackendError {
            operation: "decode_record".to_string(),
            reason: "truncated record header".to_string(),
        });
    }
    let flag = bytes[0];
    let key_len = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
    let key_start = 5;
    let key_end = key_start + key_len;
    let value_len_end = key_end + 4;
    if bytes.len() < value_len_end {
        return Err(SynapsdError::BackendError {
            operation: "decode_record".to_string(),
            reason: "truncated record key".to_string(),
        });
    }
    let key = bytes[key_start..key_end].to_vec();
    let value_len = u32::from_le_bytes(bytes[key_end..value_len_end].try_into().unwrap()) as usize;
    let value_start = value_len_end;
    let value_end = value_start + value_len;
    if bytes.len() < value_end {
        return Err(SynapsdError::BackendError {
            operation: "decode_record".to_string(),
            reason: "truncated record value".to_string(),
        });
    }
    if flag == TOMBSTONE {
        let _ = key;
        return Ok(None);
    }
    Ok(Some(Record {
        key,
        value: bytes[value_start..value_end].to_vec(),
    }))
}

fn replay(file: &mut File) -> SynapsdResult<BTreeMap<Vec<u8>, u64>> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    let mut index = BTreeMap::new();
    let mut offset = 0usize;
    while offset < contents.len() {
        let start = offset;
        let flag = contents[offset];
        let key_len =
            u32::from_le_bytes(contents[offset + 1..offset + 5].try_into().unwrap()) as usize;
        let key_start = offset + 5;
        let key_end = key_start + key_len;
        let key = contents[key_start..key_end].to_vec();
        let value_len =
            u32::from_le_bytes(contents[key_end..key_end + 4].try_into().unwrap()) as usize;
        let value_end = key_end + 4 + value_len;
        if flag == TOMBSTONE {
            index.remove(&key);
        } else {
            index.insert(key, start as u64);
        }
        offset = value_end;
    }
    Ok(index)
}

impl KvStore for FileStore {
    fn get(&self, key: &[u8]) -> SynapsdResult<Option<Vec<u8>>> {
        let offset = self
            .index
            .read()
            .expect("file store index lock poisoned")
            .get(key)
            .copied();
        match offset {
            Some(offset) => self.read_at(offset),
            None => Ok(None),
        }
    }

    fn has(&self, key: &[u8]) -> SynapsdResult<bool> {
        Ok(self
            .index
            .read()
            .expect("file store index lock poisoned")
            .contains_key(key))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> SynapsdResult<()> {
        let offset = self.append_record(key, Some(value))?;
        self.index
            .write()
            .expect("file store index lock poisoned")
            .insert(key.to_vec(), offset);
        Ok(())
    }

    fn del(&self, key: &[u8]) -> SynapsdResult<()> {
        self.append_record(key, None)?;
        self.index
            .write()
            .expect("file store index lock poisoned")
            .remove(key);
        Ok(())
    }

    fn get_keys(&self, range: &KeyRange) -> SynapsdResult<Vec<Vec<u8>>> {
        Ok(self
            .index
            .read()
            .expect("file store index lock poisoned")
            .keys()
            .filter(|k| range.contains(k))
            .cloned()
            .collect())
    }

    fn get_range(&self, range: &KeyRange) -> SynapsdResult<Vec<KvEntry>> {
        let offsets: Vec<(Vec<u8>, u64)> = self
            .index
            .read()
            .expect("file store index lock poisoned")
            .iter()
            .filter(|(k, _)| range.contains(k))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        let mut out = Vec::with_capacity(offsets.len());
        for (key, offset) in offsets {
            if let Some(value) = self.read_at(offset)? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    fn transaction(
        &self,
        body: &mut dyn FnMut(&dyn KvStore) -> SynapsdResult<()>,
    ) -> SynapsdResult<()> {
        let _txn_guard = self.txn_lock.lock().expect("file store txn lock poisoned");
        let lock_file = self.file.lock().expect("file store lock poisoned");
        lock_file.lock_exclusive().map_err(|e| SynapsdError::BackendError {
            operation: "transaction".to_string(),
            reason: e.to_string(),
        })?;
        drop(lock_file);
        let result = body(self);
        let lock_file = self.file.lock().expect("file store lock poisoned");
        let _ = lock_file.unlock();
        result
    }
}

#[cfg(test)]
mod file_store_test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_get_del_roundtrip_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("documents.log");
        {
            let store = FileStore::open(&path).unwrap();
            store.put(b"100001", b"{\"schema\":\"note\"}").unwrap();
            store.put(b"100002", b"{\"schema\":\"note\"}").unwrap();
            store.del(b"100002").unwrap();
        }
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(b"100001").unwrap(),
            Some(b"{\"schema\":\"note\"}".to_vec())
        );
        assert_eq!(reopened.get(b"100002").unwrap(), None);
        assert!(!reopened.has(b"100002").unwrap());
    }

    #[test]
    fn transaction_serializes_writes() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("store.log")).unwrap();
        store
            .transaction(&mut |txn| {
                txn.put(b"a", b"1")?;
                txn.put(b"b", b"2")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }
}
