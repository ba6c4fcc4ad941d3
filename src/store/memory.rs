// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! In-process `KvStore` backend.
//!
//! A `BTreeMap` behind a single `RwLock` gives ordered iteration (required
//! for `get_range`/prefix scans) and snapshot-consistent reads for free:
//! readers take the read guard, `transaction` takes the write guard for
//! its whole body, matching spec.md §5's "transaction body executes
//! exclusively with respect to other transactions".

use crate::error::SynapsdResult;
use crate::store::{KeyRange, KvEntry, KvStore};
use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

/// The default SynapsD backend: everything lives in memory for the
/// lifetime of the process.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    /// Held for the duration of a `transaction` body, separately from
    /// `data`, so the body can still call back into `get`/`put`/etc.
    /// without re-entering an already-held lock.
    txn_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> SynapsdResult<Option<Vec<u8>>> {
        Ok(self
            .data
            .read()
            .expect("memory store lock poisoned")
            .get(key)
            .cloned())
    }

    fn has(&self, key: &[u8]) -> SynapsdResult<bool> {
        Ok(self
            .data
            .read()
            .expect("memory store lock poisoned")
            .contains_key(key))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> SynapsdResult<()> {
        self.data
            .write()
            .expect("memory store lock poisoned")
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn del(&self, key: &[u8]) -> SynapsdResult<()> {
        self.data
            .write()
            .expect("memory store lock poisoned")
            .remove(key);
        Ok(())
    }

    fn get_keys(&self, range: &KeyRange) -> SynapsdResult<Vec<Vec<u8>>> {
        let guard = self.data.read().expect("memory store lock poisoned");
        Ok(guard
            .keys()
            .filter(|k| range.contains(k))
            .cloned()
            .collect())
    }

    fn get_range(&self, range: &KeyRange) -> SynapsdResult<Vec<KvEntry>> {
        let guard = self.data.read().expect("memory store lock poisoned");
        Ok(guard
            .iter()
            .filter(|(k, _)| range.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn transaction(
        &self,
        body: &mut dyn FnMut(&dyn KvStore) -> SynapsdResult<()>,
    ) -> SynapsdResult<()> {
        let _txn_guard = self.txn_lock.lock().expect("memory store txn lock poisoned");
        body(self)
    }
}
