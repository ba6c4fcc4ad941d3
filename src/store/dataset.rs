// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Named logical namespaces layered over a `KvStore`.
//!
//! spec.md §6 requires dataset names containing `/` to produce nested
//! storage. `Dataset` implements that by byte-prefixing every key with
//! `"<name>/"` before delegating to the underlying store — for a file
//! backend this maps onto real subdirectories (see `store::file`), for
//! `MemoryStore` it's simply a key prefix inside the one shared map.

use crate::error::SynapsdResult;
use crate::store::{KeyRange, KvEntry, KvStore};
use std::sync::Arc;

fn namespaced(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut full = prefix.to_vec();
    full.extend_from_slice(key);
    full
}

fn strip<'a>(prefix: &[u8], key: &'a [u8]) -> &'a [u8] {
    &key[prefix.len()..]
}

fn namespace_range(prefix: &[u8], range: &KeyRange) -> KeyRange {
    let start = match &range.start {
        Some(s) => namespaced(prefix, s),
        None => prefix.to_vec(),
    };
    let end = match &range.end {
        Some(e) => namespaced(prefix, e),
        None => KeyRange::prefix(prefix).end.unwrap_or_default(),
    };
    KeyRange::new(Some(start), Some(end))
}

fn ns_get(store: &dyn KvStore, prefix: &[u8], key: &[u8]) -> SynapsdResult<Option<Vec<u8>>> {
    store.get(&namespaced(prefix, key))
}

fn ns_has(store: &dyn KvStore, prefix: &[u8], key: &[u8]) -> SynapsdResult<bool> {
    store.has(&namespaced(prefix, key))
}

fn ns_put(store: &dyn KvStore, prefix: &[u8], key: &[u8], value: &[u8]) -> SynapsdResult<()> {
    store.put(&namespaced(prefix, key), value)
}

fn ns_del(store: &dyn KvStore, prefix: &[u8], key: &[u8]) -> SynapsdResult<()> {
    store.del(&namespaced(prefix, key))
}

fn ns_get_keys(store: &dyn KvStore, prefix: &[u8], range: &KeyRange) -> SynapsdResult<Vec<Vec<u8>>> {
    Ok(store
        .get_keys(&namespace_range(prefix, range))?
        .into_iter()
        .map(|k| strip(prefix, &k).to_vec())
        .collect())
}

fn ns_get_range(store: &dyn KvStore, prefix: &[u8], range: &KeyRange) -> SynapsdResult<Vec<KvEntry>> {
    Ok(store
        .get_range(&namespace_range(prefix, range))?
        .into_iter()
        .map(|(k, v)| (strip(prefix, &k).to_vec(), v))
        .collect())
}

/// A named namespace over a shared `KvStore`. Cheap to clone (an `Arc` to
/// the backend plus an owned prefix string).
#[derive(Clone)]
pub struct Dataset {
    store: Arc<dyn KvStore>,
    prefix: Vec<u8>,
}

impl Dataset {
    /// Open (logically — no on-disk side effects for `MemoryStore`) the
    /// named dataset on `store`.
    pub fn new(store: Arc<dyn KvStore>, name: &str) -> Self {
        let mut prefix = name.as_bytes().to_vec();
        prefix.push(b'/');
        Self { store, prefix }
    }

    pub fn get(&self, key: &[u8]) -> SynapsdResult<Option<Vec<u8>>> {
        ns_get(self.store.as_ref(), &self.prefix, key)
    }

    pub fn has(&self, key: &[u8]) -> SynapsdResult<bool> {
        ns_has(self.store.as_ref(), &self.prefix, key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> SynapsdResult<()> {
        ns_put(self.store.as_ref(), &self.prefix, key, value)
    }

    pub fn del(&self, key: &[u8]) -> SynapsdResult<()> {
        ns_del(self.store.as_ref(), &self.prefix, key)
    }

    /// Keys within `range` (interpreted relative to this dataset),
    /// returned with the dataset prefix stripped back off.
    pub fn get_keys(&self, range: &KeyRange) -> SynapsdResult<Vec<Vec<u8>>> {
        ns_get_keys(self.store.as_ref(), &self.prefix, range)
    }

    pub fn get_range(&self, range: &KeyRange) -> SynapsdResult<Vec<KvEntry>> {
        ns_get_range(self.store.as_ref(), &self.prefix, range)
    }

    /// All keys in this dataset, with the dataset prefix stripped.
    pub fn keys(&self) -> SynapsdResult<Vec<Vec<u8>>> {
        self.get_keys(&KeyRange::default())
    }

    /// Keys in this dataset under `sub_prefix` (e.g. an algorithm name
    /// inside the `checksums` dataset).
    pub fn keys_with_prefix(&self, sub_prefix: &[u8]) -> SynapsdResult<Vec<Vec<u8>>> {
        self.get_keys(&KeyRange::prefix(sub_prefix))
    }

    pub fn count(&self) -> SynapsdResult<usize> {
        Ok(self.keys()?.len())
    }

    /// Run `body` against this dataset with the backend's exclusivity
    /// guarantee for the duration of the call.
    pub fn transaction(
        &self,
        mut body: impl FnMut(&DatasetTxn<'_>) -> SynapsdResult<()>,
    ) -> SynapsdResult<()> {
        let prefix = &self.prefix;
        self.store.transaction(&mut |txn| {
            let scoped = DatasetTxn {
                store: txn,
                prefix,
            };
            body(&scoped)
        })
    }
}

/// A `Dataset` borrowed for the lifetime of a single `transaction` body.
/// Exposes the same read/write surface as `Dataset` without needing to
/// manufacture an owned `Arc<dyn KvStore>` from the borrowed reference
/// `KvStore::transaction` hands back.
pub struct DatasetTxn<'a> {
    store: &'a dyn KvStore,
    prefix: &'a [u8],
}

impl<'a> DatasetTxn<'a> {
    pub fn get(&self, key: &[u8]) -> SynapsdResult<Option<Vec<u8>>> {
        ns_get(self.store, self.prefix, key)
    }

    pub fn has(&self, key: &[u8]) -> SynapsdResult<bool> {
        ns_has(self.store, self.prefix, key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> SynapsdResult<()> {
        ns_put(self.store, self.prefix, key, value)
    }

    pub fn del(&self, key: &[u8]) -> SynapsdResult<()> {
        ns_del(self.store, self.prefix, key)
    }

    pub fn get_keys(&self, range: &KeyRange) -> SynapsdResult<Vec<Vec<u8>>> {
        ns_get_keys(self.store, self.prefix, range)
    }

    pub fn get_range(&self, range: &KeyRange) -> SynapsdResult<Vec<KvEntry>> {
        ns_get_range(self.store, self.prefix, range)
    }

    pub fn keys(&self) -> SynapsdResult<Vec<Vec<u8>>> {
        self.get_keys(&KeyRange::default())
    }
}

#[cfg(test)]
mod dataset_test {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn keys_are_namespaced_and_stripped() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let documents = Dataset::new(store.clone(), "documents");
        let checksums = Dataset::new(store, "checksums");

        documents.put(b"100001", b"{}").unwrap();
        checksums.put(b"crc32/abcd", b"100001").unwrap();

        assert_eq!(documents.keys().unwrap(), vec![b"100001".to_vec()]);
        assert_eq!(checksums.keys().unwrap(), vec![b"crc32/abcd".to_vec()]);
    }

    #[test]
    fn datasets_do_not_leak_into_each_other() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let documents = Dataset::new(store.clone(), "documents");
        let layers = Dataset::new(store, "layers");

        documents.put(b"1", b"a").unwrap();
        assert!(layers.get(b"1").unwrap().is_none());
    }

    #[test]
    fn transaction_is_scoped_to_dataset() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let documents = Dataset::new(store, "documents");
        documents
            .transaction(|txn| {
                txn.put(b"1", b"a")?;
                txn.put(b"2", b"b")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(documents.count().unwrap(), 2);
    }
}
