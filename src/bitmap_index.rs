// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! `BitmapIndex` — the cached, persisted registry of named bitmaps that
//! everything else (feature tags, context membership, BSI slices) is
//! built on top of (spec.md §4.2).
//!
//! Keys are validated and normalized through [`crate::key`] before every
//! store or cache lookup. Bitmaps themselves live in a `bitmaps` dataset,
//! one roaring-bitmap blob per key, with a bounded in-memory cache sitting
//! in front — the same cache-then-store-then-create lookup chain the
//! teacher's `indices::manager` uses for its table index cache.

use crate::bitmap::{Bitmap, Seed};
use crate::error::{SynapsdError, SynapsdResult};
use crate::events::{Event, EventSink};
use crate::key;
use crate::store::dataset::Dataset;
use std::collections::HashMap;
use std::sync::RwLock;

/// A bitmap key with an optional leading `!` negation marker, as accepted
/// by the multi-bitmap algebra operators.
#[derive(Debug, Clone)]
pub struct NegatableKey {
    pub negated: bool,
    pub key: String,
}

impl NegatableKey {
    pub fn parse(raw: &str) -> Self {
        let (negated, key) = key::split_negation(raw);
        Self {
            negated,
            key: key.to_string(),
        }
    }
}

impl From<&str> for NegatableKey {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// The persisted, cached registry of bitmaps.
pub struct BitmapIndex<S: EventSink> {
    dataset: Dataset,
    cache: RwLock<HashMap<String, Bitmap>>,
    cache_capacity: usize,
    range_min: u32,
    range_max: u32,
    sink: S,
}

impl<S: EventSink> BitmapIndex<S> {
    pub fn new(dataset: Dataset, range_min: u32, range_max: u32, cache_capacity: usize, sink: S) -> Self {
        Self {
            dataset,
            cache: RwLock::new(HashMap::new()),
            cache_capacity,
            range_min,
            range_max,
            sink,
        }
    }

    fn load_from_store(&self, key: &str) -> SynapsdResult<Option<Bitmap>> {
        match self.dataset.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(Bitmap::deserialize(
                key,
                self.range_min,
                self.range_max,
                &bytes,
            )?)),
            None => Ok(None),
        }
    }

    fn save(&self, bitmap: &Bitmap) -> SynapsdResult<()> {
        let bytes = bitmap.serialize()?;
        self.dataset.put(bitmap.key().as_bytes(), &bytes)?;
        self.insert_into_cache(bitmap.clone());
        Ok(())
    }

    fn insert_into_cache(&self, bitmap: Bitmap) {
        let mut cache = self.cache.write().expect("bitmap cache lock poisoned");
        if cache.len() >= self.cache_capacity && !cache.contains_key(bitmap.key()) {
            // No per-entry recency tracking: evict an arbitrary entry.
            // Good enough for a process-local warm cache in front of a
            // KV store that always has the authoritative copy.
            if let Some(victim) = cache.keys().next().cloned() {
                cache.remove(&victim);
            }
        }
        cache.insert(bitmap.key().to_string(), bitmap);
    }

    /// Idempotent: returns the existing bitmap if `key` is already present.
    pub fn create_bitmap(&self, raw_key: &str, seed: impl Into<Seed>) -> SynapsdResult<Bitmap> {
        let validated = key::validate_key(raw_key)?;
        if let Some(existing) = self.get_bitmap(&validated, false)? {
            return Ok(existing);
        }
        let bitmap = Bitmap::create(validated, self.range_min, self.range_max, seed)?;
        self.save(&bitmap)?;
        Ok(bitmap)
    }

    /// Cache, then store (repopulating the cache on a hit), then create
    /// when `auto_create` and nothing was found. An invalid key with
    /// `auto_create = false` returns `None`; with `auto_create = true` it
    /// fails with `InvalidKey`.
    pub fn get_bitmap(&self, raw_key: &str, auto_create: bool) -> SynapsdResult<Option<Bitmap>> {
        let validated = match key::validate_key(raw_key) {
            Ok(v) => v,
            Err(e) => {
                return if auto_create { Err(e) } else { Ok(None) };
            }
        };

        if let Some(hit) = self.cache.read().expect("bitmap cache lock poisoned").get(&validated) {
            return Ok(Some(hit.clone()));
        }

        if let Some(loaded) = self.load_from_store(&validated)? {
            self.insert_into_cache(loaded.clone());
            return Ok(Some(loaded));
        }

        if auto_create {
            log::debug!("auto-creating bitmap '{}'", validated);
            return Ok(Some(self.create_bitmap(&validated, Seed::None)?));
        }

        Ok(None)
    }

    pub fn has_bitmap(&self, raw_key: &str) -> SynapsdResult<bool> {
        let Ok(validated) = key::validate_key(raw_key) else {
            return Ok(false);
        };
        self.dataset.has(validated.as_bytes())
    }

    /// Save under `new`, delete `old`, inside a single backend transaction
    /// so both effects are observable together.
    pub fn rename_bitmap(&self, old: &str, new: &str) -> SynapsdResult<()> {
        let old_key = key::validate_key(old)?;
        let new_key = key::validate_key(new)?;
        let Some(bitmap) = self.get_bitmap(&old_key, false)? else {
            return Err(SynapsdError::Missing {
                what: "bitmap".to_string(),
                key: old_key,
            });
        };
        let rebound = Bitmap::create(new_key.clone(), self.range_min, self.range_max, bitmap.into_inner())?;
        let bytes = rebound.serialize()?;
        self.dataset.transaction(|txn| {
            txn.put(new_key.as_bytes(), &bytes)?;
            txn.del(old_key.as_bytes())?;
            Ok(())
        })?;
        self.cache.write().expect("bitmap cache lock poisoned").remove(&old_key);
        self.insert_into_cache(rebound);
        self.sink.emit(Event::BitmapUpdated {
            keys: vec![new_key],
        });
        Ok(())
    }

    pub fn delete_bitmap(&self, raw_key: &str) -> SynapsdResult<()> {
        let validated = key::validate_key(raw_key)?;
        self.cache.write().expect("bitmap cache lock poisoned").remove(&validated);
        self.dataset.del(validated.as_bytes())?;
        self.sink.emit(Event::BitmapDeleted { key: validated });
        Ok(())
    }

    /// Ordered keys under `prefix`; when `prefix` is `None`, excludes
    /// everything under `internal/`.
    pub fn list_bitmaps(&self, prefix: Option<&str>) -> SynapsdResult<Vec<String>> {
        let keys = self.dataset.keys()?;
        let mut out: Vec<String> = keys
            .into_iter()
            .filter_map(|k| String::from_utf8(k).ok())
            .collect();
        out.sort();
        match prefix {
            Some(p) => Ok(out.into_iter().filter(|k| k.starts_with(p)).collect()),
            None => Ok(out.into_iter().filter(|k| !k.starts_with("internal/")).collect()),
        }
    }

    /// Auto-create the bitmap, filter `ids` to positive integers, add the
    /// valid ones, save, and emit `bitmap:update`.
    pub fn tick(&self, raw_key: &str, ids: &[i64]) -> SynapsdResult<Bitmap> {
        let valid: Vec<u32> = ids.iter().filter_map(|&id| valid_id(id)).collect();
        let mut bitmap = self
            .get_bitmap(raw_key, true)?
            .expect("auto_create=true always yields a bitmap");
        bitmap.add_many(&valid)?;
        self.save(&bitmap)?;
        self.sink.emit(Event::BitmapUpdated {
            keys: vec![bitmap.key().to_string()],
        });
        Ok(bitmap)
    }

    /// No-op on a missing bitmap. Deletes (and returns `None`) if the
    /// result becomes empty; otherwise saves and returns the bitmap.
    pub fn untick(&self, raw_key: &str, ids: &[i64]) -> SynapsdResult<Option<Bitmap>> {
        let Some(mut bitmap) = self.get_bitmap(raw_key, false)? else {
            log::debug!("untick on missing bitmap '{}' is a no-op", raw_key);
            return Ok(None);
        };
        let valid: Vec<u32> = ids.iter().filter_map(|&id| valid_id(id)).collect();
        bitmap.remove_many(&valid)?;
        if bitmap.is_empty() {
            self.delete_bitmap(bitmap.key())?;
            return Ok(None);
        }
        self.save(&bitmap)?;
        self.sink.emit(Event::BitmapUpdated {
            keys: vec![bitmap.key().to_string()],
        });
        Ok(Some(bitmap))
    }

    /// Keys processed sequentially; a failure on key `k` aborts further
    /// keys but does not roll back prior saves.
    pub fn tick_many(&self, keys: &[&str], ids: &[i64]) -> SynapsdResult<()> {
        for key in keys {
            self.tick(key, ids)?;
        }
        Ok(())
    }

    pub fn untick_many(&self, keys: &[&str], ids: &[i64]) -> SynapsdResult<()> {
        for key in keys {
            self.untick(key, ids)?;
        }
        Ok(())
    }

    /// (∩ positives) \ (∪ negatives). A missing positive key yields an
    /// empty result; an empty positive set restricts to the full id range.
    pub fn and(&self, keys: &[NegatableKey]) -> SynapsdResult<Bitmap> {
        let (positives, negatives) = split(keys);
        let mut acc: Option<Bitmap> = None;
        for p in &positives {
            let Some(bitmap) = self.get_bitmap(p, false)? else {
                return Bitmap::new("internal/result/and", self.range_min, self.range_max);
            };
            acc = Some(match acc {
                None => bitmap,
                Some(current) => current.and(&bitmap),
            });
        }
        let mut result = match acc {
            Some(b) => b,
            None => universe(self.range_min, self.range_max)?,
        };
        for n in &negatives {
            if let Some(bitmap) = self.get_bitmap(n, false)? {
                result = result.and_not(&bitmap);
            }
        }
        Ok(result)
    }

    /// (∪ positives) \ (∪ negatives). Missing positive keys auto-create
    /// empty (equivalent to contributing nothing to the union).
    pub fn or(&self, keys: &[NegatableKey]) -> SynapsdResult<Bitmap> {
        let (positives, negatives) = split(keys);
        let mut result = Bitmap::new("internal/result/or", self.range_min, self.range_max)?;
        for p in &positives {
            if let Some(bitmap) = self.get_bitmap(p, false)? {
                result = result.or(&bitmap);
            }
        }
        for n in &negatives {
            if let Some(bitmap) = self.get_bitmap(n, false)? {
                result = result.and_not(&bitmap);
            }
        }
        Ok(result)
    }

    /// Left-associative fold of `xor` over positives (missing keys
    /// skipped), then subtract the union of negatives.
    pub fn xor(&self, keys: &[NegatableKey]) -> SynapsdResult<Bitmap> {
        let (positives, negatives) = split(keys);
        let mut acc: Option<Bitmap> = None;
        for p in &positives {
            let Some(bitmap) = self.get_bitmap(p, false)? else {
                continue;
            };
            acc = Some(match acc {
                None => bitmap,
                Some(current) => current.xor(&bitmap),
            });
        }
        let mut result = acc.unwrap_or(Bitmap::new("internal/result/xor", self.range_min, self.range_max)?);
        for n in &negatives {
            if let Some(bitmap) = self.get_bitmap(n, false)? {
                result = result.and_not(&bitmap);
            }
        }
        Ok(result)
    }

    /// OR `source` into each of `targets` (auto-creating targets). Returns
    /// the keys whose size changed.
    pub fn apply_to_many(&self, source_key: &str, targets: &[&str]) -> SynapsdResult<Vec<String>> {
        let Some(source) = self.get_bitmap(source_key, false)? else {
            return Ok(Vec::new());
        };
        let mut changed = Vec::new();
        for target in targets {
            let mut bitmap = self
                .get_bitmap(target, true)?
                .expect("auto_create=true always yields a bitmap");
            let before = bitmap.size();
            bitmap.or_inplace(&source);
            if bitmap.size() != before {
                self.save(&bitmap)?;
                changed.push(bitmap.key().to_string());
            }
        }
        Ok(changed)
    }

    /// AND-NOT `source` from each existing target; deletes targets that
    /// become empty. Returns the affected keys.
    pub fn subtract_from_many(&self, source_key: &str, targets: &[&str]) -> SynapsdResult<Vec<String>> {
        let Some(source) = self.get_bitmap(source_key, false)? else {
            return Ok(Vec::new());
        };
        let mut affected = Vec::new();
        for target in targets {
            let Some(mut bitmap) = self.get_bitmap(target, false)? else {
                continue;
            };
            let before = bitmap.size();
            bitmap.and_not_inplace(&source);
            if bitmap.size() == before {
                continue;
            }
            affected.push(bitmap.key().to_string());
            if bitmap.is_empty() {
                self.delete_bitmap(bitmap.key())?;
            } else {
                self.save(&bitmap)?;
            }
        }
        Ok(affected)
    }
}

fn valid_id(raw: i64) -> Option<u32> {
    if raw <= 0 {
        return None;
    }
    u32::try_from(raw).ok()
}

fn split(keys: &[NegatableKey]) -> (Vec<String>, Vec<String>) {
    let mut positives = Vec::new();
    let mut negatives = Vec::new();
    for k in keys {
        if k.negated {
            negatives.push(k.key.clone());
        } else {
            positives.push(k.key.clone());
        }
    }
    (positives, negatives)
}

fn universe(range_min: u32, range_max: u32) -> SynapsdResult<Bitmap> {
    Bitmap::full_range("internal/result/universe", range_min, range_max)
}

#[cfg(test)]
mod bitmap_index_test {
    use super::*;
    use crate::events::NullSink;
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    fn index() -> BitmapIndex<NullSink> {
        let store: Arc<dyn crate::store::KvStore> = Arc::new(MemoryStore::new());
        let dataset = Dataset::new(store, "bitmaps");
        BitmapIndex::new(dataset, 0, 1000, 100, NullSink)
    }

    #[test]
    fn create_is_idempotent() {
        let index = index();
        let first = index.create_bitmap("tag/work", vec![1u32, 2]).unwrap();
        let second = index.create_bitmap("tag/work", vec![99u32]).unwrap();
        assert_eq!(first.to_array(), second.to_array());
    }

    #[test]
    fn invalid_key_without_auto_create_returns_none() {
        let index = index();
        assert!(index.get_bitmap("bogus/x", false).unwrap().is_none());
    }

    #[test]
    fn invalid_key_with_auto_create_fails() {
        let index = index();
        assert!(index.get_bitmap("bogus/x", true).is_err());
    }

    #[test]
    fn tick_then_untick_to_empty_deletes() {
        let index = index();
        index.tick("tag/work", &[1, 2, 3]).unwrap();
        assert!(index.has_bitmap("tag/work").unwrap());
        let result = index.untick("tag/work", &[1, 2, 3]).unwrap();
        assert!(result.is_none());
        assert!(!index.has_bitmap("tag/work").unwrap());
    }

    #[test]
    fn tick_filters_non_positive_ids() {
        let index = index();
        let bitmap = index.tick("tag/work", &[-1, 0, 5]).unwrap();
        assert_eq!(bitmap.to_array(), vec![5]);
    }

    #[test]
    fn list_bitmaps_excludes_internal_without_prefix() {
        let index = index();
        index.tick("tag/work", &[1]).unwrap();
        index.tick("internal/action/created", &[1]).unwrap();
        let listed = index.list_bitmaps(None).unwrap();
        assert!(listed.contains(&"tag/work".to_string()));
        assert!(!listed.iter().any(|k| k.starts_with("internal/")));
    }

    #[test]
    fn and_with_missing_positive_is_empty() {
        let index = index();
        index.tick("tag/a", &[1, 2]).unwrap();
        let result = index
            .and(&[NegatableKey::parse("tag/a"), NegatableKey::parse("tag/missing")])
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn and_with_negation_subtracts() {
        let index = index();
        index.tick("tag/a", &[1, 2, 3]).unwrap();
        index.tick("tag/b", &[2]).unwrap();
        let result = index
            .and(&[NegatableKey::parse("tag/a"), NegatableKey::parse("!tag/b")])
            .unwrap();
        assert_eq!(result.to_array(), vec![1, 3]);
    }

    #[test]
    fn or_skips_missing_and_applies_negation() {
        let index = index();
        index.tick("tag/a", &[1, 2]).unwrap();
        index.tick("tag/b", &[2]).unwrap();
        let result = index
            .or(&[
                NegatableKey::parse("tag/a"),
                NegatableKey::parse("tag/missing"),
                NegatableKey::parse("!tag/b"),
            ])
            .unwrap();
        assert_eq!(result.to_array(), vec![1]);
    }

    #[test]
    fn apply_to_many_reports_changed_targets() {
        let index = index();
        index.tick("tag/source", &[1, 2]).unwrap();
        index.tick("tag/target_a", &[2]).unwrap();
        let changed = index.apply_to_many("tag/source", &["tag/target_a", "tag/target_b"]).unwrap();
        assert_eq!(changed, vec!["tag/target_a", "tag/target_b"]);
    }

    #[test]
    fn subtract_from_many_deletes_emptied_targets() {
        let index = index();
        index.tick("tag/source", &[1, 2]).unwrap();
        index.tick("tag/target", &[1, 2]).unwrap();
        let affected = index.subtract_from_many("tag/source", &["tag/target"]).unwrap();
        assert_eq!(affected, vec!["tag/target"]);
        assert!(!index.has_bitmap("tag/target").unwrap());
    }
}
