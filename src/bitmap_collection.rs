// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! `BitmapCollection` — a thin, prefix-scoped façade over `BitmapIndex`
//! (spec.md §4.3). Every public method normalizes its key argument through
//! [`make_key`] and [`crate::key::validate_key`], then delegates straight
//! through to the shared index.

use crate::bitmap::{Bitmap, Seed};
use crate::bitmap_index::{BitmapIndex, NegatableKey};
use crate::error::SynapsdResult;
use crate::events::EventSink;
use once_cell::sync::Lazy;

static COLLAPSE_UNDERSCORES: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"_{2,}").expect("static regex is valid"));

/// Normalize a raw collection-relative key:
/// - `/` maps to the bare collection prefix.
/// - Lowercase; whitespace becomes `_`; `/`, `.`, `-`, `_` are preserved;
///   anything else is dropped; runs of `_` collapse to one.
/// - A leading `!` survives normalization (it's a query-time marker, not
///   part of the key body).
pub fn make_key(prefix: &str, raw: &str) -> String {
    let negated = raw.starts_with('!');
    let body = if negated { &raw[1..] } else { raw };
    let trimmed = body.trim();

    let suffix = if trimmed == "/" || trimmed.is_empty() {
        String::new()
    } else {
        let lowered = trimmed.to_lowercase();
        let mut cleaned = String::with_capacity(lowered.len());
        for c in lowered.chars() {
            if c.is_whitespace() {
                cleaned.push('_');
            } else if c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '-' | '_') {
                cleaned.push(c);
            }
        }
        let collapsed = COLLAPSE_UNDERSCORES.replace_all(&cleaned, "_").into_owned();
        let collapsed = collapsed.trim_matches('/');
        format!("/{}", collapsed)
    };

    let joined = format!("{}{}", prefix.trim_end_matches('/'), suffix);
    if negated {
        format!("!{}", joined)
    } else {
        joined
    }
}

/// A named bitmap collection scoped to a fixed key prefix (e.g. `tag`,
/// `context`, `data/abstraction`), backed by a shared `BitmapIndex`.
pub struct BitmapCollection<'a, S: EventSink> {
    index: &'a BitmapIndex<S>,
    prefix: String,
}

impl<'a, S: EventSink> BitmapCollection<'a, S> {
    pub fn new(index: &'a BitmapIndex<S>, prefix: impl Into<String>) -> Self {
        Self {
            index,
            prefix: prefix.into(),
        }
    }

    fn key(&self, raw: &str) -> String {
        make_key(&self.prefix, raw)
    }

    pub fn create_bitmap(&self, raw: &str, seed: impl Into<Seed>) -> SynapsdResult<Bitmap> {
        self.index.create_bitmap(&self.key(raw), seed)
    }

    pub fn get_bitmap(&self, raw: &str, auto_create: bool) -> SynapsdResult<Option<Bitmap>> {
        self.index.get_bitmap(&self.key(raw), auto_create)
    }

    pub fn has_bitmap(&self, raw: &str) -> SynapsdResult<bool> {
        self.index.has_bitmap(&self.key(raw))
    }

    pub fn rename_bitmap(&self, old: &str, new: &str) -> SynapsdResult<()> {
        self.index.rename_bitmap(&self.key(old), &self.key(new))
    }

    pub fn delete_bitmap(&self, raw: &str) -> SynapsdResult<()> {
        self.index.delete_bitmap(&self.key(raw))
    }

    pub fn list_bitmaps(&self) -> SynapsdResult<Vec<String>> {
        self.index.list_bitmaps(Some(&self.prefix))
    }

    pub fn tick(&self, raw: &str, ids: &[i64]) -> SynapsdResult<Bitmap> {
        self.index.tick(&self.key(raw), ids)
    }

    pub fn untick(&self, raw: &str, ids: &[i64]) -> SynapsdResult<Option<Bitmap>> {
        self.index.untick(&self.key(raw), ids)
    }

    pub fn tick_many(&self, raws: &[&str], ids: &[i64]) -> SynapsdResult<()> {
        let keys: Vec<String> = raws.iter().map(|r| self.key(r)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.index.tick_many(&refs, ids)
    }

    pub fn untick_many(&self, raws: &[&str], ids: &[i64]) -> SynapsdResult<()> {
        let keys: Vec<String> = raws.iter().map(|r| self.key(r)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.index.untick_many(&refs, ids)
    }

    fn transform(&self, raws: &[&str]) -> Vec<NegatableKey> {
        raws.iter().map(|r| {
            let negated = r.starts_with('!');
            let body = if negated { &r[1..] } else { r };
            let key = self.key(body);
            NegatableKey { negated, key }
        }).collect()
    }

    pub fn and(&self, raws: &[&str]) -> SynapsdResult<Bitmap> {
        self.index.and(&self.transform(raws))
    }

    pub fn or(&self, raws: &[&str]) -> SynapsdResult<Bitmap> {
        self.index.or(&self.transform(raws))
    }

    pub fn xor(&self, raws: &[&str]) -> SynapsdResult<Bitmap> {
        self.index.xor(&self.transform(raws))
    }

    pub fn apply_to_many(&self, source: &str, targets: &[&str]) -> SynapsdResult<Vec<String>> {
        let source_key = self.key(source);
        let target_keys: Vec<String> = targets.iter().map(|t| self.key(t)).collect();
        let refs: Vec<&str> = target_keys.iter().map(String::as_str).collect();
        self.index.apply_to_many(&source_key, &refs)
    }

    pub fn subtract_from_many(&self, source: &str, targets: &[&str]) -> SynapsdResult<Vec<String>> {
        let source_key = self.key(source);
        let target_keys: Vec<String> = targets.iter().map(|t| self.key(t)).collect();
        let refs: Vec<&str> = target_keys.iter().map(String::as_str).collect();
        self.index.subtract_from_many(&source_key, &refs)
    }
}

#[cfg(test)]
mod bitmap_collection_test {
    use super::*;

    #[test]
    fn root_maps_to_bare_prefix() {
        assert_eq!(make_key("context", "/"), "context");
    }

    #[test]
    fn lowercases_and_replaces_whitespace() {
        assert_eq!(make_key("tag", "Hello World"), "tag/hello_world");
    }

    #[test]
    fn collapses_repeated_underscores() {
        assert_eq!(make_key("tag", "a   b"), "tag/a_b");
    }

    #[test]
    fn preserves_leading_negation() {
        assert_eq!(make_key("tag", "!Work"), "!tag/work");
    }

    #[test]
    fn drops_disallowed_characters() {
        assert_eq!(make_key("tag", "a@b#c"), "tag/abc");
    }

    #[test]
    fn collection_delegates_tick_to_index() {
        use crate::events::NullSink;
        use crate::store::dataset::Dataset;
        use crate::store::memory::MemoryStore;
        use std::sync::Arc;

        let store: Arc<dyn crate::store::KvStore> = Arc::new(MemoryStore::new());
        let dataset = Dataset::new(store, "bitmaps");
        let index = BitmapIndex::new(dataset, 0, 1000, 100, NullSink);
        let tags = BitmapCollection::new(&index, "tag");

        tags.tick("Work Stuff", &[1, 2]).unwrap();
        assert!(tags.has_bitmap("work_stuff").unwrap());
        assert!(index.has_bitmap("tag/work_stuff").unwrap());
    }
}
