// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! `Bitmap` — a compressed roaring bitmap bound to a storage key and an
//! id-range invariant (spec.md §3, §4.1).
//!
//! Built on the `roaring` crate, the same dependency `rotonda-store` and
//! `arroy` reach for to track membership over 32-bit ids. A `Bitmap` only
//! ever holds ids in `[range_min, range_max)`; single-id mutators validate
//! against that range, bulk mutators validate the min/max of what they're
//! given.

use crate::error::{SynapsdError, SynapsdResult};
use roaring::RoaringBitmap;

/// A seed value accepted by [`Bitmap::create`].
pub enum Seed {
    None,
    One(u32),
    Many(Vec<u32>),
    Bitmap(RoaringBitmap),
}

impl From<u32> for Seed {
    fn from(id: u32) -> Self {
        Seed::One(id)
    }
}

impl From<Vec<u32>> for Seed {
    fn from(ids: Vec<u32>) -> Self {
        Seed::Many(ids)
    }
}

impl From<RoaringBitmap> for Seed {
    fn from(bitmap: RoaringBitmap) -> Self {
        Seed::Bitmap(bitmap)
    }
}

/// A compressed roaring bitmap bound to a `key` and an `[range_min,
/// range_max)` id range.
#[derive(Debug, Clone)]
pub struct Bitmap {
    key: String,
    range_min: u32,
    range_max: u32,
    inner: RoaringBitmap,
}

impl Bitmap {
    /// Construct an empty bitmap bound to `key`. Fails with
    /// [`SynapsdError::KeyRequired`] if `key` is empty.
    pub fn new(key: impl Into<String>, range_min: u32, range_max: u32) -> SynapsdResult<Self> {
        Self::create(key, range_min, range_max, Seed::None)
    }

    /// Construct a bitmap bound to `key`, seeded from a single id, an id
    /// array, or an existing roaring bitmap (spec.md §4.1's `createBitmap`
    /// seed contract).
    pub fn create(
        key: impl Into<String>,
        range_min: u32,
        range_max: u32,
        seed: impl Into<Seed>,
    ) -> SynapsdResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(SynapsdError::KeyRequired);
        }
        let mut bitmap = Self {
            key,
            range_min,
            range_max,
            inner: RoaringBitmap::new(),
        };
        match seed.into() {
            Seed::None => {}
            Seed::One(id) => bitmap.add(id)?,
            Seed::Many(ids) => bitmap.add_many(&ids)?,
            Seed::Bitmap(existing) => bitmap.add_many_bitmap(&existing)?,
        }
        Ok(bitmap)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn range(&self) -> (u32, u32) {
        (self.range_min, self.range_max)
    }

    fn validate_range(&self, id: u32) -> SynapsdResult<()> {
        if id < self.range_min || id >= self.range_max {
            return Err(SynapsdError::OutOfRange {
                value: id as u64,
                min: self.range_min as u64,
                max: self.range_max as u64,
            });
        }
        Ok(())
    }

    /// Add a single id; fails with `OutOfRange` outside `[range_min,
    /// range_max)`.
    pub fn add(&mut self, id: u32) -> SynapsdResult<bool> {
        self.validate_range(id)?;
        Ok(self.inner.insert(id))
    }

    /// Remove a single id; fails with `OutOfRange` outside the bound
    /// range (removing an id that was never present is not an error).
    pub fn remove(&mut self, id: u32) -> SynapsdResult<bool> {
        self.validate_range(id)?;
        Ok(self.inner.remove(id))
    }

    /// Add many ids at once, validating only the batch's min/max against
    /// the bound range (spec.md §4.1).
    pub fn add_many(&mut self, ids: &[u32]) -> SynapsdResult<()> {
        if let (Some(&min), Some(&max)) = (ids.iter().min(), ids.iter().max()) {
            self.validate_range(min)?;
            self.validate_range(max)?;
        }
        for &id in ids {
            self.inner.insert(id);
        }
        Ok(())
    }

    pub fn remove_many(&mut self, ids: &[u32]) -> SynapsdResult<()> {
        if let (Some(&min), Some(&max)) = (ids.iter().min(), ids.iter().max()) {
            self.validate_range(min)?;
            self.validate_range(max)?;
        }
        for &id in ids {
            self.inner.remove(id);
        }
        Ok(())
    }

    /// Add every id in `other`, validating `other`'s min/max against the
    /// bound range.
    pub fn add_many_bitmap(&mut self, other: &RoaringBitmap) -> SynapsdResult<()> {
        if let (Some(min), Some(max)) = (other.min(), other.max()) {
            self.validate_range(min)?;
            self.validate_range(max)?;
        }
        self.inner |= other;
        Ok(())
    }

    pub fn remove_many_bitmap(&mut self, other: &RoaringBitmap) -> SynapsdResult<()> {
        if let (Some(min), Some(max)) = (other.min(), other.max()) {
            self.validate_range(min)?;
            self.validate_range(max)?;
        }
        self.inner -= other;
        Ok(())
    }

    pub fn has(&self, id: u32) -> bool {
        self.inner.contains(id)
    }

    pub fn size(&self) -> u64 {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn min(&self) -> Option<u32> {
        self.inner.min()
    }

    pub fn max(&self) -> Option<u32> {
        self.inner.max()
    }

    pub fn to_array(&self) -> Vec<u32> {
        self.inner.iter().collect()
    }

    pub fn inner(&self) -> &RoaringBitmap {
        &self.inner
    }

    pub fn into_inner(self) -> RoaringBitmap {
        self.inner
    }

    fn rebind(&self, inner: RoaringBitmap) -> Bitmap {
        Bitmap {
            key: self.key.clone(),
            range_min: self.range_min,
            range_max: self.range_max,
            inner,
        }
    }

    pub fn and(&self, other: &Bitmap) -> Bitmap {
        self.rebind(&self.inner & &other.inner)
    }

    pub fn or(&self, other: &Bitmap) -> Bitmap {
        self.rebind(&self.inner | &other.inner)
    }

    pub fn xor(&self, other: &Bitmap) -> Bitmap {
        self.rebind(&self.inner ^ &other.inner)
    }

    pub fn and_not(&self, other: &Bitmap) -> Bitmap {
        self.rebind(&self.inner - &other.inner)
    }

    pub fn and_inplace(&mut self, other: &Bitmap) {
        self.inner &= &other.inner;
    }

    pub fn or_inplace(&mut self, other: &Bitmap) {
        self.inner |= &other.inner;
    }

    pub fn xor_inplace(&mut self, other: &Bitmap) {
        self.inner ^= &other.inner;
    }

    pub fn and_not_inplace(&mut self, other: &Bitmap) {
        self.inner -= &other.inner;
    }

    /// Serialize to the portable roaring wire format (spec.md §6):
    /// byte-for-byte compatible with reference implementations so
    /// bitmaps produced elsewhere can be read back by `deserialize`.
    pub fn serialize(&self) -> SynapsdResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.inner.serialized_size());
        self.inner
            .serialize_into(&mut buf)
            .map_err(|e| SynapsdError::BackendError {
                operation: "bitmap serialize".to_string(),
                reason: e.to_string(),
            })?;
        Ok(buf)
    }

    /// A bitmap pre-filled with every id in `[range_min, range_max)`, used
    /// to answer "empty positive set restricts to the universe" (spec.md
    /// §4.2). Uses `RoaringBitmap::insert_range` so the full span is
    /// represented as compressed runs instead of materializing one `u32`
    /// per id — `range_max` is routinely `u32::MAX`.
    pub(crate) fn full_range(key: impl Into<String>, range_min: u32, range_max: u32) -> SynapsdResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(SynapsdError::KeyRequired);
        }
        let mut inner = RoaringBitmap::new();
        if range_max > range_min {
            inner.insert_range(range_min..range_max);
        }
        Ok(Self {
            key,
            range_min,
            range_max,
            inner,
        })
    }

    /// Deserialize a portable-format roaring bitmap, re-binding it to
    /// `key` and the given range.
    pub fn deserialize(
        key: impl Into<String>,
        range_min: u32,
        range_max: u32,
        bytes: &[u8],
    ) -> SynapsdResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(SynapsdError::KeyRequired);
        }
        let inner =
            RoaringBitmap::deserialize_from(bytes).map_err(|e| SynapsdError::BackendError {
                operation: "bitmap deserialize".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            key,
            range_min,
            range_max,
            inner,
        })
    }
}
