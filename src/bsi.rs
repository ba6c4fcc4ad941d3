// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! `BitSlicedIndex` — a bit-sliced range index over a `BitmapIndex`
//! (spec.md §4.4). Stores an existence bitmap (`prefix/ebm`) plus one
//! bitmap per bit position (`prefix/0` … `prefix/N-1`), and answers
//! `=`, `≠`, `<`, `≤`, `>`, `≥`, and `BETWEEN` queries by scanning bit
//! positions most-significant-first.
//!
//! `prefix` must already be something [`crate::key::validate_key`]
//! accepts (e.g. `index/created`) — the index stores these like any
//! other bitmap key, it just manages a whole family of them per BSI.

use crate::bitmap::Bitmap;
use crate::bitmap_index::BitmapIndex;
use crate::error::{SynapsdError, SynapsdResult};
use crate::events::EventSink;

/// A comparison accepted by [`BitSlicedIndex::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

pub struct BitSlicedIndex<'a, S: EventSink> {
    index: &'a BitmapIndex<S>,
    prefix: String,
    bit_depth: u32,
    range_min: u32,
    range_max: u32,
}

impl<'a, S: EventSink> BitSlicedIndex<'a, S> {
    pub fn new(
        index: &'a BitmapIndex<S>,
        prefix: impl Into<String>,
        bit_depth: u32,
        range_min: u32,
        range_max: u32,
    ) -> Self {
        Self {
            index,
            prefix: prefix.into(),
            bit_depth,
            range_min,
            range_max,
        }
    }

    fn ebm_key(&self) -> String {
        format!("{}/ebm", self.prefix)
    }

    fn slice_key(&self, i: u32) -> String {
        format!("{}/{}", self.prefix, i)
    }

    fn capacity(&self) -> u64 {
        1u64 << self.bit_depth
    }

    fn slice(&self, i: u32) -> SynapsdResult<Bitmap> {
        Ok(self
            .index
            .get_bitmap(&self.slice_key(i), true)?
            .expect("auto_create=true always yields a bitmap"))
    }

    fn ebm(&self) -> SynapsdResult<Bitmap> {
        Ok(self
            .index
            .get_bitmap(&self.ebm_key(), true)?
            .expect("auto_create=true always yields a bitmap"))
    }

    /// Reject `v` outside `[0, 2^bitDepth)`; tick the EBM for `id`; tick
    /// or untick each bit slice to match `v`'s bits, so a later overwrite
    /// doesn't need to know the prior value.
    pub fn set_value(&self, id: u32, value: u64) -> SynapsdResult<()> {
        if value >= self.capacity() {
            return Err(SynapsdError::OutOfRange {
                value,
                min: 0,
                max: self.capacity(),
            });
        }
        self.index.tick(&self.ebm_key(), &[id as i64])?;
        for i in 0..self.bit_depth {
            let bit_set = (value >> i) & 1 == 1;
            if bit_set {
                self.index.tick(&self.slice_key(i), &[id as i64])?;
            } else {
                self.index.untick(&self.slice_key(i), &[id as i64])?;
            }
        }
        Ok(())
    }

    /// Untick the EBM and every slice for `id`.
    pub fn remove_value(&self, id: u32) -> SynapsdResult<()> {
        self.index.untick(&self.ebm_key(), &[id as i64])?;
        for i in 0..self.bit_depth {
            self.index.untick(&self.slice_key(i), &[id as i64])?;
        }
        Ok(())
    }

    fn bit_of(&self, value: u64, i: u32) -> bool {
        (value >> i) & 1 == 1
    }

    /// `keep ∧= slice[i]` if `value`'s bit `i` is 1, else `keep ∧= ¬slice[i]`.
    /// Short-circuits once `keep` is empty.
    fn eq(&self, value: u64) -> SynapsdResult<Bitmap> {
        let mut keep = self.ebm()?;
        for i in (0..self.bit_depth).rev() {
            if keep.is_empty() {
                break;
            }
            let slice = self.slice(i)?;
            keep = if self.bit_of(value, i) {
                keep.and(&slice)
            } else {
                keep.and_not(&slice)
            };
        }
        Ok(keep)
    }

    /// `result = ∅`; for each bit MSB→LSB: if `value`'s bit is 0,
    /// `result ∨= keep ∧ slice[i]`, `keep ∧= ¬slice[i]`; else `keep ∧=
    /// slice[i]`.
    fn gt(&self, value: u64) -> SynapsdResult<Bitmap> {
        let mut keep = self.ebm()?;
        let mut result = Bitmap::new(self.ebm_key(), self.range_min, self.range_max)?;
        for i in (0..self.bit_depth).rev() {
            let slice = self.slice(i)?;
            if self.bit_of(value, i) {
                keep = keep.and(&slice);
            } else {
                result = result.or(&keep.and(&slice));
                keep = keep.and_not(&slice);
            }
        }
        Ok(result)
    }

    /// As `gt`, then `result ∨= keep` — the residual matches exactly.
    fn gte(&self, value: u64) -> SynapsdResult<Bitmap> {
        let mut keep = self.ebm()?;
        let mut result = Bitmap::new(self.ebm_key(), self.range_min, self.range_max)?;
        for i in (0..self.bit_depth).rev() {
            let slice = self.slice(i)?;
            if self.bit_of(value, i) {
                keep = keep.and(&slice);
            } else {
                result = result.or(&keep.and(&slice));
                keep = keep.and_not(&slice);
            }
        }
        Ok(result.or(&keep))
    }

    /// `ebm \ GTE(value)`.
    fn lt(&self, value: u64) -> SynapsdResult<Bitmap> {
        Ok(self.ebm()?.and_not(&self.gte(value)?))
    }

    /// `ebm \ GT(value)`.
    fn lte(&self, value: u64) -> SynapsdResult<Bitmap> {
        Ok(self.ebm()?.and_not(&self.gt(value)?))
    }

    /// `ebm \ EQ(value)`.
    fn neq(&self, value: u64) -> SynapsdResult<Bitmap> {
        Ok(self.ebm()?.and_not(&self.eq(value)?))
    }

    /// Answer a single comparison. All queries return an empty bitmap
    /// when the EBM is empty.
    pub fn query(&self, op: Op, value: u64) -> SynapsdResult<Bitmap> {
        if self.ebm()?.is_empty() {
            return Bitmap::new(self.ebm_key(), self.range_min, self.range_max);
        }
        match op {
            Op::Eq => self.eq(value),
            Op::Neq => self.neq(value),
            Op::Gt => self.gt(value),
            Op::Gte => self.gte(value),
            Op::Lt => self.lt(value),
            Op::Lte => self.lte(value),
        }
    }

    /// Empty if `lo > hi`; else `GTE(lo) ∧ LTE(hi)`.
    pub fn between(&self, lo: u64, hi: u64) -> SynapsdResult<Bitmap> {
        if lo > hi || self.ebm()?.is_empty() {
            return Bitmap::new(self.ebm_key(), self.range_min, self.range_max);
        }
        Ok(self.gte(lo)?.and(&self.lte(hi)?))
    }
}
