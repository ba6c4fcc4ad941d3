// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration for a SynapsD instance.
//!
//! Mirrors the reference schema: the internal/user id boundary, the default
//! bit-sliced index depth, and the bitmap cache capacity are all tunable,
//! but every default matches the invariants spec'd for the engine.

use crate::error::{SynapsdError, SynapsdResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Document ids below this value are reserved for internal entities.
pub const DEFAULT_INTERNAL_MAX: u32 = 100_000;

/// Default bit-sliced index depth (enough to hold a 32-bit unsigned value).
pub const DEFAULT_BSI_BIT_DEPTH: u32 = 32;

/// Default number of bitmaps kept warm in the in-memory LRU cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Top-level configuration for a SynapsD instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynapsdConfig {
    /// First id available for user documents; `[0, internal_max)` is
    /// reserved for internal entities such as the root layer.
    #[serde(default = "default_internal_max")]
    pub internal_max: u32,

    /// Default bit depth used by bit-sliced indexes created without an
    /// explicit depth (e.g. the timestamp BSIs).
    #[serde(default = "default_bit_depth")]
    pub bsi_bit_depth: u32,

    /// Capacity of the bitmap cache maintained by `BitmapIndex`.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Root directory the configured `KvStore` persists datasets under,
    /// when using a file-backed store. Ignored by `MemoryStore`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_internal_max() -> u32 {
    DEFAULT_INTERNAL_MAX
}

fn default_bit_depth() -> u32 {
    DEFAULT_BSI_BIT_DEPTH
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_data_dir() -> String {
    ".synapsd".to_string()
}

impl Default for SynapsdConfig {
    fn default() -> Self {
        Self {
            internal_max: DEFAULT_INTERNAL_MAX,
            bsi_bit_depth: DEFAULT_BSI_BIT_DEPTH,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            data_dir: default_data_dir(),
        }
    }
}

impl SynapsdConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any field the file omits.
    pub fn load(path: &Path) -> SynapsdResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SynapsdError::ConfigError {
            reason: format!("cannot read '{}': {}", path.display(), e),
        })?;
        Self::from_toml(&text)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(text: &str) -> SynapsdResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> SynapsdResult<()> {
        if self.bsi_bit_depth == 0 || self.bsi_bit_depth > 63 {
            return Err(SynapsdError::ConfigError {
                reason: format!(
                    "bsi_bit_depth must be in [1, 63], got {}",
                    self.bsi_bit_depth
                ),
            });
        }
        if self.internal_max == 0 {
            return Err(SynapsdError::ConfigError {
                reason: "internal_max must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod config_test {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = SynapsdConfig::default();
        assert_eq!(config.internal_max, 100_000);
        assert_eq!(config.bsi_bit_depth, 32);
    }

    #[test]
    fn parses_partial_toml() {
        let config = SynapsdConfig::from_toml("internal_max = 500\n").unwrap();
        assert_eq!(config.internal_max, 500);
        assert_eq!(config.bsi_bit_depth, 32);
    }

    #[test]
    fn rejects_zero_bit_depth() {
        let err = SynapsdConfig::from_toml("bsi_bit_depth = 0\n").unwrap_err();
        assert!(matches!(err, SynapsdError::ConfigError { .. }));
    }
}
