// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Document checksumming.
//!
//! A document's checksum set maps algorithm name to digest string; one
//! algorithm is designated primary and its digest is the identity SynapsD
//! deduplicates documents on (spec.md §3, §4.6). SynapsD ships one
//! algorithm, `crc32`, and leaves the set open to extension via the
//! `ChecksumAlgorithm` trait.

use std::collections::BTreeMap;
use std::fmt;

/// A pluggable checksum algorithm.
pub trait ChecksumAlgorithm: Send + Sync {
    /// Stable, lowercase algorithm name used as the map key in a
    /// document's checksum set (e.g. `"crc32"`).
    fn name(&self) -> &'static str;

    /// Compute the digest of `bytes` as a string.
    fn digest(&self, bytes: &[u8]) -> String;
}

/// CRC-32 (IEEE) checksum, built on the `crc32fast` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc32;

impl ChecksumAlgorithm for Crc32 {
    fn name(&self) -> &'static str {
        "crc32"
    }

    fn digest(&self, bytes: &[u8]) -> String {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(bytes);
        format!("{:08x}", hasher.finalize())
    }
}

/// The algorithm -> digest map recorded on a document, plus which
/// algorithm is primary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChecksumSet {
    digests: BTreeMap<String, String>,
    primary: Option<String>,
}

impl ChecksumSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, algorithm: &str, digest: String) {
        self.digests.insert(algorithm.to_string(), digest);
    }

    pub fn get(&self, algorithm: &str) -> Option<&str> {
        self.digests.get(algorithm).map(String::as_str)
    }

    pub fn set_primary(&mut self, algorithm: &str) {
        self.primary = Some(algorithm.to_string());
    }

    /// The digest of the primary algorithm, if both a primary algorithm
    /// and its digest are present.
    pub fn primary_digest(&self) -> Option<&str> {
        self.primary.as_deref().and_then(|algo| self.get(algo))
    }

    pub fn primary_algorithm(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.digests.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

impl fmt::Display for ChecksumSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (algo, digest)) in self.digests.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", algo, digest)?;
        }
        write!(f, "}}")
    }
}

/// A named collection of checksum algorithms applied to a document's
/// checksum-configured fields. `primary` is the algorithm whose digest
/// becomes the document's deduplication identity.
pub struct ChecksumRegistry {
    algorithms: Vec<Box<dyn ChecksumAlgorithm>>,
    primary: &'static str,
}

impl ChecksumRegistry {
    /// The default registry: just `crc32`, as both the sole and the
    /// primary algorithm.
    pub fn default_registry() -> Self {
        Self {
            algorithms: vec![Box::new(Crc32)],
            primary: "crc32",
        }
    }

    pub fn with_algorithm(mut self, algorithm: Box<dyn ChecksumAlgorithm>) -> Self {
        self.algorithms.push(algorithm);
        self
    }

    pub fn with_primary(mut self, primary: &'static str) -> Self {
        self.primary = primary;
        self
    }

    /// Compute every registered algorithm's digest over `bytes`.
    pub fn compute(&self, bytes: &[u8]) -> ChecksumSet {
        let mut set = ChecksumSet::new();
        for algorithm in &self.algorithms {
            set.insert(algorithm.name(), algorithm.digest(bytes));
        }
        set.set_primary(self.primary);
        set
    }
}

impl Default for ChecksumRegistry {
    fn default() -> Self {
        Self::default_registry()
    }
}

#[cfg(test)]
mod checksum_test {
    use super::*;

    #[test]
    fn crc32_is_deterministic() {
        let crc = Crc32;
        assert_eq!(crc.digest(b"hello"), crc.digest(b"hello"));
        assert_ne!(crc.digest(b"hello"), crc.digest(b"world"));
    }

    #[test]
    fn registry_computes_primary() {
        let registry = ChecksumRegistry::default_registry();
        let set = registry.compute(b"document body");
        assert_eq!(set.primary_algorithm(), Some("crc32"));
        assert!(set.primary_digest().is_some());
        assert_eq!(set.get("crc32"), set.primary_digest());
    }
}
