// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Bitmap key grammar: normalization and prefix validation.
//!
//! `key := ['!'] prefix ('/' segment)*`, `prefix` drawn from a fixed
//! allow-list, `segment := [a-z0-9_.!/-]+` (spec.md §3, §6). A leading `!`
//! denotes negation in query expressions only and is stripped before any
//! store or cache lookup.

use crate::error::{SynapsdError, SynapsdResult};
use once_cell::sync::Lazy;

/// Allow-listed first path segments for bitmap keys.
pub const ALLOWED_PREFIXES: &[&str] = &[
    "context/",
    "action/",
    "data/abstraction/",
    "data/mime/",
    "data/content/encoding/",
    "index/",
    "system/",
    "client/os/",
    "client/application/",
    "client/device/",
    "user/",
    "tag/",
    "nested/",
    "custom/",
    "internal/",
    "server/",
];

static CHARSET: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"[^a-z0-9_\-!/]").expect("static regex is valid"));

/// Whether `key`, as already normalized (lowercased, `/`-separated),
/// starts with one of the allow-listed prefixes.
pub fn has_allowed_prefix(key: &str) -> bool {
    ALLOWED_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Normalize a raw key: backslashes to forward slashes, lowercase,
/// characters outside `[a-z0-9_-!/]` dropped, leading `!` preserved
/// through the transform and re-attached at the end.
///
/// This does not validate the prefix; call [`validate_key`] for that.
pub fn normalize_key(raw: &str) -> String {
    let negated = raw.starts_with('!');
    let body = if negated { &raw[1..] } else { raw };
    let lowered = body.replace('\\', "/").to_lowercase();
    let cleaned = CHARSET.replace_all(&lowered, "").into_owned();
    if negated {
        format!("!{}", cleaned)
    } else {
        cleaned
    }
}

/// Validate and normalize a bitmap key for storage use: strips any
/// leading negation marker (negation is a query-time-only concept) and
/// fails with [`SynapsdError::InvalidKey`] if the normalized key is empty
/// or its first segment isn't allow-listed.
pub fn validate_key(raw: &str) -> SynapsdResult<String> {
    if raw.trim().is_empty() {
        return Err(SynapsdError::InvalidKey {
            key: raw.to_string(),
            reason: "key is empty".to_string(),
        });
    }
    let normalized = normalize_key(raw);
    let stripped = normalized.strip_prefix('!').unwrap_or(&normalized);
    if stripped.is_empty() {
        return Err(SynapsdError::InvalidKey {
            key: raw.to_string(),
            reason: "key is empty after normalization".to_string(),
        });
    }
    if !has_allowed_prefix(stripped) {
        return Err(SynapsdError::InvalidKey {
            key: raw.to_string(),
            reason: format!(
                "key does not start with an allow-listed prefix: {:?}",
                ALLOWED_PREFIXES
            ),
        });
    }
    Ok(stripped.to_string())
}

/// Split a query-time key into `(negated, storage_key)`.
pub fn split_negation(key: &str) -> (bool, &str) {
    match key.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, key),
    }
}
