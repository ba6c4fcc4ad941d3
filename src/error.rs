// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for SynapsD operations.
//!
//! Provides structured error handling with enough context on each variant
//! to act on the failure without a backtrace.

use std::fmt;

/// Standard Result type for all SynapsD operations.
pub type SynapsdResult<T> = Result<T, SynapsdError>;

/// Error types for SynapsD operations.
#[derive(Debug, Clone)]
pub enum SynapsdError {
    /// A bitmap key failed prefix/charset validation.
    InvalidKey { key: String, reason: String },

    /// No key string was supplied to construct a bitmap.
    KeyRequired,

    /// An id fell outside a bitmap's `[rangeMin, rangeMax)` bound, or a
    /// value fell outside a BSI's `[0, 2^bitDepth)` bound.
    OutOfRange { value: u64, min: u64, max: u64 },

    /// A document failed validation against its registered schema.
    SchemaValidationError {
        schema: String,
        field: String,
        reason: String,
    },

    /// A document referenced a schema name that was never registered.
    UnknownSchema { schema: String },

    /// A mutation was attempted on a locked layer.
    LayerLocked { layer: String, locked_by: Vec<String> },

    /// `removeDocument` was called with a context spec that normalizes to
    /// the root path; callers must use `deleteDocument` for that.
    RootContextProtected,

    /// `movePath`'s destination contains the name of the node being moved.
    CycleInMove { from: String, to: String },

    /// A lookup found nothing (e.g. `getBitmap` with `autoCreate = false`
    /// on a non-existent key, or a document id with no record).
    Missing { what: String, key: String },

    /// A structural corruption was found in a persisted tree/layer.
    TreeCorrupted { reason: String },

    /// A layer name collided with a different id than the registry has on
    /// file, or a tree node pointed at an id the registry does not know.
    NodeNotFound { id: String },

    /// Malformed configuration (TOML parse failure or an out-of-range
    /// setting).
    ConfigError { reason: String },

    /// The key-value backend surfaced a fault.
    BackendError { operation: String, reason: String },
}

impl fmt::Display for SynapsdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey { key, reason } => {
                write!(f, "invalid bitmap key '{}': {}", key, reason)
            }
            Self::KeyRequired => {
                write!(f, "a bitmap key is required to construct a Bitmap")
            }
            Self::OutOfRange { value, min, max } => {
                write!(
                    f,
                    "value {} out of range [{}, {})",
                    value, min, max
                )
            }
            Self::SchemaValidationError {
                schema,
                field,
                reason,
            } => {
                write!(
                    f,
                    "document failed validation against schema '{}' on field '{}': {}",
                    schema, field, reason
                )
            }
            Self::UnknownSchema { schema } => {
                write!(f, "schema '{}' is not registered", schema)
            }
            Self::LayerLocked { layer, locked_by } => {
                write!(
                    f,
                    "layer '{}' is locked by {:?} and cannot be mutated",
                    layer, locked_by
                )
            }
            Self::RootContextProtected => {
                write!(
                    f,
                    "remove requires a non-root context path; use deleteDocument to remove from the root"
                )
            }
            Self::CycleInMove { from, to } => {
                write!(
                    f,
                    "cannot move '{}' to '{}': destination contains the moved layer's name",
                    from, to
                )
            }
            Self::Missing { what, key } => {
                write!(f, "{} '{}' not found", what, key)
            }
            Self::TreeCorrupted { reason } => {
                write!(f, "context tree corrupted: {}", reason)
            }
            Self::NodeNotFound { id } => {
                write!(f, "no layer registered for node id '{}'", id)
            }
            Self::ConfigError { reason } => {
                write!(f, "invalid configuration: {}", reason)
            }
            Self::BackendError { operation, reason } => {
                write!(f, "backend error during '{}': {}", operation, reason)
            }
        }
    }
}

impl std::error::Error for SynapsdError {}

impl From<std::io::Error> for SynapsdError {
    fn from(err: std::io::Error) -> Self {
        SynapsdError::BackendError {
            operation: "io".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SynapsdError {
    fn from(err: serde_json::Error) -> Self {
        SynapsdError::BackendError {
            operation: "serde_json".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for SynapsdError {
    fn from(err: toml::de::Error) -> Self {
        SynapsdError::ConfigError {
            reason: err.to_string(),
        }
    }
}
