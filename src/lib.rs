// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! SynapsD - an embedded, local-first document database built around a
//! hybrid index engine.
//!
//! The engine combines four cooperating pieces:
//!
//! - A compressed-roaring-bitmap index ([`bitmap`], [`bitmap_index`]),
//!   grouped into prefix-scoped collections ([`bitmap_collection`]) under a
//!   strict key-namespace discipline ([`key`]).
//! - A named, hierarchical context tree ([`tree`], [`layer`]) where every
//!   path segment is a *layer* whose bitmap tracks document membership at
//!   or below that path.
//! - A bit-sliced index ([`bsi`]) built on top of the bitmap index for
//!   range, equality, and timeframe queries over integer attributes.
//! - A document engine ([`document`]) that allocates ids, deduplicates by
//!   checksum, and keeps all of the above in sync on every insert, update,
//!   remove, and delete.
//!
//! The pluggable key-value backend ([`store`]) and the schema registry
//! ([`schema`]) are external collaborators by contract (see each module's
//! docs); SynapsD ships a `MemoryStore`/`FileStore` pair and a permissive
//! default schema so the engine is usable out of the box.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use synapsd::checksum::ChecksumRegistry;
//! use synapsd::config::SynapsdConfig;
//! use synapsd::document::{DocumentEngine, NewDocument};
//! use synapsd::events::NullSink;
//! use synapsd::schema::SchemaRegistry;
//! use synapsd::store::memory::MemoryStore;
//! use synapsd::store::KvStore;
//!
//! let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
//! let mut schemas = SchemaRegistry::new();
//! schemas.register("note", "1.0", synapsd::schema::permissive);
//!
//! let engine = DocumentEngine::open(
//!     store,
//!     &SynapsdConfig::default(),
//!     schemas,
//!     ChecksumRegistry::default_registry(),
//!     NullSink,
//! )
//! .unwrap();
//!
//! let id = engine
//!     .insert(NewDocument::new("note", serde_json::json!({"title": "hello"})), "/work", &[])
//!     .unwrap();
//! assert!(engine.has_document(id, "/work", &[]).unwrap());
//! ```

pub mod bitmap;
pub mod bitmap_collection;
pub mod bitmap_index;
pub mod bsi;
pub mod checksum;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod id;
pub mod key;
pub mod layer;
pub mod schema;
pub mod store;
pub mod tree;

pub use bitmap::Bitmap;
pub use bitmap_collection::BitmapCollection;
pub use bitmap_index::BitmapIndex;
pub use bsi::{BitSlicedIndex, Op};
pub use checksum::{ChecksumRegistry, ChecksumSet};
pub use config::SynapsdConfig;
pub use document::{
    ContextSpec, DocumentEngine, DocumentRecord, FindOptions, FindOutcome, NewDocument,
    RemoveOptions,
};
pub use error::{SynapsdError, SynapsdResult};
pub use events::{Event, EventSink, NullSink};
pub use id::DocumentId;
pub use layer::{Layer, LayerIndex, LayerType};
pub use schema::SchemaRegistry;
pub use tree::ContextTree;
