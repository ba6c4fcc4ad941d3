// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! `Layer` and `LayerIndex` — the identity half of the context tree.
//!
//! A layer is the identity of a named tree position: its attributes
//! (label, type, color, lock state, metadata) live here, keyed both by a
//! stable id and by name, so two tree positions sharing a name always
//! resolve to the same layer (and therefore the same `context/<name>`
//! bitmap — see `tree.rs`). The built-in root layer is created on first
//! load with a fixed id and is permanently locked.

use crate::error::{SynapsdError, SynapsdResult};
use crate::events::{Event, EventSink};
use crate::store::dataset::Dataset;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// A layer's stable identity.
pub type LayerId = Uuid;

/// The root layer's well-known id, stable across processes and restarts.
pub static ROOT_LAYER_ID: Lazy<LayerId> =
    Lazy::new(|| Uuid::parse_str("00000000-0000-0000-0000-000000000001").expect("static uuid"));

/// The root layer's name. Also used as the canonical "root path" spelling.
pub const ROOT_LAYER_NAME: &str = "/";

/// The kind of tree position a layer represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Universe,
    System,
    Workspace,
    Canvas,
    Context,
    Label,
}

/// A named tree-position identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: LayerType,
    pub description: Option<String>,
    pub color: Option<String>,
    /// Non-empty iff this layer is locked; the entries identify who/what
    /// locked it (`"built-in"` for the root layer).
    pub locked_by: Vec<String>,
    pub metadata: serde_json::Value,
}

impl Layer {
    pub fn is_locked(&self) -> bool {
        !self.locked_by.is_empty()
    }

    fn root() -> Self {
        Self {
            id: *ROOT_LAYER_ID,
            name: ROOT_LAYER_NAME.to_string(),
            label: ROOT_LAYER_NAME.to_string(),
            kind: LayerType::Universe,
            description: Some("built-in root layer".to_string()),
            color: None,
            locked_by: vec!["built-in".to_string()],
            metadata: serde_json::Value::Null,
        }
    }
}

/// Options accepted by `LayerIndex::create_layer` beyond the name.
#[derive(Debug, Clone, Default)]
pub struct LayerOptions {
    pub kind: Option<LayerType>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Sanitize a raw layer name to the registry's charset: at most 32
/// lowercased characters drawn from `[a-z0-9_./-]`.
pub fn sanitize_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let cleaned: String = lowered
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-'))
        .collect();
    cleaned.chars().take(32).collect()
}

/// Is `name` the reserved spelling for the root layer?
pub fn is_root_name(name: &str) -> bool {
    name.is_empty() || name == ROOT_LAYER_NAME
}

/// Persistent `id -> Layer` registry with an in-memory `name -> id`
/// index rebuilt on load.
pub struct LayerIndex<S: EventSink> {
    dataset: Dataset,
    by_id: RwLock<HashMap<LayerId, Layer>>,
    by_name: RwLock<HashMap<String, LayerId>>,
    sink: S,
}

impl<S: EventSink> LayerIndex<S> {
    /// Open the `layers` dataset, loading every persisted layer and
    /// creating the built-in root layer if this is a fresh store.
    pub fn load(dataset: Dataset, sink: S) -> SynapsdResult<Self> {
        let index = Self {
            dataset,
            by_id: RwLock::new(HashMap::new()),
            by_name: RwLock::new(HashMap::new()),
            sink,
        };
        index.rebuild()?;
        if index.get_layer_by_id(&ROOT_LAYER_ID).is_none() {
            index.persist(&Layer::root())?;
        }
        Ok(index)
    }

    fn rebuild(&self) -> SynapsdResult<()> {
        let mut by_id = self.by_id.write().expect("layer by_id lock poisoned");
        let mut by_name = self.by_name.write().expect("layer by_name lock poisoned");
        by_id.clear();
        by_name.clear();
        for (_, bytes) in self.dataset.get_range(&Default::default())? {
            let layer: Layer = serde_json::from_slice(&bytes)?;
            by_name.insert(layer.name.clone(), layer.id);
            by_id.insert(layer.id, layer);
        }
        Ok(())
    }

    fn persist(&self, layer: &Layer) -> SynapsdResult<()> {
        let bytes = serde_json::to_vec(layer)?;
        self.dataset.put(layer.id.to_string().as_bytes(), &bytes)?;
        self.by_name
            .write()
            .expect("layer by_name lock poisoned")
            .insert(layer.name.clone(), layer.id);
        self.by_id
            .write()
            .expect("layer by_id lock poisoned")
            .insert(layer.id, layer.clone());
        Ok(())
    }

    pub fn get_layer_by_id(&self, id: &LayerId) -> Option<Layer> {
        self.by_id
            .read()
            .expect("layer by_id lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn get_layer_by_name(&self, name: &str) -> Option<Layer> {
        let name = sanitize_name(name);
        let id = *self
            .by_name
            .read()
            .expect("layer by_name lock poisoned")
            .get(&name)?;
        self.get_layer_by_id(&id)
    }

    /// Create a layer named `name`, or return the existing one if the name
    /// is already registered and `update` is false. With `update = true`
    /// and an existing layer, apply `options` in place instead.
    pub fn create_layer(
        &self,
        name: &str,
        options: LayerOptions,
        update: bool,
    ) -> SynapsdResult<Layer> {
        let sanitized = sanitize_name(name);
        if let Some(existing) = self.get_layer_by_name(&sanitized) {
            return if update {
                self.update_layer(&sanitized, options)
            } else {
                Ok(existing)
            };
        }
        let layer = Layer {
            id: Uuid::new_v4(),
            name: sanitized.clone(),
            label: sanitized.clone(),
            kind: options.kind.unwrap_or(LayerType::Context),
            description: options.description,
            color: options.color,
            locked_by: Vec::new(),
            metadata: options.metadata.unwrap_or(serde_json::Value::Null),
        };
        self.persist(&layer)?;
        self.sink.emit(Event::TreeLayerCreated {
            name: layer.name.clone(),
        });
        Ok(layer)
    }

    /// Apply `patch` to the layer named `name`. Fails with `LayerLocked`
    /// if the layer is locked, `Missing` if it doesn't exist.
    pub fn update_layer(&self, name: &str, patch: LayerOptions) -> SynapsdResult<Layer> {
        let sanitized = sanitize_name(name);
        let mut layer = self.require_unlocked(&sanitized)?;
        if let Some(kind) = patch.kind {
            layer.kind = kind;
        }
        if let Some(description) = patch.description {
            layer.description = Some(description);
        }
        if let Some(color) = patch.color {
            layer.color = Some(color);
        }
        if let Some(metadata) = patch.metadata {
            layer.metadata = metadata;
        }
        self.persist(&layer)?;
        self.sink.emit(Event::TreeLayerUpdated {
            name: layer.name.clone(),
        });
        Ok(layer)
    }

    /// Rename a layer, failing with `LayerLocked` if it's locked.
    pub fn rename_layer(&self, old: &str, new: &str) -> SynapsdResult<Layer> {
        let old_sanitized = sanitize_name(old);
        let mut layer = self.require_unlocked(&old_sanitized)?;
        let new_sanitized = sanitize_name(new);
        self.by_name
            .write()
            .expect("layer by_name lock poisoned")
            .remove(&old_sanitized);
        self.dataset.del(layer.id.to_string().as_bytes())?;
        layer.name = new_sanitized.clone();
        layer.label = new_sanitized.clone();
        self.persist(&layer)?;
        self.sink.emit(Event::TreeLayerRenamed {
            from: old_sanitized,
            to: new_sanitized,
        });
        Ok(layer)
    }

    /// Remove a layer from the registry, failing with `LayerLocked` if
    /// it's locked. Does not touch the tree; callers are responsible for
    /// unlinking any tree node that referenced this layer first.
    pub fn remove_layer(&self, name: &str) -> SynapsdResult<()> {
        let sanitized = sanitize_name(name);
        let layer = self.require_unlocked(&sanitized)?;
        self.dataset.del(layer.id.to_string().as_bytes())?;
        self.by_name
            .write()
            .expect("layer by_name lock poisoned")
            .remove(&sanitized);
        self.by_id
            .write()
            .expect("layer by_id lock poisoned")
            .remove(&layer.id);
        self.sink.emit(Event::TreeLayerDeleted { name: sanitized });
        Ok(())
    }

    fn require_unlocked(&self, name: &str) -> SynapsdResult<Layer> {
        let layer = self
            .get_layer_by_name(name)
            .ok_or_else(|| SynapsdError::Missing {
                what: "layer".to_string(),
                key: name.to_string(),
            })?;
        if layer.is_locked() {
            log::warn!(
                "rejected mutation of locked layer '{}' (locked by {:?})",
                layer.name,
                layer.locked_by
            );
            return Err(SynapsdError::LayerLocked {
                layer: layer.name.clone(),
                locked_by: layer.locked_by.clone(),
            });
        }
        Ok(layer)
    }
}

#[cfg(test)]
mod layer_index_test {
    use super::*;
    use crate::events::NullSink;
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    fn index() -> LayerIndex<NullSink> {
        let store: Arc<dyn crate::store::KvStore> = Arc::new(MemoryStore::new());
        LayerIndex::load(Dataset::new(store, "layers"), NullSink).unwrap()
    }

    #[test]
    fn root_layer_exists_and_is_locked() {
        let index = index();
        let root = index.get_layer_by_id(&ROOT_LAYER_ID).unwrap();
        assert_eq!(root.name, "/");
        assert!(root.is_locked());
    }

    #[test]
    fn create_layer_is_idempotent_by_name() {
        let index = index();
        let first = index.create_layer("work", LayerOptions::default(), false).unwrap();
        let second = index.create_layer("work", LayerOptions::default(), false).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn create_with_update_true_patches_existing() {
        let index = index();
        index.create_layer("work", LayerOptions::default(), false).unwrap();
        let patched = index
            .create_layer(
                "work",
                LayerOptions {
                    color: Some("blue".to_string()),
                    ..Default::default()
                },
                true,
            )
            .unwrap();
        assert_eq!(patched.color.as_deref(), Some("blue"));
    }

    #[test]
    fn names_are_sanitized() {
        let index = index();
        let layer = index
            .create_layer("  Work Project!! ", LayerOptions::default(), false)
            .unwrap();
        assert_eq!(layer.name, "workproject");
    }

    #[test]
    fn names_are_truncated_to_32_chars() {
        let index = index();
        let long = "a".repeat(64);
        let layer = index.create_layer(&long, LayerOptions::default(), false).unwrap();
        assert_eq!(layer.name.len(), 32);
    }

    #[test]
    fn renaming_updates_both_maps() {
        let index = index();
        index.create_layer("old", LayerOptions::default(), false).unwrap();
        let renamed = index.rename_layer("old", "new").unwrap();
        assert_eq!(renamed.name, "new");
        assert!(index.get_layer_by_name("old").is_none());
        assert!(index.get_layer_by_name("new").is_some());
    }

    #[test]
    fn locked_layer_rejects_mutation() {
        let index = index();
        let err = index.rename_layer("/", "elsewhere").unwrap_err();
        assert!(matches!(err, SynapsdError::LayerLocked { .. }));
        let err = index.update_layer("/", LayerOptions::default()).unwrap_err();
        assert!(matches!(err, SynapsdError::LayerLocked { .. }));
        let err = index.remove_layer("/").unwrap_err();
        assert!(matches!(err, SynapsdError::LayerLocked { .. }));
    }

    #[test]
    fn rebuild_restores_name_index_across_loads() {
        let store: Arc<dyn crate::store::KvStore> = Arc::new(MemoryStore::new());
        let dataset = Dataset::new(store.clone(), "layers");
        {
            let index = LayerIndex::load(dataset.clone(), NullSink).unwrap();
            index.create_layer("persisted", LayerOptions::default(), false).unwrap();
        }
        let reloaded = LayerIndex::load(Dataset::new(store, "layers"), NullSink).unwrap();
        assert!(reloaded.get_layer_by_name("persisted").is_some());
    }
}
