// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! `ContextTree` — the in-memory, persisted rooted tree of layer ids that
//! gives context paths their hierarchical shape (spec.md §4.5).
//!
//! A tree node owns nothing but `{id, children}`; layer attributes live in
//! `LayerIndex` and are resolved through it on demand (the cyclic
//! layer<->node ownership the reference implementation has is broken here
//! by storing only ids in the tree and looking attributes up by id). Every
//! structural mutation calls `save()`, persisting the tree skeleton under
//! a fixed key and raising the matching `Event`.

use crate::error::{SynapsdError, SynapsdResult};
use crate::events::{Event, EventSink};
use crate::layer::{is_root_name, sanitize_name, Layer, LayerIndex, LayerOptions, ROOT_LAYER_ID};
use crate::store::dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

const TREE_KEY: &[u8] = b"tree";

/// A tree node: a layer id and its ordered children. This is exactly the
/// persisted shape spec.md §4.5 requires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: crate::layer::LayerId,
    pub children: Vec<Node>,
}

impl Node {
    fn leaf(id: crate::layer::LayerId) -> Self {
        Self {
            id,
            children: Vec::new(),
        }
    }
}

/// Split a raw path into normalized segments: `//` collapses, a trailing
/// `/` is trimmed, everything is lowercased, and characters outside
/// `[a-z0-9_.-]` become `_`. Each segment is additionally capped to 32
/// characters, matching the layer name charset it will be resolved
/// against.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| normalize_segment(s))
        .collect()
}

fn normalize_segment(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.chars().take(32).collect()
}

fn navigate<'n>(node: &'n Node, ids: &[crate::layer::LayerId]) -> Option<&'n Node> {
    match ids.split_first() {
        None => Some(node),
        Some((head, rest)) => {
            let child = node.children.iter().find(|c| c.id == *head)?;
            navigate(child, rest)
        }
    }
}

fn navigate_mut<'n>(node: &'n mut Node, ids: &[crate::layer::LayerId]) -> Option<&'n mut Node> {
    match ids.split_first() {
        None => Some(node),
        Some((head, rest)) => {
            let pos = node.children.iter().position(|c| c.id == *head)?;
            navigate_mut(&mut node.children[pos], rest)
        }
    }
}

fn find_or_create_mut<'n>(node: &'n mut Node, ids: &[crate::layer::LayerId]) -> &'n mut Node {
    match ids.split_first() {
        None => node,
        Some((head, rest)) => {
            let pos = match node.children.iter().position(|c| c.id == *head) {
                Some(pos) => pos,
                None => {
                    node.children.push(Node::leaf(*head));
                    node.children.len() - 1
                }
            };
            find_or_create_mut(&mut node.children[pos], rest)
        }
    }
}

/// A resolved path: its layer ids and sanitized names, excluding the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub ids: Vec<crate::layer::LayerId>,
    pub names: Vec<String>,
}

/// The context tree: layer identity (`LayerIndex`) plus the rooted
/// `{id, children}` structure connecting them.
pub struct ContextTree<S: EventSink> {
    layers: LayerIndex<S>,
    dataset: Dataset,
    root: RwLock<Node>,
    sink: S,
}

impl<S: EventSink + Clone> ContextTree<S> {
    /// Load the layer registry and tree skeleton from their datasets,
    /// creating a bare root node if this is a fresh store.
    pub fn load(layers_dataset: Dataset, tree_dataset: Dataset, sink: S) -> SynapsdResult<Self> {
        let layers = LayerIndex::load(layers_dataset, sink.clone())?;
        let existing = tree_dataset.get(TREE_KEY)?;
        let fresh = existing.is_none();
        let root = match existing {
            Some(bytes) => {
                let node: Node = serde_json::from_slice(&bytes)?;
                if node.id != *ROOT_LAYER_ID {
                    return Err(SynapsdError::TreeCorrupted {
                        reason: "persisted tree root id does not match the registered root layer"
                            .to_string(),
                    });
                }
                node
            }
            None => Node::leaf(*ROOT_LAYER_ID),
        };
        let tree = Self {
            layers,
            dataset: tree_dataset,
            root: RwLock::new(root),
            sink,
        };
        if fresh {
            tree.save()?;
        }
        Ok(tree)
    }

    pub fn layers(&self) -> &LayerIndex<S> {
        &self.layers
    }

    fn save(&self) -> SynapsdResult<()> {
        let root = self.root.read().expect("tree root lock poisoned");
        let bytes = serde_json::to_vec(&*root)?;
        self.dataset.put(TREE_KEY, &bytes)
    }

    fn emit(&self, event: Event) {
        self.sink.emit(event);
    }

    /// Resolve every segment of `path` to a layer, creating missing layers
    /// when `auto_create_layers`, and returns their ids/names in order
    /// (root excluded). Fails if any segment names the root's reserved
    /// spelling.
    fn resolve(&self, path: &str, auto_create_layers: bool) -> SynapsdResult<ResolvedPath> {
        let segments = split_path(path);
        let mut ids = Vec::with_capacity(segments.len());
        let mut names = Vec::with_capacity(segments.len());
        for segment in segments {
            if is_root_name(&segment) {
                return Err(SynapsdError::InvalidKey {
                    key: path.to_string(),
                    reason: "path segment cannot be the reserved root name".to_string(),
                });
            }
            let layer = match self.layers.get_layer_by_name(&segment) {
                Some(layer) => layer,
                None if auto_create_layers => {
                    self.layers.create_layer(&segment, LayerOptions::default(), false)?
                }
                None => {
                    return Err(SynapsdError::Missing {
                        what: "layer".to_string(),
                        key: segment,
                    })
                }
            };
            ids.push(layer.id);
            names.push(layer.name);
        }
        Ok(ResolvedPath { ids, names })
    }

    /// Insert `path` into the tree, creating any layer or tree node that
    /// doesn't exist yet (when `auto_create_layers`). Returns the ordered
    /// layer ids for the path, root excluded.
    pub fn insert_path(&self, path: &str, auto_create_layers: bool) -> SynapsdResult<ResolvedPath> {
        let resolved = self.resolve(path, auto_create_layers)?;
        {
            let mut root = self.root.write().expect("tree root lock poisoned");
            find_or_create_mut(&mut root, &resolved.ids);
        }
        self.save()?;
        self.emit(Event::TreePathInserted {
            path: path.to_string(),
        });
        Ok(resolved)
    }

    /// The node at `path`, or `None` if any segment isn't present in the
    /// tree (spec.md's "negative indicator").
    pub fn get_node(&self, path: &str) -> SynapsdResult<Option<Node>> {
        let resolved = self.resolve(path, false)?;
        let root = self.root.read().expect("tree root lock poisoned");
        Ok(navigate(&root, &resolved.ids).cloned())
    }

    /// Move the node at `from` to sit under `to`. `recursive` moves the
    /// whole subtree; non-recursive moves only the leaf, re-parenting its
    /// children to the old parent. Fails with `CycleInMove` if `to`
    /// contains the moved layer's own name.
    pub fn move_path(&self, from: &str, to: &str, recursive: bool) -> SynapsdResult<()> {
        let from_resolved = self.resolve(from, false)?;
        let to_resolved = self.resolve(to, true)?;
        let Some(moved_name) = from_resolved.names.last() else {
            return Err(SynapsdError::RootContextProtected);
        };
        if to_resolved.names.iter().any(|n| n == moved_name) {
            return Err(SynapsdError::CycleInMove {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let mut root = self.root.write().expect("tree root lock poisoned");
        let (parent_ids, moved_id) = from_resolved.ids.split_at(from_resolved.ids.len() - 1);
        let moved_id = moved_id[0];
        let moved_node = {
            let parent = navigate_mut(&mut root, parent_ids).ok_or_else(|| SynapsdError::Missing {
                what: "tree node".to_string(),
                key: from.to_string(),
            })?;
            let pos = parent
                .children
                .iter()
                .position(|c| c.id == moved_id)
                .ok_or_else(|| SynapsdError::Missing {
                    what: "tree node".to_string(),
                    key: from.to_string(),
                })?;
            parent.children.remove(pos)
        };

        let (reattached, orphans) = if recursive {
            (moved_node, Vec::new())
        } else {
            (Node::leaf(moved_node.id), moved_node.children)
        };

        {
            let parent = navigate_mut(&mut root, parent_ids).expect("parent still present");
            parent.children.extend(orphans);
        }
        let destination = find_or_create_mut(&mut root, &to_resolved.ids);
        destination.children.push(reattached);
        drop(root);

        self.save()?;
        self.emit(Event::TreePathMoved {
            from: from.to_string(),
            to: to.to_string(),
            recursive,
        });
        Ok(())
    }

    /// Duplicate the node at `from` under `to`. `recursive` copies the
    /// whole subtree (descendants keep their original layer ids, so they
    /// share bitmaps with the source); non-recursive copies only the leaf.
    pub fn copy_path(&self, from: &str, to: &str, recursive: bool) -> SynapsdResult<()> {
        let from_resolved = self.resolve(from, false)?;
        let to_resolved = self.resolve(to, true)?;

        let mut root = self.root.write().expect("tree root lock poisoned");
        let source = navigate(&root, &from_resolved.ids)
            .cloned()
            .ok_or_else(|| SynapsdError::Missing {
                what: "tree node".to_string(),
                key: from.to_string(),
            })?;
        let copy = if recursive {
            source
        } else {
            Node::leaf(source.id)
        };
        let destination = find_or_create_mut(&mut root, &to_resolved.ids);
        destination.children.push(copy);
        drop(root);

        self.save()?;
        self.emit(Event::TreePathCopied {
            from: from.to_string(),
            to: to.to_string(),
            recursive,
        });
        Ok(())
    }

    /// Remove `path` from the tree. `recursive` deletes the whole subtree;
    /// non-recursive unlinks the leaf and re-parents its children.
    pub fn remove_path(&self, path: &str, recursive: bool) -> SynapsdResult<()> {
        let resolved = self.resolve(path, false)?;
        if resolved.ids.is_empty() {
            return Err(SynapsdError::RootContextProtected);
        }
        let (parent_ids, removed_id) = resolved.ids.split_at(resolved.ids.len() - 1);
        let removed_id = removed_id[0];

        let mut root = self.root.write().expect("tree root lock poisoned");
        let parent = navigate_mut(&mut root, parent_ids).ok_or_else(|| SynapsdError::Missing {
            what: "tree node".to_string(),
            key: path.to_string(),
        })?;
        let pos = parent
            .children
            .iter()
            .position(|c| c.id == removed_id)
            .ok_or_else(|| SynapsdError::Missing {
                what: "tree node".to_string(),
                key: path.to_string(),
            })?;
        let removed = parent.children.remove(pos);
        if !recursive {
            parent.children.extend(removed.children);
        }
        drop(root);

        self.save()?;
        self.emit(Event::TreePathRemoved {
            path: path.to_string(),
            recursive,
        });
        Ok(())
    }

    /// Every layer attribute along `path`, root excluded, in the order a
    /// reader would walk down from the root.
    pub fn layers_on_path(&self, path: &str) -> SynapsdResult<Vec<Layer>> {
        let resolved = self.resolve(path, false)?;
        Ok(resolved
            .ids
            .iter()
            .filter_map(|id| self.layers.get_layer_by_id(id))
            .collect())
    }
}

#[cfg(test)]
mod tree_test {
    use super::*;
    use crate::events::NullSink;
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    fn tree() -> ContextTree<NullSink> {
        let store: Arc<dyn crate::store::KvStore> = Arc::new(MemoryStore::new());
        ContextTree::load(
            Dataset::new(store.clone(), "layers"),
            Dataset::new(store, "tree"),
            NullSink,
        )
        .unwrap()
    }

    #[test]
    fn insert_path_creates_layers_and_nodes() {
        let tree = tree();
        let resolved = tree.insert_path("/work/proj", true).unwrap();
        assert_eq!(resolved.names, vec!["work", "proj"]);
        assert!(tree.get_node("/work").unwrap().is_some());
        assert!(tree.get_node("/work/proj").unwrap().is_some());
        assert!(tree.get_node("/home").unwrap().is_none());
    }

    #[test]
    fn reinserting_same_path_does_not_duplicate() {
        let tree = tree();
        tree.insert_path("/a/b", true).unwrap();
        tree.insert_path("/a/b", true).unwrap();
        let a = tree.get_node("/a").unwrap().unwrap();
        assert_eq!(a.children.len(), 1);
    }

    #[test]
    fn same_name_at_two_mount_points_shares_one_layer() {
        let tree = tree();
        tree.insert_path("/a/shared", true).unwrap();
        tree.insert_path("/b/shared", true).unwrap();
        let via_a = tree.layers().get_layer_by_name("shared").unwrap();
        let node_a = tree.get_node("/a/shared").unwrap().unwrap();
        let node_b = tree.get_node("/b/shared").unwrap().unwrap();
        assert_eq!(node_a.id, via_a.id);
        assert_eq!(node_b.id, via_a.id);
    }

    #[test]
    fn non_recursive_remove_reparents_children() {
        let tree = tree();
        tree.insert_path("/a/b/c", true).unwrap();
        tree.remove_path("/a/b", false).unwrap();
        assert!(tree.get_node("/a/b").unwrap().is_none());
        // c is re-parented under a.
        let a = tree.get_node("/a").unwrap().unwrap();
        let c = tree.layers().get_layer_by_name("c").unwrap();
        assert!(a.children.iter().any(|n| n.id == c.id));
    }

    #[test]
    fn recursive_remove_drops_subtree() {
        let tree = tree();
        tree.insert_path("/a/b/c", true).unwrap();
        tree.remove_path("/a/b", true).unwrap();
        assert!(tree.get_node("/a/b").unwrap().is_none());
        let a = tree.get_node("/a").unwrap().unwrap();
        assert!(a.children.is_empty());
    }

    #[test]
    fn move_path_cycle_is_rejected() {
        let tree = tree();
        tree.insert_path("/a/b", true).unwrap();
        let err = tree.move_path("/a", "/a/b", true).unwrap_err();
        assert!(matches!(err, SynapsdError::CycleInMove { .. }));
    }

    #[test]
    fn move_path_recursive_carries_subtree() {
        let tree = tree();
        tree.insert_path("/a/b/c", true).unwrap();
        tree.insert_path("/x", true).unwrap();
        tree.move_path("/a/b", "/x", true).unwrap();
        assert!(tree.get_node("/a/b").unwrap().is_none());
        assert!(tree.get_node("/x/b/c").unwrap().is_some());
    }

    #[test]
    fn copy_path_shares_layer_ids() {
        let tree = tree();
        tree.insert_path("/a/b", true).unwrap();
        tree.insert_path("/x", true).unwrap();
        tree.copy_path("/a/b", "/x", false).unwrap();
        let original = tree.get_node("/a/b").unwrap().unwrap();
        let copied = tree.get_node("/x/b").unwrap().unwrap();
        assert_eq!(original.id, copied.id);
    }

    #[test]
    fn empty_path_rejects_remove() {
        let tree = tree();
        let err = tree.remove_path("/", false).unwrap_err();
        assert!(matches!(err, SynapsdError::RootContextProtected));
    }

    #[test]
    fn root_name_segment_is_rejected() {
        let tree = tree();
        let err = tree.insert_path("/a//", true);
        // `//` collapses away, leaving just `/a`, which is fine; explicit
        // root-looking segments inside a path are what's rejected.
        assert!(err.is_ok());
    }
}
