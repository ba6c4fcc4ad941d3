// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! `DocumentEngine` — the orchestration layer that ties the bitmap index,
//! the bit-sliced timestamp indexes, and the context tree together into
//! `insert`/`hasDocument`/`find`/`remove`/`delete` (spec.md §4.6).
//!
//! ## Write path
//!
//! ```text
//! insert(doc, contexts, features)
//!   -> validate against schema registry
//!   -> compute checksum set, resolve primary digest to an id (or allocate)
//!   -> persist the document record
//!   -> upsert checksum index entries
//!   -> insert context paths into the tree, tick ancestor-closed context bitmaps
//!   -> tick feature bitmaps (schema tag + user features)
//!   -> record created/updated timestamps in the `idx/created`/`idx/updated`
//!      bit-sliced indexes, tick the matching `internal/action/*` bitmap
//!   -> emit DocumentInserted
//! ```
//!
//! Query flow reverses this: feature keys are OR'd, context keys are
//! AND'd, optional filter keys are AND'd, the tombstone bitmap is
//! subtracted, and the surviving ids are resolved back to records.

use crate::bitmap::Bitmap;
use crate::bitmap_index::{BitmapIndex, NegatableKey};
use crate::bsi::{BitSlicedIndex, Op};
use crate::checksum::ChecksumRegistry;
use crate::config::SynapsdConfig;
use crate::error::{SynapsdError, SynapsdResult};
use crate::events::{Event, EventSink};
use crate::id::{DocumentId, IdAllocator};
use crate::key;
use crate::schema::SchemaRegistry;
use crate::store::dataset::Dataset;
use crate::store::KvStore;
use crate::tree::ContextTree;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const ACTION_CREATED: &str = "internal/action/created";
const ACTION_UPDATED: &str = "internal/action/updated";
const ACTION_DELETED: &str = "internal/action/deleted";
const TOMBSTONES: &str = "internal/gc/deleted";
// The reference grammar names these `idx/created` etc., but `idx/` is not
// one of the allow-listed key prefixes (only `index/` is) — treated here
// as a naming slip in the source material and resolved to `index/*`; see
// DESIGN.md.
const BSI_CREATED: &str = "index/created";
const BSI_UPDATED: &str = "index/updated";
const BSI_DELETED: &str = "index/deleted";

/// A document as it's stored: a schema tag plus a JSON payload, the
/// reference implementation's runtime-dispatched subclasses collapsed
/// into one shape (see DESIGN NOTES).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub schema: String,
    pub schema_version: String,
    pub created_at: String,
    pub updated_at: String,
    pub data: Value,
    /// `algorithm -> digest`. May contain aliases from a prior `update`
    /// whose digest has since changed (see DESIGN.md).
    pub checksums: BTreeMap<String, String>,
    pub primary_checksum_algorithm: String,
    pub features: Vec<String>,
    pub contexts: Vec<String>,
    pub metadata: Option<Value>,
}

impl DocumentRecord {
    pub fn primary_checksum(&self) -> Option<&str> {
        self.checksums
            .get(&self.primary_checksum_algorithm)
            .map(String::as_str)
    }
}

/// A document not yet assigned an id, as passed to `insert`/`update`.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub schema: String,
    pub schema_version: String,
    pub data: Value,
    pub metadata: Option<Value>,
}

impl NewDocument {
    pub fn new(schema: impl Into<String>, data: Value) -> Self {
        Self {
            schema: schema.into(),
            schema_version: "1.0".to_string(),
            data,
            metadata: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// One or more context paths, as accepted by `insert`/`update`/`find`.
/// A bare string and a path list both coerce into this via `From`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSpec(Vec<String>);

impl ContextSpec {
    pub fn root() -> Self {
        Self(vec!["/".to_string()])
    }

    pub fn paths(&self) -> &[String] {
        &self.0
    }

    /// A path list filters out the literal root only when other paths are
    /// present; an empty spec normalizes to root.
    fn normalized(&self) -> Vec<String> {
        if self.0.is_empty() {
            return vec!["/".to_string()];
        }
        let without_bare_root: Vec<String> = self
            .0
            .iter()
            .filter(|p| p.as_str() != "/")
            .cloned()
            .collect();
        if without_bare_root.is_empty() {
            self.0.clone()
        } else {
            without_bare_root
        }
    }

    /// True once normalized down to just the root path.
    pub fn is_root_only(&self) -> bool {
        let normalized = self.normalized();
        normalized.len() == 1 && normalized[0] == "/"
    }
}

impl From<&str> for ContextSpec {
    fn from(path: &str) -> Self {
        Self(vec![path.to_string()])
    }
}

impl From<String> for ContextSpec {
    fn from(path: String) -> Self {
        Self(vec![path])
    }
}

impl From<Vec<String>> for ContextSpec {
    fn from(paths: Vec<String>) -> Self {
        Self(paths)
    }
}

impl From<Vec<&str>> for ContextSpec {
    fn from(paths: Vec<&str>) -> Self {
        Self(paths.into_iter().map(String::from).collect())
    }
}

impl Default for ContextSpec {
    fn default() -> Self {
        Self::root()
    }
}

/// Options accepted by `remove_document`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    pub recursive: bool,
}

/// Options accepted by `find_documents`.
#[derive(Debug, Clone)]
pub struct FindOptions {
    /// Ascending-id truncation after sort; `0` means unbounded.
    pub limit: usize,
    /// When true (the default), ids are resolved back to `DocumentRecord`s.
    pub parse: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            limit: 0,
            parse: true,
        }
    }
}

/// The result of `find_documents`, shaped by `FindOptions::parse`.
#[derive(Debug, Clone)]
pub enum FindOutcome {
    Ids(Vec<DocumentId>),
    Documents(Vec<DocumentRecord>),
}

/// An item-level failure from a batch operation.
#[derive(Debug)]
pub struct BatchFailure<T> {
    pub item: T,
    pub error: SynapsdError,
}

/// The report returned by every `*_batch` method: per-item failures only,
/// since successes need no further attention.
#[derive(Debug, Default)]
pub struct BatchReport<T> {
    pub failures: Vec<BatchFailure<T>>,
}

impl<T> BatchReport<T> {
    pub fn is_fully_successful(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Orchestrates the bitmap index, the context tree, the timestamp BSIs,
/// and the checksum/schema registries into document-level CRUD.
pub struct DocumentEngine<S: EventSink + Clone> {
    documents: Dataset,
    checksums: Dataset,
    bitmap_index: BitmapIndex<S>,
    tree: ContextTree<S>,
    schemas: SchemaRegistry,
    checksum_registry: ChecksumRegistry,
    id_allocator: IdAllocator,
    bsi_bit_depth: u32,
    sink: S,
}

impl<S: EventSink + Clone> DocumentEngine<S> {
    /// Open (or create) a SynapsD instance over `store`, using `config`
    /// for the internal/user id boundary, the BSI bit depth, and the
    /// cache capacity.
    pub fn open(
        store: Arc<dyn KvStore>,
        config: &SynapsdConfig,
        schemas: SchemaRegistry,
        checksum_registry: ChecksumRegistry,
        sink: S,
    ) -> SynapsdResult<Self> {
        let documents = Dataset::new(store.clone(), "documents");
        let checksums = Dataset::new(store.clone(), "checksums");
        let bitmaps = Dataset::new(store.clone(), "bitmaps");
        let layers = Dataset::new(store.clone(), "layers");
        let tree_dataset = Dataset::new(store, "tree");

        let bitmap_index = BitmapIndex::new(bitmaps, 0, u32::MAX, config.cache_capacity, sink.clone());
        let tree = ContextTree::load(layers, tree_dataset, sink.clone())?;
        let existing_count = documents.count()? as u32;
        let id_allocator = IdAllocator::seeded(config.internal_max, existing_count);

        Ok(Self {
            documents,
            checksums,
            bitmap_index,
            tree,
            schemas,
            checksum_registry,
            id_allocator,
            bsi_bit_depth: config.bsi_bit_depth,
            sink,
        })
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn tree(&self) -> &ContextTree<S> {
        &self.tree
    }

    pub fn bitmaps(&self) -> &BitmapIndex<S> {
        &self.bitmap_index
    }

    fn created_bsi(&self) -> BitSlicedIndex<'_, S> {
        BitSlicedIndex::new(&self.bitmap_index, BSI_CREATED, self.bsi_bit_depth, 0, u32::MAX)
    }

    fn updated_bsi(&self) -> BitSlicedIndex<'_, S> {
        BitSlicedIndex::new(&self.bitmap_index, BSI_UPDATED, self.bsi_bit_depth, 0, u32::MAX)
    }

    fn deleted_bsi(&self) -> BitSlicedIndex<'_, S> {
        BitSlicedIndex::new(&self.bitmap_index, BSI_DELETED, self.bsi_bit_depth, 0, u32::MAX)
    }

    fn load_record(&self, id: DocumentId) -> SynapsdResult<Option<DocumentRecord>> {
        match self.documents.get(id.to_string().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_record(&self, record: &DocumentRecord) -> SynapsdResult<()> {
        let bytes = serde_json::to_vec(record)?;
        self.documents.put(record.id.to_string().as_bytes(), &bytes)
    }

    fn checksum_index_key(algorithm: &str, digest: &str) -> Vec<u8> {
        format!("{}/{}", algorithm, digest).into_bytes()
    }

    fn find_id_by_checksum(&self, algorithm: &str, digest: &str) -> SynapsdResult<Option<DocumentId>> {
        match self.checksums.get(&Self::checksum_index_key(algorithm, digest))? {
            Some(bytes) => {
                let text = String::from_utf8(bytes).map_err(|e| SynapsdError::BackendError {
                    operation: "checksum index decode".to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Some(text.parse::<DocumentId>().map_err(|e: std::num::ParseIntError| {
                    SynapsdError::BackendError {
                        operation: "checksum index decode".to_string(),
                        reason: e.to_string(),
                    }
                })?))
            }
            None => Ok(None),
        }
    }

    fn feature_key_for_schema(schema: &str) -> String {
        if schema.starts_with("data/abstraction/") {
            schema.to_string()
        } else {
            format!("data/abstraction/{}", schema)
        }
    }

    /// Every `context/<name>` key along `path`, ancestor-inclusive (root
    /// excluded), auto-creating any layer or tree node the path needs.
    /// Write-path only — queries must not create context structure as a
    /// side effect of asking about it.
    fn context_keys_for_insert(&self, path: &str) -> SynapsdResult<Vec<String>> {
        let resolved = self.tree.insert_path(path, true)?;
        Ok(resolved
            .names
            .iter()
            .map(|name| format!("context/{}", name))
            .collect())
    }

    /// As above, but read-only: a path segment that was never created
    /// resolves to no keys instead of materializing it.
    fn context_keys_for_query(&self, path: &str) -> SynapsdResult<Option<Vec<String>>> {
        if path == "/" {
            return Ok(Some(Vec::new()));
        }
        match self.tree.layers_on_path(path) {
            Ok(layers) => Ok(Some(layers.iter().map(|l| format!("context/{}", l.name)).collect())),
            Err(SynapsdError::Missing { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn insert_contexts(&self, id: DocumentId, spec: &ContextSpec) -> SynapsdResult<Vec<String>> {
        let mut all_paths = Vec::new();
        for path in spec.normalized() {
            for key in self.context_keys_for_insert(&path)? {
                self.bitmap_index.tick(&key, &[id as i64])?;
            }
            all_paths.push(path);
        }
        Ok(all_paths)
    }

    fn insert_features(&self, id: DocumentId, schema: &str, features: &[String]) -> SynapsdResult<Vec<String>> {
        let mut all = vec![Self::feature_key_for_schema(schema)];
        for feature in features {
            all.push(key::validate_key(feature)?);
        }
        for feature_key in &all {
            self.bitmap_index.tick(feature_key, &[id as i64])?;
        }
        Ok(all)
    }

    fn checksum_digests(&self, data: &Value) -> SynapsdResult<(BTreeMap<String, String>, String)> {
        let bytes = serde_json::to_vec(data)?;
        let set = self.checksum_registry.compute(&bytes);
        let mut digests = BTreeMap::new();
        for (algo, digest) in set.iter() {
            digests.insert(algo.to_string(), digest.to_string());
        }
        let primary = set
            .primary_algorithm()
            .expect("checksum registry always designates a primary algorithm")
            .to_string();
        Ok((digests, primary))
    }

    /// Insert `doc`, deduplicating on its primary checksum: a second
    /// insert with identical data returns the same id instead of
    /// allocating a new one.
    pub fn insert(
        &self,
        doc: NewDocument,
        context: impl Into<ContextSpec>,
        features: &[String],
    ) -> SynapsdResult<DocumentId> {
        self.schemas.validate(&doc.schema, &doc.data)?;
        let (digests, primary_algo) = self.checksum_digests(&doc.data)?;
        let primary_digest = digests
            .get(&primary_algo)
            .expect("primary algorithm always has a digest")
            .clone();

        let existing_id = self.find_id_by_checksum(&primary_algo, &primary_digest)?;
        let id = match existing_id {
            Some(id) => {
                log::debug!(
                    "checksum {}:{} matches existing document {}, reusing id",
                    primary_algo,
                    primary_digest,
                    id
                );
                id
            }
            None => self.id_allocator.next(),
        };

        let now = chrono::Utc::now();
        let created_at = match existing_id.and_then(|id| self.load_record(id).ok().flatten()) {
            Some(previous) => previous.created_at,
            None => now.to_rfc3339(),
        };

        let context_spec = context.into();
        let contexts = self.insert_contexts(id, &context_spec)?;
        let feature_keys = self.insert_features(id, &doc.schema, features)?;

        let record = DocumentRecord {
            id,
            schema: doc.schema,
            schema_version: doc.schema_version,
            created_at,
            updated_at: now.to_rfc3339(),
            data: doc.data,
            checksums: digests,
            primary_checksum_algorithm: primary_algo.clone(),
            features: feature_keys,
            contexts,
            metadata: doc.metadata,
        };
        self.save_record(&record)?;
        self.checksums
            .put(&Self::checksum_index_key(&primary_algo, &primary_digest), id.to_string().as_bytes())?;
        for (algo, digest) in &record.checksums {
            self.checksums
                .put(&Self::checksum_index_key(algo, digest), id.to_string().as_bytes())?;
        }

        self.created_bsi().set_value(id, now.timestamp() as u64)?;
        self.updated_bsi().set_value(id, now.timestamp() as u64)?;
        self.bitmap_index.tick(ACTION_CREATED, &[id as i64])?;
        self.sink.emit(Event::DocumentInserted { id });
        Ok(id)
    }

    /// Merge `patch` into the stored document at `id`. Objects merge
    /// shallowly; any other JSON shape for `patch` replaces `data`
    /// outright. Additive: new contexts/features are ticked, nothing
    /// already present is removed.
    pub fn update(
        &self,
        id: DocumentId,
        patch: Value,
        context: Option<ContextSpec>,
        features: &[String],
    ) -> SynapsdResult<()> {
        let mut record = self.load_record(id)?.ok_or_else(|| SynapsdError::Missing {
            what: "document".to_string(),
            key: id.to_string(),
        })?;

        record.data = merge_json(record.data, patch);
        let (digests, primary_algo) = self.checksum_digests(&record.data)?;
        for (algo, digest) in &digests {
            self.checksums
                .put(&Self::checksum_index_key(algo, digest), id.to_string().as_bytes())?;
        }
        record.checksums.extend(digests);
        record.primary_checksum_algorithm = primary_algo;

        if let Some(spec) = context {
            let added = self.insert_contexts(id, &spec)?;
            for path in added {
                if !record.contexts.contains(&path) {
                    record.contexts.push(path);
                }
            }
        }
        let added_features = self.insert_features(id, &record.schema.clone(), features)?;
        for feature in added_features {
            if !record.features.contains(&feature) {
                record.features.push(feature);
            }
        }

        record.updated_at = chrono::Utc::now().to_rfc3339();
        self.save_record(&record)?;

        self.updated_bsi().set_value(id, chrono::Utc::now().timestamp() as u64)?;
        self.bitmap_index.tick(ACTION_UPDATED, &[id as i64])?;
        self.sink.emit(Event::DocumentUpdated { id });
        Ok(())
    }

    /// `ctx ∧ feat ∧ {id}` is non-empty: the document exists and is a
    /// member of every requested context and at least one requested
    /// feature (an empty feature list imposes no feature constraint).
    pub fn has_document(
        &self,
        id: DocumentId,
        context: impl Into<ContextSpec>,
        features: &[String],
    ) -> SynapsdResult<bool> {
        let ctx = self.context_bitmap(&context.into())?;
        let feat = self.feature_bitmap(features)?;
        let singleton = Bitmap::create("internal/result/singleton", 0, u32::MAX, id)?;
        Ok(!ctx.and(&feat).and(&singleton).is_empty())
    }

    /// `ctx = AND(context keys)`: an empty positive set (root-only spec)
    /// restricts to the universe; a path that was never created yields an
    /// empty result outright (same "missing positive key" rule `and` uses
    /// for any other key).
    fn context_bitmap(&self, spec: &ContextSpec) -> SynapsdResult<Bitmap> {
        let mut keys = Vec::new();
        for path in spec.normalized() {
            match self.context_keys_for_query(&path)? {
                Some(found) => keys.extend(found.into_iter().map(|k| NegatableKey { negated: false, key: k })),
                None => return Bitmap::new("internal/result/and", 0, u32::MAX),
            }
        }
        self.bitmap_index.and(&keys)
    }

    fn feature_bitmap(&self, features: &[String]) -> SynapsdResult<Bitmap> {
        if features.is_empty() {
            return self.bitmap_index.and(&[]);
        }
        let keys: Vec<NegatableKey> = features.iter().map(|f| NegatableKey::parse(f)).collect();
        self.bitmap_index.or(&keys)
    }

    fn filter_bitmap(&self, filters: &[String]) -> SynapsdResult<Bitmap> {
        if filters.is_empty() {
            return self.bitmap_index.and(&[]);
        }
        let keys: Vec<NegatableKey> = filters.iter().map(|f| NegatableKey::parse(f)).collect();
        self.bitmap_index.and(&keys)
    }

    /// `ctx ∧ feat ∧ filt`, tombstones subtracted, ascending-id sorted,
    /// optionally truncated and resolved back to records.
    pub fn find_documents(
        &self,
        context: impl Into<ContextSpec>,
        features: &[String],
        filters: &[String],
        options: FindOptions,
    ) -> SynapsdResult<FindOutcome> {
        let ctx = self.context_bitmap(&context.into())?;
        let feat = self.feature_bitmap(features)?;
        let filt = self.filter_bitmap(filters)?;
        let tombstones = self
            .bitmap_index
            .get_bitmap(TOMBSTONES, false)?
            .unwrap_or(Bitmap::new(TOMBSTONES, 0, u32::MAX)?);
        // ctx/feat/filt fall back to the full `[rangeMin, rangeMax)` universe
        // when their positive key sets are empty (root context, no feature
        // or filter constraint). Intersecting with the set of documents
        // ever created bounds the materialized result to live ids instead
        // of the raw id range.
        let created = self
            .bitmap_index
            .get_bitmap(ACTION_CREATED, false)?
            .unwrap_or(Bitmap::new(ACTION_CREATED, 0, u32::MAX)?);

        let result = ctx.and(&feat).and(&filt).and(&created).and_not(&tombstones);
        let mut ids = result.to_array();
        ids.sort_unstable();
        if options.limit > 0 && ids.len() > options.limit {
            ids.truncate(options.limit);
        }

        if !options.parse {
            return Ok(FindOutcome::Ids(ids));
        }
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.load_record(id)? {
                records.push(record);
            }
        }
        Ok(FindOutcome::Documents(records))
    }

    /// Remove `id` from the requested contexts/features without deleting
    /// its record. Rejects a context spec that normalizes to the root
    /// path — use `delete_document` for that.
    pub fn remove_document(
        &self,
        id: DocumentId,
        context: impl Into<ContextSpec>,
        features: &[String],
        options: RemoveOptions,
    ) -> SynapsdResult<()> {
        let spec = context.into();
        if spec.is_root_only() {
            return Err(SynapsdError::RootContextProtected);
        }

        for path in spec.normalized() {
            let Some(keys) = self.context_keys_for_query(&path)? else {
                continue;
            };
            let targets: Vec<&str> = if options.recursive {
                keys.iter().map(String::as_str).collect()
            } else {
                keys.last().map(|k| vec![k.as_str()]).unwrap_or_default()
            };
            self.bitmap_index.untick_many(&targets, &[id as i64])?;
        }
        let feature_refs: Vec<&str> = features.iter().map(String::as_str).collect();
        self.bitmap_index.untick_many(&feature_refs, &[id as i64])?;
        Ok(())
    }

    /// Remove `id`'s record, every checksum-index entry pointing at it
    /// (including stale aliases from prior updates), and every
    /// non-internal bitmap membership; add it to the tombstone bitmap.
    /// Returns `false` if `id` did not exist.
    pub fn delete_document(&self, id: DocumentId) -> SynapsdResult<bool> {
        let Some(_) = self.load_record(id)? else {
            return Ok(false);
        };
        self.documents.del(id.to_string().as_bytes())?;

        let id_bytes = id.to_string().into_bytes();
        for (key, value) in self.checksums.get_range(&Default::default())? {
            if value == id_bytes {
                self.checksums.del(&key)?;
            }
        }

        let all_keys = self.bitmap_index.list_bitmaps(None)?;
        let refs: Vec<&str> = all_keys.iter().map(String::as_str).collect();
        self.bitmap_index.untick_many(&refs, &[id as i64])?;

        self.bitmap_index.tick(TOMBSTONES, &[id as i64])?;
        self.bitmap_index.tick(ACTION_DELETED, &[id as i64])?;
        self.deleted_bsi().set_value(id, chrono::Utc::now().timestamp() as u64)?;
        self.sink.emit(Event::DocumentDeleted { id });
        Ok(true)
    }

    /// Loop `insert` over `docs`, collecting per-item failures. Emits a
    /// single `BatchCompleted` event instead of one per document.
    pub fn insert_batch(
        &self,
        docs: Vec<(NewDocument, ContextSpec, Vec<String>)>,
    ) -> BatchReport<NewDocument> {
        let mut report = BatchReport::default();
        let count = docs.len();
        for (doc, context, features) in docs {
            let snapshot = doc.clone();
            if let Err(error) = self.insert(doc, context, &features) {
                report.failures.push(BatchFailure { item: snapshot, error });
            }
        }
        self.sink.emit(Event::BatchCompleted {
            operation: "insert",
            count,
            errors: report.failures.len(),
        });
        report
    }

    pub fn remove_batch(
        &self,
        items: Vec<(DocumentId, ContextSpec, Vec<String>, RemoveOptions)>,
    ) -> BatchReport<DocumentId> {
        let mut report = BatchReport::default();
        let count = items.len();
        for (id, context, features, options) in items {
            if let Err(error) = self.remove_document(id, context, &features, options) {
                report.failures.push(BatchFailure { item: id, error });
            }
        }
        self.sink.emit(Event::BatchCompleted {
            operation: "remove",
            count,
            errors: report.failures.len(),
        });
        report
    }

    pub fn delete_batch(&self, ids: Vec<DocumentId>) -> BatchReport<DocumentId> {
        let mut report = BatchReport::default();
        let count = ids.len();
        for id in ids {
            match self.delete_document(id) {
                Ok(_) => {}
                Err(error) => report.failures.push(BatchFailure { item: id, error }),
            }
        }
        self.sink.emit(Event::BatchCompleted {
            operation: "delete",
            count,
            errors: report.failures.len(),
        });
        report
    }

    pub fn query_created(&self, op: Op, value: u64) -> SynapsdResult<Bitmap> {
        self.created_bsi().query(op, value)
    }

    pub fn query_created_between(&self, lo: u64, hi: u64) -> SynapsdResult<Bitmap> {
        self.created_bsi().between(lo, hi)
    }
}

/// Shallow JSON merge used by `update`: object keys from `patch` override
/// `base`'s; any other shape for `patch` replaces `base` outright.
fn merge_json(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                base_map.insert(k, v);
            }
            Value::Object(base_map)
        }
        (_, patch) => patch,
    }
}

#[cfg(test)]
mod document_engine_test {
    use super::*;
    use crate::events::NullSink;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    fn engine() -> DocumentEngine<NullSink> {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut schemas = SchemaRegistry::new();
        schemas.register("note", "1.0", crate::schema::permissive);
        DocumentEngine::open(
            store,
            &SynapsdConfig::default(),
            schemas,
            ChecksumRegistry::default_registry(),
            NullSink,
        )
        .unwrap()
    }

    #[test]
    fn insert_assigns_first_internal_max_id() {
        let engine = engine();
        let id = engine
            .insert(NewDocument::new("note", json!({"title": "N"})), "/work/proj", &[])
            .unwrap();
        assert_eq!(id, 100_001);
    }

    #[test]
    fn ancestor_closure_holds_after_insert() {
        let engine = engine();
        let id = engine
            .insert(NewDocument::new("note", json!({"title": "N"})), "/work/proj", &[])
            .unwrap();
        assert!(engine.has_document(id, "/", &[]).unwrap());
        assert!(engine.has_document(id, "/work", &[]).unwrap());
        assert!(engine.has_document(id, "/work/proj", &[]).unwrap());
        assert!(!engine.has_document(id, "/home", &[]).unwrap());
    }

    #[test]
    fn duplicate_checksum_reuses_id() {
        let engine = engine();
        let first = engine
            .insert(NewDocument::new("note", json!({"title": "N"})), "/a", &[])
            .unwrap();
        let second = engine
            .insert(NewDocument::new("note", json!({"title": "N"})), "/b", &[])
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.documents.count().unwrap(), 1);
    }

    #[test]
    fn non_recursive_remove_keeps_ancestors() {
        let engine = engine();
        let id = engine
            .insert(NewDocument::new("note", json!({"title": "N"})), "/a/b/c", &[])
            .unwrap();
        engine
            .remove_document(id, "/a/b/c", &[], RemoveOptions::default())
            .unwrap();
        assert!(!engine.has_document(id, "/a/b/c", &[]).unwrap());
        assert!(engine.has_document(id, "/a/b", &[]).unwrap());
        assert!(engine.has_document(id, "/a", &[]).unwrap());
    }

    #[test]
    fn recursive_remove_clears_whole_path() {
        let engine = engine();
        let id = engine
            .insert(NewDocument::new("note", json!({"title": "N"})), "/a/b/c", &[])
            .unwrap();
        engine
            .remove_document(id, "/a/b/c", &[], RemoveOptions { recursive: true })
            .unwrap();
        assert!(!engine.has_document(id, "/a", &[]).unwrap());
        assert!(!engine.has_document(id, "/a/b", &[]).unwrap());
        assert!(!engine.has_document(id, "/a/b/c", &[]).unwrap());
        assert!(engine.has_document(id, "/", &[]).unwrap());
    }

    #[test]
    fn remove_rejects_root_context() {
        let engine = engine();
        let id = engine
            .insert(NewDocument::new("note", json!({"title": "N"})), "/a", &[])
            .unwrap();
        let err = engine
            .remove_document(id, "/", &[], RemoveOptions::default())
            .unwrap_err();
        assert!(matches!(err, SynapsdError::RootContextProtected));
    }

    #[test]
    fn delete_document_tombstones_and_removes_record() {
        let engine = engine();
        let id = engine
            .insert(NewDocument::new("note", json!({"title": "N"})), "/a", &[])
            .unwrap();
        assert!(engine.delete_document(id).unwrap());
        assert!(engine.load_record(id).unwrap().is_none());
        assert!(!engine.has_document(id, "/a", &[]).unwrap());
        let tombstones = engine.bitmap_index.get_bitmap(TOMBSTONES, false).unwrap().unwrap();
        assert!(tombstones.has(id));
    }

    #[test]
    fn delete_missing_document_returns_false() {
        let engine = engine();
        assert!(!engine.delete_document(999_999).unwrap());
    }

    #[test]
    fn update_is_additive_and_recomputes_checksum() {
        let engine = engine();
        let id = engine
            .insert(NewDocument::new("note", json!({"title": "N"})), "/a", &[])
            .unwrap();
        engine
            .update(id, json!({"title": "N2"}), Some("/b".into()), &[])
            .unwrap();
        assert!(engine.has_document(id, "/a", &[]).unwrap());
        assert!(engine.has_document(id, "/b", &[]).unwrap());
        let record = engine.load_record(id).unwrap().unwrap();
        assert_eq!(record.data["title"], "N2");
    }

    #[test]
    fn find_documents_combines_context_and_feature() {
        let engine = engine();
        let in_both = engine
            .insert(
                NewDocument::new("note", json!({"title": "A"})),
                "/work",
                &["tag/urgent".to_string()],
            )
            .unwrap();
        let _wrong_context = engine
            .insert(
                NewDocument::new("note", json!({"title": "B"})),
                "/home",
                &["tag/urgent".to_string()],
            )
            .unwrap();

        let result = engine
            .find_documents(
                "/work",
                &["tag/urgent".to_string()],
                &[],
                FindOptions {
                    limit: 0,
                    parse: false,
                },
            )
            .unwrap();
        match result {
            FindOutcome::Ids(ids) => assert_eq!(ids, vec![in_both]),
            FindOutcome::Documents(_) => panic!("expected ids"),
        }
    }

    #[test]
    fn find_documents_excludes_tombstones() {
        let engine = engine();
        let id = engine
            .insert(NewDocument::new("note", json!({"title": "A"})), "/work", &[])
            .unwrap();
        engine.delete_document(id).unwrap();
        let result = engine
            .find_documents("/work", &[], &[], FindOptions { limit: 0, parse: false })
            .unwrap();
        match result {
            FindOutcome::Ids(ids) => assert!(ids.is_empty()),
            FindOutcome::Documents(_) => panic!("expected ids"),
        }
    }

    #[test]
    fn batch_insert_reports_per_item_failures() {
        let engine = engine();
        let docs = vec![
            (
                NewDocument::new("note", json!({"title": "ok"})),
                ContextSpec::from("/a"),
                vec![],
            ),
            (
                NewDocument::new("unregistered-schema", json!({})),
                ContextSpec::from("/a"),
                vec![],
            ),
        ];
        let report = engine.insert_batch(docs);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_fully_successful());
    }

    #[test]
    fn timestamp_bsi_supports_between_queries() {
        let engine = engine();
        let id1 = engine
            .insert(NewDocument::new("note", json!({"title": "1"})), "/a", &[])
            .unwrap();
        let now = chrono::Utc::now().timestamp() as u64;
        let hits = engine.query_created_between(now - 5, now + 5).unwrap();
        assert!(hits.has(id1));
    }
}
