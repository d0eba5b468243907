//! Incremental similarity index.
//!
//! Composes the vector store, the identity map and the similarity cache.
//! Indexing a batch runs in two steps:
//!
//! 1. [`SimilarityIndex::prepare`] is read-only. It vectorises the batch, folds
//!    the batch into every existing document's cached list (old pass) and
//!    ranks each new document against everything stored plus the batch
//!    (new pass). The result is a [`StagedBatch`].
//! 2. [`SimilarityIndex::publish`] appends the vectors, installs the new ids
//!    and cache entries, and saves. A failed save restores the previous state.
//!
//! Readers only ever see published states.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult};
use crate::index::cache::{SimilarityCache, merge_sims};
use crate::index::identity::IdentityMap;
use crate::index::manifest::IndexManifest;
use crate::index::persistence;
use crate::index::rank::{apply_find_filter, rank_scores};
use crate::semantic::{ModelError, SemanticModel};
use crate::types::{Query, Sims};
use crate::vector::{Position, QueryNorm, Shard, ShardId, VectorDimension, VectorStore, dot, unit_vector};
use crate::{Document, DocumentId};

/// A batch that has been scored against the index but not yet applied.
#[derive(Debug)]
pub struct StagedBatch {
    base_len: u64,
    dimension: usize,
    model_name: String,
    ids: Vec<DocumentId>,
    vectors: Vec<Vec<f32>>,
    updates: Vec<(DocumentId, Sims)>,
    fresh_entries: Vec<(DocumentId, Sims)>,
}

impl StagedBatch {
    fn empty(base_len: u64, model_name: &str) -> Self {
        Self {
            base_len,
            dimension: 0,
            model_name: model_name.to_string(),
            ids: Vec::new(),
            vectors: Vec::new(),
            updates: Vec::new(),
            fresh_entries: Vec::new(),
        }
    }

    /// Number of documents in the batch.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Existing documents whose lists change.
    pub fn updated_documents(&self) -> usize {
        self.updates.len()
    }
}

/// Document similarity index over a directory.
#[derive(Debug)]
pub struct SimilarityIndex {
    root: PathBuf,
    config: IndexConfig,
    store: Option<VectorStore>,
    ids: IdentityMap,
    sims: SimilarityCache,
    manifest: Option<IndexManifest>,
}

impl SimilarityIndex {
    /// Creates an empty, uninitialized index rooted at `root`.
    ///
    /// Nothing is written until the first batch is published.
    pub fn create(root: impl AsRef<Path>, config: IndexConfig) -> IndexResult<Self> {
        config
            .validate()
            .map_err(|reason| IndexError::Config { reason })?;

        Ok(Self {
            root: root.as_ref().to_path_buf(),
            sims: SimilarityCache::new(config.top_sims),
            config,
            store: None,
            ids: IdentityMap::new(),
            manifest: None,
        })
    }

    /// Opens a persisted index.
    ///
    /// Layout and ranking settings recorded in the manifest take precedence
    /// over `config`, since the stored lists were built with them.
    pub fn open(root: impl AsRef<Path>, config: IndexConfig) -> IndexResult<Self> {
        let root = root.as_ref().to_path_buf();
        config
            .validate()
            .map_err(|reason| IndexError::Config { reason })?;

        let manifest = IndexManifest::load(&root)?;
        let config = Self::reconcile(config, &manifest);

        let dimension = VectorDimension::new(manifest.dimension)?;
        let store = VectorStore::open(&root, dimension, manifest.shard_size, manifest.length)?;
        let (ids, mut sims) = persistence::load_state(&root, &manifest.state())?;
        ids.verify()?;
        let dropped = sims.retain_owners(|owner| ids.contains(owner));
        if dropped > 0 {
            debug!("Dropped {dropped} cached lists of deleted documents");
        }

        if let Some((last, owner)) = ids.ids_by_position().last() {
            if last.get() >= manifest.length {
                return Err(IndexError::Corrupted {
                    reason: format!(
                        "document '{owner}' points at position {last} beyond the store length {}",
                        manifest.length
                    ),
                });
            }
        }

        Self::remove_stale_state_files(&root, &manifest.state_file);

        info!(
            "Opened index at {} with {} documents ({} stored vectors)",
            root.display(),
            ids.len(),
            store.len()
        );

        Ok(Self {
            root,
            config,
            store: Some(store),
            ids,
            sims,
            manifest: Some(manifest),
        })
    }

    /// Opens the index in `root` if one was persisted there, otherwise creates one.
    pub fn open_or_create(root: impl AsRef<Path>, config: IndexConfig) -> IndexResult<Self> {
        if IndexManifest::exists(root.as_ref()) {
            Self::open(root, config)
        } else {
            Self::create(root, config)
        }
    }

    /// Removes every file an index keeps in `root`.
    pub fn remove_files(root: impl AsRef<Path>) -> IndexResult<()> {
        let root = root.as_ref();
        if !root.exists() {
            return Ok(());
        }

        // Manifest first, so an interrupted removal never looks like a valid index
        let manifest = root.join("manifest.json");
        if manifest.exists() {
            std::fs::remove_file(&manifest).map_err(|source| IndexError::Io {
                path: manifest.clone(),
                source,
            })?;
        }

        let mut ordinal = 0u32;
        loop {
            let shard = Shard::shard_path(root, ShardId::new(ordinal));
            if !shard.exists() {
                break;
            }
            std::fs::remove_file(&shard).map_err(|source| IndexError::Io {
                path: shard.clone(),
                source,
            })?;
            ordinal += 1;
        }
        Self::remove_stale_state_files(root, "");

        if std::fs::remove_dir(root).is_err() {
            debug!("Index directory {} kept, it is not empty", root.display());
        }
        Ok(())
    }

    /// Adds or replaces `fresh` documents.
    pub fn index_documents(
        &mut self,
        fresh: &BTreeMap<DocumentId, Document>,
        model: &dyn SemanticModel,
    ) -> IndexResult<()> {
        let staged = self.prepare(fresh, model)?;
        self.publish(staged)
    }

    /// Scores `fresh` against the index without changing it.
    pub fn prepare(
        &self,
        fresh: &BTreeMap<DocumentId, Document>,
        model: &dyn SemanticModel,
    ) -> IndexResult<StagedBatch> {
        let base_len = self.stored_len();
        if fresh.is_empty() {
            return Ok(StagedBatch::empty(base_len, model.name()));
        }

        if let Some(built_with) = self.model_name() {
            if built_with != model.name() {
                warn!(
                    "Index was built with model '{built_with}' but '{}' is in use",
                    model.name()
                );
            }
        }

        let ids: Vec<DocumentId> = fresh.keys().cloned().collect();
        let docs: Vec<&Document> = fresh.values().collect();
        let raw = model.docs2vecs(&docs)?;
        if raw.len() != docs.len() {
            return Err(ModelError::BatchSize {
                expected: docs.len(),
                actual: raw.len(),
            }
            .into());
        }

        let dimension = match &self.store {
            Some(store) => store.dimension().get(),
            None => raw[0].len(),
        };
        VectorDimension::new(dimension)?;
        if let Some(bad) = raw.iter().find(|v| v.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }
        let vectors: Vec<Vec<f32>> = raw.iter().map(|v| unit_vector(v)).collect();

        info!("Indexing {} new documents", ids.len());

        let (updates, fresh_entries) = if self.config.precompute {
            let updates = self.merge_into_existing(fresh, &ids, &vectors)?;
            let fresh_entries = self.rank_fresh(fresh, &ids, &vectors, base_len)?;
            (updates, fresh_entries)
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(StagedBatch {
            base_len,
            dimension,
            model_name: model.name().to_string(),
            ids,
            vectors,
            updates,
            fresh_entries,
        })
    }

    /// Folds the batch into every live, non-replaced document's cached list.
    fn merge_into_existing(
        &self,
        fresh: &BTreeMap<DocumentId, Document>,
        batch_ids: &[DocumentId],
        batch: &[Vec<f32>],
    ) -> IndexResult<Vec<(DocumentId, Sims)>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let cap = self.config.top_sims;
        let mode = self.config.score_mode;
        let keep_old = |peer: &DocumentId| self.ids.contains(peer) && !fresh.contains_key(peer);

        let mut updates = Vec::with_capacity(self.ids.len());
        for chunk in store.iter_chunks(self.config.chunk_size) {
            let chunk = chunk?;
            let start = chunk.start();
            let merged: Vec<(DocumentId, Sims)> = chunk
                .data()
                .par_chunks_exact(chunk.dimension())
                .enumerate()
                .filter_map(|(row, vector)| {
                    let owner = self.ids.id_at(start.offset(row))?;
                    if fresh.contains_key(owner) {
                        return None;
                    }
                    let scores: Vec<f32> = batch.iter().map(|v| dot(vector, v)).collect();
                    let against_batch =
                        rank_scores(&scores, |p| batch_ids.get(p.index()), mode, cap, None);
                    let old = self.sims.get(owner).map(Vec::as_slice).unwrap_or(&[]);
                    Some((owner.clone(), merge_sims(old, against_batch, cap, keep_old)))
                })
                .collect();
            updates.extend(merged);
        }

        debug!("Old pass updated {} existing documents", updates.len());
        Ok(updates)
    }

    /// Ranks each new document against the stored vectors and the batch.
    ///
    /// Batch document `j` is addressed as position `base_len + j`, which is
    /// where publish will put it.
    fn rank_fresh(
        &self,
        fresh: &BTreeMap<DocumentId, Document>,
        batch_ids: &[DocumentId],
        batch: &[Vec<f32>],
        base_len: u64,
    ) -> IndexResult<Vec<(DocumentId, Sims)>> {
        let cap = self.config.top_sims;
        let mode = self.config.score_mode;
        let include_self = self.config.include_self;
        let resolve = |p: Position| {
            if p.get() < base_len {
                self.ids.id_at(p).filter(|owner| !fresh.contains_key(*owner))
            } else {
                batch_ids.get((p.get() - base_len) as usize)
            }
        };

        let chunk_size = self.config.chunk_size;
        let mut entries = Vec::with_capacity(batch.len());
        for (chunk_index, queries) in batch.chunks(chunk_size).enumerate() {
            let stored_scores = match &self.store {
                Some(store) => store.score_against(queries, QueryNorm::AsIs)?,
                None => vec![Vec::new(); queries.len()],
            };

            let first = chunk_index * chunk_size;
            let ranked: Vec<(DocumentId, Sims)> = queries
                .par_iter()
                .zip(stored_scores.into_par_iter())
                .enumerate()
                .map(|(k, (query, mut raw))| {
                    let j = first + k;
                    raw.extend(batch.iter().map(|v| dot(query, v)));
                    let exclude = (!include_self).then(|| Position::new(base_len + j as u64));
                    (
                        batch_ids[j].clone(),
                        rank_scores(&raw, resolve, mode, cap, exclude),
                    )
                })
                .collect();
            entries.extend(ranked);
        }

        debug!("New pass ranked {} documents", entries.len());
        Ok(entries)
    }

    /// Applies a staged batch.
    ///
    /// Fails with [`IndexError::StaleBatch`] if the store changed since
    /// [`prepare`](Self::prepare). On any failure the index is left as it was.
    pub fn publish(&mut self, staged: StagedBatch) -> IndexResult<()> {
        if staged.is_empty() {
            return Ok(());
        }

        let current = self.stored_len();
        if current != staged.base_len {
            return Err(IndexError::StaleBatch {
                expected: staged.base_len,
                actual: current,
            });
        }

        let created = self.store.is_none();
        if created {
            let dimension = VectorDimension::new(staged.dimension)?;
            self.store = Some(VectorStore::create(
                &self.root,
                dimension,
                self.config.shard_size,
            )?);
            self.manifest = Some(IndexManifest::new(
                staged.dimension,
                self.config.shard_size,
                self.config.precompute,
                self.config.score_mode,
                self.config.top_sims,
                self.config.include_self,
                None,
            ));
        }

        let appended = match self.store.as_mut() {
            Some(store) => store.append_batch(&staged.vectors),
            None => return Err(IndexError::Uninitialized),
        };
        let range = match appended {
            Ok(range) => range,
            Err(e) => {
                self.discard_append(staged.base_len, created);
                return Err(e.into());
            }
        };

        let batch_len = staged.ids.len();
        let mut id_undo = Vec::with_capacity(batch_len);
        for (offset, id) in staged.ids.into_iter().enumerate() {
            let previous = self.ids.insert(id.clone(), range.start.offset(offset));
            if let Some(old) = previous {
                warn!("Replacing existing document '{id}', position {old} becomes a ghost");
            }
            id_undo.push((id, previous));
        }

        let mut cache_undo = Vec::with_capacity(staged.updates.len() + staged.fresh_entries.len());
        for (id, sims) in staged.updates.into_iter().chain(staged.fresh_entries) {
            let previous = self.sims.set(id.clone(), sims);
            cache_undo.push((id, previous));
        }

        if let Err(e) = self.save(Some(&staged.model_name)) {
            error!("Saving the index failed, rolling back the batch: {e}");
            for (id, previous) in cache_undo.into_iter().rev() {
                match previous {
                    Some(sims) => {
                        self.sims.set(id, sims);
                    }
                    None => {
                        self.sims.remove(&id);
                    }
                }
            }
            for (id, previous) in id_undo.into_iter().rev() {
                match previous {
                    Some(position) => {
                        self.ids.insert(id, position);
                    }
                    None => {
                        self.ids.remove(&id);
                    }
                }
            }
            self.ids.rebuild_inverse();
            self.discard_append(staged.base_len, created);
            return Err(e);
        }

        info!(
            "Added {batch_len} documents, index holds {} ({} stored vectors)",
            self.ids.len(),
            self.stored_len()
        );
        Ok(())
    }

    fn discard_append(&mut self, base_len: u64, created: bool) {
        if created {
            if let Some(mut store) = self.store.take() {
                if let Err(e) = store.truncate(0) {
                    error!("Failed to remove vectors of an unpublished index: {e}");
                }
            }
            self.manifest = None;
        } else if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.truncate(base_len) {
                error!("Failed to roll back the vector store to {base_len} vectors: {e}");
            }
        }
    }

    /// Removes documents.
    ///
    /// Every id must be live; otherwise nothing is deleted and
    /// [`IndexError::NotFound`] lists the missing ones. Other documents'
    /// cached lists keep naming the deleted ids until they are read or merged.
    pub fn delete(&mut self, ids: &[DocumentId]) -> IndexResult<usize> {
        if self.store.is_none() {
            return Err(IndexError::Uninitialized);
        }

        let unique: BTreeSet<&DocumentId> = ids.iter().collect();
        let missing: Vec<DocumentId> = unique
            .iter()
            .filter(|id| !self.ids.contains(id))
            .map(|id| (*id).clone())
            .collect();
        if !missing.is_empty() {
            return Err(IndexError::NotFound { ids: missing });
        }
        if unique.is_empty() {
            return Ok(0);
        }

        let removed = self.detach_documents(unique);
        let count = removed.len();
        self.ids.rebuild_inverse();
        if let Err(e) = self.ids.verify() {
            error!("Identity map inconsistent after delete, restoring {count} documents: {e}");
            self.restore_documents(removed);
            return Err(e);
        }

        if let Err(e) = self.save(None) {
            error!("Saving the index failed, restoring {count} deleted documents: {e}");
            self.restore_documents(removed);
            return Err(e);
        }

        info!("Deleted {count} documents, {} remain", self.ids.len());
        Ok(count)
    }

    /// Removes `ids` from the identity map and the cache, returning what
    /// [`restore_documents`](Self::restore_documents) needs to undo it.
    fn detach_documents<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a DocumentId>,
    ) -> Vec<(DocumentId, Position, Option<Sims>)> {
        ids.into_iter()
            .filter_map(|id| {
                let position = self.ids.remove(id)?;
                Some((id.clone(), position, self.sims.remove(id)))
            })
            .collect()
    }

    fn restore_documents(&mut self, removed: Vec<(DocumentId, Position, Option<Sims>)>) {
        for (id, position, sims) in removed {
            if let Some(sims) = sims {
                self.sims.set(id.clone(), sims);
            }
            self.ids.insert(id, position);
        }
        self.ids.rebuild_inverse();
    }

    /// Ranked peers of an indexed document.
    pub fn sims_by_id(&self, id: &DocumentId) -> IndexResult<Sims> {
        let store = self.store.as_ref().ok_or(IndexError::Uninitialized)?;
        let position = self.ids.position(id).ok_or_else(|| IndexError::NotFound {
            ids: vec![id.clone()],
        })?;

        if self.config.precompute {
            // Deleting a document does not touch other lists. Dead peers are
            // dropped here, so a list may hold fewer than top_sims live peers
            // until a later batch refills it.
            if let Some(sims) = self.sims.live_entry(id, |peer| self.ids.contains(peer)) {
                return Ok(sims);
            }
        }

        let vector = store.vector(position)?;
        let mut scores = store.score_against(&[vector], QueryNorm::AsIs)?;
        let raw = scores.pop().unwrap_or_default();
        let exclude = (!self.config.include_self).then_some(position);
        Ok(rank_scores(
            &raw,
            |p| self.ids.id_at(p),
            self.config.score_mode,
            self.config.top_sims,
            exclude,
        ))
    }

    /// Ranked documents most similar to an arbitrary vector.
    pub fn sims_by_vector(&self, vector: &[f32]) -> IndexResult<Sims> {
        let store = self.store.as_ref().ok_or(IndexError::Uninitialized)?;
        store.dimension().validate_vector(vector)?;

        let mut scores = store.score_against(&[vector.to_vec()], QueryNorm::Normalize)?;
        let raw = scores.pop().unwrap_or_default();
        Ok(rank_scores(
            &raw,
            |p| self.ids.id_at(p),
            self.config.score_mode,
            self.config.top_sims,
            None,
        ))
    }

    /// Ranked documents most similar to a document that is not stored.
    pub fn sims_by_doc(&self, doc: &Document, model: &dyn SemanticModel) -> IndexResult<Sims> {
        let vector = model.doc2vec(doc)?;
        self.sims_by_vector(&vector)
    }

    /// Dispatches `query`, then keeps results while `score >= min_score`,
    /// at most `max_results` of them (0 for no limit).
    pub fn find_similar(
        &self,
        query: &Query,
        model: Option<&dyn SemanticModel>,
        min_score: f32,
        max_results: usize,
    ) -> IndexResult<Sims> {
        let sims = match query {
            Query::Id(id) => self.sims_by_id(id)?,
            Query::Document(doc) => {
                let model = model.ok_or(IndexError::NoModel)?;
                self.sims_by_doc(doc, model)?
            }
        };
        Ok(apply_find_filter(sims, min_score, max_results))
    }

    fn save(&mut self, model_name: Option<&str>) -> IndexResult<()> {
        let (Some(store), Some(current)) = (&self.store, &self.manifest) else {
            return Err(IndexError::Uninitialized);
        };

        let mut manifest = current.clone();
        manifest.generation += 1;
        if let Some(name) = model_name {
            manifest.model_name = Some(name.to_string());
        }
        let previous_state = current.state_file.clone();

        let state = persistence::save_state(&self.root, manifest.generation, &self.ids, &self.sims)?;
        manifest.commit(store.len(), self.ids.len(), state);

        if let Err(e) = manifest.save(&self.root) {
            let orphan = self.root.join(&manifest.state_file);
            if let Err(remove_err) = std::fs::remove_file(&orphan) {
                warn!("Failed to remove {}: {remove_err}", orphan.display());
            }
            return Err(e);
        }

        if !previous_state.is_empty() && previous_state != manifest.state_file {
            let old = self.root.join(&previous_state);
            if let Err(e) = std::fs::remove_file(&old) {
                warn!("Failed to remove old state file {}: {e}", old.display());
            }
        }

        debug!("Saved index generation {}", manifest.generation);
        self.manifest = Some(manifest);
        Ok(())
    }

    fn reconcile(mut config: IndexConfig, manifest: &IndexManifest) -> IndexConfig {
        macro_rules! persisted {
            ($field:ident) => {
                if config.$field != manifest.$field {
                    warn!(
                        "Index was built with {} = {:?}, ignoring configured {:?}",
                        stringify!($field),
                        manifest.$field,
                        config.$field
                    );
                    config.$field = manifest.$field;
                }
            };
        }
        persisted!(shard_size);
        persisted!(top_sims);
        persisted!(precompute);
        persisted!(score_mode);
        persisted!(include_self);
        config
    }

    fn remove_stale_state_files(root: &Path, keep: &str) {
        let Ok(entries) = std::fs::read_dir(root) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with("state_") && name.ends_with(".bin") && name != keep {
                debug!("Removing stale state file {name}");
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!("Failed to remove stale state file {name}: {e}");
                }
            }
        }
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of stored vectors, ghosts included.
    pub fn stored_len(&self) -> u64 {
        self.store.as_ref().map_or(0, VectorStore::len)
    }

    /// Slots held by deleted or replaced documents. They are never reclaimed.
    pub fn ghost_count(&self) -> u64 {
        self.stored_len() - self.ids.len() as u64
    }

    pub fn is_initialized(&self) -> bool {
        self.store.is_some()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.ids.contains(id)
    }

    pub fn dimension(&self) -> Option<usize> {
        self.store.as_ref().map(|store| store.dimension().get())
    }

    pub fn shard_count(&self) -> usize {
        self.store.as_ref().map_or(0, VectorStore::shard_count)
    }

    /// Model recorded by the last published batch.
    pub fn model_name(&self) -> Option<&str> {
        self.manifest.as_ref().and_then(|m| m.model_name.as_deref())
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> Option<&IndexManifest> {
        self.manifest.as_ref()
    }
}
