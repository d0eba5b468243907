//! Document server: buffers incoming documents and drives the index.
//!
//! One writer at a time. Indexing scores the batch under an upgradable read
//! lock, so queries keep running against the last published state, and only
//! takes the write lock to publish.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult};
use crate::index::{IndexManifest, SimilarityIndex};
use crate::semantic::SemanticModel;
use crate::types::{Query, Sims};
use crate::{Document, DocumentId};

/// Snapshot of the server state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub path: PathBuf,
    pub initialized: bool,
    pub documents: usize,
    pub stored_vectors: u64,
    pub ghost_slots: u64,
    pub shards: usize,
    pub dimension: Option<usize>,
    pub precompute: bool,
    pub top_sims: usize,
    pub score_mode: String,
    pub model: Option<String>,
    pub index_model: Option<String>,
    pub buffered: usize,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexServer(loc={}", self.path.display())?;
        if self.initialized {
            write!(
                f,
                ", index={} documents in {} vectors ({} ghosts, {} shards, dim {})",
                self.documents,
                self.stored_vectors,
                self.ghost_slots,
                self.shards,
                self.dimension.unwrap_or_default()
            )?;
        } else {
            write!(f, ", index=none")?;
        }
        match &self.model {
            Some(model) => write!(f, ", model={model}")?,
            None => write!(f, ", model=none")?,
        }
        write!(f, ", buffered={})", self.buffered)
    }
}

/// Buffers documents and sequences indexing, deletion and queries.
pub struct IndexServer {
    root: PathBuf,
    config: IndexConfig,
    index: RwLock<Option<SimilarityIndex>>,
    model: RwLock<Option<Arc<dyn SemanticModel>>>,
    buffer: Mutex<BTreeMap<DocumentId, Document>>,
}

impl IndexServer {
    /// Opens the server on `root`, loading the index if one was saved there.
    pub fn open(root: impl AsRef<Path>, config: IndexConfig) -> IndexResult<Self> {
        let root = root.as_ref().to_path_buf();
        let index = if IndexManifest::exists(&root) {
            Some(SimilarityIndex::open(&root, config.clone())?)
        } else {
            debug!("No index found at {}", root.display());
            None
        };

        Ok(Self {
            root,
            config,
            index: RwLock::new(index),
            model: RwLock::new(None),
            buffer: Mutex::new(BTreeMap::new()),
        })
    }

    /// Installs the semantic model, builder style.
    pub fn with_model(self, model: Arc<dyn SemanticModel>) -> Self {
        self.set_model(model);
        self
    }

    /// Replaces the semantic model.
    pub fn set_model(&self, model: Arc<dyn SemanticModel>) {
        info!("Using semantic model '{}'", model.name());
        *self.model.write() = Some(model);
    }

    pub fn model(&self) -> Option<Arc<dyn SemanticModel>> {
        self.model.read().clone()
    }

    /// Buffers documents for the next [`index`](Self::index) call.
    pub fn add_documents(&self, docs: impl IntoIterator<Item = Document>) {
        let mut buffer = self.buffer.lock();
        for doc in docs {
            debug!("Buffering document '{}'", doc.id);
            if buffer.contains_key(&doc.id) {
                warn!("Asked to re-add id '{}', rewriting the buffered document", doc.id);
            }
            buffer.insert(doc.id.clone(), doc);
        }
    }

    /// Number of buffered documents.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Drops all buffered documents.
    pub fn flush(&self) {
        let mut buffer = self.buffer.lock();
        if !buffer.is_empty() {
            debug!("Discarding {} buffered documents", buffer.len());
        }
        buffer.clear();
    }

    /// Indexes the buffered documents, or `corpus` in their place.
    ///
    /// The buffer keeps its documents if indexing fails.
    pub fn index(&self, corpus: Option<Vec<Document>>) -> IndexResult<usize> {
        let model = self.model().ok_or(IndexError::NoModel)?;

        // Upgradable reads exclude each other: one writer per buffer snapshot
        let guard = self.index.upgradable_read();
        if let Some(corpus) = corpus {
            self.flush();
            self.add_documents(corpus);
        }
        let batch = self.buffer.lock().clone();
        if batch.is_empty() {
            debug!("Nothing buffered to index");
            return Ok(0);
        }

        let guard = if guard.is_none() {
            let mut write = RwLockUpgradableReadGuard::upgrade(guard);
            info!("Starting a new index at {}", self.root.display());
            *write = Some(SimilarityIndex::create(&self.root, self.config.clone())?);
            RwLockWriteGuard::downgrade_to_upgradable(write)
        } else {
            guard
        };

        let staged = match guard.as_ref() {
            Some(index) => index.prepare(&batch, model.as_ref())?,
            None => return Err(IndexError::Uninitialized),
        };
        debug!(
            "Batch of {} documents changes the lists of {} indexed documents",
            staged.len(),
            staged.updated_documents()
        );

        let mut write = RwLockUpgradableReadGuard::upgrade(guard);
        match write.as_mut() {
            Some(index) => index.publish(staged)?,
            None => return Err(IndexError::Uninitialized),
        }

        // Documents re-added while the batch was in flight stay buffered
        self.buffer
            .lock()
            .retain(|id, doc| batch.get(id) != Some(doc));
        drop(write);
        Ok(batch.len())
    }

    /// Ranked documents similar to `query`.
    pub fn find_similar(
        &self,
        query: impl Into<Query>,
        min_score: f32,
        max_results: usize,
    ) -> IndexResult<Sims> {
        let query = query.into();
        debug!("Received query {query:?}");
        let model = self.model();
        let guard = self.index.read();
        let index = guard.as_ref().ok_or(IndexError::Uninitialized)?;
        index.find_similar(&query, model.as_deref(), min_score, max_results)
    }

    /// Removes documents from the index.
    pub fn delete(&self, ids: &[DocumentId]) -> IndexResult<usize> {
        let mut guard = self.index.write();
        let index = guard.as_mut().ok_or(IndexError::Uninitialized)?;
        index.delete(ids)
    }

    /// Removes the index and its files, and the model unless `keep_model`.
    ///
    /// Buffered documents are discarded too.
    pub fn drop_index(&self, keep_model: bool) -> IndexResult<()> {
        let mut guard = self.index.write();
        *guard = None;
        SimilarityIndex::remove_files(&self.root)?;
        info!("Dropped the index at {}", self.root.display());
        drop(guard);

        if !keep_model {
            *self.model.write() = None;
        }
        self.flush();
        Ok(())
    }

    pub fn status(&self) -> ServerStatus {
        let model = self.model().map(|m| m.name().to_string());
        let buffered = self.buffered();
        let guard = self.index.read();

        match guard.as_ref() {
            Some(index) => ServerStatus {
                path: self.root.clone(),
                initialized: index.is_initialized(),
                documents: index.len(),
                stored_vectors: index.stored_len(),
                ghost_slots: index.ghost_count(),
                shards: index.shard_count(),
                dimension: index.dimension(),
                precompute: index.config().precompute,
                top_sims: index.config().top_sims,
                score_mode: index.config().score_mode.to_string(),
                model,
                index_model: index.model_name().map(str::to_string),
                buffered,
            },
            None => ServerStatus {
                path: self.root.clone(),
                initialized: false,
                documents: 0,
                stored_vectors: 0,
                ghost_slots: 0,
                shards: 0,
                dimension: None,
                precompute: self.config.precompute,
                top_sims: self.config.top_sims,
                score_mode: self.config.score_mode.to_string(),
                model,
                index_model: None,
                buffered,
            },
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl fmt::Display for IndexServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status())
    }
}
