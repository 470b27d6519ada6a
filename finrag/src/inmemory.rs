//! In-memory vector index using cosine similarity.
//!
//! This module provides [`InMemoryVectorIndex`], a vector index backed by a
//! `BTreeMap` keyed by insertion sequence and protected by a
//! `tokio::sync::RwLock`. Searches take the read lock; every mutation takes
//! the write lock for its whole duration, so a search never observes a
//! half-applied upsert. [`IndexStore`](crate::persistence::IndexStore) adds
//! durability on top of it.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{IndexEntry, RetrievalResult, SearchResult};
use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::vectorstore::{IndexManifest, IndexStats, VectorIndex};

const BACKEND: &str = "InMemory";

#[derive(Debug, Default)]
struct IndexState {
    /// Insertion sequence → entry; iteration order is insertion order.
    entries: BTreeMap<u64, IndexEntry>,
    /// Document id → sequences of its chunks.
    documents: HashMap<String, Vec<u64>>,
    next_seq: u64,
    /// Bumped on every mutation; used to detect unflushed changes.
    revision: u64,
}

impl IndexState {
    fn remove_document(&mut self, document_id: &str) -> usize {
        let Some(seqs) = self.documents.remove(document_id) else {
            return 0;
        };
        for seq in &seqs {
            self.entries.remove(seq);
        }
        seqs.len()
    }

    fn insert(&mut self, entry: IndexEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.documents.entry(entry.chunk.document_id.clone()).or_default().push(seq);
        self.entries.insert(seq, entry);
    }
}

/// An in-memory vector index using cosine similarity for search.
#[derive(Debug)]
pub struct InMemoryVectorIndex {
    manifest: IndexManifest,
    state: RwLock<IndexState>,
}

impl InMemoryVectorIndex {
    /// Create a new empty index for the given model and dimensionality.
    pub fn new(manifest: IndexManifest) -> Self {
        Self { manifest, state: RwLock::new(IndexState::default()) }
    }

    /// Rebuild an index from entries listed in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexCorruption`] if any entry's dimensionality
    /// disagrees with the manifest.
    pub fn from_entries(manifest: IndexManifest, entries: Vec<IndexEntry>) -> Result<Self> {
        let mut state = IndexState::default();
        for entry in entries {
            if entry.embedding.len() != manifest.dimensions {
                return Err(RagError::IndexCorruption(format!(
                    "entry '{}' has {} dimensions, manifest declares {}",
                    entry.chunk.id(),
                    entry.embedding.len(),
                    manifest.dimensions
                )));
            }
            state.insert(entry);
        }
        Ok(Self { manifest, state: RwLock::new(state) })
    }

    /// Copy out all entries in insertion order, with the current revision.
    pub(crate) async fn snapshot(&self) -> (u64, Vec<IndexEntry>) {
        let state = self.state.read().await;
        (state.revision, state.entries.values().cloned().collect())
    }

    /// Like [`snapshot`](Self::snapshot) but without awaiting; `None` while a
    /// writer holds the lock.
    pub(crate) fn try_snapshot(&self) -> Option<(u64, Vec<IndexEntry>)> {
        let state = self.state.try_read().ok()?;
        Some((state.revision, state.entries.values().cloned().collect()))
    }

    pub(crate) async fn revision(&self) -> u64 {
        self.state.read().await.revision
    }

    fn check_dimensions(&self, len: usize, what: &str) -> Result<()> {
        if len != self.manifest.dimensions {
            return Err(RagError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: format!(
                    "{what} has {len} dimensions, index expects {}",
                    self.manifest.dimensions
                ),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        // Validate everything before touching state so a bad entry commits nothing.
        for entry in &entries {
            self.check_dimensions(entry.embedding.len(), &format!("entry '{}'", entry.chunk.id()))?;
        }

        let documents: HashSet<String> =
            entries.iter().map(|e| e.chunk.document_id.clone()).collect();

        // Later duplicates of the same chunk identity win.
        let mut latest: HashMap<String, usize> = HashMap::new();
        for (position, entry) in entries.iter().enumerate() {
            latest.insert(entry.chunk.id(), position);
        }

        let mut state = self.state.write().await;
        let mut replaced = 0;
        for document_id in &documents {
            replaced += state.remove_document(document_id);
        }
        let mut inserted = 0;
        for (position, entry) in entries.into_iter().enumerate() {
            if latest.get(&entry.chunk.id()) == Some(&position) {
                state.insert(entry);
                inserted += 1;
            }
        }
        state.revision += 1;

        debug!(backend = BACKEND, inserted, replaced, "upserted entries");
        Ok(())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<RetrievalResult> {
        if top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        self.check_dimensions(embedding.len(), "query embedding")?;

        let state = self.state.read().await;
        let mut scored: Vec<SearchResult> = state
            .entries
            .values()
            .filter(|entry| entry.embedding.len() == embedding.len())
            .map(|entry| SearchResult {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(&entry.embedding, embedding),
            })
            .collect();

        // `sort_by` is stable, so equal scores keep insertion order.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(RetrievalResult::new(scored))
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let removed = state.remove_document(document_id);
        if removed > 0 {
            state.revision += 1;
        }
        Ok(removed)
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.documents.clear();
        state.revision += 1;
        Ok(())
    }

    async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    async fn stats(&self) -> IndexStats {
        let state = self.state.read().await;
        IndexStats {
            entry_count: state.entries.len(),
            document_count: state.documents.len(),
            dimensions: self.manifest.dimensions,
            model_id: self.manifest.model_id.clone(),
        }
    }
}
