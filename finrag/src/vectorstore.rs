//! Vector index trait for storing and searching chunk embeddings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{IndexEntry, RetrievalResult};
use crate::error::Result;

/// Current on-disk layout version.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Identifies which embedding model an index was built with.
///
/// An index only ever holds vectors from one model at one dimensionality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Layout version of the persisted files.
    pub format_version: u32,
    /// The embedding model's identifier.
    pub model_id: String,
    /// The embedding dimensionality.
    pub dimensions: usize,
}

impl IndexManifest {
    /// Create a manifest for the current layout version.
    pub fn new(model_id: impl Into<String>, dimensions: usize) -> Self {
        Self { format_version: INDEX_FORMAT_VERSION, model_id: model_id.into(), dimensions }
    }
}

/// Summary counters for an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of stored chunks.
    pub entry_count: usize,
    /// Number of distinct documents.
    pub document_count: usize,
    /// Embedding dimensionality.
    pub dimensions: usize,
    /// Embedding model identifier.
    pub model_id: String,
}

/// A storage backend for chunk embeddings with cosine-similarity search.
///
/// `upsert`, `delete_document`, and `reset` are the only mutations and must
/// be atomic with respect to concurrent `search` calls.
///
/// # Example
///
/// ```rust,ignore
/// use finrag::{InMemoryVectorIndex, IndexManifest, VectorIndex};
///
/// let index = InMemoryVectorIndex::new(IndexManifest::new("finrag-hash-v1", 384));
/// index.upsert(entries).await?;
/// let results = index.search(&query_embedding, 5).await?;
/// ```
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The model and dimensionality this index accepts.
    fn manifest(&self) -> &IndexManifest;

    /// Insert entries, replacing every previously stored chunk of each
    /// document that appears in `entries`.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Return at most `top_k` entries by descending cosine similarity,
    /// ties broken by insertion order.
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<RetrievalResult>;

    /// Remove all chunks of a document. Returns how many were removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    /// Remove every entry.
    async fn reset(&self) -> Result<()>;

    /// Number of stored entries.
    async fn len(&self) -> usize;

    /// Whether the index holds no entries.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Summary counters.
    async fn stats(&self) -> IndexStats;
}
