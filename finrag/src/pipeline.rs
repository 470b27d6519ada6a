//! The ingestion and query boundaries.
//!
//! [`RagService`] composes a [`Chunker`], an [`EmbeddingProvider`], a
//! [`VectorIndex`], and an [`InferenceClient`] into the two workflows:
//!
//! - ingestion: bytes → extract → chunk → embed → upsert
//! - query: embed → search → threshold → compose answer
//!
//! # Example
//!
//! ```rust,ignore
//! use finrag::{HashingEmbedder, InMemoryVectorIndex, IndexManifest, RagConfig, RagService};
//! use finrag::inference::{DeploymentConfig, InferenceClient};
//!
//! let embedder = Arc::new(HashingEmbedder::new());
//! let index = Arc::new(InMemoryVectorIndex::new(IndexManifest::new(
//!     embedder.model_id(),
//!     embedder.dimensions(),
//! )));
//! let service = RagService::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(embedder)
//!     .vector_index(index)
//!     .inference_client(Arc::new(InferenceClient::new(DeploymentConfig::from_env()?)?))
//!     .build()?;
//!
//! service.ingest_bytes("lease-2024", bytes, "pdf", Some("lease.pdf")).await?;
//! let answer = service.query(QueryRequest::new("What is the payment term?")).await?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::answer::{Answer, AnswerComposer};
use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::RagConfig;
use crate::document::{Document, IndexEntry, RetrievalResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extract::extract_document;
use crate::inference::InferenceClient;
use crate::retriever::Retriever;
use crate::vectorstore::{IndexStats, VectorIndex};

/// Outcome of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// The ingested document.
    pub document_id: String,
    /// Number of chunks now stored for it.
    pub chunk_count: usize,
}

/// A question with optional per-request retrieval overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// The question text.
    pub text: String,
    /// Overrides [`RagConfig::top_k`].
    pub top_k: Option<usize>,
    /// Overrides [`RagConfig::similarity_threshold`].
    pub similarity_threshold: Option<f32>,
}

impl QueryRequest {
    /// A request using the configured defaults.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), top_k: None, similarity_threshold: None }
    }

    /// Override the number of candidates.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Override the similarity threshold.
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }
}

/// Retrieval-augmented question answering over an index of documents.
///
/// Construct one via [`RagService::builder()`].
pub struct RagService {
    config: RagConfig,
    chunker: Arc<dyn Chunker>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_index: Arc<dyn VectorIndex>,
    inference: Arc<InferenceClient>,
    retriever: Retriever,
    composer: AnswerComposer,
}

impl RagService {
    /// Create a new [`RagServiceBuilder`].
    pub fn builder() -> RagServiceBuilder {
        RagServiceBuilder::default()
    }

    /// Return a reference to the service configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the vector index.
    pub fn vector_index(&self) -> &Arc<dyn VectorIndex> {
        &self.vector_index
    }

    /// Return the inference client, e.g. to reconfigure it.
    pub fn inference(&self) -> &Arc<InferenceClient> {
        &self.inference
    }

    /// Extract, chunk, embed, and store a binary document.
    ///
    /// `source_name` (typically the upload's file name) is recorded in the
    /// document and chunk metadata under `source`.
    ///
    /// # Errors
    ///
    /// [`RagError::DocumentTooLarge`], [`RagError::UnsupportedFormat`], or
    /// [`RagError::ExtractionError`] from extraction, then anything
    /// [`ingest_document`](Self::ingest_document) returns.
    pub async fn ingest_bytes(
        &self,
        document_id: &str,
        bytes: Vec<u8>,
        format_tag: &str,
        source_name: Option<&str>,
    ) -> Result<IngestReport> {
        let document = extract_document(
            document_id,
            bytes,
            format_tag,
            self.config.max_document_bytes,
            source_name,
        )
        .await
        .inspect_err(|e| {
            error!(document.id = %document_id, error = %e, "extraction failed during ingestion");
        })?;
        self.ingest_document(&document).await
    }

    /// Chunk, embed, and store an already-extracted document.
    ///
    /// Re-ingesting a document replaces its previous chunks. Nothing is
    /// stored unless every chunk embeds successfully.
    ///
    /// # Errors
    ///
    /// - [`RagError::ExtractionError`] if the document has no text
    /// - [`RagError::IndexCorruption`] if the index was built with another model
    /// - [`RagError::EmbeddingError`] if embedding fails
    pub async fn ingest_document(&self, document: &Document) -> Result<IngestReport> {
        self.check_model()?;

        let chunks = self.chunker.split(document)?;
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = self.embedding_provider.embed_batch(&texts).await.inspect_err(|e| {
            error!(document.id = %document.id, error = %e, "embedding failed during ingestion");
        })?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::EmbeddingError {
                provider: self.embedding_provider.model_id().to_string(),
                message: format!(
                    "expected {} embeddings, provider returned {}",
                    chunks.len(),
                    embeddings.len()
                ),
            });
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();
        let chunk_count = entries.len();

        self.vector_index.upsert(entries).await.inspect_err(|e| {
            error!(document.id = %document.id, error = %e, "upsert failed during ingestion");
        })?;

        info!(document.id = %document.id, format = %document.format, chunk_count, "ingested document");
        Ok(IngestReport { document_id: document.id.clone(), chunk_count })
    }

    /// Retrieve the context for a request without generating an answer.
    pub async fn retrieve(&self, request: &QueryRequest) -> Result<RetrievalResult> {
        let top_k = request.top_k.unwrap_or(self.config.top_k);
        let threshold = request.similarity_threshold.unwrap_or(self.config.similarity_threshold);
        self.retriever.retrieve(&request.text, top_k, threshold).await
    }

    /// Answer a question from the indexed documents.
    ///
    /// When nothing clears the similarity threshold the answer is
    /// [`NO_RELEVANT_INFORMATION`](crate::NO_RELEVANT_INFORMATION) and the
    /// model is not called.
    ///
    /// # Errors
    ///
    /// Retrieval parameter and embedding errors, or the inference error when
    /// the backend cannot produce a completion.
    pub async fn query(&self, request: QueryRequest) -> Result<Answer> {
        debug!(query = %request.text, "answering query");
        let context = self.retrieve(&request).await?;
        self.composer.compose(&request.text, &context).await.inspect_err(|e| {
            error!(error = %e, kind = ?e.kind(), "answer composition failed");
        })
    }

    /// Remove a document's chunks. Returns how many were removed.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let removed = self.vector_index.delete_document(document_id).await?;
        info!(document.id = %document_id, removed, "deleted document");
        Ok(removed)
    }

    /// Index counters.
    pub async fn stats(&self) -> IndexStats {
        self.vector_index.stats().await
    }

    /// Remove every indexed chunk.
    pub async fn reset(&self) -> Result<()> {
        self.vector_index.reset().await?;
        info!("index reset");
        Ok(())
    }

    /// Whether the active inference backend answers.
    pub async fn backend_healthy(&self) -> bool {
        self.inference.health_check().await
    }

    fn check_model(&self) -> Result<()> {
        check_model(self.embedding_provider.as_ref(), self.vector_index.as_ref())
    }
}

fn check_model(provider: &dyn EmbeddingProvider, index: &dyn VectorIndex) -> Result<()> {
    let manifest = index.manifest();
    if manifest.model_id != provider.model_id() || manifest.dimensions != provider.dimensions() {
        return Err(RagError::IndexCorruption(format!(
            "index expects model '{}' ({} dims), embedder is '{}' ({} dims)",
            manifest.model_id,
            manifest.dimensions,
            provider.model_id(),
            provider.dimensions()
        )));
    }
    Ok(())
}

/// Builder for constructing a [`RagService`].
///
/// All fields except `chunker` are required; the chunker defaults to a
/// [`RecursiveChunker`] using the configured chunk size and overlap.
#[derive(Default)]
pub struct RagServiceBuilder {
    config: Option<RagConfig>,
    chunker: Option<Arc<dyn Chunker>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    inference: Option<Arc<InferenceClient>>,
}

impl RagServiceBuilder {
    /// Set the service configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the default chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector index.
    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    /// Set the inference client.
    pub fn inference_client(mut self, client: Arc<InferenceClient>) -> Self {
        self.inference = Some(client);
        self
    }

    /// Build the [`RagService`].
    ///
    /// # Errors
    ///
    /// - [`RagError::ConfigError`] if a required field is missing or the config is invalid
    /// - [`RagError::IndexCorruption`] if the index was built with a different model
    pub fn build(self) -> Result<RagService> {
        let config =
            self.config.ok_or_else(|| RagError::ConfigError("config is required".to_string()))?;
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let vector_index = self
            .vector_index
            .ok_or_else(|| RagError::ConfigError("vector_index is required".to_string()))?;
        let inference = self
            .inference
            .ok_or_else(|| RagError::ConfigError("inference_client is required".to_string()))?;
        let chunker: Arc<dyn Chunker> = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(RecursiveChunker::from_config(&config)?),
        };
        check_model(embedding_provider.as_ref(), vector_index.as_ref())?;

        Ok(RagService {
            retriever: Retriever::new(Arc::clone(&embedding_provider), Arc::clone(&vector_index)),
            composer: AnswerComposer::new(Arc::clone(&inference)),
            config,
            chunker,
            embedding_provider,
            vector_index,
            inference,
        })
    }
}
