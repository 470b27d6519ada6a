//! Query-side retrieval: embed, search, threshold.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::validate_threshold;
use crate::document::RetrievalResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::vectorstore::VectorIndex;

/// Finds the chunks relevant to a question.
///
/// A result list that is empty after thresholding is a normal outcome: it
/// means the index holds nothing relevant to the question.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    /// Create a retriever over `index`, embedding queries with `embedder`.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Embed `query`, take the `top_k` nearest chunks, and drop those
    /// scoring below `similarity_threshold`.
    ///
    /// # Errors
    ///
    /// - [`RagError::ConfigError`] if `top_k` is zero or the threshold is outside `[-1, 1]`
    /// - [`RagError::EmbeddingError`] if the query is empty
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        similarity_threshold: f32,
    ) -> Result<RetrievalResult> {
        if top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        validate_threshold(similarity_threshold)?;

        debug!(query, top_k, similarity_threshold, "retrieving");
        let embedding = self.embedder.embed(query).await?;
        let candidates = self.index.search(&embedding, top_k).await?;
        let candidate_count = candidates.len();

        let results: Vec<_> = candidates
            .results
            .into_iter()
            .filter(|r| r.score >= similarity_threshold)
            .collect();

        info!(candidate_count, result_count = results.len(), "retrieval completed");
        Ok(RetrievalResult::new(results))
    }

    /// The query embedder.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// The searched index.
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }
}
