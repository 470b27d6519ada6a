//! Configuration for chunking, retrieval, and ingestion limits.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Default minimum cosine similarity for a chunk to count as relevant.
///
/// Tuned for the default [`HashingEmbedder`](crate::HashingEmbedder): a query
/// sharing no content words with a chunk scores near zero, while a chunk that
/// repeats the query's key terms scores well above this value.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.25;

/// Default upload size limit (10 MiB).
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;

/// Chunk geometry, retrieval defaults, and the upload limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Upper bound on a chunk's length, counted in characters.
    pub chunk_size: usize,
    /// Characters repeated at the start of each chunk from its predecessor.
    pub chunk_overlap: usize,
    /// Candidates fetched from the index per question.
    pub top_k: usize,
    /// Cosine similarity a candidate needs to be used as context.
    pub similarity_threshold: f32,
    /// Largest accepted document payload in bytes.
    pub max_document_bytes: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 4,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

impl RagConfig {
    /// Start from the defaults.
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Re-run builder validation on an existing value (e.g. one deserialized from disk).
    pub fn validate(&self) -> Result<()> {
        RagConfigBuilder { config: self.clone() }.build().map(|_| ())
    }
}

/// Validating builder for [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Chunk length limit in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Characters shared by neighbouring chunks.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Candidates fetched per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Minimum cosine similarity for context.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the largest accepted document payload in bytes.
    pub fn max_document_bytes(mut self, limit: usize) -> Self {
        self.config.max_document_bytes = limit;
        self
    }

    /// Finish the configuration.
    ///
    /// # Errors
    ///
    /// [`RagError::ConfigError`] when
    /// - `chunk_size == 0`
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `similarity_threshold` is not within `[-1.0, 1.0]`
    /// - `max_document_bytes == 0`
    pub fn build(self) -> Result<RagConfig> {
        if self.config.chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if self.config.chunk_overlap >= self.config.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.config.chunk_overlap, self.config.chunk_size
            )));
        }
        if self.config.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        validate_threshold(self.config.similarity_threshold)?;
        if self.config.max_document_bytes == 0 {
            return Err(RagError::ConfigError(
                "max_document_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(self.config)
    }
}

/// Check that a similarity threshold lies within the cosine range.
pub(crate) fn validate_threshold(threshold: f32) -> Result<()> {
    if !(-1.0..=1.0).contains(&threshold) {
        return Err(RagError::ConfigError(format!(
            "similarity_threshold ({threshold}) must be within [-1.0, 1.0]"
        )));
    }
    Ok(())
}
