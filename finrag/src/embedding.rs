//! Embedding providers for generating vector embeddings from text.
//!
//! Embedding always runs in-process on the CPU; it never touches the
//! inference backend, so ingestion keeps working when the language model is
//! unreachable.

use std::collections::BTreeMap;
use std::hash::Hasher;

use async_trait::async_trait;
use fnv::FnvHasher;
use tracing::debug;

use crate::error::{RagError, Result};

/// Model identifier of [`HashingEmbedder`].
pub const HASHING_MODEL_ID: &str = "finrag-hash-v1";

/// Default dimensionality of [`HashingEmbedder`].
pub const HASHING_DIMENSIONS: usize = 384;

const STOP_WORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "been", "but", "by", "can",
    "could", "did", "do", "does", "for", "from", "had", "has", "have", "he", "her", "his", "how",
    "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not", "of", "on", "or", "our",
    "she", "so", "than", "that", "the", "their", "them", "there", "these", "they", "this",
    "those", "to", "us", "was", "we", "were", "what", "when", "where", "which", "who", "whom",
    "why", "will", "with", "would", "you", "your",
];

/// A provider that generates vector embeddings from text input.
///
/// Implementations must be deterministic: the same text always yields the
/// same vector. The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use finrag::{EmbeddingProvider, HashingEmbedder};
///
/// let provider = HashingEmbedder::new();
/// let embedding = provider.embed("payment term of 30 days").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs, preserving order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Return the identifier of the pinned model.
    fn model_id(&self) -> &str;
}

/// A deterministic signed feature-hashing embedder.
///
/// Lower-cased word tokens (stop-words removed, trailing plural `s` folded)
/// are hashed with FNV-1a into a fixed number of buckets, weighted by
/// `1 + ln(tf)`, and the vector is L2-normalized. Text without any word
/// token is embedded from its character trigrams instead.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: HASHING_DIMENSIONS }
    }
}

impl HashingEmbedder {
    /// Create an embedder with [`HASHING_DIMENSIONS`] buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an embedder with a custom number of buckets.
    pub fn with_dimensions(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagError::ConfigError("embedding dimensions must be non-zero".into()));
        }
        Ok(Self { dimensions })
    }

    /// Embed synchronously.
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::EmbeddingError {
                provider: HASHING_MODEL_ID.into(),
                message: "input text is empty".into(),
            });
        }

        let mut features = term_frequencies(text);
        if features.is_empty() {
            features = trigram_frequencies(text);
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for (feature, count) in &features {
            let mut hasher = FnvHasher::default();
            hasher.write(feature.as_bytes());
            let hash = hasher.finish();
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 63) == 1 { -1.0 } else { 1.0 };
            vector[bucket] += sign * (1.0 + (*count as f32).ln());
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

/// Content-word counts, ordered so float accumulation order is fixed.
fn term_frequencies(text: &str) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let token = raw.to_lowercase();
        if STOP_WORDS.contains(&token.as_str()) {
            continue;
        }
        *counts.entry(fold_plural(token)).or_insert(0) += 1;
    }
    counts
}

fn fold_plural(mut token: String) -> String {
    if token.chars().count() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token.pop();
    }
    token
}

fn trigram_frequencies(text: &str) -> BTreeMap<String, u32> {
    let chars: Vec<char> = text.trim().to_lowercase().chars().collect();
    let mut counts = BTreeMap::new();
    if chars.len() < 3 {
        counts.insert(chars.iter().collect(), 1);
        return counts;
    }
    for window in chars.windows(3) {
        *counts.entry(window.iter().collect()).or_insert(0) += 1;
    }
    counts
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_text(text)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        debug!(provider = HASHING_MODEL_ID, batch_size = texts.len(), "embedding batch");
        texts.iter().map(|text| self.embed_text(text)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        HASHING_MODEL_ID
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
