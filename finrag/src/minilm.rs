//! Local ONNX embedding provider using `fastembed`.
//!
//! This module is only available when the `fastembed` feature is enabled.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::{debug, info};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

/// Model identifier of [`FastEmbedProvider`].
pub const MINILM_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

const MINILM_DIMENSIONS: usize = 384;

/// An [`EmbeddingProvider`] running `all-MiniLM-L6-v2` on the CPU.
///
/// Inference is synchronous inside `fastembed`, so every call is moved onto
/// a blocking thread.
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
}

impl FastEmbedProvider {
    /// Load the model, downloading it into the local cache on first use.
    pub async fn new() -> Result<Self> {
        let model = tokio::task::spawn_blocking(|| {
            info!(model = MINILM_MODEL_ID, "loading embedding model");
            TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
        })
        .await
        .map_err(|e| embedding_error(format!("model loading task failed: {e}")))?
        .map_err(|e| embedding_error(format!("failed to load model: {e}")))?;

        Ok(Self { model: Arc::new(Mutex::new(model)) })
    }
}

fn embedding_error(message: String) -> RagError {
    RagError::EmbeddingError { provider: MINILM_MODEL_ID.into(), message }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| embedding_error("model returned no embedding".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(embedding_error("input text is empty".into()));
        }
        debug!(provider = MINILM_MODEL_ID, batch_size = texts.len(), "embedding batch");

        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || {
            let mut guard =
                model.lock().map_err(|_| embedding_error("model lock poisoned".into()))?;
            guard.embed(owned, None).map_err(|e| embedding_error(format!("inference failed: {e}")))
        })
        .await
        .map_err(|e| embedding_error(format!("embedding task failed: {e}")))?
    }

    fn dimensions(&self) -> usize {
        MINILM_DIMENSIONS
    }

    fn model_id(&self) -> &str {
        MINILM_MODEL_ID
    }
}
