//! # finrag
//!
//! Retrieval-augmented question answering over financial documents.
//!
//! ## Overview
//!
//! Documents (PDF or DOCX) are extracted, split into overlapping chunks,
//! embedded on the CPU, and stored in a vector index. A question is embedded
//! the same way, the nearest chunks above a similarity threshold become the
//! grounding context, and a language model behind an [`InferenceClient`]
//! writes the answer. When nothing clears the threshold the answer is
//! [`NO_RELEVANT_INFORMATION`] and the model is never called.
//!
//! ## Components
//!
//! - [`RecursiveChunker`]: separator-aware splitting with exact overlap
//! - [`EmbeddingProvider`] / [`HashingEmbedder`]: deterministic embeddings
//! - [`VectorIndex`] / [`InMemoryVectorIndex`]: cosine search, idempotent upsert
//! - [`IndexStore`]: durable, model-pinned index directories
//! - [`Retriever`]: embed, search, threshold
//! - [`InferenceClient`]: Ollama or RunPod, with timeout and bounded retry
//! - [`AnswerComposer`]: prompt building, citations, confidence
//! - [`RagService`]: the ingestion and query boundaries
//!
//! ## Features
//!
//! - `fastembed`: [`FastEmbedProvider`] running `all-MiniLM-L6-v2` locally
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use finrag::inference::{DeploymentConfig, InferenceClient};
//! use finrag::*;
//!
//! let embedder = Arc::new(HashingEmbedder::new());
//! let manifest = IndexManifest::new(embedder.model_id(), embedder.dimensions());
//! let handle = IndexStore::open("finrag_index", manifest).await?;
//!
//! let service = RagService::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(embedder)
//!     .vector_index(handle.index())
//!     .inference_client(Arc::new(InferenceClient::new(DeploymentConfig::from_env()?)?))
//!     .build()?;
//!
//! let answer = service.query(QueryRequest::new("What is the payment term?")).await?;
//! handle.close().await?;
//! ```

pub mod answer;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod inference;
pub mod inmemory;
pub mod persistence;
pub mod pipeline;
pub mod retriever;
pub mod vectorstore;

#[cfg(feature = "fastembed")]
pub mod minilm;

pub use answer::{Answer, AnswerComposer, NO_RELEVANT_INFORMATION, build_prompt};
pub use chunking::{Chunker, DEFAULT_SEPARATORS, RecursiveChunker, reassemble};
pub use config::{
    DEFAULT_MAX_DOCUMENT_BYTES, DEFAULT_SIMILARITY_THRESHOLD, RagConfig, RagConfigBuilder,
};
pub use document::{
    Chunk, Document, DocumentFormat, IndexEntry, RetrievalResult, SearchResult, SourceReference,
};
pub use embedding::{
    EmbeddingProvider, HASHING_DIMENSIONS, HASHING_MODEL_ID, HashingEmbedder, cosine_similarity,
};
pub use error::{ErrorKind, RagError, Result};
pub use extract::extract_document;
pub use inference::{DeploymentConfig, InferenceClient};
pub use inmemory::InMemoryVectorIndex;
pub use persistence::{IndexHandle, IndexStore};
pub use pipeline::{IngestReport, QueryRequest, RagService, RagServiceBuilder};
pub use retriever::Retriever;
pub use vectorstore::{INDEX_FORMAT_VERSION, IndexManifest, IndexStats, VectorIndex};

#[cfg(feature = "fastembed")]
pub use minilm::{FastEmbedProvider, MINILM_MODEL_ID};
