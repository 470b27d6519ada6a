//! Error types for the `finrag` crate.

use thiserror::Error;

/// Errors that can occur in ingestion, retrieval, and answer composition.
///
/// "No relevant information" is deliberately absent: an empty retrieval is a
/// successful outcome, not an error.
#[derive(Debug, Error)]
pub enum RagError {
    /// The document's format tag is not PDF or DOCX.
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// Text extraction from the binary payload failed or yielded no text.
    #[error("Extraction error ({document_id}): {message}")]
    ExtractionError {
        /// The document being extracted.
        document_id: String,
        /// A description of the failure.
        message: String,
    },

    /// The payload exceeds the configured size limit.
    #[error("Document '{document_id}' is {size} bytes, exceeding the {limit} byte limit")]
    DocumentTooLarge {
        /// The rejected document.
        document_id: String,
        /// Payload size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The persisted index disagrees with the expected model, dimension, or layout.
    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    /// An error occurred in the vector index backend.
    #[error("Vector index error ({backend}): {message}")]
    VectorStoreError {
        /// The index backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// Every inference attempt timed out.
    #[error("Inference timed out after {attempts} attempt(s) ({backend})")]
    InferenceTimeout {
        /// The backend that timed out.
        backend: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The remote backend rejected the credentials.
    #[error("Inference authentication failed ({backend}): {message}")]
    InferenceAuthError {
        /// The backend that rejected the request.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The backend could not produce a usable completion after all retries.
    #[error("Inference backend unavailable after {attempts} attempt(s) ({backend}): {message}")]
    InferenceUnavailable {
        /// The unavailable backend.
        backend: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last transport failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A filesystem error outside index decoding.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A stable tag for each [`RagError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedFormat,
    ExtractionError,
    DocumentTooLarge,
    EmbeddingError,
    IndexCorruption,
    VectorStoreError,
    InferenceTimeout,
    InferenceAuthError,
    InferenceUnavailable,
    ConfigError,
    Io,
}

impl RagError {
    /// Return the taxonomy tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::ExtractionError { .. } => ErrorKind::ExtractionError,
            Self::DocumentTooLarge { .. } => ErrorKind::DocumentTooLarge,
            Self::EmbeddingError { .. } => ErrorKind::EmbeddingError,
            Self::IndexCorruption(_) => ErrorKind::IndexCorruption,
            Self::VectorStoreError { .. } => ErrorKind::VectorStoreError,
            Self::InferenceTimeout { .. } => ErrorKind::InferenceTimeout,
            Self::InferenceAuthError { .. } => ErrorKind::InferenceAuthError,
            Self::InferenceUnavailable { .. } => ErrorKind::InferenceUnavailable,
            Self::ConfigError(_) => ErrorKind::ConfigError,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether this error came from the inference backend.
    pub fn is_inference(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InferenceTimeout
                | ErrorKind::InferenceAuthError
                | ErrorKind::InferenceUnavailable
        )
    }

    /// A message suitable for showing to an end user, distinct per kind.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::UnsupportedFormat => "Only PDF and DOCX documents are supported.",
            ErrorKind::ExtractionError => "No readable text could be extracted from the document.",
            ErrorKind::DocumentTooLarge => "The document exceeds the maximum allowed size.",
            ErrorKind::EmbeddingError => "The text could not be processed for search.",
            ErrorKind::IndexCorruption => {
                "The document index is damaged or was built with a different embedding model."
            }
            ErrorKind::VectorStoreError => "The document index could not be accessed.",
            ErrorKind::InferenceTimeout => {
                "The language model did not respond in time. Please try again later."
            }
            ErrorKind::InferenceAuthError => {
                "The language model service rejected the configured credentials."
            }
            ErrorKind::InferenceUnavailable => {
                "The language model service is currently unavailable. Please try again later."
            }
            ErrorKind::ConfigError => "The system is misconfigured.",
            ErrorKind::Io => "A storage error occurred.",
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn user_messages_are_distinct_per_kind() {
        let errors = vec![
            RagError::UnsupportedFormat("txt".into()),
            RagError::ExtractionError { document_id: "d".into(), message: "empty".into() },
            RagError::DocumentTooLarge { document_id: "d".into(), size: 2, limit: 1 },
            RagError::EmbeddingError { provider: "p".into(), message: "m".into() },
            RagError::IndexCorruption("bad".into()),
            RagError::VectorStoreError { backend: "b".into(), message: "m".into() },
            RagError::InferenceTimeout { backend: "b".into(), attempts: 3 },
            RagError::InferenceAuthError { backend: "b".into(), message: "m".into() },
            RagError::InferenceUnavailable {
                backend: "b".into(),
                attempts: 3,
                message: "m".into(),
            },
            RagError::ConfigError("c".into()),
            RagError::Io(std::io::Error::other("disk")),
        ];
        let messages: HashSet<&str> = errors.iter().map(RagError::user_message).collect();
        assert_eq!(messages.len(), errors.len());
    }

    #[test]
    fn inference_kinds_are_flagged() {
        assert!(RagError::InferenceTimeout { backend: "b".into(), attempts: 1 }.is_inference());
        assert!(!RagError::ConfigError("x".into()).is_inference());
    }
}
