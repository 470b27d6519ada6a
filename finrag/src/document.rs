//! Data types for documents, chunks, index entries, and search results.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// The binary formats accepted at the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    /// Parse a format tag: an extension (`"pdf"`, `".DOCX"`) or a MIME type.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnsupportedFormat`] for any other tag.
    pub fn from_tag(tag: &str) -> Result<Self> {
        let normalized = tag.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "pdf" | "application/pdf" => Ok(Self::Pdf),
            "docx"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Ok(Self::Docx)
            }
            _ => Err(RagError::UnsupportedFormat(tag.to_string())),
        }
    }

    /// Derive the format from a file path's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            RagError::UnsupportedFormat(format!("{} has no extension", path.display()))
        })?;
        Self::from_tag(extension)
    }

    /// The canonical lowercase tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable source document with its extracted text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// The extracted text content of the document.
    pub text: String,
    /// The format the text was extracted from.
    pub format: DocumentFormat,
    /// When the document entered the system.
    pub uploaded_at: DateTime<Utc>,
    /// Key-value metadata associated with the document (e.g. `source`).
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document from already-extracted text, stamped with the current time.
    pub fn new(id: impl Into<String>, text: impl Into<String>, format: DocumentFormat) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            format,
            uploaded_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A contiguous span of a [`Document`]'s text.
///
/// Offsets are character (not byte) positions into the document text,
/// half-open: `start..end`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Position of this chunk within its document, starting at zero.
    pub ordinal: usize,
    /// The text content of the chunk.
    pub text: String,
    /// Character offset of the first character.
    pub start: usize,
    /// Character offset one past the last character.
    pub end: usize,
    /// Configured overlap with the preceding chunk (zero for the first chunk).
    pub overlap: usize,
    /// Metadata inherited from the parent document plus `chunk_index`.
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// The identity used for idempotent upserts: `{document_id}:{ordinal}`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.document_id, self.ordinal)
    }

    /// A citation pointing at this chunk.
    pub fn source_reference(&self, score: f32) -> SourceReference {
        SourceReference { document_id: self.document_id.clone(), ordinal: self.ordinal, score }
    }
}

/// A chunk paired with its embedding, as stored in a vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// The stored chunk.
    pub chunk: Chunk,
    /// The chunk's embedding vector.
    pub embedding: Vec<f32>,
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The cosine similarity score (higher is more relevant).
    pub score: f32,
}

/// Results of one retrieval, ordered by descending score. May be empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    /// The ranked results.
    pub results: Vec<SearchResult>,
}

impl RetrievalResult {
    /// Wrap already-ranked results.
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self { results }
    }

    /// Whether nothing cleared the similarity threshold.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// The highest score, if any.
    pub fn top_score(&self) -> Option<f32> {
        self.results.first().map(|r| r.score)
    }

    /// Iterate over results in rank order.
    pub fn iter(&self) -> std::slice::Iter<'_, SearchResult> {
        self.results.iter()
    }
}

/// A citation: which chunk of which document supported an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceReference {
    /// The cited document.
    pub document_id: String,
    /// The cited chunk's ordinal within the document.
    pub ordinal: usize,
    /// The similarity score the chunk was retrieved with.
    pub score: f32,
}

impl fmt::Display for SourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (chunk {}, score {:.3})", self.document_id, self.ordinal, self.score)
    }
}
