//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`RecursiveChunker`], which
//! cuts text at the highest-priority separator available (paragraph, line,
//! sentence, clause, word) and falls back to a hard character cut only when
//! no separator fits.
//!
//! Chunks always tile the source text: chunk `i + 1` begins with the last
//! `chunk_overlap` characters of chunk `i`, so dropping that prefix from every
//! chunk but the first and concatenating reproduces the document exactly.

use std::cmp;

use crate::config::RagConfig;
use crate::document::{Chunk, Document};
use crate::error::{RagError, Result};

/// Separators tried in priority order: paragraph, line, sentence, clause, word.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "];

/// A strategy for splitting documents into chunks.
///
/// Implementations are pure functions of the document and their own
/// configuration: splitting the same document twice yields identical chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into ordered chunks.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ExtractionError`] if the document has no text.
    fn split(&self, document: &Document) -> Result<Vec<Chunk>>;
}

/// Splits text hierarchically with a fixed character overlap between chunks.
///
/// # Example
///
/// ```rust,ignore
/// use finrag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(1000, 200)?;
/// let chunks = chunker.split(&document)?;
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<Vec<char>>,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker` with the default separators.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of characters shared by consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] unless `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunker requires 0 <= chunk_overlap ({chunk_overlap}) < chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.chars().collect()).collect(),
        })
    }

    /// Create a chunker from the chunking fields of a [`RagConfig`].
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Replace the separator priority list. Empty separators are ignored.
    pub fn with_separators<S: AsRef<str>>(mut self, separators: &[S]) -> Self {
        self.separators = separators
            .iter()
            .map(|s| s.as_ref().chars().collect::<Vec<char>>())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    /// Maximum characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters shared by consecutive chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Compute chunk spans as half-open character ranges over `text`.
    pub fn split_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let chars: Vec<char> = text.chars().collect();
        self.spans_over(&chars)
    }

    fn spans_over(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let len = chars.len();
        let mut spans = Vec::new();
        if len == 0 {
            return spans;
        }

        // A cut must leave the chunk at least half full and strictly longer
        // than the overlap, so every step advances.
        let min_fill = cmp::max(self.chunk_overlap + 1, self.chunk_size / 2);
        let mut start = 0;
        loop {
            if len - start <= self.chunk_size {
                spans.push((start, len));
                break;
            }
            let limit = start + self.chunk_size;
            let end = self.find_cut(chars, start + min_fill, limit).unwrap_or(limit);
            spans.push((start, end));
            start = end - self.chunk_overlap;
        }
        spans
    }

    /// Find the latest cut in `floor..=limit` that falls right after the
    /// highest-priority separator present in that window.
    fn find_cut(&self, chars: &[char], floor: usize, limit: usize) -> Option<usize> {
        for separator in &self.separators {
            let width = separator.len();
            let lowest = cmp::max(floor, width);
            if lowest > limit {
                continue;
            }
            let found =
                (lowest..=limit).rev().find(|&cut| chars[cut - width..cut] == separator[..]);
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

impl Chunker for RecursiveChunker {
    fn split(&self, document: &Document) -> Result<Vec<Chunk>> {
        if document.text.trim().is_empty() {
            return Err(RagError::ExtractionError {
                document_id: document.id.clone(),
                message: "document contains no text".to_string(),
            });
        }

        let chars: Vec<char> = document.text.chars().collect();
        let spans = self.spans_over(&chars);

        let chunks = spans
            .into_iter()
            .enumerate()
            .map(|(ordinal, (start, end))| {
                let mut metadata = document.metadata.clone();
                metadata.insert("chunk_index".to_string(), ordinal.to_string());
                Chunk {
                    document_id: document.id.clone(),
                    ordinal,
                    text: chars[start..end].iter().collect(),
                    start,
                    end,
                    overlap: if ordinal == 0 { 0 } else { self.chunk_overlap },
                    metadata,
                }
            })
            .collect();

        Ok(chunks)
    }
}

/// Rebuild the original text from chunks by dropping each chunk's overlap prefix.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    for chunk in chunks {
        text.extend(chunk.text.chars().skip(chunk.overlap));
    }
    text
}
