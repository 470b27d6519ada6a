//! Turning retrieved context into a cited answer.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::document::{RetrievalResult, SourceReference};
use crate::error::Result;
use crate::inference::InferenceClient;

/// The answer returned when nothing in the index clears the similarity threshold.
pub const NO_RELEVANT_INFORMATION: &str =
    "No relevant information found in the available documents.";

/// The final response to a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// The model's answer, or [`NO_RELEVANT_INFORMATION`].
    pub text: String,
    /// Cited chunks in descending score order.
    pub sources: Vec<SourceReference>,
    /// The top similarity score clamped to `[0, 1]`; zero when ungrounded.
    pub confidence: f32,
    /// Whether the answer was generated from retrieved context.
    pub grounded: bool,
}

impl Answer {
    /// The fallback answer for an empty retrieval.
    pub fn no_relevant_information() -> Self {
        Self {
            text: NO_RELEVANT_INFORMATION.to_string(),
            sources: Vec::new(),
            confidence: 0.0,
            grounded: false,
        }
    }
}

/// Map the top similarity score to a confidence value.
pub fn confidence_from_score(top_score: f32) -> f32 {
    if top_score.is_nan() { 0.0 } else { top_score.clamp(0.0, 1.0) }
}

/// Build the grounding prompt: numbered passages, then the question.
///
/// Passages keep the retrieval order; a passage whose text repeats an
/// earlier one is left out.
pub fn build_prompt(question: &str, context: &RetrievalResult) -> String {
    let mut prompt = String::from("Context:\n");
    let mut seen = HashSet::new();
    let mut number = 0;
    for result in context.iter() {
        let text = result.chunk.text.trim();
        if !seen.insert(text) {
            continue;
        }
        number += 1;
        let _ = writeln!(
            prompt,
            "[{number}] ({}, chunk {})\n{text}\n",
            result.chunk.document_id, result.chunk.ordinal
        );
    }
    let _ = write!(prompt, "Question:\n{}\n\nAnswer:", question.trim());
    prompt
}

/// Composes [`Answer`]s from retrieval results.
#[derive(Clone)]
pub struct AnswerComposer {
    inference: Arc<InferenceClient>,
}

impl AnswerComposer {
    /// Create a composer that generates with `inference`.
    pub fn new(inference: Arc<InferenceClient>) -> Self {
        Self { inference }
    }

    /// Answer `question` from `context`.
    ///
    /// An empty `context` yields [`Answer::no_relevant_information`] without
    /// calling the model.
    ///
    /// # Errors
    ///
    /// Returns the inference error when the backend cannot produce a
    /// completion. No answer text is fabricated in that case.
    pub async fn compose(&self, question: &str, context: &RetrievalResult) -> Result<Answer> {
        let Some(top_score) = context.top_score() else {
            info!(grounded = false, "no relevant context, returning fallback answer");
            return Ok(Answer::no_relevant_information());
        };

        let prompt = build_prompt(question, context);
        let text = self.inference.complete_default(&prompt).await?;
        let sources: Vec<SourceReference> =
            context.iter().map(|r| r.chunk.source_reference(r.score)).collect();

        info!(source_count = sources.len(), top_score, grounded = true, "answer composed");
        Ok(Answer {
            text: text.trim().to_string(),
            sources,
            confidence: confidence_from_score(top_score),
            grounded: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Chunk, SearchResult};
    use std::collections::HashMap;

    fn result(document_id: &str, ordinal: usize, text: &str, score: f32) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                document_id: document_id.into(),
                ordinal,
                text: text.into(),
                start: 0,
                end: text.chars().count(),
                overlap: 0,
                metadata: HashMap::new(),
            },
            score,
        }
    }

    #[test]
    fn prompt_numbers_unique_passages() {
        let context = RetrievalResult::new(vec![
            result("lease", 0, "Payment term of 30 days.", 0.8),
            result("lease-copy", 0, "Payment term of 30 days.", 0.8),
            result("lease", 1, "Late fees apply.", 0.4),
        ]);
        let prompt = build_prompt("What is the payment term?", &context);
        assert!(prompt.starts_with("Context:\n[1] (lease, chunk 0)\nPayment term of 30 days.\n"));
        assert!(prompt.contains("[2] (lease, chunk 1)\nLate fees apply."));
        assert!(!prompt.contains("[3]"));
        assert!(prompt.ends_with("Question:\nWhat is the payment term?\n\nAnswer:"));
    }

    #[test]
    fn confidence_is_clamped_and_monotonic() {
        assert_eq!(confidence_from_score(-0.2), 0.0);
        assert_eq!(confidence_from_score(1.3), 1.0);
        assert!(confidence_from_score(0.6) > confidence_from_score(0.5));
        assert_eq!(confidence_from_score(f32::NAN), 0.0);
    }

    #[test]
    fn fallback_answer_is_ungrounded() {
        let answer = Answer::no_relevant_information();
        assert_eq!(answer.text, NO_RELEVANT_INFORMATION);
        assert!(answer.sources.is_empty());
        assert_eq!(answer.confidence, 0.0);
        assert!(!answer.grounded);
    }
}
