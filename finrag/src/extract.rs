//! Text extraction from PDF and DOCX payloads.

use std::io::{Cursor, Read};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::document::{Document, DocumentFormat};
use crate::error::{RagError, Result};

const DOCX_BODY: &str = "word/document.xml";

static PARAGRAPH_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</w:p>").expect("valid paragraph regex"));
static TAB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<w:tab\s*/>").expect("valid tab regex"));
static BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<w:(?:br|cr)\b[^>]*/>").expect("valid break regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(amp|lt|gt|quot|apos|#[0-9]+|#x[0-9a-fA-F]+);").expect("valid entity regex")
});

/// Extract a [`Document`] from a binary payload.
///
/// The size limit is checked before the format is parsed so oversized uploads
/// are rejected without touching their contents. Parsing runs on a blocking
/// thread; a panic inside a parser becomes [`RagError::ExtractionError`].
///
/// # Errors
///
/// - [`RagError::DocumentTooLarge`] if `bytes` exceeds `max_bytes`
/// - [`RagError::UnsupportedFormat`] unless `format_tag` names PDF or DOCX
/// - [`RagError::ExtractionError`] if the payload cannot be parsed or has no text
pub async fn extract_document(
    id: impl Into<String>,
    bytes: Vec<u8>,
    format_tag: &str,
    max_bytes: usize,
    source_name: Option<&str>,
) -> Result<Document> {
    let id = id.into();
    if bytes.len() > max_bytes {
        return Err(RagError::DocumentTooLarge { document_id: id, size: bytes.len(), limit: max_bytes });
    }
    let format = DocumentFormat::from_tag(format_tag)?;

    let task_id = id.clone();
    let text = tokio::task::spawn_blocking(move || extract_text(&task_id, &bytes, format))
        .await
        .map_err(|e| {
            warn!(document.id = %id, error = %e, "extraction task failed");
            RagError::ExtractionError {
                document_id: id.clone(),
                message: format!("parser aborted: {e}"),
            }
        })??;

    if text.trim().is_empty() {
        return Err(RagError::ExtractionError {
            document_id: id,
            message: "document contains no extractable text".to_string(),
        });
    }

    info!(document.id = %id, format = %format, char_count = text.chars().count(), "extracted document");
    let mut document = Document::new(id, text, format);
    if let Some(source) = source_name {
        document = document.with_metadata("source", source);
    }
    Ok(document)
}

/// Extract plain text synchronously.
pub fn extract_text(document_id: &str, bytes: &[u8], format: DocumentFormat) -> Result<String> {
    match format {
        DocumentFormat::Pdf => pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
            RagError::ExtractionError { document_id: document_id.to_string(), message: e.to_string() }
        }),
        DocumentFormat::Docx => docx_text(document_id, bytes),
    }
}

fn docx_text(document_id: &str, bytes: &[u8]) -> Result<String> {
    let failure = |message: String| RagError::ExtractionError {
        document_id: document_id.to_string(),
        message,
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| failure(format!("not a DOCX container: {e}")))?;
    let mut body = archive
        .by_name(DOCX_BODY)
        .map_err(|e| failure(format!("missing {DOCX_BODY}: {e}")))?;
    let mut xml = String::new();
    body.read_to_string(&mut xml).map_err(|e| failure(format!("unreadable {DOCX_BODY}: {e}")))?;

    Ok(wordprocessing_xml_to_text(&xml))
}

/// Convert WordprocessingML to text: one line per paragraph, tabs and breaks kept.
fn wordprocessing_xml_to_text(xml: &str) -> String {
    let text = PARAGRAPH_END.replace_all(xml, "\n");
    let text = TAB.replace_all(&text, "\t");
    let text = BREAK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = ENTITY.replace_all(&text, |caps: &regex::Captures<'_>| decode_entity(&caps[1]));
    text.trim_end().to_string()
}

fn decode_entity(name: &str) -> String {
    match name {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" => "'".to_string(),
        _ => {
            let code = match name.strip_prefix("#x") {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => name.strip_prefix('#').and_then(|dec| dec.parse().ok()),
            };
            code.and_then(char::from_u32).map(String::from).unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_become_lines() {
        let xml = r#"<w:document><w:body><w:p><w:r><w:t>Net 30</w:t></w:r></w:p><w:p><w:r><w:t>Due&amp;payable</w:t><w:tab/><w:t>now</w:t></w:r></w:p></w:body></w:document>"#;
        assert_eq!(wordprocessing_xml_to_text(xml), "Net 30\nDue&payable\tnow");
    }

    #[test]
    fn numeric_entities_are_decoded() {
        assert_eq!(wordprocessing_xml_to_text("<w:t>&#8364;5 &#x41;</w:t>"), "€5 A");
    }

    #[test]
    fn breaks_become_newlines() {
        assert_eq!(wordprocessing_xml_to_text("<w:t>a</w:t><w:br/><w:t>b</w:t>"), "a\nb");
    }

    #[test]
    fn non_zip_docx_is_an_extraction_error() {
        let err = extract_text("d", b"plain bytes", DocumentFormat::Docx).unwrap_err();
        assert!(matches!(err, RagError::ExtractionError { .. }));
    }
}
