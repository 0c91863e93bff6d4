//! Document text extraction for the extraction stage

use async_trait::async_trait;
use tracing::debug;

use crate::pipeline::run::DocumentRef;

/// Turns submitted documents into text a later stage can read
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Extract the documents' content, optionally focused on a query
    async fn extract(
        &self,
        document_refs: &[DocumentRef],
        focus_query: Option<&str>,
    ) -> Result<String, String>;
}

/// Reads each file and keeps its printable text
///
/// Binary formats are not decoded; runs of non-printable bytes collapse to a single space, which
/// leaves the readable streams of most text-bearing files intact.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    max_chars_per_document: usize,
}

impl PlainTextExtractor {
    pub fn new(max_chars_per_document: usize) -> Self {
        Self {
            max_chars_per_document,
        }
    }

    /// Keep printable characters, collapsing everything else (pure function)
    fn printable_text(bytes: &[u8]) -> String {
        let decoded = String::from_utf8_lossy(bytes);
        let mut text = String::with_capacity(decoded.len());
        let mut in_gap = false;

        for c in decoded.chars() {
            let printable = c == '\n' || c == '\t' || (!c.is_control() && c != '\u{FFFD}');
            if printable {
                text.push(c);
                in_gap = false;
            } else if !in_gap {
                text.push(' ');
                in_gap = true;
            }
        }

        text.trim().to_string()
    }

    /// Truncate to at most `max_chars` characters (pure function)
    fn truncate_chars(text: String, max_chars: usize) -> String {
        match text.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}\n[truncated]", &text[..cut]),
            None => text,
        }
    }

    fn format_section(name: &str, body: &str) -> String {
        format!("Document: {name}\n{body}")
    }
}

#[async_trait]
impl DocumentExtractor for PlainTextExtractor {
    async fn extract(
        &self,
        document_refs: &[DocumentRef],
        focus_query: Option<&str>,
    ) -> Result<String, String> {
        let mut sections = Vec::with_capacity(document_refs.len() + 1);

        for doc in document_refs {
            let bytes = tokio::fs::read(&doc.path)
                .await
                .map_err(|e| format!("Failed to read {}: {e}", doc.path.display()))?;

            let text = Self::truncate_chars(Self::printable_text(&bytes), self.max_chars_per_document);
            debug!(document = %doc.name, bytes = bytes.len(), chars = text.len(), "Extracted document text");
            sections.push(Self::format_section(&doc.name, &text));
        }

        if let Some(query) = focus_query {
            sections.push(format!("Focus: {query}"));
        }

        Ok(sections.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_printable_text_collapses_binary() {
        let bytes = b"Hello\x00\x01\x02world\nline two";
        assert_eq!(
            PlainTextExtractor::printable_text(bytes),
            "Hello world\nline two"
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo wörld".to_string();
        assert_eq!(
            PlainTextExtractor::truncate_chars(text.clone(), 5),
            "héllo\n[truncated]"
        );
        assert_eq!(PlainTextExtractor::truncate_chars(text.clone(), 50), text);
    }

    #[tokio::test]
    async fn test_extracts_sections_with_focus() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "Solar capacity doubled in 2023.").unwrap();

        let doc = DocumentRef::new(file.path(), "report.txt");
        let extractor = PlainTextExtractor::new(1000);
        let text = extractor
            .extract(&[doc], Some("renewable energy"))
            .await
            .unwrap();

        assert_eq!(
            text,
            "Document: report.txt\nSolar capacity doubled in 2023.\n\nFocus: renewable energy"
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let extractor = PlainTextExtractor::new(1000);
        let err = extractor
            .extract(&[DocumentRef::from_path("/nonexistent/paper.pdf")], None)
            .await
            .unwrap_err();
        assert!(err.contains("/nonexistent/paper.pdf"));
    }
}
