//! Plain text and HTML file processor.
//!
//! Raw text passes through verbatim. HTML, detected by MIME type or by
//! sniffing the content for markup, is converted to Markdown.

use crate::error::{CcoreError, Result};
use crate::extraction::html::{convert_html_to_markdown, extract_title};
use crate::processors::{warn_unknown_options, Processor, ProcessorContext};
use crate::types::{Category, ProcessorCapabilities, ProcessorResult, Source, SourceOrigin};
use async_trait::async_trait;

pub struct TextProcessor {
    capabilities: ProcessorCapabilities,
}

impl TextProcessor {
    pub fn new() -> Self {
        Self {
            capabilities: ProcessorCapabilities::new(
                &["text/plain", "text/markdown", "text/html", "text/csv"],
                50,
                Category::Text,
            )
            .with_extensions(&[".txt", ".md", ".markdown", ".html", ".htm", ".csv"]),
        }
    }
}

impl Default for TextProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for TextProcessor {
    fn name(&self) -> &str {
        "text"
    }

    fn capabilities(&self) -> &ProcessorCapabilities {
        &self.capabilities
    }

    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult> {
        warn_unknown_options(self.name(), &ctx.options, &["output_format"]);

        let content = match source.origin() {
            SourceOrigin::RawContent(content) => content.clone(),
            SourceOrigin::FilePath(path) => {
                let bytes = tokio::fs::read(path).await?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            SourceOrigin::Url(_) => {
                return Err(CcoreError::unsupported(
                    "text processor handles files and raw content, not URLs",
                ));
            }
        };

        let mime_says_html = source.mime_type.as_deref() == Some(crate::core::mime::HTML_MIME_TYPE);
        let is_html = mime_says_html || crate::core::mime::looks_like_html(&content);

        let mut result = if is_html {
            let markdown = convert_html_to_markdown(&content)?;
            let mut result = ProcessorResult::new(markdown, crate::core::mime::MARKDOWN_MIME_TYPE);
            result.metadata.title = extract_title(&content);
            result
        } else {
            let mime = source
                .mime_type
                .clone()
                .unwrap_or_else(|| crate::core::mime::PLAIN_TEXT_MIME_TYPE.to_string());
            ProcessorResult::new(content, mime)
        };

        result.metadata.insert(
            "word_count",
            serde_json::json!(result.content.split_whitespace().count()),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_raw_text_round_trips_verbatim() {
        let processor = TextProcessor::new();
        let input = "line one\nline two\n";
        let result = processor
            .extract(&Source::text(input), &ProcessorContext::default())
            .await
            .unwrap();
        assert_eq!(result.content, input);
        assert_eq!(result.mime_type, "text/plain");
    }

    #[tokio::test]
    async fn test_raw_html_converted_to_markdown() {
        let processor = TextProcessor::new();
        let result = processor
            .extract(
                &Source::text("<html><head><title>T</title></head><body><h1>Hello</h1></body></html>"),
                &ProcessorContext::default(),
            )
            .await
            .unwrap();
        assert!(result.content.contains("# Hello"));
        assert_eq!(result.mime_type, "text/markdown");
        assert_eq!(result.metadata.title.as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn test_html_conversion_idempotent_on_markdown_output() {
        let processor = TextProcessor::new();
        let first = processor
            .extract(
                &Source::text("<h1>Title</h1><p>Some <em>styled</em> text.</p>"),
                &ProcessorContext::default(),
            )
            .await
            .unwrap();

        // Feeding the markdown back through must not mangle it: it no
        // longer sniffs as HTML, so it passes through unchanged.
        let second = processor
            .extract(&Source::text(first.content.clone()), &ProcessorContext::default())
            .await
            .unwrap();
        assert_eq!(second.content, first.content);
    }

    #[tokio::test]
    async fn test_file_extraction() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"file body").unwrap();

        let processor = TextProcessor::new();
        let result = processor
            .extract(
                &Source::file(file.path()).with_mime_type("text/plain"),
                &ProcessorContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.content, "file body");
    }

    #[tokio::test]
    async fn test_html_file_by_mime_type() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // No doctype, so only the declared MIME type marks this as HTML.
        file.write_all(b"<p>paragraph</p>").unwrap();

        let processor = TextProcessor::new();
        let result = processor
            .extract(
                &Source::file(file.path()).with_mime_type("text/html"),
                &ProcessorContext::default(),
            )
            .await
            .unwrap();
        assert!(result.content.contains("paragraph"));
        assert_eq!(result.mime_type, "text/markdown");
    }

    #[tokio::test]
    async fn test_url_source_rejected() {
        let processor = TextProcessor::new();
        let result = processor
            .extract(&Source::url("https://example.com"), &ProcessorContext::default())
            .await;
        assert!(matches!(result.unwrap_err(), CcoreError::UnsupportedContent { .. }));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let processor = TextProcessor::new();
        let result = processor
            .extract(&Source::file("/nonexistent/ccore.txt"), &ProcessorContext::default())
            .await;
        assert!(matches!(result.unwrap_err(), CcoreError::Io(_)));
    }
}
