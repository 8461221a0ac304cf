//! PDF extraction engines.
//!
//! Three variants over the same claim set:
//!
//! - `pdf-text` (50): fast byte-level text via pdfium, with heuristic
//!   table conversion and an OCR assist for formula-heavy pages.
//! - `pdf-markdown` (55): the same text run through structure heuristics
//!   to produce markdown with headings and lists.
//! - `pdf-vlm` (60): a remote vision-language peer service; also claims
//!   `image/*`.
//!
//! Pdfium objects are not thread-safe, so all pdfium work runs inside
//! `spawn_blocking` with nothing escaping the closure but plain data.
//! That also keeps CPU-bound parsing off the I/O executor.

use crate::error::{CcoreError, Result};
use crate::extraction::cells_to_markdown;
use crate::processors::{warn_unknown_options, Processor, ProcessorContext};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{Category, OutputFormat, ProcessorCapabilities, ProcessorResult, Source};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use std::path::Path;

/// Undecoded-glyph placeholders per page above which the page is treated
/// as formula-heavy and eligible for the OCR pass.
const FORMULA_PLACEHOLDER_THRESHOLD: usize = 10;

static PDFIUM_AVAILABLE: Lazy<bool> = Lazy::new(|| Pdfium::bind_to_system_library().is_ok());

static TESSERACT_AVAILABLE: Lazy<bool> = Lazy::new(|| {
    std::process::Command::new("tesseract")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
});

struct PdfPages {
    pages: Vec<String>,
    title: Option<String>,
}

fn source_file_path(source: &Source) -> Result<&Path> {
    source
        .as_file_path()
        .ok_or_else(|| CcoreError::unsupported("PDF engines require a file source"))
}

/// Extract per-page text with pdfium. Runs on the blocking pool; when
/// `ocr_formula_pages` is set, formula-heavy pages are re-rendered and run
/// through the `tesseract` CLI.
fn extract_pdf_pages(bytes: &[u8], ocr_formula_pages: bool) -> Result<PdfPages> {
    let bindings = Pdfium::bind_to_system_library().map_err(|e| CcoreError::EngineUnavailable {
        engine: "pdf-text".to_string(),
        missing: vec![format!("pdfium ({e})")],
    })?;
    let pdfium = Pdfium::new(bindings);
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| CcoreError::parse(format!("Failed to load PDF: {e:?}")))?;

    let title = document
        .metadata()
        .get(PdfDocumentMetadataTagType::Title)
        .map(|tag| tag.value().to_string())
        .filter(|s| !s.trim().is_empty());

    let mut pages = Vec::new();
    for page in document.pages().iter() {
        let mut text = page
            .text()
            .map(|t| t.all())
            .unwrap_or_default();

        if ocr_formula_pages && count_undecoded_placeholders(&text) > FORMULA_PLACEHOLDER_THRESHOLD {
            match ocr_page(&page) {
                Ok(ocr_text) if !ocr_text.trim().is_empty() => {
                    tracing::debug!("Replaced formula-heavy page text with OCR output");
                    text = ocr_text;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("OCR pass failed, keeping extracted text: {e}"),
            }
        }

        pages.push(text);
    }

    Ok(PdfPages { pages, title })
}

/// Count glyphs pdfium could not decode. These show up as replacement
/// characters and are dense in formula regions.
fn count_undecoded_placeholders(text: &str) -> usize {
    text.chars().filter(|c| *c == '\u{FFFD}').count()
}

/// Render a page and run the `tesseract` CLI over it.
fn ocr_page(page: &PdfPage<'_>) -> Result<String> {
    if !*TESSERACT_AVAILABLE {
        return Err(CcoreError::EngineUnavailable {
            engine: "pdf-text".to_string(),
            missing: vec!["tesseract".to_string()],
        });
    }

    let bitmap = page
        .render_with_config(&PdfRenderConfig::new().set_target_width(2000))
        .map_err(|e| CcoreError::parse(format!("Failed to render PDF page: {e:?}")))?;
    let image = bitmap.as_image();

    let dir = tempfile::tempdir()?;
    let image_path = dir.path().join("page.png");
    image
        .save(&image_path)
        .map_err(|e| CcoreError::parse(format!("Failed to write rendered page: {e}")))?;

    let output = std::process::Command::new("tesseract")
        .arg(&image_path)
        .arg("stdout")
        .output()?;
    if !output.status.success() {
        return Err(CcoreError::parse(format!(
            "tesseract exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Convert whitespace-aligned column runs in extracted text to markdown
/// tables. Consecutive lines with two or more wide gaps are treated as
/// table rows.
fn convert_aligned_tables(text: &str) -> String {
    fn split_columns(line: &str) -> Vec<String> {
        line.split("  ")
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect()
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut output = String::with_capacity(text.len());
    let mut i = 0;

    while i < lines.len() {
        let columns = split_columns(lines[i]);
        if columns.len() >= 2 {
            let mut rows = vec![columns];
            let mut j = i + 1;
            while j < lines.len() {
                let next = split_columns(lines[j]);
                if next.len() >= 2 {
                    rows.push(next);
                    j += 1;
                } else {
                    break;
                }
            }
            if rows.len() >= 2 {
                let width = rows.iter().map(Vec::len).max().unwrap_or(0);
                for row in &mut rows {
                    row.resize(width, String::new());
                }
                output.push_str(&cells_to_markdown(&rows));
                i = j;
                continue;
            }
        }
        output.push_str(lines[i]);
        output.push('\n');
        i += 1;
    }

    output
}

fn assemble_result(pages: PdfPages, transform: impl Fn(&str) -> String) -> ProcessorResult {
    let page_count = pages.pages.len();
    let content = pages
        .pages
        .iter()
        .map(|p| transform(p))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut result = ProcessorResult::new(content, crate::core::mime::PDF_MIME_TYPE);
    result.metadata.title = pages.title;
    result.metadata.insert("page_count", serde_json::json!(page_count));
    result
}

async fn read_source_bytes(source: &Source) -> Result<Vec<u8>> {
    let path = source_file_path(source)?;
    Ok(tokio::fs::read(path).await?)
}

// ---------------------------------------------------------------------------
// pdf-text
// ---------------------------------------------------------------------------

/// Fast byte-level PDF text extraction.
pub struct PdfTextProcessor {
    capabilities: ProcessorCapabilities,
}

impl PdfTextProcessor {
    pub fn new() -> Self {
        Self {
            capabilities: ProcessorCapabilities::new(&["application/pdf"], 50, Category::Documents)
                .with_extensions(&[".pdf"])
                .with_requires(&["pdfium"]),
        }
    }
}

impl Default for PdfTextProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for PdfTextProcessor {
    fn name(&self) -> &str {
        "pdf-text"
    }

    fn capabilities(&self) -> &ProcessorCapabilities {
        &self.capabilities
    }

    fn is_available(&self) -> bool {
        *PDFIUM_AVAILABLE
    }

    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult> {
        warn_unknown_options(self.name(), &ctx.options, &["do_ocr", "output_format"]);
        let bytes = read_source_bytes(source).await?;
        let do_ocr = ctx.option_bool("do_ocr", false);

        let pages = tokio::task::spawn_blocking(move || extract_pdf_pages(&bytes, do_ocr))
            .await
            .map_err(|e| CcoreError::Internal(format!("PDF worker panicked: {e}")))??;

        Ok(assemble_result(pages, convert_aligned_tables))
    }
}

// ---------------------------------------------------------------------------
// pdf-markdown
// ---------------------------------------------------------------------------

/// Structured-markdown variant of the PDF text engine.
pub struct PdfMarkdownProcessor {
    capabilities: ProcessorCapabilities,
}

impl PdfMarkdownProcessor {
    pub fn new() -> Self {
        Self {
            capabilities: ProcessorCapabilities::new(&["application/pdf"], 55, Category::Documents)
                .with_extensions(&[".pdf"])
                .with_requires(&["pdfium"]),
        }
    }
}

impl Default for PdfMarkdownProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Heading and list heuristics over raw page text.
fn page_text_to_markdown(text: &str) -> String {
    static NUMBERED_HEADING: Lazy<regex::Regex> =
        Lazy::new(|| regex::Regex::new(r"^\d+(\.\d+)*\.?\s+\S").expect("static regex"));

    let mut output = String::with_capacity(text.len());
    for line in convert_aligned_tables(text).lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            output.push('\n');
            continue;
        }

        let word_count = trimmed.split_whitespace().count();
        let is_all_caps = trimmed.len() >= 4
            && word_count <= 12
            && trimmed.chars().any(|c| c.is_alphabetic())
            && !trimmed.chars().any(|c| c.is_lowercase());

        if is_all_caps {
            output.push_str("## ");
            output.push_str(trimmed);
        } else if NUMBERED_HEADING.is_match(trimmed) && word_count <= 12 && !trimmed.ends_with('.') {
            let depth = trimmed
                .split_whitespace()
                .next()
                .map(|n| n.matches('.').count().clamp(0, 3) + 2)
                .unwrap_or(2);
            output.push_str(&"#".repeat(depth));
            output.push(' ');
            output.push_str(trimmed);
        } else if let Some(rest) = trimmed
            .strip_prefix('\u{2022}')
            .or_else(|| trimmed.strip_prefix('\u{25E6}'))
            .or_else(|| trimmed.strip_prefix('-'))
            .filter(|_| trimmed.len() > 2)
        {
            output.push_str("- ");
            output.push_str(rest.trim_start());
        } else {
            output.push_str(line);
        }
        output.push('\n');
    }
    output
}

#[async_trait]
impl Processor for PdfMarkdownProcessor {
    fn name(&self) -> &str {
        "pdf-markdown"
    }

    fn capabilities(&self) -> &ProcessorCapabilities {
        &self.capabilities
    }

    fn is_available(&self) -> bool {
        *PDFIUM_AVAILABLE
    }

    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult> {
        warn_unknown_options(self.name(), &ctx.options, &["do_ocr", "output_format"]);
        let bytes = read_source_bytes(source).await?;
        let do_ocr = ctx.option_bool("do_ocr", false);

        let pages = tokio::task::spawn_blocking(move || extract_pdf_pages(&bytes, do_ocr))
            .await
            .map_err(|e| CcoreError::Internal(format!("PDF worker panicked: {e}")))??;

        let mut result = assemble_result(pages, page_text_to_markdown);
        result.mime_type = crate::core::mime::MARKDOWN_MIME_TYPE.to_string();
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// pdf-vlm
// ---------------------------------------------------------------------------

/// Remote vision-language document pipeline.
///
/// Delegates to a peer service (`CCORE_VLM_REMOTE_URL`) that renders the
/// document through a VLM. Handles PDFs and images, and can emit
/// markdown, HTML or a structured tree; optional picture descriptions are
/// attached to metadata, never to the exported text.
pub struct PdfVlmProcessor {
    capabilities: ProcessorCapabilities,
}

impl PdfVlmProcessor {
    pub fn new() -> Self {
        Self {
            capabilities: ProcessorCapabilities::new(&["application/pdf", "image/*"], 60, Category::Documents)
                .with_extensions(&[".pdf", ".png", ".jpg", ".jpeg", ".tiff", ".webp"])
                .with_requires(&["pdf-vlm"]),
        }
    }

    fn remote_url() -> Option<String> {
        std::env::var("CCORE_VLM_REMOTE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    async fn convert_remote(
        &self,
        url: &str,
        bytes: Vec<u8>,
        file_name: String,
        format: OutputFormat,
        describe_pictures: bool,
    ) -> Result<serde_json::Value> {
        let format_name = match format {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Html => "html",
            OutputFormat::Structured => "structured",
        };

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("format", format_name)
            .text("describe_pictures", describe_pictures.to_string())
            .part("file", part);

        let mut request = crate::processors::url::HTTP_CLIENT.post(format!("{url}/v1/convert"));
        if let Ok(key) = std::env::var("CCORE_VLM_REMOTE_API_KEY") {
            if !key.trim().is_empty() {
                request = request.bearer_auth(key);
            }
        }

        let response = request.multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(crate::error::status_to_error(
                status,
                format!("VLM peer service returned {status}"),
            ));
        }
        Ok(response.json().await?)
    }
}

impl Default for PdfVlmProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for PdfVlmProcessor {
    fn name(&self) -> &str {
        "pdf-vlm"
    }

    fn capabilities(&self) -> &ProcessorCapabilities {
        &self.capabilities
    }

    fn is_available(&self) -> bool {
        Self::remote_url().is_some()
    }

    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult> {
        warn_unknown_options(self.name(), &ctx.options, &["output_format", "describe_pictures"]);

        let remote_url = Self::remote_url().ok_or_else(|| CcoreError::EngineUnavailable {
            engine: "pdf-vlm".to_string(),
            missing: vec!["pdf-vlm".to_string()],
        })?;

        let path = source_file_path(source)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf")
            .to_string();
        let bytes = tokio::fs::read(path).await?;

        let format = source
            .output_format
            .or_else(|| ctx.option_str("output_format").and_then(OutputFormat::parse))
            .unwrap_or(ctx.output_format);
        let describe_pictures = ctx.option_bool("describe_pictures", false);

        let policy = RetryPolicy::for_operation("url_api");
        let body = retry_with_backoff(&policy, "pdf-vlm", || {
            self.convert_remote(&remote_url, bytes.clone(), file_name.clone(), format, describe_pictures)
        })
        .await?;

        let content = match format {
            OutputFormat::Structured => body
                .get("document")
                .map(|doc| serde_json::to_string_pretty(doc))
                .transpose()?
                .or_else(|| body.get("content").and_then(|v| v.as_str()).map(String::from))
                .ok_or_else(|| CcoreError::parse("VLM peer response carried no document"))?,
            _ => body
                .get("content")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CcoreError::parse("VLM peer response carried no content"))?
                .to_string(),
        };

        let mime = match format {
            OutputFormat::Markdown => crate::core::mime::MARKDOWN_MIME_TYPE,
            OutputFormat::Html => crate::core::mime::HTML_MIME_TYPE,
            OutputFormat::Structured => "application/json",
        };

        let mut result = ProcessorResult::new(content, mime);
        result.metadata.title = body.get("title").and_then(|v| v.as_str()).map(String::from);
        if let Some(pictures) = body.get("pictures").filter(|p| !p.is_null()) {
            result.metadata.insert("picture_descriptions", pictures.clone());
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_counting() {
        assert_eq!(count_undecoded_placeholders("clean text"), 0);
        let noisy = "x \u{FFFD}\u{FFFD} = \u{FFFD}";
        assert_eq!(count_undecoded_placeholders(noisy), 3);
    }

    #[test]
    fn test_aligned_table_conversion() {
        let text = "Header A  Header B  Header C\nval 1  val 2  val 3\nval 4  val 5  val 6\ntrailing prose line\n";
        let converted = convert_aligned_tables(text);
        assert!(converted.contains("| Header A | Header B | Header C |"));
        assert!(converted.contains("| val 1 | val 2 | val 3 |"));
        assert!(converted.contains("trailing prose line"));
    }

    #[test]
    fn test_single_wide_line_is_not_a_table() {
        let text = "two  columns  here\nplain line\n";
        let converted = convert_aligned_tables(text);
        assert!(!converted.contains('|'));
        assert!(converted.contains("two  columns  here"));
    }

    #[test]
    fn test_ragged_table_rows_padded() {
        let text = "a  b  c\nd  e\n";
        let converted = convert_aligned_tables(text);
        assert!(converted.contains("| a | b | c |"));
        assert!(converted.contains("| d | e |  |"));
    }

    #[test]
    fn test_markdown_heading_heuristics() {
        let markdown = page_text_to_markdown("INTRODUCTION\nSome body text here.\n1.2 Methods overview\nmore body\n");
        assert!(markdown.contains("## INTRODUCTION"));
        assert!(markdown.contains("### 1.2 Methods overview"));
        assert!(markdown.contains("Some body text here."));
    }

    #[test]
    fn test_markdown_bullet_normalization() {
        let markdown = page_text_to_markdown("\u{2022} first point\n\u{2022} second point\n");
        assert!(markdown.contains("- first point"));
        assert!(markdown.contains("- second point"));
    }

    #[test]
    fn test_sentence_not_mistaken_for_heading() {
        let markdown = page_text_to_markdown("2. This is a sentence that happens to start with a number.\n");
        assert!(!markdown.contains("## 2."));
    }

    #[test]
    fn test_capability_claims() {
        let text = PdfTextProcessor::new();
        assert!(text.capabilities().supports_mime("application/pdf"));
        assert!(!text.capabilities().supports_mime("image/png"));
        assert_eq!(text.capabilities().priority, 50);

        let markdown = PdfMarkdownProcessor::new();
        assert_eq!(markdown.capabilities().priority, 55);

        let vlm = PdfVlmProcessor::new();
        assert!(vlm.capabilities().supports_mime("image/png"));
        assert_eq!(vlm.capabilities().priority, 60);
        assert_eq!(vlm.capabilities().requires, vec!["pdf-vlm"]);
    }

    #[test]
    #[serial_test::serial]
    fn test_vlm_availability_requires_remote_url() {
        std::env::remove_var("CCORE_VLM_REMOTE_URL");
        assert!(PdfVlmProcessor::remote_url().is_none());

        std::env::set_var("CCORE_VLM_REMOTE_URL", "http://localhost:5001");
        assert_eq!(
            PdfVlmProcessor::remote_url().as_deref(),
            Some("http://localhost:5001")
        );
        std::env::remove_var("CCORE_VLM_REMOTE_URL");
    }

    #[tokio::test]
    async fn test_non_file_sources_rejected() {
        let processor = PdfTextProcessor::new();
        let result = processor
            .extract(&Source::text("raw"), &ProcessorContext::default())
            .await;
        assert!(matches!(result.unwrap_err(), CcoreError::UnsupportedContent { .. }));
    }
}
