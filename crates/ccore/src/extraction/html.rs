//! HTML to Markdown conversion and page metadata extraction.
//!
//! Conversion goes through `html-to-markdown-rs`, which preserves heading
//! levels, lists, emphasis, code fences and link targets while dropping
//! scripts, styles and navigation boilerplate.

use crate::error::{CcoreError, Result};
use html_to_markdown_rs::{convert as convert_html, ConversionOptions};
use scraper::{Html, Selector};

fn conversion_options() -> ConversionOptions {
    ConversionOptions {
        extract_metadata: false,
        ..Default::default()
    }
}

/// Convert an HTML document to Markdown.
pub fn convert_html_to_markdown(html: &str) -> Result<String> {
    convert_html(html, Some(conversion_options()))
        .map_err(|e| CcoreError::parse(format!("Failed to convert HTML to Markdown: {e}")))
}

fn select_first_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn select_first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Best-effort page title: `og:title`, then `meta[name="title"]`, then
/// `<title>`, then the first `<h1>`.
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    select_first_content(&document, r#"meta[property="og:title"]"#)
        .or_else(|| select_first_content(&document, r#"meta[name="title"]"#))
        .or_else(|| select_first_text(&document, "title"))
        .or_else(|| select_first_text(&document, "h1"))
}

/// Extract the main content region of a page, falling back to the whole
/// body. Used by the basic scraper when readability-grade extraction is
/// not available.
pub fn extract_main_content_html(html: &str) -> String {
    let document = Html::parse_document(html);

    for selector_str in ["article", "main", r#"[role="main"]"#] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                return element.html();
            }
        }
    }

    if let Ok(selector) = Selector::parse("body") {
        if let Some(body) = document.select(&selector).next() {
            return body.html();
        }
    }

    html.to_string()
}
