//! MIME type constants, detection, and category mapping.
//!
//! Classification is deliberately shallow: extension lookup for files, URL
//! shape for the web (with YouTube detected by host), and a light HTML
//! sniff for raw text. Magic-byte sniffing belongs to the external file
//! detector and is out of scope here.

use crate::types::{Category, Source, SourceOrigin};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;

pub const PLAIN_TEXT_MIME_TYPE: &str = "text/plain";
pub const MARKDOWN_MIME_TYPE: &str = "text/markdown";
pub const HTML_MIME_TYPE: &str = "text/html";
pub const PDF_MIME_TYPE: &str = "application/pdf";
pub const DOCX_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const XLSX_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const PPTX_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const ODT_MIME_TYPE: &str = "application/vnd.oasis.opendocument.text";
pub const EPUB_MIME_TYPE: &str = "application/epub+zip";
pub const MP3_MIME_TYPE: &str = "audio/mpeg";
pub const MP4_MIME_TYPE: &str = "video/mp4";

/// Pseudo MIME type for YouTube URLs. Not a real media type; it exists so
/// the resolver can route YouTube links to the transcript processor ahead
/// of the generic URL cascade.
pub const YOUTUBE_MIME_TYPE: &str = "youtube";

/// Extension to MIME type mapping.
static EXT_TO_MIME: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    m.insert("txt", PLAIN_TEXT_MIME_TYPE);
    m.insert("text", PLAIN_TEXT_MIME_TYPE);
    m.insert("md", MARKDOWN_MIME_TYPE);
    m.insert("markdown", MARKDOWN_MIME_TYPE);
    m.insert("csv", "text/csv");

    m.insert("html", HTML_MIME_TYPE);
    m.insert("htm", HTML_MIME_TYPE);

    m.insert("pdf", PDF_MIME_TYPE);

    m.insert("docx", DOCX_MIME_TYPE);
    m.insert("xlsx", XLSX_MIME_TYPE);
    m.insert("pptx", PPTX_MIME_TYPE);
    m.insert("odt", ODT_MIME_TYPE);
    m.insert("epub", EPUB_MIME_TYPE);

    m.insert("bmp", "image/bmp");
    m.insert("gif", "image/gif");
    m.insert("jpg", "image/jpeg");
    m.insert("jpeg", "image/jpeg");
    m.insert("png", "image/png");
    m.insert("tiff", "image/tiff");
    m.insert("tif", "image/tiff");
    m.insert("webp", "image/webp");

    m.insert("mp3", MP3_MIME_TYPE);
    m.insert("wav", "audio/wav");
    m.insert("m4a", "audio/mp4");
    m.insert("flac", "audio/flac");
    m.insert("ogg", "audio/ogg");
    m.insert("aac", "audio/aac");

    m.insert("mp4", MP4_MIME_TYPE);
    m.insert("mpeg", "video/mpeg");
    m.insert("mpg", "video/mpeg");
    m.insert("mov", "video/quicktime");
    m.insert("avi", "video/x-msvideo");
    m.insert("mkv", "video/x-matroska");
    m.insert("webm", "video/webm");

    m
});

/// Specific MIME types to categories.
static MIME_TO_CATEGORY: Lazy<HashMap<&'static str, Category>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(PDF_MIME_TYPE, Category::Documents);
    m.insert(EPUB_MIME_TYPE, Category::Documents);
    m.insert(DOCX_MIME_TYPE, Category::Documents);
    m.insert(XLSX_MIME_TYPE, Category::Documents);
    m.insert(PPTX_MIME_TYPE, Category::Documents);
    m.insert(ODT_MIME_TYPE, Category::Documents);
    m.insert(HTML_MIME_TYPE, Category::Urls);
    m.insert(PLAIN_TEXT_MIME_TYPE, Category::Text);
    m.insert(MARKDOWN_MIME_TYPE, Category::Text);
    m.insert("text/csv", Category::Text);
    m.insert(YOUTUBE_MIME_TYPE, Category::Youtube);
    m
});

/// Wildcard patterns to categories, checked after exact matches.
/// Images are processed by document engines.
static WILDCARD_TO_CATEGORY: &[(&str, Category)] = &[
    ("image/*", Category::Images),
    ("audio/*", Category::Audio),
    ("video/*", Category::Video),
    ("text/*", Category::Text),
];

/// Whether `pattern` covers `mime`. Patterns are either exact MIME types
/// or a primary type followed by `/*`.
pub fn mime_matches(pattern: &str, mime: &str) -> bool {
    if pattern == mime {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return mime
            .split_once('/')
            .is_some_and(|(primary, _)| primary == prefix);
    }
    false
}

/// The wildcard pattern covering `mime` (`"image/png"` → `"image/*"`).
pub fn wildcard_for(mime: &str) -> Option<String> {
    mime.split_once('/').map(|(primary, _)| format!("{primary}/*"))
}

/// Category for a MIME type: exact mapping first, wildcard second.
pub fn category_for_mime(mime: &str) -> Option<Category> {
    if let Some(cat) = MIME_TO_CATEGORY.get(mime) {
        return Some(*cat);
    }
    WILDCARD_TO_CATEGORY
        .iter()
        .find(|(pattern, _)| mime_matches(pattern, mime))
        .map(|(_, cat)| *cat)
}

/// MIME type from a file extension, when known.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    EXT_TO_MIME
        .get(extension.trim_start_matches('.').to_ascii_lowercase().as_str())
        .copied()
}

/// MIME type from a file path's extension.
pub fn detect_mime_from_path(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(mime_for_extension)
}

pub fn is_youtube_url(url: &str) -> bool {
    url.contains("youtube.com") || url.contains("youtu.be")
}

/// Light sniff for HTML markers in raw content.
pub fn looks_like_html(content: &str) -> bool {
    let trimmed = content.trim_start();
    let lowered = trimmed.get(..64.min(trimmed.len())).unwrap_or("").to_ascii_lowercase();
    lowered.starts_with("<!doctype html")
        || lowered.starts_with("<html")
        || (trimmed.starts_with('<') && trimmed.contains('>') && lowered.contains("</"))
}

/// Classify a source into a MIME type.
///
/// A declared MIME type on the source wins. Otherwise: URLs become
/// `youtube` or `text/html`, files go through the extension map, and raw
/// content is sniffed for HTML markers.
pub fn classify_source(source: &Source) -> Option<String> {
    if let Some(declared) = &source.mime_type {
        return Some(declared.clone());
    }

    match source.origin() {
        SourceOrigin::Url(url) => {
            if is_youtube_url(url) {
                Some(YOUTUBE_MIME_TYPE.to_string())
            } else {
                Some(HTML_MIME_TYPE.to_string())
            }
        }
        SourceOrigin::FilePath(path) => detect_mime_from_path(path).map(|m| m.to_string()),
        SourceOrigin::RawContent(content) => {
            if looks_like_html(content) {
                Some(HTML_MIME_TYPE.to_string())
            } else {
                Some(PLAIN_TEXT_MIME_TYPE.to_string())
            }
        }
    }
}

/// Environment key suffix for a MIME type: every non-alphanumeric byte
/// maps to `_`, uppercased. Wildcards use the bare primary type, so
/// `image/*` reads `CCORE_ENGINE_IMAGE`.
pub fn env_suffix_for_mime(mime: &str) -> String {
    let effective = mime.strip_suffix("/*").unwrap_or(mime);
    effective
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
