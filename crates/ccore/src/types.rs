//! Core data types shared across the extraction pipeline.

use crate::error::{CcoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Coarse grouping of MIME types for engine configuration and lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Documents,
    Urls,
    Audio,
    Video,
    Images,
    Text,
    Youtube,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Documents => "documents",
            Category::Urls => "urls",
            Category::Audio => "audio",
            Category::Video => "video",
            Category::Images => "images",
            Category::Text => "text",
            Category::Youtube => "youtube",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s {
            "documents" => Some(Category::Documents),
            "urls" => Some(Category::Urls),
            "audio" => Some(Category::Audio),
            "video" => Some(Category::Video),
            "images" => Some(Category::Images),
            "text" => Some(Category::Text),
            "youtube" => Some(Category::Youtube),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested output format for document engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Html,
    Structured,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<OutputFormat> {
        match s {
            "markdown" => Some(OutputFormat::Markdown),
            "html" => Some(OutputFormat::Html),
            "structured" => Some(OutputFormat::Structured),
            _ => None,
        }
    }
}

/// What a processor can handle, declared once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorCapabilities {
    /// MIME types this processor claims. Supports `"image/*"` wildcards.
    pub mime_types: Vec<String>,
    /// File extensions (with leading dot) recognized as a secondary hint.
    pub extensions: Vec<String>,
    /// Selection priority in `[0, 100]`; higher wins on ties.
    pub priority: i32,
    /// Capability tokens for external dependencies (e.g. `"ffmpeg"`).
    pub requires: Vec<String>,
    pub category: Category,
}

impl ProcessorCapabilities {
    pub fn new(mime_types: &[&str], priority: i32, category: Category) -> Self {
        Self {
            mime_types: mime_types.iter().map(|s| s.to_string()).collect(),
            extensions: Vec::new(),
            priority: priority.clamp(0, 100),
            requires: Vec::new(),
            category,
        }
    }

    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_requires(mut self, requires: &[&str]) -> Self {
        self.requires = requires.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Whether this processor claims `mime`, via exact or wildcard match.
    pub fn supports_mime(&self, mime: &str) -> bool {
        self.mime_types
            .iter()
            .any(|pattern| crate::core::mime::mime_matches(pattern, mime))
    }

    /// Whether this processor claims `mime` exactly (no wildcard expansion).
    pub fn supports_mime_exact(&self, mime: &str) -> bool {
        self.mime_types.iter().any(|pattern| pattern == mime)
    }

    pub fn supports_extension(&self, extension: &str) -> bool {
        let normalized = if extension.starts_with('.') {
            extension.to_ascii_lowercase()
        } else {
            format!(".{}", extension.to_ascii_lowercase())
        };
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&normalized))
    }
}

/// The origin of a request: exactly one of URL, file path, or raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    Url(String),
    FilePath(PathBuf),
    RawContent(String),
}

/// An immutable extraction request.
///
/// Construct via [`Source::url`], [`Source::file`] or [`Source::text`];
/// the origin enum guarantees exactly one origin is populated. Optional
/// hints are attached with the builder methods.
#[derive(Debug, Clone)]
pub struct Source {
    origin: SourceOrigin,
    /// Declared MIME type; detected when absent.
    pub mime_type: Option<String>,
    /// Requested output format for document engines.
    pub output_format: Option<OutputFormat>,
    /// Per-request engine override: a single name or an ordered chain.
    pub engines: Option<Vec<String>>,
    /// Per-engine opaque option records, keyed by engine name.
    pub engine_options: HashMap<String, serde_json::Value>,
    /// Overall extraction budget in seconds; config default when absent.
    pub timeout_seconds: Option<u64>,
    pub audio_provider: Option<String>,
    pub audio_model: Option<String>,
    pub audio_concurrency: Option<usize>,
}

impl Source {
    fn new(origin: SourceOrigin) -> Self {
        Self {
            origin,
            mime_type: None,
            output_format: None,
            engines: None,
            engine_options: HashMap::new(),
            timeout_seconds: None,
            audio_provider: None,
            audio_model: None,
            audio_concurrency: None,
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::new(SourceOrigin::Url(url.into()))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(SourceOrigin::FilePath(path.into()))
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(SourceOrigin::RawContent(content.into()))
    }

    pub fn origin(&self) -> &SourceOrigin {
        &self.origin
    }

    pub fn as_url(&self) -> Option<&str> {
        match &self.origin {
            SourceOrigin::Url(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_file_path(&self) -> Option<&std::path::Path> {
        match &self.origin {
            SourceOrigin::FilePath(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_raw_content(&self) -> Option<&str> {
        match &self.origin {
            SourceOrigin::RawContent(c) => Some(c),
            _ => None,
        }
    }

    /// A short description of the origin for metadata and logs.
    pub fn describe(&self) -> String {
        match &self.origin {
            SourceOrigin::Url(u) => u.clone(),
            SourceOrigin::FilePath(p) => p.display().to_string(),
            SourceOrigin::RawContent(_) => "inline".to_string(),
        }
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engines = Some(vec![engine.into()]);
        self
    }

    pub fn with_engines<I, S>(mut self, engines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.engines = Some(engines.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn with_engine_option(mut self, engine: impl Into<String>, options: serde_json::Value) -> Self {
        self.engine_options.insert(engine.into(), options);
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_audio_overrides(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        self.audio_provider = Some(provider.into());
        self.audio_model = Some(model.into());
        self
    }

    pub fn with_audio_concurrency(mut self, concurrency: usize) -> Self {
        self.audio_concurrency = Some(concurrency);
        self
    }

    /// Clone this request onto a downloaded file, keeping every hint.
    /// Used by the router when a URL turns out to serve a document
    /// payload that must go through the file pipeline.
    pub(crate) fn redirect_to_file(&self, path: PathBuf, mime_type: String) -> Source {
        let mut redirected = self.clone();
        redirected.origin = SourceOrigin::FilePath(path);
        redirected.mime_type = Some(mime_type);
        redirected
    }
}

/// Common result metadata.
///
/// Typed fields cover what every engine reports; engine-specific extras go
/// into the flattened `additional` map so the serialized form stays a
/// single flat object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Name of the engine that produced the result. Always present on a
    /// returned result; the executor stamps it unconditionally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_engine: Option<String>,

    /// Origin description (URL, file path, or `"inline"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Wall-clock extraction duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<usize>,

    /// Engine-specific extras, merged flat into the serialized object.
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl Metadata {
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.additional.insert(key.into(), value);
    }
}

/// Result produced by a single processor invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorResult {
    pub content: String,
    pub mime_type: String,
    pub metadata: Metadata,
    pub warnings: Vec<String>,
}

impl ProcessorResult {
    pub fn new(content: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            mime_type: mime_type.into(),
            metadata: Metadata::default(),
            warnings: Vec::new(),
        }
    }
}

/// The externally visible extraction result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub content: String,
    pub engine_used: String,
    pub metadata: Metadata,
    pub warnings: Vec<String>,
}

impl ExtractionResult {
    pub(crate) fn from_processor_result(result: ProcessorResult) -> Result<Self> {
        let engine_used = result
            .metadata
            .extraction_engine
            .clone()
            .ok_or_else(|| CcoreError::Internal("processor result missing extraction_engine".to_string()))?;
        Ok(Self {
            content: result.content,
            engine_used,
            metadata: result.metadata,
            warnings: result.warnings,
        })
    }
}
