//! ccore - Content Extraction Core
//!
//! ccore ingests heterogeneous content sources (URLs, local files such as
//! PDF, office documents, plain text, HTML, audio and video, YouTube
//! links, and raw text) and produces a uniform structured extraction
//! result: cleaned textual content plus metadata.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ccore::{extract, Source};
//!
//! # async fn example() -> ccore::Result<()> {
//! let result = extract(Source::file("report.pdf")).await?;
//! println!("extracted by {}: {}", result.engine_used, result.content);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Processor registry** (`processors`): every engine declares its
//!   capabilities (MIME types, priority, required dependencies) and
//!   registers once at startup.
//! - **Engine resolver** (`core::resolver`): explicit override → env
//!   MIME chain → env wildcard → env category → legacy engine → auto.
//! - **Extraction router** (`core::router` + `core::fallback`): runs the
//!   resolved chain under the fallback policy and the overall timeout.
//! - **Pipelines**: the URL cascade, document engines, segmented
//!   parallel audio transcription, video demux, and YouTube transcripts.
//!
//! Configuration comes from `CCORE_*` environment variables, snapshotted
//! per request; see [`core::config`].

#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod extraction;
pub mod processors;
pub mod retry;
pub mod types;

pub use error::{CcoreError, EngineAttempt, ErrorKind, Result, SegmentFailure};
pub use types::{
    Category, ExtractionResult, Metadata, OutputFormat, ProcessorCapabilities, ProcessorResult, Source,
};

pub use core::config::{
    reset_config_overrides, set_audio_concurrency, set_document_engine, set_timeout, set_url_engine, AudioConfig,
    ExtractionConfig, FallbackConfig, OnError,
};
pub use core::router::{route_and_extract_with_config, route_and_extract};
pub use processors::{
    ensure_initialized, register_processor, EngineInfo, Processor, ProcessorContext, ProcessorRegistry,
};
pub use retry::RetryPolicy;

/// Extract content from a source.
///
/// Classifies the source, resolves the engine chain, and runs it with
/// fallback under the configured timeout. Configuration is snapshotted
/// from the environment for this call.
pub async fn extract(source: Source) -> Result<ExtractionResult> {
    core::router::route_and_extract(source).await
}

/// Extract content from a URL.
pub async fn extract_url(url: impl Into<String>) -> Result<ExtractionResult> {
    extract(Source::url(url)).await
}

/// Extract content from a local file.
pub async fn extract_file(path: impl Into<std::path::PathBuf>) -> Result<ExtractionResult> {
    extract(Source::file(path)).await
}

/// Extract content from raw text. Plain text passes through unchanged;
/// HTML is detected and converted to markdown.
pub async fn extract_text(content: impl Into<String>) -> Result<ExtractionResult> {
    extract(Source::text(content)).await
}

/// Capability records for every registered engine, including whether its
/// external dependencies are currently satisfied.
pub fn available_engines() -> Result<Vec<EngineInfo>> {
    ensure_initialized()?;
    let registry = processors::global_registry();
    let registry = registry
        .read()
        .map_err(|e| CcoreError::Internal(format!("Processor registry lock poisoned: {e}")))?;
    Ok(registry.describe())
}
