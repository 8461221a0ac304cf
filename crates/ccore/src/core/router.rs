//! Extraction routing: classify the source, resolve the engine chain,
//! execute it under the fallback policy, and stamp the final result.
//!
//! This is the seam the public API sits on. Non-YouTube URLs get a HEAD
//! sniff first: a URL serving a document payload (PDF, office file,
//! image) is downloaded to a scoped temp file and routed through the
//! document pipeline instead of the HTML cascade.

use crate::core::config::ExtractionConfig;
use crate::core::fallback::FallbackExecutor;
use crate::core::mime;
use crate::core::resolver::EngineResolver;
use crate::error::{CcoreError, Result};
use crate::processors::{self, ProcessorRegistry};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{ExtractionResult, Source};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

const URL_DOCUMENT_MIMES: &[&str] = &[
    mime::PDF_MIME_TYPE,
    mime::DOCX_MIME_TYPE,
    mime::XLSX_MIME_TYPE,
    mime::PPTX_MIME_TYPE,
    mime::ODT_MIME_TYPE,
    mime::EPUB_MIME_TYPE,
];

fn is_document_payload(mime_type: &str) -> bool {
    URL_DOCUMENT_MIMES.contains(&mime_type) || mime_type.starts_with("image/")
}

/// HEAD the URL and return its content type, when the server reports one.
/// Failures are non-fatal; the URL is then treated as an HTML page.
async fn sniff_url_content_type(url: &str) -> Option<String> {
    let policy = RetryPolicy::for_operation("url_network");
    let outcome = retry_with_backoff(&policy, "url-head", || async {
        let response = processors::url::HTTP_CLIENT.head(url).send().await?;
        Ok(response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase()))
    })
    .await;

    match outcome {
        Ok(Some(content_type)) if !content_type.is_empty() => Some(content_type),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(url, "HEAD check failed, treating URL as HTML: {e}");
            None
        }
    }
}

async fn download_url_to_temp(url: &str) -> Result<tempfile::NamedTempFile> {
    let policy = RetryPolicy::for_operation("download");
    let bytes = retry_with_backoff(&policy, "url-download", || async {
        let response = processors::url::HTTP_CLIENT.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(crate::error::status_to_error(
                status,
                format!("{url} returned {status}"),
            ));
        }
        Ok(response.bytes().await?)
    })
    .await?;

    let file = tempfile::NamedTempFile::new()?;
    tokio::fs::write(file.path(), &bytes).await?;
    Ok(file)
}

/// Extract content using the global registry and a fresh configuration
/// snapshot from the environment.
pub async fn route_and_extract(source: Source) -> Result<ExtractionResult> {
    let config = ExtractionConfig::from_env();
    route_and_extract_with_config(source, &config).await
}

/// Extract content with an explicit configuration snapshot.
pub async fn route_and_extract_with_config(source: Source, config: &ExtractionConfig) -> Result<ExtractionResult> {
    processors::ensure_initialized()?;
    let registry = processors::global_registry();
    extract_with_registry(source, config, &registry).await
}

pub(crate) async fn extract_with_registry(
    source: Source,
    config: &ExtractionConfig,
    registry: &Arc<RwLock<ProcessorRegistry>>,
) -> Result<ExtractionResult> {
    let started = Instant::now();
    let timeout_seconds = source.timeout_seconds.unwrap_or(config.timeout);
    let deadline = started + Duration::from_secs(timeout_seconds);
    let source_description = source.describe();

    // URL serving a document payload: download and re-route as a file.
    // The temp file guard lives until the extraction returns.
    let mut source = source;
    let mut _download_guard: Option<tempfile::NamedTempFile> = None;
    if let Some(url) = source.as_url().map(String::from) {
        if source.mime_type.is_none() && !mime::is_youtube_url(&url) {
            if let Some(content_type) = sniff_url_content_type(&url).await {
                if is_document_payload(&content_type) {
                    tracing::info!(%url, %content_type, "URL serves a document payload; downloading");
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let file = tokio::time::timeout(remaining, download_url_to_temp(&url))
                        .await
                        .map_err(|_| CcoreError::Timeout {
                            seconds: timeout_seconds,
                            attempts: Vec::new(),
                        })??;
                    source = source.redirect_to_file(file.path().to_path_buf(), content_type);
                    _download_guard = Some(file);
                }
            }
        }
    }

    let mime_type = mime::classify_source(&source).ok_or_else(|| {
        CcoreError::validation(format!(
            "could not detect a MIME type for '{source_description}'; pass one explicitly"
        ))
    })?;

    let chain = {
        let registry_guard = registry
            .read()
            .map_err(|e| CcoreError::Internal(format!("Processor registry lock poisoned: {e}")))?;
        EngineResolver::new(config).resolve(&registry_guard, &mime_type, source.engines.as_deref())?
    };
    tracing::info!(%mime_type, ?chain, "Resolved engine chain");

    let executor = FallbackExecutor::new(config);
    let mut result = executor
        .execute(registry, &source, &chain, deadline, timeout_seconds)
        .await?;

    result.metadata.source = Some(source_description);
    result.metadata.content_length = Some(result.content.len());
    result.metadata.extraction_time_ms = Some(started.elapsed().as_millis() as u64);

    ExtractionResult::from_processor_result(result)
}
