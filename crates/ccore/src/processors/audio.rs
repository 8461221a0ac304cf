//! Audio transcription pipeline.
//!
//! Long audio splits into contiguous segments which transcribe in
//! parallel under a counting admission gate; output is reassembled in
//! segment index order no matter the completion order. A failed segment
//! never cancels its siblings; the partial failure is reported after
//! every segment reaches a terminal state.

use crate::error::{CcoreError, Result, SegmentFailure};
use crate::extraction::ffmpeg;
use crate::processors::{warn_unknown_options, Processor, ProcessorContext};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{Category, ProcessorCapabilities, ProcessorResult, Source};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Audio at or below this duration skips segmentation entirely.
const SEGMENT_THRESHOLD_SECS: f64 = 600.0;
/// Target length of each segment when splitting.
const TARGET_SEGMENT_SECS: f64 = 600.0;

const DEFAULT_PROVIDER: &str = "openai";
const DEFAULT_MODEL: &str = "whisper-1";

/// A speech-to-text backend.
///
/// Implementations are process-wide safe for concurrent use; segment
/// tasks share one instance through an `Arc`.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, audio: &[u8], file_name: &str) -> Result<String>;
}

static STT_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .unwrap_or_default()
});

/// OpenAI-compatible Whisper transcription endpoint.
#[derive(Debug)]
pub struct OpenAiWhisperBackend {
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiWhisperBackend {
    pub fn new(model: Option<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CcoreError::EngineUnavailable {
                engine: "audio".to_string(),
                missing: vec!["stt-api-key".to_string()],
            })?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            api_key,
            base_url,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TranscriptionBackend for OpenAiWhisperBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn transcribe(&self, audio: &[u8], file_name: &str) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(file_name.to_string())
            .mime_str("audio/mpeg")
            .map_err(|e| CcoreError::Internal(format!("multipart mime: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", part);

        tracing::debug!(model = %self.model, bytes = audio.len(), "Sending audio to transcription API");

        let response = STT_CLIENT
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(crate::error::status_to_error(
                status,
                format!("transcription API returned {status}: {body}"),
            ));
        }

        let transcript = response.text().await?;
        Ok(transcript.trim().to_string())
    }
}

/// Resolve the backend from request overrides and config.
///
/// Provider and model must be supplied together; one without the other
/// logs a warning and falls back to defaults. An unknown provider also
/// falls back, and transcription continues.
fn resolve_backend(
    source: &Source,
    ctx: &ProcessorContext,
) -> Result<(Arc<dyn TranscriptionBackend>, Vec<String>)> {
    let mut warnings = Vec::new();

    let provider = source.audio_provider.clone().or_else(|| ctx.audio.provider.clone());
    let model = source.audio_model.clone().or_else(|| ctx.audio.model.clone());

    let (provider, model) = match (provider, model) {
        (Some(p), Some(m)) => (p, Some(m)),
        (None, None) => (DEFAULT_PROVIDER.to_string(), None),
        (partial_provider, partial_model) => {
            let supplied = if partial_provider.is_some() {
                "audio_provider"
            } else {
                "audio_model"
            };
            tracing::warn!(
                "{supplied} supplied without its counterpart; using default provider and model"
            );
            warnings.push(format!(
                "{supplied} supplied without its counterpart; used default provider and model"
            ));
            drop((partial_provider, partial_model));
            (DEFAULT_PROVIDER.to_string(), None)
        }
    };

    let backend: Arc<dyn TranscriptionBackend> = match provider.as_str() {
        DEFAULT_PROVIDER => Arc::new(OpenAiWhisperBackend::new(model)?),
        other => {
            tracing::error!(provider = other, "Unknown speech-to-text provider; falling back to defaults");
            warnings.push(format!(
                "unknown speech-to-text provider '{other}'; used default provider and model"
            ));
            Arc::new(OpenAiWhisperBackend::new(None)?)
        }
    };

    Ok((backend, warnings))
}

/// Request-level concurrency override, validated the same way as the
/// environment value.
fn effective_concurrency(source: &Source, ctx: &ProcessorContext) -> usize {
    match source.audio_concurrency {
        Some(v) if (1..=10).contains(&v) => v,
        Some(v) => {
            tracing::warn!(
                value = v,
                fallback = ctx.audio.concurrency,
                "Requested audio concurrency out of range (must be 1-10), using configured value"
            );
            ctx.audio.concurrency
        }
        None => ctx.audio.concurrency,
    }
}

/// Transcribe `files` with at most `concurrency` requests in flight.
///
/// Results come back in input order regardless of completion order. If
/// any segment fails after its retries, the error is raised only after
/// every sibling has reached a terminal state, and it carries the
/// per-segment breakdown.
async fn transcribe_files(
    backend: Arc<dyn TranscriptionBackend>,
    files: Vec<PathBuf>,
    concurrency: usize,
    policy: RetryPolicy,
) -> Result<Vec<String>> {
    let total = files.len();
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();

    for (index, path) in files.into_iter().enumerate() {
        let backend = Arc::clone(&backend);
        let semaphore = Arc::clone(&semaphore);
        let policy = policy.clone();

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("admission gate closed while tasks pending");

            let result = async {
                let bytes = tokio::fs::read(&path).await?;
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("segment.mp3")
                    .to_string();
                retry_with_backoff(&policy, "audio-segment", || backend.transcribe(&bytes, &file_name)).await
            }
            .await;

            (index, result)
        });
    }

    let mut transcripts: Vec<Option<String>> = vec![None; total];
    let mut failures: Vec<SegmentFailure> = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(text))) => transcripts[index] = Some(text),
            Ok((index, Err(err))) => failures.push(SegmentFailure {
                index,
                kind: err.kind(),
                message: err.to_string(),
            }),
            Err(join_err) if join_err.is_cancelled() => return Err(CcoreError::Cancelled),
            Err(join_err) => {
                return Err(CcoreError::Internal(format!("segment task panicked: {join_err}")));
            }
        }
    }

    if !failures.is_empty() {
        failures.sort_by_key(|f| f.index);
        let summary = failures
            .iter()
            .map(|f| format!("segment {}: {}", f.index, f.message))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(CcoreError::Transcription {
            message: format!("{}/{} segments failed: {summary}", failures.len(), total),
            segments: failures,
        });
    }

    Ok(transcripts.into_iter().map(|t| t.unwrap_or_default()).collect())
}

/// Speech-to-text extraction engine for audio files.
pub struct AudioProcessor {
    capabilities: ProcessorCapabilities,
}

impl AudioProcessor {
    pub fn new() -> Self {
        Self {
            capabilities: ProcessorCapabilities::new(&["audio/*"], 50, Category::Audio)
                .with_extensions(&[".mp3", ".wav", ".m4a", ".flac", ".ogg", ".aac"])
                .with_requires(&["ffmpeg", "stt-api-key"]),
        }
    }

    async fn split_into_segments(
        &self,
        path: &Path,
        duration: f64,
        dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let count = (duration / TARGET_SEGMENT_SECS).ceil().max(1.0) as usize;
        let segment_length = duration / count as f64;

        let mut segments = Vec::with_capacity(count);
        for index in 0..count {
            let output = dir.join(format!("segment_{index:03}.mp3"));
            let start = index as f64 * segment_length;
            ffmpeg::cut_segment(path, &output, start, segment_length).await?;
            segments.push(output);
        }
        Ok(segments)
    }
}

impl Default for AudioProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for AudioProcessor {
    fn name(&self) -> &str {
        "audio"
    }

    fn capabilities(&self) -> &ProcessorCapabilities {
        &self.capabilities
    }

    fn is_available(&self) -> bool {
        let has_key = std::env::var("OPENAI_API_KEY")
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false);
        ffmpeg::media_tools_available() && has_key
    }

    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult> {
        warn_unknown_options(self.name(), &ctx.options, &[]);

        let path = source
            .as_file_path()
            .ok_or_else(|| CcoreError::unsupported("audio processor requires a file source"))?;

        let (backend, mut warnings) = resolve_backend(source, ctx)?;
        let concurrency = effective_concurrency(source, ctx);
        let duration = ffmpeg::probe_duration(path).await?;

        // Segment artifacts live in a scoped directory: dropped (and thus
        // deleted) on success, failure, and cancellation alike.
        let segment_dir = tempfile::tempdir()?;
        let (segment_count, transcripts) = if duration > SEGMENT_THRESHOLD_SECS {
            let segments = self.split_into_segments(path, duration, segment_dir.path()).await?;
            tracing::info!(
                segments = segments.len(),
                concurrency,
                duration_secs = duration,
                "Transcribing segmented audio"
            );
            let count = segments.len();
            let transcripts =
                transcribe_files(Arc::clone(&backend), segments, concurrency, ctx.audio.retry.clone()).await?;
            (count, transcripts)
        } else {
            let transcripts =
                transcribe_files(Arc::clone(&backend), vec![path.to_path_buf()], 1, ctx.audio.retry.clone())
                    .await?;
            (1, transcripts)
        };

        let content = transcripts.join("\n");
        let mut result = ProcessorResult::new(content, crate::core::mime::PLAIN_TEXT_MIME_TYPE);
        result.warnings.append(&mut warnings);
        result.metadata.insert("duration_secs", serde_json::json!(duration));
        result.metadata.insert("segments", serde_json::json!(segment_count));
        result.metadata.insert("stt_provider", serde_json::json!(backend.name()));
        Ok(result)
    }
}
