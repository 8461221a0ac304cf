//! Video extraction: demux the best audio track, then re-enter the audio
//! pipeline.
//!
//! The demuxed track lives in a scoped temp directory owned by this call;
//! it is deleted on success, failure and cancellation alike.

use crate::error::{CcoreError, Result};
use crate::extraction::ffmpeg;
use crate::processors::{warn_unknown_options, Processor, ProcessorContext};
use crate::types::{Category, ProcessorCapabilities, ProcessorResult, Source};
use async_trait::async_trait;

pub struct VideoProcessor {
    capabilities: ProcessorCapabilities,
}

impl VideoProcessor {
    pub fn new() -> Self {
        Self {
            capabilities: ProcessorCapabilities::new(
                &[
                    "video/mp4",
                    "video/mpeg",
                    "video/quicktime",
                    "video/x-msvideo",
                    "video/x-matroska",
                    "video/webm",
                    "video/*",
                ],
                50,
                Category::Video,
            )
            .with_extensions(&[".mp4", ".mpeg", ".mpg", ".mov", ".avi", ".mkv", ".webm"])
            .with_requires(&["ffmpeg"]),
        }
    }
}

impl Default for VideoProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for VideoProcessor {
    fn name(&self) -> &str {
        "video"
    }

    fn capabilities(&self) -> &ProcessorCapabilities {
        &self.capabilities
    }

    fn is_available(&self) -> bool {
        ffmpeg::media_tools_available()
    }

    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult> {
        warn_unknown_options(self.name(), &ctx.options, &[]);

        let path = source
            .as_file_path()
            .ok_or_else(|| CcoreError::unsupported("video processor requires a file source"))?;

        let streams = ffmpeg::list_audio_streams(path).await?;
        let best = ffmpeg::select_best_stream(&streams).ok_or_else(|| {
            CcoreError::unsupported(format!("no audio streams found in {}", path.display()))
        })?;

        if let Some(stream) = streams.get(best) {
            tracing::debug!(
                stream = best,
                channels = ?stream.channels,
                sample_rate = ?stream.sample_rate,
                bit_rate = ?stream.bit_rate,
                "Selected audio stream for demux"
            );
        }

        let demux_dir = tempfile::tempdir()?;
        let audio_path = demux_dir.path().join("audio.mp3");
        ffmpeg::extract_audio_stream(path, &audio_path, best).await?;

        // Re-enter the audio pipeline with the demuxed track, carrying the
        // request's audio overrides through.
        let registry = crate::processors::global_registry();
        let audio_processor = {
            let registry = registry
                .read()
                .map_err(|e| CcoreError::Internal(format!("Processor registry lock poisoned: {e}")))?;
            registry.get("audio")
        }
        .ok_or_else(|| CcoreError::EngineUnavailable {
            engine: "audio".to_string(),
            missing: vec!["stt-api-key".to_string()],
        })?;

        let mut audio_source = Source::file(&audio_path).with_mime_type(crate::core::mime::MP3_MIME_TYPE);
        audio_source.audio_provider = source.audio_provider.clone();
        audio_source.audio_model = source.audio_model.clone();
        audio_source.audio_concurrency = source.audio_concurrency;

        let mut result = audio_processor.extract(&audio_source, ctx).await?;

        result.metadata.insert(
            "original_mime_type",
            serde_json::json!(source.mime_type.clone().unwrap_or_default()),
        );
        result.metadata.insert("demuxed_stream", serde_json::json!(best));
        Ok(result)
        // demux_dir drops here; the temp track is deleted on every path.
    }
}
