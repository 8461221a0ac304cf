//! ffmpeg/ffprobe subprocess helpers for the media pipelines.
//!
//! Both binaries are resolved from `PATH`; availability is checked once
//! per process and memoized. Runtime failures surface stderr in the error
//! message.

use crate::error::{CcoreError, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;

static FFMPEG_AVAILABLE: Lazy<bool> = Lazy::new(|| binary_responds("ffmpeg"));
static FFPROBE_AVAILABLE: Lazy<bool> = Lazy::new(|| binary_responds("ffprobe"));

fn binary_responds(binary: &str) -> bool {
    std::process::Command::new(binary)
        .arg("-version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Whether both `ffmpeg` and `ffprobe` are on `PATH`. Memoized.
pub fn media_tools_available() -> bool {
    *FFMPEG_AVAILABLE && *FFPROBE_AVAILABLE
}

async fn run_checked(command: &mut Command, what: &str) -> Result<Vec<u8>> {
    let output = command.kill_on_drop(true).output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CcoreError::parse(format!(
            "{what} failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormatOutput {
    format: Option<ProbeFormat>,
}

/// Media duration in seconds, via `ffprobe -show_format`.
pub async fn probe_duration(path: &Path) -> Result<f64> {
    let stdout = run_checked(
        Command::new("ffprobe").args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
        ])
        .arg(path),
        "ffprobe",
    )
    .await?;

    let parsed: ProbeFormatOutput = serde_json::from_slice(&stdout)?;
    parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| CcoreError::parse("ffprobe reported no duration"))
}

/// One audio stream as reported by ffprobe.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioStream {
    #[serde(default)]
    pub codec_name: Option<String>,
    #[serde(default)]
    pub channels: Option<u32>,
    #[serde(default)]
    pub sample_rate: Option<String>,
    #[serde(default)]
    pub bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStreamsOutput {
    #[serde(default)]
    streams: Vec<AudioStream>,
}

/// All audio streams in a container, via `ffprobe -select_streams a`.
pub async fn list_audio_streams(path: &Path) -> Result<Vec<AudioStream>> {
    let stdout = run_checked(
        Command::new("ffprobe").args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-select_streams",
            "a",
        ])
        .arg(path),
        "ffprobe",
    )
    .await?;

    let parsed: ProbeStreamsOutput = serde_json::from_slice(&stdout)?;
    Ok(parsed.streams)
}

/// Score an audio stream for selection: bit rate (Mbps), channel count and
/// sample rate all contribute, so stereo high-bitrate tracks win over
/// commentary/mono tracks.
fn stream_score(stream: &AudioStream) -> u64 {
    let mut score = 0u64;
    if let Some(bit_rate) = stream.bit_rate.as_deref().and_then(|b| b.parse::<u64>().ok()) {
        score += bit_rate / 1_000_000;
    }
    score += u64::from(stream.channels.unwrap_or(0)) * 10;
    if let Some(sample_rate) = stream.sample_rate.as_deref().and_then(|s| s.parse::<u64>().ok()) {
        score += sample_rate / 48_000;
    }
    score
}

/// Index of the best audio stream, or `None` when there are none.
pub fn select_best_stream(streams: &[AudioStream]) -> Option<usize> {
    streams
        .iter()
        .enumerate()
        .max_by_key(|(_, stream)| stream_score(stream))
        .map(|(index, _)| index)
}

/// Demux one audio stream to MP3 with `ffmpeg`.
pub async fn extract_audio_stream(input: &Path, output: &Path, stream_position: usize) -> Result<()> {
    run_checked(
        Command::new("ffmpeg")
            .arg("-i")
            .arg(input)
            .args(["-map", &format!("0:a:{stream_position}")])
            .args(["-codec:a", "libmp3lame", "-q:a", "2", "-y"])
            .arg(output),
        "ffmpeg",
    )
    .await?;
    Ok(())
}

/// Cut a contiguous segment out of an audio file without re-encoding.
pub async fn cut_segment(input: &Path, output: &Path, start_seconds: f64, duration_seconds: f64) -> Result<()> {
    run_checked(
        Command::new("ffmpeg")
            .args(["-ss", &format!("{start_seconds:.3}")])
            .arg("-i")
            .arg(input)
            .args(["-t", &format!("{duration_seconds:.3}")])
            .args(["-c", "copy", "-y"])
            .arg(output),
        "ffmpeg",
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(bit_rate: Option<&str>, channels: Option<u32>, sample_rate: Option<&str>) -> AudioStream {
        AudioStream {
            codec_name: Some("aac".to_string()),
            channels,
            sample_rate: sample_rate.map(String::from),
            bit_rate: bit_rate.map(String::from),
        }
    }

    #[test]
    fn test_stream_scoring_prefers_stereo_high_bitrate() {
        let streams = vec![
            stream(Some("64000"), Some(1), Some("22050")),
            stream(Some("320000"), Some(2), Some("48000")),
            stream(None, Some(2), Some("44100")),
        ];
        assert_eq!(select_best_stream(&streams), Some(1));
    }

    #[test]
    fn test_stream_scoring_channels_break_ties() {
        let streams = vec![
            stream(None, Some(1), Some("48000")),
            stream(None, Some(6), Some("48000")),
        ];
        assert_eq!(select_best_stream(&streams), Some(1));
    }

    #[test]
    fn test_select_best_stream_empty() {
        assert_eq!(select_best_stream(&[]), None);
    }

    #[test]
    fn test_stream_score_handles_garbage_fields() {
        let s = stream(Some("not-a-number"), None, Some("weird"));
        assert_eq!(stream_score(&s), 0);
    }

    #[test]
    fn test_probe_output_parsing() {
        let json = r#"{"format": {"duration": "123.45"}}"#;
        let parsed: ProbeFormatOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.format.unwrap().duration.as_deref(), Some("123.45"));

        let json = r#"{"streams": [{"codec_name": "aac", "channels": 2, "sample_rate": "48000", "bit_rate": "128000"}]}"#;
        let parsed: ProbeStreamsOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.streams.len(), 1);
        assert_eq!(parsed.streams[0].channels, Some(2));
    }
}
