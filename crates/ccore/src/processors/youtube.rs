//! YouTube transcript extraction.
//!
//! Captions are retrieved without downloading the video: the watch page's
//! player response lists caption tracks, the selected track's timedtext
//! URL yields the transcript. When the watch-page scrape cannot be
//! parsed, a secondary path queries the Innertube player endpoint.
//!
//! A valid video with no caption tracks is a success with empty content
//! and explanatory metadata, not an error.

use crate::error::{CcoreError, Result};
use crate::processors::{warn_unknown_options, Processor, ProcessorContext};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{Category, ProcessorCapabilities, ProcessorResult, Source};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use serde::Serialize;

static VIDEO_ID_RE: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(
        r"(?:https?://)?(?:www\.)?(?:youtu\.be/|youtube\.com(?:/embed/|/v/|/shorts/|/watch\?v=|/watch\?.+&v=))([\w-]{11})",
    )
    .expect("static regex")
});

/// Extract the 11-character video id from a YouTube URL.
pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq)]
struct CaptionTrack {
    base_url: String,
    language_code: String,
    auto_generated: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct CaptionLine {
    text: String,
    start: f64,
    duration: f64,
}

/// Scan a balanced JSON object starting at `start` (which must point at a
/// `{`), honoring strings and escapes.
fn extract_json_object(source: &str, start: usize) -> Option<&str> {
    let bytes = source.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&source[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull `ytInitialPlayerResponse` out of watch-page HTML.
fn parse_player_response(html: &str) -> Result<serde_json::Value> {
    let marker = "ytInitialPlayerResponse";
    let marker_pos = html
        .find(marker)
        .ok_or_else(|| CcoreError::parse("watch page carried no player response"))?;

    let after = &html[marker_pos + marker.len()..];
    let brace_offset = after
        .find('{')
        .ok_or_else(|| CcoreError::parse("player response assignment is malformed"))?;
    let json = extract_json_object(after, brace_offset)
        .ok_or_else(|| CcoreError::parse("player response JSON is unbalanced"))?;

    serde_json::from_str(json).map_err(|e| CcoreError::parse_with_source("player response is not valid JSON", e))
}

fn tracks_from_player_response(player: &serde_json::Value) -> Vec<CaptionTrack> {
    player
        .pointer("/captions/playerCaptionsTracklistRenderer/captionTracks")
        .and_then(|v| v.as_array())
        .map(|tracks| {
            tracks
                .iter()
                .filter_map(|track| {
                    Some(CaptionTrack {
                        base_url: track.get("baseUrl")?.as_str()?.to_string(),
                        language_code: track
                            .get("languageCode")
                            .and_then(|v| v.as_str())
                            .unwrap_or("und")
                            .to_string(),
                        auto_generated: track.get("kind").and_then(|v| v.as_str()) == Some("asr"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn language_matches(track_language: &str, preferred: &str) -> bool {
    track_language == preferred || track_language.starts_with(&format!("{preferred}-"))
}

/// Walk the preferred languages: manual tracks first, then auto-generated
/// variants. When nothing matches, the first track is used with a
/// warning.
fn select_track<'a>(
    tracks: &'a [CaptionTrack],
    preferred_languages: &[String],
) -> Option<(&'a CaptionTrack, Option<String>)> {
    for language in preferred_languages {
        if let Some(track) = tracks
            .iter()
            .find(|t| !t.auto_generated && language_matches(&t.language_code, language))
        {
            return Some((track, None));
        }
    }
    for language in preferred_languages {
        if let Some(track) = tracks
            .iter()
            .find(|t| t.auto_generated && language_matches(&t.language_code, language))
        {
            return Some((track, None));
        }
    }

    tracks.first().map(|track| {
        let warning = format!(
            "no caption track matched preferred languages {:?}; using '{}'",
            preferred_languages, track.language_code
        );
        (track, Some(warning))
    })
}

/// Parse timedtext XML into caption lines.
fn parse_timedtext(xml: &str) -> Result<Vec<CaptionLine>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut lines = Vec::new();

    let mut current: Option<CaptionLine> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"text" => {
                let mut start = 0.0;
                let mut duration = 0.0;
                for attr in e.attributes().flatten() {
                    let value = attr.unescape_value().unwrap_or_default();
                    match attr.key.as_ref() {
                        b"start" => start = value.parse().unwrap_or(0.0),
                        b"dur" => duration = value.parse().unwrap_or(0.0),
                        _ => {}
                    }
                }
                current = Some(CaptionLine {
                    text: String::new(),
                    start,
                    duration,
                });
            }
            Ok(Event::Text(t)) => {
                if let Some(line) = current.as_mut() {
                    line.text.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"text" => {
                if let Some(mut line) = current.take() {
                    line.text = line.text.trim().to_string();
                    if !line.text.is_empty() {
                        lines.push(line);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(CcoreError::parse_with_source("malformed timedtext XML", e)),
            _ => {}
        }
    }
    Ok(lines)
}

/// YouTube transcript engine. Detected by URL shape rather than a real
/// MIME type; the resolver short-circuits YouTube sources to this engine.
pub struct YouTubeProcessor {
    capabilities: ProcessorCapabilities,
}

impl YouTubeProcessor {
    pub fn new() -> Self {
        Self {
            capabilities: ProcessorCapabilities::new(&[crate::core::mime::YOUTUBE_MIME_TYPE], 60, Category::Youtube),
        }
    }

    async fn fetch_watch_page(&self, video_id: &str) -> Result<String> {
        let url = format!("https://www.youtube.com/watch?v={video_id}");
        let response = crate::processors::url::HTTP_CLIENT.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(crate::error::status_to_error(
                status,
                format!("watch page for {video_id} returned {status}"),
            ));
        }
        Ok(response.text().await?)
    }

    /// Secondary path: the Innertube player endpoint, queried as the
    /// Android client, which returns the same caption track listing.
    async fn fetch_tracks_via_player_api(&self, video_id: &str) -> Result<Vec<CaptionTrack>> {
        let body = serde_json::json!({
            "context": {
                "client": {
                    "clientName": "ANDROID",
                    "clientVersion": "19.09.37",
                    "androidSdkVersion": 30,
                }
            },
            "videoId": video_id,
        });

        let response = crate::processors::url::HTTP_CLIENT
            .post("https://www.youtube.com/youtubei/v1/player")
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(crate::error::status_to_error(
                status,
                format!("player API for {video_id} returned {status}"),
            ));
        }
        let player: serde_json::Value = response.json().await?;
        Ok(tracks_from_player_response(&player))
    }

    async fn fetch_caption_lines(&self, track: &CaptionTrack) -> Result<Vec<CaptionLine>> {
        let response = crate::processors::url::HTTP_CLIENT.get(&track.base_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(crate::error::status_to_error(
                status,
                format!("caption fetch returned {status}"),
            ));
        }
        let xml = response.text().await?;
        parse_timedtext(&xml)
    }

    fn no_captions_result(video_id: &str, title: String) -> ProcessorResult {
        let mut result = ProcessorResult::new("", crate::core::mime::PLAIN_TEXT_MIME_TYPE);
        result.metadata.title = Some(title);
        result.metadata.insert("video_id", serde_json::json!(video_id));
        result.metadata.insert("error", serde_json::json!("no_captions"));
        result.metadata.insert("message", serde_json::json!("No captions available"));
        result
    }
}

impl Default for YouTubeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for YouTubeProcessor {
    fn name(&self) -> &str {
        "youtube"
    }

    fn capabilities(&self) -> &ProcessorCapabilities {
        &self.capabilities
    }

    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult> {
        warn_unknown_options(self.name(), &ctx.options, &[]);

        let url = source
            .as_url()
            .ok_or_else(|| CcoreError::unsupported("YouTube extraction requires a URL"))?;
        let video_id = extract_video_id(url)
            .ok_or_else(|| CcoreError::parse(format!("could not extract a video id from '{url}'")))?;

        let policy = RetryPolicy::for_operation("youtube");

        // Title failures are non-fatal; the transcript is the payload.
        let mut warnings = Vec::new();
        let watch_page = retry_with_backoff(&policy, "youtube-watch-page", || self.fetch_watch_page(&video_id)).await;

        let (title, tracks) = match &watch_page {
            Ok(html) => {
                let title = crate::extraction::html::extract_title(html)
                    .unwrap_or_else(|| format!("YouTube Video {video_id}"));
                match parse_player_response(html) {
                    Ok(player) => (title, tracks_from_player_response(&player)),
                    Err(parse_err) => {
                        tracing::warn!(
                            video_id = %video_id,
                            "Falling back to player API for caption tracks: {parse_err}"
                        );
                        let tracks = retry_with_backoff(&policy, "youtube-player-api", || {
                            self.fetch_tracks_via_player_api(&video_id)
                        })
                        .await?;
                        (title, tracks)
                    }
                }
            }
            Err(e) => {
                tracing::error!(video_id = %video_id, "Failed to fetch watch page: {e}");
                let tracks = retry_with_backoff(&policy, "youtube-player-api", || {
                    self.fetch_tracks_via_player_api(&video_id)
                })
                .await?;
                (format!("YouTube Video {video_id}"), tracks)
            }
        };

        if tracks.is_empty() {
            return Ok(Self::no_captions_result(&video_id, title));
        }

        let (track, language_warning) = select_track(&tracks, &ctx.youtube_languages)
            .ok_or_else(|| CcoreError::Internal("track list emptied after selection".to_string()))?;
        if let Some(warning) = language_warning {
            tracing::warn!(video_id = %video_id, "{warning}");
            warnings.push(warning);
        }

        let lines = retry_with_backoff(&policy, "youtube-captions", || self.fetch_caption_lines(track)).await?;
        if lines.is_empty() {
            return Err(CcoreError::unsupported(format!(
                "caption track '{}' exists but produced no text",
                track.language_code
            )));
        }

        let content = lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n");

        let mut result = ProcessorResult::new(content, crate::core::mime::PLAIN_TEXT_MIME_TYPE);
        result.warnings = warnings;
        result.metadata.title = Some(title);
        result.metadata.insert("video_id", serde_json::json!(video_id));
        result.metadata.insert("language", serde_json::json!(track.language_code));
        result
            .metadata
            .insert("auto_generated", serde_json::json!(track.auto_generated));
        result.metadata.insert("transcript", serde_json::to_value(&lines)?);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_extraction() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?list=PL123&v=dQw4w9WgXcQ",
            "youtube.com/watch?v=dQw4w9WgXcQ",
        ] {
            assert_eq!(extract_video_id(url).as_deref(), Some("dQw4w9WgXcQ"), "url: {url}");
        }
    }

    #[test]
    fn test_video_id_extraction_failures() {
        assert_eq!(extract_video_id("https://example.com/watch?v=dQw4w9WgXcQ"), None);
        assert_eq!(extract_video_id("https://www.youtube.com/"), None);
        assert_eq!(extract_video_id("https://www.youtube.com/watch?v=short"), None);
    }

    #[test]
    fn test_json_object_extraction() {
        let source = r#"var ytInitialPlayerResponse = {"a": {"b": "}"}, "c": [1, 2]};</script>"#;
        let start = source.find('{').unwrap();
        let json = extract_json_object(source, start).unwrap();
        assert_eq!(json, r#"{"a": {"b": "}"}, "c": [1, 2]}"#);
        let parsed: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(parsed["c"][1], 2);
    }

    #[test]
    fn test_json_object_extraction_unbalanced() {
        let source = r#"{"a": {"b": 1}"#;
        assert_eq!(extract_json_object(source, 0), None);
    }

    #[test]
    fn test_player_response_parsing() {
        let html = r#"<script>var ytInitialPlayerResponse = {"captions":{"playerCaptionsTracklistRenderer":{"captionTracks":[
            {"baseUrl":"https://yt.test/tt?lang=en","languageCode":"en"},
            {"baseUrl":"https://yt.test/tt?lang=pt&kind=asr","languageCode":"pt","kind":"asr"}
        ]}}};</script>"#;
        let player = parse_player_response(html).unwrap();
        let tracks = tracks_from_player_response(&player);
        assert_eq!(tracks.len(), 2);
        assert!(!tracks[0].auto_generated);
        assert!(tracks[1].auto_generated);
        assert_eq!(tracks[1].language_code, "pt");
    }

    #[test]
    fn test_player_response_missing_is_parse_error() {
        let err = parse_player_response("<html><body>nothing here</body></html>").unwrap_err();
        assert!(matches!(err, CcoreError::Parse { .. }));
    }

    fn track(lang: &str, asr: bool) -> CaptionTrack {
        CaptionTrack {
            base_url: format!("https://yt.test/{lang}"),
            language_code: lang.to_string(),
            auto_generated: asr,
        }
    }

    fn langs(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_track_selection_manual_beats_auto() {
        let tracks = vec![track("en", true), track("en", false)];
        let (selected, warning) = select_track(&tracks, &langs(&["en", "es"])).unwrap();
        assert!(!selected.auto_generated);
        assert!(warning.is_none());
    }

    #[test]
    fn test_track_selection_manual_pass_covers_all_languages_first() {
        // The manual pass walks every preferred language before any
        // auto-generated track is considered, so manual es beats asr en.
        let tracks = vec![track("en", true), track("es", false)];
        let (selected, _) = select_track(&tracks, &langs(&["en", "es"])).unwrap();
        assert_eq!(selected.language_code, "es");
        assert!(!selected.auto_generated);
    }

    #[test]
    fn test_track_selection_regional_variants() {
        let tracks = vec![track("en-US", false)];
        let (selected, warning) = select_track(&tracks, &langs(&["en"])).unwrap();
        assert_eq!(selected.language_code, "en-US");
        assert!(warning.is_none());
    }

    #[test]
    fn test_track_selection_fallback_with_warning() {
        let tracks = vec![track("ja", false)];
        let (selected, warning) = select_track(&tracks, &langs(&["en", "es"])).unwrap();
        assert_eq!(selected.language_code, "ja");
        assert!(warning.unwrap().contains("ja"));
    }

    #[test]
    fn test_track_selection_empty() {
        assert!(select_track(&[], &langs(&["en"])).is_none());
    }

    #[test]
    fn test_timedtext_parsing() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<transcript>
  <text start="0.12" dur="2.5">Hello &amp; welcome</text>
  <text start="2.62" dur="1.8">to the show</text>
  <text start="4.42" dur="1.0">   </text>
</transcript>"#;
        let lines = parse_timedtext(xml).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Hello & welcome");
        assert_eq!(lines[0].start, 0.12);
        assert_eq!(lines[0].duration, 2.5);
        assert_eq!(lines[1].text, "to the show");
    }

    #[test]
    fn test_no_captions_result_shape() {
        let result = YouTubeProcessor::no_captions_result("abc123def45", "Some Video".to_string());
        assert_eq!(result.content, "");
        assert_eq!(result.metadata.title.as_deref(), Some("Some Video"));
        assert_eq!(
            result.metadata.additional.get("error").unwrap(),
            &serde_json::json!("no_captions")
        );
        assert_eq!(
            result.metadata.additional.get("message").unwrap(),
            &serde_json::json!("No captions available")
        );
    }

    #[tokio::test]
    async fn test_non_url_source_rejected() {
        let processor = YouTubeProcessor::new();
        let result = processor
            .extract(&Source::file("/tmp/video.mp4"), &ProcessorContext::default())
            .await;
        assert!(matches!(result.unwrap_err(), CcoreError::UnsupportedContent { .. }));
    }

    #[tokio::test]
    async fn test_malformed_url_is_parse_error() {
        let processor = YouTubeProcessor::new();
        let result = processor
            .extract(
                &Source::url("https://www.youtube.com/no-video-here"),
                &ProcessorContext::default(),
            )
            .await;
        assert!(matches!(result.unwrap_err(), CcoreError::Parse { .. }));
    }
}
