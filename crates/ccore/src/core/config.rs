//! Extraction configuration.
//!
//! Each request derives an immutable [`ExtractionConfig`] snapshot from the
//! environment via [`ExtractionConfig::from_env`]. Programmatic setters
//! (`set_audio_concurrency` and friends) write into a process-wide override
//! table consulted by the snapshot, so they win over environment variables
//! until [`reset_config_overrides`] is called. Engines never mutate a
//! snapshot.
//!
//! Recognized environment variables:
//!
//! | Key | Effect |
//! |---|---|
//! | `CCORE_DOCUMENT_ENGINE` | Legacy single engine for document MIMEs |
//! | `CCORE_URL_ENGINE` | Legacy single engine for URL extraction |
//! | `CCORE_ENGINE_<MIME>` | Comma-separated chain for a specific MIME type |
//! | `CCORE_ENGINE_<CATEGORY>` | Comma-separated chain for a category |
//! | `CCORE_FALLBACK_ENABLED` | bool |
//! | `CCORE_FALLBACK_MAX_ATTEMPTS` | int in `[1, 10]` |
//! | `CCORE_FALLBACK_ON_ERROR` | `next` \| `warn` \| `fail` |
//! | `CCORE_AUDIO_CONCURRENCY` | int in `[1, 10]`, default 3 |
//! | `CCORE_YOUTUBE_LANGUAGES` | comma-separated language codes |
//! | `CCORE_RETRY_<OP>_*` | per-operation retry tuning (see `retry`) |

use crate::core::mime::env_suffix_for_mime;
use crate::error::{CcoreError, Result};
use crate::retry::RetryPolicy;
use crate::types::Category;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_AUDIO_CONCURRENCY: usize = 3;
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

const ENGINE_ENV_PREFIX: &str = "CCORE_ENGINE_";

/// What the router does when an engine in the chain fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Move to the next engine silently.
    Next,
    /// Append a warning describing the failure, then move on.
    #[default]
    Warn,
    /// Abort the extraction with the engine's error.
    Fail,
}

impl OnError {
    pub fn parse(s: &str) -> Option<OnError> {
        match s {
            "next" => Some(OnError::Next),
            "warn" => Some(OnError::Warn),
            "fail" => Some(OnError::Fail),
            _ => None,
        }
    }
}

/// Fallback behavior for the extraction router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub enabled: bool,
    /// Maximum number of engines attempted, clamped to `[1, 10]`.
    pub max_attempts: usize,
    pub on_error: OnError,
    /// Error-kind tokens that abort immediately, bypassing `on_error`.
    pub fatal_errors: Vec<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            on_error: OnError::Warn,
            fatal_errors: vec![
                "IoError".to_string(),
                "ValidationError".to_string(),
                "FatalInternal".to_string(),
            ],
        }
    }
}

impl FallbackConfig {
    fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("CCORE_FALLBACK_ENABLED") {
            config.enabled = matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on");
        }
        if let Ok(raw) = std::env::var("CCORE_FALLBACK_MAX_ATTEMPTS") {
            match raw.parse::<usize>() {
                Ok(v) if (1..=10).contains(&v) => config.max_attempts = v,
                _ => tracing::warn!(
                    value = %raw,
                    "Invalid CCORE_FALLBACK_MAX_ATTEMPTS (must be 1-10), keeping {}",
                    config.max_attempts
                ),
            }
        }
        if let Ok(raw) = std::env::var("CCORE_FALLBACK_ON_ERROR") {
            match OnError::parse(&raw) {
                Some(v) => config.on_error = v,
                None => tracing::warn!(
                    value = %raw,
                    "Invalid CCORE_FALLBACK_ON_ERROR (must be next|warn|fail), keeping warn"
                ),
            }
        }

        config
    }

    pub fn is_fatal_kind(&self, kind: crate::error::ErrorKind) -> bool {
        self.fatal_errors.iter().any(|k| k == kind.as_str())
    }
}

/// Audio pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Concurrent segment transcriptions, clamped to `[1, 10]`.
    pub concurrency: usize,
    /// Speech-to-text provider override (paired with `model`).
    pub provider: Option<String>,
    /// Speech-to-text model override (paired with `provider`).
    pub model: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_AUDIO_CONCURRENCY,
            provider: None,
            model: None,
            retry: RetryPolicy::for_operation("audio"),
        }
    }
}

impl AudioConfig {
    fn from_env(overrides: &ConfigOverrides) -> Self {
        let mut config = Self::default();

        if let Some(concurrency) = overrides.audio_concurrency {
            config.concurrency = concurrency;
        } else if let Ok(raw) = std::env::var("CCORE_AUDIO_CONCURRENCY") {
            config.concurrency = parse_audio_concurrency(&raw);
        }

        config
    }
}

/// Parse and clamp an audio concurrency value; invalid input warns and
/// falls back to the default of 3.
pub(crate) fn parse_audio_concurrency(raw: &str) -> usize {
    match raw.parse::<usize>() {
        Ok(v) if (1..=10).contains(&v) => v,
        Ok(v) => {
            tracing::warn!(
                value = v,
                "CCORE_AUDIO_CONCURRENCY out of range (must be 1-10), using {}",
                DEFAULT_AUDIO_CONCURRENCY
            );
            DEFAULT_AUDIO_CONCURRENCY
        }
        Err(_) => {
            tracing::warn!(
                value = %raw,
                "CCORE_AUDIO_CONCURRENCY is not an integer, using {}",
                DEFAULT_AUDIO_CONCURRENCY
            );
            DEFAULT_AUDIO_CONCURRENCY
        }
    }
}

/// Immutable per-request configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Overall extraction budget in seconds.
    pub timeout: u64,
    /// Engine chains keyed by normalized env suffix (`APPLICATION_PDF`,
    /// `IMAGE`, `DOCUMENTS`, ...). Populated from `CCORE_ENGINE_*`.
    pub engine_chains: HashMap<String, Vec<String>>,
    /// Legacy single-engine override for document MIMEs.
    pub document_engine: Option<String>,
    /// Legacy single-engine override for URL extraction.
    pub url_engine: Option<String>,
    pub fallback: FallbackConfig,
    /// Per-engine opaque option records keyed by engine name.
    pub engine_options: HashMap<String, serde_json::Value>,
    pub audio: AudioConfig,
    /// Preferred YouTube caption languages, in order.
    pub youtube_languages: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECONDS,
            engine_chains: HashMap::new(),
            document_engine: None,
            url_engine: None,
            fallback: FallbackConfig::default(),
            engine_options: HashMap::new(),
            audio: AudioConfig::default(),
            youtube_languages: default_youtube_languages(),
        }
    }
}

fn default_youtube_languages() -> Vec<String> {
    vec!["en".to_string(), "es".to_string(), "pt".to_string()]
}

fn parse_engine_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl ExtractionConfig {
    /// Build a snapshot from the environment, with programmatic overrides
    /// applied on top.
    pub fn from_env() -> Self {
        let overrides = CONFIG_OVERRIDES
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default();

        let mut config = Self {
            fallback: FallbackConfig::from_env(),
            audio: AudioConfig::from_env(&overrides),
            ..Self::default()
        };

        for (key, value) in std::env::vars() {
            if let Some(suffix) = key.strip_prefix(ENGINE_ENV_PREFIX) {
                let chain = parse_engine_list(&value);
                if !chain.is_empty() {
                    config.engine_chains.insert(suffix.to_string(), chain);
                }
            }
        }

        config.document_engine = overrides
            .document_engine
            .clone()
            .or_else(|| std::env::var("CCORE_DOCUMENT_ENGINE").ok())
            .filter(|v| !v.trim().is_empty());
        config.url_engine = overrides
            .url_engine
            .clone()
            .or_else(|| std::env::var("CCORE_URL_ENGINE").ok())
            .filter(|v| !v.trim().is_empty());

        if let Some(timeout) = overrides.timeout {
            config.timeout = timeout;
        }

        if let Ok(raw) = std::env::var("CCORE_YOUTUBE_LANGUAGES") {
            let languages = parse_engine_list(&raw);
            if !languages.is_empty() {
                config.youtube_languages = languages;
            }
        }

        config
    }

    /// Engine chain configured for a specific MIME type (exact form only;
    /// wildcards are resolved through [`Self::chain_for_wildcard`]).
    pub fn chain_for_mime(&self, mime: &str) -> Option<&[String]> {
        if mime.ends_with("/*") {
            return self.chain_for_wildcard(mime);
        }
        self.engine_chains
            .get(&env_suffix_for_mime(mime))
            .map(Vec::as_slice)
    }

    /// Engine chain configured for the wildcard pattern covering `mime`.
    pub fn chain_for_wildcard(&self, mime: &str) -> Option<&[String]> {
        let primary = mime.split('/').next().filter(|p| !p.is_empty())?;
        self.engine_chains
            .get(&primary.to_ascii_uppercase())
            .map(Vec::as_slice)
    }

    /// Engine chain configured for a category.
    pub fn chain_for_category(&self, category: Category) -> Option<&[String]> {
        self.engine_chains
            .get(&category.as_str().to_ascii_uppercase())
            .map(Vec::as_slice)
    }

    /// Options for one engine; empty object when not configured.
    pub fn options_for_engine(&self, engine: &str) -> serde_json::Value {
        self.engine_options
            .get(engine)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}))
    }
}

/// Programmatic configuration overrides, consulted by `from_env`.
#[derive(Debug, Clone, Default)]
struct ConfigOverrides {
    audio_concurrency: Option<usize>,
    document_engine: Option<String>,
    url_engine: Option<String>,
    timeout: Option<u64>,
}

static CONFIG_OVERRIDES: Lazy<RwLock<ConfigOverrides>> = Lazy::new(|| RwLock::new(ConfigOverrides::default()));

fn with_overrides<F: FnOnce(&mut ConfigOverrides)>(f: F) {
    if let Ok(mut guard) = CONFIG_OVERRIDES.write() {
        f(&mut guard);
    }
}

/// Override the audio segment concurrency for all subsequent requests.
pub fn set_audio_concurrency(concurrency: usize) -> Result<()> {
    if !(1..=10).contains(&concurrency) {
        return Err(CcoreError::validation(format!(
            "audio concurrency must be between 1 and 10, got {concurrency}"
        )));
    }
    with_overrides(|o| o.audio_concurrency = Some(concurrency));
    Ok(())
}

/// Override the legacy document engine for all subsequent requests.
pub fn set_document_engine(engine: impl Into<String>) {
    with_overrides(|o| o.document_engine = Some(engine.into()));
}

/// Override the legacy URL engine for all subsequent requests.
pub fn set_url_engine(engine: impl Into<String>) {
    with_overrides(|o| o.url_engine = Some(engine.into()));
}

/// Override the default extraction timeout for all subsequent requests.
pub fn set_timeout(seconds: u64) {
    with_overrides(|o| o.timeout = Some(seconds));
}

/// Clear every programmatic override.
pub fn reset_config_overrides() {
    with_overrides(|o| *o = ConfigOverrides::default());
}
