//! Processors: the engines that turn a [`Source`] into a
//! [`ProcessorResult`], plus the process-wide registry they live in.
//!
//! Built-in processors register once on first use via
//! [`ensure_initialized`]; custom engines can be added with
//! [`register_processor`] before the first extraction.

use crate::core::config::AudioConfig;
use crate::error::Result;
use crate::types::{OutputFormat, ProcessorCapabilities, ProcessorResult, Source};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

pub mod registry;

pub mod audio;
#[cfg(feature = "office")]
pub mod office;
#[cfg(feature = "pdf")]
pub mod pdf;
pub mod text;
pub mod url;
pub mod video;
pub mod youtube;

pub use registry::{EngineInfo, ProcessorRegistry};

/// Per-invocation context handed to an engine.
///
/// Everything an engine may consult beyond the source itself: its merged
/// option record, the audio settings, caption language preferences, the
/// resolved output format, and the router's deadline. Engines must not
/// mutate shared state; the context is theirs alone.
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    /// Merged opaque options for this engine (config-level record merged
    /// with the per-request record; request keys win).
    pub options: serde_json::Value,
    pub audio: AudioConfig,
    pub youtube_languages: Vec<String>,
    pub output_format: OutputFormat,
    /// Overall extraction deadline. Engines should check
    /// [`ProcessorContext::remaining_time`] before expensive suspension
    /// points; the router also enforces it externally.
    pub deadline: Option<Instant>,
}

impl Default for ProcessorContext {
    fn default() -> Self {
        Self {
            options: serde_json::json!({}),
            audio: AudioConfig::default(),
            youtube_languages: vec!["en".to_string(), "es".to_string(), "pt".to_string()],
            output_format: OutputFormat::Markdown,
            deadline: None,
        }
    }
}

impl ProcessorContext {
    /// Time left in the extraction budget, if a deadline is set.
    pub fn remaining_time(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the extraction budget has expired.
    pub fn expired(&self) -> bool {
        self.remaining_time().is_some_and(|d| d.is_zero())
    }

    /// String option lookup.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// Bool option lookup with default.
    pub fn option_bool(&self, key: &str, default: bool) -> bool {
        self.options.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }
}

/// Warn once per call about option keys an engine does not understand.
pub(crate) fn warn_unknown_options(engine: &str, options: &serde_json::Value, known: &[&str]) {
    if let Some(map) = options.as_object() {
        for key in map.keys() {
            if !known.contains(&key.as_str()) {
                tracing::warn!(engine, option = %key, "Ignoring unknown engine option");
            }
        }
    }
}

/// A content extraction engine.
///
/// Processors are stateless after construction and own no mutable state
/// between calls; the registry holds each instance for the process
/// lifetime and hands out clones of the `Arc`.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Unique engine name (lowercase, hyphenated).
    fn name(&self) -> &str;

    fn capabilities(&self) -> &ProcessorCapabilities;

    /// Whether the engine's external dependencies and credentials are
    /// present. Checked lazily; implementations memoize per process.
    fn is_available(&self) -> bool {
        true
    }

    /// Extract content from `source`.
    ///
    /// Implementations must honor cancellation at every suspension point
    /// (the router drops the future on budget expiry) and release any
    /// temp artifacts on all exit paths.
    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult>;
}

/// Global processor registry singleton.
static PROCESSOR_REGISTRY: Lazy<Arc<RwLock<ProcessorRegistry>>> =
    Lazy::new(|| Arc::new(RwLock::new(ProcessorRegistry::new())));

/// One-shot bootstrap of the built-in processors.
static PROCESSORS_INITIALIZED: Lazy<Result<()>> = Lazy::new(register_default_processors);

/// Get the global processor registry.
pub fn global_registry() -> Arc<RwLock<ProcessorRegistry>> {
    Arc::clone(&PROCESSOR_REGISTRY)
}

/// Ensure built-in processors are registered. Called automatically on the
/// first extraction; explicit calling is optional.
pub fn ensure_initialized() -> Result<()> {
    match PROCESSORS_INITIALIZED.as_ref() {
        Ok(()) => Ok(()),
        Err(e) => Err(crate::error::CcoreError::Internal(format!(
            "Failed to register default processors: {e}"
        ))),
    }
}

/// Register every built-in processor with the global registry.
pub fn register_default_processors() -> Result<()> {
    let registry = global_registry();
    let mut registry = registry
        .write()
        .map_err(|e| crate::error::CcoreError::Internal(format!("Processor registry lock poisoned: {e}")))?;

    registry.register(Arc::new(text::TextProcessor::new()))?;

    #[cfg(feature = "pdf")]
    {
        registry.register(Arc::new(pdf::PdfTextProcessor::new()))?;
        registry.register(Arc::new(pdf::PdfMarkdownProcessor::new()))?;
        registry.register(Arc::new(pdf::PdfVlmProcessor::new()))?;
    }

    #[cfg(feature = "office")]
    registry.register(Arc::new(office::OfficeProcessor::new()))?;

    registry.register(Arc::new(url::FirecrawlProcessor::new()))?;
    registry.register(Arc::new(url::JinaProcessor::new()))?;
    registry.register(Arc::new(url::HeadlessProcessor::new()))?;
    registry.register(Arc::new(url::BasicHtmlProcessor::new()))?;

    registry.register(Arc::new(audio::AudioProcessor::new()))?;
    registry.register(Arc::new(video::VideoProcessor::new()))?;
    registry.register(Arc::new(youtube::YouTubeProcessor::new()))?;

    Ok(())
}

/// Register a custom processor with the global registry.
///
/// Must happen before the first extraction touches the same MIME types;
/// the registry rejects duplicate names.
pub fn register_processor(processor: Arc<dyn Processor>) -> Result<()> {
    ensure_initialized()?;
    let registry = global_registry();
    let mut registry = registry
        .write()
        .map_err(|e| crate::error::CcoreError::Internal(format!("Processor registry lock poisoned: {e}")))?;
    registry.register(processor)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Mock processors for registry/resolver/executor tests.

    use super::*;
    use crate::error::CcoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type FailureFactory = Box<dyn Fn() -> CcoreError + Send + Sync>;

    enum Behavior {
        Succeed(String),
        Fail(FailureFactory),
    }

    pub struct MockProcessor {
        name: String,
        capabilities: ProcessorCapabilities,
        available: bool,
        behavior: Behavior,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl MockProcessor {
        pub fn new(name: &str, capabilities: ProcessorCapabilities) -> Self {
            Self {
                name: name.to_string(),
                capabilities,
                available: true,
                behavior: Behavior::Succeed("mock content".to_string()),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn unavailable(mut self) -> Self {
            self.available = false;
            self
        }

        pub fn succeeding_with(mut self, content: &str) -> Self {
            self.behavior = Behavior::Succeed(content.to_string());
            self
        }

        pub fn failing_with<F>(mut self, factory: F) -> Self
        where
            F: Fn() -> CcoreError + Send + Sync + 'static,
        {
            self.behavior = Behavior::Fail(Box::new(factory));
            self
        }

        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Processor for MockProcessor {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> &ProcessorCapabilities {
            &self.capabilities
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn extract(&self, _source: &Source, _ctx: &ProcessorContext) -> Result<ProcessorResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.behavior {
                Behavior::Succeed(content) => Ok(ProcessorResult::new(content.clone(), "text/plain")),
                Behavior::Fail(factory) => Err(factory()),
            }
        }
    }
}
