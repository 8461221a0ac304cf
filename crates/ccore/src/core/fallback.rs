//! Fallback chain execution.
//!
//! Walks the resolved engine chain in order, classifying each failure and
//! applying the configured policy, until one engine produces a result or
//! the chain is exhausted. The overall deadline is enforced here: each
//! engine runs under the *remaining* budget, and expiry cancels the
//! in-flight engine by dropping its future.

use crate::core::config::{ExtractionConfig, OnError};
use crate::error::{CcoreError, EngineAttempt, Result};
use crate::processors::{Processor, ProcessorContext, ProcessorRegistry};
use crate::types::{ProcessorResult, Source};
use std::sync::{Arc, RwLock};
use std::time::Instant;

pub struct FallbackExecutor<'a> {
    config: &'a ExtractionConfig,
}

/// Shallow-merge two engine option records; request keys win.
fn merge_options(base: serde_json::Value, request: Option<&serde_json::Value>) -> serde_json::Value {
    match (base, request) {
        (serde_json::Value::Object(mut base), Some(serde_json::Value::Object(request))) => {
            for (key, value) in request {
                base.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(base)
        }
        (_base, Some(request)) if !request.is_null() => request.clone(),
        (base, _) => base,
    }
}

impl<'a> FallbackExecutor<'a> {
    pub fn new(config: &'a ExtractionConfig) -> Self {
        Self { config }
    }

    fn lookup(
        &self,
        registry: &Arc<RwLock<ProcessorRegistry>>,
        engine: &str,
    ) -> Result<Option<Arc<dyn Processor>>> {
        let registry = registry
            .read()
            .map_err(|e| CcoreError::Internal(format!("Processor registry lock poisoned: {e}")))?;
        Ok(registry.get(engine))
    }

    fn context_for(&self, source: &Source, engine: &str, deadline: Instant) -> ProcessorContext {
        let options = merge_options(
            self.config.options_for_engine(engine),
            source.engine_options.get(engine),
        );
        ProcessorContext {
            options,
            audio: self.config.audio.clone(),
            youtube_languages: self.config.youtube_languages.clone(),
            output_format: source.output_format.unwrap_or_default(),
            deadline: Some(deadline),
        }
    }

    /// Run the chain. At most `fallback.max_attempts` engines are tried
    /// (one when fallback is disabled); the first success wins.
    pub async fn execute(
        &self,
        registry: &Arc<RwLock<ProcessorRegistry>>,
        source: &Source,
        engines: &[String],
        deadline: Instant,
        timeout_seconds: u64,
    ) -> Result<ProcessorResult> {
        let attempt_cap = if self.config.fallback.enabled {
            self.config.fallback.max_attempts
        } else {
            1
        };
        let chain = &engines[..engines.len().min(attempt_cap)];

        let mut attempts: Vec<EngineAttempt> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        for engine in chain {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CcoreError::Timeout {
                    seconds: timeout_seconds,
                    attempts,
                });
            }

            let processor = match self.lookup(registry, engine)? {
                Some(processor) if processor.is_available() => processor,
                Some(processor) => {
                    let err = CcoreError::EngineUnavailable {
                        engine: engine.clone(),
                        missing: processor.capabilities().requires.clone(),
                    };
                    self.handle_failure(engine, err, &mut attempts, &mut warnings)?;
                    continue;
                }
                None => {
                    let err = CcoreError::EngineUnavailable {
                        engine: engine.clone(),
                        missing: vec!["not registered".to_string()],
                    };
                    self.handle_failure(engine, err, &mut attempts, &mut warnings)?;
                    continue;
                }
            };

            tracing::info!(engine = %engine, "Attempting extraction");
            let ctx = self.context_for(source, engine, deadline);

            match tokio::time::timeout(remaining, processor.extract(source, &ctx)).await {
                Ok(Ok(mut result)) => {
                    // The invariant every caller relies on: the stamped
                    // engine is the one that produced the result.
                    result.metadata.extraction_engine = Some(engine.clone());

                    if !attempts.is_empty() {
                        let failed: Vec<&str> = attempts.iter().map(|a| a.engine.as_str()).collect();
                        warnings.push(format!(
                            "used fallback engine '{engine}' after {failed:?} failed"
                        ));
                    }
                    if !warnings.is_empty() {
                        let mut combined = warnings;
                        combined.append(&mut result.warnings);
                        result.warnings = combined;
                    }
                    return Ok(result);
                }
                Ok(Err(err)) => {
                    self.handle_failure(engine, err, &mut attempts, &mut warnings)?;
                }
                Err(_elapsed) => {
                    // The engine future was dropped at expiry: that is the
                    // cancellation signal; scoped resources release on drop.
                    attempts.push(EngineAttempt {
                        engine: engine.clone(),
                        kind: crate::error::ErrorKind::Timeout,
                        message: format!("extraction budget of {timeout_seconds}s exhausted"),
                    });
                    return Err(CcoreError::Timeout {
                        seconds: timeout_seconds,
                        attempts,
                    });
                }
            }
        }

        Err(CcoreError::AllEnginesFailed { attempts })
    }

    /// Record a failed attempt and apply the error policy. Returns
    /// `Err` when the chain must abort (fatal kind or `on_error: fail`).
    fn handle_failure(
        &self,
        engine: &str,
        err: CcoreError,
        attempts: &mut Vec<EngineAttempt>,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let kind = err.kind();

        if self.config.fallback.is_fatal_kind(kind) {
            tracing::error!(engine, %err, "Fatal error; aborting chain");
            return Err(err);
        }

        attempts.push(EngineAttempt {
            engine: engine.to_string(),
            kind,
            message: err.to_string(),
        });

        match self.config.fallback.on_error {
            OnError::Fail => {
                tracing::error!(engine, %err, "Engine failed with on_error=fail");
                Err(err)
            }
            OnError::Warn => {
                tracing::warn!(engine, %err, "Engine failed, trying next");
                warnings.push(format!("engine '{engine}' failed: {err}"));
                Ok(())
            }
            OnError::Next => {
                tracing::debug!(engine, %err, "Engine failed silently, trying next");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FallbackConfig;
    use crate::error::ErrorKind;
    use crate::processors::testing::MockProcessor;
    use crate::types::{Category, ProcessorCapabilities};
    use std::time::Duration;

    fn caps() -> ProcessorCapabilities {
        ProcessorCapabilities::new(&["text/plain"], 50, Category::Text)
    }

    fn registry_of(processors: Vec<MockProcessor>) -> Arc<RwLock<ProcessorRegistry>> {
        let mut registry = ProcessorRegistry::new();
        for p in processors {
            registry.register(Arc::new(p)).unwrap();
        }
        Arc::new(RwLock::new(registry))
    }

    fn chain(engines: &[&str]) -> Vec<String> {
        engines.iter().map(|s| s.to_string()).collect()
    }

    fn deadline_in(seconds: u64) -> Instant {
        Instant::now() + Duration::from_secs(seconds)
    }

    #[tokio::test]
    async fn test_first_engine_succeeds() {
        let registry = registry_of(vec![
            MockProcessor::new("one", caps()).succeeding_with("from one"),
            MockProcessor::new("two", caps()).succeeding_with("from two"),
        ]);
        let config = ExtractionConfig::default();
        let executor = FallbackExecutor::new(&config);

        let result = executor
            .execute(&registry, &Source::text("x"), &chain(&["one", "two"]), deadline_in(30), 30)
            .await
            .unwrap();

        assert_eq!(result.content, "from one");
        assert_eq!(result.metadata.extraction_engine.as_deref(), Some("one"));
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_engine_skipped_with_warning() {
        let registry = registry_of(vec![
            MockProcessor::new("down", caps()).unavailable(),
            MockProcessor::new("up", caps()).succeeding_with("rescued"),
        ]);
        let config = ExtractionConfig::default();
        let executor = FallbackExecutor::new(&config);

        let result = executor
            .execute(&registry, &Source::text("x"), &chain(&["down", "up"]), deadline_in(30), 30)
            .await
            .unwrap();

        assert_eq!(result.content, "rescued");
        assert_eq!(result.metadata.extraction_engine.as_deref(), Some("up"));
        assert!(result.warnings.iter().any(|w| w.contains("down")));
        assert!(result.warnings.iter().any(|w| w.contains("used fallback engine 'up'")));
    }

    #[tokio::test]
    async fn test_failing_engine_falls_through() {
        let registry = registry_of(vec![
            MockProcessor::new("flaky", caps()).failing_with(|| CcoreError::network("connection reset")),
            MockProcessor::new("solid", caps()).succeeding_with("eventually"),
        ]);
        let config = ExtractionConfig::default();
        let executor = FallbackExecutor::new(&config);

        let result = executor
            .execute(&registry, &Source::text("x"), &chain(&["flaky", "solid"]), deadline_in(30), 30)
            .await
            .unwrap();

        assert_eq!(result.content, "eventually");
        assert!(result.warnings.iter().any(|w| w.contains("flaky")));
    }

    #[tokio::test]
    async fn test_all_engines_failed_carries_ordered_attempts() {
        let registry = registry_of(vec![
            MockProcessor::new("a", caps()).failing_with(|| CcoreError::network("dns")),
            MockProcessor::new("b", caps()).failing_with(|| CcoreError::NotFound {
                message: "404".to_string(),
            }),
        ]);
        let config = ExtractionConfig::default();
        let executor = FallbackExecutor::new(&config);

        let err = executor
            .execute(&registry, &Source::text("x"), &chain(&["a", "b"]), deadline_in(30), 30)
            .await
            .unwrap_err();

        match err {
            CcoreError::AllEnginesFailed { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].engine, "a");
                assert_eq!(attempts[0].kind, ErrorKind::NetworkError);
                assert_eq!(attempts[1].engine, "b");
                assert_eq!(attempts[1].kind, ErrorKind::NotFoundError);
            }
            other => panic!("expected AllEnginesFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_on_error_fail_aborts_immediately() {
        let registry = registry_of(vec![
            MockProcessor::new("a", caps()).failing_with(|| CcoreError::network("dns")),
            MockProcessor::new("b", caps()).succeeding_with("never reached"),
        ]);
        let config = ExtractionConfig {
            fallback: FallbackConfig {
                on_error: OnError::Fail,
                ..Default::default()
            },
            ..Default::default()
        };
        let executor = FallbackExecutor::new(&config);

        let err = executor
            .execute(&registry, &Source::text("x"), &chain(&["a", "b"]), deadline_in(30), 30)
            .await
            .unwrap_err();
        assert!(matches!(err, CcoreError::Network { .. }));
    }

    #[tokio::test]
    async fn test_fatal_kind_bypasses_on_error() {
        let registry = registry_of(vec![
            MockProcessor::new("a", caps()).failing_with(|| CcoreError::validation("bad input")),
            MockProcessor::new("b", caps()).succeeding_with("never reached"),
        ]);
        // on_error=warn would normally continue, but ValidationError is in
        // the default fatal set.
        let config = ExtractionConfig::default();
        let executor = FallbackExecutor::new(&config);

        let err = executor
            .execute(&registry, &Source::text("x"), &chain(&["a", "b"]), deadline_in(30), 30)
            .await
            .unwrap_err();
        assert!(matches!(err, CcoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_fallback_disabled_truncates_chain() {
        let registry = registry_of(vec![
            MockProcessor::new("a", caps()).failing_with(|| CcoreError::network("down")),
            MockProcessor::new("b", caps()).succeeding_with("never reached"),
        ]);
        let config = ExtractionConfig {
            fallback: FallbackConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let executor = FallbackExecutor::new(&config);

        let err = executor
            .execute(&registry, &Source::text("x"), &chain(&["a", "b"]), deadline_in(30), 30)
            .await
            .unwrap_err();

        match err {
            CcoreError::AllEnginesFailed { attempts } => {
                assert_eq!(attempts.len(), 1);
                assert_eq!(attempts[0].engine, "a");
            }
            other => panic!("expected AllEnginesFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_attempts_caps_chain() {
        let registry = registry_of(vec![
            MockProcessor::new("a", caps()).failing_with(|| CcoreError::network("down")),
            MockProcessor::new("b", caps()).failing_with(|| CcoreError::network("down")),
            MockProcessor::new("c", caps()).succeeding_with("third time lucky"),
        ]);
        let config = ExtractionConfig {
            fallback: FallbackConfig {
                max_attempts: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let executor = FallbackExecutor::new(&config);

        let err = executor
            .execute(
                &registry,
                &Source::text("x"),
                &chain(&["a", "b", "c"]),
                deadline_in(30),
                30,
            )
            .await
            .unwrap_err();

        match err {
            CcoreError::AllEnginesFailed { attempts } => assert_eq!(attempts.len(), 2),
            other => panic!("expected AllEnginesFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_mid_engine_records_attempts() {
        let registry = registry_of(vec![
            MockProcessor::new("fast-fail", caps()).failing_with(|| CcoreError::network("reset")),
            MockProcessor::new("slow", caps()).delayed(Duration::from_secs(120)),
            MockProcessor::new("unreached", caps()).succeeding_with("no"),
        ]);
        let config = ExtractionConfig::default();
        let executor = FallbackExecutor::new(&config);

        let err = executor
            .execute(
                &registry,
                &Source::text("x"),
                &chain(&["fast-fail", "slow", "unreached"]),
                Instant::now() + Duration::from_secs(5),
                5,
            )
            .await
            .unwrap_err();

        match err {
            CcoreError::Timeout { seconds, attempts } => {
                assert_eq!(seconds, 5);
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].engine, "fast-fail");
                assert_eq!(attempts[0].kind, ErrorKind::NetworkError);
                assert_eq!(attempts[1].engine, "slow");
                assert_eq!(attempts[1].kind, ErrorKind::Timeout);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_on_error_next_suppresses_warnings() {
        let registry = registry_of(vec![
            MockProcessor::new("a", caps()).failing_with(|| CcoreError::network("down")),
            MockProcessor::new("b", caps()).succeeding_with("quiet recovery"),
        ]);
        let config = ExtractionConfig {
            fallback: FallbackConfig {
                on_error: OnError::Next,
                ..Default::default()
            },
            ..Default::default()
        };
        let executor = FallbackExecutor::new(&config);

        let result = executor
            .execute(&registry, &Source::text("x"), &chain(&["a", "b"]), deadline_in(30), 30)
            .await
            .unwrap();

        assert_eq!(result.content, "quiet recovery");
        // The fallback note still appears, but no per-failure warning.
        assert!(!result.warnings.iter().any(|w| w.contains("failed: ")));
    }

    #[tokio::test]
    async fn test_unregistered_engine_recorded_as_unavailable() {
        let registry = registry_of(vec![
            MockProcessor::new("real", caps()).succeeding_with("ok"),
        ]);
        let config = ExtractionConfig::default();
        let executor = FallbackExecutor::new(&config);

        let result = executor
            .execute(
                &registry,
                &Source::text("x"),
                &chain(&["phantom", "real"]),
                deadline_in(30),
                30,
            )
            .await
            .unwrap();

        assert_eq!(result.content, "ok");
        assert!(result.warnings.iter().any(|w| w.contains("phantom")));
    }

    #[test]
    fn test_merge_options_request_wins() {
        let base = serde_json::json!({"a": 1, "b": 2});
        let request = serde_json::json!({"b": 3, "c": 4});
        let merged = merge_options(base, Some(&request));
        assert_eq!(merged, serde_json::json!({"a": 1, "b": 3, "c": 4}));

        let merged = merge_options(serde_json::json!({"a": 1}), None);
        assert_eq!(merged, serde_json::json!({"a": 1}));
    }
}
