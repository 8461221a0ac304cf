//! Engine resolution.
//!
//! Given a MIME type, an optional explicit override, and the current
//! configuration snapshot, produce the ordered engine chain to attempt.
//! Resolution order, first non-empty source wins:
//!
//! 1. Explicit caller override (verbatim; unknown names fail)
//! 2. Environment chain for the specific MIME type
//! 3. Environment chain for the wildcard MIME type
//! 4. Environment chain for the category
//! 5. Legacy single-engine config (document or URL)
//! 6. Auto-detect from the registry
//!
//! The resolver performs no I/O and no error classification; it returns
//! engine names only.

use crate::core::config::{ExtractionConfig, OnError};
use crate::core::mime;
use crate::error::{CcoreError, Result};
use crate::processors::ProcessorRegistry;
use crate::types::Category;

pub struct EngineResolver<'a> {
    config: &'a ExtractionConfig,
}

impl<'a> EngineResolver<'a> {
    pub fn new(config: &'a ExtractionConfig) -> Self {
        Self { config }
    }

    /// Resolve the engine chain for `mime_type`.
    pub fn resolve(
        &self,
        registry: &ProcessorRegistry,
        mime_type: &str,
        explicit: Option<&[String]>,
    ) -> Result<Vec<String>> {
        // 1. Explicit override replaces every other source; a missing
        // name fails here, before any I/O happens.
        if let Some(engines) = explicit.filter(|e| !e.is_empty()) {
            for engine in engines {
                if registry.get(engine).is_none() {
                    return Err(CcoreError::EngineNotFound {
                        engine: engine.clone(),
                    });
                }
            }
            tracing::debug!(?engines, "Using explicit engine override");
            return Ok(engines.to_vec());
        }

        // YouTube URLs route to the transcript processor ahead of any
        // URL-category configuration.
        if mime_type == mime::YOUTUBE_MIME_TYPE {
            if let Some(processor) = registry.get("youtube") {
                if processor.is_available() {
                    tracing::debug!("Using youtube processor for YouTube URL");
                    return Ok(vec!["youtube".to_string()]);
                }
            }
        }

        // 2. Specific MIME type from the environment.
        if let Some(chain) = self.config.chain_for_mime(mime_type) {
            let chain = self.drop_unknown(registry, chain, "MIME")?;
            if !chain.is_empty() {
                tracing::debug!(mime_type, ?chain, "Using configured chain for MIME type");
                return Ok(chain);
            }
        }

        // 3. Wildcard MIME type from the environment.
        if let Some(chain) = self.config.chain_for_wildcard(mime_type) {
            let chain = self.drop_unknown(registry, chain, "wildcard")?;
            if !chain.is_empty() {
                tracing::debug!(mime_type, ?chain, "Using configured chain for wildcard");
                return Ok(chain);
            }
        }

        // 4. Category from the environment.
        let category = mime::category_for_mime(mime_type);
        if let Some(category) = category {
            if let Some(chain) = self.config.chain_for_category(category) {
                let chain = self.drop_unknown(registry, chain, "category")?;
                if !chain.is_empty() {
                    tracing::debug!(%category, ?chain, "Using configured chain for category");
                    return Ok(chain);
                }
            }
        }

        // 5. Legacy single-engine configuration.
        if let Some(engine) = self.legacy_engine(mime_type, category) {
            if engine != "auto" {
                let chain = self.drop_unknown(registry, std::slice::from_ref(&engine), "legacy")?;
                if !chain.is_empty() {
                    tracing::debug!(engine = %engine, "Using legacy engine configuration");
                    return Ok(chain);
                }
            }
        }

        // 6. Auto-detect: availability- and priority-ordered registry scan.
        let auto: Vec<String> = registry
            .find_by_mime(mime_type)
            .into_iter()
            .filter(|p| p.is_available())
            .map(|p| p.name().to_string())
            .collect();
        if !auto.is_empty() {
            tracing::debug!(mime_type, ?auto, "Auto-detected engine chain");
            return Ok(auto);
        }

        Err(CcoreError::NoEngineAvailable {
            mime_type: mime_type.to_string(),
        })
    }

    fn legacy_engine(&self, mime_type: &str, category: Option<Category>) -> Option<String> {
        let is_url_like = category == Some(Category::Urls)
            || mime_type == mime::HTML_MIME_TYPE
            || mime_type == mime::YOUTUBE_MIME_TYPE;
        if is_url_like {
            self.config.url_engine.clone()
        } else {
            self.config.document_engine.clone()
        }
    }

    /// Drop configured engine names the registry does not know. Under
    /// `on_error == fail` an unknown name fails resolution instead.
    fn drop_unknown(&self, registry: &ProcessorRegistry, chain: &[String], origin: &str) -> Result<Vec<String>> {
        let mut known = Vec::with_capacity(chain.len());
        for engine in chain {
            if registry.get(engine).is_some() {
                known.push(engine.clone());
            } else if self.config.fallback.on_error == OnError::Fail {
                return Err(CcoreError::EngineNotFound {
                    engine: engine.clone(),
                });
            } else {
                tracing::warn!(
                    engine = %engine,
                    origin,
                    "Configured engine is not registered; dropping from chain"
                );
            }
        }
        Ok(known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::MockProcessor;
    use crate::types::ProcessorCapabilities;
    use std::sync::Arc;

    fn test_registry() -> ProcessorRegistry {
        let mut registry = ProcessorRegistry::new();
        for (name, mimes, priority, category) in [
            ("pdf-vlm", vec!["application/pdf"], 60, Category::Documents),
            ("pdf-text", vec!["application/pdf"], 50, Category::Documents),
            ("jina", vec!["text/html"], 60, Category::Urls),
            ("basic", vec!["text/html"], 40, Category::Urls),
            ("youtube", vec!["youtube"], 60, Category::Youtube),
        ] {
            let mime_refs: Vec<&str> = mimes.iter().copied().collect();
            registry
                .register(Arc::new(MockProcessor::new(
                    name,
                    ProcessorCapabilities::new(&mime_refs, priority, category),
                )))
                .unwrap();
        }
        registry
    }

    fn chain(engines: &[&str]) -> Vec<String> {
        engines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_explicit_override_verbatim() {
        let config = ExtractionConfig::default();
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let explicit = chain(&["pdf-text"]);
        let resolved = resolver
            .resolve(&registry, "application/pdf", Some(&explicit))
            .unwrap();
        assert_eq!(resolved, vec!["pdf-text"]);
    }

    #[test]
    fn test_explicit_unknown_engine_fails_before_io() {
        let config = ExtractionConfig::default();
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let explicit = chain(&["does-not-exist"]);
        let err = resolver
            .resolve(&registry, "application/pdf", Some(&explicit))
            .unwrap_err();
        assert!(matches!(err, CcoreError::EngineNotFound { engine } if engine == "does-not-exist"));
    }

    #[test]
    fn test_explicit_overrides_configured_chain() {
        let mut config = ExtractionConfig::default();
        config
            .engine_chains
            .insert("APPLICATION_PDF".to_string(), chain(&["pdf-vlm"]));
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let explicit = chain(&["pdf-text"]);
        let resolved = resolver
            .resolve(&registry, "application/pdf", Some(&explicit))
            .unwrap();
        assert_eq!(resolved, vec!["pdf-text"]);
    }

    #[test]
    fn test_specific_mime_chain_wins_over_category() {
        let mut config = ExtractionConfig::default();
        config
            .engine_chains
            .insert("APPLICATION_PDF".to_string(), chain(&["pdf-text"]));
        config
            .engine_chains
            .insert("DOCUMENTS".to_string(), chain(&["pdf-vlm"]));
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let resolved = resolver.resolve(&registry, "application/pdf", None).unwrap();
        assert_eq!(resolved, vec!["pdf-text"]);
    }

    #[test]
    fn test_category_chain_when_no_mime_chain() {
        let mut config = ExtractionConfig::default();
        config
            .engine_chains
            .insert("DOCUMENTS".to_string(), chain(&["pdf-vlm", "pdf-text"]));
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let resolved = resolver.resolve(&registry, "application/pdf", None).unwrap();
        assert_eq!(resolved, vec!["pdf-vlm", "pdf-text"]);
    }

    #[test]
    fn test_legacy_document_engine() {
        let config = ExtractionConfig {
            document_engine: Some("pdf-text".to_string()),
            ..Default::default()
        };
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let resolved = resolver.resolve(&registry, "application/pdf", None).unwrap();
        assert_eq!(resolved, vec!["pdf-text"]);
    }

    #[test]
    fn test_legacy_url_engine_for_html() {
        let config = ExtractionConfig {
            url_engine: Some("basic".to_string()),
            document_engine: Some("pdf-text".to_string()),
            ..Default::default()
        };
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let resolved = resolver.resolve(&registry, "text/html", None).unwrap();
        assert_eq!(resolved, vec!["basic"]);
    }

    #[test]
    fn test_legacy_auto_falls_through_to_registry() {
        let config = ExtractionConfig {
            document_engine: Some("auto".to_string()),
            ..Default::default()
        };
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let resolved = resolver.resolve(&registry, "application/pdf", None).unwrap();
        assert_eq!(resolved, vec!["pdf-vlm", "pdf-text"]);
    }

    #[test]
    fn test_auto_detect_orders_by_priority() {
        let config = ExtractionConfig::default();
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let resolved = resolver.resolve(&registry, "text/html", None).unwrap();
        assert_eq!(resolved, vec!["jina", "basic"]);
    }

    #[test]
    fn test_auto_detect_skips_unavailable() {
        let config = ExtractionConfig::default();
        let mut registry = ProcessorRegistry::new();
        registry
            .register(Arc::new(
                MockProcessor::new(
                    "gone",
                    ProcessorCapabilities::new(&["application/pdf"], 90, Category::Documents),
                )
                .unavailable(),
            ))
            .unwrap();
        registry
            .register(Arc::new(MockProcessor::new(
                "here",
                ProcessorCapabilities::new(&["application/pdf"], 10, Category::Documents),
            )))
            .unwrap();
        let resolver = EngineResolver::new(&config);

        let resolved = resolver.resolve(&registry, "application/pdf", None).unwrap();
        assert_eq!(resolved, vec!["here"]);
    }

    #[test]
    fn test_youtube_short_circuits_url_config() {
        let mut config = ExtractionConfig::default();
        config.engine_chains.insert("URLS".to_string(), chain(&["jina"]));
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let resolved = resolver.resolve(&registry, "youtube", None).unwrap();
        assert_eq!(resolved, vec!["youtube"]);
    }

    #[test]
    fn test_unknown_names_dropped_with_fallthrough() {
        let mut config = ExtractionConfig::default();
        config
            .engine_chains
            .insert("APPLICATION_PDF".to_string(), chain(&["ghost", "pdf-text"]));
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let resolved = resolver.resolve(&registry, "application/pdf", None).unwrap();
        assert_eq!(resolved, vec!["pdf-text"]);
    }

    #[test]
    fn test_fully_unknown_chain_falls_through_to_auto() {
        let mut config = ExtractionConfig::default();
        config
            .engine_chains
            .insert("APPLICATION_PDF".to_string(), chain(&["ghost", "phantom"]));
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let resolved = resolver.resolve(&registry, "application/pdf", None).unwrap();
        assert_eq!(resolved, vec!["pdf-vlm", "pdf-text"]);
    }

    #[test]
    fn test_unknown_name_fails_under_on_error_fail() {
        let mut config = ExtractionConfig::default();
        config.fallback.on_error = OnError::Fail;
        config
            .engine_chains
            .insert("APPLICATION_PDF".to_string(), chain(&["ghost", "pdf-text"]));
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let err = resolver.resolve(&registry, "application/pdf", None).unwrap_err();
        assert!(matches!(err, CcoreError::EngineNotFound { engine } if engine == "ghost"));
    }

    #[test]
    fn test_no_engine_available() {
        let config = ExtractionConfig::default();
        let registry = test_registry();
        let resolver = EngineResolver::new(&config);

        let err = resolver.resolve(&registry, "application/x-unknown", None).unwrap_err();
        assert!(matches!(err, CcoreError::NoEngineAvailable { mime_type } if mime_type == "application/x-unknown"));
    }
}
