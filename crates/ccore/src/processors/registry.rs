//! Processor registration and discovery.
//!
//! The registry catalogs every engine that can produce a
//! [`ProcessorResult`](crate::types::ProcessorResult) and answers
//! capability queries. Content is fixed after startup: built-ins register
//! once through the bootstrap in [`crate::processors`], duplicate names
//! are rejected, and all query paths take `&self`.

use crate::error::{CcoreError, Result};
use crate::processors::Processor;
use crate::types::Category;
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;

/// Introspection record for one registered engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub name: String,
    pub mime_types: Vec<String>,
    pub extensions: Vec<String>,
    pub priority: i32,
    pub category: Category,
    pub requires: Vec<String>,
    pub available: bool,
}

fn validate_engine_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CcoreError::validation("Engine name cannot be empty"));
    }
    if name.contains(char::is_whitespace) {
        return Err(CcoreError::validation(format!(
            "Engine name '{name}' cannot contain whitespace"
        )));
    }
    Ok(())
}

/// Catalog of processors with MIME/category/extension lookup.
///
/// Registration order is preserved (an `IndexMap`) and acts as the final
/// tie-break, so query results are reproducible across runs.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: IndexMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: IndexMap::new(),
        }
    }

    /// Register a processor. Fails on an invalid or duplicate name.
    pub fn register(&mut self, processor: Arc<dyn Processor>) -> Result<()> {
        let name = processor.name().to_string();
        validate_engine_name(&name)?;

        if self.processors.contains_key(&name) {
            return Err(CcoreError::validation(format!(
                "Engine '{name}' is already registered"
            )));
        }

        tracing::debug!(
            engine = %name,
            priority = processor.capabilities().priority,
            "Registered processor"
        );
        self.processors.insert(name, processor);
        Ok(())
    }

    /// Look up a processor by engine name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(name).cloned()
    }

    /// Ordering triple: available first, then priority descending, then
    /// registration order.
    fn sort_candidates(&self, candidates: &mut Vec<Arc<dyn Processor>>) {
        candidates.sort_by_key(|p| {
            let registration_index = self.processors.get_index_of(p.name()).unwrap_or(usize::MAX);
            (!p.is_available(), -p.capabilities().priority, registration_index)
        });
    }

    /// All processors claiming `mime`: exact claimants first, then
    /// wildcard claimants, each group ordered by availability, priority
    /// and registration order.
    pub fn find_by_mime(&self, mime: &str) -> Vec<Arc<dyn Processor>> {
        let mut exact: Vec<Arc<dyn Processor>> = Vec::new();
        let mut wildcard: Vec<Arc<dyn Processor>> = Vec::new();

        for processor in self.processors.values() {
            let caps = processor.capabilities();
            if caps.supports_mime_exact(mime) {
                exact.push(Arc::clone(processor));
            } else if caps.supports_mime(mime) {
                wildcard.push(Arc::clone(processor));
            }
        }

        self.sort_candidates(&mut exact);
        self.sort_candidates(&mut wildcard);
        exact.extend(wildcard);
        exact
    }

    /// All processors in a category, ordered.
    pub fn find_by_category(&self, category: Category) -> Vec<Arc<dyn Processor>> {
        let mut matching: Vec<Arc<dyn Processor>> = self
            .processors
            .values()
            .filter(|p| p.capabilities().category == category)
            .cloned()
            .collect();
        self.sort_candidates(&mut matching);
        matching
    }

    /// All processors recognizing a file extension, ordered. A secondary
    /// hint only; MIME lookup is authoritative.
    pub fn find_by_extension(&self, extension: &str) -> Vec<Arc<dyn Processor>> {
        let mut matching: Vec<Arc<dyn Processor>> = self
            .processors
            .values()
            .filter(|p| p.capabilities().supports_extension(extension))
            .cloned()
            .collect();
        self.sort_candidates(&mut matching);
        matching
    }

    /// Names of registered engines whose dependencies are satisfied.
    pub fn available_engines(&self) -> Vec<String> {
        self.processors
            .values()
            .filter(|p| p.is_available())
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Names of all registered engines, in registration order.
    pub fn list_names(&self) -> Vec<String> {
        self.processors.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Introspection records for every registered engine.
    pub fn describe(&self) -> Vec<EngineInfo> {
        self.processors
            .values()
            .map(|p| {
                let caps = p.capabilities();
                EngineInfo {
                    name: p.name().to_string(),
                    mime_types: caps.mime_types.clone(),
                    extensions: caps.extensions.clone(),
                    priority: caps.priority,
                    category: caps.category,
                    requires: caps.requires.clone(),
                    available: p.is_available(),
                }
            })
            .collect()
    }
}
