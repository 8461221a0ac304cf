//! URL extraction engines.
//!
//! The cascade, in priority order: `firecrawl` (65) > `jina` (60) >
//! `headless` (55) > `basic` (40). Availability gating collapses the
//! chain naturally: no Firecrawl key means the engine never appears in
//! an auto-resolved chain.
//!
//! All engines honor the standard `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY`
//! variables through the shared `reqwest` client. Hosted APIs fetch the
//! target server-side, outside any client proxy; that limitation is
//! logged on first use.

use crate::error::{status_to_error, CcoreError, Result};
use crate::extraction::html::{convert_html_to_markdown, extract_main_content_html, extract_title};
use crate::processors::{warn_unknown_options, Processor, ProcessorContext};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{Category, ProcessorCapabilities, ProcessorResult, Source};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::sync::{Once, OnceLock};
use std::time::Duration;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

pub(crate) static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
});

fn require_url(source: &Source) -> Result<&str> {
    source
        .as_url()
        .ok_or_else(|| CcoreError::unsupported("URL engines require a URL source"))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    Err(status_to_error(status, format!("{url} returned {status}")))
}

fn build_result(content: String, title: Option<String>, final_url: &str) -> ProcessorResult {
    let mut result = ProcessorResult::new(content, crate::core::mime::MARKDOWN_MIME_TYPE);
    result.metadata.title = title;
    result.metadata.insert("final_url", serde_json::json!(final_url));
    result
}

// ---------------------------------------------------------------------------
// firecrawl
// ---------------------------------------------------------------------------

/// Hosted Firecrawl scraping API. Highest-quality URL engine; requires an
/// API key.
pub struct FirecrawlProcessor {
    capabilities: ProcessorCapabilities,
    availability: OnceLock<bool>,
}

static FIRECRAWL_PROXY_NOTE: Once = Once::new();

impl FirecrawlProcessor {
    pub fn new() -> Self {
        Self {
            capabilities: ProcessorCapabilities::new(&["text/html"], 65, Category::Urls)
                .with_requires(&["firecrawl-api-key"]),
            availability: OnceLock::new(),
        }
    }

    fn api_base() -> String {
        std::env::var("FIRECRAWL_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://api.firecrawl.dev".to_string())
    }

    fn api_key() -> Option<String> {
        std::env::var("FIRECRAWL_API_KEY").ok().filter(|v| !v.trim().is_empty())
    }

    async fn scrape(&self, url: &str) -> Result<ProcessorResult> {
        let api_key = Self::api_key().ok_or_else(|| CcoreError::Auth {
            message: "FIRECRAWL_API_KEY is not configured".to_string(),
        })?;

        let response = HTTP_CLIENT
            .post(format!("{}/v2/scrape", Self::api_base()))
            .bearer_auth(&api_key)
            .json(&serde_json::json!({
                "url": url,
                "formats": ["markdown"],
            }))
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: serde_json::Value = response.json().await?;
        if !body.get("success").and_then(|v| v.as_bool()).unwrap_or(true) {
            let message = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("scrape was not successful");
            return Err(CcoreError::parse(format!("Firecrawl: {message}")));
        }

        let data = body.get("data").unwrap_or(&serde_json::Value::Null);
        let markdown = data
            .get("markdown")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CcoreError::parse("Firecrawl response carried no markdown"))?;
        let title = data
            .get("metadata")
            .and_then(|m| m.get("title"))
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(build_result(markdown.to_string(), title, url))
    }
}

impl Default for FirecrawlProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for FirecrawlProcessor {
    fn name(&self) -> &str {
        "firecrawl"
    }

    fn capabilities(&self) -> &ProcessorCapabilities {
        &self.capabilities
    }

    fn is_available(&self) -> bool {
        *self.availability.get_or_init(|| Self::api_key().is_some())
    }

    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult> {
        warn_unknown_options(self.name(), &ctx.options, &[]);
        let url = require_url(source)?;

        FIRECRAWL_PROXY_NOTE.call_once(|| {
            tracing::info!("Firecrawl fetches URLs server-side; client proxy settings do not apply to the target fetch");
        });

        let policy = RetryPolicy::for_operation("url_api");
        retry_with_backoff(&policy, "firecrawl", || self.scrape(url)).await
    }
}

// ---------------------------------------------------------------------------
// jina
// ---------------------------------------------------------------------------

/// Jina Reader (`r.jina.ai`). Works unauthenticated; a `JINA_API_KEY`
/// raises rate limits.
pub struct JinaProcessor {
    capabilities: ProcessorCapabilities,
}

static JINA_PROXY_NOTE: Once = Once::new();

impl JinaProcessor {
    pub fn new() -> Self {
        Self {
            capabilities: ProcessorCapabilities::new(&["text/html"], 60, Category::Urls),
        }
    }

    async fn fetch(&self, url: &str) -> Result<ProcessorResult> {
        let mut request = HTTP_CLIENT.get(format!("https://r.jina.ai/{url}"));
        if let Ok(key) = std::env::var("JINA_API_KEY") {
            if !key.trim().is_empty() {
                request = request.bearer_auth(key);
            }
        }

        let response = check_status(request.send().await?).await?;
        let text = response.text().await?;

        // Reader output leads with "Title: <title>\n" when it found one.
        if let Some(rest) = text.strip_prefix("Title:") {
            if let Some(newline) = rest.find('\n') {
                let title = rest[..newline].trim().to_string();
                let content = rest[newline + 1..].trim().to_string();
                return Ok(build_result(content, Some(title).filter(|t| !t.is_empty()), url));
            }
        }
        Ok(build_result(text, None, url))
    }
}

impl Default for JinaProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for JinaProcessor {
    fn name(&self) -> &str {
        "jina"
    }

    fn capabilities(&self) -> &ProcessorCapabilities {
        &self.capabilities
    }

    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult> {
        warn_unknown_options(self.name(), &ctx.options, &[]);
        let url = require_url(source)?;

        JINA_PROXY_NOTE.call_once(|| {
            tracing::info!("Jina Reader fetches URLs server-side; client proxy settings do not apply to the target fetch");
        });

        let policy = RetryPolicy::for_operation("url_api");
        retry_with_backoff(&policy, "jina", || self.fetch(url)).await
    }
}

// ---------------------------------------------------------------------------
// headless
// ---------------------------------------------------------------------------

static CHROMIUM_BINARY: Lazy<Option<&'static str>> = Lazy::new(|| {
    ["chromium", "chromium-browser", "google-chrome", "chrome"]
        .into_iter()
        .find(|binary| {
            std::process::Command::new(binary)
                .arg("--version")
                .output()
                .map(|out| out.status.success())
                .unwrap_or(false)
        })
});

/// Local headless browser. Renders JavaScript-heavy pages the basic
/// scraper cannot; requires a Chromium-family binary on `PATH`.
pub struct HeadlessProcessor {
    capabilities: ProcessorCapabilities,
}

impl HeadlessProcessor {
    pub fn new() -> Self {
        Self {
            capabilities: ProcessorCapabilities::new(&["text/html"], 55, Category::Urls)
                .with_requires(&["chromium"]),
        }
    }

    async fn dump_dom(&self, url: &str) -> Result<String> {
        let binary = CHROMIUM_BINARY.ok_or_else(|| CcoreError::EngineUnavailable {
            engine: "headless".to_string(),
            missing: vec!["chromium".to_string()],
        })?;

        let output = tokio::process::Command::new(binary)
            .args(["--headless=new", "--disable-gpu", "--dump-dom", url])
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CcoreError::network(format!(
                "headless browser exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for HeadlessProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for HeadlessProcessor {
    fn name(&self) -> &str {
        "headless"
    }

    fn capabilities(&self) -> &ProcessorCapabilities {
        &self.capabilities
    }

    fn is_available(&self) -> bool {
        CHROMIUM_BINARY.is_some()
    }

    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult> {
        warn_unknown_options(self.name(), &ctx.options, &[]);
        let url = require_url(source)?;

        let html = self.dump_dom(url).await?;
        let title = extract_title(&html);
        let markdown = convert_html_to_markdown(&extract_main_content_html(&html))?;
        Ok(build_result(markdown, title, url))
    }
}

// ---------------------------------------------------------------------------
// basic
// ---------------------------------------------------------------------------

/// Plain HTTP fetch plus main-content scraping. Always available; the
/// floor of the cascade.
pub struct BasicHtmlProcessor {
    capabilities: ProcessorCapabilities,
}

impl BasicHtmlProcessor {
    pub fn new() -> Self {
        Self {
            capabilities: ProcessorCapabilities::new(&["text/html"], 40, Category::Urls),
        }
    }

    async fn fetch(&self, url: &str) -> Result<(String, String)> {
        let response = check_status(HTTP_CLIENT.get(url).send().await?).await?;
        let final_url = response.url().to_string();
        let html = response.text().await?;
        Ok((html, final_url))
    }
}

impl Default for BasicHtmlProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for BasicHtmlProcessor {
    fn name(&self) -> &str {
        "basic"
    }

    fn capabilities(&self) -> &ProcessorCapabilities {
        &self.capabilities
    }

    async fn extract(&self, source: &Source, ctx: &ProcessorContext) -> Result<ProcessorResult> {
        warn_unknown_options(self.name(), &ctx.options, &[]);
        let url = require_url(source)?;

        let policy = RetryPolicy::for_operation("url_network");
        let (html, final_url) = retry_with_backoff(&policy, "basic", || self.fetch(url)).await?;

        let title = extract_title(&html);
        let markdown = convert_html_to_markdown(&extract_main_content_html(&html))?;
        let mut result = build_result(markdown, title, url);
        result.metadata.insert("final_url", serde_json::json!(final_url));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_priorities() {
        assert_eq!(FirecrawlProcessor::new().capabilities().priority, 65);
        assert_eq!(JinaProcessor::new().capabilities().priority, 60);
        assert_eq!(HeadlessProcessor::new().capabilities().priority, 55);
        assert_eq!(BasicHtmlProcessor::new().capabilities().priority, 40);
    }

    #[test]
    fn test_all_claim_html_in_urls_category() {
        for caps in [
            FirecrawlProcessor::new().capabilities().clone(),
            JinaProcessor::new().capabilities().clone(),
            HeadlessProcessor::new().capabilities().clone(),
            BasicHtmlProcessor::new().capabilities().clone(),
        ] {
            assert!(caps.supports_mime("text/html"));
            assert_eq!(caps.category, Category::Urls);
        }
    }

    #[tokio::test]
    async fn test_non_url_sources_rejected() {
        let ctx = ProcessorContext::default();
        for processor in [
            Box::new(JinaProcessor::new()) as Box<dyn Processor>,
            Box::new(BasicHtmlProcessor::new()),
        ] {
            let result = processor.extract(&Source::text("not a url"), &ctx).await;
            assert!(
                matches!(result.unwrap_err(), CcoreError::UnsupportedContent { .. }),
                "{} should reject non-URL sources",
                processor.name()
            );
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_firecrawl_availability_tracks_api_key() {
        std::env::remove_var("FIRECRAWL_API_KEY");
        assert!(!FirecrawlProcessor::new().is_available());

        std::env::set_var("FIRECRAWL_API_KEY", "fc-test-key");
        assert!(FirecrawlProcessor::new().is_available());
        std::env::remove_var("FIRECRAWL_API_KEY");
    }

    #[test]
    #[serial_test::serial]
    fn test_firecrawl_availability_memoized_per_instance() {
        std::env::remove_var("FIRECRAWL_API_KEY");
        let processor = FirecrawlProcessor::new();
        assert!(!processor.is_available());

        // Once checked, the verdict sticks for this instance.
        std::env::set_var("FIRECRAWL_API_KEY", "fc-test-key");
        assert!(!processor.is_available());
        std::env::remove_var("FIRECRAWL_API_KEY");
    }

    #[test]
    #[serial_test::serial]
    fn test_firecrawl_api_base_override() {
        std::env::remove_var("FIRECRAWL_API_BASE_URL");
        assert_eq!(FirecrawlProcessor::api_base(), "https://api.firecrawl.dev");

        std::env::set_var("FIRECRAWL_API_BASE_URL", "http://localhost:3002");
        assert_eq!(FirecrawlProcessor::api_base(), "http://localhost:3002");
        std::env::remove_var("FIRECRAWL_API_BASE_URL");
    }

    #[test]
    fn test_jina_always_available() {
        assert!(JinaProcessor::new().is_available());
        assert!(BasicHtmlProcessor::new().is_available());
    }

    #[test]
    fn test_jina_title_prefix_parsing() {
        // Exercised through the same parsing the fetch path uses.
        let text = "Title: Example Page\nBody line one\nBody line two";
        let rest = text.strip_prefix("Title:").unwrap();
        let newline = rest.find('\n').unwrap();
        assert_eq!(rest[..newline].trim(), "Example Page");
        assert_eq!(rest[newline + 1..].trim(), "Body line one\nBody line two");
    }
}
