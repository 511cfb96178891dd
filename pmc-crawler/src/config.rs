use std::time::Duration;

use crate::error::{CrawlerError, Result};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryConfig;

/// Default E-utilities base URL
const DEFAULT_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Default PMC Open Access service URL
const DEFAULT_OA_BASE_URL: &str = "https://www.ncbi.nlm.nih.gov/pmc/utils/oa/oa.fcgi";

/// Configuration for the crawler and its API clients
///
/// Immutable once a run starts. Built with a fluent interface:
///
/// ```
/// use pmc_crawler::CrawlerConfig;
///
/// let config = CrawlerConfig::new()
///     .with_api_key("your_api_key_here")
///     .with_email("researcher@university.edu")
///     .with_concurrency(4);
/// ```
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// NCBI API key; raises the rate ceiling from 3 to 10 requests/second
    pub api_key: Option<String>,
    /// Contact email, recommended by NCBI usage policy
    pub email: Option<String>,
    /// Tool name sent with every request
    pub tool: Option<String>,
    /// Override for the E-utilities base URL (used by tests)
    pub base_url: Option<String>,
    /// Override for the OA service URL (used by tests)
    pub oa_base_url: Option<String>,
    /// Explicit rate ceiling override in requests/second
    pub rate_limit: Option<f64>,
    /// Timeout for API requests
    pub timeout: Duration,
    /// Timeout for PDF/archive downloads (larger payloads)
    pub download_timeout: Duration,
    /// Retry policy applied to every outbound request
    pub retry_config: RetryConfig,
    /// Worker pool size for the resolve/fetch stages (1..=8)
    pub concurrency: usize,
    /// Records per ESearch page
    pub page_size: usize,
    /// Records per batched ESummary metadata request
    pub summary_chunk_size: usize,
    /// Records per batched ELink request
    pub link_chunk_size: usize,
}

impl CrawlerConfig {
    /// Create a configuration with NCBI-compliant defaults
    pub fn new() -> Self {
        Self {
            api_key: None,
            email: None,
            tool: None,
            base_url: None,
            oa_base_url: None,
            rate_limit: None,
            timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(120),
            retry_config: RetryConfig::default(),
            concurrency: 4,
            page_size: 100,
            summary_chunk_size: 50,
            link_chunk_size: 200,
        }
    }

    /// Set the NCBI API key
    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the contact email sent with every request
    pub fn with_email<S: Into<String>>(mut self, email: S) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the tool name sent with every request
    pub fn with_tool<S: Into<String>>(mut self, tool: S) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// Override the E-utilities base URL
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Override the OA service URL
    pub fn with_oa_base_url<S: Into<String>>(mut self, oa_base_url: S) -> Self {
        self.oa_base_url = Some(oa_base_url.into());
        self
    }

    /// Override the rate ceiling (requests per second)
    pub fn with_rate_limit(mut self, rate: f64) -> Self {
        self.rate_limit = Some(rate);
        self
    }

    /// Set the API request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Set the worker pool size for resolution and fetching
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Effective rate ceiling: explicit override, else the NCBI tier
    /// implied by the presence of an API key
    pub fn effective_rate_limit(&self) -> f64 {
        self.rate_limit
            .unwrap_or(if self.api_key.is_some() { 10.0 } else { 3.0 })
    }

    /// Build the shared rate limiter from the effective ceiling
    pub fn create_rate_limiter(&self) -> Result<RateLimiter> {
        RateLimiter::new(self.effective_rate_limit())
    }

    /// Effective E-utilities base URL
    pub fn effective_base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Effective OA service URL
    pub fn effective_oa_base_url(&self) -> &str {
        self.oa_base_url.as_deref().unwrap_or(DEFAULT_OA_BASE_URL)
    }

    /// User-Agent header value
    pub fn effective_user_agent(&self) -> String {
        match &self.email {
            Some(email) => format!(
                "pmc-crawler/{} (contact: {email})",
                env!("CARGO_PKG_VERSION")
            ),
            None => format!("pmc-crawler/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Common query parameters (api_key, email, tool) appended to every call
    pub fn build_api_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(api_key) = &self.api_key {
            params.push(("api_key".to_string(), api_key.clone()));
        }
        if let Some(email) = &self.email {
            params.push(("email".to_string(), email.clone()));
        }
        if let Some(tool) = &self.tool {
            params.push(("tool".to_string(), tool.clone()));
        }
        params
    }

    /// Validate the configuration before any network call
    pub fn validate(&self) -> Result<()> {
        if !(self.effective_rate_limit() > 0.0) {
            return Err(CrawlerError::InvalidConfig(
                "rate ceiling must be positive".to_string(),
            ));
        }
        if self.concurrency == 0 || self.concurrency > 8 {
            return Err(CrawlerError::InvalidConfig(format!(
                "concurrency must be between 1 and 8, got {}",
                self.concurrency
            )));
        }
        if self.page_size == 0 {
            return Err(CrawlerError::InvalidConfig(
                "page_size must be positive".to_string(),
            ));
        }
        if self.summary_chunk_size == 0 || self.link_chunk_size == 0 {
            return Err(CrawlerError::InvalidConfig(
                "batch chunk sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self::new()
    }
}
