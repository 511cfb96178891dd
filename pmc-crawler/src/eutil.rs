//! Shared E-utilities request plumbing: rate limiting, retries, and the
//! common credential parameters appended to every call.

use std::time::Duration;

use reqwest::{Client, Response};
use tracing::{debug, warn};

use crate::config::CrawlerConfig;
use crate::error::{CrawlerError, Result};
use crate::rate_limit::RateLimiter;
use crate::retry::with_retry;

/// Low-level client every API-facing component goes through
///
/// Holds a clone of the single shared [`RateLimiter`], so all traffic from
/// search, resolution, and fetch stages counts against one request budget.
#[derive(Clone)]
pub(crate) struct EutilClient {
    client: Client,
    base_url: String,
    rate_limiter: RateLimiter,
    config: CrawlerConfig,
}

impl EutilClient {
    pub(crate) fn new(config: CrawlerConfig, rate_limiter: RateLimiter) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.effective_user_agent())
            .timeout(Duration::from_secs(config.timeout.as_secs()))
            .build()
            .map_err(CrawlerError::from)?;

        let base_url = config.effective_base_url().to_string();

        Ok(Self {
            client,
            base_url,
            rate_limiter,
            config,
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Build a full URL for an E-utilities endpoint, appending the
    /// credential parameters (api_key, email, tool) when configured
    pub(crate) fn endpoint_url(&self, endpoint: &str, params: &str) -> String {
        let mut url = format!("{}/{}?{}", self.base_url, endpoint, params);
        for (key, value) in self.config.build_api_params() {
            url.push('&');
            url.push_str(&key);
            url.push('=');
            url.push_str(&urlencoding::encode(&value));
        }
        url
    }

    /// Append credential parameters to an arbitrary URL (used for the OA
    /// service, which lives outside the E-utilities base)
    pub(crate) fn with_api_params(&self, url: &str) -> String {
        let mut url = url.to_string();
        for (key, value) in self.config.build_api_params() {
            let separator = if url.contains('?') { '&' } else { '?' };
            url.push(separator);
            url.push_str(&key);
            url.push('=');
            url.push_str(&urlencoding::encode(&value));
        }
        url
    }

    /// Make a GET request with rate limiting and retry
    ///
    /// Server errors (5xx) and API-side throttling (429) are promoted to
    /// retryable errors inside the retry loop; any other non-success status
    /// surfaces as a permanent `ApiError`.
    pub(crate) async fn get(&self, url: &str, operation_name: &str) -> Result<Response> {
        let response = with_retry(
            || async {
                self.rate_limiter.acquire().await;
                debug!("Making API request to: {url}");
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(CrawlerError::from)?;

                if response.status().is_server_error() || response.status().as_u16() == 429 {
                    return Err(CrawlerError::ApiError {
                        status: response.status().as_u16(),
                        message: response
                            .status()
                            .canonical_reason()
                            .unwrap_or("Unknown error")
                            .to_string(),
                    });
                }

                Ok(response)
            },
            &self.config.retry_config,
            operation_name,
        )
        .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "API request failed");
            return Err(CrawlerError::ApiError {
                status: response.status().as_u16(),
                message: response
                    .status()
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string(),
            });
        }

        Ok(response)
    }
}
