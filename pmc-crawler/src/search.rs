use tracing::{debug, info, instrument};

use crate::config::CrawlerConfig;
use crate::error::{CrawlerError, Result};
use crate::eutil::EutilClient;
use crate::query::{QuerySpec, RecordId};
use crate::rate_limit::RateLimiter;
use crate::responses::ESearchResult;

/// Complete, ordered result of a paged search
#[derive(Debug, Clone)]
pub struct SearchHits {
    /// Record UIDs in the index's native order for the chosen sort mode,
    /// truncated at `max_results`
    pub ids: Vec<RecordId>,
    /// Total match count reported by the source index, which may exceed
    /// the number of yielded IDs
    pub total_found: usize,
}

/// Pages through ESearch results for a query
///
/// Paging is inherently sequential: each page's `retstart` depends on how
/// many records the previous pages yielded. Every page request passes
/// through the shared rate limiter and the retry policy.
#[derive(Clone)]
pub struct SearchPager {
    eutil: EutilClient,
}

impl SearchPager {
    /// Create a pager from a configuration and the shared rate limiter
    pub fn new(config: CrawlerConfig, rate_limiter: RateLimiter) -> Result<Self> {
        Ok(Self {
            eutil: EutilClient::new(config, rate_limiter)?,
        })
    }

    /// Run the full paged search for a spec
    ///
    /// Stops when the source reports no further results or when the running
    /// total reaches `max_results`, truncating exactly at the cap regardless
    /// of page-boundary alignment. The first response supplies
    /// `total_found`.
    ///
    /// # Errors
    ///
    /// * `CrawlerError::ApiError` - Non-transient API failure, or transient
    ///   failure after retries are exhausted
    /// * `CrawlerError::JsonError` - Malformed search response
    #[instrument(skip(self, spec), fields(query = %spec.query(), max_results = spec.max_results()))]
    pub async fn search(&self, spec: &QuerySpec) -> Result<SearchHits> {
        spec.validate()?;

        let page_size = self.eutil.config().page_size.min(spec.max_results());
        let mut ids: Vec<RecordId> = Vec::new();
        let mut total_found: usize = 0;

        loop {
            let remaining = spec.max_results() - ids.len();
            let retmax = page_size.min(remaining);
            let url = self
                .eutil
                .endpoint_url("esearch.fcgi", &spec.page_params(ids.len(), retmax));

            debug!(retstart = ids.len(), retmax, "Requesting search page");
            let response = self.eutil.get(&url, "ESearch page").await?;
            let search_result: ESearchResult = response.json().await?;

            // NCBI sometimes returns 200 OK with an ERROR field in the body
            if let Some(error_msg) = &search_result.esearchresult.error {
                return Err(CrawlerError::ApiError {
                    status: 200,
                    message: format!("NCBI ESearch API error: {error_msg}"),
                });
            }

            if ids.is_empty() {
                total_found = search_result
                    .esearchresult
                    .count
                    .as_ref()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
            }

            let page = search_result.esearchresult.idlist;
            let page_len = page.len();
            ids.extend(page.into_iter().map(RecordId));

            // Exact truncation at the cap, even mid-page
            if ids.len() >= spec.max_results() {
                ids.truncate(spec.max_results());
                break;
            }

            // Source exhausted: short or empty page
            if page_len < retmax {
                break;
            }
        }

        info!(
            total_found,
            yielded = ids.len(),
            "Search pagination complete"
        );

        Ok(SearchHits { ids, total_found })
    }
}
