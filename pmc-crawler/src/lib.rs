//! # PMC Crawler
//!
//! A rate-limited crawler for bulk literature collection: searches PubMed
//! and PMC by keyword and date range, resolves which hits have a freely
//! downloadable full-text PDF in the PMC Open Access subset, downloads
//! those PDFs, and produces a structured run report.
//!
//! ## Features
//!
//! - **Paged search**: complete, ordered record sequences from ESearch
//! - **Open-access resolution**: batched ELink/ESummary metadata plus
//!   per-record OA service lookups
//! - **Rate limiting**: one shared rolling-window limiter gates all
//!   outbound traffic (3 requests/second, or 10 with an NCBI API key)
//! - **Retry with backoff**: transient failures are retried with jittered
//!   exponential backoff; permanent ones fail fast
//! - **Deterministic naming**: `<PMCID>_<Year>_<SanitizedTitle>.pdf`,
//!   collision-free and idempotent across re-runs
//!
//! ## Quick Start
//!
//! ```no_run
//! use pmc_crawler::{PmcCrawler, CrawlerConfig, QuerySpec, SortOrder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CrawlerConfig::new()
//!         .with_api_key("your_api_key_here")
//!         .with_email("researcher@university.edu");
//!
//!     let crawler = PmcCrawler::with_config(config, "downloads")?;
//!
//!     let spec = QuerySpec::new("machine learning")
//!         .with_sort(SortOrder::PublicationDate)
//!         .with_max_results(50);
//!
//!     let report = crawler.crawl(&spec).await?;
//!     println!(
//!         "{} found, {} open access, {} downloaded, {} failed",
//!         report.total_found, report.pmc_available, report.downloaded, report.failed
//!     );
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawl;
pub mod error;
mod eutil;
pub mod fetch;
pub mod query;
pub mod rate_limit;
pub mod report;
pub mod resolve;
mod responses;
pub mod retry;
pub mod search;

// Re-export main types for convenience
pub use config::CrawlerConfig;
pub use crawl::{CrawlFailure, CrawlOrchestrator, CrawlStage};
pub use error::{CrawlerError, Result};
pub use fetch::PdfFetcher;
pub use query::{QuerySpec, RecordId, SearchDb, SortOrder};
pub use rate_limit::RateLimiter;
pub use report::{FetchOutcome, FetchStatus, RunReport};
pub use resolve::{AvailabilityResolver, AvailabilityResult, DownloadLocation, OaFormat};
pub use retry::RetryConfig;
pub use search::{SearchHits, SearchPager};

use std::path::Path;

use tokio_util::sync::CancellationToken;

/// High-level crawler combining search, resolution, and fetching
///
/// Owns one shared rate limiter; every component holds a clone of it, so
/// the configured ceiling applies to the run as a whole rather than per
/// stage.
pub struct PmcCrawler {
    orchestrator: CrawlOrchestrator,
}

impl PmcCrawler {
    /// Create a crawler with default configuration
    ///
    /// # Arguments
    ///
    /// * `output_dir` - Directory downloaded PDFs are written to
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        Self::with_config(CrawlerConfig::new(), output_dir)
    }

    /// Create a crawler with custom configuration
    ///
    /// The configuration is validated here; invalid settings (zero rate
    /// ceiling, oversized worker pool) are rejected before any network
    /// call.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pmc_crawler::{PmcCrawler, CrawlerConfig};
    ///
    /// let config = CrawlerConfig::new().with_api_key("your_api_key_here");
    /// let crawler = PmcCrawler::with_config(config, "downloads").unwrap();
    /// ```
    pub fn with_config<P: AsRef<Path>>(config: CrawlerConfig, output_dir: P) -> Result<Self> {
        config.validate()?;

        let rate_limiter = config.create_rate_limiter()?;

        let pager = SearchPager::new(config.clone(), rate_limiter.clone())?;
        let resolver = AvailabilityResolver::new(config.clone(), rate_limiter.clone())?;
        let fetcher = PdfFetcher::new(
            config.clone(),
            rate_limiter,
            output_dir.as_ref().to_path_buf(),
        )?;

        Ok(Self {
            orchestrator: CrawlOrchestrator::new(pager, resolver, fetcher, config.concurrency),
        })
    }

    /// Run one crawl from query spec to run report
    pub async fn crawl(&self, spec: &QuerySpec) -> std::result::Result<RunReport, CrawlFailure> {
        self.orchestrator.run(spec).await
    }

    /// Run one crawl, honoring an external stop signal between units of
    /// work
    pub async fn crawl_with_cancellation(
        &self,
        spec: &QuerySpec,
        cancel: CancellationToken,
    ) -> std::result::Result<RunReport, CrawlFailure> {
        self.orchestrator.run_with_cancellation(spec, cancel).await
    }
}
