use std::fmt;
use std::time::Instant;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::CrawlerError;
use crate::fetch::PdfFetcher;
use crate::query::QuerySpec;
use crate::report::{FetchOutcome, RunReport};
use crate::resolve::AvailabilityResolver;
use crate::search::SearchPager;

/// Stages of a crawl run
///
/// `Failed` is terminal and reachable from any stage on a non-recoverable
/// error; every other transition is linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStage {
    Idle,
    Searching,
    Resolving,
    Fetching,
    Reporting,
    Done,
    Failed,
}

/// A run-level failure carrying the best-effort partial report
///
/// Per-record failures never produce this; they are captured in the
/// report's outcomes. This surfaces only when a whole stage fails
/// non-recoverably (e.g. search pagination exhausts its retries).
#[derive(Debug)]
pub struct CrawlFailure {
    pub error: CrawlerError,
    /// Progress salvaged up to the point of failure
    pub report: RunReport,
}

impl fmt::Display for CrawlFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "crawl failed: {}", self.error)
    }
}

impl std::error::Error for CrawlFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Drives one run from `QuerySpec` to `RunReport`
///
/// Search paging is sequential; resolution and fetching run on a bounded
/// worker pool, overlapping OA lookups with downloads of already-resolved
/// records. The shared rate limiter remains the single throughput gate.
/// Outcomes are index-tagged and collected into a pre-sized container, so
/// the final report preserves search order regardless of completion order.
pub struct CrawlOrchestrator {
    pager: SearchPager,
    resolver: AvailabilityResolver,
    fetcher: PdfFetcher,
    concurrency: usize,
}

impl CrawlOrchestrator {
    pub(crate) fn new(
        pager: SearchPager,
        resolver: AvailabilityResolver,
        fetcher: PdfFetcher,
        concurrency: usize,
    ) -> Self {
        Self {
            pager,
            resolver,
            fetcher,
            concurrency,
        }
    }

    /// Run a crawl to completion
    pub async fn run(&self, spec: &QuerySpec) -> Result<RunReport, CrawlFailure> {
        self.run_with_cancellation(spec, CancellationToken::new())
            .await
    }

    /// Run a crawl, honoring an external stop signal
    ///
    /// Cancellation is observed between discrete units of work (one record
    /// resolution plus its download), never mid-download, so no corrupt
    /// partial files are left behind. On cancellation the report is still
    /// finalized from whatever outcomes exist.
    #[instrument(skip(self, spec, cancel), fields(query = %spec.query()))]
    pub async fn run_with_cancellation(
        &self,
        spec: &QuerySpec,
        cancel: CancellationToken,
    ) -> Result<RunReport, CrawlFailure> {
        let started = Instant::now();
        let mut report = RunReport::new(spec.query());

        // Invalid configuration is rejected before any network call
        if let Err(error) = spec.validate() {
            report.finalize(started.elapsed());
            return Err(CrawlFailure { error, report });
        }

        debug!(stage = ?CrawlStage::Searching, "Entering stage");
        let hits = match self.pager.search(spec).await {
            Ok(hits) => hits,
            Err(error) => {
                warn!(stage = ?CrawlStage::Failed, error = %error, "Search stage failed");
                report.finalize(started.elapsed());
                return Err(CrawlFailure { error, report });
            }
        };
        report.total_found = hits.total_found;

        if cancel.is_cancelled() {
            report.finalize(started.elapsed());
            return Ok(report);
        }

        debug!(stage = ?CrawlStage::Resolving, records = hits.ids.len(), "Entering stage");
        let metas = self.resolver.prepare(spec.db(), &hits.ids).await;

        debug!(stage = ?CrawlStage::Fetching, concurrency = self.concurrency, "Entering stage");
        let mut ordered: Vec<Option<(bool, FetchOutcome)>> =
            (0..metas.len()).map(|_| None).collect();

        {
            let resolver = &self.resolver;
            let fetcher = &self.fetcher;
            let mut completions = futures_util::stream::iter(metas.iter().enumerate().map(
                |(position, meta)| {
                    let cancel = cancel.clone();
                    async move {
                        // A unit of work is one record's resolution plus its
                        // download; a stop signal between units is honored,
                        // a stop signal mid-unit is not.
                        if cancel.is_cancelled() {
                            return (position, None);
                        }
                        let availability = resolver.resolve(meta).await;
                        if cancel.is_cancelled() {
                            return (position, None);
                        }
                        let outcome = fetcher.fetch(&availability).await;
                        (position, Some((availability.open_access, outcome)))
                    }
                },
            ))
            .buffer_unordered(self.concurrency);

            while let Some((position, completion)) = completions.next().await {
                ordered[position] = completion;
            }
        }

        debug!(stage = ?CrawlStage::Reporting, "Entering stage");
        for completion in ordered.into_iter().flatten() {
            let (open_access, outcome) = completion;
            if open_access {
                report.pmc_available += 1;
            }
            report.record_outcome(outcome);
        }
        report.finalize(started.elapsed());

        info!(
            stage = ?CrawlStage::Done,
            total_found = report.total_found,
            pmc_available = report.pmc_available,
            downloaded = report.downloaded,
            failed = report.failed,
            elapsed = %report.elapsed_time,
            "Crawl complete"
        );

        Ok(report)
    }
}
