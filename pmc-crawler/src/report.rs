use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::query::RecordId;

/// Final status of one record that entered the fetch stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// PDF written to disk (or already present from a previous run)
    Downloaded,
    /// Record has no open-access full text; expected, not an error
    SkippedNotOpenAccess,
    /// Download was attempted or a location existed, but no PDF landed
    Failed,
}

/// Per-record outcome, one per record that entered the fetch stage
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub record_id: RecordId,
    pub status: FetchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

/// Aggregate report for one crawl run
///
/// Built incrementally by the orchestrator and finalized at run end. The
/// `details` list preserves the original search-result order even though
/// resolution and fetching complete out of order. Persistence is the
/// caller's responsibility; this is only the in-memory structure.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub query: String,
    /// Total match count reported by the source index
    pub total_found: usize,
    /// Records whose open-access flag resolved true
    pub pmc_available: usize,
    pub downloaded: usize,
    pub failed: usize,
    /// Elapsed wall-clock time, e.g. "12.3s"
    pub elapsed_time: String,
    pub details: Vec<FetchOutcome>,
}

impl RunReport {
    pub(crate) fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            total_found: 0,
            pmc_available: 0,
            downloaded: 0,
            failed: 0,
            elapsed_time: String::new(),
            details: Vec::new(),
        }
    }

    /// Record one outcome and update the counters
    pub(crate) fn record_outcome(&mut self, outcome: FetchOutcome) {
        match outcome.status {
            FetchStatus::Downloaded => self.downloaded += 1,
            FetchStatus::Failed => self.failed += 1,
            FetchStatus::SkippedNotOpenAccess => {}
        }
        self.details.push(outcome);
    }

    pub(crate) fn finalize(&mut self, elapsed: Duration) {
        self.elapsed_time = format!("{:.1}s", elapsed.as_secs_f64());
    }

    /// Records that were skipped because no open-access full text exists
    pub fn skipped_not_open_access(&self) -> usize {
        self.details
            .iter()
            .filter(|d| d.status == FetchStatus::SkippedNotOpenAccess)
            .count()
    }
}
