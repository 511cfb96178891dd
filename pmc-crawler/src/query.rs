use std::fmt;

use time::Date;

use crate::error::{CrawlerError, Result};

/// PubMed limits: retstart cannot exceed 9998 and retmax is capped, so only
/// the first 9,999 results of any query are retrievable.
pub const MAX_RETRIEVABLE: usize = 9999;

/// Which NCBI index the search runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDb {
    /// PMC full-text index; record UIDs are PMC article identifiers
    Pmc,
    /// PubMed primary index; record UIDs are PMIDs and need an ELink hop
    /// to find their PMC counterpart
    Pubmed,
}

impl SearchDb {
    /// Value for the ESearch `db=` parameter
    pub fn as_api_param(&self) -> &'static str {
        match self {
            SearchDb::Pmc => "pmc",
            SearchDb::Pubmed => "pubmed",
        }
    }
}

/// Sort order for search results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Index-native relevance ranking
    Relevance,
    /// Most recent publication date first
    PublicationDate,
}

impl SortOrder {
    /// Value for the ESearch `sort=` parameter
    pub fn as_api_param(&self) -> &'static str {
        match self {
            SortOrder::Relevance => "relevance",
            SortOrder::PublicationDate => "pub_date",
        }
    }
}

/// Opaque record identifier in the source index's native ordering
///
/// For `SearchDb::Pmc` this is the numeric PMC UID (no "PMC" prefix);
/// for `SearchDb::Pubmed` it is the PMID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

/// A validated search request, immutable once a run starts
///
/// # Example
///
/// ```
/// use pmc_crawler::{QuerySpec, SearchDb, SortOrder};
///
/// let spec = QuerySpec::new("machine learning")
///     .with_db(SearchDb::Pmc)
///     .with_sort(SortOrder::PublicationDate)
///     .with_max_results(50);
///
/// assert!(spec.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct QuerySpec {
    query: String,
    db: SearchDb,
    sort: SortOrder,
    max_results: usize,
    date_range: Option<(Date, Date)>,
}

impl QuerySpec {
    /// Create a query spec with default settings (PMC index, relevance
    /// sort, 100 results)
    pub fn new<S: Into<String>>(query: S) -> Self {
        Self {
            query: query.into(),
            db: SearchDb::Pmc,
            sort: SortOrder::Relevance,
            max_results: 100,
            date_range: None,
        }
    }

    /// Select the result source
    pub fn with_db(mut self, db: SearchDb) -> Self {
        self.db = db;
        self
    }

    /// Select the sort mode
    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Upper bound on the total number of records processed
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Restrict results to an inclusive publication-date range
    pub fn with_date_range(mut self, start: Date, end: Date) -> Self {
        self.date_range = Some((start, end));
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn db(&self) -> SearchDb {
        self.db
    }

    pub fn sort(&self) -> SortOrder {
        self.sort
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn date_range(&self) -> Option<(Date, Date)> {
        self.date_range
    }

    /// Validate the spec before a run starts
    ///
    /// Invalid combinations are rejected here, before any network call:
    /// empty query, non-positive or over-cap max results, end date before
    /// start date.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(CrawlerError::InvalidConfig(
                "query must not be empty".to_string(),
            ));
        }
        if self.max_results == 0 {
            return Err(CrawlerError::InvalidConfig(
                "max_results must be positive".to_string(),
            ));
        }
        if self.max_results > MAX_RETRIEVABLE {
            return Err(CrawlerError::InvalidConfig(format!(
                "max_results {} exceeds the retrievable maximum of {}",
                self.max_results, MAX_RETRIEVABLE
            )));
        }
        if let Some((start, end)) = self.date_range {
            if end < start {
                return Err(CrawlerError::InvalidConfig(format!(
                    "end date {end} is before start date {start}"
                )));
            }
        }
        Ok(())
    }

    /// ESearch query parameters for one page of this spec
    pub(crate) fn page_params(&self, retstart: usize, retmax: usize) -> String {
        let mut params = format!(
            "db={}&term={}&retmax={}&retstart={}&retmode=json&sort={}",
            self.db.as_api_param(),
            urlencoding::encode(&self.query),
            retmax,
            retstart,
            self.sort.as_api_param(),
        );

        if let Some((start, end)) = self.date_range {
            params.push_str(&format!(
                "&datetype=pdat&mindate={:04}/{:02}/{:02}&maxdate={:04}/{:02}/{:02}",
                start.year(),
                start.month() as u8,
                start.day(),
                end.year(),
                end.month() as u8,
                end.day(),
            ));
        }

        params
    }
}
