use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, info, instrument, warn};

use crate::config::CrawlerConfig;
use crate::error::{CrawlerError, Result};
use crate::eutil::EutilClient;
use crate::query::{RecordId, SearchDb};
use crate::rate_limit::RateLimiter;
use crate::responses::{ELinkResponse, ESummaryResponse};

/// Format of an open-access download location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OaFormat {
    /// Direct PDF link
    Pdf,
    /// tar.gz package containing the PDF among other files
    Tgz,
}

/// Canonical download location for an open-access record
#[derive(Debug, Clone)]
pub struct DownloadLocation {
    pub url: String,
    pub format: OaFormat,
}

/// Per-record output of the batched metadata phase
#[derive(Debug, Clone)]
pub struct RecordMeta {
    pub id: RecordId,
    /// Numeric PMC UID, if the record has a PMC counterpart
    pub pmcid: Option<String>,
    pub title: Option<String>,
    pub year: Option<String>,
    /// Recorded failure from a degraded batch lookup
    pub diagnostic: Option<String>,
}

/// Result of availability resolution for one record; immutable
#[derive(Debug, Clone)]
pub struct AvailabilityResult {
    pub record_id: RecordId,
    /// Numeric PMC UID when the record exists in PMC
    pub pmcid: Option<String>,
    pub open_access: bool,
    pub location: Option<DownloadLocation>,
    pub title: Option<String>,
    pub year: Option<String>,
    pub diagnostic: Option<String>,
}

impl AvailabilityResult {
    fn unavailable(meta: &RecordMeta, diagnostic: Option<String>) -> Self {
        Self {
            record_id: meta.id.clone(),
            pmcid: meta.pmcid.clone(),
            open_access: false,
            location: None,
            title: meta.title.clone(),
            year: meta.year.clone(),
            diagnostic,
        }
    }
}

/// Outcome of one OA service lookup
enum OaLookup {
    Available(DownloadLocation),
    NotOpenAccess(String),
}

/// Resolves which records have a freely downloadable full-text PDF in the
/// PMC Open Access subset
///
/// Resolution happens in two phases: a batched metadata phase
/// ([`prepare`](Self::prepare)) that maps PMIDs to PMC UIDs and collects
/// title/year for file naming, and a per-record OA service lookup
/// ([`resolve`](Self::resolve)) that yields the canonical download
/// location. Records with no open-access entry are not errors; they come
/// back with the open-access flag false.
#[derive(Clone)]
pub struct AvailabilityResolver {
    eutil: EutilClient,
    oa_base_url: String,
}

impl AvailabilityResolver {
    /// Create a resolver from a configuration and the shared rate limiter
    pub fn new(config: CrawlerConfig, rate_limiter: RateLimiter) -> Result<Self> {
        let oa_base_url = config.effective_oa_base_url().to_string();
        Ok(Self {
            eutil: EutilClient::new(config, rate_limiter)?,
            oa_base_url,
        })
    }

    /// Batched metadata phase, preserving input order
    ///
    /// For the PubMed source, maps PMIDs to PMC UIDs via batched ELink
    /// requests; for the PMC source the UID is the record itself. Then
    /// fills title and publication year from batched ESummary lookups.
    /// A chunk whose request permanently fails degrades only that chunk's
    /// records (diagnostic recorded, no PMC counterpart assumed); the run
    /// continues.
    #[instrument(skip(self, ids), fields(records = ids.len()))]
    pub async fn prepare(&self, db: SearchDb, ids: &[RecordId]) -> Vec<RecordMeta> {
        let mut metas: Vec<RecordMeta> = ids
            .iter()
            .map(|id| RecordMeta {
                id: id.clone(),
                pmcid: match db {
                    SearchDb::Pmc => Some(id.as_str().to_string()),
                    SearchDb::Pubmed => None,
                },
                title: None,
                year: None,
                diagnostic: None,
            })
            .collect();

        if db == SearchDb::Pubmed {
            self.link_to_pmc(&mut metas).await;
        }

        self.fill_summaries(&mut metas).await;

        let linked = metas.iter().filter(|m| m.pmcid.is_some()).count();
        info!(records = metas.len(), linked, "Metadata phase complete");

        metas
    }

    /// Map PMIDs to PMC UIDs with batched ELink requests
    async fn link_to_pmc(&self, metas: &mut [RecordMeta]) {
        let chunk_size = self.eutil.config().link_chunk_size;

        for chunk in metas.chunks_mut(chunk_size) {
            let id_list: String = chunk
                .iter()
                .map(|m| m.id.as_str())
                .collect::<Vec<_>>()
                .join(",");
            let url = self.eutil.endpoint_url(
                "elink.fcgi",
                &format!("dbfrom=pubmed&db=pmc&id={id_list}&retmode=json"),
            );

            debug!(batch_size = chunk.len(), "Making batch ELink request");
            match self.fetch_pmc_links(&url).await {
                Ok(links) => {
                    for meta in chunk.iter_mut() {
                        meta.pmcid = links.get(meta.id.as_str()).cloned();
                    }
                }
                Err(err) => {
                    warn!(error = %err, "ELink batch failed, degrading chunk");
                    for meta in chunk.iter_mut() {
                        meta.diagnostic = Some(format!("PMC link lookup failed: {err}"));
                    }
                }
            }
        }
    }

    async fn fetch_pmc_links(&self, url: &str) -> Result<HashMap<String, String>> {
        let response = self.eutil.get(url, "ELink batch").await?;
        let link_result: ELinkResponse = response.json().await?;

        let mut links = HashMap::new();
        for linkset in link_result.linksets {
            let Some(pmid) = linkset.ids.first().map(json_id) else {
                continue;
            };
            let Some(linkset_dbs) = linkset.linkset_dbs else {
                continue;
            };
            for linkset_db in linkset_dbs {
                if linkset_db.db_to == "pmc" {
                    if let Some(pmcid) = linkset_db.links.first().map(json_id) {
                        links.insert(pmid.clone(), pmcid);
                    }
                }
            }
        }
        Ok(links)
    }

    /// Fill title and year from batched ESummary lookups on the PMC UIDs
    async fn fill_summaries(&self, metas: &mut [RecordMeta]) {
        let chunk_size = self.eutil.config().summary_chunk_size;
        let mut with_pmc: Vec<&mut RecordMeta> =
            metas.iter_mut().filter(|m| m.pmcid.is_some()).collect();

        for chunk in with_pmc.chunks_mut(chunk_size) {
            let id_list: String = chunk
                .iter()
                .filter_map(|m| m.pmcid.as_deref())
                .collect::<Vec<_>>()
                .join(",");
            let url = self
                .eutil
                .endpoint_url("esummary.fcgi", &format!("db=pmc&id={id_list}&retmode=json"));

            debug!(batch_size = chunk.len(), "Making batch ESummary request");
            match self.fetch_summaries(&url).await {
                Ok(summaries) => {
                    for meta in chunk.iter_mut() {
                        let Some(pmcid) = meta.pmcid.as_deref() else {
                            continue;
                        };
                        if let Some((title, year)) = summaries.get(pmcid) {
                            meta.title = title.clone();
                            meta.year = year.clone();
                        }
                    }
                }
                Err(err) => {
                    // Missing metadata only affects file naming; the
                    // records stay eligible for the OA lookup.
                    warn!(error = %err, "ESummary batch failed, continuing without metadata");
                    for meta in chunk.iter_mut() {
                        if meta.diagnostic.is_none() {
                            meta.diagnostic = Some(format!("metadata lookup failed: {err}"));
                        }
                    }
                }
            }
        }
    }

    async fn fetch_summaries(
        &self,
        url: &str,
    ) -> Result<HashMap<String, (Option<String>, Option<String>)>> {
        let response = self.eutil.get(url, "ESummary batch").await?;
        let summary: ESummaryResponse = response.json().await?;

        let mut summaries = HashMap::new();
        if let Some(uids) = summary.result.get("uids").and_then(|v| v.as_array()) {
            for uid in uids {
                let Some(uid) = uid.as_str().map(str::to_string).or_else(|| {
                    uid.as_u64().map(|n| n.to_string())
                }) else {
                    continue;
                };
                let Some(doc) = summary.result.get(&uid) else {
                    continue;
                };
                let title = doc
                    .get("title")
                    .and_then(|t| t.as_str())
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty());
                let year = doc
                    .get("pubdate")
                    .and_then(|d| d.as_str())
                    .and_then(extract_year);
                summaries.insert(uid, (title, year));
            }
        }
        Ok(summaries)
    }

    /// Resolve the open-access availability of one prepared record
    ///
    /// Never fails the batch: a record whose OA lookup permanently fails is
    /// degraded to not-open-access with a recorded diagnostic, and the run
    /// continues. Looking up the same unchanged record twice yields the
    /// same result.
    #[instrument(skip(self, meta), fields(record_id = %meta.id))]
    pub async fn resolve(&self, meta: &RecordMeta) -> AvailabilityResult {
        let Some(pmcid) = meta.pmcid.as_deref() else {
            return AvailabilityResult::unavailable(
                meta,
                meta.diagnostic
                    .clone()
                    .or_else(|| Some("no PMC counterpart".to_string())),
            );
        };

        let url = self
            .eutil
            .with_api_params(&format!("{}?id=PMC{pmcid}", self.oa_base_url));

        match self.lookup_oa(&url, pmcid).await {
            Ok(OaLookup::Available(location)) => AvailabilityResult {
                record_id: meta.id.clone(),
                pmcid: meta.pmcid.clone(),
                open_access: true,
                location: Some(location),
                title: meta.title.clone(),
                year: meta.year.clone(),
                diagnostic: None,
            },
            Ok(OaLookup::NotOpenAccess(code)) => {
                debug!(code = %code, "Record is not in the OA subset");
                AvailabilityResult::unavailable(meta, None)
            }
            Err(err) => {
                warn!(error = %err, "OA lookup failed, degrading record");
                AvailabilityResult::unavailable(meta, Some(format!("OA lookup failed: {err}")))
            }
        }
    }

    async fn lookup_oa(&self, url: &str, pmcid: &str) -> Result<OaLookup> {
        let response = self.eutil.get(url, "OA service lookup").await?;
        let body = response.text().await?;
        parse_oa_response(&body, pmcid)
    }
}

/// Normalize an ELink id value, which the API serializes as either a JSON
/// number or a string
fn json_id(value: &serde_json::Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .or_else(|| value.as_u64().map(|n| n.to_string()))
        .unwrap_or_default()
}

/// Pull a four-digit year from an ESummary pubdate like "2023 Mar 15"
fn extract_year(pubdate: &str) -> Option<String> {
    let year: String = pubdate.chars().take_while(|c| c.is_ascii_digit()).collect();
    if year.len() == 4 {
        Some(year)
    } else {
        None
    }
}

/// Parse an OA service response
///
/// The service answers with either an `<error code="...">` element (most
/// commonly `idIsNotOpenAccess`) or a `<record>` containing `<link>`
/// elements. A `pdf` link is preferred; `tgz` is the fallback.
fn parse_oa_response(xml: &str, pmcid: &str) -> Result<OaLookup> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut pdf_link: Option<String> = None;
    let mut tgz_link: Option<String> = None;
    let mut error_code: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"error" => {
                    error_code = attribute_value(&e, b"code").or(Some("unknown".to_string()));
                }
                b"link" => {
                    let format = attribute_value(&e, b"format");
                    let href = attribute_value(&e, b"href");
                    if let (Some(format), Some(href)) = (format, href) {
                        match format.as_str() {
                            "pdf" => pdf_link = Some(href),
                            "tgz" => tgz_link = Some(href),
                            _ => {}
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CrawlerError::XmlError(format!(
                    "OA response for PMC{pmcid}: {e}"
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if let Some(code) = error_code {
        return Ok(OaLookup::NotOpenAccess(code));
    }
    if let Some(url) = pdf_link {
        return Ok(OaLookup::Available(DownloadLocation {
            url,
            format: OaFormat::Pdf,
        }));
    }
    if let Some(url) = tgz_link {
        return Ok(OaLookup::Available(DownloadLocation {
            url,
            format: OaFormat::Tgz,
        }));
    }
    Ok(OaLookup::NotOpenAccess("noLinksAvailable".to_string()))
}

fn attribute_value(element: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| String::from_utf8(attr.value.into_owned()).ok())
}
