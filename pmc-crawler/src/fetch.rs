use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use futures_util::StreamExt;
use regex::Regex;
use reqwest::Client;
use tar::Archive;
use tokio::fs as tokio_fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::config::CrawlerConfig;
use crate::error::{CrawlerError, Result};
use crate::rate_limit::RateLimiter;
use crate::report::{FetchOutcome, FetchStatus};
use crate::resolve::{AvailabilityResult, OaFormat};
use crate::retry::with_retry;

/// Maximum length of the sanitized title fragment in a filename
const MAX_TITLE_LENGTH: usize = 100;

/// NCBI's FTP tree is reachable over HTTPS at the same paths
const NCBI_FTP_PREFIX: &str = "ftp://ftp.ncbi.nlm.nih.gov";
const NCBI_HTTPS_PREFIX: &str = "https://ftp.ncbi.nlm.nih.gov";

/// Downloads one PDF per open-access record into the output directory
///
/// Filenames are derived deterministically as
/// `<PMCID>_<Year>_<SanitizedTitle>.pdf`. The record identifier embedded in
/// the name keeps two records with identical titles apart and makes re-runs
/// idempotent: an existing file for the same record short-circuits without
/// a network call.
pub struct PdfFetcher {
    client: Client,
    rate_limiter: RateLimiter,
    config: CrawlerConfig,
    output_dir: PathBuf,
    illegal_chars: Regex,
    separator_runs: Regex,
}

impl PdfFetcher {
    /// Create a fetcher writing into `output_dir`, sharing the run's rate
    /// limiter
    pub fn new(
        config: CrawlerConfig,
        rate_limiter: RateLimiter,
        output_dir: PathBuf,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.effective_user_agent())
            .timeout(Duration::from_secs(config.download_timeout.as_secs()))
            .build()
            .map_err(CrawlerError::from)?;

        let illegal_chars =
            Regex::new(r#"[<>:"/\\|?*[:cntrl:]]"#).map_err(|e| CrawlerError::InvalidConfig(
                format!("filename sanitizer pattern: {e}"),
            ))?;
        let separator_runs = Regex::new(r"[\s_]+").map_err(|e| CrawlerError::InvalidConfig(
            format!("filename sanitizer pattern: {e}"),
        ))?;

        Ok(Self {
            client,
            rate_limiter,
            config,
            output_dir,
            illegal_chars,
            separator_runs,
        })
    }

    /// Download the PDF for one resolved record
    ///
    /// Never returns an error; every failure mode is captured in the
    /// outcome. Records without the open-access flag are skipped without
    /// any network call.
    #[instrument(skip(self, availability), fields(record_id = %availability.record_id))]
    pub async fn fetch(&self, availability: &AvailabilityResult) -> FetchOutcome {
        let location = match (availability.open_access, &availability.location) {
            (true, Some(location)) => location,
            _ => {
                debug!("Record is not open access, skipping without network call");
                return FetchOutcome {
                    record_id: availability.record_id.clone(),
                    status: FetchStatus::SkippedNotOpenAccess,
                    title: availability.title.clone(),
                    file_path: None,
                    error: availability.diagnostic.clone(),
                    bytes: None,
                };
            }
        };

        let path = self.target_path(availability);

        // The name embeds the record id, so an existing file means a
        // previous run already fetched this record.
        if let Ok(metadata) = tokio_fs::metadata(&path).await {
            debug!(path = %path.display(), "File already exists, skipping download");
            return FetchOutcome {
                record_id: availability.record_id.clone(),
                status: FetchStatus::Downloaded,
                title: availability.title.clone(),
                file_path: Some(path),
                error: None,
                bytes: Some(metadata.len()),
            };
        }

        let url = rewrite_ftp_url(&location.url);
        let result = match location.format {
            OaFormat::Pdf => self.download_pdf(&url, &path).await,
            OaFormat::Tgz => self.download_tgz_and_extract(&url, &path, availability).await,
        };

        match result {
            Ok(bytes) => {
                info!(path = %path.display(), bytes, "Downloaded PDF");
                FetchOutcome {
                    record_id: availability.record_id.clone(),
                    status: FetchStatus::Downloaded,
                    title: availability.title.clone(),
                    file_path: Some(path),
                    error: None,
                    bytes: Some(bytes),
                }
            }
            Err(err) => {
                warn!(error = %err, "Download failed");
                FetchOutcome {
                    record_id: availability.record_id.clone(),
                    status: FetchStatus::Failed,
                    title: availability.title.clone(),
                    file_path: None,
                    error: Some(err.to_string()),
                    bytes: None,
                }
            }
        }
    }

    /// Deterministic output path for a record
    fn target_path(&self, availability: &AvailabilityResult) -> PathBuf {
        let label = match &availability.pmcid {
            Some(pmcid) => format!("PMC{pmcid}"),
            None => availability.record_id.as_str().to_string(),
        };
        let year = availability.year.as_deref().unwrap_or("");
        let title = self.sanitize_filename(availability.title.as_deref().unwrap_or(""));
        self.output_dir
            .join(format!("{label}_{year}_{title}.pdf"))
    }

    /// Replace non-filesystem-safe characters, collapse separator runs,
    /// and cap the length so the derived name stays portable
    fn sanitize_filename(&self, name: &str) -> String {
        let replaced = self.illegal_chars.replace_all(name, "_");
        let collapsed = self.separator_runs.replace_all(&replaced, "_");
        let truncated: String = collapsed.chars().take(MAX_TITLE_LENGTH).collect();
        let trimmed = truncated.trim_matches('_');
        if trimmed.is_empty() {
            "Unknown".to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Download a direct PDF link, streaming to a partial file that is
    /// renamed only after the payload passes the PDF sanity check
    async fn download_pdf(&self, url: &str, path: &Path) -> Result<u64> {
        let part_path = partial_path(path);

        let result = with_retry(
            || async {
                let bytes = self.stream_to_file(url, &part_path).await?;
                verify_pdf_file(&part_path, bytes).await?;
                Ok(bytes)
            },
            &self.config.retry_config,
            "PDF download",
        )
        .await;

        match result {
            Ok(bytes) => {
                tokio_fs::rename(&part_path, path)
                    .await
                    .map_err(|e| CrawlerError::IoError {
                        message: format!("failed to move completed download into place: {e}"),
                    })?;
                Ok(bytes)
            }
            Err(err) => {
                remove_if_exists(&part_path).await;
                Err(err)
            }
        }
    }

    /// Download an OA tgz package and extract the PDF member from it
    async fn download_tgz_and_extract(
        &self,
        url: &str,
        path: &Path,
        availability: &AvailabilityResult,
    ) -> Result<u64> {
        let label = availability
            .pmcid
            .as_deref()
            .unwrap_or_else(|| availability.record_id.as_str());
        let archive_path = self.output_dir.join(format!("PMC{label}.tar.gz.part"));

        let result = with_retry(
            || async {
                let bytes = self.stream_to_file(url, &archive_path).await?;
                if bytes == 0 {
                    return Err(CrawlerError::IntegrityError {
                        message: "archive payload is empty".to_string(),
                    });
                }
                Ok(bytes)
            },
            &self.config.retry_config,
            "OA package download",
        )
        .await;

        if let Err(err) = result {
            remove_if_exists(&archive_path).await;
            return Err(err);
        }

        let extracted = extract_pdf_member(&archive_path);
        remove_if_exists(&archive_path).await;

        let pdf_bytes = extracted?;
        if !pdf_bytes.starts_with(b"%PDF") {
            return Err(CrawlerError::IntegrityError {
                message: "archive member does not look like a PDF".to_string(),
            });
        }

        // Stage through a partial file like the direct-PDF path, so a crash
        // mid-write cannot leave a truncated file under the final name.
        let len = pdf_bytes.len() as u64;
        let part_path = partial_path(path);
        if let Err(e) = tokio_fs::write(&part_path, pdf_bytes).await {
            remove_if_exists(&part_path).await;
            return Err(CrawlerError::IoError {
                message: format!("failed to write extracted PDF: {e}"),
            });
        }
        tokio_fs::rename(&part_path, path)
            .await
            .map_err(|e| CrawlerError::IoError {
                message: format!("failed to move extracted PDF into place: {e}"),
            })?;
        Ok(len)
    }

    /// Stream one HTTP response body to a file, returning the byte count
    ///
    /// 404 is a definitive "resource not found" and is never retried;
    /// 5xx and 429 are promoted to retryable errors.
    async fn stream_to_file(&self, url: &str, path: &Path) -> Result<u64> {
        self.rate_limiter.acquire().await;
        debug!("Downloading from: {url}");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(CrawlerError::from)?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(CrawlerError::ResourceNotFound {
                id: url.to_string(),
            });
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(CrawlerError::ApiError {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown error").to_string(),
            });
        }
        if !status.is_success() {
            return Err(CrawlerError::ApiError {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown error").to_string(),
            });
        }

        let mut file = tokio_fs::File::create(path)
            .await
            .map_err(|e| CrawlerError::IoError {
                message: format!("failed to create download file: {e}"),
            })?;

        let mut bytes: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(CrawlerError::from)?;
            bytes += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| CrawlerError::IoError {
                    message: format!("failed to write download chunk: {e}"),
                })?;
        }

        file.flush().await.map_err(|e| CrawlerError::IoError {
            message: format!("failed to flush download file: {e}"),
        })?;

        Ok(bytes)
    }
}

/// Partial-download path alongside the final target
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

async fn remove_if_exists(path: &Path) {
    if tokio_fs::metadata(path).await.is_ok() {
        if let Err(e) = tokio_fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove partial file");
        }
    }
}

/// Rewrite NCBI FTP links to their HTTPS equivalents
fn rewrite_ftp_url(url: &str) -> String {
    match url.strip_prefix(NCBI_FTP_PREFIX) {
        Some(rest) => format!("{NCBI_HTTPS_PREFIX}{rest}"),
        None => url.to_string(),
    }
}

/// Verify a downloaded payload is a non-empty PDF (magic-byte check)
async fn verify_pdf_file(path: &Path, bytes: u64) -> Result<()> {
    if bytes == 0 {
        return Err(CrawlerError::IntegrityError {
            message: "payload is empty".to_string(),
        });
    }

    let mut header = [0u8; 5];
    let n = {
        use tokio::io::AsyncReadExt;
        let mut file = tokio_fs::File::open(path)
            .await
            .map_err(|e| CrawlerError::IoError {
                message: format!("failed to reopen download for verification: {e}"),
            })?;
        file.read(&mut header).await.map_err(|e| CrawlerError::IoError {
            message: format!("failed to read download header: {e}"),
        })?
    };

    if n < 4 || !header.starts_with(b"%PDF") {
        return Err(CrawlerError::IntegrityError {
            message: "payload does not look like a PDF".to_string(),
        });
    }

    Ok(())
}

/// Extract the first PDF member from a tar.gz archive
fn extract_pdf_member(archive_path: &Path) -> Result<Vec<u8>> {
    let file = std::fs::File::open(archive_path).map_err(|e| CrawlerError::IoError {
        message: format!("failed to open archive: {e}"),
    })?;

    let tar_gz = GzDecoder::new(file);
    let mut archive = Archive::new(tar_gz);

    for entry in archive.entries().map_err(|e| CrawlerError::IoError {
        message: format!("failed to read archive entries: {e}"),
    })? {
        let mut entry = entry.map_err(|e| CrawlerError::IoError {
            message: format!("failed to read archive entry: {e}"),
        })?;

        let is_pdf = entry
            .path()
            .ok()
            .and_then(|p| p.extension().map(|e| e.to_ascii_lowercase()))
            .map(|ext| ext == "pdf")
            .unwrap_or(false);

        if is_pdf {
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| CrawlerError::IoError {
                    message: format!("failed to extract archive member: {e}"),
                })?;
            return Ok(contents);
        }
    }

    Err(CrawlerError::IntegrityError {
        message: "archive contains no PDF member".to_string(),
    })
}
