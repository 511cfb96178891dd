//! Integration tests for PDF fetching using mocked download endpoints

use std::path::Path;
use std::time::Duration;

use pmc_crawler::report::FetchStatus;
use pmc_crawler::{
    AvailabilityResult, CrawlerConfig, DownloadLocation, OaFormat, PdfFetcher, RateLimiter,
    RecordId, RetryConfig,
};
use tracing_test::traced_test;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PDF_BODY: &[u8] = b"%PDF-1.5\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n%%EOF\n";

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: false,
        rate_limit_cooldown: Duration::from_millis(10),
    }
}

/// Helper to create a fetcher writing into a test directory
fn create_mock_fetcher(output_dir: &Path) -> PdfFetcher {
    let config = CrawlerConfig::new()
        .with_rate_limit(100.0) // High rate limit for tests
        .with_retry_config(fast_retry());

    PdfFetcher::new(
        config,
        RateLimiter::new(100.0).unwrap(),
        output_dir.to_path_buf(),
    )
    .expect("Fetcher construction should succeed")
}

fn open_access(pmcid: &str, title: &str, year: &str, url: String, format: OaFormat) -> AvailabilityResult {
    AvailabilityResult {
        record_id: RecordId::from(pmcid),
        pmcid: Some(pmcid.to_string()),
        open_access: true,
        location: Some(DownloadLocation { url, format }),
        title: Some(title.to_string()),
        year: Some(year.to_string()),
        diagnostic: None,
    }
}

/// Build a tar.gz archive containing a PDF member, for mocking the OA
/// package endpoint
fn tgz_with_pdf(pdf: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let enc = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(enc);

    let mut header = tar::Header::new_gnu();
    header.set_size(pdf.len() as u64);
    header.set_cksum();
    builder
        .append_data(&mut header, "PMC42/article.pdf", pdf)
        .unwrap();

    builder.into_inner().unwrap().finish().unwrap()
}

/// Test downloading a direct PDF link to its deterministic filename
#[tokio::test]
#[traced_test]
async fn test_downloads_pdf_to_deterministic_name() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/pdf/article.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(PDF_BODY)
                .insert_header("content-type", "application/pdf"),
        )
        .mount(&mock_server)
        .await;

    let fetcher = create_mock_fetcher(dir.path());
    let availability = open_access(
        "7906746",
        "Deep learning for genomics",
        "2021",
        format!("{}/pdf/article.pdf", mock_server.uri()),
        OaFormat::Pdf,
    );

    let outcome = fetcher.fetch(&availability).await;

    assert_eq!(outcome.status, FetchStatus::Downloaded);
    assert_eq!(outcome.bytes, Some(PDF_BODY.len() as u64));
    let file_path = outcome.file_path.expect("Downloaded outcome must carry a path");
    assert_eq!(
        file_path.file_name().unwrap().to_str().unwrap(),
        "PMC7906746_2021_Deep_learning_for_genomics.pdf"
    );
    assert_eq!(std::fs::read(&file_path).unwrap(), PDF_BODY);

    // No partial file left behind
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
        .collect();
    assert!(leftovers.is_empty());
}

/// Test that a payload failing the PDF sanity check yields a failed outcome
/// and leaves no file behind
#[tokio::test]
#[traced_test]
async fn test_non_pdf_payload_fails_without_artifacts() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/pdf/broken.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>This article has moved</html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&mock_server)
        .await;

    let fetcher = create_mock_fetcher(dir.path());
    let availability = open_access(
        "12345",
        "Moved article",
        "2020",
        format!("{}/pdf/broken.pdf", mock_server.uri()),
        OaFormat::Pdf,
    );

    let outcome = fetcher.fetch(&availability).await;

    assert_eq!(outcome.status, FetchStatus::Failed);
    assert!(outcome.file_path.is_none());
    assert!(outcome.error.unwrap_or_default().contains("Integrity"));
    assert_eq!(
        std::fs::read_dir(dir.path()).unwrap().count(),
        0,
        "Neither the target nor a partial file may remain"
    );

    // Integrity failures are permanent: exactly one request
    let received_requests = mock_server.received_requests().await.unwrap();
    assert_eq!(received_requests.len(), 1);
}

/// Test that a 404 from the download endpoint fails without retrying
#[tokio::test]
#[traced_test]
async fn test_missing_resource_fails_without_retry() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/pdf/gone.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let fetcher = create_mock_fetcher(dir.path());
    let availability = open_access(
        "404404",
        "Vanished",
        "2019",
        format!("{}/pdf/gone.pdf", mock_server.uri()),
        OaFormat::Pdf,
    );

    let outcome = fetcher.fetch(&availability).await;

    assert_eq!(outcome.status, FetchStatus::Failed);
    let received_requests = mock_server.received_requests().await.unwrap();
    assert_eq!(received_requests.len(), 1);
}

/// Test that a transient 503 is retried and the download then succeeds
#[tokio::test]
#[traced_test]
async fn test_transient_download_failure_is_retried() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/pdf/flaky.pdf"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pdf/flaky.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BODY))
        .mount(&mock_server)
        .await;

    let fetcher = create_mock_fetcher(dir.path());
    let availability = open_access(
        "55555",
        "Flaky mirror",
        "2022",
        format!("{}/pdf/flaky.pdf", mock_server.uri()),
        OaFormat::Pdf,
    );

    let outcome = fetcher.fetch(&availability).await;

    assert_eq!(outcome.status, FetchStatus::Downloaded);
    let received_requests = mock_server.received_requests().await.unwrap();
    assert_eq!(received_requests.len(), 2);
}

/// Test that two records with identical titles land in distinct files
#[tokio::test]
#[traced_test]
async fn test_identical_titles_get_distinct_files() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BODY))
        .mount(&mock_server)
        .await;

    let fetcher = create_mock_fetcher(dir.path());
    let first = open_access(
        "111",
        "Study",
        "2023",
        format!("{}/pdf/a.pdf", mock_server.uri()),
        OaFormat::Pdf,
    );
    let second = open_access(
        "222",
        "Study",
        "2023",
        format!("{}/pdf/b.pdf", mock_server.uri()),
        OaFormat::Pdf,
    );

    let first_outcome = fetcher.fetch(&first).await;
    let second_outcome = fetcher.fetch(&second).await;

    assert_eq!(first_outcome.status, FetchStatus::Downloaded);
    assert_eq!(second_outcome.status, FetchStatus::Downloaded);
    assert_ne!(first_outcome.file_path, second_outcome.file_path);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

/// Test that a file left by a previous run short-circuits the download
#[tokio::test]
#[traced_test]
async fn test_existing_file_skips_download() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let fetcher = create_mock_fetcher(dir.path());
    let availability = open_access(
        "888",
        "Cached",
        "2021",
        format!("{}/pdf/cached.pdf", mock_server.uri()),
        OaFormat::Pdf,
    );

    std::fs::write(dir.path().join("PMC888_2021_Cached.pdf"), b"%PDF-1.4 old").unwrap();

    let outcome = fetcher.fetch(&availability).await;

    assert_eq!(outcome.status, FetchStatus::Downloaded);
    assert_eq!(outcome.bytes, Some(12));

    let received_requests = mock_server.received_requests().await.unwrap();
    assert_eq!(received_requests.len(), 0, "Existing file must not trigger a download");
}

/// Test extracting the PDF from an OA tgz package when no direct link
/// exists
#[tokio::test]
#[traced_test]
async fn test_tgz_fallback_extracts_pdf() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/packages/PMC42.tar.gz"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(tgz_with_pdf(PDF_BODY))
                .insert_header("content-type", "application/gzip"),
        )
        .mount(&mock_server)
        .await;

    let fetcher = create_mock_fetcher(dir.path());
    let availability = open_access(
        "42",
        "Packaged article",
        "2018",
        format!("{}/packages/PMC42.tar.gz", mock_server.uri()),
        OaFormat::Tgz,
    );

    let outcome = fetcher.fetch(&availability).await;

    assert_eq!(outcome.status, FetchStatus::Downloaded);
    let file_path = outcome.file_path.unwrap();
    assert_eq!(std::fs::read(&file_path).unwrap(), PDF_BODY);

    // The intermediate archive and the staging file are both cleaned up;
    // only the complete PDF remains under its final name
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    let staged: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
        .collect();
    assert!(staged.is_empty());
}

/// Test that an archive without a PDF member yields a failed outcome
#[tokio::test]
#[traced_test]
async fn test_tgz_without_pdf_member_fails() {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let enc = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(enc);
    let notes = b"supplementary notes";
    let mut header = tar::Header::new_gnu();
    header.set_size(notes.len() as u64);
    header.set_cksum();
    builder
        .append_data(&mut header, "PMC43/notes.txt", notes.as_slice())
        .unwrap();
    let archive = builder.into_inner().unwrap().finish().unwrap();

    Mock::given(method("GET"))
        .and(path("/packages/PMC43.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(&mock_server)
        .await;

    let fetcher = create_mock_fetcher(dir.path());
    let availability = open_access(
        "43",
        "No pdf inside",
        "2017",
        format!("{}/packages/PMC43.tar.gz", mock_server.uri()),
        OaFormat::Tgz,
    );

    let outcome = fetcher.fetch(&availability).await;

    assert_eq!(outcome.status, FetchStatus::Failed);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
