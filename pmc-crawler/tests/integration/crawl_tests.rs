//! End-to-end crawl tests driving the full pipeline against mocked NCBI
//! endpoints: search, metadata, OA resolution, and download

use std::path::Path;
use std::time::Duration;

use pmc_crawler::{
    CrawlerConfig, CrawlerError, FetchStatus, PmcCrawler, QuerySpec, RetryConfig,
};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PDF_BODY: &[u8] = b"%PDF-1.5\ncontent\n%%EOF\n";

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: false,
        rate_limit_cooldown: Duration::from_millis(10),
    }
}

/// Helper to create a crawler whose every endpoint points at the mock
/// server
fn create_mock_crawler(mock_server: &MockServer, output_dir: &Path) -> PmcCrawler {
    let config = CrawlerConfig::new()
        .with_base_url(mock_server.uri())
        .with_oa_base_url(format!("{}/oa/oa.fcgi", mock_server.uri()))
        .with_rate_limit(100.0) // High rate limit for tests
        .with_retry_config(fast_retry())
        .with_concurrency(2);

    PmcCrawler::with_config(config, output_dir).expect("Crawler construction should succeed")
}

fn esearch_body(count: usize, ids: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "esearchresult": {
            "count": count.to_string(),
            "retmax": ids.len().to_string(),
            "retstart": "0",
            "idlist": ids,
        }
    })
}

async fn mount_esearch(mock_server: &MockServer, count: usize, ids: &[&str]) {
    Mock::given(method("GET"))
        .and(path_regex(r"/esearch\.fcgi.*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(esearch_body(count, ids)))
        .mount(mock_server)
        .await;
}

async fn mount_esummary(mock_server: &MockServer, result: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path_regex(r"/esummary\.fcgi.*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": result
        })))
        .mount(mock_server)
        .await;
}

async fn mount_oa_pdf(mock_server: &MockServer, pmcid: &str, pdf_url: &str) {
    let body = format!(
        r#"<OA><records returned-count="1" total-count="1">
            <record id="PMC{pmcid}">
                <link format="pdf" href="{pdf_url}"/>
            </record>
        </records></OA>"#
    );
    Mock::given(method("GET"))
        .and(path("/oa/oa.fcgi"))
        .and(query_param("id", format!("PMC{pmcid}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(mock_server)
        .await;
}

async fn mount_oa_not_open_access(mock_server: &MockServer, pmcid: &str) {
    let body = format!(
        r#"<OA><error code="idIsNotOpenAccess">identifier 'PMC{pmcid}' is not Open Access</error></OA>"#
    );
    Mock::given(method("GET"))
        .and(path("/oa/oa.fcgi"))
        .and(query_param("id", format!("PMC{pmcid}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(mock_server)
        .await;
}

/// Test a complete happy-path run: search, resolve, download, report
#[tokio::test]
#[traced_test]
async fn test_full_run_downloads_open_access_pdfs() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_esearch(&mock_server, 2, &["100", "200"]).await;
    mount_esummary(
        &mock_server,
        serde_json::json!({
            "uids": ["100", "200"],
            "100": {"title": "First article", "pubdate": "2022 May"},
            "200": {"title": "Second article", "pubdate": "2023 Jun"},
        }),
    )
    .await;
    mount_oa_pdf(&mock_server, "100", &format!("{}/pdf/100.pdf", mock_server.uri())).await;
    mount_oa_pdf(&mock_server, "200", &format!("{}/pdf/200.pdf", mock_server.uri())).await;
    Mock::given(method("GET"))
        .and(path_regex(r"/pdf/.*\.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BODY))
        .mount(&mock_server)
        .await;

    let crawler = create_mock_crawler(&mock_server, dir.path());
    let spec = QuerySpec::new("machine learning").with_max_results(10);

    let report = crawler.crawl(&spec).await.expect("Crawl should succeed");

    assert_eq!(report.total_found, 2);
    assert_eq!(report.pmc_available, 2);
    assert_eq!(report.downloaded, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.details.len(), 2);

    // Outcomes preserve search order even with a concurrent fetch stage
    assert_eq!(report.details[0].record_id.as_str(), "100");
    assert_eq!(report.details[1].record_id.as_str(), "200");

    assert!(dir.path().join("PMC100_2022_First_article.pdf").exists());
    assert!(dir.path().join("PMC200_2023_Second_article.pdf").exists());
}

/// Test a mixed run: one download, one not-open-access skip, one failure
#[tokio::test]
#[traced_test]
async fn test_mixed_outcomes_are_all_reported() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_esearch(&mock_server, 3, &["1", "2", "3"]).await;
    mount_esummary(
        &mock_server,
        serde_json::json!({
            "uids": ["1", "2", "3"],
            "1": {"title": "Open", "pubdate": "2021"},
            "2": {"title": "Closed", "pubdate": "2021"},
            "3": {"title": "Broken", "pubdate": "2021"},
        }),
    )
    .await;
    mount_oa_pdf(&mock_server, "1", &format!("{}/pdf/1.pdf", mock_server.uri())).await;
    mount_oa_not_open_access(&mock_server, "2").await;
    mount_oa_pdf(&mock_server, "3", &format!("{}/pdf/3.pdf", mock_server.uri())).await;

    Mock::given(method("GET"))
        .and(path("/pdf/1.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BODY))
        .mount(&mock_server)
        .await;
    // Record 3 serves an HTML error page instead of a PDF
    Mock::given(method("GET"))
        .and(path("/pdf/3.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
        .mount(&mock_server)
        .await;

    let crawler = create_mock_crawler(&mock_server, dir.path());
    let spec = QuerySpec::new("mixed").with_max_results(10);

    let report = crawler.crawl(&spec).await.expect("Crawl should succeed");

    assert_eq!(report.total_found, 3);
    assert_eq!(report.pmc_available, 2);
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped_not_open_access(), 1);

    // Every open-access record accounts for exactly one download or failure
    assert_eq!(report.downloaded + report.failed, report.pmc_available);

    assert_eq!(report.details[0].status, FetchStatus::Downloaded);
    assert_eq!(report.details[1].status, FetchStatus::SkippedNotOpenAccess);
    assert_eq!(report.details[2].status, FetchStatus::Failed);
    assert!(report.details[2].error.is_some());
}

/// Test that a search returning nothing finishes cleanly with an empty
/// report
#[tokio::test]
#[traced_test]
async fn test_empty_search_result() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_esearch(&mock_server, 0, &[]).await;

    let crawler = create_mock_crawler(&mock_server, dir.path());
    let spec = QuerySpec::new("zxqv nonsense").with_max_results(10);

    let report = crawler.crawl(&spec).await.expect("Crawl should succeed");

    assert_eq!(report.total_found, 0);
    assert!(report.details.is_empty());
    assert_eq!(report.downloaded, 0);

    // Only the single search request went out
    let received_requests = mock_server.received_requests().await.unwrap();
    assert_eq!(received_requests.len(), 1);
}

/// Test that an invalid spec fails before any network call and still
/// carries a report
#[tokio::test]
#[traced_test]
async fn test_invalid_spec_fails_with_partial_report() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let crawler = create_mock_crawler(&mock_server, dir.path());
    let spec = QuerySpec::new("query").with_max_results(0);

    let failure = crawler.crawl(&spec).await.unwrap_err();

    assert!(matches!(failure.error, CrawlerError::InvalidConfig(_)));
    assert!(failure.report.details.is_empty());

    let received_requests = mock_server.received_requests().await.unwrap();
    assert_eq!(received_requests.len(), 0);
}

/// Test that a non-recoverable search failure surfaces with the partial
/// report attached
#[tokio::test]
#[traced_test]
async fn test_search_failure_carries_partial_report() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path_regex(r"/esearch\.fcgi.*"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let crawler = create_mock_crawler(&mock_server, dir.path());
    let spec = QuerySpec::new("flaky").with_max_results(5);

    let failure = crawler.crawl(&spec).await.unwrap_err();

    assert!(matches!(failure.error, CrawlerError::ApiError { status: 500, .. }));
    assert_eq!(failure.report.query, "flaky");
    assert!(!failure.report.elapsed_time.is_empty());
}

/// Test that a pre-cancelled run stops after the search stage and still
/// produces a finalized report
#[tokio::test]
#[traced_test]
async fn test_cancellation_stops_before_fetching() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_esearch(&mock_server, 2, &["100", "200"]).await;

    let crawler = create_mock_crawler(&mock_server, dir.path());
    let spec = QuerySpec::new("cancelled").with_max_results(10);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = crawler
        .crawl_with_cancellation(&spec, cancel)
        .await
        .expect("Cancelled run still reports");

    assert_eq!(report.total_found, 2);
    assert!(report.details.is_empty(), "No unit of work may start after cancellation");
    assert!(!report.elapsed_time.is_empty());

    // Nothing was downloaded
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

/// Test that a re-run over an existing output directory is idempotent
#[tokio::test]
#[traced_test]
async fn test_rerun_skips_existing_files() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_esearch(&mock_server, 1, &["100"]).await;
    mount_esummary(
        &mock_server,
        serde_json::json!({
            "uids": ["100"],
            "100": {"title": "First article", "pubdate": "2022 May"},
        }),
    )
    .await;
    mount_oa_pdf(&mock_server, "100", &format!("{}/pdf/100.pdf", mock_server.uri())).await;
    Mock::given(method("GET"))
        .and(path("/pdf/100.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BODY))
        .mount(&mock_server)
        .await;

    let crawler = create_mock_crawler(&mock_server, dir.path());
    let spec = QuerySpec::new("idempotent").with_max_results(10);

    let first = crawler.crawl(&spec).await.expect("First run should succeed");
    assert_eq!(first.downloaded, 1);

    let before = mock_server.received_requests().await.unwrap().len();
    let second = crawler.crawl(&spec).await.expect("Second run should succeed");
    assert_eq!(second.downloaded, 1);

    // The second run re-searched and re-resolved but never re-downloaded
    let after = mock_server.received_requests().await.unwrap().len();
    let second_run_requests = after - before;
    assert_eq!(
        second_run_requests, 3,
        "Search, summary, and OA lookup only; no download request"
    );
}
