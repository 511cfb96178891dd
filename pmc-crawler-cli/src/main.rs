use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::Date;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pmc_crawler::{CrawlerConfig, PmcCrawler, QuerySpec, RunReport, SearchDb, SortOrder};

const DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!("[year]/[month]/[day]");

#[derive(Parser)]
#[command(
    name = "pmc-crawler",
    about = "Search PubMed/PMC and download open-access full-text PDFs",
    long_about = "Searches NCBI's indexes by keyword and date range, resolves which \
                  results are in the PMC Open Access subset, and downloads their PDFs."
)]
struct Cli {
    /// Search query
    #[arg(short, long)]
    query: String,

    /// Maximum number of results to process
    #[arg(short, long, default_value_t = 100)]
    max_results: usize,

    /// Output directory for downloaded PDFs and the run log
    #[arg(short, long, default_value = "downloads")]
    output: PathBuf,

    /// API key for NCBI E-utilities (raises the rate limit)
    #[arg(short = 'k', long, env = "NCBI_API_KEY")]
    api_key: Option<String>,

    /// Email for NCBI requests (recommended)
    #[arg(long, env = "NCBI_EMAIL")]
    email: Option<String>,

    /// Start of the publication-date range (YYYY/MM/DD)
    #[arg(long)]
    start_date: Option<String>,

    /// End of the publication-date range (YYYY/MM/DD)
    #[arg(long)]
    end_date: Option<String>,

    /// Which index to search
    #[arg(long, value_enum, default_value_t = Source::Pmc)]
    source: Source,

    /// Sort order for results
    #[arg(long, value_enum, default_value_t = Sort::Relevance)]
    sort: Sort,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    /// PMC full-text index (open-access records)
    Pmc,
    /// PubMed primary index
    Pubmed,
}

#[derive(Clone, Copy, ValueEnum)]
enum Sort {
    Relevance,
    #[value(name = "date")]
    Date,
}

fn parse_date(value: &str, flag: &str) -> Result<Date> {
    Date::parse(value, DATE_FORMAT)
        .with_context(|| format!("{flag} must be a YYYY/MM/DD date, got '{value}'"))
}

fn build_spec(cli: &Cli) -> Result<QuerySpec> {
    let mut spec = QuerySpec::new(&cli.query)
        .with_max_results(cli.max_results)
        .with_db(match cli.source {
            Source::Pmc => SearchDb::Pmc,
            Source::Pubmed => SearchDb::Pubmed,
        })
        .with_sort(match cli.sort {
            Sort::Relevance => SortOrder::Relevance,
            Sort::Date => SortOrder::PublicationDate,
        });

    match (&cli.start_date, &cli.end_date) {
        (Some(start), Some(end)) => {
            let start = parse_date(start, "--start-date")?;
            let end = parse_date(end, "--end-date")?;
            spec = spec.with_date_range(start, end);
        }
        (None, None) => {}
        _ => bail!("--start-date and --end-date must be supplied together"),
    }

    Ok(spec)
}

fn print_summary(report: &RunReport, output: &PathBuf) {
    println!("============================================================");
    println!("  Crawl complete");
    println!("============================================================");
    println!("  Query:        {}", report.query);
    println!("  Total found:  {}", report.total_found);
    println!("  Open access:  {}", report.pmc_available);
    println!("  Downloaded:   {}", report.downloaded);
    println!("  Failed:       {}", report.failed);
    println!("  Time:         {}", report.elapsed_time);
    println!("  Output:       {}", output.display());
    println!("============================================================");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let spec = build_spec(&cli)?;

    tokio::fs::create_dir_all(&cli.output)
        .await
        .with_context(|| format!("failed to create output directory {}", cli.output.display()))?;

    let mut config = CrawlerConfig::new().with_tool("pmc-crawler");
    if let Some(api_key) = &cli.api_key {
        config = config.with_api_key(api_key);
    }
    if let Some(email) = &cli.email {
        config = config.with_email(email);
    }

    let crawler = PmcCrawler::with_config(config, &cli.output)?;

    // Ctrl-C stops the run between units of work, never mid-download
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work and reporting");
            signal_cancel.cancel();
        }
    });

    let report = match crawler.crawl_with_cancellation(&spec, cancel).await {
        Ok(report) => report,
        Err(failure) => {
            // Persist whatever progress was salvaged before surfacing
            write_log(&cli.output, &failure.report).await?;
            print_summary(&failure.report, &cli.output);
            return Err(failure.into());
        }
    };

    write_log(&cli.output, &report).await?;
    print_summary(&report, &cli.output);

    Ok(())
}

async fn write_log(output: &PathBuf, report: &RunReport) -> Result<()> {
    let log_path = output.join("crawl_log.json");
    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(&log_path, json)
        .await
        .with_context(|| format!("failed to write {}", log_path.display()))?;
    info!(path = %log_path.display(), "Run log written");
    Ok(())
}
