//! Pipeline tasks: scrape URLs → scrape details → clean data.
//!
//! Each `run_*` function is one CLI task. Every task records a row in the
//! `scrape_runs` table with its report serialized as JSON.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use listingscout_crawler::{DetailScraper, MenuScraper, ScrapeObserver, StopSignal};
use listingscout_shared::{AppConfig, ListingScoutError, OutputPaths, Result, ScrapeConfig};
use listingscout_storage::Storage;

use crate::cleaning::{CleanStats, DataCleaner};
use crate::urls::{load_urls, save_urls};

/// Everything a task needs: scraping settings, file locations, and the
/// shared stop signal.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub scrape: ScrapeConfig,
    pub paths: OutputPaths,
    pub stop: StopSignal,
}

impl PipelineContext {
    pub fn new(scrape: ScrapeConfig, paths: OutputPaths, stop: StopSignal) -> Self {
        Self {
            scrape,
            paths,
            stop,
        }
    }

    /// Build a context from the loaded configuration, optionally overriding
    /// the output directory.
    pub fn from_config(
        config: &AppConfig,
        data_dir: Option<&Path>,
        stop: StopSignal,
    ) -> Result<Self> {
        let scrape = ScrapeConfig::try_from(config)?;
        let paths = OutputPaths::resolve(&config.output, data_dir);
        Ok(Self::new(scrape, paths, stop))
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of `scrape-urls`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UrlsReport {
    pub urls_found: usize,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    /// The menu walk stopped early on repeated failures.
    pub aborted: bool,
    /// Whether the URL file was (re)written.
    pub saved: bool,
    pub duration_ms: u128,
}

/// Result of `scrape-details`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetailsReport {
    pub urls: usize,
    pub attempted: usize,
    pub scraped: usize,
    pub inserted: usize,
    pub new_versions: usize,
    pub skipped_no_id: usize,
    pub store_errors: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub duration_ms: u128,
}

/// Result of `clean-data`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    pub stats: CleanStats,
    pub rows_written: usize,
    /// `None` when there was nothing to write.
    pub output: Option<PathBuf>,
}

/// Result of `full-pipeline`. Later stages are `None` when a stop request
/// ended the pipeline before they ran.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FullPipelineReport {
    pub urls: UrlsReport,
    pub details: Option<DetailsReport>,
    pub clean: Option<CleanReport>,
    pub duration_ms: u128,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each menu page.
    fn menu_page(&self, page: u32, total_pages: u32, urls_found: usize);
    /// Called after each listing detail page.
    fn listing_scraped(&self, url: &str, current: usize, total: usize);
    /// Called when a task completes.
    fn done(&self, summary: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn menu_page(&self, _page: u32, _total_pages: u32, _urls_found: usize) {}
    fn listing_scraped(&self, _url: &str, _current: usize, _total: usize) {}
    fn done(&self, _summary: &str) {}
}

/// Adapts a `ProgressReporter` to the crawler's `ScrapeObserver` interface.
struct ProgressObserver<'a> {
    inner: &'a dyn ProgressReporter,
}

impl ScrapeObserver for ProgressObserver<'_> {
    fn menu_page(&self, page: u32, total_pages: u32, urls_found: usize) {
        self.inner.menu_page(page, total_pages, urls_found);
    }

    fn listing_done(&self, url: &str, current: usize, total: usize) {
        self.inner.listing_scraped(url, current, total);
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Walk the menu pages and save the listing URLs found.
#[instrument(skip_all, fields(total_pages = ctx.scrape.total_pages))]
pub async fn run_scrape_urls(
    ctx: &PipelineContext,
    progress: &dyn ProgressReporter,
) -> Result<UrlsReport> {
    let storage = open_storage(ctx).await?;
    let report = scrape_urls(ctx, &storage, progress).await?;
    progress.done(&format!("{} listing URLs found", report.urls_found));
    Ok(report)
}

/// Scrape every saved listing URL and store each listing.
#[instrument(skip_all, fields(urls_file = %ctx.paths.urls.display()))]
pub async fn run_scrape_details(
    ctx: &PipelineContext,
    progress: &dyn ProgressReporter,
) -> Result<DetailsReport> {
    let storage = open_storage(ctx).await?;
    let report = scrape_details(ctx, &storage, progress).await?;
    progress.done(&format!(
        "{} listings scraped, {} failed",
        report.scraped, report.failed
    ));
    Ok(report)
}

/// Clean the latest listings and write the CSV export.
#[instrument(skip_all, fields(output = %ctx.paths.cleaned.display()))]
pub async fn run_clean_data(
    ctx: &PipelineContext,
    progress: &dyn ProgressReporter,
) -> Result<CleanReport> {
    let storage = open_storage(ctx).await?;
    let report = clean_data(ctx, &storage, progress).await?;
    progress.done(&format!("{} cleaned rows written", report.rows_written));
    Ok(report)
}

/// Run all three tasks in order. A stop request skips the remaining stages.
#[instrument(skip_all, fields(data_dir = %ctx.paths.dir.display()))]
pub async fn run_full_pipeline(
    ctx: &PipelineContext,
    progress: &dyn ProgressReporter,
) -> Result<FullPipelineReport> {
    let start = Instant::now();
    let storage = open_storage(ctx).await?;
    let run_id = storage.insert_scrape_run("full_pipeline").await?;

    info!("starting full pipeline");
    let outcome = full_pipeline(ctx, &storage, progress, start).await;
    let report = close_run(&storage, &run_id, outcome).await?;

    info!(
        urls = report.urls.urls_found,
        scraped = report.details.as_ref().map_or(0, |d| d.scraped),
        cleaned = report.clean.as_ref().map_or(0, |c| c.rows_written),
        elapsed_ms = report.duration_ms,
        "full pipeline complete"
    );
    progress.done("full pipeline complete");
    Ok(report)
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

async fn full_pipeline(
    ctx: &PipelineContext,
    storage: &Storage,
    progress: &dyn ProgressReporter,
    start: Instant,
) -> Result<FullPipelineReport> {
    let mut report = FullPipelineReport {
        urls: scrape_urls(ctx, storage, progress).await?,
        ..FullPipelineReport::default()
    };

    if ctx.stop.is_stop_requested() {
        warn!("stop requested, skipping detail scrape and cleaning");
    } else {
        report.details = Some(scrape_details(ctx, storage, progress).await?);

        if ctx.stop.is_stop_requested() {
            warn!("stop requested, skipping cleaning");
        } else {
            report.clean = Some(clean_data(ctx, storage, progress).await?);
        }
    }

    report.duration_ms = start.elapsed().as_millis();
    Ok(report)
}

async fn scrape_urls(
    ctx: &PipelineContext,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<UrlsReport> {
    progress.phase("Collecting listing URLs");
    let run_id = storage.insert_scrape_run("scrape_urls").await?;

    let outcome = async {
        let scraper = MenuScraper::new(ctx.scrape.clone(), ctx.stop.clone())?;
        let result = scraper.scrape(&ProgressObserver { inner: progress }).await;

        let saved = save_urls(&ctx.paths.urls, &result.urls)?;
        Ok::<_, ListingScoutError>(UrlsReport {
            urls_found: result.urls.len(),
            pages_fetched: result.pages_fetched,
            pages_failed: result.pages_failed,
            aborted: result.aborted,
            saved,
            duration_ms: result.duration.as_millis(),
        })
    }
    .await;

    close_run(storage, &run_id, outcome).await
}

async fn scrape_details(
    ctx: &PipelineContext,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<DetailsReport> {
    progress.phase("Scraping listing details");
    let run_id = storage.insert_scrape_run("scrape_details").await?;

    let urls = match load_urls(&ctx.paths.urls) {
        Ok(urls) => urls,
        Err(e) => {
            error!(path = %ctx.paths.urls.display(), error = %e, "could not read listing URLs");
            Vec::new()
        }
    };

    let report = if urls.is_empty() {
        info!("no listing URLs to scrape");
        DetailsReport::default()
    } else {
        let scraper = DetailScraper::new(ctx.scrape.clone(), ctx.stop.clone());
        let result = scraper
            .scrape_all(&urls, storage, &ProgressObserver { inner: progress })
            .await;
        scraper.pool().close_all().await;

        for url in &result.failed {
            warn!(%url, "listing not scraped");
        }

        DetailsReport {
            urls: urls.len(),
            attempted: result.attempted,
            scraped: result.scraped,
            inserted: result.inserted,
            new_versions: result.new_versions,
            skipped_no_id: result.skipped_no_id,
            store_errors: result.store_errors,
            failed: result.failed.len(),
            cancelled: result.cancelled,
            duration_ms: result.duration.as_millis(),
        }
    };

    close_run(storage, &run_id, Ok(report)).await
}

async fn clean_data(
    ctx: &PipelineContext,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<CleanReport> {
    progress.phase("Cleaning listing data");
    let run_id = storage.insert_scrape_run("clean_data").await?;

    let outcome = async {
        let mut cleaner = DataCleaner::load(storage).await?;
        let stats = cleaner.clean();

        if stats.kept == 0 {
            warn!("no listings to clean, export not written");
            return Ok(CleanReport {
                stats,
                ..CleanReport::default()
            });
        }

        let rows_written = cleaner.save(&ctx.paths.cleaned)?;
        Ok::<_, ListingScoutError>(CleanReport {
            stats,
            rows_written,
            output: Some(ctx.paths.cleaned.clone()),
        })
    }
    .await;

    close_run(storage, &run_id, outcome).await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn open_storage(ctx: &PipelineContext) -> Result<Storage> {
    ctx.paths.ensure_dir()?;
    Storage::open(&ctx.paths.db).await
}

async fn finish_run<T: Serialize>(storage: &Storage, run_id: &str, report: &T) -> Result<()> {
    let stats = serde_json::to_string(report)
        .map_err(|e| ListingScoutError::parse(format!("failed to serialize run stats: {e}")))?;
    storage.finish_scrape_run(run_id, &stats).await
}

/// Finish a run row with the report, or with the error that ended the task.
async fn close_run<T: Serialize>(
    storage: &Storage,
    run_id: &str,
    outcome: Result<T>,
) -> Result<T> {
    match outcome {
        Ok(report) => {
            finish_run(storage, run_id, &report).await?;
            Ok(report)
        }
        Err(e) => {
            let stats = serde_json::json!({ "error": e.to_string() }).to_string();
            if let Err(store_err) = storage.finish_scrape_run(run_id, &stats).await {
                warn!(run_id, error = %store_err, "could not record failed run");
            }
            Err(e)
        }
    }
}

/// Short human-readable duration for task summaries.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else {
        format!("{}m {:02}s", duration.as_secs() / 60, duration.as_secs() % 60)
    }
}
