//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use listingscout_core::pipeline::{
    CleanReport, DetailsReport, PipelineContext, ProgressReporter, UrlsReport, format_duration,
};
use listingscout_crawler::StopSignal;
use listingscout_shared::{
    AppConfig, OutputPaths, init_config, init_config_at, load_config, load_config_from,
};
use listingscout_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// listingscout: scrape real-estate listings into a versioned database.
#[derive(Parser)]
#[command(
    name = "listingscout",
    version,
    about = "Scrape real-estate listings, keep every version, and export a cleaned table.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.listingscout/listingscout.toml).
    #[arg(long, env = "LISTINGSCOUT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output directory for URLs, database, and export (overrides `output.dir`).
    #[arg(long, env = "LISTINGSCOUT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Walk the menu pages and save every listing URL found.
    #[command(alias = "scrape_urls")]
    ScrapeUrls,

    /// Scrape every saved listing URL into the database.
    #[command(alias = "scrape_details")]
    ScrapeDetails,

    /// Export the latest version of each listing as a cleaned CSV.
    #[command(alias = "clean_data")]
    CleanData,

    /// Run scrape-urls, scrape-details, and clean-data in order.
    #[command(alias = "full_pipeline")]
    FullPipeline,

    /// Merge listings from another database into the master database.
    #[command(alias = "merge_db")]
    MergeDb {
        /// Database to merge from.
        downloaded: PathBuf,

        /// Master database (defaults to the configured database).
        #[arg(long)]
        master: Option<PathBuf>,
    },

    /// Show recent pipeline runs.
    Runs {
        /// Number of runs to show.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Config and tracing setup
// ---------------------------------------------------------------------------

/// Load the config file named by `--config`, or the default one.
///
/// `config init` skips loading, since its target may not exist yet.
pub(crate) fn load_app_config(cli: &Cli) -> Result<AppConfig> {
    if matches!(
        cli.command,
        Command::Config {
            action: ConfigAction::Init
        }
    ) {
        return Ok(AppConfig::default());
    }

    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Initialize tracing based on CLI flags and the configured level.
pub(crate) fn init_tracing(cli: &Cli, configured_level: &str) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => configured_level,
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("listingscout={level}")));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let data_dir = cli.data_dir.as_deref();

    match cli.command {
        Command::ScrapeUrls => {
            let ctx = pipeline_context(&config, data_dir)?;
            let report = listingscout_core::run_scrape_urls(&ctx, &CliProgress::new()).await?;
            print_urls_report(&report, &ctx);
        }
        Command::ScrapeDetails => {
            let ctx = pipeline_context(&config, data_dir)?;
            let report =
                listingscout_core::run_scrape_details(&ctx, &CliProgress::new()).await?;
            print_details_report(&report);
        }
        Command::CleanData => {
            let ctx = pipeline_context(&config, data_dir)?;
            let report = listingscout_core::run_clean_data(&ctx, &CliProgress::new()).await?;
            print_clean_report(&report);
        }
        Command::FullPipeline => {
            let ctx = pipeline_context(&config, data_dir)?;
            let report = listingscout_core::run_full_pipeline(&ctx, &CliProgress::new()).await?;

            print_urls_report(&report.urls, &ctx);
            match &report.details {
                Some(details) => print_details_report(details),
                None => println!("  Details: skipped (stopped)"),
            }
            match &report.clean {
                Some(clean) => print_clean_report(clean),
                None => println!("  Cleaning: skipped (stopped)"),
            }
            println!(
                "  Total time: {}",
                format_duration(Duration::from_millis(report.duration_ms as u64))
            );
            println!();
        }
        Command::MergeDb { downloaded, master } => {
            let master = master
                .unwrap_or_else(|| OutputPaths::resolve(&config.output, data_dir).db);
            cmd_merge_db(&downloaded, &master).await?;
        }
        Command::Runs { limit } => {
            let paths = OutputPaths::resolve(&config.output, data_dir);
            cmd_runs(&paths, limit).await?;
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(cli.config.as_deref())?,
            ConfigAction::Show => cmd_config_show(&config, data_dir)?,
        },
    }

    Ok(())
}

/// Build the pipeline context and route Ctrl-C to its stop signal.
fn pipeline_context(config: &AppConfig, data_dir: Option<&Path>) -> Result<PipelineContext> {
    let stop = StopSignal::new();
    let ctx = PipelineContext::from_config(config, data_dir, stop.clone())?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work");
            stop.request_stop();
        }
    });

    info!(data_dir = %ctx.paths.dir.display(), "pipeline context ready");
    Ok(ctx)
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

fn print_urls_report(report: &UrlsReport, ctx: &PipelineContext) {
    println!();
    println!("  Listing URLs");
    println!("  Found:   {}", report.urls_found);
    println!(
        "  Pages:   {} fetched, {} failed",
        report.pages_fetched, report.pages_failed
    );
    if report.aborted {
        println!("  Menu walk ended early after repeated failures");
    }
    if report.saved {
        println!("  Saved:   {}", ctx.paths.urls.display());
    }
    println!(
        "  Time:    {}",
        format_duration(Duration::from_millis(report.duration_ms as u64))
    );
    println!();
}

fn print_details_report(report: &DetailsReport) {
    println!("  Listing details");
    println!("  Scraped:      {}/{}", report.scraped, report.urls);
    println!("  New:          {}", report.inserted);
    println!("  New versions: {}", report.new_versions);
    println!("  No id:        {}", report.skipped_no_id);
    println!("  Failed:       {}", report.failed);
    if report.store_errors > 0 {
        println!("  Store errors: {}", report.store_errors);
    }
    if report.cancelled {
        println!("  Stopped early on request");
    }
    println!(
        "  Time:         {}",
        format_duration(Duration::from_millis(report.duration_ms as u64))
    );
    println!();
}

fn print_clean_report(report: &CleanReport) {
    println!("  Cleaned data");
    println!("  Listings: {}", report.stats.loaded);
    println!("  Rows:     {}", report.rows_written);
    println!("  Dropped:  {} without property id", report.stats.dropped_no_id);
    match &report.output {
        Some(path) => println!("  Output:   {}", path.display()),
        None => println!("  Output:   nothing to write"),
    }
    println!();
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_merge_db(downloaded: &Path, master: &Path) -> Result<()> {
    if !downloaded.exists() {
        return Err(eyre!(
            "database to merge not found at '{}'",
            downloaded.display()
        ));
    }

    info!(downloaded = %downloaded.display(), master = %master.display(), "merging databases");
    let added = listingscout_core::merge_databases(downloaded, master).await?;

    println!();
    println!("  Databases merged");
    println!("  Added:  {added} rows");
    println!("  Master: {}", master.display());
    println!();
    Ok(())
}

async fn cmd_runs(paths: &OutputPaths, limit: u32) -> Result<()> {
    if !paths.db.exists() {
        println!("No database at {}", paths.db.display());
        return Ok(());
    }

    let storage = Storage::open_readonly(&paths.db).await?;
    let runs = storage.recent_scrape_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    for run in runs {
        println!(
            "{}  {:<15} {}",
            run.started_at,
            run.task,
            run.stats_json.as_deref().unwrap_or("(unfinished)")
        );
    }
    Ok(())
}

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => init_config_at(path)?,
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig, data_dir: Option<&Path>) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");

    let paths = OutputPaths::resolve(&config.output, data_dir);
    println!("# resolved paths");
    println!("# urls:    {}", paths.urls.display());
    println!("# db:      {}", paths.db.display());
    println!("# cleaned: {}", paths.cleaned.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn menu_page(&self, page: u32, total_pages: u32, urls_found: usize) {
        self.spinner.set_message(format!(
            "Menu page [{page}/{total_pages}] {urls_found} URLs"
        ));
    }

    fn listing_scraped(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Listing [{current}/{total}] {url}"));
    }

    fn done(&self, _summary: &str) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn snake_case_task_names_are_accepted() {
        let cli = Cli::try_parse_from(["listingscout", "full_pipeline"]).unwrap();
        assert!(matches!(cli.command, Command::FullPipeline));

        let cli = Cli::try_parse_from(["listingscout", "scrape_details"]).unwrap();
        assert!(matches!(cli.command, Command::ScrapeDetails));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "listingscout",
            "clean-data",
            "--data-dir",
            "/app/data",
            "-vv",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::CleanData));
        assert_eq!(cli.data_dir, Some(PathBuf::from("/app/data")));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Json));
    }

    #[test]
    fn merge_db_master_is_optional() {
        let cli = Cli::try_parse_from(["listingscout", "merge-db", "other.db"]).unwrap();
        match cli.command {
            Command::MergeDb { downloaded, master } => {
                assert_eq!(downloaded, PathBuf::from("other.db"));
                assert!(master.is_none());
            }
            _ => panic!("expected merge-db"),
        }
    }
}
