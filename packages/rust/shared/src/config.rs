//! Application configuration for listingscout.
//!
//! User config lives at `~/.listingscout/listingscout.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ListingScoutError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "listingscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".listingscout";

// ---------------------------------------------------------------------------
// Config structs (matching listingscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Target site.
    #[serde(default)]
    pub site: SiteConfig,

    /// Retry, timeout and concurrency settings.
    #[serde(default)]
    pub scrape: ScrapeSettings,

    /// Output file locations.
    #[serde(default)]
    pub output: OutputConfig,

    /// Log level used when `RUST_LOG` is not set.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[site]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Origin that relative listing links are resolved against.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Menu URL prefix; `page=<n>` is appended to it.
    #[serde(default = "default_start_url")]
    pub start_url: String,

    /// Number of menu pages to walk.
    #[serde(default = "default_total_pages")]
    pub total_pages: u32,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            start_url: default_start_url(),
            total_pages: default_total_pages(),
        }
    }
}

fn default_base_url() -> String {
    "https://onehousing.vn".into()
}
fn default_start_url() -> String {
    "https://onehousing.vn/nha-dat-ban?".into()
}
fn default_total_pages() -> u32 {
    506
}

/// `[scrape]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSettings {
    /// Attempts per menu page and per listing.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between failed attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Listings fetched concurrently.
    #[serde(default = "default_one")]
    pub workers: u32,

    /// Maximum number of live HTTP sessions.
    #[serde(default = "default_one")]
    pub session_pool_size: u32,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Consecutive HTTP errors (or empty pages) on one menu page before the
    /// menu walk ends. Detail scraping still runs on the URLs found.
    #[serde(default = "default_abort_after")]
    pub abort_after_consecutive_failures: u32,

    /// Extra user agents added to the built-in rotation.
    #[serde(default)]
    pub user_agents: Vec<String>,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            workers: default_one(),
            session_pool_size: default_one(),
            request_timeout_secs: default_request_timeout_secs(),
            abort_after_consecutive_failures: default_abort_after(),
            user_agents: Vec::new(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_one() -> u32 {
    1
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_abort_after() -> u32 {
    3
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory holding every output file.
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// JSON array of scraped listing URLs.
    #[serde(default = "default_urls_file")]
    pub urls_file: String,

    /// Listing history database.
    #[serde(default = "default_db_file")]
    pub db_file: String,

    /// Cleaned CSV export.
    #[serde(default = "default_cleaned_file")]
    pub cleaned_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            urls_file: default_urls_file(),
            db_file: default_db_file(),
            cleaned_file: default_cleaned_file(),
        }
    }
}

fn default_output_dir() -> String {
    "data".into()
}
fn default_urls_file() -> String {
    "listing_urls.json".into()
}
fn default_db_file() -> String {
    "listings.db".into()
}
fn default_cleaned_file() -> String {
    "listing_details_cleaned.csv".into()
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

// ---------------------------------------------------------------------------
// Scrape config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime scrape configuration consumed by the crawler.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Origin for resolving relative listing links.
    pub base_url: Url,
    /// Menu URL prefix (`page=<n>` is appended verbatim).
    pub start_url: String,
    /// Number of menu pages to walk.
    pub total_pages: u32,
    /// Attempts per page or listing (at least 1).
    pub max_retries: u32,
    /// Pause between failed attempts.
    pub retry_delay: Duration,
    /// Listings fetched concurrently (at least 1).
    pub workers: usize,
    /// Maximum number of live HTTP sessions (at least 1).
    pub session_pool_size: usize,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Consecutive failures on a menu page that end the menu walk.
    pub abort_after_consecutive_failures: u32,
    /// Extra user agents.
    pub user_agents: Vec<String>,
}

impl ScrapeConfig {
    /// URL of menu page `page` (1-based).
    pub fn menu_page_url(&self, page: u32) -> String {
        format!("{}page={page}", self.start_url)
    }
}

impl TryFrom<&AppConfig> for ScrapeConfig {
    type Error = ListingScoutError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let base_url = Url::parse(&config.site.base_url).map_err(|e| {
            ListingScoutError::config(format!(
                "invalid site.base_url '{}': {e}",
                config.site.base_url
            ))
        })?;
        if config.site.start_url.is_empty() {
            return Err(ListingScoutError::config("site.start_url must not be empty"));
        }

        let scrape = &config.scrape;
        Ok(Self {
            base_url,
            start_url: config.site.start_url.clone(),
            total_pages: config.site.total_pages,
            max_retries: scrape.max_retries.max(1),
            retry_delay: Duration::from_millis(scrape.retry_delay_ms),
            workers: scrape.workers.max(1) as usize,
            session_pool_size: scrape.session_pool_size.max(1) as usize,
            request_timeout: Duration::from_secs(scrape.request_timeout_secs.max(1)),
            abort_after_consecutive_failures: scrape.abort_after_consecutive_failures.max(1),
            user_agents: scrape.user_agents.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Output paths
// ---------------------------------------------------------------------------

/// Resolved locations of every file the pipeline reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub dir: PathBuf,
    pub urls: PathBuf,
    pub db: PathBuf,
    pub cleaned: PathBuf,
}

impl OutputPaths {
    /// Resolve paths from the `[output]` section, optionally overriding the directory.
    pub fn resolve(output: &OutputConfig, dir_override: Option<&Path>) -> Self {
        let dir = dir_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&output.dir));
        Self {
            urls: dir.join(&output.urls_file),
            db: dir.join(&output.db_file),
            cleaned: dir.join(&output.cleaned_file),
            dir,
        }
    }

    /// Create the output directory if it does not exist.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| ListingScoutError::io(&self.dir, e))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.listingscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ListingScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.listingscout/listingscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ListingScoutError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ListingScoutError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    init_config_at(&config_file_path()?)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ListingScoutError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ListingScoutError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ListingScoutError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}
