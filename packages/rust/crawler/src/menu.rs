//! Menu page walker: collects listing URLs from the paginated index.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::{debug, error, info, instrument, warn};

use listingscout_shared::{ListingScoutError, Result, ScrapeConfig};

use crate::ScrapeObserver;
use crate::extract::extract_listing_urls;
use crate::session::{StopSignal, fetch};
use crate::user_agent::UserAgentPool;

/// Summary of a menu walk.
#[derive(Debug, Clone, Default)]
pub struct MenuScrapeResult {
    /// Unique listing URLs in discovery order.
    pub urls: Vec<String>,
    /// Menu pages that yielded a usable response.
    pub pages_fetched: u32,
    /// Menu pages given up on after exhausting retries.
    pub pages_failed: u32,
    /// The walk ended early because a page kept failing the same way.
    pub aborted: bool,
    pub duration: Duration,
}

/// Walks menu pages `1..=total_pages` and gathers listing URLs.
pub struct MenuScraper {
    config: ScrapeConfig,
    client: Client,
    user_agents: UserAgentPool,
    stop: StopSignal,
}

/// How retrying a single menu page ended.
enum PageOutcome {
    Links(Vec<String>),
    /// The failure threshold was reached; the whole walk must stop.
    Abort,
    /// Retries ran out.
    GaveUp,
    Stopped,
}

/// Why a single attempt on a menu page failed.
enum AttemptFailure {
    Http(reqwest::StatusCode),
    Empty,
    Transport(ListingScoutError),
}

impl MenuScraper {
    pub fn new(config: ScrapeConfig, stop: StopSignal) -> Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                ListingScoutError::Network(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            user_agents: UserAgentPool::new(&config.user_agents),
            config,
            client,
            stop,
        })
    }

    /// Walk every menu page. Pages that keep failing are skipped; a page that
    /// returns HTTP errors (or empty bodies) `abort_after_consecutive_failures`
    /// times in a row ends the walk. URLs found so far are always kept.
    ///
    /// Ending the walk this way does not raise the shared [`StopSignal`], so
    /// later pipeline stages still run.
    #[instrument(skip_all, fields(total_pages = self.config.total_pages))]
    pub async fn scrape(&self, observer: &dyn ScrapeObserver) -> MenuScrapeResult {
        let start = Instant::now();
        let mut seen = HashSet::new();
        let mut result = MenuScrapeResult::default();

        for page in 1..=self.config.total_pages {
            if self.stop.is_stop_requested() {
                info!(page, "stop requested, ending menu walk");
                break;
            }

            match self.scrape_page(page).await {
                PageOutcome::Links(links) => {
                    debug!(page, links = links.len(), "extracted links");
                    result.pages_fetched += 1;
                    for link in links {
                        if seen.insert(link.clone()) {
                            result.urls.push(link);
                        }
                    }
                }
                PageOutcome::Abort => result.aborted = true,
                PageOutcome::Stopped => {}
                PageOutcome::GaveUp => {
                    error!(
                        page,
                        retries = self.config.max_retries,
                        "failed to fetch menu page after all retries"
                    );
                    result.pages_failed += 1;
                }
            }

            observer.menu_page(page, self.config.total_pages, result.urls.len());

            if result.aborted || self.stop.is_stop_requested() {
                break;
            }
        }

        result.duration = start.elapsed();
        info!(
            urls = result.urls.len(),
            pages_fetched = result.pages_fetched,
            pages_failed = result.pages_failed,
            aborted = result.aborted,
            duration_ms = result.duration.as_millis(),
            "menu walk completed"
        );
        result
    }

    /// Fetch one page with retries.
    async fn scrape_page(&self, page: u32) -> PageOutcome {
        let url = self.config.menu_page_url(page);
        let threshold = self.config.abort_after_consecutive_failures;
        let mut http_errors = 0u32;
        let mut empty_pages = 0u32;

        for attempt in 1..=self.config.max_retries {
            if self.stop.is_stop_requested() {
                return PageOutcome::Stopped;
            }

            let failure = match self.attempt(&url).await {
                Ok(links) => return PageOutcome::Links(links),
                Err(failure) => failure,
            };

            match failure {
                AttemptFailure::Http(status) => {
                    http_errors += 1;
                    if http_errors >= threshold {
                        error!(%url, http_errors, "repeated HTTP errors, stopping menu walk");
                        return PageOutcome::Abort;
                    }
                    warn!(%url, attempt, max = self.config.max_retries, %status, "menu page retry");
                }
                AttemptFailure::Empty => {
                    empty_pages += 1;
                    if empty_pages >= threshold {
                        error!(%url, empty_pages, "repeated empty pages, stopping menu walk");
                        return PageOutcome::Abort;
                    }
                    warn!(%url, attempt, max = self.config.max_retries, "empty menu page, retrying");
                }
                AttemptFailure::Transport(e) => {
                    warn!(%url, attempt, max = self.config.max_retries, error = %e, "menu page retry");
                }
            }

            if attempt < self.config.max_retries {
                self.stop.sleep(self.config.retry_delay).await;
            }
        }

        if self.stop.is_stop_requested() {
            PageOutcome::Stopped
        } else {
            PageOutcome::GaveUp
        }
    }

    async fn attempt(&self, url: &str) -> std::result::Result<Vec<String>, AttemptFailure> {
        let response = fetch(&self.client, url, Some(self.user_agents.pick()))
            .await
            .map_err(AttemptFailure::Transport)?;

        if response.is_http_error() {
            return Err(AttemptFailure::Http(response.status));
        }
        if response.is_empty() {
            return Err(AttemptFailure::Empty);
        }

        Ok(extract_listing_urls(&response.body, &self.config.base_url))
    }
}
