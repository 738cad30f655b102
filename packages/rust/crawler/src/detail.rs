//! Listing detail scraper: fetch, extract, and store each listing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use listingscout_shared::{Listing, ListingScoutError, Result, ScrapeConfig};
use listingscout_storage::{SaveOutcome, Storage};

use crate::ScrapeObserver;
use crate::extract::extract_listing;
use crate::session::{SessionPool, StopSignal};
use crate::user_agent::UserAgentPool;

/// Summary of a detail scraping pass.
#[derive(Debug, Clone, Default)]
pub struct DetailScrapeResult {
    /// URLs handed to a worker.
    pub attempted: usize,
    /// Listings extracted successfully.
    pub scraped: usize,
    /// Stored as the first version of a property.
    pub inserted: usize,
    /// Stored as a newer version of a known property.
    pub new_versions: usize,
    /// Extracted but not stored for lack of a property id.
    pub skipped_no_id: usize,
    /// Extracted but the database write failed.
    pub store_errors: usize,
    /// URLs that failed every attempt.
    pub failed: Vec<String>,
    /// The pass ended early because a stop was requested.
    pub cancelled: bool,
    pub duration: Duration,
}

/// Scrapes listing detail pages through a bounded [`SessionPool`].
pub struct DetailScraper {
    config: ScrapeConfig,
    pool: Arc<SessionPool>,
    stop: StopSignal,
}

impl DetailScraper {
    pub fn new(config: ScrapeConfig, stop: StopSignal) -> Self {
        let pool = SessionPool::new(
            config.session_pool_size,
            UserAgentPool::new(&config.user_agents),
            config.request_timeout,
            stop.clone(),
        );

        Self {
            config,
            pool: Arc::new(pool),
            stop,
        }
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Scrape one listing with retries. `Ok(None)` when every attempt failed.
    pub async fn scrape_listing(&self, url: &str) -> Result<Option<Listing>> {
        scrape_with_retries(
            &self.pool,
            &self.stop,
            url,
            self.config.max_retries,
            self.config.retry_delay,
        )
        .await
    }

    /// Scrape every URL, storing each listing as soon as it is extracted.
    ///
    /// Up to `workers` listings are fetched at once. A stop request ends the
    /// pass after the in-flight batch; stored listings are kept.
    #[instrument(skip_all, fields(urls = urls.len(), workers = self.config.workers))]
    pub async fn scrape_all(
        &self,
        urls: &[String],
        storage: &Storage,
        observer: &dyn ScrapeObserver,
    ) -> DetailScrapeResult {
        let start = Instant::now();
        let total = urls.len();
        let mut result = DetailScrapeResult::default();
        let mut done = 0usize;

        info!(total, "starting detail scrape");

        for batch in urls.chunks(self.config.workers) {
            if self.stop.is_stop_requested() {
                info!(remaining = total - done, "stop requested, ending detail scrape");
                result.cancelled = true;
                break;
            }

            let handles: Vec<_> = batch
                .iter()
                .map(|url| {
                    let pool = self.pool.clone();
                    let stop = self.stop.clone();
                    let url = url.clone();
                    let max_retries = self.config.max_retries;
                    let delay = self.config.retry_delay;
                    tokio::spawn(async move {
                        scrape_with_retries(&pool, &stop, &url, max_retries, delay).await
                    })
                })
                .collect();

            for (url, handle) in batch.iter().zip(handles) {
                done += 1;
                result.attempted += 1;

                match handle.await {
                    Ok(Ok(Some(listing))) => {
                        result.scraped += 1;
                        match storage.save_listing(&listing).await {
                            Ok(SaveOutcome::Inserted) => result.inserted += 1,
                            Ok(SaveOutcome::NewVersion) => result.new_versions += 1,
                            Ok(SaveOutcome::Skipped) => result.skipped_no_id += 1,
                            Err(e) => {
                                error!(%url, error = %e, "failed to store listing");
                                result.store_errors += 1;
                            }
                        }
                    }
                    Ok(Ok(None)) => result.failed.push(url.clone()),
                    Ok(Err(e)) if e.is_cancelled() => {
                        debug!(%url, "listing abandoned on shutdown");
                        result.cancelled = true;
                    }
                    Ok(Err(e)) => {
                        error!(%url, error = %e, "listing scrape failed");
                        result.failed.push(url.clone());
                    }
                    Err(e) => {
                        error!(%url, error = %e, "listing task panicked");
                        result.failed.push(url.clone());
                    }
                }

                observer.listing_done(url, done, total);
            }
        }

        result.duration = start.elapsed();
        info!(
            scraped = result.scraped,
            inserted = result.inserted,
            new_versions = result.new_versions,
            skipped_no_id = result.skipped_no_id,
            failed = result.failed.len(),
            cancelled = result.cancelled,
            duration_ms = result.duration.as_millis(),
            "detail scrape completed"
        );
        result
    }

    /// Stop all scraping and drop every session.
    pub async fn shutdown(&self) {
        info!("shutting down detail scraper");
        self.stop.request_stop();
        self.pool.close_all().await;
    }
}

/// Up to `max_retries` attempts; `Err(Cancelled)` as soon as a stop is seen.
async fn scrape_with_retries(
    pool: &SessionPool,
    stop: &StopSignal,
    url: &str,
    max_retries: u32,
    retry_delay: Duration,
) -> Result<Option<Listing>> {
    for attempt in 1..=max_retries {
        stop.check(url)?;

        match fetch_listing(pool, url).await {
            Ok(listing) => {
                debug!(%url, attempt, "extracted listing details");
                return Ok(Some(listing));
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(%url, attempt, max = max_retries, error = %e, "listing attempt failed");
            }
        }

        if attempt < max_retries {
            stop.sleep(retry_delay).await;
        }
    }

    stop.check(url)?;
    error!(%url, attempts = max_retries, "all attempts failed");
    Ok(None)
}

/// One attempt: check out a session, fetch, extract.
async fn fetch_listing(pool: &SessionPool, url: &str) -> Result<Listing> {
    let lease = pool.acquire().await?;

    let response = match lease.get(url).await {
        Ok(response) => {
            pool.release(lease).await;
            response
        }
        Err(e) => {
            pool.discard(lease);
            return Err(e);
        }
    };

    if response.is_http_error() {
        return Err(ListingScoutError::Network(format!(
            "{url}: HTTP {}",
            response.status
        )));
    }
    if response.is_empty() {
        return Err(ListingScoutError::Network(format!("{url}: empty body")));
    }

    Ok(extract_listing(&response.body, url))
}
