//! HTTP scraping of listing menu pages and listing detail pages.
//!
//! This crate provides:
//! - [`extract`]: pure HTML extraction of listing URLs and listing fields
//! - [`MenuScraper`]: walks the paginated menu and collects listing URLs
//! - [`DetailScraper`]: fetches each listing through a [`SessionPool`] and stores it
//! - [`StopSignal`]: cooperative shutdown shared by all of the above

pub mod detail;
pub mod extract;
pub mod menu;
pub mod session;
pub mod user_agent;

pub use detail::{DetailScrapeResult, DetailScraper};
pub use extract::{extract_listing, extract_listing_urls};
pub use menu::{MenuScrapeResult, MenuScraper};
pub use session::{PageResponse, Session, SessionLease, SessionPool, StopSignal};
pub use user_agent::UserAgentPool;

/// Progress hooks called while scraping.
pub trait ScrapeObserver: Send + Sync {
    /// A menu page has been handled (successfully or not).
    fn menu_page(&self, page: u32, total_pages: u32, urls_found: usize);
    /// A listing URL has been handled (successfully or not).
    fn listing_done(&self, url: &str, current: usize, total: usize);
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl ScrapeObserver for NoopObserver {
    fn menu_page(&self, _page: u32, _total_pages: u32, _urls_found: usize) {}
    fn listing_done(&self, _url: &str, _current: usize, _total: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use listingscout_shared::{AppConfig, ScrapeConfig};
    use listingscout_storage::Storage;
    use url::Url;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer, total_pages: u32) -> ScrapeConfig {
        let mut app = AppConfig::default();
        app.site.base_url = server.uri();
        app.site.start_url = format!("{}/nha-dat-ban?", server.uri());
        app.site.total_pages = total_pages;
        app.scrape.retry_delay_ms = 0;
        app.scrape.request_timeout_secs = 5;
        ScrapeConfig::try_from(&app).expect("valid test config")
    }

    fn menu_html(hrefs: &[&str]) -> String {
        let cards: String = hrefs
            .iter()
            .map(|h| format!(r#"<a data-role="property-card" href="{h}">card</a>"#))
            .collect();
        format!("<html><body>{cards}</body></html>")
    }

    fn detail_html(id: &str, price: &str) -> String {
        format!(
            r#"<html><body>
            <h1 id="detail_title">Nhà {id}</h1>
            <div id="container-property"><div></div><div></div><div></div><div></div>
              <div><div class="flex cursor-pointer"><p>{id}</p></div></div></div>
            <span id="total-price">{price}</span>
            </body></html>"#
        )
    }

    async fn temp_storage() -> Storage {
        let path = std::env::temp_dir().join(format!("ls_crawl_{}.db", Uuid::now_v7()));
        Storage::open(&path).await.expect("open storage")
    }

    #[derive(Default)]
    struct CountingObserver {
        pages: AtomicUsize,
        listings: AtomicUsize,
    }

    impl ScrapeObserver for CountingObserver {
        fn menu_page(&self, _page: u32, _total: u32, _found: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }
        fn listing_done(&self, _url: &str, _current: usize, _total: usize) {
            self.listings.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn menu_walk_collects_unique_urls() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/nha-dat-ban"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(menu_html(&["/p/a", "/p/b"])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/nha-dat-ban"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(menu_html(&["/p/b", "/p/c"])),
            )
            .mount(&server)
            .await;

        let observer = CountingObserver::default();
        let scraper = MenuScraper::new(test_config(&server, 2), StopSignal::new()).unwrap();
        let result = scraper.scrape(&observer).await;

        let base = Url::parse(&server.uri()).unwrap();
        let expected: Vec<String> = ["/p/a", "/p/b", "/p/c"]
            .iter()
            .map(|p| base.join(p).unwrap().to_string())
            .collect();
        assert_eq!(result.urls, expected);
        assert_eq!(result.pages_fetched, 2);
        assert!(!result.aborted);
        assert_eq!(observer.pages.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_http_errors_abort_the_walk() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(menu_html(&["/p/a"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(menu_html(&["/p/z"])))
            .expect(0)
            .mount(&server)
            .await;

        let stop = StopSignal::new();
        let scraper = MenuScraper::new(test_config(&server, 3), stop.clone()).unwrap();
        let result = scraper.scrape(&NoopObserver).await;

        assert!(result.aborted);
        assert!(!stop.is_stop_requested());
        assert_eq!(result.urls.len(), 1);
    }

    #[tokio::test]
    async fn empty_pages_abort_the_walk() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("   "))
            .mount(&server)
            .await;

        let scraper = MenuScraper::new(test_config(&server, 4), StopSignal::new()).unwrap();
        let result = scraper.scrape(&NoopObserver).await;

        assert!(result.aborted);
        assert_eq!(result.pages_fetched, 0);
        assert!(result.urls.is_empty());
    }

    #[tokio::test]
    async fn menu_walk_honours_stop_before_start() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(menu_html(&["/p/a"])))
            .expect(0)
            .mount(&server)
            .await;

        let stop = StopSignal::new();
        stop.request_stop();
        let scraper = MenuScraper::new(test_config(&server, 3), stop).unwrap();
        let result = scraper.scrape(&NoopObserver).await;
        assert!(result.urls.is_empty());
        assert!(!result.aborted);
    }

    #[tokio::test]
    async fn details_are_scraped_and_versioned() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/p/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_html("OH-1", "5 tỷ")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/1-repost"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(detail_html("OH-1", "4,9 tỷ")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/no-id"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><body><p>x</p></body></html>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/gone"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let mut config = test_config(&server, 1);
        config.workers = 2;
        config.session_pool_size = 2;

        let urls: Vec<String> = ["/p/1", "/p/no-id", "/p/gone", "/p/1-repost"]
            .iter()
            .map(|p| format!("{}{p}", server.uri()))
            .collect();

        let storage = temp_storage().await;
        let observer = CountingObserver::default();
        let scraper = DetailScraper::new(config, StopSignal::new());
        let result = scraper.scrape_all(&urls, &storage, &observer).await;

        assert_eq!(result.attempted, 4);
        assert_eq!(result.scraped, 3);
        assert_eq!(result.inserted, 1);
        assert_eq!(result.new_versions, 1);
        assert_eq!(result.skipped_no_id, 1);
        assert_eq!(result.failed, vec![format!("{}/p/gone", server.uri())]);
        assert!(!result.cancelled);
        assert_eq!(observer.listings.load(Ordering::SeqCst), 4);

        let history = storage.listing_history("OH-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.has_updated));
    }

    #[tokio::test]
    async fn detail_scrape_stops_when_requested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_html("OH-9", "1 tỷ")))
            .expect(0)
            .mount(&server)
            .await;

        let stop = StopSignal::new();
        let scraper = DetailScraper::new(test_config(&server, 1), stop.clone());
        scraper.shutdown().await;

        let storage = temp_storage().await;
        let urls = vec![format!("{}/p/9", server.uri())];
        let result = scraper.scrape_all(&urls, &storage, &NoopObserver).await;

        assert!(result.cancelled);
        assert_eq!(result.attempted, 0);
        assert!(stop.is_stop_requested());
    }

    #[tokio::test]
    async fn transport_error_discards_session() {
        // Bind then drop a listener so the port refuses connections.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("local addr").port()
        };
        let uri = format!("http://127.0.0.1:{port}");

        let server = MockServer::start().await;
        let mut config = test_config(&server, 1);
        config.max_retries = 2;
        config.request_timeout = Duration::from_secs(1);

        let scraper = DetailScraper::new(config, StopSignal::new());
        let listing = scraper
            .scrape_listing(&format!("{uri}/p/1"))
            .await
            .expect("not cancelled");
        assert!(listing.is_none());
        assert_eq!(scraper.pool().idle_count().await, 0);
    }

    #[tokio::test]
    async fn mixed_failures_on_one_page_do_not_abort() {
        let server = MockServer::start().await;

        // Page 1 answers 503, then an empty body, then 503 again.
        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(menu_html(&["/p/a"])))
            .mount(&server)
            .await;

        let mut config = test_config(&server, 2);
        config.max_retries = 3;
        config.abort_after_consecutive_failures = 3;
        let scraper = MenuScraper::new(config, StopSignal::new()).unwrap();
        let result = scraper.scrape(&NoopObserver).await;

        assert!(!result.aborted);
        assert_eq!(result.pages_failed, 1);
        assert_eq!(result.pages_fetched, 1);
        assert_eq!(result.urls.len(), 1);
    }

    /// Raises the stop signal once the first listing is handled.
    struct StopAfterFirst {
        stop: StopSignal,
    }

    impl ScrapeObserver for StopAfterFirst {
        fn menu_page(&self, _page: u32, _total: u32, _found: usize) {}
        fn listing_done(&self, _url: &str, _current: usize, _total: usize) {
            self.stop.request_stop();
        }
    }

    #[tokio::test]
    async fn stop_during_details_keeps_stored_listings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_html("OH-1", "2 tỷ")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_html("OH-2", "3 tỷ")))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_html("OH-3", "4 tỷ")))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = test_config(&server, 1);
        config.workers = 1;
        let urls: Vec<String> = ["/p/1", "/p/2", "/p/3"]
            .iter()
            .map(|p| format!("{}{p}", server.uri()))
            .collect();

        let stop = StopSignal::new();
        let storage = temp_storage().await;
        let scraper = DetailScraper::new(config, stop.clone());
        let observer = StopAfterFirst { stop };
        let result = scraper.scrape_all(&urls, &storage, &observer).await;

        assert!(result.cancelled);
        assert_eq!(result.attempted, 1);
        assert_eq!(result.inserted, 1);
        assert_eq!(storage.count_listings().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stop_cuts_retry_delay_short() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut config = test_config(&server, 1);
        config.max_retries = 3;
        config.retry_delay = Duration::from_secs(30);

        let stop = StopSignal::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.request_stop();
        });

        let scraper = DetailScraper::new(config, stop);
        let url = format!("{}/p/1", server.uri());
        let outcome = tokio::time::timeout(Duration::from_secs(5), scraper.scrape_listing(&url))
            .await
            .expect("retry delay should end on stop");
        assert!(outcome.unwrap_err().is_cancelled());
    }
}
