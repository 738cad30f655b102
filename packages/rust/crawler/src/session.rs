//! HTTP sessions for detail scraping and the shared stop signal.
//!
//! A [`Session`] is one HTTP client with a fixed user agent. The
//! [`SessionPool`] bounds how many are live, hands idle ones out again, and
//! rebuilds a session after it has been discarded because of a transport
//! failure. Once the [`StopSignal`] is raised, no session can be acquired.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use listingscout_shared::{ListingScoutError, Result};

use crate::user_agent::UserAgentPool;

// ---------------------------------------------------------------------------
// StopSignal
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StopState {
    requested: AtomicBool,
    wake: Notify,
}

/// Cooperative cancellation flag shared by every scraping task.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<StopState>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask all scraping to wind down. Idempotent.
    pub fn request_stop(&self) {
        if !self.0.requested.swap(true, Ordering::SeqCst) {
            info!("stop requested");
            self.0.wake.notify_waiters();
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.requested.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once a stop has been requested.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.is_stop_requested() {
            Err(ListingScoutError::Cancelled(what.to_string()))
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early on a stop request.
    /// Returns `false` if the sleep was cut short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let mut woken = std::pin::pin!(self.0.wake.notified());
        woken.as_mut().enable();
        if self.is_stop_requested() {
            return false;
        }

        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = woken => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Status and body of a fetched page.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: StatusCode,
    pub body: String,
}

impl PageResponse {
    /// 4xx or 5xx.
    pub fn is_http_error(&self) -> bool {
        self.status.is_client_error() || self.status.is_server_error()
    }

    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty()
    }
}

/// One HTTP client bound to a single user agent.
#[derive(Debug)]
pub struct Session {
    id: u64,
    client: Client,
}

impl Session {
    fn build(id: u64, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ListingScoutError::Network(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { id, client })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// GET `url`. Only transport failures are errors; HTTP status is returned.
    pub async fn get(&self, url: &str) -> Result<PageResponse> {
        fetch(&self.client, url, None).await
    }
}

/// GET `url` with an optional per-request user agent.
pub(crate) async fn fetch(
    client: &Client,
    url: &str,
    user_agent: Option<&str>,
) -> Result<PageResponse> {
    let mut request = client.get(url);
    if let Some(ua) = user_agent {
        request = request.header(reqwest::header::USER_AGENT, ua);
    }

    let response = request
        .send()
        .await
        .map_err(|e| ListingScoutError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ListingScoutError::Network(format!("{url}: body read failed: {e}")))?;

    Ok(PageResponse { status, body })
}

// ---------------------------------------------------------------------------
// SessionPool
// ---------------------------------------------------------------------------

/// A session checked out of the pool. Return it with [`SessionPool::release`]
/// or drop it with [`SessionPool::discard`]; the pool slot is freed either way.
#[derive(Debug)]
pub struct SessionLease {
    session: Session,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for SessionLease {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

/// Bounded pool of reusable HTTP sessions.
pub struct SessionPool {
    idle: Mutex<Vec<Session>>,
    permits: Arc<Semaphore>,
    user_agents: UserAgentPool,
    timeout: Duration,
    stop: StopSignal,
    next_id: AtomicU64,
}

impl SessionPool {
    /// Create a pool allowing at most `size` live sessions.
    pub fn new(size: usize, user_agents: UserAgentPool, timeout: Duration, stop: StopSignal) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(size.max(1))),
            user_agents,
            timeout,
            stop,
            next_id: AtomicU64::new(1),
        }
    }

    /// Check out a session, building a fresh one if none is idle.
    ///
    /// Fails with `Cancelled` once a stop has been requested.
    pub async fn acquire(&self) -> Result<SessionLease> {
        self.stop.check("session acquire after shutdown was requested")?;

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListingScoutError::Cancelled("session pool closed".into()))?;

        self.stop.check("session acquire after shutdown was requested")?;

        let idle = self.idle.lock().await.pop();
        let session = match idle {
            Some(session) => session,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let ua = self.user_agents.pick();
                debug!(session = id, user_agent = ua, "initializing session");
                Session::build(id, ua, self.timeout)?
            }
        };

        Ok(SessionLease {
            session,
            _permit: permit,
        })
    }

    /// Return a healthy session for reuse.
    pub async fn release(&self, lease: SessionLease) {
        let SessionLease { session, _permit } = lease;
        self.idle.lock().await.push(session);
    }

    /// Drop a broken session; the next acquire builds a replacement.
    pub fn discard(&self, lease: SessionLease) {
        warn!(session = lease.session.id, "discarding session, will re-initialize");
        drop(lease);
    }

    /// Drop every idle session.
    pub async fn close_all(&self) {
        let mut idle = self.idle.lock().await;
        let closed = idle.len();
        idle.clear();
        info!(closed, "sessions closed");
    }

    /// Number of idle sessions ready for reuse.
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }
}
