use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::{self, Credentials, ExchangeConfig, CollectionConfig, RateBudget};
use crate::errors::CollectorError;
use crate::metrics::METRICS;
use crate::schema::{RawBar, Timeframe};

use super::adapter::ExchangeApi;

/// Health of one exchange connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Ready,
    Degraded,
    Failed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// ExchangeConnector owns the network relationship with exactly one
/// exchange and exposes a uniform fetch operation regardless of that
/// exchange's API shape.
///
/// CONTRACT:
/// - `connect` is idempotent; calling it while Ready is a no-op
/// - `fetch_bars` suspends until the exchange's rate budget allows
///   another request, never fire-and-hope
/// - `close` releases the session; in-flight calls return Cancelled
///
/// The only state shared across concurrent tasks for one exchange is
/// the rate-limit budget and the status word.
#[async_trait::async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Canonical exchange identifier.
    fn name(&self) -> &str;

    /// Current connection health.
    fn status(&self) -> ConnectionStatus;

    /// Marks the whole exchange as failed (connect budget exhausted).
    fn mark_failed(&self);

    /// Establishes session state: resolves credentials and verifies
    /// the exchange is reachable.
    async fn connect(&self) -> Result<(), CollectorError>;

    /// Fetches bars for one symbol/timeframe, starting after
    /// `since_ms` (exclusive), at most `limit` rows.
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: u32,
    ) -> Result<Vec<RawBar>, CollectorError>;

    /// Releases the session. Safe to call more than once.
    async fn close(&self);
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Builds the per-exchange token bucket from a configured budget.
///
/// Burst is the full budget; refill is spread evenly across the
/// window, so the sustained rate never exceeds max_requests/window.
pub(crate) fn build_limiter(budget: &RateBudget) -> Result<DirectLimiter, CollectorError> {
    let max = NonZeroU32::new(budget.max_requests).ok_or_else(|| {
        CollectorError::Config("rate_limit.max_requests must be positive".to_string())
    })?;

    let refill_ms = (budget.window_ms / u64::from(budget.max_requests)).max(1);
    let quota = Quota::with_period(Duration::from_millis(refill_ms))
        .ok_or_else(|| {
            CollectorError::Config("rate_limit.window_ms must be positive".to_string())
        })?
        .allow_burst(max);

    Ok(RateLimiter::direct(quota))
}

/// REST connector: one instance per configured exchange.
///
/// Wraps a stateless `ExchangeApi` adapter with everything that IS
/// stateful about an exchange relationship: the HTTP client, the rate
/// budget, credentials, connection status and the shutdown signal.
pub struct RestConnector {
    api: Arc<dyn ExchangeApi>,
    http: reqwest::Client,
    limiter: DirectLimiter,
    status: Mutex<ConnectionStatus>,
    /// Held for authenticated endpoints; the Ready status invariant
    /// requires resolution to have succeeded first.
    #[allow(dead_code)]
    credentials: Mutex<Option<Credentials>>,
    credential_ref: String,
    request_timeout_ms: u64,
    closed: AtomicBool,
    shutdown: broadcast::Sender<()>,
}

impl RestConnector {
    pub fn new(
        api: Arc<dyn ExchangeApi>,
        cfg: &ExchangeConfig,
        tunables: &CollectionConfig,
    ) -> Result<Self, CollectorError> {
        let limiter = build_limiter(&cfg.rate_limit)?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| CollectorError::Config(format!("http client: {e}")))?;

        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            api,
            http,
            limiter,
            status: Mutex::new(ConnectionStatus::Disconnected),
            credentials: Mutex::new(None),
            credential_ref: cfg.credential_ref.clone(),
            request_timeout_ms: tunables.request_timeout_ms,
            closed: AtomicBool::new(false),
            shutdown,
        })
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().expect("status lock poisoned") = status;
    }

    /// Performs one GET under the request deadline, mapping transport
    /// and HTTP-level failures onto the collector taxonomy:
    ///
    ///   401/403 -> Auth, 429 -> RateLimit (Retry-After honored),
    ///   5xx -> Network, other 4xx -> Config, deadline -> Timeout
    async fn request(&self, url: &str) -> Result<Value, CollectorError> {
        let mut shutdown = self.shutdown.subscribe();
        METRICS.requests_sent.fetch_add(1, Ordering::Relaxed);

        let call = async {
            let resp = self.http.get(url).send().await.map_err(CollectorError::from)?;
            let status = resp.status();

            match status.as_u16() {
                401 | 403 => {
                    return Err(CollectorError::Auth(format!(
                        "{}: http {status}",
                        self.api.name()
                    )));
                }
                429 => {
                    let retry_after_ms = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.trim().parse::<u64>().ok())
                        .map(|secs| secs * 1_000);
                    return Err(CollectorError::RateLimit { retry_after_ms });
                }
                s if (500..600).contains(&s) => {
                    return Err(CollectorError::Network(format!(
                        "{}: http {status}",
                        self.api.name()
                    )));
                }
                s if (400..500).contains(&s) => {
                    return Err(CollectorError::Config(format!(
                        "{}: http {status}",
                        self.api.name()
                    )));
                }
                _ => {}
            }

            resp.json::<Value>()
                .await
                .map_err(|e| CollectorError::MalformedData(format!("invalid json body: {e}")))
        };

        let deadline = Duration::from_millis(self.request_timeout_ms);
        tokio::select! {
            res = tokio::time::timeout(deadline, call) => match res {
                Ok(inner) => inner,
                Err(_) => Err(CollectorError::Timeout(format!(
                    "{}: no response within {}ms",
                    self.api.name(),
                    self.request_timeout_ms
                ))),
            },
            _ = shutdown.recv() => Err(CollectorError::Cancelled),
        }
    }
}

#[async_trait::async_trait]
impl ExchangeConnector for RestConnector {

    fn name(&self) -> &str {
        self.api.name()
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock().expect("status lock poisoned")
    }

    fn mark_failed(&self) {
        self.set_status(ConnectionStatus::Failed);
    }

    async fn connect(&self) -> Result<(), CollectorError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(CollectorError::Cancelled);
        }
        if self.status() == ConnectionStatus::Ready {
            return Ok(());
        }

        self.set_status(ConnectionStatus::Connecting);

        // Credentials must resolve before the handle may become Ready.
        let creds = match config::resolve_credentials(&self.credential_ref) {
            Ok(c) => c,
            Err(err) => {
                self.set_status(ConnectionStatus::Disconnected);
                return Err(err);
            }
        };

        let url = format!("{}{}", self.api.rest_url(), self.api.ping_path());
        match self.request(&url).await {
            Ok(_) => {
                *self.credentials.lock().expect("credentials lock poisoned") = Some(creds);
                self.set_status(ConnectionStatus::Ready);
                Ok(())
            }
            Err(err) => {
                self.set_status(ConnectionStatus::Disconnected);
                Err(err)
            }
        }
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: u32,
    ) -> Result<Vec<RawBar>, CollectorError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(CollectorError::Cancelled);
        }

        // Cooperative suspension until the budget admits this request.
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            _ = self.limiter.until_ready() => {}
            _ = shutdown.recv() => return Err(CollectorError::Cancelled),
        }

        let url = self.api.kline_request(symbol, timeframe, since_ms, limit)?;

        let body = match self.request(&url).await {
            Ok(body) => body,
            Err(CollectorError::Cancelled) => return Err(CollectorError::Cancelled),
            Err(err) => {
                self.set_status(ConnectionStatus::Degraded);
                return Err(err);
            }
        };

        match self.api.parse_klines(&body) {
            Ok(rows) => {
                METRICS.bars_fetched.fetch_add(rows.len(), Ordering::Relaxed);
                self.set_status(ConnectionStatus::Ready);
                Ok(rows)
            }
            Err(err) => {
                self.set_status(ConnectionStatus::Degraded);
                Err(err)
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        let _ = self.shutdown.send(());
        self.set_status(ConnectionStatus::Disconnected);
    }
}
