use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;

use crate::config::CollectionConfig;
use crate::errors::CollectorError;
use crate::exchanges::connector::{ConnectionStatus, ExchangeConnector};
use crate::metrics::METRICS;
use crate::schema::{MarketBar, Timeframe};
use crate::util;

use super::{normalizer, validator};

// ------------------------------------------------------------
// Targets
// ------------------------------------------------------------

/// One unit of collection work: (exchange, symbol, timeframe).
///
/// The target set is materialized once at startup from the configured
/// cross-product and never changes during a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.symbol, self.timeframe)
    }
}

/// Per-target state machine position.
///
/// Pending -> Fetching -> Normalizing -> Validating -> Emitted,
/// with failure edges into Retrying (transient, budget remains) or
/// Failed (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Pending,
    Fetching,
    Normalizing,
    Validating,
    Emitted,
    Retrying,
    Failed,
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Normalizing => "normalizing",
            Self::Validating => "validating",
            Self::Emitted => "emitted",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of one target for the operational query surface.
#[derive(Debug, Clone)]
pub struct TargetStatus {
    pub key: TargetKey,
    pub state: TargetState,
    pub last_success_ms: Option<i64>,
    pub last_error: Option<String>,
}

/// Out-of-band failure report, tagged with the offending target.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub target: TargetKey,
    pub error: CollectorError,
}

// ------------------------------------------------------------
// Status board
// ------------------------------------------------------------

struct TargetEntry {
    state: TargetState,
    last_success_ms: Option<i64>,
    last_error: Option<String>,
    /// Terminal on non-retryable grounds (auth, config); such targets
    /// are skipped in later cycles too.
    terminal: bool,
}

/// Shared per-target bookkeeping.
///
/// One lock for the whole table: entries are touched briefly at state
/// transitions only, never across an await point. The watermark and
/// the Emitted state are committed together, so a racing retry can
/// never observe a half-advanced target.
struct StatusBoard {
    entries: Mutex<HashMap<TargetKey, TargetEntry>>,
}

impl StatusBoard {
    fn new(keys: impl IntoIterator<Item = TargetKey>) -> Self {
        let entries = keys
            .into_iter()
            .map(|key| {
                (
                    key,
                    TargetEntry {
                        state: TargetState::Pending,
                        last_success_ms: None,
                        last_error: None,
                        terminal: false,
                    },
                )
            })
            .collect();
        Self { entries: Mutex::new(entries) }
    }

    fn set_state(&self, key: &TargetKey, state: TargetState) {
        if let Some(entry) = self.entries.lock().expect("board lock poisoned").get_mut(key) {
            entry.state = state;
        }
    }

    fn fail(&self, key: &TargetKey, error: &CollectorError, terminal: bool) {
        if let Some(entry) = self.entries.lock().expect("board lock poisoned").get_mut(key) {
            entry.state = TargetState::Failed;
            entry.last_error = Some(error.to_string());
            entry.terminal = entry.terminal || terminal;
        }
    }

    /// Commits a finished pass: Emitted state and, when new bars were
    /// seen, the advanced incremental watermark, in one step.
    fn complete(&self, key: &TargetKey, newest_ms: Option<i64>) {
        if let Some(entry) = self.entries.lock().expect("board lock poisoned").get_mut(key) {
            entry.state = TargetState::Emitted;
            entry.last_error = None;
            if let Some(ts) = newest_ms {
                entry.last_success_ms = Some(entry.last_success_ms.map_or(ts, |prev| prev.max(ts)));
            }
        }
    }

    fn last_success(&self, key: &TargetKey) -> Option<i64> {
        self.entries
            .lock()
            .expect("board lock poisoned")
            .get(key)
            .and_then(|e| e.last_success_ms)
    }

    fn is_terminal(&self, key: &TargetKey) -> bool {
        self.entries
            .lock()
            .expect("board lock poisoned")
            .get(key)
            .is_some_and(|e| e.terminal)
    }

    fn snapshot(&self) -> Vec<TargetStatus> {
        self.entries
            .lock()
            .expect("board lock poisoned")
            .iter()
            .map(|(key, entry)| TargetStatus {
                key: key.clone(),
                state: entry.state,
                last_success_ms: entry.last_success_ms,
                last_error: entry.last_error.clone(),
            })
            .collect()
    }
}

// ------------------------------------------------------------
// Backoff
// ------------------------------------------------------------

/// Exponential backoff with additive jitter.
///
/// attempt 0 -> base, attempt 1 -> 2*base, ... capped at
/// `backoff_cap_ms`. Jitter adds up to a quarter of the computed
/// delay so retries from many targets do not re-align.
fn backoff_delay_ms(attempt: u32, cfg: &CollectionConfig) -> u64 {
    let base = cfg.backoff_base_ms.max(1);
    let cap = cfg.backoff_cap_ms.max(base);

    let raw = base.saturating_mul(1u64 << attempt.min(20)).min(cap);
    let jitter_span = raw / 4;
    let jitter = if jitter_span > 0 {
        rand::random_range(0..=jitter_span)
    } else {
        0
    };

    raw.saturating_add(jitter).min(cap)
}

// ------------------------------------------------------------
// Scheduler
// ------------------------------------------------------------

/// Drives all collection targets through their state machine.
///
/// DESIGN:
/// - One task per exchange per cycle, one task per target inside it
/// - Targets of different exchanges never share any state, so one
///   exchange stalling or dying cannot delay another
/// - Within one exchange, concurrency is bounded by the connector's
///   rate budget, not by a thread
/// - Every failure is classified (retry vs terminal) right here; no
///   error propagates out of the cycle
#[derive(Clone)]
pub struct CollectionScheduler {
    connectors: Arc<HashMap<String, Arc<dyn ExchangeConnector>>>,
    targets: Arc<HashMap<String, Vec<TargetKey>>>,
    cfg: CollectionConfig,
    board: Arc<StatusBoard>,
    bar_tx: mpsc::Sender<MarketBar>,
    report_tx: mpsc::Sender<FailureReport>,
    shutdown: broadcast::Sender<()>,
}

impl CollectionScheduler {
    pub fn new(
        connectors: Vec<Arc<dyn ExchangeConnector>>,
        pairs: &[String],
        timeframes: &[Timeframe],
        cfg: CollectionConfig,
        bar_tx: mpsc::Sender<MarketBar>,
        report_tx: mpsc::Sender<FailureReport>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        let mut by_exchange: HashMap<String, Vec<TargetKey>> = HashMap::new();
        let mut all_keys = Vec::new();

        for conn in &connectors {
            let keys: Vec<TargetKey> = pairs
                .iter()
                .flat_map(|pair| {
                    timeframes.iter().map(|tf| TargetKey {
                        exchange: conn.name().to_string(),
                        symbol: pair.clone(),
                        timeframe: *tf,
                    })
                })
                .collect();
            all_keys.extend(keys.iter().cloned());
            by_exchange.insert(conn.name().to_string(), keys);
        }

        METRICS.targets_active.store(all_keys.len(), Ordering::Relaxed);
        METRICS
            .exchanges_active
            .store(connectors.len(), Ordering::Relaxed);

        let connectors = connectors
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();

        Self {
            connectors: Arc::new(connectors),
            targets: Arc::new(by_exchange),
            cfg,
            board: Arc::new(StatusBoard::new(all_keys)),
            bar_tx,
            report_tx,
            shutdown,
        }
    }

    /// Per-target status and incremental watermark, for operational
    /// visibility.
    pub fn snapshot(&self) -> Vec<TargetStatus> {
        self.board.snapshot()
    }

    /// Runs collection cycles until shutdown is signalled.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            self.run_cycle().await;

            tokio::select! {
                _ = sleep(Duration::from_secs(self.cfg.cycle_interval_secs)) => {}
                _ = shutdown.recv() => {
                    log::info!("scheduler stopping");
                    return;
                }
            }
        }
    }

    /// Drives every target once: to Emitted or to Failed.
    pub async fn run_cycle(&self) {
        let mut handles = Vec::with_capacity(self.targets.len());

        for (exchange, keys) in self.targets.iter() {
            let this = self.clone();
            let exchange = exchange.clone();
            let keys = keys.clone();
            handles.push(tokio::spawn(async move {
                this.run_exchange_cycle(&exchange, keys).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    /// One exchange's share of a cycle.
    ///
    /// Failures here stay here: a dead exchange fails its own targets
    /// in one step and returns, without touching any other exchange.
    async fn run_exchange_cycle(&self, exchange: &str, keys: Vec<TargetKey>) {
        let Some(conn) = self.connectors.get(exchange).cloned() else {
            return;
        };

        // Failed is terminal for the whole run.
        if conn.status() == ConnectionStatus::Failed {
            return;
        }

        if let Err(err) = self.connect_with_retry(&conn).await {
            if matches!(err, CollectorError::Cancelled) {
                return;
            }
            log::error!("exchange {exchange} failed to connect: {err}");
            conn.mark_failed();
            METRICS.exchanges_failed.fetch_add(1, Ordering::Relaxed);

            let terminal = !err.is_retryable();
            for key in &keys {
                self.board.fail(key, &err, terminal);
                METRICS.targets_failed.fetch_add(1, Ordering::Relaxed);
                self.report(key, err.clone());
            }
            return;
        }

        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if self.board.is_terminal(&key) {
                continue;
            }
            self.board.set_state(&key, TargetState::Pending);

            let this = self.clone();
            let conn = conn.clone();
            handles.push(tokio::spawn(async move {
                this.run_target(&conn, key).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn connect_with_retry(&self, conn: &Arc<dyn ExchangeConnector>) -> Result<(), CollectorError> {
        let mut attempt = 0u32;
        loop {
            match conn.connect().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt + 1 < self.cfg.retry_budget => {
                    let delay = err
                        .retry_after_ms()
                        .unwrap_or_else(|| backoff_delay_ms(attempt, &self.cfg));
                    attempt += 1;
                    METRICS.retries.fetch_add(1, Ordering::Relaxed);

                    let mut shutdown = self.shutdown.subscribe();
                    tokio::select! {
                        _ = sleep(Duration::from_millis(delay)) => {}
                        _ = shutdown.recv() => return Err(CollectorError::Cancelled),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// The per-target state machine.
    async fn run_target(&self, conn: &Arc<dyn ExchangeConnector>, key: TargetKey) {
        let mut attempt = 0u32;
        let mut malformed_retry_used = false;

        loop {
            match self.collect_once(conn, &key).await {
                Ok(()) => return,
                Err(CollectorError::Cancelled) => return,
                Err(err) => {
                    METRICS.fetch_errors.fetch_add(1, Ordering::Relaxed);
                    self.report(&key, err.clone());

                    // One bad payload earns exactly one re-fetch;
                    // transient kinds burn the regular budget.
                    let may_retry = if err.is_retryable() {
                        attempt + 1 < self.cfg.retry_budget
                    } else if matches!(err, CollectorError::MalformedData(_)) {
                        !std::mem::replace(&mut malformed_retry_used, true)
                    } else {
                        false
                    };

                    if !may_retry {
                        let terminal = matches!(
                            err,
                            CollectorError::Auth(_) | CollectorError::Config(_)
                        );
                        self.board.fail(&key, &err, terminal);
                        METRICS.targets_failed.fetch_add(1, Ordering::Relaxed);
                        log::warn!("target {key} failed: {err}");
                        return;
                    }

                    self.board.set_state(&key, TargetState::Retrying);
                    METRICS.retries.fetch_add(1, Ordering::Relaxed);

                    let delay = err
                        .retry_after_ms()
                        .unwrap_or_else(|| backoff_delay_ms(attempt, &self.cfg));
                    attempt += 1;

                    let mut shutdown = self.shutdown.subscribe();
                    tokio::select! {
                        _ = sleep(Duration::from_millis(delay)) => {}
                        _ = shutdown.recv() => return,
                    }
                }
            }
        }
    }

    /// One Fetch -> Normalize -> Validate -> Emit pass for a target.
    async fn collect_once(
        &self,
        conn: &Arc<dyn ExchangeConnector>,
        key: &TargetKey,
    ) -> Result<(), CollectorError> {
        self.board.set_state(key, TargetState::Fetching);
        let since = self.board.last_success(key);
        let rows = conn
            .fetch_bars(&key.symbol, key.timeframe, since, self.cfg.fetch_limit)
            .await?;

        self.board.set_state(key, TargetState::Normalizing);
        let mut bars = Vec::with_capacity(rows.len());
        for row in &rows {
            match normalizer::normalize(row, &key.symbol, key.timeframe, &key.exchange) {
                Ok(bar) => bars.push(bar),
                Err(err) => {
                    METRICS.normalize_errors.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }

        self.board.set_state(key, TargetState::Validating);
        let now = util::now_ms();
        let mut newest: Option<i64> = None;

        for bar in bars {
            // The watermark tracks fetched bars, dropped or not, so a
            // permanently invalid bar is not re-requested forever.
            newest = Some(newest.map_or(bar.timestamp, |n| n.max(bar.timestamp)));

            match validator::validate(bar, now, self.cfg.clock_skew_ms) {
                Ok(bar) => {
                    if self.bar_tx.send(bar).await.is_err() {
                        // Consumer is gone; shutdown in progress.
                        return Err(CollectorError::Cancelled);
                    }
                    METRICS.bars_emitted.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    METRICS.bars_rejected.fetch_add(1, Ordering::Relaxed);
                    self.report(key, err);
                }
            }
        }

        self.board.complete(key, newest);
        Ok(())
    }

    /// Forwards a failure report without ever blocking collection.
    fn report(&self, key: &TargetKey, error: CollectorError) {
        let report = FailureReport { target: key.clone(), error };
        if self.report_tx.try_send(report).is_err() {
            log::debug!("report channel full, dropping report for {key}");
        }
    }
}
