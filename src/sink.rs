use std::sync::{Arc, Mutex};
use std::sync::atomic::Ordering;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::config::SinkConfig;
use crate::metrics::METRICS;
use crate::schema::MarketBar;

/// ============================================================
/// BarSink
/// ============================================================
///
/// Narrow interface between the collection core and whatever stores
/// the validated bar stream. The core has no compile-time knowledge
/// of any storage technology; it hands over each bar exactly once,
/// self-contained, in no particular order.
///
/// Implementations:
/// - MemorySink: in-process buffer (tests, dry runs)
/// - LogSink:    one log line per bar (demo mode)
/// - RedisSink:  XADD onto a Redis stream (production)
#[async_trait::async_trait]
pub trait BarSink: Send + Sync {
    async fn store(&self, bar: &MarketBar) -> Result<()>;
}

// ------------------------------------------------------------
// Memory sink
// ------------------------------------------------------------

/// Collects bars into an in-process buffer.
#[derive(Default)]
pub struct MemorySink {
    bars: Mutex<Vec<MarketBar>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bars.lock().expect("sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains and returns everything stored so far.
    pub fn take(&self) -> Vec<MarketBar> {
        std::mem::take(&mut *self.bars.lock().expect("sink lock poisoned"))
    }
}

#[async_trait::async_trait]
impl BarSink for MemorySink {
    async fn store(&self, bar: &MarketBar) -> Result<()> {
        self.bars.lock().expect("sink lock poisoned").push(bar.clone());
        Ok(())
    }
}

// ------------------------------------------------------------
// Log sink
// ------------------------------------------------------------

/// Demo mode: bars are logged, nothing is persisted.
pub struct LogSink;

#[async_trait::async_trait]
impl BarSink for LogSink {
    async fn store(&self, bar: &MarketBar) -> Result<()> {
        log::info!(
            "bar {} {} {} open={} o={} h={} l={} c={} v={}",
            bar.exchange,
            bar.symbol,
            bar.timeframe,
            bar.open_time().to_rfc3339(),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
        );
        Ok(())
    }
}

// ------------------------------------------------------------
// Redis sink
// ------------------------------------------------------------

/// Appends each bar as one JSON entry onto a Redis stream.
///
/// The multiplexed connection is shared; redis pipelines commands
/// internally, so a plain clone per call is fine.
pub struct RedisSink {
    conn: redis::aio::MultiplexedConnection,
    stream: String,
}

impl RedisSink {
    pub async fn connect(url: &str, stream: String) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn, stream })
    }
}

#[async_trait::async_trait]
impl BarSink for RedisSink {
    async fn store(&self, bar: &MarketBar) -> Result<()> {
        let payload = serde_json::to_string(bar)?;
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(&self.stream)
            .arg("*")
            .arg("bar")
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

// ------------------------------------------------------------
// Wiring
// ------------------------------------------------------------

/// Builds the sink selected in configuration.
pub async fn build_sink(cfg: &SinkConfig) -> Result<Arc<dyn BarSink>> {
    match cfg.kind.as_str() {
        "memory" => Ok(Arc::new(MemorySink::new())),
        "log" => Ok(Arc::new(LogSink)),
        "redis" => {
            let url = cfg
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("sink.url is required for the redis sink"))?;
            let stream = cfg.stream.clone().unwrap_or_else(|| "market:bars".to_string());
            Ok(Arc::new(RedisSink::connect(url, stream).await?))
        }
        other => Err(anyhow::anyhow!("unknown sink kind '{other}'")),
    }
}

/// Drains the outward bar channel into the sink.
///
/// Ends when every producer handle has been dropped. A failing store
/// is logged and counted, never fatal to the pipeline.
pub async fn drain(mut rx: mpsc::Receiver<MarketBar>, sink: Arc<dyn BarSink>) {
    while let Some(bar) = rx.recv().await {
        match sink.store(&bar).await {
            Ok(()) => {
                METRICS.bars_stored.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                METRICS.sink_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("sink rejected bar for {}: {err}", bar.symbol);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Timeframe;

    fn bar(ts: i64) -> MarketBar {
        MarketBar {
            exchange: "binance".to_string(),
            symbol: "BTC/USDT".to_string(),
            timeframe: Timeframe::H1,
            timestamp: ts,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 3.0,
            vwap: None,
            quote_volume: None,
            trade_count: None,
        }
    }

    #[tokio::test]
    async fn memory_sink_accumulates_bars() {
        let sink = MemorySink::new();
        sink.store(&bar(1)).await.unwrap();
        sink.store(&bar(2)).await.unwrap();

        let stored = sink.take();
        assert_eq!(stored.len(), 2);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn drain_ends_when_producers_hang_up() {
        let sink = Arc::new(MemorySink::new());
        let (tx, rx) = mpsc::channel(8);

        tx.send(bar(1)).await.unwrap();
        tx.send(bar(2)).await.unwrap();
        drop(tx);

        drain(rx, sink.clone()).await;
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn unknown_sink_kind_is_rejected() {
        let cfg = SinkConfig {
            kind: "parquet".to_string(),
            url: None,
            stream: None,
        };
        assert!(build_sink(&cfg).await.is_err());
    }
}
