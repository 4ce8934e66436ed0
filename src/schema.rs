use serde::{Serialize, Deserialize};

use crate::errors::CollectorError;

// ------------------------------------------------------------
// Timeframe
// ------------------------------------------------------------
//
// The fixed set of bar durations the collector understands.
//
// Configuration files use the short codes ("5m", "1h", ...);
// exchange adapters map each variant onto their own interval
// encoding (minutes, seconds, "1H", ...).
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Bucket duration in milliseconds.
    pub fn duration_ms(self) -> i64 {
        match self {
            Self::M5 => 5 * 60_000,
            Self::M15 => 15 * 60_000,
            Self::H1 => 3_600_000,
            Self::H4 => 4 * 3_600_000,
            Self::D1 => 86_400_000,
        }
    }

    /// True when `ts_ms` lands exactly on a bucket boundary.
    pub fn is_aligned(self, ts_ms: i64) -> bool {
        ts_ms % self.duration_ms() == 0
    }

    /// Floors `ts_ms` to the open time of the bucket containing it.
    pub fn align_floor(self, ts_ms: i64) -> i64 {
        ts_ms - ts_ms.rem_euclid(self.duration_ms())
    }

    /// Short code used in configuration and log output.
    pub fn code(self) -> &'static str {
        match self {
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            other => Err(CollectorError::Config(format!(
                "unsupported timeframe '{other}' (expected 5m/15m/1h/4h/1d)"
            ))),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = CollectorError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.code().to_string()
    }
}

// ------------------------------------------------------------
// Canonical bar record
// ------------------------------------------------------------
//
// The single normalized output format of the whole pipeline.
//
// Produced by the normalizer from one raw exchange row, checked by
// the validator, then handed to the sink. Immutable afterwards:
// nothing downstream of validation mutates a bar.
//
// Timestamps are milliseconds since the Unix epoch (UTC) and refer
// to the bar OPEN time, aligned to the timeframe boundary.
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MarketBar {
    /// Source exchange identifier (e.g. "binance", "kraken")
    pub exchange: String,

    /// Trading pair in normalized internal format
    /// Example: "BTC/USDT", "ETH/USD"
    pub symbol: String,

    /// Bar duration
    pub timeframe: Timeframe,

    /// Bar-open timestamp in milliseconds since Unix epoch (UTC)
    pub timestamp: i64,

    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,

    /// Base-asset volume traded inside the bucket
    pub volume: f64,

    /// Volume-weighted average price, where the exchange reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vwap: Option<f64>,

    /// Quote-asset volume, where the exchange reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_volume: Option<f64>,

    /// Number of trades inside the bucket, where reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_count: Option<u64>,
}

impl MarketBar {
    /// Bar-open time as a UTC datetime, for logs and reports.
    pub fn open_time(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.timestamp).unwrap_or_default()
    }
}

// ------------------------------------------------------------
// Raw bar row
// ------------------------------------------------------------

/// Unit of the raw timestamp field, declared per exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampUnit {
    Seconds,
    Milliseconds,
}

impl TimestampUnit {
    /// Converts a raw timestamp value into epoch milliseconds.
    pub fn to_ms(self, raw: i64) -> i64 {
        match self {
            Self::Seconds => raw * 1_000,
            Self::Milliseconds => raw,
        }
    }
}

/// One pre-normalization row as produced by an exchange adapter.
///
/// Adapters reorder their exchange's field layout into the canonical
/// order below but do NOT coerce types. Values stay as raw JSON so the
/// normalizer can report missing and mistyped fields uniformly across
/// all exchanges.
///
/// CANONICAL ORDER of `values`:
///   [timestamp, open, high, low, close, volume]
///
#[derive(Debug, Clone)]
pub struct RawBar {
    /// Required fields in canonical order. Fewer than six entries is
    /// a malformed row.
    pub values: Vec<serde_json::Value>,

    /// Optional volume-weighted average price
    pub vwap: Option<serde_json::Value>,

    /// Optional quote-asset volume
    pub quote_volume: Option<serde_json::Value>,

    /// Optional trade count
    pub trade_count: Option<serde_json::Value>,

    /// Unit of `values[0]`
    pub ts_unit: TimestampUnit,
}

impl RawBar {
    /// Row with the six required fields and no optional extras.
    pub fn new(values: Vec<serde_json::Value>, ts_unit: TimestampUnit) -> Self {
        Self {
            values,
            vwap: None,
            quote_volume: None,
            trade_count: None,
            ts_unit,
        }
    }
}
