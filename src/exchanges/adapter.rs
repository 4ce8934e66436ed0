use serde_json::Value;

use crate::errors::CollectorError;
use crate::schema::{RawBar, Timeframe};

/// ExchangeApi is the core abstraction layer between:
/// - The generic connector runtime
/// - Exchange-specific REST APIs
///
/// Each exchange implementation must:
/// - Build kline request URLs in the exchange's own dialect
/// - Slice raw response bodies into canonical RawBar rows
///
/// DESIGN GOALS:
/// - Zero exchange-specific logic outside adapters
/// - One adapter per exchange
/// - Uniform row format across all exchanges
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Adapter instances are shared across tasks and hold no state
pub trait ExchangeApi: Send + Sync {
    /// Returns the canonical exchange name.
    ///
    /// CONTRACT:
    /// - Must match `exchange.name` in configuration
    /// - Used for logging, symbol conversion and downstream routing
    fn name(&self) -> &'static str;

    /// REST base URL (https://..., no trailing slash).
    fn rest_url(&self) -> &'static str;

    /// Path of a cheap unauthenticated endpoint used by `connect`
    /// to verify the exchange is reachable.
    fn ping_path(&self) -> &'static str;

    /// Builds the full URL of a kline request.
    ///
    /// PARAMETERS:
    /// - `symbol`: internal format "BASE/QUOTE"; the adapter converts
    ///   it into exchange format
    /// - `since_ms`: EXCLUSIVE lower bound on bar-open time. Adapters
    ///   must translate this onto their API's inclusive/exclusive
    ///   convention so an already-collected bar is never re-requested.
    /// - `limit`: upper bound on returned rows; adapters clamp it to
    ///   the exchange maximum
    ///
    /// ERRORS:
    /// - `Config` if the timeframe is not representable on this
    ///   exchange
    ///
    /// MUST NOT:
    /// - Perform network I/O
    /// - Mutate shared state
    fn kline_request(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: u32,
    ) -> Result<String, CollectorError>;

    /// Slices a response body into canonical RawBar rows.
    ///
    /// OUTPUT:
    /// - Rows ordered oldest first (adapters reverse newest-first
    ///   payloads)
    /// - Fields reordered into canonical [ts, o, h, l, c, v] layout,
    ///   types left untouched for the normalizer to check
    ///
    /// ERRORS:
    /// - `MalformedData` when the body does not have the documented
    ///   shape, or when the exchange returned an error envelope
    /// - `RateLimit` when the envelope is the exchange's in-band
    ///   rate-limit rejection
    ///
    /// IMPORTANT:
    /// - This function must NEVER panic
    fn parse_klines(&self, body: &Value) -> Result<Vec<RawBar>, CollectorError>;
}
