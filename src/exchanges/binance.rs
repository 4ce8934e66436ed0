use serde_json::Value;

use crate::{
    util,
    errors::CollectorError,
    schema::{RawBar, Timeframe, TimestampUnit},
};

use super::adapter::ExchangeApi;

/// Binance (Global) REST adapter
///
/// Binance Spot klines:
/// https://developers.binance.com/docs/binance-spot-api-docs/rest-api#klinecandlestick-data
///
/// Response rows are arrays:
///   [openTime(ms), "open", "high", "low", "close", "volume",
///    closeTime, "quoteVolume", tradeCount, ...]
///
/// Open time is already milliseconds; prices come as strings.
pub struct BinanceApi;

const MAX_LIMIT: u32 = 1000;

impl ExchangeApi for BinanceApi {

    fn name(&self) -> &'static str {
        "binance"
    }

    fn rest_url(&self) -> &'static str {
        "https://api.binance.com"
    }

    fn ping_path(&self) -> &'static str {
        "/api/v3/ping"
    }

    fn kline_request(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: u32,
    ) -> Result<String, CollectorError> {
        let pair = util::symbol_to_exchange(self.name(), symbol);

        // Binance interval codes match the internal short codes.
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.rest_url(),
            pair,
            timeframe.code(),
            limit.min(MAX_LIMIT),
        );

        // startTime is inclusive on open time; since is exclusive.
        if let Some(since) = since_ms {
            url.push_str(&format!("&startTime={}", since + 1));
        }

        Ok(url)
    }

    fn parse_klines(&self, body: &Value) -> Result<Vec<RawBar>, CollectorError> {
        // Error envelope: { "code": -1121, "msg": "Invalid symbol." }
        if let Some(msg) = body.get("msg").and_then(|m| m.as_str()) {
            return Err(CollectorError::MalformedData(format!(
                "binance error envelope: {msg}"
            )));
        }

        let rows = body.as_array().ok_or_else(|| {
            CollectorError::MalformedData("binance: expected top-level array".to_string())
        })?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let fields = row.as_array().ok_or_else(|| {
                CollectorError::MalformedData("binance: kline row is not an array".to_string())
            })?;

            let mut bar = RawBar::new(
                fields.iter().take(6).cloned().collect(),
                TimestampUnit::Milliseconds,
            );
            bar.quote_volume = fields.get(7).cloned();
            bar.trade_count = fields.get(8).cloned();
            out.push(bar);
        }

        Ok(out)
    }
}
