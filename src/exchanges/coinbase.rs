use serde_json::Value;

use crate::{
    util,
    errors::CollectorError,
    schema::{RawBar, Timeframe, TimestampUnit},
};

use super::adapter::ExchangeApi;

/// Coinbase Exchange REST adapter
///
/// Product candles:
/// https://docs.cdp.coinbase.com/exchange/reference/exchangerestapi_getproductcandles
///
/// QUIRKS:
/// - Rows are [time(sec), low, high, open, close, volume]: both a
///   different field order and second-resolution timestamps
/// - Values are JSON numbers, not strings
/// - Rows arrive newest first and must be reversed
/// - At most 300 candles per request, no limit parameter
pub struct CoinbaseApi;

const MAX_CANDLES: u32 = 300;

impl ExchangeApi for CoinbaseApi {

    fn name(&self) -> &'static str {
        "coinbase"
    }

    fn rest_url(&self) -> &'static str {
        "https://api.exchange.coinbase.com"
    }

    fn ping_path(&self) -> &'static str {
        "/time"
    }

    fn kline_request(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: u32,
    ) -> Result<String, CollectorError> {
        let product = util::symbol_to_exchange(self.name(), symbol);
        let granularity = timeframe.duration_ms() / 1_000;

        let mut url = format!(
            "{}/products/{}/candles?granularity={}",
            self.rest_url(),
            product,
            granularity,
        );

        // start is inclusive; shift one full bucket past the last
        // collected open so that bar is not returned again. The window
        // is closed with an explicit end to honor the fetch limit.
        if let Some(since) = since_ms {
            let start_ms = since + timeframe.duration_ms();
            let span = i64::from(limit.min(MAX_CANDLES)) * timeframe.duration_ms();
            url.push_str(&format!(
                "&start={}&end={}",
                start_ms / 1_000,
                (start_ms + span) / 1_000,
            ));
        }

        Ok(url)
    }

    fn parse_klines(&self, body: &Value) -> Result<Vec<RawBar>, CollectorError> {
        // Error envelope: { "message": "NotFound" }
        if let Some(msg) = body.get("message").and_then(|m| m.as_str()) {
            return Err(CollectorError::MalformedData(format!(
                "coinbase error envelope: {msg}"
            )));
        }

        let rows = body.as_array().ok_or_else(|| {
            CollectorError::MalformedData("coinbase: expected top-level array".to_string())
        })?;

        let mut out = Vec::with_capacity(rows.len());

        // Newest first on the wire; emit oldest first.
        for row in rows.iter().rev() {
            let fields = row.as_array().ok_or_else(|| {
                CollectorError::MalformedData("coinbase: candle row is not an array".to_string())
            })?;

            let get = |i: usize| fields.get(i).cloned().unwrap_or(Value::Null);

            // [time, low, high, open, close, volume] -> canonical order
            out.push(RawBar::new(
                vec![get(0), get(3), get(2), get(1), get(4), get(5)],
                TimestampUnit::Seconds,
            ));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_product_candle_url() {
        let url = CoinbaseApi
            .kline_request("BTC/USD", Timeframe::H1, None, 300)
            .unwrap();
        assert!(url.contains("/products/BTC-USD/candles"));
        assert!(url.contains("granularity=3600"));
        assert!(!url.contains("start="));
    }

    #[test]
    fn incremental_window_skips_the_collected_bucket() {
        let url = CoinbaseApi
            .kline_request("BTC/USD", Timeframe::H1, Some(1_699_999_200_000), 2)
            .unwrap();
        // last open 22:00Z, next bucket opens 23:00Z = 1700002800 sec
        assert!(url.contains("start=1700002800"));
        assert!(url.contains("end=1700010000"));
    }

    #[test]
    fn reorders_fields_and_reverses_rows() {
        let body = json!([
            [1700002800, 99.0, 105.0, 100.0, 103.0, 10.5],
            [1699999200, 90.0, 101.0, 95.0, 100.0, 7.0]
        ]);

        let rows = CoinbaseApi.parse_klines(&body).unwrap();
        assert_eq!(rows.len(), 2);

        // oldest first after the reverse
        assert_eq!(rows[0].values[0], json!(1699999200));
        // canonical order: [ts, open, high, low, close, volume]
        assert_eq!(rows[0].values[1], json!(95.0));
        assert_eq!(rows[0].values[2], json!(101.0));
        assert_eq!(rows[0].values[3], json!(90.0));
        assert_eq!(rows[0].values[4], json!(100.0));
        assert_eq!(rows[0].values[5], json!(7.0));
        assert_eq!(rows[0].ts_unit, TimestampUnit::Seconds);
    }

    #[test]
    fn surfaces_error_envelope() {
        let err = CoinbaseApi
            .parse_klines(&json!({ "message": "NotFound" }))
            .unwrap_err();
        assert!(matches!(err, CollectorError::MalformedData(_)));
    }
}
