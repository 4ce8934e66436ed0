use serde_json::Value;

use crate::{
    util,
    errors::CollectorError,
    schema::{RawBar, Timeframe, TimestampUnit},
};

use super::adapter::ExchangeApi;

/// Kraken REST adapter
///
/// OHLC endpoint:
/// https://docs.kraken.com/api/docs/rest-api/get-ohlc-data
///
/// QUIRKS:
/// - Rows live under result.<PAIR> next to a "last" cursor field
/// - Row layout is [time(sec), open, high, low, close, vwap, volume,
///   count]: vwap sits BETWEEN close and volume
/// - Rate-limit rejections arrive in-band as an error array on a
///   200 response, not as HTTP 429
/// - Bitcoin is named XBT in pair codes (handled in util)
pub struct KrakenApi;

impl KrakenApi {
    /// Interval request parameter in minutes.
    fn interval_minutes(timeframe: Timeframe) -> i64 {
        timeframe.duration_ms() / 60_000
    }
}

impl ExchangeApi for KrakenApi {

    fn name(&self) -> &'static str {
        "kraken"
    }

    fn rest_url(&self) -> &'static str {
        "https://api.kraken.com"
    }

    fn ping_path(&self) -> &'static str {
        "/0/public/Time"
    }

    fn kline_request(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        _limit: u32,
    ) -> Result<String, CollectorError> {
        let pair = util::symbol_to_exchange(self.name(), symbol);

        let mut url = format!(
            "{}/0/public/OHLC?pair={}&interval={}",
            self.rest_url(),
            pair,
            Self::interval_minutes(timeframe),
        );

        // Kraken's `since` is already exclusive ("committed OHLC data
        // since given ID"); pass the last open time through unchanged.
        if let Some(since) = since_ms {
            url.push_str(&format!("&since={}", since / 1_000));
        }

        Ok(url)
    }

    fn parse_klines(&self, body: &Value) -> Result<Vec<RawBar>, CollectorError> {
        if let Some(errors) = body.get("error").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                let joined = errors
                    .iter()
                    .filter_map(|e| e.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");

                // In-band throttle rejection, e.g. "EAPI:Rate limit exceeded"
                if joined.contains("Rate limit") || joined.contains("Too many requests") {
                    return Err(CollectorError::rate_limited(None));
                }
                return Err(CollectorError::MalformedData(format!(
                    "kraken error envelope: {joined}"
                )));
            }
        }

        let result = body.get("result").and_then(|r| r.as_object()).ok_or_else(|| {
            CollectorError::MalformedData("kraken: missing result object".to_string())
        })?;

        // The OHLC rows sit under the (single) pair key; "last" is a
        // pagination cursor, not data.
        let rows = result
            .iter()
            .find(|(key, _)| key.as_str() != "last")
            .and_then(|(_, v)| v.as_array())
            .ok_or_else(|| {
                CollectorError::MalformedData("kraken: no OHLC rows in result".to_string())
            })?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let fields = row.as_array().ok_or_else(|| {
                CollectorError::MalformedData("kraken: OHLC row is not an array".to_string())
            })?;

            let get = |i: usize| fields.get(i).cloned().unwrap_or(Value::Null);

            // [time, open, high, low, close, vwap, volume, count]
            let mut bar = RawBar::new(
                vec![get(0), get(1), get(2), get(3), get(4), get(6)],
                TimestampUnit::Seconds,
            );
            bar.vwap = fields.get(5).cloned();
            bar.trade_count = fields.get(7).cloned();
            out.push(bar);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_ohlc_url_with_xbt_pair() {
        let url = KrakenApi
            .kline_request("BTC/USDT", Timeframe::H4, Some(1_699_999_200_000), 500)
            .unwrap();
        assert!(url.contains("pair=XBTUSDT"));
        assert!(url.contains("interval=240"));
        assert!(url.contains("since=1699999200"));
    }

    #[test]
    fn extracts_rows_from_the_pair_key() {
        let body = json!({
            "error": [],
            "result": {
                "XXBTZUSD": [
                    [1699999200, "100.0", "105.0", "99.0", "103.0", "101.5", "10.5", 42]
                ],
                "last": 1699999200
            }
        });

        let rows = KrakenApi.parse_klines(&body).unwrap();
        assert_eq!(rows.len(), 1);
        // canonical order with vwap lifted out of position 5
        assert_eq!(rows[0].values[4], json!("103.0"));
        assert_eq!(rows[0].values[5], json!("10.5"));
        assert_eq!(rows[0].vwap, Some(json!("101.5")));
        assert_eq!(rows[0].trade_count, Some(json!(42)));
        assert_eq!(rows[0].ts_unit, TimestampUnit::Seconds);
    }

    #[test]
    fn in_band_rate_limit_maps_to_rate_limit_error() {
        let body = json!({ "error": ["EAPI:Rate limit exceeded"] });
        let err = KrakenApi.parse_klines(&body).unwrap_err();
        assert!(matches!(err, CollectorError::RateLimit { .. }));
    }

    #[test]
    fn other_error_envelopes_are_malformed_data() {
        let body = json!({ "error": ["EQuery:Unknown asset pair"] });
        let err = KrakenApi.parse_klines(&body).unwrap_err();
        assert!(matches!(err, CollectorError::MalformedData(_)));
    }
}
