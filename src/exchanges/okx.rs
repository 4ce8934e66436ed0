use serde_json::Value;

use crate::{
    util,
    errors::CollectorError,
    schema::{RawBar, Timeframe, TimestampUnit},
};

use super::adapter::ExchangeApi;

/// OKX REST adapter
///
/// Market candles (v5):
/// https://www.okx.com/docs-v5/en/#public-data-rest-api-get-candlesticks
///
/// QUIRKS:
/// - Every field is a string, including the millisecond timestamp
/// - Hour/day bar codes are uppercase ("1H", "4H", "1D")
/// - Rows arrive newest first and must be reversed
/// - Errors come back on HTTP 200 with a non-zero "code"
pub struct OkxApi;

const MAX_LIMIT: u32 = 300;

impl OkxApi {
    fn bar_code(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1H",
            Timeframe::H4 => "4H",
            Timeframe::D1 => "1D",
        }
    }
}

impl ExchangeApi for OkxApi {

    fn name(&self) -> &'static str {
        "okx"
    }

    fn rest_url(&self) -> &'static str {
        "https://www.okx.com"
    }

    fn ping_path(&self) -> &'static str {
        "/api/v5/public/time"
    }

    fn kline_request(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: u32,
    ) -> Result<String, CollectorError> {
        let inst_id = util::symbol_to_exchange(self.name(), symbol);

        let mut url = format!(
            "{}/api/v5/market/candles?instId={}&bar={}&limit={}",
            self.rest_url(),
            inst_id,
            Self::bar_code(timeframe),
            limit.min(MAX_LIMIT),
        );

        // `before` returns records strictly newer than the given ts,
        // which matches the exclusive-since contract directly.
        if let Some(since) = since_ms {
            url.push_str(&format!("&before={since}"));
        }

        Ok(url)
    }

    fn parse_klines(&self, body: &Value) -> Result<Vec<RawBar>, CollectorError> {
        let code = body.get("code").and_then(|c| c.as_str()).unwrap_or("");
        if code != "0" {
            let msg = body.get("msg").and_then(|m| m.as_str()).unwrap_or("unknown");

            // 50011 = "Too Many Requests"
            if code == "50011" {
                return Err(CollectorError::rate_limited(None));
            }
            return Err(CollectorError::MalformedData(format!(
                "okx error envelope (code {code}): {msg}"
            )));
        }

        let rows = body.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
            CollectorError::MalformedData("okx: missing data array".to_string())
        })?;

        let mut out = Vec::with_capacity(rows.len());

        // Newest first on the wire; emit oldest first.
        for row in rows.iter().rev() {
            let fields = row.as_array().ok_or_else(|| {
                CollectorError::MalformedData("okx: candle row is not an array".to_string())
            })?;

            // [ts, o, h, l, c, vol, volCcy, ...]
            let mut bar = RawBar::new(
                fields.iter().take(6).cloned().collect(),
                TimestampUnit::Milliseconds,
            );
            bar.quote_volume = fields.get(6).cloned();
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
    fn builds_candle_url_with_uppercase_bar_code() {
        let url = OkxApi
            .kline_request("BTC/USDT", Timeframe::H1, Some(1_699_999_200_000), 100)
            .unwrap();
        assert!(url.contains("instId=BTC-USDT"));
        assert!(url.contains("bar=1H"));
        assert!(url.contains("before=1699999200000"));
    }

    #[test]
    fn minute_codes_stay_lowercase() {
        let url = OkxApi
            .kline_request("ETH/USDT", Timeframe::M15, None, 100)
            .unwrap();
        assert!(url.contains("bar=15m"));
    }

    #[test]
    fn reverses_rows_and_keeps_string_fields() {
        let body = json!({
            "code": "0",
            "msg": "",
            "data": [
                ["1700002800000", "103.0", "106.0", "102.0", "104.0", "8.0", "824.0", "1", "1"],
                ["1699999200000", "100.0", "105.0", "99.0", "103.0", "10.5", "1051.2", "1", "1"]
            ]
        });

        let rows = OkxApi.parse_klines(&body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values[0], json!("1699999200000"));
        assert_eq!(rows[0].quote_volume, Some(json!("1051.2")));
        assert_eq!(rows[0].ts_unit, TimestampUnit::Milliseconds);
        assert_eq!(rows[1].values[0], json!("1700002800000"));
    }

    #[test]
    fn non_zero_code_is_an_error_envelope() {
        let body = json!({ "code": "51001", "msg": "Instrument ID does not exist" });
        let err = OkxApi.parse_klines(&body).unwrap_err();
        assert!(matches!(err, CollectorError::MalformedData(_)));
    }

    #[test]
    fn throttle_code_maps_to_rate_limit() {
        let body = json!({ "code": "50011", "msg": "Too Many Requests" });
        let err = OkxApi.parse_klines(&body).unwrap_err();
        assert!(matches!(err, CollectorError::RateLimit { .. }));
    }
}
