use serde_json::Value;

use crate::errors::CollectorError;
use crate::schema::{MarketBar, RawBar, Timeframe};

/// Maps one raw exchange row onto the canonical `MarketBar`.
///
/// Responsibility boundaries:
/// - THIS module enforces presence, arity and numeric types, and
///   reconciles timestamp units to epoch milliseconds
/// - OHLC ordering, volume sign and alignment are the validator's job
///
/// Exchanges deliver numbers either as JSON numbers or as numeric
/// strings (sometimes both in one payload), so every field goes
/// through the same coercion.
pub fn normalize(
    raw: &RawBar,
    symbol: &str,
    timeframe: Timeframe,
    exchange: &str,
) -> Result<MarketBar, CollectorError> {
    if raw.values.len() < 6 {
        return Err(CollectorError::MalformedData(format!(
            "expected 6 kline fields, got {}",
            raw.values.len()
        )));
    }

    let ts_raw = as_i64(&raw.values[0])
        .ok_or_else(|| malformed("timestamp", &raw.values[0]))?;
    let timestamp = raw.ts_unit.to_ms(ts_raw);

    let open = as_f64(&raw.values[1]).ok_or_else(|| malformed("open", &raw.values[1]))?;
    let high = as_f64(&raw.values[2]).ok_or_else(|| malformed("high", &raw.values[2]))?;
    let low = as_f64(&raw.values[3]).ok_or_else(|| malformed("low", &raw.values[3]))?;
    let close = as_f64(&raw.values[4]).ok_or_else(|| malformed("close", &raw.values[4]))?;
    let volume = as_f64(&raw.values[5]).ok_or_else(|| malformed("volume", &raw.values[5]))?;

    Ok(MarketBar {
        exchange: exchange.to_string(),
        symbol: symbol.to_string(),
        timeframe,
        timestamp,
        open,
        high,
        low,
        close,
        volume,
        vwap: optional_f64("vwap", raw.vwap.as_ref())?,
        quote_volume: optional_f64("quote_volume", raw.quote_volume.as_ref())?,
        trade_count: optional_u64("trade_count", raw.trade_count.as_ref())?,
    })
}

fn malformed(field: &str, value: &Value) -> CollectorError {
    CollectorError::MalformedData(format!("field '{field}' is not numeric: {value}"))
}

/// JSON number or numeric string.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Absent fields become None; present but non-numeric fields are an
/// error, never a silent None.
fn optional_f64(field: &str, value: Option<&Value>) -> Result<Option<f64>, CollectorError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => as_f64(v).map(Some).ok_or_else(|| malformed(field, v)),
    }
}

fn optional_u64(field: &str, value: Option<&Value>) -> Result<Option<u64>, CollectorError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v {
            Value::Number(n) => n.as_u64().map(Some).ok_or_else(|| malformed(field, v)),
            Value::String(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| malformed(field, v)),
            _ => Err(malformed(field, v)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TimestampUnit;
    use serde_json::json;

    fn raw(values: Vec<Value>, unit: TimestampUnit) -> RawBar {
        RawBar::new(values, unit)
    }

    #[test]
    fn normalizes_a_millisecond_row() {
        let row = raw(
            vec![json!(1_700_000_000_000i64), json!(100.0), json!(105.0),
                 json!(99.0), json!(103.0), json!(10.0)],
            TimestampUnit::Milliseconds,
        );

        let bar = normalize(&row, "BTC/USDT", Timeframe::H1, "binance").unwrap();
        assert_eq!(bar.timestamp, 1_700_000_000_000);
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 105.0);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.close, 103.0);
        assert_eq!(bar.volume, 10.0);
        assert_eq!(bar.exchange, "binance");
        assert!(bar.vwap.is_none());
    }

    #[test]
    fn reconciles_second_timestamps_to_milliseconds() {
        let row = raw(
            vec![json!(1_699_999_200), json!(1.0), json!(2.0),
                 json!(0.5), json!(1.5), json!(3.0)],
            TimestampUnit::Seconds,
        );
        let bar = normalize(&row, "BTC/USD", Timeframe::H1, "coinbase").unwrap();
        assert_eq!(bar.timestamp, 1_699_999_200_000);
    }

    #[test]
    fn accepts_numeric_strings() {
        let row = raw(
            vec![json!("1699999200000"), json!("100.5"), json!("101"),
                 json!("99.5"), json!("100"), json!("0.25")],
            TimestampUnit::Milliseconds,
        );
        let bar = normalize(&row, "ETH/USDT", Timeframe::M5, "okx").unwrap();
        assert_eq!(bar.timestamp, 1_699_999_200_000);
        assert_eq!(bar.open, 100.5);
    }

    #[test]
    fn short_rows_are_malformed() {
        let row = raw(
            vec![json!(1), json!(2.0), json!(3.0)],
            TimestampUnit::Milliseconds,
        );
        let err = normalize(&row, "BTC/USDT", Timeframe::H1, "binance").unwrap_err();
        assert!(matches!(err, CollectorError::MalformedData(_)));
    }

    #[test]
    fn non_numeric_required_field_is_malformed() {
        let row = raw(
            vec![json!(1_699_999_200_000i64), json!("abc"), json!(105.0),
                 json!(99.0), json!(103.0), json!(10.0)],
            TimestampUnit::Milliseconds,
        );
        let err = normalize(&row, "BTC/USDT", Timeframe::H1, "binance").unwrap_err();
        assert!(err.to_string().contains("open"));
    }

    #[test]
    fn optional_extras_are_coerced_when_present() {
        let mut row = raw(
            vec![json!(1_699_999_200_000i64), json!(100.0), json!(105.0),
                 json!(99.0), json!(103.0), json!(10.0)],
            TimestampUnit::Milliseconds,
        );
        row.vwap = Some(json!("101.5"));
        row.quote_volume = Some(json!(1051.25));
        row.trade_count = Some(json!(42));

        let bar = normalize(&row, "BTC/USDT", Timeframe::H1, "kraken").unwrap();
        assert_eq!(bar.vwap, Some(101.5));
        assert_eq!(bar.quote_volume, Some(1051.25));
        assert_eq!(bar.trade_count, Some(42));
    }

    #[test]
    fn present_but_garbage_optional_field_is_malformed() {
        let mut row = raw(
            vec![json!(1_699_999_200_000i64), json!(100.0), json!(105.0),
                 json!(99.0), json!(103.0), json!(10.0)],
            TimestampUnit::Milliseconds,
        );
        row.trade_count = Some(json!("many"));

        let err = normalize(&row, "BTC/USDT", Timeframe::H1, "kraken").unwrap_err();
        assert!(err.to_string().contains("trade_count"));
    }
}
