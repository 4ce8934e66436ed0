/// Utility helpers used by all collectors.
///
/// This module contains:
/// - Symbol conversion helpers
/// - Time helpers
///
/// IMPORTANT:
/// - No exchange-specific business logic should live here.
/// - This module must remain lightweight and deterministic.
///
/// Exchange-specific behavior should be handled in:
/// - adapters
/// - exchange configuration

use chrono::Utc;

/// Returns the current Unix timestamp in milliseconds (UTC).
///
/// Used as the pipeline clock for future-timestamp validation and
/// for request stamping.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert an internal symbol into the exchange-specific format.
///
/// Input:
/// - exchange: exchange identifier (e.g. "binance", "kraken")
/// - symbol: internal format "BASE/QUOTE"
///
/// Examples:
/// - ("binance", "BTC/USDT")  -> "BTCUSDT"
/// - ("coinbase", "BTC/USD")  -> "BTC-USD"
/// - ("kraken", "BTC/USDT")   -> "XBTUSDT"
/// - ("okx", "BTC/USDT")      -> "BTC-USDT"
///
/// DESIGN NOTES:
/// - Centralized symbol conversion avoids duplication across adapters.
/// - Keeps configuration files exchange-agnostic.
///
/// Kraken names Bitcoin "XBT" in its pair codes, so the base asset is
/// rewritten before the separator is dropped.
pub fn symbol_to_exchange(exchange: &str, symbol: &str) -> String {
    match exchange {
        "binance" => symbol.replace('/', ""),
        "coinbase" | "okx" => symbol.replace('/', "-"),
        "kraken" => {
            let renamed = match symbol.split_once('/') {
                Some(("BTC", quote)) => format!("XBT/{quote}"),
                _ => symbol.to_string(),
            };
            renamed.replace('/', "")
        }
        _ => symbol.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_symbols_drop_the_separator() {
        assert_eq!(symbol_to_exchange("binance", "BTC/USDT"), "BTCUSDT");
        assert_eq!(symbol_to_exchange("binance", "SOL/USDT"), "SOLUSDT");
    }

    #[test]
    fn coinbase_and_okx_use_dashes() {
        assert_eq!(symbol_to_exchange("coinbase", "BTC/USD"), "BTC-USD");
        assert_eq!(symbol_to_exchange("okx", "ETH/USDT"), "ETH-USDT");
    }

    #[test]
    fn kraken_renames_btc_to_xbt() {
        assert_eq!(symbol_to_exchange("kraken", "BTC/USDT"), "XBTUSDT");
        assert_eq!(symbol_to_exchange("kraken", "ETH/USD"), "ETHUSD");
    }

    #[test]
    fn unknown_exchanges_pass_through() {
        assert_eq!(symbol_to_exchange("somewhere", "ADA/USDT"), "ADA/USDT");
    }
}
