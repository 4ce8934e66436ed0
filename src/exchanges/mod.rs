//! Exchange adapter registry and factory
//!
//! This module provides:
//! - Central registration of all supported exchanges
//! - A factory resolving configured exchanges into connectors
//!
//! All exchange-specific logic must live in dedicated adapter modules.
//! The rest of the application interacts exclusively through the
//! `ExchangeApi` and `ExchangeConnector` traits.

pub mod adapter;
pub mod connector;
pub mod binance;
pub mod coinbase;
pub mod kraken;
pub mod okx;

use std::sync::Arc;

use adapter::ExchangeApi;
use connector::{ExchangeConnector, RestConnector};

use crate::config::{CollectionConfig, ExchangeConfig};
use crate::errors::CollectorError;

/// Returns an exchange API adapter by name.
///
/// This function acts as the central registry for all supported
/// exchanges: one explicit match, resolved once at startup, instead
/// of name-based lookup scattered across the codebase.
///
/// CONTRACT:
/// - `name` MUST match the `exchange.name` field in config.json
/// - Adapter names are lowercase and stable
pub fn get_api(name: &str) -> Option<Arc<dyn ExchangeApi>> {
    match name {
        "binance" => Some(Arc::new(binance::BinanceApi)),
        "coinbase" => Some(Arc::new(coinbase::CoinbaseApi)),
        "kraken" => Some(Arc::new(kraken::KrakenApi)),
        "okx" => Some(Arc::new(okx::OkxApi)),
        _ => None,
    }
}

/// Builds the connector for one configured exchange.
///
/// ERRORS:
/// - `Config` when the exchange identifier is unrecognized or its
///   rate budget is unusable
pub fn build_connector(
    cfg: &ExchangeConfig,
    tunables: &CollectionConfig,
) -> Result<Arc<dyn ExchangeConnector>, CollectorError> {
    let api = get_api(&cfg.name).ok_or_else(|| {
        CollectorError::Config(format!("exchange '{}' is not supported", cfg.name))
    })?;

    Ok(Arc::new(RestConnector::new(api, cfg, tunables)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateBudget;

    #[test]
    fn registry_knows_all_supported_exchanges() {
        for name in ["binance", "coinbase", "kraken", "okx"] {
            let api = get_api(name).unwrap();
            assert_eq!(api.name(), name);
        }
    }

    #[test]
    fn unknown_exchange_is_a_config_error() {
        let cfg = ExchangeConfig {
            name: "bitfinexx".to_string(),
            enabled: true,
            credential_ref: "x".to_string(),
            rate_limit: RateBudget { max_requests: 10, window_ms: 1_000 },
        };
        let err = build_connector(&cfg, &CollectionConfig::default())
            .err()
            .expect("unknown exchange should be rejected");
        assert!(matches!(err, CollectorError::Config(_)));
    }
}
