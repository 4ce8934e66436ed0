use serde::Deserialize;

use crate::errors::CollectorError;
use crate::schema::Timeframe;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`.
//
// It defines:
// - Enabled exchanges and their rate budgets
// - The pairs x timeframes collection matrix
// - Retry, backoff and timeout tunables
// - The sink the validated bar stream is drained into
//
// The loaded value is passed by reference to the scheduler and
// connectors at construction time. There is no global singleton.
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// List of exchange configurations
    pub exchanges: Vec<ExchangeConfig>,

    /// Trading pairs in normalized form: BASE/QUOTE
    /// Example: "BTC/USDT"
    pub pairs: Vec<String>,

    /// Timeframes to collect for every pair
    pub timeframes: Vec<Timeframe>,

    /// Retry / backoff / timeout tunables
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Destination of the validated bar stream
    #[serde(default)]
    pub sink: SinkConfig,
}

// ------------------------------------------------------------
// Exchange configuration
// ------------------------------------------------------------
//
// Configuration for a single exchange instance.
//
// Each exchange runs independently; its rate budget and credential
// reference apply to that exchange only.
//
#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    /// Exchange identifier (e.g. "binance", "kraken", "okx")
    pub name: String,

    /// Enables or disables this exchange at runtime
    pub enabled: bool,

    /// Credential reference, resolved through the environment at
    /// connect time. The secret material itself is never stored in
    /// the config file.
    pub credential_ref: String,

    /// Request budget for this exchange
    pub rate_limit: RateBudget,
}

/// Request budget: at most `max_requests` calls inside any window of
/// `window_ms` milliseconds. Enforced as a token bucket with a burst
/// of the full budget, refilled evenly across the window.
#[derive(Debug, Deserialize, Clone)]
pub struct RateBudget {
    pub max_requests: u32,
    pub window_ms: u64,
}

// ------------------------------------------------------------
// Collection tunables
// ------------------------------------------------------------
//
// All values have working defaults; a minimal config file only needs
// exchanges, pairs and timeframes.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectionConfig {
    /// Maximum attempts per target before it is failed terminally
    pub retry_budget: u32,

    /// Exponential backoff base in milliseconds
    pub backoff_base_ms: u64,

    /// Upper bound for a single backoff delay
    pub backoff_cap_ms: u64,

    /// Per-request network deadline
    pub request_timeout_ms: u64,

    /// Tolerated clock skew for the future-timestamp check
    pub clock_skew_ms: i64,

    /// Maximum bars requested per fetch
    pub fetch_limit: u32,

    /// Pause between collection cycles
    pub cycle_interval_secs: u64,

    /// Capacity of the outward bar channel
    pub channel_capacity: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            retry_budget: 5,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            request_timeout_ms: 30_000,
            clock_skew_ms: 5_000,
            fetch_limit: 500,
            cycle_interval_secs: 300,
            channel_capacity: 10_000,
        }
    }
}

// ------------------------------------------------------------
// Sink configuration
// ------------------------------------------------------------
//
// Selects where validated bars are drained to:
// - "memory": in-process buffer (tests, dry runs)
// - "log":    one log line per bar (demo mode, no storage)
// - "redis":  XADD onto a Redis stream
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: String,

    /// Connection URL for external sinks (e.g. redis://127.0.0.1/)
    pub url: Option<String>,

    /// Stream / key name for external sinks
    pub stream: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: "log".to_string(),
            url: None,
            stream: None,
        }
    }
}

// ------------------------------------------------------------
// Credential resolution
// ------------------------------------------------------------

/// API credentials resolved from a credential reference.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Resolves a credential reference into usable key material.
///
/// The reference names an environment-variable prefix:
/// `credential_ref = "binance"` reads BINANCE_API_KEY and
/// BINANCE_API_SECRET.
///
/// IMPORTANT:
/// - Secrets never live in config.json and are never persisted here.
/// - A missing variable is a configuration error; the caller decides
///   whether to skip the exchange or fail.
pub fn resolve_credentials(reference: &str) -> Result<Credentials, CollectorError> {
    if reference.is_empty() {
        return Err(CollectorError::Config(
            "empty credential reference".to_string(),
        ));
    }

    let prefix = reference.to_uppercase().replace('-', "_");
    let key_var = format!("{prefix}_API_KEY");
    let secret_var = format!("{prefix}_API_SECRET");

    let api_key = std::env::var(&key_var)
        .map_err(|_| CollectorError::Config(format!("missing env var {key_var}")))?;
    let api_secret = std::env::var(&secret_var)
        .map_err(|_| CollectorError::Config(format!("missing env var {secret_var}")))?;

    if api_key.is_empty() || api_secret.is_empty() {
        return Err(CollectorError::Config(format!(
            "credentials for '{reference}' are present but empty"
        )));
    }

    Ok(Credentials { api_key, api_secret })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let raw = r#"{
            "exchanges": [
                {
                    "name": "binance",
                    "enabled": true,
                    "credential_ref": "binance",
                    "rate_limit": { "max_requests": 20, "window_ms": 60000 }
                }
            ],
            "pairs": ["BTC/USDT", "ETH/USDT"],
            "timeframes": ["1h", "4h"]
        }"#;

        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.exchanges.len(), 1);
        assert_eq!(cfg.timeframes, vec![Timeframe::H1, Timeframe::H4]);
        assert_eq!(cfg.collection.retry_budget, 5);
        assert_eq!(cfg.collection.request_timeout_ms, 30_000);
        assert_eq!(cfg.sink.kind, "log");
    }

    #[test]
    fn bad_timeframe_fails_deserialization() {
        let raw = r#"{
            "exchanges": [],
            "pairs": [],
            "timeframes": ["3h"]
        }"#;
        assert!(serde_json::from_str::<Config>(raw).is_err());
    }

    #[test]
    fn empty_credential_ref_is_rejected() {
        let err = resolve_credentials("").unwrap_err();
        assert!(matches!(err, CollectorError::Config(_)));
    }

    #[test]
    fn missing_env_vars_are_a_config_error() {
        let err = resolve_credentials("no-such-exchange-configured").unwrap_err();
        assert!(err.to_string().contains("NO_SUCH_EXCHANGE_CONFIGURED_API_KEY"));
    }

    #[test]
    fn present_env_vars_resolve() {
        // Safety: test-local variable name, no other test reads it.
        unsafe {
            std::env::set_var("TESTEX_API_KEY", "k");
            std::env::set_var("TESTEX_API_SECRET", "s");
        }
        let creds = resolve_credentials("testex").unwrap();
        assert_eq!(creds.api_key, "k");
        assert_eq!(creds.api_secret, "s");
    }
}
