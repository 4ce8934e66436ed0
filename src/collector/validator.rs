use crate::errors::{CollectorError, ValidationCheck};
use crate::schema::MarketBar;

/// Final invariant gate before a bar leaves the pipeline.
///
/// Checks run in a fixed order and the first violation is reported:
/// 1. OHLC ordering (and non-negative prices)
/// 2. non-negative volume
/// 3. timestamp on the timeframe bucket boundary
/// 4. timestamp not ahead of the pipeline clock beyond `skew_ms`
///
/// A failed bar is dropped from the outward stream by the caller;
/// validation never fails the target or the pipeline.
pub fn validate(
    bar: MarketBar,
    now_ms: i64,
    skew_ms: i64,
) -> Result<MarketBar, CollectorError> {
    let ordered = bar.low >= 0.0
        && bar.low <= bar.open
        && bar.open <= bar.high
        && bar.low <= bar.close
        && bar.close <= bar.high;
    if !ordered {
        return Err(violation(ValidationCheck::OhlcInconsistent));
    }

    if bar.volume < 0.0 {
        return Err(violation(ValidationCheck::NegativeVolume));
    }

    if !bar.timeframe.is_aligned(bar.timestamp) {
        return Err(violation(ValidationCheck::TimestampNotAligned));
    }

    if bar.timestamp > now_ms + skew_ms {
        return Err(violation(ValidationCheck::TimestampInFuture));
    }

    Ok(bar)
}

fn violation(check: ValidationCheck) -> CollectorError {
    CollectorError::Validation { check }
}
