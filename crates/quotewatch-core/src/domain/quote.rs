use serde::{Deserialize, Serialize};

use crate::{ProviderId, Symbol, UtcDateTime, ValidationError};

/// One normalized observation of an instrument.
///
/// `change_percent` is always recomputed from `price` and `prev_close` at
/// construction; upstream percent fields are inconsistently scaled across
/// providers and are never trusted verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    /// Display name; empty when the provider did not resolve one.
    pub name: String,
    pub price: f64,
    pub prev_close: f64,
    pub change_percent: f64,
    pub volume: Option<u64>,
    /// Assigned by the adapter at parse time, not taken from the provider.
    pub observed_at: UtcDateTime,
    pub source: ProviderId,
}

impl Quote {
    pub fn new(
        symbol: Symbol,
        name: impl Into<String>,
        price: f64,
        prev_close: f64,
        volume: Option<u64>,
        observed_at: UtcDateTime,
        source: ProviderId,
    ) -> Result<Self, ValidationError> {
        let price = normalize_price("price", price)?;
        let prev_close = normalize_price("prev_close", prev_close)?;
        let change_percent = (price - prev_close) / prev_close * 100.0;

        Ok(Self {
            symbol,
            name: name.into(),
            price,
            prev_close,
            change_percent,
            volume,
            observed_at,
            source,
        })
    }

    pub fn is_up(&self) -> bool {
        self.change_percent > 0.0
    }

    pub fn is_down(&self) -> bool {
        self.change_percent < 0.0
    }
}

/// Normalize a price to four decimal places so change detection can compare
/// with exact equality. Non-finite and non-positive values are rejected; a
/// zero `prev_close` would otherwise produce an infinite percent.
fn normalize_price(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field });
    }
    Ok((value * 10_000.0).round() / 10_000.0)
}
