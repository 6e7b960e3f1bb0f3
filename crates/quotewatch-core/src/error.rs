use thiserror::Error;

/// Validation and contract errors exposed by `quotewatch-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid source '{value}', expected one of eastmoney, sina, tencent, xueqiu, yahoo, composite")]
    InvalidSource { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be greater than zero")]
    NonPositiveValue { field: &'static str },

    #[error("alert threshold '{field}' must be non-negative and finite")]
    InvalidThreshold { field: &'static str },
}

/// Configuration snapshot rejection. Surfaced at startup or on hot reload,
/// never as a runtime panic mid-tick.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration enables zero quote sources")]
    NoEnabledSources,

    #[error("duplicate source '{provider}' in ranking")]
    DuplicateSource { provider: crate::ProviderId },

    #[error("configuration document is malformed: {reason}")]
    Malformed { reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
