//! Source adapter contract and fetch error taxonomy.
//!
//! Every provider implements [`QuoteSource`]: build a provider-specific
//! request for one symbol, parse the provider-specific response format, and
//! normalize it into a [`Quote`] — or fail with a classified [`FetchError`].
//! An adapter never returns a partially populated quote.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::{ProviderId, Quote, Symbol, ValidationError};

/// Fetch failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Connection-level failure; retried via failover.
    Network,
    /// Request exceeded the adapter timeout; treated as a failure, not fatal.
    Timeout,
    /// Malformed or unexpected upstream schema.
    Parse,
    /// Parsed but semantically invalid (e.g. non-positive prev_close).
    InvalidData,
    /// Provider throttling signal; feeds the backoff gate.
    RateLimited,
}

/// Structured fetch error used by failover and backoff decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
    retry_after: Option<Duration>,
    forbidden: bool,
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Network,
            message: message.into(),
            retry_after: None,
            forbidden: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Timeout,
            message: message.into(),
            retry_after: None,
            forbidden: false,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Parse,
            message: message.into(),
            retry_after: None,
            forbidden: false,
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::InvalidData,
            message: message.into(),
            retry_after: None,
            forbidden: false,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: FetchErrorKind::RateLimited,
            message: message.into(),
            retry_after,
            forbidden: false,
        }
    }

    /// 403-class throttling: counts toward the failure threshold, but its
    /// warning logs are suppressed within the gate's noise window.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::RateLimited,
            message: message.into(),
            retry_after: None,
            forbidden: true,
        }
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub const fn is_forbidden(&self) -> bool {
        self.forbidden
    }

    /// Whether another adapter in the chain is worth trying for this error.
    pub const fn retryable(&self) -> bool {
        !matches!(self.kind, FetchErrorKind::InvalidData)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            FetchErrorKind::Network => "fetch.network",
            FetchErrorKind::Timeout => "fetch.timeout",
            FetchErrorKind::Parse => "fetch.parse",
            FetchErrorKind::InvalidData => "fetch.invalid_data",
            FetchErrorKind::RateLimited => "fetch.rate_limited",
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for FetchError {}

impl From<ValidationError> for FetchError {
    fn from(error: ValidationError) -> Self {
        Self::invalid_data(error.to_string())
    }
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Quote, FetchError>> + Send + 'a>>;

/// Source adapter contract.
///
/// Implementations must be `Send + Sync`; a fetch may block on network I/O
/// up to the adapter's configured timeout. Adapters hold no shared mutable
/// state of their own — health and rate accounting live in the failover
/// chain.
pub trait QuoteSource: Send + Sync {
    /// Unique provider identifier.
    fn id(&self) -> ProviderId;

    /// Fetch and normalize the latest quote for one symbol.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] classified per [`FetchErrorKind`]; never a
    /// partially populated quote.
    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a>;
}
