//! Core engine for quotewatch.
//!
//! This crate contains:
//! - Canonical domain models and validation
//! - Provider adapters and the source trait
//! - Ranked failover with health tracking and recovery probing
//! - Per-provider rate gating and backoff
//! - The TTL quote cache, threshold alerts, and the periodic fetch loop

pub mod adapters;
pub mod alerts;
pub mod backoff;
pub mod cache;
pub mod calendar;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod failover;
pub mod fetcher;
pub mod http_client;
pub mod quote_source;
pub mod source;

pub use adapters::{
    CompositeAdapter, EastmoneyAdapter, SinaAdapter, TencentAdapter, XueqiuAdapter, YahooAdapter,
};
pub use alerts::{
    Alert, AlertDirection, AlertEvaluator, AlertHistory, AlertRule, FileAlertHistory,
    NullAlertHistory,
};
pub use backoff::{FastrandJitter, FetchOutcome, JitterSource, RateGate, RateGatePolicy, ZeroJitter};
pub use cache::{CacheStats, CachedQuote, QuoteCache, StoreResult};
pub use calendar::{CnSessionCalendar, MarketCalendar, StaticCalendar};
pub use config::{ConfigSnapshot, SourceConfig, WatchedSymbol};
pub use domain::{Market, Quote, Symbol, UtcDateTime};
pub use error::{ConfigError, ValidationError};
pub use events::{EventSender, MonitorEvent};
pub use failover::{
    ExhaustedError, FailoverChain, SourceAttempt, SourceReport, SourceStatus,
};
pub use fetcher::{MonitorStatus, QuoteFetcher, QuoteFetcherBuilder, TickReport};
pub use http_client::{
    HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient, ScriptedHttpClient,
};
pub use quote_source::{FetchError, FetchErrorKind, FetchFuture, QuoteSource};
pub use source::ProviderId;
