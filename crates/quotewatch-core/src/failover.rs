//! Ranked failover chain with health tracking and recovery probing.
//!
//! Sources are ranked by configuration order. A fetch walks the chain from
//! the top, skipping degraded and disabled sources and any source whose rate
//! gate is holding. Three consecutive failures degrade a source — logged at
//! WARN exactly once per transition — and schedule a recovery probe; a
//! successful probe reactivates it, restoring the original ranking.

use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backoff::{FetchOutcome, RateGate};
use crate::quote_source::{FetchError, QuoteSource};
use crate::{ProviderId, Quote, Symbol};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(300);

/// Health of one ranked source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    /// In the rotation.
    Active,
    /// Out of the rotation; probed for recovery on a schedule.
    Degraded,
    /// Administratively off; never fetched or probed.
    Disabled,
}

#[derive(Debug)]
struct SourceHealth {
    status: SourceStatus,
    consecutive_failures: u32,
    next_probe_at: Option<Instant>,
}

struct RankedSource {
    source: Arc<dyn QuoteSource>,
    gate: RateGate,
    health: Mutex<SourceHealth>,
}

impl RankedSource {
    fn new(source: Arc<dyn QuoteSource>, gate: RateGate, enabled: bool) -> Self {
        let status = if enabled {
            SourceStatus::Active
        } else {
            SourceStatus::Disabled
        };
        Self {
            source,
            gate,
            health: Mutex::new(SourceHealth {
                status,
                consecutive_failures: 0,
                next_probe_at: None,
            }),
        }
    }

    fn health(&self) -> std::sync::MutexGuard<'_, SourceHealth> {
        self.health
            .lock()
            .expect("source health should not be poisoned")
    }
}

/// One failed attempt inside an exhausted walk.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceAttempt {
    pub provider: ProviderId,
    pub error: FetchError,
}

/// Chain-level failure: every eligible source was tried or skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct ExhaustedError {
    pub symbol: Symbol,
    pub attempts: Vec<SourceAttempt>,
}

impl Display for ExhaustedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "all sources exhausted for {}", self.symbol)?;
        for attempt in &self.attempts {
            write!(f, "; {}: {}", attempt.provider, attempt.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExhaustedError {}

/// Snapshot of one source's health, for status surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceReport {
    pub provider: ProviderId,
    pub status: SourceStatus,
    pub consecutive_failures: u32,
}

pub struct FailoverChain {
    sources: Vec<RankedSource>,
    failure_threshold: u32,
    probe_interval: Duration,
}

impl FailoverChain {
    pub fn builder() -> FailoverChainBuilder {
        FailoverChainBuilder::default()
    }

    /// Fetch one symbol, walking the ranked chain.
    pub async fn fetch(&self, symbol: &Symbol) -> Result<Quote, ExhaustedError> {
        let mut attempts = Vec::new();

        for ranked in &self.sources {
            {
                let health = ranked.health();
                if health.status != SourceStatus::Active {
                    continue;
                }
            }
            if let Err(wait) = ranked.gate.check() {
                debug!(
                    provider = %ranked.source.id(),
                    wait_ms = wait.as_millis() as u64,
                    "skipping rate-held source"
                );
                continue;
            }

            match ranked.source.fetch(symbol).await {
                Ok(quote) => {
                    self.record_success(ranked);
                    return Ok(quote);
                }
                Err(error) => {
                    self.record_failure(ranked, symbol, &error);
                    attempts.push(SourceAttempt {
                        provider: ranked.source.id(),
                        error,
                    });
                }
            }
        }

        Err(ExhaustedError {
            symbol: symbol.clone(),
            attempts,
        })
    }

    /// Probe the highest-ranked degraded source whose probe is due. Returns
    /// the provider probed, or `None` when nothing was due.
    pub async fn probe(&self, symbol: &Symbol) -> Option<ProviderId> {
        let now = Instant::now();
        let ranked = self.sources.iter().find(|ranked| {
            let health = ranked.health();
            health.status == SourceStatus::Degraded
                && health.next_probe_at.is_none_or(|at| at <= now)
        })?;

        let provider = ranked.source.id();
        debug!(provider = %provider, symbol = %symbol, "probing degraded source");

        match ranked.source.fetch(symbol).await {
            Ok(_) => {
                let mut health = ranked.health();
                health.status = SourceStatus::Active;
                health.consecutive_failures = 0;
                health.next_probe_at = None;
                drop(health);
                ranked.gate.record(FetchOutcome::Success);
                info!(provider = %provider, "source recovered, restored to rotation");
            }
            Err(error) => {
                let mut health = ranked.health();
                health.next_probe_at = Some(Instant::now() + self.probe_interval);
                drop(health);
                ranked.gate.record(outcome_for(&error));
                debug!(provider = %provider, error = %error, "probe failed, rescheduled");
            }
        }
        Some(provider)
    }

    /// Health snapshot in rank order.
    pub fn reports(&self) -> Vec<SourceReport> {
        self.sources
            .iter()
            .map(|ranked| {
                let health = ranked.health();
                SourceReport {
                    provider: ranked.source.id(),
                    status: health.status,
                    consecutive_failures: health.consecutive_failures,
                }
            })
            .collect()
    }

    /// Whether any degraded source has a probe due now.
    pub fn probe_due(&self) -> bool {
        let now = Instant::now();
        self.sources.iter().any(|ranked| {
            let health = ranked.health();
            health.status == SourceStatus::Degraded
                && health.next_probe_at.is_none_or(|at| at <= now)
        })
    }

    fn record_success(&self, ranked: &RankedSource) {
        ranked.gate.record(FetchOutcome::Success);
        let mut health = ranked.health();
        health.consecutive_failures = 0;
    }

    fn record_failure(&self, ranked: &RankedSource, symbol: &Symbol, error: &FetchError) {
        let provider = ranked.source.id();
        ranked.gate.record(outcome_for(error));

        if error.is_forbidden() {
            if ranked.gate.should_log_forbidden() {
                warn!(provider = %provider, symbol = %symbol, error = %error, "source refused request");
            } else {
                debug!(provider = %provider, symbol = %symbol, error = %error, "source refused request (suppressed)");
            }
        } else {
            debug!(provider = %provider, symbol = %symbol, error = %error, "fetch failed");
        }

        let mut health = ranked.health();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        if health.consecutive_failures >= self.failure_threshold
            && health.status == SourceStatus::Active
        {
            health.status = SourceStatus::Degraded;
            health.next_probe_at = Some(Instant::now() + self.probe_interval);
            warn!(
                provider = %provider,
                failures = health.consecutive_failures,
                "source degraded after consecutive failures, removed from rotation"
            );
        }
    }
}

fn outcome_for(error: &FetchError) -> FetchOutcome {
    if error.is_forbidden() {
        FetchOutcome::Forbidden
    } else if error.kind() == crate::FetchErrorKind::RateLimited {
        FetchOutcome::Throttled {
            retry_after: error.retry_after(),
        }
    } else {
        FetchOutcome::Failed
    }
}

#[derive(Default)]
pub struct FailoverChainBuilder {
    sources: Vec<RankedSource>,
    failure_threshold: Option<u32>,
    probe_interval: Option<Duration>,
}

impl FailoverChainBuilder {
    pub fn source(self, source: Arc<dyn QuoteSource>, gate: RateGate) -> Self {
        self.ranked(source, gate, true)
    }

    pub fn disabled_source(self, source: Arc<dyn QuoteSource>, gate: RateGate) -> Self {
        self.ranked(source, gate, false)
    }

    fn ranked(mut self, source: Arc<dyn QuoteSource>, gate: RateGate, enabled: bool) -> Self {
        self.sources.push(RankedSource::new(source, gate, enabled));
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold.max(1));
        self
    }

    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = Some(interval);
        self
    }

    pub fn build(self) -> FailoverChain {
        FailoverChain {
            sources: self.sources,
            failure_threshold: self.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD),
            probe_interval: self.probe_interval.unwrap_or(DEFAULT_PROBE_INTERVAL),
        }
    }
}
