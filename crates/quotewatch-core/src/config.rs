//! Watch configuration: symbols, per-source policies, and loop timing.
//!
//! A [`ConfigSnapshot`] is immutable once validated; hot reload builds a new
//! snapshot and swaps it in atomically rather than mutating a live one.
//! Out-of-range timings are clamped, not rejected, so a sloppy config file
//! degrades to safe values instead of refusing to start.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::alerts::AlertRule;
use crate::backoff::RateGatePolicy;
use crate::error::ConfigError;
use crate::{ProviderId, Symbol};

pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(3);
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
pub const MIN_SOURCE_TIMEOUT: Duration = Duration::from_secs(3);
pub const MAX_SOURCE_TIMEOUT: Duration = Duration::from_secs(5);

/// One watched instrument with its optional alert bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchedSymbol {
    pub symbol: Symbol,
    pub alert: Option<AlertRule>,
}

/// Per-provider fetch policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub provider: ProviderId,
    pub enabled: bool,
    pub timeout: Duration,
    pub gate: RateGatePolicy,
}

impl SourceConfig {
    pub fn enabled(provider: ProviderId) -> Self {
        Self {
            provider,
            enabled: true,
            timeout: MAX_SOURCE_TIMEOUT,
            gate: RateGatePolicy::default(),
        }
    }

    pub fn disabled(provider: ProviderId) -> Self {
        Self {
            enabled: false,
            ..Self::enabled(provider)
        }
    }
}

/// Validated, immutable configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub symbols: Vec<WatchedSymbol>,
    pub refresh_interval: Duration,
    pub sources: Vec<SourceConfig>,
    pub failure_threshold: u32,
    pub probe_interval: Duration,
    pub cache_ttl: Duration,
    pub alert_cooldown: Duration,
    pub alert_history_path: Option<PathBuf>,
    pub max_concurrent_fetches: usize,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            refresh_interval: Duration::from_secs(5),
            sources: vec![
                SourceConfig::enabled(ProviderId::Eastmoney),
                SourceConfig::enabled(ProviderId::Sina),
                SourceConfig::enabled(ProviderId::Tencent),
                SourceConfig::enabled(ProviderId::Composite),
            ],
            failure_threshold: crate::failover::DEFAULT_FAILURE_THRESHOLD,
            probe_interval: crate::failover::DEFAULT_PROBE_INTERVAL,
            cache_ttl: crate::cache::DEFAULT_TTL,
            alert_cooldown: crate::alerts::DEFAULT_COOLDOWN,
            alert_history_path: None,
            max_concurrent_fetches: 8,
        }
    }
}

impl ConfigSnapshot {
    /// Clamp timings into their supported ranges and check structural
    /// invariants. Consumes and returns self so construction reads as a
    /// pipeline.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.refresh_interval = self
            .refresh_interval
            .clamp(MIN_REFRESH_INTERVAL, MAX_REFRESH_INTERVAL);
        for source in &mut self.sources {
            source.timeout = source.timeout.clamp(MIN_SOURCE_TIMEOUT, MAX_SOURCE_TIMEOUT);
        }
        self.failure_threshold = self.failure_threshold.max(1);
        self.max_concurrent_fetches = self.max_concurrent_fetches.max(1);

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.provider) {
                return Err(ConfigError::DuplicateSource {
                    provider: source.provider,
                });
            }
        }
        if !self.sources.iter().any(|source| source.enabled) {
            return Err(ConfigError::NoEnabledSources);
        }

        Ok(self)
    }

    /// Parse and validate a JSON config document.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(input)
            .map_err(|e| ConfigError::Malformed { reason: e.to_string() })?;
        raw.into_snapshot()
    }

    /// The distinct watched symbols, for cache sweeps.
    pub fn watched_set(&self) -> HashSet<Symbol> {
        self.symbols
            .iter()
            .map(|watched| watched.symbol.clone())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    symbols: Vec<RawSymbol>,
    #[serde(default)]
    refresh_interval_secs: Option<u64>,
    #[serde(default)]
    sources: Vec<RawSource>,
    #[serde(default)]
    failure_threshold: Option<u32>,
    #[serde(default)]
    probe_interval_secs: Option<u64>,
    #[serde(default)]
    cache_ttl_secs: Option<u64>,
    #[serde(default)]
    alert_cooldown_secs: Option<u64>,
    #[serde(default)]
    alert_history_path: Option<PathBuf>,
    #[serde(default)]
    max_concurrent_fetches: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawSymbol {
    code: String,
    #[serde(default)]
    up_threshold: Option<f64>,
    #[serde(default)]
    down_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    provider: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    quota_limit: Option<u32>,
    #[serde(default)]
    quota_window_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl RawConfig {
    fn into_snapshot(self) -> Result<ConfigSnapshot, ConfigError> {
        let defaults = ConfigSnapshot::default();

        let mut symbols = Vec::with_capacity(self.symbols.len());
        for raw in self.symbols {
            let symbol = Symbol::parse(&raw.code)?;
            let alert = match (raw.up_threshold, raw.down_threshold) {
                (None, None) => None,
                (up, down) => Some(AlertRule::new(up.unwrap_or(0.0), down.unwrap_or(0.0))?),
            };
            symbols.push(WatchedSymbol { symbol, alert });
        }

        let sources = if self.sources.is_empty() {
            defaults.sources
        } else {
            let mut sources = Vec::with_capacity(self.sources.len());
            for raw in self.sources {
                let provider: ProviderId = raw.provider.parse()?;
                let mut gate = RateGatePolicy::default();
                if let Some(limit) = raw.quota_limit {
                    gate.quota_limit = limit;
                }
                if let Some(window) = raw.quota_window_secs {
                    gate.quota_window = Duration::from_secs(window);
                }
                sources.push(SourceConfig {
                    provider,
                    enabled: raw.enabled,
                    timeout: raw
                        .timeout_secs
                        .map(Duration::from_secs)
                        .unwrap_or(MAX_SOURCE_TIMEOUT),
                    gate,
                });
            }
            sources
        };

        ConfigSnapshot {
            symbols,
            refresh_interval: self
                .refresh_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.refresh_interval),
            sources,
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            probe_interval: self
                .probe_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.probe_interval),
            cache_ttl: self
                .cache_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            alert_cooldown: self
                .alert_cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.alert_cooldown),
            alert_history_path: self.alert_history_path,
            max_concurrent_fetches: self
                .max_concurrent_fetches
                .unwrap_or(defaults.max_concurrent_fetches),
        }
        .validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_interval_is_clamped() {
        let snapshot = ConfigSnapshot {
            refresh_interval: Duration::from_secs(1),
            ..ConfigSnapshot::default()
        }
        .validated()
        .expect("valid");
        assert_eq!(snapshot.refresh_interval, MIN_REFRESH_INTERVAL);

        let snapshot = ConfigSnapshot {
            refresh_interval: Duration::from_secs(120),
            ..ConfigSnapshot::default()
        }
        .validated()
        .expect("valid");
        assert_eq!(snapshot.refresh_interval, MAX_REFRESH_INTERVAL);
    }

    #[test]
    fn all_sources_disabled_is_rejected() {
        let result = ConfigSnapshot {
            sources: vec![SourceConfig::disabled(ProviderId::Eastmoney)],
            ..ConfigSnapshot::default()
        }
        .validated();
        assert!(matches!(result, Err(ConfigError::NoEnabledSources)));
    }

    #[test]
    fn duplicate_providers_are_rejected() {
        let result = ConfigSnapshot {
            sources: vec![
                SourceConfig::enabled(ProviderId::Sina),
                SourceConfig::enabled(ProviderId::Sina),
            ],
            ..ConfigSnapshot::default()
        }
        .validated();
        assert!(matches!(
            result,
            Err(ConfigError::DuplicateSource {
                provider: ProviderId::Sina
            })
        ));
    }

    #[test]
    fn parses_a_full_json_document() {
        let snapshot = ConfigSnapshot::from_json(
            r#"{
                "symbols": [
                    {"code": "512170", "up_threshold": 0.2, "down_threshold": 1.5},
                    {"code": "159915"}
                ],
                "refresh_interval_secs": 10,
                "sources": [
                    {"provider": "eastmoney"},
                    {"provider": "sina", "timeout_secs": 4, "quota_limit": 30},
                    {"provider": "tencent", "enabled": false}
                ],
                "cache_ttl_secs": 120
            }"#,
        )
        .expect("valid config");

        assert_eq!(snapshot.symbols.len(), 2);
        assert!(snapshot.symbols[0].alert.is_some());
        assert!(snapshot.symbols[1].alert.is_none());
        assert_eq!(snapshot.refresh_interval, Duration::from_secs(10));
        assert_eq!(snapshot.sources.len(), 3);
        assert_eq!(snapshot.sources[1].timeout, Duration::from_secs(4));
        assert_eq!(snapshot.sources[1].gate.quota_limit, 30);
        assert!(!snapshot.sources[2].enabled);
        assert_eq!(snapshot.cache_ttl, Duration::from_secs(120));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let result = ConfigSnapshot::from_json("{not json");
        assert!(matches!(result, Err(ConfigError::Malformed { .. })));
    }

    #[test]
    fn bad_symbol_in_config_is_rejected() {
        let result = ConfigSnapshot::from_json(r#"{"symbols": [{"code": "512$170"}]}"#);
        assert!(result.is_err());
    }
}
