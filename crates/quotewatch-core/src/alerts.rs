//! Percent-change alerts with per-symbol cooldown and an append-only history.
//!
//! Evaluation runs only when the cache reports a changed quote. Once an
//! alert fires for a symbol, the symbol stays quiet for the cooldown window
//! regardless of direction, so an oscillating price cannot storm the sink.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{error, info};

use crate::{Quote, Symbol, UtcDateTime, ValidationError};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Which threshold the percent change crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertDirection {
    Up,
    Down,
}

impl Display for AlertDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Up => "up",
            Self::Down => "down",
        })
    }
}

/// Percent-change thresholds for one symbol. A zero threshold disables that
/// direction; at least one direction must be enabled. Thresholds are
/// magnitudes: `down_threshold = 1.5` fires at a change of -1.5% or worse.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AlertRule {
    pub up_threshold: f64,
    pub down_threshold: f64,
}

impl AlertRule {
    pub fn new(up_threshold: f64, down_threshold: f64) -> Result<Self, ValidationError> {
        for (field, value) in [
            ("up_threshold", up_threshold),
            ("down_threshold", down_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidThreshold { field });
            }
        }
        if up_threshold == 0.0 && down_threshold == 0.0 {
            return Err(ValidationError::InvalidThreshold { field: "rule" });
        }
        Ok(Self {
            up_threshold,
            down_threshold,
        })
    }

    fn crossing(&self, change_percent: f64) -> Option<(AlertDirection, f64)> {
        if self.up_threshold > 0.0 && change_percent >= self.up_threshold {
            Some((AlertDirection::Up, self.up_threshold))
        } else if self.down_threshold > 0.0 && change_percent <= -self.down_threshold {
            Some((AlertDirection::Down, self.down_threshold))
        } else {
            None
        }
    }
}

/// One fired alert.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub symbol: Symbol,
    pub name: String,
    pub price: f64,
    pub change_percent: f64,
    pub direction: AlertDirection,
    pub threshold: f64,
    pub fired_at: UtcDateTime,
}

/// Sink for fired alerts.
pub trait AlertHistory: Send + Sync {
    fn append(&self, alert: &Alert) -> std::io::Result<()>;
}

/// Append-only CSV history, one line per alert:
/// `timestamp,code,price,change_percent,direction`.
pub struct FileAlertHistory {
    path: PathBuf,
}

impl FileAlertHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AlertHistory for FileAlertHistory {
    fn append(&self, alert: &Alert) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "{},{},{:.4},{:.2},{}",
            alert.fired_at.format_rfc3339(),
            alert.symbol,
            alert.price,
            alert.change_percent,
            alert.direction
        )
    }
}

/// Discards alerts; used when no history path is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAlertHistory;

impl AlertHistory for NullAlertHistory {
    fn append(&self, _alert: &Alert) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct AlertEvaluator {
    rules: RwLock<HashMap<Symbol, AlertRule>>,
    last_fired: Mutex<HashMap<Symbol, Instant>>,
    cooldown: Duration,
    history: Arc<dyn AlertHistory>,
}

impl AlertEvaluator {
    pub fn new(
        rules: HashMap<Symbol, AlertRule>,
        cooldown: Duration,
        history: Arc<dyn AlertHistory>,
    ) -> Self {
        Self {
            rules: RwLock::new(rules),
            last_fired: Mutex::new(HashMap::new()),
            cooldown,
            history,
        }
    }

    /// Evaluate a changed quote against its rule, if any. A symbol inside
    /// its cooldown window stays silent even when a threshold is still
    /// crossed.
    pub async fn evaluate(&self, quote: &Quote) -> Option<Alert> {
        let rule = {
            let rules = self.rules.read().await;
            rules.get(&quote.symbol).copied()?
        };
        let (direction, threshold) = rule.crossing(quote.change_percent)?;

        if !self.try_acquire_cooldown(&quote.symbol) {
            return None;
        }

        let alert = Alert {
            symbol: quote.symbol.clone(),
            name: quote.name.clone(),
            price: quote.price,
            change_percent: quote.change_percent,
            direction,
            threshold,
            fired_at: quote.observed_at,
        };

        info!(
            symbol = %alert.symbol,
            change_percent = alert.change_percent,
            threshold = alert.threshold,
            direction = %alert.direction,
            "price alert fired"
        );
        // File I/O stays off the runtime workers.
        let history = Arc::clone(&self.history);
        let record = alert.clone();
        match tokio::task::spawn_blocking(move || history.append(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(symbol = %alert.symbol, error = %e, "failed to append alert history");
            }
            Err(e) => {
                error!(symbol = %alert.symbol, error = %e, "alert history task failed");
            }
        }

        Some(alert)
    }

    /// Swap in a new rule set; cooldown state for removed symbols is kept
    /// until it ages out, which is harmless.
    pub async fn replace_rules(&self, rules: HashMap<Symbol, AlertRule>) {
        *self.rules.write().await = rules;
    }

    fn try_acquire_cooldown(&self, symbol: &Symbol) -> bool {
        let mut last_fired = self
            .last_fired
            .lock()
            .expect("alert cooldown state should not be poisoned");
        let now = Instant::now();
        match last_fired.get(symbol) {
            Some(at) if now.duration_since(*at) < self.cooldown => false,
            _ => {
                last_fired.insert(symbol.clone(), now);
                true
            }
        }
    }
}
