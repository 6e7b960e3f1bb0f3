//! Per-provider rate gate: steady-state quota plus exponential backoff.
//!
//! Each provider in the failover chain owns one [`RateGate`]. The gate
//! answers two questions: may we send a request right now ([`RateGate::check`]),
//! and how should the outcome of the last request shape the next attempt
//! ([`RateGate::record`]). Throttling signals open a hold window computed as
//! `base * 2^min(attempt, cap)` plus uniform jitter in `[0, base)`; a
//! provider-supplied `Retry-After` overrides the computed delay. Successful
//! fetches decay the attempt counter one step at a time so a single good
//! response does not erase an established backoff.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Source of backoff jitter, injectable so tests get deterministic delays.
pub trait JitterSource: Send + Sync {
    /// A uniformly distributed duration in `[0, max)`.
    fn jitter(&self, max: Duration) -> Duration;
}

/// Production jitter backed by fastrand.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastrandJitter;

impl JitterSource for FastrandJitter {
    fn jitter(&self, max: Duration) -> Duration {
        max.mul_f64(fastrand::f64())
    }
}

/// No-op jitter for deterministic tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroJitter;

impl JitterSource for ZeroJitter {
    fn jitter(&self, _max: Duration) -> Duration {
        Duration::ZERO
    }
}

/// Outcome of one fetch attempt, as seen by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    /// Explicit throttling signal (429/5xx), optionally carrying the
    /// provider's own `Retry-After`.
    Throttled { retry_after: Option<Duration> },
    /// 403-class refusal; backs off like a throttle but its warning logs
    /// are suppressed inside the noise window.
    Forbidden,
    /// Any other failure; counts toward backoff growth without opening a
    /// hold window of its own.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateGatePolicy {
    /// Steady-state quota window.
    pub quota_window: Duration,
    /// Requests allowed per window.
    pub quota_limit: u32,
    /// Backoff base delay.
    pub base_delay: Duration,
    /// Exponent cap: delays stop doubling after this many attempts.
    pub max_exponent: u32,
    /// Minimum spacing between forbidden-response warning logs.
    pub forbidden_log_window: Duration,
}

impl Default for RateGatePolicy {
    fn default() -> Self {
        Self {
            quota_window: Duration::from_secs(60),
            quota_limit: 20,
            base_delay: Duration::from_secs(1),
            max_exponent: 5,
            forbidden_log_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct GateInner {
    attempt: u32,
    hold_until: Option<Instant>,
    last_forbidden_log: Option<Instant>,
}

pub struct RateGate {
    limiter: Arc<DirectRateLimiter>,
    policy: RateGatePolicy,
    jitter: Arc<dyn JitterSource>,
    inner: Mutex<GateInner>,
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(RateGatePolicy::default())
    }
}

impl RateGate {
    pub fn new(policy: RateGatePolicy) -> Self {
        Self::with_jitter(policy, Arc::new(FastrandJitter))
    }

    pub fn with_jitter(policy: RateGatePolicy, jitter: Arc<dyn JitterSource>) -> Self {
        let quota = quota_from_window(policy.quota_window, policy.quota_limit);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            policy,
            jitter,
            inner: Mutex::new(GateInner::default()),
        }
    }

    /// Whether a request may go out now. Returns the remaining wait when the
    /// gate is holding or the steady-state quota is exhausted.
    pub fn check(&self) -> Result<(), Duration> {
        let now = Instant::now();
        {
            let mut inner = self.lock();
            if let Some(hold_until) = inner.hold_until {
                if hold_until > now {
                    return Err(hold_until - now);
                }
                inner.hold_until = None;
            }
        }

        if self.limiter.check().is_err() {
            return Err(self.policy.base_delay);
        }
        Ok(())
    }

    /// Feed the outcome of the attempt back into the gate.
    pub fn record(&self, outcome: FetchOutcome) {
        let mut inner = self.lock();
        match outcome {
            FetchOutcome::Success => {
                inner.attempt = inner.attempt.saturating_sub(1);
                inner.hold_until = None;
            }
            FetchOutcome::Throttled { retry_after } => {
                inner.attempt = inner.attempt.saturating_add(1);
                let delay = retry_after.unwrap_or_else(|| self.backoff_delay(inner.attempt));
                inner.hold_until = Some(Instant::now() + delay);
            }
            FetchOutcome::Forbidden => {
                inner.attempt = inner.attempt.saturating_add(1);
                let delay = self.backoff_delay(inner.attempt);
                inner.hold_until = Some(Instant::now() + delay);
            }
            FetchOutcome::Failed => {
                inner.attempt = inner.attempt.saturating_add(1);
            }
        }
    }

    /// Backoff delay for the given attempt count, jitter included.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.policy.max_exponent).min(31);
        let scaled = self.policy.base_delay.saturating_mul(1_u32 << exponent);
        scaled + self.jitter.jitter(self.policy.base_delay)
    }

    /// Whether a forbidden response at this moment should be logged at WARN.
    /// Stamps the window when it answers yes, so repeats inside the window
    /// stay quiet.
    pub fn should_log_forbidden(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.last_forbidden_log {
            Some(last) if now.duration_since(last) < self.policy.forbidden_log_window => false,
            _ => {
                inner.last_forbidden_log = Some(now);
                true
            }
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.lock().attempt
    }

    pub fn hold_remaining(&self) -> Option<Duration> {
        let inner = self.lock();
        inner
            .hold_until
            .and_then(|until| until.checked_duration_since(Instant::now()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateInner> {
        self.inner
            .lock()
            .expect("rate gate state should not be poisoned")
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let safe_limit = quota_limit.max(1);
    let burst = NonZeroU32::new(safe_limit).expect("safe limit must be non-zero");

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .expect("period is always greater than zero")
        .allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> RateGate {
        RateGate::with_jitter(RateGatePolicy::default(), Arc::new(ZeroJitter))
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let gate = gate();
        assert_eq!(gate.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(gate.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(gate.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(gate.backoff_delay(5), Duration::from_secs(32));
        assert_eq!(gate.backoff_delay(9), Duration::from_secs(32));
    }

    #[test]
    fn throttle_opens_a_hold_window() {
        let gate = gate();
        assert!(gate.check().is_ok());

        gate.record(FetchOutcome::Throttled { retry_after: None });

        let wait = gate.check().expect_err("gate should hold");
        assert!(wait <= Duration::from_secs(2));
        assert!(wait > Duration::ZERO);
    }

    #[test]
    fn retry_after_overrides_the_computed_delay() {
        let gate = gate();
        gate.record(FetchOutcome::Throttled {
            retry_after: Some(Duration::from_secs(45)),
        });

        let wait = gate.check().expect_err("gate should hold");
        assert!(wait > Duration::from_secs(40));
    }

    #[test]
    fn success_decays_attempts_one_step() {
        let gate = gate();
        gate.record(FetchOutcome::Failed);
        gate.record(FetchOutcome::Failed);
        assert_eq!(gate.attempt_count(), 2);

        gate.record(FetchOutcome::Success);
        assert_eq!(gate.attempt_count(), 1);
    }

    #[test]
    fn quota_exhaustion_returns_the_base_delay() {
        let gate = RateGate::with_jitter(
            RateGatePolicy {
                quota_window: Duration::from_secs(60),
                quota_limit: 2,
                ..RateGatePolicy::default()
            },
            Arc::new(ZeroJitter),
        );

        assert!(gate.check().is_ok());
        assert!(gate.check().is_ok());
        let wait = gate.check().expect_err("quota exhausted");
        assert_eq!(wait, Duration::from_secs(1));
    }

    #[test]
    fn forbidden_logs_are_suppressed_inside_the_window() {
        let gate = gate();
        assert!(gate.should_log_forbidden());
        assert!(!gate.should_log_forbidden());
    }

    #[test]
    fn forbidden_backs_off_like_a_throttle() {
        let gate = gate();
        gate.record(FetchOutcome::Forbidden);
        assert!(gate.check().is_err());
        assert_eq!(gate.attempt_count(), 1);
    }
}
