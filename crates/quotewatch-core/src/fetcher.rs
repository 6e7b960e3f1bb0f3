//! Periodic fetch loop tying the chain, cache, calendar, alerts, and event
//! stream together.
//!
//! One tick fetches every watched symbol through the failover chain with
//! bounded concurrency, stores results in the cache, publishes change and
//! alert events, and runs at most one recovery probe. Symbols are
//! independent: one symbol's failure never blocks another's fetch. While
//! the market is closed the loop idles, emitting a single transition event
//! at each open/close edge. The cache expiry sweep runs on a separate timer
//! inside [`QuoteFetcher::run`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::adapters::{
    CompositeAdapter, EastmoneyAdapter, SinaAdapter, TencentAdapter, XueqiuAdapter, YahooAdapter,
};
use crate::alerts::{AlertEvaluator, AlertHistory, AlertRule, FileAlertHistory, NullAlertHistory};
use crate::backoff::RateGate;
use crate::cache::{CacheStats, CachedQuote, QuoteCache};
use crate::calendar::{CnSessionCalendar, MarketCalendar};
use crate::config::{ConfigSnapshot, SourceConfig};
use crate::error::ConfigError;
use crate::events::{EventSender, MonitorEvent, DEFAULT_EVENT_CAPACITY};
use crate::failover::{ExhaustedError, FailoverChain, SourceReport};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::quote_source::QuoteSource;
use crate::{ProviderId, Quote, Symbol};

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub fetched: usize,
    pub failed: usize,
    /// True when the tick idled because the loop is paused or the market
    /// is closed.
    pub idle: bool,
}

/// Point-in-time view of the whole pipeline, for status surfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorStatus {
    pub paused: bool,
    pub market_open: bool,
    pub sources: Vec<SourceReport>,
    pub cache: CacheStats,
    pub dropped_events: u64,
}

struct EngineState {
    snapshot: ConfigSnapshot,
    chain: Arc<FailoverChain>,
}

pub struct QuoteFetcher {
    state: RwLock<Arc<EngineState>>,
    cache: Arc<QuoteCache>,
    evaluator: Arc<AlertEvaluator>,
    calendar: Arc<dyn MarketCalendar>,
    events: EventSender,
    http: Arc<dyn HttpClient>,
    overrides: HashMap<ProviderId, Arc<dyn QuoteSource>>,
    paused: AtomicBool,
    was_open: Mutex<Option<bool>>,
}

impl QuoteFetcher {
    pub fn builder(snapshot: ConfigSnapshot) -> QuoteFetcherBuilder {
        QuoteFetcherBuilder {
            snapshot,
            http: None,
            calendar: None,
            history: None,
            overrides: HashMap::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Run the loop until the task is dropped or aborted. Slow ticks skip
    /// missed deadlines instead of bursting to catch up. The cache sweep
    /// runs on its own timer so eviction is not tied to fetch cadence.
    pub async fn run(self: Arc<Self>) {
        let (refresh, ttl) = {
            let state = self.state.read().await;
            (state.snapshot.refresh_interval, state.snapshot.cache_ttl)
        };
        let mut interval = tokio::time::interval(refresh);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep_interval = tokio::time::interval(ttl);
        sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick().await;
                    debug!(
                        fetched = report.fetched,
                        failed = report.failed,
                        idle = report.idle,
                        "tick complete"
                    );

                    // Reload may have changed the cadence.
                    let refresh = self.state.read().await.snapshot.refresh_interval;
                    if refresh != interval.period() {
                        interval = tokio::time::interval(refresh);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    }
                }
                _ = sweep_interval.tick() => {
                    let state = self.state.read().await.clone();
                    let evicted = self.cache.sweep(&state.snapshot.watched_set()).await;
                    if evicted > 0 {
                        debug!(evicted, "swept expired cache entries");
                    }
                }
            }
        }
    }

    /// One fetch cycle over all watched symbols.
    pub async fn tick(&self) -> TickReport {
        if self.paused.load(Ordering::SeqCst) {
            return TickReport {
                idle: true,
                ..TickReport::default()
            };
        }

        let open = self.market_transition();
        if !open {
            return TickReport {
                idle: true,
                ..TickReport::default()
            };
        }

        let state = self.state.read().await.clone();
        let symbols: Vec<Symbol> = state
            .snapshot
            .symbols
            .iter()
            .map(|watched| watched.symbol.clone())
            .collect();

        let semaphore = Arc::new(Semaphore::new(state.snapshot.max_concurrent_fetches));
        let mut tasks = JoinSet::new();
        for symbol in symbols.iter().cloned() {
            let chain = state.chain.clone();
            let cache = self.cache.clone();
            let evaluator = self.evaluator.clone();
            let events = self.events.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return false;
                };
                fetch_one(&chain, &cache, &evaluator, &events, &symbol).await
            });
        }

        let mut report = TickReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => report.fetched += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    warn!(error = %e, "fetch task panicked");
                    report.failed += 1;
                }
            }
        }

        // At most one recovery probe per tick, off the fan-out budget.
        if state.chain.probe_due() {
            if let Some(symbol) = symbols.first() {
                state.chain.probe(symbol).await;
            }
        }

        report
    }

    /// Fetch one symbol immediately, bypassing the market gate and pause
    /// flag. Cache, events, and alerts behave as in a normal tick.
    pub async fn refresh_symbol(&self, symbol: &Symbol) -> Result<Quote, ExhaustedError> {
        let state = self.state.read().await.clone();
        let quote = state.chain.fetch(symbol).await?;
        self.absorb_quote(quote.clone()).await;
        Ok(quote)
    }

    /// Last stored observation for a symbol, stale entries included.
    pub async fn quote(&self, symbol: &Symbol) -> Option<CachedQuote> {
        self.cache.get(symbol).await
    }

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("fetch loop paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("fetch loop resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Swap in a new validated configuration. The chain and alert rules are
    /// rebuilt; cached quotes survive so a reload never blanks the display.
    pub async fn reload(&self, snapshot: ConfigSnapshot) -> Result<(), ConfigError> {
        let snapshot = snapshot.validated()?;
        let chain = build_chain(&snapshot, &self.http, &self.overrides);
        self.evaluator.replace_rules(alert_rules(&snapshot)).await;

        let mut state = self.state.write().await;
        *state = Arc::new(EngineState {
            snapshot,
            chain: Arc::new(chain),
        });
        info!("configuration reloaded");
        Ok(())
    }

    pub async fn status(&self) -> MonitorStatus {
        let state = self.state.read().await.clone();
        MonitorStatus {
            paused: self.is_paused(),
            market_open: self.calendar.is_open(OffsetDateTime::now_utc()),
            sources: state.chain.reports(),
            cache: self.cache.stats().await,
            dropped_events: self.events.dropped_count(),
        }
    }

    async fn absorb_quote(&self, quote: Quote) {
        absorb(&self.cache, &self.evaluator, &self.events, quote).await;
    }

    /// Compare the calendar against the last observed state and publish a
    /// transition event on each edge, including the first tick.
    fn market_transition(&self) -> bool {
        let open = self.calendar.is_open(OffsetDateTime::now_utc());
        let mut was_open = self
            .was_open
            .lock()
            .expect("market state should not be poisoned");
        if *was_open != Some(open) {
            *was_open = Some(open);
            if open {
                info!("market opened, resuming fetches");
                self.events.publish(MonitorEvent::MarketOpened);
            } else {
                info!("market closed, idling");
                self.events.publish(MonitorEvent::MarketClosed);
            }
        }
        open
    }
}

async fn fetch_one(
    chain: &FailoverChain,
    cache: &QuoteCache,
    evaluator: &AlertEvaluator,
    events: &EventSender,
    symbol: &Symbol,
) -> bool {
    match chain.fetch(symbol).await {
        Ok(quote) => {
            absorb(cache, evaluator, events, quote).await;
            true
        }
        Err(error) => {
            let streak = cache.record_failure(symbol).await;
            debug!(symbol = %symbol, streak, error = %error, "all sources failed, serving cache");
            false
        }
    }
}

/// Store a fresh quote and publish the resulting change and alert events.
/// Alerts only run on changed quotes; an unchanged price cannot newly cross
/// a threshold.
async fn absorb(
    cache: &QuoteCache,
    evaluator: &AlertEvaluator,
    events: &EventSender,
    quote: Quote,
) {
    let store = cache.store(quote.clone()).await;
    if store.changed {
        events.publish(MonitorEvent::QuoteChanged {
            quote: quote.clone(),
            previous: store.previous,
        });
        if let Some(alert) = evaluator.evaluate(&quote).await {
            events.publish(MonitorEvent::Alert(alert));
        }
    }
}

fn alert_rules(snapshot: &ConfigSnapshot) -> HashMap<Symbol, AlertRule> {
    snapshot
        .symbols
        .iter()
        .filter_map(|watched| watched.alert.map(|rule| (watched.symbol.clone(), rule)))
        .collect()
}

fn build_chain(
    snapshot: &ConfigSnapshot,
    http: &Arc<dyn HttpClient>,
    overrides: &HashMap<ProviderId, Arc<dyn QuoteSource>>,
) -> FailoverChain {
    let mut builder = FailoverChain::builder()
        .failure_threshold(snapshot.failure_threshold)
        .probe_interval(snapshot.probe_interval);

    for source_config in &snapshot.sources {
        let source = overrides
            .get(&source_config.provider)
            .cloned()
            .unwrap_or_else(|| build_source(source_config, http));
        let gate = RateGate::new(source_config.gate.clone());
        builder = if source_config.enabled {
            builder.source(source, gate)
        } else {
            builder.disabled_source(source, gate)
        };
    }

    builder.build()
}

fn build_source(config: &SourceConfig, http: &Arc<dyn HttpClient>) -> Arc<dyn QuoteSource> {
    let timeout = config.timeout;
    match config.provider {
        ProviderId::Eastmoney => {
            Arc::new(EastmoneyAdapter::new(http.clone()).with_timeout(timeout))
        }
        ProviderId::Sina => Arc::new(SinaAdapter::new(http.clone()).with_timeout(timeout)),
        ProviderId::Tencent => Arc::new(TencentAdapter::new(http.clone()).with_timeout(timeout)),
        ProviderId::Xueqiu => Arc::new(XueqiuAdapter::new(http.clone()).with_timeout(timeout)),
        ProviderId::Yahoo => Arc::new(YahooAdapter::new(http.clone()).with_timeout(timeout)),
        ProviderId::Composite => Arc::new(CompositeAdapter::new(
            Arc::new(SinaAdapter::new(http.clone()).with_timeout(timeout)),
            Arc::new(TencentAdapter::new(http.clone()).with_timeout(timeout)),
            Arc::new(YahooAdapter::new(http.clone()).with_timeout(timeout)),
            Arc::new(XueqiuAdapter::new(http.clone()).with_timeout(timeout)),
        )),
    }
}

pub struct QuoteFetcherBuilder {
    snapshot: ConfigSnapshot,
    http: Option<Arc<dyn HttpClient>>,
    calendar: Option<Arc<dyn MarketCalendar>>,
    history: Option<Arc<dyn AlertHistory>>,
    overrides: HashMap<ProviderId, Arc<dyn QuoteSource>>,
    event_capacity: usize,
}

impl QuoteFetcherBuilder {
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn calendar(mut self, calendar: Arc<dyn MarketCalendar>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn alert_history(mut self, history: Arc<dyn AlertHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Replace the adapter for one provider; later chain rebuilds keep the
    /// replacement.
    pub fn source(mut self, provider: ProviderId, source: Arc<dyn QuoteSource>) -> Self {
        self.overrides.insert(provider, source);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<(Arc<QuoteFetcher>, mpsc::Receiver<MonitorEvent>), ConfigError> {
        let snapshot = self.snapshot.validated()?;
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let calendar = self
            .calendar
            .unwrap_or_else(|| Arc::new(CnSessionCalendar));
        let history: Arc<dyn AlertHistory> = match self.history {
            Some(history) => history,
            None => match &snapshot.alert_history_path {
                Some(path) => Arc::new(FileAlertHistory::new(path.clone())),
                None => Arc::new(NullAlertHistory),
            },
        };

        let chain = build_chain(&snapshot, &http, &self.overrides);
        let evaluator = Arc::new(AlertEvaluator::new(
            alert_rules(&snapshot),
            snapshot.alert_cooldown,
            history,
        ));
        let cache = Arc::new(QuoteCache::new(snapshot.cache_ttl));
        let (events, rx) = EventSender::channel(self.event_capacity);

        let fetcher = Arc::new(QuoteFetcher {
            state: RwLock::new(Arc::new(EngineState {
                snapshot,
                chain: Arc::new(chain),
            })),
            cache,
            evaluator,
            calendar,
            events,
            http,
            overrides: self.overrides,
            paused: AtomicBool::new(false),
            was_open: Mutex::new(None),
        });
        Ok((fetcher, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::StaticCalendar;
    use crate::config::WatchedSymbol;
    use crate::quote_source::{FetchError, FetchFuture};
    use crate::UtcDateTime;
    use std::sync::atomic::AtomicUsize;

    struct SequenceSource {
        prices: Vec<Result<f64, ()>>,
        calls: AtomicUsize,
    }

    impl SequenceSource {
        fn new(prices: Vec<Result<f64, ()>>) -> Arc<Self> {
            Arc::new(Self {
                prices,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl QuoteSource for SequenceSource {
        fn id(&self) -> ProviderId {
            ProviderId::Eastmoney
        }

        fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .prices
                .get(call.min(self.prices.len().saturating_sub(1)))
                .copied()
                .unwrap_or(Err(()));
            let symbol = symbol.clone();
            Box::pin(async move {
                match step {
                    Ok(price) => Ok(Quote::new(
                        symbol,
                        "医疗ETF",
                        price,
                        3.63,
                        None,
                        UtcDateTime::now(),
                        ProviderId::Eastmoney,
                    )
                    .expect("quote")),
                    Err(()) => Err(FetchError::network("connection refused")),
                }
            })
        }
    }

    fn snapshot() -> ConfigSnapshot {
        ConfigSnapshot {
            symbols: vec![WatchedSymbol {
                symbol: Symbol::parse("512170").expect("symbol"),
                alert: None,
            }],
            sources: vec![SourceConfig::enabled(ProviderId::Eastmoney)],
            ..ConfigSnapshot::default()
        }
    }

    fn fetcher_with(
        source: Arc<dyn QuoteSource>,
        calendar: Arc<dyn MarketCalendar>,
    ) -> (Arc<QuoteFetcher>, mpsc::Receiver<MonitorEvent>) {
        QuoteFetcher::builder(snapshot())
            .source(ProviderId::Eastmoney, source)
            .calendar(calendar)
            .build()
            .expect("fetcher")
    }

    #[tokio::test]
    async fn tick_stores_and_publishes_changes() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let source = SequenceSource::new(vec![Ok(3.63), Ok(3.63), Ok(3.64)]);
        let (fetcher, mut rx) = fetcher_with(source, Arc::new(StaticCalendar::open()));

        let report = fetcher.tick().await;
        assert_eq!(report.fetched, 1);

        // First tick also announces the open market.
        assert_eq!(rx.recv().await, Some(MonitorEvent::MarketOpened));
        let Some(MonitorEvent::QuoteChanged { quote, previous }) = rx.recv().await else {
            panic!("expected a change event");
        };
        assert_eq!(quote.price, 3.63);
        assert!(previous.is_none());

        // Identical price: no event.
        fetcher.tick().await;
        // Moved price: one event.
        fetcher.tick().await;
        let Some(MonitorEvent::QuoteChanged { quote, previous }) = rx.recv().await else {
            panic!("expected a change event");
        };
        assert_eq!(quote.price, 3.64);
        assert_eq!(previous.expect("previous").price, 3.63);
    }

    #[tokio::test]
    async fn closed_market_idles_with_one_event() {
        let source = SequenceSource::new(vec![Ok(3.63)]);
        let inner = source.clone();
        let (fetcher, mut rx) = fetcher_with(source, Arc::new(StaticCalendar::closed()));

        let report = fetcher.tick().await;
        assert!(report.idle);
        fetcher.tick().await;

        assert_eq!(rx.recv().await, Some(MonitorEvent::MarketClosed));
        assert!(rx.try_recv().is_err());
        assert_eq!(inner.calls(), 0);
    }

    #[tokio::test]
    async fn market_open_transition_resumes_fetches() {
        let source = SequenceSource::new(vec![Ok(3.63)]);
        let calendar = Arc::new(StaticCalendar::closed());
        let (fetcher, mut rx) = fetcher_with(source, calendar.clone());

        fetcher.tick().await;
        assert_eq!(rx.recv().await, Some(MonitorEvent::MarketClosed));

        calendar.set_open(true);
        let report = fetcher.tick().await;
        assert_eq!(report.fetched, 1);
        assert_eq!(rx.recv().await, Some(MonitorEvent::MarketOpened));
    }

    #[tokio::test]
    async fn paused_loop_skips_fetching() {
        let source = SequenceSource::new(vec![Ok(3.63)]);
        let inner = source.clone();
        let (fetcher, _rx) = fetcher_with(source, Arc::new(StaticCalendar::open()));

        fetcher.pause();
        let report = fetcher.tick().await;
        assert!(report.idle);
        assert_eq!(inner.calls(), 0);

        fetcher.resume();
        let report = fetcher.tick().await;
        assert_eq!(report.fetched, 1);
    }

    #[tokio::test]
    async fn manual_refresh_bypasses_the_market_gate() {
        let source = SequenceSource::new(vec![Ok(3.63)]);
        let (fetcher, _rx) = fetcher_with(source, Arc::new(StaticCalendar::closed()));
        let symbol = Symbol::parse("512170").expect("symbol");

        let quote = fetcher.refresh_symbol(&symbol).await.expect("quote");
        assert_eq!(quote.price, 3.63);
        assert_eq!(
            fetcher.quote(&symbol).await.expect("cached").quote.price,
            3.63
        );
    }

    #[tokio::test]
    async fn failed_tick_serves_the_cached_quote() {
        let source = SequenceSource::new(vec![Ok(3.63), Err(())]);
        let (fetcher, _rx) = fetcher_with(source, Arc::new(StaticCalendar::open()));
        let symbol = Symbol::parse("512170").expect("symbol");

        fetcher.tick().await;
        let report = fetcher.tick().await;
        assert_eq!(report.failed, 1);

        let cached = fetcher.quote(&symbol).await.expect("cached");
        assert_eq!(cached.quote.price, 3.63);
        assert_eq!(cached.error_count, 1);
    }

    #[tokio::test]
    async fn reload_swaps_symbols_without_dropping_cache() {
        let source = SequenceSource::new(vec![Ok(3.63), Ok(3.64)]);
        let (fetcher, _rx) = fetcher_with(source.clone(), Arc::new(StaticCalendar::open()));
        let symbol = Symbol::parse("512170").expect("symbol");

        fetcher.tick().await;
        assert!(fetcher.quote(&symbol).await.is_some());

        let mut next = snapshot();
        next.symbols = vec![WatchedSymbol {
            symbol: Symbol::parse("159915").expect("symbol"),
            alert: None,
        }];
        fetcher.reload(next).await.expect("reload");

        // Old entry survives the reload; ticks now fetch the new symbol.
        assert!(fetcher.quote(&symbol).await.is_some());
        fetcher.tick().await;
        assert!(fetcher
            .quote(&Symbol::parse("159915").expect("symbol"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn status_reports_sources_and_cache() {
        let source = SequenceSource::new(vec![Ok(3.63)]);
        let (fetcher, _rx) = fetcher_with(source, Arc::new(StaticCalendar::open()));

        fetcher.tick().await;
        let status = fetcher.status().await;

        assert!(!status.paused);
        assert!(status.market_open);
        assert_eq!(status.sources.len(), 1);
        assert_eq!(status.cache.size, 1);
    }
}
