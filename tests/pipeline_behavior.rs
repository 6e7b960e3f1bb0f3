//! End-to-end behavior of the fetch pipeline: scripted wire payloads in,
//! cache entries and events out.

use std::sync::Arc;

use quotewatch_core::{
    http_client::{HttpError, HttpResponse, ScriptedHttpClient},
    CachedQuote, ConfigSnapshot, EastmoneyAdapter, MonitorEvent, ProviderId, QuoteFetcher,
    SourceConfig, StaticCalendar, Symbol, WatchedSymbol,
};

fn eastmoney_body(f43: i64, f60: i64) -> String {
    format!(
        r#"{{"rc":0,"data":{{"f43":{f43},"f44":366,"f46":128834933,"f57":"512170","f58":"医疗ETF","f60":{f60}}}}}"#
    )
}

fn symbol() -> Symbol {
    Symbol::parse("512170").expect("valid symbol")
}

fn snapshot() -> ConfigSnapshot {
    ConfigSnapshot {
        symbols: vec![WatchedSymbol {
            symbol: symbol(),
            alert: None,
        }],
        sources: vec![SourceConfig::enabled(ProviderId::Eastmoney)],
        ..ConfigSnapshot::default()
    }
}

fn pipeline(
    http: Arc<ScriptedHttpClient>,
    calendar: Arc<StaticCalendar>,
) -> (
    Arc<QuoteFetcher>,
    tokio::sync::mpsc::Receiver<MonitorEvent>,
) {
    QuoteFetcher::builder(snapshot())
        .source(ProviderId::Eastmoney, Arc::new(EastmoneyAdapter::new(http)))
        .calendar(calendar)
        .build()
        .expect("valid pipeline")
}

// =============================================================================
// Pipeline: normalization end to end
// =============================================================================

#[tokio::test]
async fn when_eastmoney_answers_in_subunits_the_cache_holds_decimal_prices() {
    // Given: f43=364 / f60=363 on the wire
    let http = Arc::new(ScriptedHttpClient::new());
    http.push(Ok(HttpResponse::ok(eastmoney_body(364, 363))));
    let (fetcher, _events) = pipeline(http, Arc::new(StaticCalendar::open()));

    // When: one tick runs
    let report = fetcher.tick().await;
    assert_eq!(report.fetched, 1);

    // Then: the cached quote is scaled and the percent is recomputed
    let CachedQuote { quote, stale, .. } = fetcher.quote(&symbol()).await.expect("cached");
    assert!(!stale);
    assert_eq!(quote.price, 3.64);
    assert_eq!(quote.prev_close, 3.63);
    let expected_percent = (3.64 - 3.63) / 3.63 * 100.0;
    assert_eq!(quote.change_percent, expected_percent);
    assert!((quote.change_percent - 0.2755).abs() < 0.001);
}

// =============================================================================
// Pipeline: change detection
// =============================================================================

#[tokio::test]
async fn when_the_price_does_not_move_no_change_event_is_published() {
    // Given: two identical observations, then a move
    let http = Arc::new(ScriptedHttpClient::new());
    http.push(Ok(HttpResponse::ok(eastmoney_body(364, 363))));
    http.push(Ok(HttpResponse::ok(eastmoney_body(364, 363))));
    http.push(Ok(HttpResponse::ok(eastmoney_body(365, 363))));
    let (fetcher, mut events) = pipeline(http, Arc::new(StaticCalendar::open()));

    // When: three ticks run
    for _ in 0..3 {
        fetcher.tick().await;
    }

    // Then: exactly one open event and two change events, none for the repeat
    assert_eq!(events.recv().await, Some(MonitorEvent::MarketOpened));
    let Some(MonitorEvent::QuoteChanged { quote, previous }) = events.recv().await else {
        panic!("expected the first observation as a change");
    };
    assert_eq!(quote.price, 3.64);
    assert!(previous.is_none());
    let Some(MonitorEvent::QuoteChanged { quote, previous }) = events.recv().await else {
        panic!("expected the moved price as a change");
    };
    assert_eq!(quote.price, 3.65);
    assert_eq!(previous.expect("previous").price, 3.64);
    assert!(events.try_recv().is_err());
}

// =============================================================================
// Pipeline: market gating
// =============================================================================

#[tokio::test]
async fn when_the_market_is_closed_no_requests_go_out() {
    // Given: a closed calendar
    let http = Arc::new(ScriptedHttpClient::new());
    http.push(Ok(HttpResponse::ok(eastmoney_body(364, 363))));
    let (fetcher, mut events) = pipeline(http.clone(), Arc::new(StaticCalendar::closed()));

    // When: several ticks run while closed
    for _ in 0..3 {
        let report = fetcher.tick().await;
        assert!(report.idle);
    }

    // Then: zero upstream requests and exactly one closed event
    assert_eq!(http.request_count(), 0);
    assert_eq!(events.recv().await, Some(MonitorEvent::MarketClosed));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn when_the_market_reopens_fetching_resumes_with_one_open_event() {
    // Given: a calendar that starts closed
    let http = Arc::new(ScriptedHttpClient::new());
    http.push(Ok(HttpResponse::ok(eastmoney_body(364, 363))));
    let calendar = Arc::new(StaticCalendar::closed());
    let (fetcher, mut events) = pipeline(http.clone(), calendar.clone());

    fetcher.tick().await;
    assert_eq!(events.recv().await, Some(MonitorEvent::MarketClosed));

    // When: the market opens
    calendar.set_open(true);
    let report = fetcher.tick().await;

    // Then: the tick fetches and announces the transition once
    assert_eq!(report.fetched, 1);
    assert_eq!(http.request_count(), 1);
    assert_eq!(events.recv().await, Some(MonitorEvent::MarketOpened));
}

// =============================================================================
// Pipeline: serving the cache through outages
// =============================================================================

#[tokio::test]
async fn when_all_sources_fail_the_last_quote_stays_readable() {
    // Given: one good observation followed by an outage
    let http = Arc::new(ScriptedHttpClient::new());
    http.push(Ok(HttpResponse::ok(eastmoney_body(364, 363))));
    http.push(Err(HttpError::new("connection refused")));
    http.push(Err(HttpError::new("connection refused")));
    let (fetcher, _events) = pipeline(http, Arc::new(StaticCalendar::open()));

    fetcher.tick().await;

    // When: two ticks fail outright
    for _ in 0..2 {
        let report = fetcher.tick().await;
        assert_eq!(report.failed, 1);
    }

    // Then: the cache still serves the last observation, with the streak
    let cached = fetcher.quote(&symbol()).await.expect("cached");
    assert_eq!(cached.quote.price, 3.64);
    assert_eq!(cached.error_count, 2);
}

// =============================================================================
// Pipeline: configuration
// =============================================================================

#[tokio::test]
async fn when_config_comes_from_json_the_pipeline_honors_it() {
    // Given: a JSON document with a watched symbol and a single source
    let snapshot = ConfigSnapshot::from_json(
        r#"{
            "symbols": [{"code": "512170"}],
            "refresh_interval_secs": 10,
            "sources": [{"provider": "eastmoney"}]
        }"#,
    )
    .expect("valid config");
    assert_eq!(snapshot.refresh_interval.as_secs(), 10);

    let http = Arc::new(ScriptedHttpClient::new());
    http.push(Ok(HttpResponse::ok(eastmoney_body(364, 363))));
    let (fetcher, _events) = QuoteFetcher::builder(snapshot)
        .source(ProviderId::Eastmoney, Arc::new(EastmoneyAdapter::new(http)))
        .calendar(Arc::new(StaticCalendar::open()))
        .build()
        .expect("valid pipeline");

    // When / Then: the pipeline fetches the configured symbol
    let report = fetcher.tick().await;
    assert_eq!(report.fetched, 1);
    assert!(fetcher.quote(&symbol()).await.is_some());
}

#[tokio::test]
async fn when_a_reload_changes_the_watch_list_old_entries_survive() {
    // Given: a running pipeline with one cached symbol
    let http = Arc::new(ScriptedHttpClient::new());
    http.push(Ok(HttpResponse::ok(eastmoney_body(364, 363))));
    http.push(Ok(HttpResponse::ok(eastmoney_body(210, 208))));
    let (fetcher, _events) = pipeline(http, Arc::new(StaticCalendar::open()));
    fetcher.tick().await;

    // When: the watch list is swapped to a different symbol
    let mut next = snapshot();
    next.symbols = vec![WatchedSymbol {
        symbol: Symbol::parse("159915").expect("valid symbol"),
        alert: None,
    }];
    fetcher.reload(next).await.expect("reload");
    fetcher.tick().await;

    // Then: both the old and new entries are readable
    assert!(fetcher.quote(&symbol()).await.is_some());
    assert!(fetcher
        .quote(&Symbol::parse("159915").expect("valid symbol"))
        .await
        .is_some());
}
