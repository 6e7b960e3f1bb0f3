//! Yahoo Finance v8 chart adapter for US-listed instruments.
//!
//! Only the `chart.result[0].meta` block is read; the candle arrays are
//! ignored. `chartPreviousClose` is the session-stable previous close.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::adapters::{status_error, transport_error};
use crate::http_client::{HttpClient, HttpRequest};
use crate::quote_source::{FetchError, FetchFuture, QuoteSource};
use crate::{ProviderId, Quote, Symbol, UtcDateTime};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart/";

pub struct YahooAdapter {
    http: Arc<dyn HttpClient>,
    base_url: String,
    timeout: Duration,
}

impl YahooAdapter {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl QuoteSource for YahooAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Yahoo
    }

    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a> {
        Box::pin(async move {
            let url = format!(
                "{}{}?interval=1d&range=1d",
                self.base_url,
                urlencoding::encode(symbol.code())
            );
            let request = HttpRequest::get(url).with_timeout(self.timeout);
            let response = self
                .http
                .execute(request)
                .await
                .map_err(|e| transport_error(self.id(), &e))?;
            if !response.is_success() {
                return Err(status_error(self.id(), &response));
            }
            parse_quote(symbol, &response.body, UtcDateTime::now())
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: Meta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    short_name: Option<String>,
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    regular_market_volume: Option<u64>,
}

fn parse_quote(
    symbol: &Symbol,
    body: &str,
    observed_at: UtcDateTime,
) -> Result<Quote, FetchError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| FetchError::parse(format!("yahoo response is not valid JSON: {e}")))?;

    if let Some(error) = envelope.chart.error {
        return Err(FetchError::parse(format!(
            "yahoo chart error: {} ({})",
            error.code.unwrap_or_default(),
            error.description.unwrap_or_default()
        )));
    }

    let meta = envelope
        .chart
        .result
        .and_then(|mut results| {
            if results.is_empty() {
                None
            } else {
                Some(results.swap_remove(0).meta)
            }
        })
        .ok_or_else(|| FetchError::parse("yahoo chart has no result entry"))?;

    let price = meta
        .regular_market_price
        .ok_or_else(|| FetchError::invalid_data("yahoo meta has no regular market price"))?;
    let prev_close = meta
        .chart_previous_close
        .ok_or_else(|| FetchError::invalid_data("yahoo meta has no previous close"))?;

    Ok(Quote::new(
        symbol.clone(),
        meta.short_name.unwrap_or_default(),
        price,
        prev_close,
        meta.regular_market_volume,
        observed_at,
        ProviderId::Yahoo,
    )?)
}
