//! Xueqiu quote adapter.
//!
//! JSON endpoint covering both CN and US listings; symbols are sent in
//! Xueqiu's uppercase form (`SH512170`, plain ticker for US). A non-zero
//! `error_code` marks a well-formed provider-side refusal.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::adapters::{status_error, transport_error};
use crate::http_client::{HttpClient, HttpRequest};
use crate::quote_source::{FetchError, FetchFuture, QuoteSource};
use crate::{ProviderId, Quote, Symbol, UtcDateTime};

const DEFAULT_BASE_URL: &str = "https://stock.xueqiu.com/v5/stock/quote.json";

pub struct XueqiuAdapter {
    http: Arc<dyn HttpClient>,
    base_url: String,
    timeout: Duration,
}

impl XueqiuAdapter {
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

impl QuoteSource for XueqiuAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Xueqiu
    }

    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a> {
        Box::pin(async move {
            let url = format!(
                "{}?symbol={}",
                self.base_url,
                urlencoding::encode(&symbol.xueqiu_code())
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
    error_code: i64,
    error_description: Option<String>,
    data: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    quote: Option<QuoteFields>,
}

#[derive(Debug, Deserialize)]
struct QuoteFields {
    name: Option<String>,
    current: Option<f64>,
    last_close: Option<f64>,
    volume: Option<u64>,
}

fn parse_quote(
    symbol: &Symbol,
    body: &str,
    observed_at: UtcDateTime,
) -> Result<Quote, FetchError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| FetchError::parse(format!("xueqiu response is not valid JSON: {e}")))?;

    if envelope.error_code != 0 {
        let description = envelope
            .error_description
            .unwrap_or_else(|| "no description".to_string());
        return Err(FetchError::parse(format!(
            "xueqiu refused the request: error_code={} ({description})",
            envelope.error_code
        )));
    }

    let fields = envelope
        .data
        .and_then(|data| data.quote)
        .ok_or_else(|| FetchError::parse("xueqiu response has no quote object"))?;

    let price = fields
        .current
        .ok_or_else(|| FetchError::invalid_data("xueqiu quote has no current price"))?;
    let prev_close = fields
        .last_close
        .ok_or_else(|| FetchError::invalid_data("xueqiu quote has no last close"))?;

    Ok(Quote::new(
        symbol.clone(),
        fields.name.unwrap_or_default(),
        price,
        prev_close,
        fields.volume,
        observed_at,
        ProviderId::Xueqiu,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpResponse, ScriptedHttpClient};
    use crate::quote_source::FetchErrorKind;

    const BODY: &str = r#"{
        "error_code": 0,
        "error_description": "",
        "data": {
            "quote": {
                "symbol": "SH512170",
                "name": "医疗ETF",
                "current": 3.64,
                "last_close": 3.63,
                "volume": 128834933
            }
        }
    }"#;

    #[tokio::test]
    async fn parses_cn_quote() {
        let http =
            Arc::new(ScriptedHttpClient::new().respond_with(Ok(HttpResponse::ok(BODY))));
        let adapter = XueqiuAdapter::new(http.clone());

        let quote = adapter
            .fetch(&Symbol::parse("512170").expect("symbol"))
            .await
            .expect("quote");

        assert_eq!(quote.price, 3.64);
        assert_eq!(quote.prev_close, 3.63);
        assert_eq!(quote.source, ProviderId::Xueqiu);
        assert!(http.recorded_requests()[0].url.contains("symbol=SH512170"));
    }

    #[tokio::test]
    async fn us_tickers_pass_through_unprefixed() {
        let http =
            Arc::new(ScriptedHttpClient::new().respond_with(Ok(HttpResponse::ok(BODY))));
        let adapter = XueqiuAdapter::new(http.clone());

        let _ = adapter
            .fetch(&Symbol::parse("spy").expect("symbol"))
            .await;

        assert!(http.recorded_requests()[0].url.contains("symbol=SPY"));
    }

    #[tokio::test]
    async fn provider_refusal_is_a_parse_error() {
        let body = r#"{"error_code":400016,"error_description":"auth required","data":null}"#;
        let http =
            Arc::new(ScriptedHttpClient::new().respond_with(Ok(HttpResponse::ok(body))));
        let adapter = XueqiuAdapter::new(http);

        let error = adapter
            .fetch(&Symbol::parse("512170").expect("symbol"))
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), FetchErrorKind::Parse);
        assert!(error.message().contains("auth required"));
    }
}
