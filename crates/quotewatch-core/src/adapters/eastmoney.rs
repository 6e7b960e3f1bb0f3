//! EastMoney push2 quote adapter.
//!
//! The endpoint returns a JSON field map keyed `f<NN>`. Prices arrive as
//! integers in 1/100 units: `f43=364` means 3.64. `f43` latest price,
//! `f44` day high, `f46` volume, `f57` code, `f58` name, `f60` previous
//! close. The upstream percent field is ignored.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::adapters::{status_error, transport_error};
use crate::http_client::{HttpClient, HttpRequest};
use crate::quote_source::{FetchError, FetchFuture, QuoteSource};
use crate::{ProviderId, Quote, Symbol, UtcDateTime};

const DEFAULT_BASE_URL: &str = "https://push2.eastmoney.com/api/qt/stock/get";
const FIELDS: &str = "f43,f44,f46,f57,f58,f60";

pub struct EastmoneyAdapter {
    http: Arc<dyn HttpClient>,
    base_url: String,
    timeout: Duration,
}

impl EastmoneyAdapter {
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

    fn request_url(&self, symbol: &Symbol) -> String {
        format!(
            "{}?secid={}&fields={}",
            self.base_url,
            urlencoding::encode(&symbol.secid()),
            FIELDS
        )
    }
}

impl QuoteSource for EastmoneyAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Eastmoney
    }

    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a> {
        Box::pin(async move {
            let request = HttpRequest::get(self.request_url(symbol)).with_timeout(self.timeout);
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
    rc: i64,
    data: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    f43: Option<f64>,
    f46: Option<u64>,
    f58: Option<String>,
    f60: Option<f64>,
}

fn parse_quote(
    symbol: &Symbol,
    body: &str,
    observed_at: UtcDateTime,
) -> Result<Quote, FetchError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| FetchError::parse(format!("eastmoney response is not valid JSON: {e}")))?;

    if envelope.rc != 0 {
        return Err(FetchError::parse(format!(
            "eastmoney flagged the response with rc={}",
            envelope.rc
        )));
    }
    let payload = envelope
        .data
        .ok_or_else(|| FetchError::parse("eastmoney response has no data object"))?;

    let price = payload
        .f43
        .ok_or_else(|| FetchError::invalid_data("eastmoney response has no latest price"))?
        / 100.0;
    let prev_close = payload
        .f60
        .ok_or_else(|| FetchError::invalid_data("eastmoney response has no previous close"))?
        / 100.0;
    let name = payload.f58.unwrap_or_default();

    Ok(Quote::new(
        symbol.clone(),
        name,
        price,
        prev_close,
        payload.f46,
        observed_at,
        ProviderId::Eastmoney,
    )?)
}
