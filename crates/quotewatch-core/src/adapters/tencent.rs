//! Tencent gtimg quote adapter.
//!
//! Same pseudo-assignment shape as Sina but `~`-delimited and much wider:
//! a healthy payload carries 40+ fields. Index 1 name, 3 latest price,
//! 4 previous close, 6 volume (in lots).

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{status_error, transport_error};
use crate::http_client::{HttpClient, HttpRequest};
use crate::quote_source::{FetchError, FetchFuture, QuoteSource};
use crate::{ProviderId, Quote, Symbol, UtcDateTime};

const DEFAULT_BASE_URL: &str = "https://qt.gtimg.cn/q=";
const MIN_FIELDS: usize = 40;

pub struct TencentAdapter {
    http: Arc<dyn HttpClient>,
    base_url: String,
    timeout: Duration,
}

impl TencentAdapter {
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

impl QuoteSource for TencentAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Tencent
    }

    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a> {
        Box::pin(async move {
            let url = format!("{}{}", self.base_url, symbol.letter_code());
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

fn parse_quote(
    symbol: &Symbol,
    body: &str,
    observed_at: UtcDateTime,
) -> Result<Quote, FetchError> {
    let start = body
        .find('"')
        .ok_or_else(|| FetchError::parse("tencent response has no quoted payload"))?;
    let rest = &body[start + 1..];
    let end = rest
        .find('"')
        .ok_or_else(|| FetchError::parse("tencent response payload is unterminated"))?;
    let inner = &rest[..end];

    let fields: Vec<&str> = inner.split('~').collect();
    if fields.len() < MIN_FIELDS {
        return Err(FetchError::parse(format!(
            "tencent payload has {} fields, expected at least {MIN_FIELDS}",
            fields.len()
        )));
    }

    let name = fields[1].to_string();
    let price = parse_field(fields[3], "price")?;
    let prev_close = parse_field(fields[4], "prev_close")?;
    let volume = fields[6].trim().parse::<f64>().ok().map(|v| v as u64);

    Ok(Quote::new(
        symbol.clone(),
        name,
        price,
        prev_close,
        volume,
        observed_at,
        ProviderId::Tencent,
    )?)
}

fn parse_field(raw: &str, field: &'static str) -> Result<f64, FetchError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| FetchError::parse(format!("tencent field {field} is not numeric: {raw:?}")))
}
