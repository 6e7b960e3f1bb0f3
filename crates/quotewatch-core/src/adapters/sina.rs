//! Sina hq quote adapter.
//!
//! The endpoint answers with a JavaScript pseudo-assignment:
//! `var hq_str_sh512170="医疗ETF,3.630,3.630,3.640,...";`. Fields inside the
//! quotes are comma-delimited: index 0 name, 2 previous close, 3 latest
//! price, 8 volume. The endpoint rejects requests without a finance Referer.

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{status_error, transport_error};
use crate::http_client::{HttpClient, HttpRequest};
use crate::quote_source::{FetchError, FetchFuture, QuoteSource};
use crate::{ProviderId, Quote, Symbol, UtcDateTime};

const DEFAULT_BASE_URL: &str = "https://hq.sinajs.cn/list=";
const REFERER: &str = "https://finance.sina.com.cn";
const MIN_FIELDS: usize = 10;

pub struct SinaAdapter {
    http: Arc<dyn HttpClient>,
    base_url: String,
    timeout: Duration,
}

impl SinaAdapter {
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

impl QuoteSource for SinaAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Sina
    }

    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a> {
        Box::pin(async move {
            let url = format!("{}{}", self.base_url, symbol.letter_code());
            let request = HttpRequest::get(url)
                .with_header("referer", REFERER)
                .with_timeout(self.timeout);
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
        .ok_or_else(|| FetchError::parse("sina response has no quoted payload"))?;
    let rest = &body[start + 1..];
    let end = rest
        .find('"')
        .ok_or_else(|| FetchError::parse("sina response payload is unterminated"))?;
    let inner = &rest[..end];

    let fields: Vec<&str> = inner.split(',').collect();
    if fields.len() < MIN_FIELDS {
        return Err(FetchError::parse(format!(
            "sina payload has {} fields, expected at least {MIN_FIELDS}",
            fields.len()
        )));
    }

    let name = fields[0].to_string();
    let prev_close = parse_field(fields[2], "prev_close")?;
    let price = parse_field(fields[3], "price")?;
    let volume = fields[8].trim().parse::<f64>().ok().map(|v| v as u64);

    Ok(Quote::new(
        symbol.clone(),
        name,
        price,
        prev_close,
        volume,
        observed_at,
        ProviderId::Sina,
    )?)
}

fn parse_field(raw: &str, field: &'static str) -> Result<f64, FetchError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| FetchError::parse(format!("sina field {field} is not numeric: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpResponse, ScriptedHttpClient};
    use crate::quote_source::FetchErrorKind;

    const BODY: &str = "var hq_str_sh512170=\"医疗ETF,3.630,3.630,3.640,3.660,3.620,3.639,3.640,128834933,468659200.000,...\";";

    fn symbol() -> Symbol {
        Symbol::parse("512170").expect("symbol")
    }

    #[tokio::test]
    async fn parses_comma_delimited_payload() {
        let http =
            Arc::new(ScriptedHttpClient::new().respond_with(Ok(HttpResponse::ok(BODY))));
        let adapter = SinaAdapter::new(http.clone());

        let quote = adapter.fetch(&symbol()).await.expect("quote");

        assert_eq!(quote.name, "医疗ETF");
        assert_eq!(quote.price, 3.64);
        assert_eq!(quote.prev_close, 3.63);
        assert_eq!(quote.volume, Some(128_834_933));
        assert_eq!(quote.source, ProviderId::Sina);

        let requests = http.recorded_requests();
        assert!(requests[0].url.ends_with("list=sh512170"));
        assert_eq!(
            requests[0].headers.get("referer").map(String::as_str),
            Some("https://finance.sina.com.cn")
        );
    }

    #[tokio::test]
    async fn empty_payload_is_a_parse_error() {
        let http = Arc::new(
            ScriptedHttpClient::new()
                .respond_with(Ok(HttpResponse::ok("var hq_str_sh000000=\"\";"))),
        );
        let adapter = SinaAdapter::new(http);

        let error = adapter.fetch(&symbol()).await.expect_err("must fail");
        assert_eq!(error.kind(), FetchErrorKind::Parse);
    }

    #[tokio::test]
    async fn status_403_is_forbidden() {
        let http = Arc::new(
            ScriptedHttpClient::new().respond_with(Ok(HttpResponse::status(403, ""))),
        );
        let adapter = SinaAdapter::new(http);

        let error = adapter.fetch(&symbol()).await.expect_err("must fail");
        assert!(error.is_forbidden());
    }
}
