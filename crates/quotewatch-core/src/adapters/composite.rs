//! Market-routing composite source.
//!
//! Wraps two provider pairs — one for CN ETFs, one for US tickers — and
//! presents them to the failover chain as a single logical source. A failed
//! primary fetch gets exactly one internal fallback attempt; the chain never
//! sees which half answered, so the composite degrades and recovers as one
//! unit.

use std::sync::Arc;

use tracing::debug;

use crate::quote_source::{FetchFuture, QuoteSource};
use crate::{ProviderId, Symbol};

pub struct CompositeAdapter {
    cn_primary: Arc<dyn QuoteSource>,
    cn_fallback: Arc<dyn QuoteSource>,
    us_primary: Arc<dyn QuoteSource>,
    us_fallback: Arc<dyn QuoteSource>,
}

impl CompositeAdapter {
    pub fn new(
        cn_primary: Arc<dyn QuoteSource>,
        cn_fallback: Arc<dyn QuoteSource>,
        us_primary: Arc<dyn QuoteSource>,
        us_fallback: Arc<dyn QuoteSource>,
    ) -> Self {
        Self {
            cn_primary,
            cn_fallback,
            us_primary,
            us_fallback,
        }
    }

    fn pair(&self, symbol: &Symbol) -> (&Arc<dyn QuoteSource>, &Arc<dyn QuoteSource>) {
        if symbol.is_cn() {
            (&self.cn_primary, &self.cn_fallback)
        } else {
            (&self.us_primary, &self.us_fallback)
        }
    }
}

impl QuoteSource for CompositeAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Composite
    }

    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a> {
        Box::pin(async move {
            let (primary, fallback) = self.pair(symbol);
            match primary.fetch(symbol).await {
                Ok(quote) => Ok(quote),
                Err(error) => {
                    debug!(
                        symbol = %symbol,
                        primary = %primary.id(),
                        fallback = %fallback.id(),
                        error = %error,
                        "composite primary failed, trying fallback"
                    );
                    fallback.fetch(symbol).await
                }
            }
        })
    }
}
