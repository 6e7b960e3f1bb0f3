//! Provider adapters.
//!
//! One file per upstream quote provider plus the [`CompositeAdapter`]
//! delegator. Each adapter is a pure request-build / parse / normalize unit
//! with an injected transport and no shared mutable state.
//!
//! | Adapter | Wire format |
//! |---------|-------------|
//! | [`EastmoneyAdapter`] | JSON field map, prices in 1/100 subunits |
//! | [`SinaAdapter`] | comma-delimited pseudo-assignment text |
//! | [`TencentAdapter`] | `~`-delimited pseudo-assignment text |
//! | [`XueqiuAdapter`] | JSON quote object |
//! | [`YahooAdapter`] | v8 chart JSON for US-listed instruments |
//! | [`CompositeAdapter`] | routes by market, one internal fallback |

mod composite;
mod eastmoney;
mod sina;
mod tencent;
mod xueqiu;
mod yahoo;

pub use composite::CompositeAdapter;
pub use eastmoney::EastmoneyAdapter;
pub use sina::SinaAdapter;
pub use tencent::TencentAdapter;
pub use xueqiu::XueqiuAdapter;
pub use yahoo::YahooAdapter;

use crate::http_client::{HttpError, HttpResponse};
use crate::{FetchError, ProviderId};

/// Map a transport-level error onto the fetch taxonomy.
fn transport_error(provider: ProviderId, error: &HttpError) -> FetchError {
    if error.is_timeout() {
        FetchError::timeout(format!("{provider} transport timeout: {}", error.message()))
    } else {
        FetchError::network(format!("{provider} transport error: {}", error.message()))
    }
}

/// Map a non-2xx response onto the fetch taxonomy. 403 is a throttling
/// signal on the domestic providers and is flagged for log suppression;
/// 429 and 502-class statuses feed the backoff gate.
fn status_error(provider: ProviderId, response: &HttpResponse) -> FetchError {
    match response.status {
        403 => FetchError::forbidden(format!("{provider} returned status 403")),
        429 | 502 | 503 | 504 => FetchError::rate_limited(
            format!("{provider} returned status {}", response.status),
            response.retry_after,
        ),
        status => FetchError::network(format!("{provider} returned status {status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FetchErrorKind;

    #[test]
    fn forbidden_status_is_flagged() {
        let error = status_error(ProviderId::Sina, &HttpResponse::status(403, ""));
        assert_eq!(error.kind(), FetchErrorKind::RateLimited);
        assert!(error.is_forbidden());
    }

    #[test]
    fn bad_gateway_keeps_retry_after() {
        let mut response = HttpResponse::status(502, "");
        response.retry_after = Some(std::time::Duration::from_secs(7));
        let error = status_error(ProviderId::Eastmoney, &response);
        assert_eq!(error.retry_after(), Some(std::time::Duration::from_secs(7)));
    }

    #[test]
    fn timeout_maps_to_timeout_kind() {
        let error = transport_error(ProviderId::Tencent, &HttpError::timed_out("deadline"));
        assert_eq!(error.kind(), FetchErrorKind::Timeout);
    }
}
