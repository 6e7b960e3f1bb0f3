//! Canonical domain types for quotewatch.
//!
//! All models validate their invariants at construction:
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Quote`] | Normalized price observation with recomputed percent change |
//! | [`Symbol`] | Exchange-qualified instrument identifier |
//! | [`Market`] | Exchange classification inferred from the code shape |
//! | [`UtcDateTime`] | RFC3339 UTC timestamp |

mod quote;
mod symbol;
mod timestamp;

pub use quote::Quote;
pub use symbol::{Market, Symbol};
pub use timestamp::UtcDateTime;
