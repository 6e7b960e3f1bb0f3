//! TTL quote cache with change detection.
//!
//! One entry per symbol. Storing a fresh quote reports whether the price
//! moved since the previous observation; prices are normalized to four
//! decimals at construction, so the comparison is exact equality, not an
//! epsilon. Expired entries are still readable — marked stale — so the
//! pipeline can serve a last-known quote while every source is down. The
//! sweep only evicts entries that are both expired and no longer watched.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::{Quote, Symbol};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Result of storing a quote.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreResult {
    /// True when the price or percent change differs from the previous
    /// stored observation, or when this is the first observation for the
    /// symbol.
    pub changed: bool,
    pub previous: Option<Quote>,
}

/// A cache read: the quote plus freshness metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedQuote {
    pub quote: Quote,
    /// The observation before this one, when there was one.
    pub previous: Option<Quote>,
    /// True when the entry outlived the TTL.
    pub stale: bool,
    pub age: Duration,
    /// Consecutive fetch failures recorded since the quote was stored.
    pub error_count: u32,
}

/// Monotonic cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Total fetch attempts recorded, successes and failures alike.
    pub attempts: u64,
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub evictions: u64,
    pub size: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    quote: Quote,
    previous: Option<Quote>,
    stored_at: Instant,
    error_count: u32,
}

pub struct QuoteCache {
    entries: RwLock<HashMap<Symbol, Entry>>,
    ttl: Duration,
    attempts: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
    evictions: AtomicU64,
}

impl QuoteCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            attempts: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Store a fresh observation, reporting whether the price changed.
    /// Storing also clears the entry's failure streak.
    pub async fn store(&self, quote: Quote) -> StoreResult {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write().await;
        let previous = entries.get(&quote.symbol).map(|entry| entry.quote.clone());
        let changed = previous.as_ref().is_none_or(|prev| {
            prev.price != quote.price || prev.change_percent != quote.change_percent
        });

        entries.insert(
            quote.symbol.clone(),
            Entry {
                quote,
                previous: previous.clone(),
                stored_at: Instant::now(),
                error_count: 0,
            },
        );

        StoreResult { changed, previous }
    }

    /// Read the entry for a symbol, stale entries included.
    pub async fn get(&self, symbol: &Symbol) -> Option<CachedQuote> {
        let entries = self.entries.read().await;
        let Some(entry) = entries.get(symbol) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let age = entry.stored_at.elapsed();
        let stale = age > self.ttl;
        if stale {
            self.stale_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        Some(CachedQuote {
            quote: entry.quote.clone(),
            previous: entry.previous.clone(),
            stale,
            age,
            error_count: entry.error_count,
        })
    }

    /// Bump the failure streak for a symbol whose fetch just failed.
    /// Returns the new streak; zero when the symbol has no entry.
    pub async fn record_failure(&self, symbol: &Symbol) -> u32 {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write().await;
        match entries.get_mut(symbol) {
            Some(entry) => {
                entry.error_count = entry.error_count.saturating_add(1);
                entry.error_count
            }
            None => 0,
        }
    }

    /// Evict entries that are both expired and absent from the watch set.
    /// Watched entries survive expiry so a stale read stays possible.
    pub async fn sweep(&self, watched: &HashSet<Symbol>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|symbol, entry| {
            watched.contains(symbol) || entry.stored_at.elapsed() <= self.ttl
        });
        let evicted = before - entries.len();
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.entries.read().await.len(),
        }
    }
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
