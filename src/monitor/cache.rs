//! Short-TTL quote cache in front of the price feed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::budget::CallBudget;
use crate::error::FeedError;
use crate::market::{PriceFeed, Quote};
use crate::metrics;
use crate::trading::Position;

/// Cache freshness settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Age under which a cached quote is served without a feed call.
    pub ttl: Duration,
    /// Age beyond which a cached quote can no longer stand in for a failing feed.
    pub stale_threshold: Duration,
}

/// A quote handed to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceReading {
    /// The quote.
    pub quote: Quote,
    /// True when the feed failed and this is the last cached quote.
    pub stale: bool,
    /// Age of the quote at the time it was served.
    pub age: Duration,
}

#[derive(Debug, Clone, Copy)]
struct CachedQuote {
    quote: Quote,
    fetched_at: Instant,
}

/// Quote cache that owns all access to the price feed.
pub struct PriceCache {
    feed: Arc<dyn PriceFeed>,
    budget: Arc<CallBudget>,
    settings: CacheSettings,
    entries: DashMap<String, CachedQuote>,
    feed_calls: AtomicU64,
}

impl PriceCache {
    /// Create a cache over a feed, spending from the shared budget.
    pub fn new(feed: Arc<dyn PriceFeed>, budget: Arc<CallBudget>, settings: CacheSettings) -> Self {
        Self {
            feed,
            budget,
            settings,
            entries: DashMap::new(),
            feed_calls: AtomicU64::new(0),
        }
    }

    /// Get a quote for the position's token.
    ///
    /// Serves from cache within the TTL. Otherwise spends one unit of budget
    /// on a feed call. When the feed fails, falls back to the cached quote
    /// while it is younger than the stale threshold; past that the error is a
    /// freshness fault the caller must not trade through.
    #[instrument(skip_all, fields(position_id = %position.id, token_id = %position.token_id))]
    pub async fn get_price(&self, position: &Position) -> Result<PriceReading, FeedError> {
        let token_id = position.token_id.as_str();

        if let Some(hit) = self.fresh(token_id) {
            metrics::inc_cache_hits();
            return Ok(hit);
        }

        self.budget.acquire().await;
        self.feed_calls.fetch_add(1, Ordering::Relaxed);
        metrics::inc_feed_calls();

        match self.feed.get_current_price(position).await {
            Ok(quote) => {
                self.entries.insert(
                    token_id.to_string(),
                    CachedQuote {
                        quote,
                        fetched_at: Instant::now(),
                    },
                );
                debug!(bid = %quote.bid, ask = %quote.ask, "Fetched quote");
                Ok(PriceReading {
                    quote,
                    stale: false,
                    age: Duration::ZERO,
                })
            }
            Err(e) => {
                warn!(error = %e, "Price feed call failed");
                self.fallback(token_id)
            }
        }
    }

    /// Number of feed calls made so far.
    pub fn feed_calls(&self) -> u64 {
        self.feed_calls.load(Ordering::Relaxed)
    }

    fn fresh(&self, token_id: &str) -> Option<PriceReading> {
        let entry = self.entries.get(token_id)?;
        let age = entry.fetched_at.elapsed();
        (age < self.settings.ttl).then_some(PriceReading {
            quote: entry.quote,
            stale: false,
            age,
        })
    }

    fn fallback(&self, token_id: &str) -> Result<PriceReading, FeedError> {
        let Some(entry) = self.entries.get(token_id) else {
            return Err(FeedError::NoData {
                token_id: token_id.to_string(),
            });
        };

        let age = entry.fetched_at.elapsed();
        if age >= self.settings.stale_threshold {
            return Err(FeedError::Stale {
                token_id: token_id.to_string(),
                age,
            });
        }

        Ok(PriceReading {
            quote: entry.quote,
            stale: true,
            age,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::mock::MockPriceFeed;
    use crate::trading::PositionSide;
    use rust_decimal_macros::dec;

    fn settings() -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(10),
            stale_threshold: Duration::from_secs(60),
        }
    }

    fn setup() -> (MockPriceFeed, PriceCache, Position) {
        let feed = MockPriceFeed::new();
        feed.set_quote("tok", Quote::new(dec!(0.49), dec!(0.51), dec!(100)));
        let cache = PriceCache::new(
            Arc::new(feed.clone()),
            Arc::new(CallBudget::per_minute(60)),
            settings(),
        );
        let pos = Position::new("pos-1", "tok", PositionSide::Long, dec!(10), dec!(0.50));
        (feed, cache, pos)
    }

    #[tokio::test(start_paused = true)]
    async fn serves_from_cache_within_ttl() {
        let (feed, cache, pos) = setup();

        let first = cache.get_price(&pos).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        let second = cache.get_price(&pos).await.unwrap();

        assert_eq!(first.quote, second.quote);
        assert!(!second.stale);
        assert_eq!(cache.feed_calls(), 1);
        assert_eq!(feed.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refetches_after_ttl() {
        let (feed, cache, pos) = setup();

        cache.get_price(&pos).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        feed.set_quote("tok", Quote::new(dec!(0.59), dec!(0.61), dec!(100)));
        let reading = cache.get_price(&pos).await.unwrap();

        assert_eq!(reading.quote.mid(), dec!(0.60));
        assert_eq!(cache.feed_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_stale_then_faults() {
        let (feed, cache, pos) = setup();

        cache.get_price(&pos).await.unwrap();
        feed.set_failing(true);

        tokio::time::advance(Duration::from_secs(30)).await;
        let reading = cache.get_price(&pos).await.unwrap();
        assert!(reading.stale);
        assert_eq!(reading.quote.mid(), dec!(0.50));

        tokio::time::advance(Duration::from_secs(31)).await;
        let err = cache.get_price(&pos).await.unwrap_err();
        assert!(matches!(err, FeedError::Stale { .. }));

        feed.set_failing(false);
        let reading = cache.get_price(&pos).await.unwrap();
        assert!(!reading.stale);
    }

    #[tokio::test(start_paused = true)]
    async fn no_data_when_nothing_cached() {
        let (feed, cache, pos) = setup();
        feed.set_failing(true);

        let err = cache.get_price(&pos).await.unwrap_err();
        assert_eq!(
            err,
            FeedError::NoData {
                token_id: "tok".to_string()
            }
        );
    }
}
