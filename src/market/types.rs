//! Market data types consumed by the exit engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Top-of-book snapshot returned by the price feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
    /// Displayed volume at the top of book.
    pub volume: Decimal,
    /// When the feed produced this quote.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Quote {
    /// Create a quote stamped with the current time.
    pub fn new(bid: Decimal, ask: Decimal, volume: Decimal) -> Self {
        Self {
            bid,
            ask,
            volume,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Create a zero-spread quote at a single price.
    pub fn at(price: Decimal, volume: Decimal) -> Self {
        Self::new(price, price, volume)
    }

    /// Mid price, used as the mark for P&L and stops.
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Get the spread between best bid and ask.
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Check if the book is inverted (ask < bid).
    pub fn is_inverted(&self) -> bool {
        self.ask < self.bid
    }
}
