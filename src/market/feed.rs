//! Collaborator contracts for market data and signals.
//!
//! The engine never talks to a venue directly. Quotes, edge estimates and
//! rebalance hints come through these traits so the monitoring core can run
//! against live adapters, replay data or the mocks in [`super::mock`].

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::types::Quote;
use crate::error::FeedError;
use crate::trading::Position;

/// Source of top-of-book quotes.
///
/// Callers inside the engine never use this directly; they go through
/// [`crate::monitor::PriceCache`], which owns the call budget.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetch the current quote for the position's token.
    async fn get_current_price(&self, position: &Position) -> Result<Quote, FeedError>;
}

/// Source of the position's current edge (true probability minus price).
#[async_trait]
pub trait EdgeService: Send + Sync {
    /// Current edge, or `None` when no estimate is available.
    async fn get_current_edge(&self, position: &Position) -> Option<Decimal>;
}

/// Portfolio-level rebalancing hint.
#[async_trait]
pub trait RebalanceSignal: Send + Sync {
    /// Whether the portfolio wants this position reduced.
    async fn should_rebalance(&self, position: &Position) -> bool;
}

/// Edge service for deployments without an edge model.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEdge;

#[async_trait]
impl EdgeService for NoEdge {
    async fn get_current_edge(&self, _position: &Position) -> Option<Decimal> {
        None
    }
}

/// Rebalance signal that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRebalance;

#[async_trait]
impl RebalanceSignal for NoRebalance {
    async fn should_rebalance(&self, _position: &Position) -> bool {
        false
    }
}
