//! Mock collaborators for unit testing and simulation.
//!
//! This module provides a mock price feed, order gateway, edge service and
//! rebalance signal that can be used without a real venue. All mocks are
//! cheap to clone; clones share state so a test can keep a handle and
//! script behavior while the engine holds another.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::feed::{EdgeService, PriceFeed, RebalanceSignal};
use super::types::Quote;
use crate::error::{FeedError, OrderError};
use crate::trading::{OrderGateway, OrderHandle, OrderReport, OrderRequest, OrderStatus, OrderType, Position};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct FeedState {
    paths: HashMap<String, VecDeque<Quote>>,
    failing: bool,
    calls: u64,
}

/// Mock price feed serving scripted quotes per token.
#[derive(Debug, Clone, Default)]
pub struct MockPriceFeed {
    state: Arc<Mutex<FeedState>>,
}

impl MockPriceFeed {
    /// Create a feed with no quotes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a fixed quote for a token.
    pub fn set_quote(&self, token_id: &str, quote: Quote) {
        lock(&self.state)
            .paths
            .insert(token_id.to_string(), VecDeque::from([quote]));
    }

    /// Serve quotes in order, one per call; the last one repeats.
    pub fn set_path(&self, token_id: &str, quotes: impl IntoIterator<Item = Quote>) {
        lock(&self.state)
            .paths
            .insert(token_id.to_string(), quotes.into_iter().collect());
    }

    /// Make every call fail.
    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    /// Number of calls received.
    pub fn calls(&self) -> u64 {
        lock(&self.state).calls
    }
}

#[async_trait]
impl PriceFeed for MockPriceFeed {
    async fn get_current_price(&self, position: &Position) -> Result<Quote, FeedError> {
        let mut state = lock(&self.state);
        state.calls += 1;

        if state.failing {
            return Err(FeedError::Unavailable {
                token_id: position.token_id.clone(),
                reason: "mock feed failure".to_string(),
            });
        }

        let path = state
            .paths
            .get_mut(&position.token_id)
            .ok_or_else(|| FeedError::Unavailable {
                token_id: position.token_id.clone(),
                reason: "no quote scripted".to_string(),
            })?;

        let quote = if path.len() > 1 { path.pop_front() } else { path.front().copied() };
        quote.ok_or_else(|| FeedError::Unavailable {
            token_id: position.token_id.clone(),
            reason: "empty quote path".to_string(),
        })
    }
}

/// How the mock gateway treats a placed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillBehavior {
    /// Rest without filling.
    Rest,
    /// Fill completely.
    Fill,
    /// Fill this much and keep resting.
    Partial(Decimal),
    /// Refuse the order.
    Reject(String),
    /// Accept and report exactly this state when polled.
    Report(OrderReport),
}

type PlaceHook = Arc<dyn Fn(&OrderRequest) + Send + Sync>;

struct GatewayState {
    script: VecDeque<FillBehavior>,
    limit_default: FillBehavior,
    market_default: FillBehavior,
    market_price: Decimal,
    orders: HashMap<String, OrderReport>,
    placed: Vec<OrderRequest>,
    cancelled: Vec<String>,
    calls: u64,
    next_id: u64,
    on_place: Option<PlaceHook>,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self {
            script: VecDeque::new(),
            limit_default: FillBehavior::Rest,
            market_default: FillBehavior::Fill,
            market_price: Decimal::new(5, 1),
            orders: HashMap::new(),
            placed: Vec::new(),
            cancelled: Vec::new(),
            calls: 0,
            next_id: 0,
            on_place: None,
        }
    }
}

/// Mock order gateway.
///
/// By default limit orders rest and market orders fill. Behaviors queued
/// with [`MockOrderGateway::push_behavior`] apply to the next placements in
/// order, ahead of the defaults.
#[derive(Clone, Default)]
pub struct MockOrderGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl std::fmt::Debug for MockOrderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MockOrderGateway")
            .field("placed", &state.placed.len())
            .field("cancelled", &state.cancelled.len())
            .finish()
    }
}

impl MockOrderGateway {
    /// Create a gateway with default behaviors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a behavior for the next placement.
    pub fn push_behavior(&self, behavior: FillBehavior) {
        lock(&self.state).script.push_back(behavior);
    }

    /// Behavior for limit orders once the script is empty.
    pub fn set_limit_behavior(&self, behavior: FillBehavior) {
        lock(&self.state).limit_default = behavior;
    }

    /// Behavior for market orders once the script is empty.
    pub fn set_market_behavior(&self, behavior: FillBehavior) {
        lock(&self.state).market_default = behavior;
    }

    /// Price at which market orders fill.
    pub fn set_market_price(&self, price: Decimal) {
        lock(&self.state).market_price = price;
    }

    /// Run a callback after every accepted or rejected placement.
    pub fn on_place(&self, hook: impl Fn(&OrderRequest) + Send + Sync + 'static) {
        lock(&self.state).on_place = Some(Arc::new(hook));
    }

    /// Every request received, in order.
    pub fn placed(&self) -> Vec<OrderRequest> {
        lock(&self.state).placed.clone()
    }

    /// Order IDs cancelled, in order.
    pub fn cancelled(&self) -> Vec<String> {
        lock(&self.state).cancelled.clone()
    }

    /// Total gateway calls (place, poll and cancel).
    pub fn calls(&self) -> u64 {
        lock(&self.state).calls
    }
}

#[async_trait]
impl OrderGateway for MockOrderGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderHandle, OrderError> {
        let (result, hook) = {
            let mut state = lock(&self.state);
            state.calls += 1;
            state.placed.push(request.clone());

            let behavior = match state.script.pop_front() {
                Some(b) => b,
                None if request.order_type == OrderType::Market => state.market_default.clone(),
                None => state.limit_default.clone(),
            };
            let fill_price = request.price.unwrap_or(state.market_price);

            let report = match behavior {
                FillBehavior::Reject(reason) => Err(OrderError::Rejected { reason }),
                FillBehavior::Rest => Ok(OrderReport::open()),
                FillBehavior::Fill => Ok(OrderReport {
                    status: OrderStatus::Filled,
                    filled_qty: request.quantity,
                    fill_price: Some(fill_price),
                }),
                FillBehavior::Partial(qty) => Ok(OrderReport {
                    status: OrderStatus::PartiallyFilled,
                    filled_qty: qty,
                    fill_price: Some(fill_price),
                }),
                FillBehavior::Report(report) => Ok(report),
            };

            let result = report.map(|report| {
                state.next_id += 1;
                let order_id = format!("mock-{}", state.next_id);
                state.orders.insert(order_id.clone(), report);
                OrderHandle::new(order_id)
            });
            (result, state.on_place.clone())
        };

        if let Some(hook) = hook {
            hook(request);
        }
        result
    }

    async fn poll_order(&self, handle: &OrderHandle) -> Result<OrderReport, OrderError> {
        let mut state = lock(&self.state);
        state.calls += 1;
        state
            .orders
            .get(&handle.order_id)
            .copied()
            .ok_or_else(|| OrderError::UnknownOrder {
                order_id: handle.order_id.clone(),
            })
    }

    async fn cancel_order(&self, handle: &OrderHandle) -> Result<(), OrderError> {
        let mut state = lock(&self.state);
        state.calls += 1;
        state.cancelled.push(handle.order_id.clone());

        let report = state
            .orders
            .get_mut(&handle.order_id)
            .ok_or_else(|| OrderError::UnknownOrder {
                order_id: handle.order_id.clone(),
            })?;
        if !report.status.is_terminal() {
            report.status = OrderStatus::Cancelled;
        }
        Ok(())
    }
}

/// Mock edge service with per-token edges.
#[derive(Debug, Clone, Default)]
pub struct MockEdgeService {
    edges: Arc<Mutex<HashMap<String, Decimal>>>,
}

impl MockEdgeService {
    /// Create a service with no edges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the edge for a token.
    pub fn set_edge(&self, token_id: &str, edge: Decimal) {
        lock(&self.edges).insert(token_id.to_string(), edge);
    }
}

#[async_trait]
impl EdgeService for MockEdgeService {
    async fn get_current_edge(&self, position: &Position) -> Option<Decimal> {
        lock(&self.edges).get(&position.token_id).copied()
    }
}

/// Mock rebalance signal keyed by position ID.
#[derive(Debug, Clone, Default)]
pub struct MockRebalance {
    flagged: Arc<Mutex<HashSet<String>>>,
}

impl MockRebalance {
    /// Create a signal with nothing flagged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a position to be rebalanced.
    pub fn flag(&self, position_id: &str) {
        lock(&self.flagged).insert(position_id.to_string());
    }
}

#[async_trait]
impl RebalanceSignal for MockRebalance {
    async fn should_rebalance(&self, position: &Position) -> bool {
        lock(&self.flagged).contains(&position.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::{PositionSide, Side};
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position::new("pos-1", "tok", PositionSide::Long, dec!(10), dec!(0.50))
    }

    #[tokio::test]
    async fn feed_walks_path_and_repeats_last() {
        let feed = MockPriceFeed::new();
        feed.set_path(
            "tok",
            [dec!(0.50), dec!(0.60)].map(|p| Quote::at(p, dec!(100))),
        );
        let pos = position();

        assert_eq!(feed.get_current_price(&pos).await.unwrap().mid(), dec!(0.50));
        assert_eq!(feed.get_current_price(&pos).await.unwrap().mid(), dec!(0.60));
        assert_eq!(feed.get_current_price(&pos).await.unwrap().mid(), dec!(0.60));
        assert_eq!(feed.calls(), 3);
    }

    #[tokio::test]
    async fn feed_failure_modes() {
        let feed = MockPriceFeed::new();
        let pos = position();
        assert!(feed.get_current_price(&pos).await.is_err());

        feed.set_quote("tok", Quote::at(dec!(0.5), dec!(1)));
        feed.set_failing(true);
        assert!(feed.get_current_price(&pos).await.is_err());
    }

    #[tokio::test]
    async fn gateway_defaults_and_script() {
        let gateway = MockOrderGateway::new();
        let limit = OrderRequest::limit("tok", Side::Sell, dec!(0.52), dec!(10));
        let market = OrderRequest::market("tok", Side::Sell, dec!(10));

        let resting = gateway.place_order(&limit).await.unwrap();
        assert_eq!(gateway.poll_order(&resting).await.unwrap().status, OrderStatus::Open);
        gateway.cancel_order(&resting).await.unwrap();
        assert_eq!(
            gateway.poll_order(&resting).await.unwrap().status,
            OrderStatus::Cancelled
        );

        let filled = gateway.place_order(&market).await.unwrap();
        let report = gateway.poll_order(&filled).await.unwrap();
        assert_eq!(report.filled_qty, dec!(10));
        assert_eq!(report.fill_price, Some(dec!(0.5)));

        gateway.push_behavior(FillBehavior::Reject("no liquidity".to_string()));
        assert!(matches!(
            gateway.place_order(&limit).await,
            Err(OrderError::Rejected { .. })
        ));

        assert_eq!(gateway.placed().len(), 3);
        assert_eq!(gateway.cancelled().len(), 1);
    }

    #[tokio::test]
    async fn edge_and_rebalance() {
        let edge = MockEdgeService::new();
        let rebalance = MockRebalance::new();
        let pos = position();

        assert_eq!(edge.get_current_edge(&pos).await, None);
        edge.set_edge("tok", dec!(0.03));
        assert_eq!(edge.get_current_edge(&pos).await, Some(dec!(0.03)));

        assert!(!rebalance.should_rebalance(&pos).await);
        rebalance.flag("pos-1");
        assert!(rebalance.should_rebalance(&pos).await);
    }
}
