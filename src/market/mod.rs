//! Market data consumed by the exit engine.
//!
//! This module handles:
//! - Quote types
//! - Collaborator contracts for prices, edge and rebalancing
//! - Mock collaborators for tests and simulation

pub mod feed;
pub mod mock;
pub mod types;

pub use feed::{EdgeService, NoEdge, NoRebalance, PriceFeed, RebalanceSignal};
pub use mock::{FillBehavior, MockEdgeService, MockOrderGateway, MockPriceFeed, MockRebalance};
pub use types::Quote;
