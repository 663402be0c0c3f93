//! Position monitoring and adaptive exit execution for prediction-market
//! positions.
//!
//! Every open position is watched by its own task. Each cycle marks the
//! position from a cached quote, evaluates ten exit conditions, resolves them
//! to at most one action by priority, and executes that action by walking a
//! limit price toward the market with tier-specific patience.
//!
//! # Priority tiers
//!
//! ```text
//! CRITICAL  stop_loss, circuit_breaker                     market, must fill
//! HIGH      trailing_stop, time_based_urgent,              aggressive limit,
//!           liquidity_dried_up                             then market
//! MEDIUM    profit_target, partial_exit_target             fair limit walk
//! LOW       early_exit, edge_disappeared, rebalance        conservative walk
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`market`]: Quotes and market data collaborators
//! - [`trading`]: Order types, the order gateway and positions
//! - [`exit`]: Exit conditions, priority resolution and price walking
//! - [`monitor`]: Price cache, call budget, circuit breaker and position tasks
//! - [`audit`]: Exit attempt and position exit records
//! - [`alerts`]: Operator alerts
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod alerts;
pub mod audit;
pub mod config;
pub mod error;
pub mod exit;
pub mod market;
pub mod metrics;
pub mod monitor;
pub mod trading;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, Result};
