//! Trading module for order vocabulary and positions.
//!
//! This module handles:
//! - Order types and status reports
//! - The order gateway contract
//! - Position tracking

pub mod gateway;
pub mod order;
pub mod position;

pub use gateway::{wait_for_fill, OrderGateway};
pub use order::{OrderHandle, OrderReport, OrderRequest, OrderStatus, OrderType, Side};
pub use position::{Position, PositionSide, PositionStatus};
