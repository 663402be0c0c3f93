//! Write-once audit events.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use time::OffsetDateTime;

use crate::exit::conditions::{ExitCondition, Priority};
use crate::exit::staging::ExitStage;
use crate::trading::OrderType;

/// How one order placement ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptOutcome {
    /// Whole order filled.
    Filled,
    /// Some quantity filled before the order ended.
    PartiallyFilled,
    /// Nothing filled within the stage timeout.
    TimedOut,
    /// The gateway refused the order.
    Rejected,
}

/// One order placement try. Exactly one per placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitAttempt {
    /// Position being exited.
    pub position_id: String,
    /// Condition being acted on.
    pub condition: ExitCondition,
    /// Tier of that condition.
    pub priority: Priority,
    /// Limit or market.
    pub order_type: OrderType,
    /// Limit price, for limit orders.
    pub limit_price: Option<Decimal>,
    /// Average fill price, if anything filled.
    pub fill_price: Option<Decimal>,
    /// Quantity filled by this attempt.
    pub filled_qty: Decimal,
    /// 1-based attempt number within the walk.
    pub sequence: u32,
    /// Stage timeout used, in milliseconds.
    pub timeout_ms: u64,
    /// Outcome.
    pub outcome: AttemptOutcome,
    /// When the attempt concluded.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ExitAttempt {
    /// Stage timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// One exit transaction that reduced a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionExit {
    /// Position reduced.
    pub position_id: String,
    /// Condition that drove the exit.
    pub condition: ExitCondition,
    /// Tier of that condition.
    pub priority: Priority,
    /// Quantity exited by this event.
    pub quantity: Decimal,
    /// Average exit price.
    pub price: Decimal,
    /// Stage marker.
    pub stage: ExitStage,
    /// When the exit was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}
