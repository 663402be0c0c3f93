//! Position tracking.

use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use time::OffsetDateTime;

use super::order::Side;
use crate::error::InvariantViolation;
use crate::exit::conditions::Priority;
use crate::exit::trailing::TrailingStopState;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PositionSide {
    /// Holds the token; profits when price rises.
    Long,
    /// Short the token; profits when price falls.
    Short,
}

impl PositionSide {
    /// Order side that reduces this position.
    pub fn exit_side(&self) -> Side {
        match self {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
        }
    }

    /// Signed price move in this position's favor.
    pub fn favorable_move(&self, from: Decimal, to: Decimal) -> Decimal {
        match self {
            PositionSide::Long => to - from,
            PositionSide::Short => from - to,
        }
    }
}

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PositionStatus {
    /// Monitored, no exit in flight.
    Open,
    /// An exit walk is in flight.
    Exiting,
    /// Fully exited.
    Closed,
}

/// Position in a single token, owned by its monitoring task while open.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    /// Position identifier.
    pub id: String,
    /// Token traded.
    pub token_id: String,
    /// Strategy tag selecting exit thresholds.
    pub strategy: String,
    /// Long or short.
    pub side: PositionSide,
    /// Quantity at open.
    pub original_quantity: Decimal,
    /// Quantity still open. Only reduced through [`Position::apply_exit`].
    pub quantity: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Last observed mark price.
    pub current_price: Decimal,
    /// Unrealized P&L at the last mark.
    pub unrealized_pnl: Decimal,
    /// Unrealized P&L percent at the last mark.
    pub unrealized_pnl_pct: Decimal,
    /// Trailing stop state.
    pub trailing: TrailingStopState,
    /// Tier of the last exit that was acted on.
    pub last_exit_priority: Option<Priority>,
    /// Number of staged partial exits already executed.
    pub partial_stages_done: u8,
    /// Lifecycle status.
    pub status: PositionStatus,
    /// Set when automation must stop and an operator has to look.
    pub needs_review: Option<String>,
    /// Market settlement time, if known.
    #[serde(with = "time::serde::rfc3339::option")]
    pub settles_at: Option<OffsetDateTime>,
    /// Last state change.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Position {
    /// Open a new position with an unarmed trailing stop.
    pub fn new(
        id: impl Into<String>,
        token_id: impl Into<String>,
        side: PositionSide,
        quantity: Decimal,
        entry_price: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            token_id: token_id.into(),
            strategy: "default".to_string(),
            side,
            original_quantity: quantity,
            quantity,
            entry_price,
            current_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_pct: Decimal::ZERO,
            trailing: TrailingStopState::disabled(entry_price),
            last_exit_priority: None,
            partial_stages_done: 0,
            status: PositionStatus::Open,
            needs_review: None,
            settles_at: None,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Set the strategy tag.
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    /// Set the settlement time.
    pub fn with_settlement(mut self, settles_at: OffsetDateTime) -> Self {
        self.settles_at = Some(settles_at);
        self
    }

    /// Arm the trailing stop mechanism with the given parameters.
    pub fn with_trailing(mut self, activation_threshold: Decimal, distance: Decimal) -> Self {
        self.trailing = TrailingStopState::new(self.entry_price, activation_threshold, distance);
        self
    }

    /// Calculate the cost basis of the open quantity.
    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.entry_price
    }

    /// Calculate P&L of the open quantity at a given price.
    pub fn pnl(&self, price: Decimal) -> Decimal {
        self.side.favorable_move(self.entry_price, price) * self.quantity
    }

    /// Calculate P&L percent at a given price.
    pub fn pnl_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.side.favorable_move(self.entry_price, price) / self.entry_price
            * Decimal::ONE_HUNDRED
    }

    /// Record a new mark price and recompute P&L.
    pub fn mark(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = self.pnl(price);
        self.unrealized_pnl_pct = self.pnl_pct(price);
        self.touch();
    }

    /// Total quantity exited so far.
    pub fn exited_quantity(&self) -> Decimal {
        self.original_quantity - self.quantity
    }

    /// Reduce the open quantity by a recorded exit.
    ///
    /// Fails without mutating when the exit exceeds what is still open.
    pub fn apply_exit(&mut self, quantity: Decimal) -> Result<(), InvariantViolation> {
        if quantity > self.quantity || quantity < Decimal::ZERO {
            return Err(InvariantViolation::OverExit {
                position_id: self.id.clone(),
                requested: quantity,
                remaining: self.quantity,
            });
        }

        self.quantity -= quantity;
        if self.quantity.is_zero() {
            self.status = PositionStatus::Closed;
        }
        self.unrealized_pnl = self.pnl(self.current_price);
        self.touch();
        Ok(())
    }

    /// Freeze the position from automated action.
    pub fn flag_for_review(&mut self, reason: impl Into<String>) {
        if self.needs_review.is_none() {
            self.needs_review = Some(reason.into());
            self.touch();
        }
    }

    /// Whether the engine may still act on this position.
    pub fn is_actionable(&self) -> bool {
        self.status != PositionStatus::Closed && self.needs_review.is_none()
    }

    /// Whether the position is fully exited.
    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn long_position_calculations() {
        let mut pos = Position::new("p1", "token", PositionSide::Long, dec!(10), dec!(0.50));

        assert_eq!(pos.cost_basis(), dec!(5));
        assert_eq!(pos.pnl(dec!(0.60)), dec!(1));
        assert_eq!(pos.pnl_pct(dec!(0.60)), dec!(20));

        pos.mark(dec!(0.40));
        assert_eq!(pos.current_price, dec!(0.40));
        assert_eq!(pos.unrealized_pnl, dec!(-1));
        assert_eq!(pos.unrealized_pnl_pct, dec!(-20));
    }

    #[test]
    fn short_position_profits_when_price_falls() {
        let pos = Position::new("p2", "token", PositionSide::Short, dec!(10), dec!(0.50));

        assert_eq!(pos.side.exit_side(), Side::Buy);
        assert_eq!(pos.pnl(dec!(0.40)), dec!(1));
        assert_eq!(pos.pnl_pct(dec!(0.40)), dec!(20));
    }

    #[test]
    fn exits_reduce_quantity_and_close() {
        let mut pos = Position::new("p3", "token", PositionSide::Long, dec!(100), dec!(0.50));

        pos.apply_exit(dec!(50)).unwrap();
        assert_eq!(pos.quantity, dec!(50));
        assert_eq!(pos.exited_quantity(), dec!(50));
        assert_eq!(pos.status, PositionStatus::Open);

        pos.apply_exit(dec!(50)).unwrap();
        assert!(pos.is_closed());
        assert!(!pos.is_actionable());
    }

    #[test]
    fn over_exit_is_rejected_not_clamped() {
        let mut pos = Position::new("p4", "token", PositionSide::Long, dec!(10), dec!(0.50));

        let err = pos.apply_exit(dec!(11)).unwrap_err();
        assert!(matches!(err, InvariantViolation::OverExit { .. }));
        assert_eq!(pos.quantity, dec!(10));
    }

    #[test]
    fn review_flag_keeps_first_reason() {
        let mut pos = Position::new("p5", "token", PositionSide::Long, dec!(10), dec!(0.50));
        pos.flag_for_review("circuit breaker");
        pos.flag_for_review("later");

        assert_eq!(pos.needs_review.as_deref(), Some("circuit breaker"));
        assert!(!pos.is_actionable());
    }
}
