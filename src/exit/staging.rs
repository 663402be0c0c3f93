//! Partial exit staging and exit sizing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::conditions::{ExitCondition, ExitConditionResult};
use crate::trading::Position;

/// Marker recorded on each position exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExitStage {
    /// Fill belonging to the first staged partial exit.
    FirstPartial,
    /// Fill belonging to the second staged partial exit.
    SecondPartial,
    /// Fill that closed the position.
    Final,
    /// Any other fill that reduced, but did not close, the position.
    Interim,
}

/// Staged profit-taking thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    /// P&L percent for the first stage.
    pub first_pct: Decimal,
    /// Fraction of the original quantity closed at the first stage.
    pub first_fraction: Decimal,
    /// P&L percent for the second stage.
    pub second_pct: Decimal,
    /// Fraction of the remaining quantity closed at the second stage.
    pub second_fraction: Decimal,
    /// Quantity granularity.
    pub lot_size: Decimal,
}

impl StagePlan {
    /// Next pending stage and its P&L threshold, if any stage remains.
    pub fn next_stage(&self, stages_done: u8) -> Option<(ExitStage, Decimal)> {
        match stages_done {
            0 => Some((ExitStage::FirstPartial, self.first_pct)),
            1 => Some((ExitStage::SecondPartial, self.second_pct)),
            _ => None,
        }
    }

    /// Quantity the next pending stage would close, rounded down to lots.
    pub fn stage_quantity(&self, position: &Position) -> Decimal {
        let raw = match position.partial_stages_done {
            0 => position.original_quantity * self.first_fraction,
            1 => position.quantity * self.second_fraction,
            _ => Decimal::ZERO,
        };
        self.floor_to_lot(raw).min(position.quantity)
    }

    fn floor_to_lot(&self, quantity: Decimal) -> Decimal {
        if self.lot_size <= Decimal::ZERO {
            return quantity;
        }
        (quantity / self.lot_size).floor() * self.lot_size
    }
}

/// What the executor should do for a resolved condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPlan {
    /// The condition being acted on.
    pub trigger: ExitConditionResult,
    /// Quantity to exit.
    pub quantity: Decimal,
    /// Staged partial this exit belongs to, if any.
    pub partial: Option<ExitStage>,
}

impl ExitPlan {
    /// Size the exit for a resolved condition.
    ///
    /// `partial_exit_target` takes the pending stage quantity; every other
    /// condition takes the full remaining quantity.
    pub fn for_trigger(position: &Position, trigger: ExitConditionResult, stages: &StagePlan) -> Self {
        if trigger.condition == ExitCondition::PartialExitTarget {
            let partial = stages.next_stage(position.partial_stages_done).map(|(s, _)| s);
            return Self {
                trigger,
                quantity: stages.stage_quantity(position),
                partial,
            };
        }

        Self {
            trigger,
            quantity: position.quantity,
            partial: None,
        }
    }

    /// Stage marker for a fill that leaves `remaining_after` open.
    pub fn marker_for_fill(&self, remaining_after: Decimal) -> ExitStage {
        if remaining_after.is_zero() {
            return ExitStage::Final;
        }
        self.partial.unwrap_or(ExitStage::Interim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::conditions::Priority;
    use crate::trading::PositionSide;
    use rust_decimal_macros::dec;

    fn plan() -> StagePlan {
        StagePlan {
            first_pct: dec!(15),
            first_fraction: dec!(0.5),
            second_pct: dec!(25),
            second_fraction: dec!(0.5),
            lot_size: dec!(1),
        }
    }

    fn triggered(condition: ExitCondition) -> ExitConditionResult {
        ExitConditionResult::new(condition, true, None)
    }

    #[test]
    fn stages_close_half_then_half_of_remainder() {
        let stages = plan();
        let mut pos = Position::new("p", "t", PositionSide::Long, dec!(100), dec!(0.50));

        assert_eq!(stages.next_stage(0), Some((ExitStage::FirstPartial, dec!(15))));
        assert_eq!(stages.stage_quantity(&pos), dec!(50));

        pos.apply_exit(dec!(50)).unwrap();
        pos.partial_stages_done = 1;
        assert_eq!(stages.stage_quantity(&pos), dec!(25));

        pos.apply_exit(dec!(25)).unwrap();
        pos.partial_stages_done = 2;
        assert_eq!(stages.next_stage(2), None);
        assert_eq!(stages.stage_quantity(&pos), dec!(0));
        assert_eq!(pos.quantity, dec!(25));
    }

    #[test]
    fn stage_quantity_rounds_down_to_lot() {
        let stages = StagePlan {
            lot_size: dec!(5),
            ..plan()
        };
        let pos = Position::new("p", "t", PositionSide::Long, dec!(33), dec!(0.50));
        assert_eq!(stages.stage_quantity(&pos), dec!(15));
    }

    #[test]
    fn full_exits_take_remaining_quantity() {
        let pos = Position::new("p", "t", PositionSide::Long, dec!(40), dec!(0.50));
        let exit = ExitPlan::for_trigger(&pos, triggered(ExitCondition::StopLoss), &plan());

        assert_eq!(exit.quantity, dec!(40));
        assert_eq!(exit.partial, None);
        assert_eq!(exit.trigger.priority, Priority::Critical);
        assert_eq!(exit.marker_for_fill(dec!(10)), ExitStage::Interim);
        assert_eq!(exit.marker_for_fill(dec!(0)), ExitStage::Final);
    }

    #[test]
    fn partial_exit_markers() {
        let pos = Position::new("p", "t", PositionSide::Long, dec!(100), dec!(0.50));
        let exit = ExitPlan::for_trigger(&pos, triggered(ExitCondition::PartialExitTarget), &plan());

        assert_eq!(exit.quantity, dec!(50));
        assert_eq!(exit.partial, Some(ExitStage::FirstPartial));
        assert_eq!(exit.marker_for_fill(dec!(50)), ExitStage::FirstPartial);
    }
}
