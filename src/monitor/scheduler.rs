//! Per-position cadence and next-wake scheduling.

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use strum::Display;
use tokio::time::Instant;

use crate::exit::conditions::{ExitConditionResult, ExitThresholds, Priority};
use crate::trading::{Position, PositionSide};

/// Monitoring speed for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Cadence {
    /// Nothing close to a protective threshold.
    Normal,
    /// Near a CRITICAL or HIGH threshold.
    Urgent,
}

/// Cadence intervals and the proximity that switches between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadencePolicy {
    /// Interval while normal.
    pub normal: Duration,
    /// Interval while urgent.
    pub urgent: Duration,
    /// Distance, in percent of the mark, that counts as near a threshold.
    pub proximity_pct: Decimal,
}

impl CadencePolicy {
    /// Interval for a cadence.
    pub fn interval(&self, cadence: Cadence) -> Duration {
        match cadence {
            Cadence::Normal => self.normal,
            Cadence::Urgent => self.urgent,
        }
    }

    /// Pick the cadence from the latest evaluation.
    ///
    /// Urgent when a CRITICAL/HIGH condition is triggered, or the mark is
    /// within `proximity_pct` of the stop-loss level or an armed trailing stop.
    ///
    /// Proximity is measured for price levels only. The settlement-time
    /// window and the spread and volume limits have no distance from the
    /// mark; they switch to urgent once their HIGH condition triggers.
    pub fn cadence_for(
        &self,
        position: &Position,
        thresholds: &ExitThresholds,
        results: &[ExitConditionResult],
    ) -> Cadence {
        let protective_fired = results
            .iter()
            .any(|r| r.triggered && r.priority >= Priority::High);
        if protective_fired {
            return Cadence::Urgent;
        }

        let mark = position.current_price;
        let near_stop_loss = self.is_near(position.side, mark, thresholds.stop_loss_price(position));
        let near_trailing = position.trailing.is_armed()
            && position
                .trailing
                .stop_price()
                .is_some_and(|stop| self.is_near(position.side, mark, stop));

        if near_stop_loss || near_trailing {
            Cadence::Urgent
        } else {
            Cadence::Normal
        }
    }

    fn is_near(&self, side: PositionSide, mark: Decimal, level: Decimal) -> bool {
        if mark <= Decimal::ZERO {
            return true;
        }
        // Room left before the level is hit, as a percent of the mark.
        let room = side.favorable_move(level, mark);
        room / mark * Decimal::ONE_HUNDRED <= self.proximity_pct
    }
}

/// Next-wake bookkeeping for every monitored position.
#[derive(Debug, Clone)]
pub struct Scheduler {
    policy: CadencePolicy,
    entries: HashMap<String, (Cadence, Instant)>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new(policy: CadencePolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    /// Record the end of a cycle and compute the next wake time.
    pub fn reschedule(&mut self, position_id: &str, cadence: Cadence, cycle_end: Instant) -> Instant {
        let wake = cycle_end + self.policy.interval(cadence);
        self.entries.insert(position_id.to_string(), (cadence, wake));
        wake
    }

    /// Current cadence of a position.
    pub fn cadence(&self, position_id: &str) -> Option<Cadence> {
        self.entries.get(position_id).map(|(c, _)| *c)
    }

    /// Next wake time of a position.
    pub fn next_wake(&self, position_id: &str) -> Option<Instant> {
        self.entries.get(position_id).map(|(_, w)| *w)
    }

    /// Forget a position.
    pub fn remove(&mut self, position_id: &str) {
        self.entries.remove(position_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exit::conditions::ExitCondition;
    use rust_decimal_macros::dec;

    fn policy() -> CadencePolicy {
        Config::default().cadence_policy()
    }

    fn position_at(price: Decimal) -> Position {
        let mut pos = Position::new("pos-1", "tok", PositionSide::Long, dec!(10), dec!(0.50));
        pos.mark(price);
        pos
    }

    #[test]
    fn quiet_position_is_normal() {
        let t = Config::default().exit_thresholds();
        let pos = position_at(dec!(0.55));
        assert_eq!(policy().cadence_for(&pos, &t, &[]), Cadence::Normal);
    }

    #[test]
    fn high_trigger_is_urgent_but_medium_is_not() {
        let t = Config::default().exit_thresholds();
        let pos = position_at(dec!(0.55));
        let high = ExitConditionResult::new(ExitCondition::LiquidityDriedUp, true, None);
        let medium = ExitConditionResult::new(ExitCondition::ProfitTarget, true, None);

        assert_eq!(policy().cadence_for(&pos, &t, &[high]), Cadence::Urgent);
        assert_eq!(policy().cadence_for(&pos, &t, &[medium]), Cadence::Normal);
    }

    #[test]
    fn near_stop_loss_level_is_urgent() {
        let t = Config::default().exit_thresholds();
        // Stop-loss level for entry 0.50 at -20% is 0.40; 0.408 is ~1.96% away.
        let pos = position_at(dec!(0.408));
        assert_eq!(policy().cadence_for(&pos, &t, &[]), Cadence::Urgent);

        let pos = position_at(dec!(0.45));
        assert_eq!(policy().cadence_for(&pos, &t, &[]), Cadence::Normal);
    }

    #[test]
    fn near_armed_trailing_stop_is_urgent() {
        let t = Config::default().exit_thresholds();
        let mut pos = Position::new("pos-1", "tok", PositionSide::Long, dec!(10), dec!(0.50))
            .with_trailing(dec!(0.05), dec!(0.05));
        pos.trailing.observe(PositionSide::Long, dec!(0.80));
        pos.mark(dec!(0.76));

        assert_eq!(pos.trailing.stop_price(), Some(dec!(0.75)));
        assert_eq!(policy().cadence_for(&pos, &t, &[]), Cadence::Urgent);
    }

    #[tokio::test(start_paused = true)]
    async fn next_wake_follows_cadence() {
        let mut scheduler = Scheduler::new(policy());
        let now = Instant::now();

        let wake = scheduler.reschedule("pos-1", Cadence::Urgent, now);
        assert_eq!(wake, now + Duration::from_secs(5));
        assert_eq!(scheduler.cadence("pos-1"), Some(Cadence::Urgent));

        let wake = scheduler.reschedule("pos-1", Cadence::Normal, now);
        assert_eq!(scheduler.next_wake("pos-1"), Some(wake));
        assert_eq!(wake, now + Duration::from_secs(30));

        scheduler.remove("pos-1");
        assert_eq!(scheduler.next_wake("pos-1"), None);
    }
}
