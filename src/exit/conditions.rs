//! Exit condition evaluation.
//!
//! Ten predicates are evaluated for every position on every cycle. There is
//! no short-circuiting: the full result set goes to the resolver, so a
//! higher-tier condition can never be hidden behind a lower one.

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use time::OffsetDateTime;
use tracing::{debug, instrument};

use super::staging::StagePlan;
use crate::market::Quote;
use crate::trading::Position;

/// Urgency tier. Ordered so that `Critical > High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Priority {
    /// Conservative, patient exits.
    Low,
    /// Fair-priced exits.
    Medium,
    /// Aggressive exits that escalate to market.
    High,
    /// Immediate market exits.
    Critical,
}

/// The ten exit conditions.
///
/// Declaration order is the tie-break precedence used by the resolver.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExitCondition {
    /// Unrealized P&L% at or below the stop-loss floor.
    StopLoss,
    /// System-wide halt signal active.
    CircuitBreaker,
    /// Trailing stop crossed.
    TrailingStop,
    /// Near settlement while losing.
    TimeBasedUrgent,
    /// Spread too wide or volume too thin.
    LiquidityDriedUp,
    /// Unrealized P&L% at or above take-profit.
    ProfitTarget,
    /// A staged profit threshold crossed and not yet executed.
    PartialExitTarget,
    /// Edge decayed below the low-edge threshold.
    EarlyExit,
    /// Edge no longer positive.
    EdgeDisappeared,
    /// Portfolio asked for a rebalance.
    Rebalance,
}

impl ExitCondition {
    /// Fixed tier of this condition.
    pub fn priority(&self) -> Priority {
        match self {
            ExitCondition::StopLoss | ExitCondition::CircuitBreaker => Priority::Critical,
            ExitCondition::TrailingStop
            | ExitCondition::TimeBasedUrgent
            | ExitCondition::LiquidityDriedUp => Priority::High,
            ExitCondition::ProfitTarget | ExitCondition::PartialExitTarget => Priority::Medium,
            ExitCondition::EarlyExit | ExitCondition::EdgeDisappeared | ExitCondition::Rebalance => {
                Priority::Low
            }
        }
    }
}

/// Outcome of one predicate for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitConditionResult {
    /// Which condition.
    pub condition: ExitCondition,
    /// Its tier.
    pub priority: Priority,
    /// Whether it fired.
    pub triggered: bool,
    /// Value the decision was based on, when one exists.
    pub measured: Option<Decimal>,
}

impl ExitConditionResult {
    /// Build a result, deriving the tier from the condition.
    pub fn new(condition: ExitCondition, triggered: bool, measured: Option<Decimal>) -> Self {
        Self {
            condition,
            priority: condition.priority(),
            triggered,
            measured,
        }
    }
}

/// Full result set for one cycle.
pub type ConditionResults = SmallVec<[ExitConditionResult; 10]>;

/// Inputs from collaborators gathered for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketContext {
    /// Circuit breaker state at the top of the cycle.
    pub halted: bool,
    /// Current edge, if the edge service had one.
    pub edge: Option<Decimal>,
    /// Rebalance hint from the portfolio.
    pub rebalance: bool,
    /// Evaluation time.
    pub now: OffsetDateTime,
}

impl MarketContext {
    /// Context with no external signals.
    pub fn quiet(now: OffsetDateTime) -> Self {
        Self {
            halted: false,
            edge: None,
            rebalance: false,
            now,
        }
    }
}

/// Exit thresholds for one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitThresholds {
    /// Stop-loss floor on P&L percent.
    pub stop_loss_pct: Decimal,
    /// Take-profit level on P&L percent.
    pub take_profit_pct: Decimal,
    /// Whether new positions get a trailing stop.
    pub trailing_enabled: bool,
    /// Favorable move that arms the trailing stop.
    pub trailing_activation: Decimal,
    /// Trailing stop distance.
    pub trailing_distance: Decimal,
    /// Staged partial exits.
    pub stages: StagePlan,
    /// Settlement proximity for urgent exits of losing positions.
    pub urgent_time_threshold: Duration,
    /// Maximum tolerated spread.
    pub max_spread: Decimal,
    /// Minimum tolerated displayed volume.
    pub min_volume: Decimal,
    /// Edge below which the position is exited early.
    pub low_edge_threshold: Decimal,
}

impl ExitThresholds {
    /// Price at which the stop-loss floor is reached for this position.
    pub fn stop_loss_price(&self, position: &Position) -> Decimal {
        let move_ = position.entry_price * self.stop_loss_pct / Decimal::ONE_HUNDRED;
        match position.side {
            crate::trading::PositionSide::Long => position.entry_price + move_,
            crate::trading::PositionSide::Short => position.entry_price - move_,
        }
    }
}

/// Default thresholds plus per-strategy overrides.
#[derive(Debug, Clone)]
pub struct ThresholdBook {
    default: ExitThresholds,
    overrides: HashMap<String, ExitThresholds>,
}

impl ThresholdBook {
    /// Create a book with only default thresholds.
    pub fn new(default: ExitThresholds) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Add thresholds for a named strategy.
    pub fn with_strategy(mut self, strategy: impl Into<String>, thresholds: ExitThresholds) -> Self {
        self.overrides.insert(strategy.into(), thresholds);
        self
    }

    /// Thresholds for a position's strategy, falling back to the default.
    pub fn for_position(&self, position: &Position) -> &ExitThresholds {
        self.overrides.get(&position.strategy).unwrap_or(&self.default)
    }
}

/// Evaluates all exit predicates for a position.
#[derive(Debug, Clone)]
pub struct ExitConditionEvaluator {
    thresholds: ThresholdBook,
}

impl ExitConditionEvaluator {
    /// Create an evaluator over a threshold book.
    pub fn new(thresholds: ThresholdBook) -> Self {
        Self { thresholds }
    }

    /// Thresholds that apply to a position.
    pub fn thresholds_for(&self, position: &Position) -> &ExitThresholds {
        self.thresholds.for_position(position)
    }

    /// Evaluate every condition. Always returns exactly ten results.
    ///
    /// Expects `position` to be marked at this cycle's price and its trailing
    /// stop already updated.
    #[instrument(skip_all, fields(position_id = %position.id))]
    pub fn evaluate(&self, position: &Position, quote: &Quote, ctx: &MarketContext) -> ConditionResults {
        let t = self.thresholds.for_position(position);

        let results: ConditionResults = ExitCondition::iter()
            .map(|condition| match condition {
                ExitCondition::StopLoss => stop_loss(position, t),
                ExitCondition::CircuitBreaker => circuit_breaker(ctx),
                ExitCondition::TrailingStop => trailing_stop(position),
                ExitCondition::TimeBasedUrgent => time_based_urgent(position, t, ctx),
                ExitCondition::LiquidityDriedUp => liquidity_dried_up(quote, t),
                ExitCondition::ProfitTarget => profit_target(position, t),
                ExitCondition::PartialExitTarget => partial_exit_target(position, t),
                ExitCondition::EarlyExit => early_exit(t, ctx),
                ExitCondition::EdgeDisappeared => edge_disappeared(ctx),
                ExitCondition::Rebalance => rebalance(ctx),
            })
            .collect();

        let fired: SmallVec<[ExitCondition; 10]> =
            results.iter().filter(|r| r.triggered).map(|r| r.condition).collect();
        if !fired.is_empty() {
            debug!(conditions = ?fired, pnl_pct = %position.unrealized_pnl_pct, "Exit conditions triggered");
        }

        results
    }
}

fn flag(on: bool) -> Option<Decimal> {
    Some(if on { Decimal::ONE } else { Decimal::ZERO })
}

fn stop_loss(position: &Position, t: &ExitThresholds) -> ExitConditionResult {
    let pct = position.unrealized_pnl_pct;
    ExitConditionResult::new(ExitCondition::StopLoss, pct <= t.stop_loss_pct, Some(pct))
}

fn circuit_breaker(ctx: &MarketContext) -> ExitConditionResult {
    ExitConditionResult::new(ExitCondition::CircuitBreaker, ctx.halted, flag(ctx.halted))
}

fn trailing_stop(position: &Position) -> ExitConditionResult {
    ExitConditionResult::new(
        ExitCondition::TrailingStop,
        position.trailing.is_triggered(),
        position.trailing.stop_price(),
    )
}

fn time_based_urgent(position: &Position, t: &ExitThresholds, ctx: &MarketContext) -> ExitConditionResult {
    let Some(settles_at) = position.settles_at else {
        return ExitConditionResult::new(ExitCondition::TimeBasedUrgent, false, None);
    };

    let remaining_secs = (settles_at - ctx.now).whole_seconds().max(0);
    let threshold_secs = i64::try_from(t.urgent_time_threshold.as_secs()).unwrap_or(i64::MAX);
    let losing = position.unrealized_pnl < Decimal::ZERO;

    ExitConditionResult::new(
        ExitCondition::TimeBasedUrgent,
        remaining_secs < threshold_secs && losing,
        Some(Decimal::from(remaining_secs)),
    )
}

fn liquidity_dried_up(quote: &Quote, t: &ExitThresholds) -> ExitConditionResult {
    let spread = quote.spread();
    let wide = spread > t.max_spread;
    let thin = quote.volume < t.min_volume;
    let measured = if thin && !wide { quote.volume } else { spread };

    ExitConditionResult::new(ExitCondition::LiquidityDriedUp, wide || thin, Some(measured))
}

fn profit_target(position: &Position, t: &ExitThresholds) -> ExitConditionResult {
    let pct = position.unrealized_pnl_pct;
    ExitConditionResult::new(ExitCondition::ProfitTarget, pct >= t.take_profit_pct, Some(pct))
}

fn partial_exit_target(position: &Position, t: &ExitThresholds) -> ExitConditionResult {
    let pct = position.unrealized_pnl_pct;
    let triggered = match t.stages.next_stage(position.partial_stages_done) {
        Some((_, threshold)) => pct >= threshold && t.stages.stage_quantity(position) > Decimal::ZERO,
        None => false,
    };

    ExitConditionResult::new(ExitCondition::PartialExitTarget, triggered, Some(pct))
}

fn early_exit(t: &ExitThresholds, ctx: &MarketContext) -> ExitConditionResult {
    let triggered = ctx.edge.is_some_and(|edge| edge < t.low_edge_threshold);
    ExitConditionResult::new(ExitCondition::EarlyExit, triggered, ctx.edge)
}

fn edge_disappeared(ctx: &MarketContext) -> ExitConditionResult {
    let triggered = ctx.edge.is_some_and(|edge| edge <= Decimal::ZERO);
    ExitConditionResult::new(ExitCondition::EdgeDisappeared, triggered, ctx.edge)
}

fn rebalance(ctx: &MarketContext) -> ExitConditionResult {
    ExitConditionResult::new(ExitCondition::Rebalance, ctx.rebalance, flag(ctx.rebalance))
}
