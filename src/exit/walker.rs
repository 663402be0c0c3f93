//! Exit execution by price walking.
//!
//! Each urgency tier maps to an [`ExecutionProfile`]. A walk is a bounded
//! sequence of placements:
//!
//! ```text
//! CRITICAL   market, market, ...                (up to max_stages)
//! HIGH       limit+1, limit+2, ..., market      (max_stages limits, then one market)
//! MEDIUM     limit+0, limit+1, ...              (max_stages limits, then give up)
//! LOW        limit-1, limit+0, ...              (max_stages limits, then give up)
//! ```
//!
//! Limit offsets are in ticks toward the opposing side of the book. Every
//! placement writes one `ExitAttempt`; every fill writes one `PositionExit`,
//! reduces the position and saves it to the position store.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use strum::Display;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::conditions::{ExitCondition, Priority};
use super::staging::ExitPlan;
use crate::alerts::{Alert, AlertSink};
use crate::audit::{AttemptOutcome, AuditLog, ExitAttempt, PositionExit};
use crate::error::InvariantViolation;
use crate::market::Quote;
use crate::metrics;
use crate::monitor::budget::CallBudget;
use crate::monitor::circuit::{HaltPolicy, HaltSignal};
use crate::monitor::store::PositionStore;
use crate::trading::gateway::wait_for_fill;
use crate::trading::{
    OrderGateway, OrderHandle, OrderReport, OrderRequest, OrderStatus, Position, PositionStatus, Side,
};

/// How the first order of a walk is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OrderStyle {
    /// Market orders only.
    Market,
    /// One tick through the own-side best.
    Aggressive,
    /// At the own-side best.
    Fair,
    /// One tick behind the own-side best.
    Conservative,
}

impl OrderStyle {
    /// Initial offset in ticks toward the opposing side.
    pub fn tick_offset(&self) -> i64 {
        match self {
            OrderStyle::Aggressive => 1,
            OrderStyle::Market | OrderStyle::Fair => 0,
            OrderStyle::Conservative => -1,
        }
    }
}

/// What happens when the limit stages run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Escalation {
    /// Every stage is already a market order.
    RetryMarket,
    /// Send one market order.
    Market,
    /// Stop and leave the position open.
    Cancel,
}

/// Execution parameters for one urgency tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionProfile {
    /// Initial pricing.
    pub style: OrderStyle,
    /// Wait per placement.
    pub stage_timeout: Duration,
    /// Number of stages before escalation.
    pub max_stages: u32,
    /// Behavior after the last stage.
    pub escalation: Escalation,
}

impl ExecutionProfile {
    /// Immediate market orders, retried up to `attempts` times.
    pub fn market(stage_timeout: Duration, attempts: u32) -> Self {
        Self {
            style: OrderStyle::Market,
            stage_timeout,
            max_stages: attempts,
            escalation: Escalation::RetryMarket,
        }
    }

    /// Aggressive limits escalating to market.
    pub fn aggressive(stage_timeout: Duration, max_stages: u32) -> Self {
        Self {
            style: OrderStyle::Aggressive,
            stage_timeout,
            max_stages,
            escalation: Escalation::Market,
        }
    }

    /// Fair limits, cancelled when stages run out.
    pub fn fair(stage_timeout: Duration, max_stages: u32) -> Self {
        Self {
            style: OrderStyle::Fair,
            stage_timeout,
            max_stages,
            escalation: Escalation::Cancel,
        }
    }

    /// Conservative limits, cancelled when stages run out.
    pub fn conservative(stage_timeout: Duration, max_stages: u32) -> Self {
        Self {
            style: OrderStyle::Conservative,
            stage_timeout,
            max_stages,
            escalation: Escalation::Cancel,
        }
    }

    /// The placements this profile allows, in order.
    pub fn steps(&self) -> Vec<Step> {
        let mut steps: Vec<Step> = match self.style {
            OrderStyle::Market => (0..self.max_stages).map(|_| Step::Market).collect(),
            _ => (0..self.max_stages).map(Step::Limit).collect(),
        };
        if self.escalation == Escalation::Market {
            steps.push(Step::Market);
        }
        steps
    }

    /// Whether running out of steps leaves the position needing review.
    pub fn must_complete(&self) -> bool {
        self.escalation != Escalation::Cancel
    }
}

/// One placement in a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Limit order at the given 0-based stage.
    Limit(u32),
    /// Market order.
    Market,
}

/// Profiles for all four tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionProfiles {
    /// CRITICAL profile.
    pub critical: ExecutionProfile,
    /// HIGH profile.
    pub high: ExecutionProfile,
    /// MEDIUM profile.
    pub medium: ExecutionProfile,
    /// LOW profile.
    pub low: ExecutionProfile,
}

impl ExecutionProfiles {
    /// Profile for a tier.
    pub fn for_priority(&self, priority: Priority) -> &ExecutionProfile {
        match priority {
            Priority::Critical => &self.critical,
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }
}

/// Walker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkSettings {
    /// Per-tier profiles.
    pub profiles: ExecutionProfiles,
    /// Price increment.
    pub tick_size: Decimal,
    /// Interval between order status polls.
    pub poll_interval: Duration,
}

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum WalkOutcome {
    /// The planned quantity was exited.
    Filled,
    /// MEDIUM/LOW ran out of stages; position left open.
    Abandoned,
    /// CRITICAL/HIGH ran out of escalation; position needs review.
    Exhausted,
    /// Circuit breaker stopped the walk between stages. Under hold-and-alert
    /// the position needs review; under flatten the next cycle markets out.
    Halted,
}

/// Summary of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkReport {
    /// How it ended.
    pub outcome: WalkOutcome,
    /// Quantity exited during the walk.
    pub filled_qty: Decimal,
    /// Placements made.
    pub attempts: u32,
}

struct AttemptResult {
    filled: Decimal,
    outcome: AttemptOutcome,
}

/// Executes exit plans against the order gateway.
pub struct PriceWalker {
    gateway: Arc<dyn OrderGateway>,
    budget: Arc<CallBudget>,
    store: Arc<dyn PositionStore>,
    audit: Arc<dyn AuditLog>,
    alerts: Arc<dyn AlertSink>,
    halt: HaltSignal,
    halt_policy: HaltPolicy,
    settings: WalkSettings,
}

impl PriceWalker {
    /// Create a walker.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        budget: Arc<CallBudget>,
        store: Arc<dyn PositionStore>,
        audit: Arc<dyn AuditLog>,
        alerts: Arc<dyn AlertSink>,
        halt: HaltSignal,
        halt_policy: HaltPolicy,
        settings: WalkSettings,
    ) -> Self {
        Self {
            gateway,
            budget,
            store,
            audit,
            alerts,
            halt,
            halt_policy,
            settings,
        }
    }

    /// Limit price for a 0-based stage.
    ///
    /// Starts from the exiting side's own best (ask when selling, bid when
    /// buying), shifts by the style offset plus one tick per stage toward the
    /// opposing side, and clamps into `[tick, 1 - tick]`.
    pub fn limit_price(&self, side: Side, style: OrderStyle, stage: u32, quote: &Quote) -> Decimal {
        let tick = self.settings.tick_size;
        let ticks = Decimal::from(style.tick_offset() + i64::from(stage));
        let price = match side {
            Side::Sell => quote.ask - ticks * tick,
            Side::Buy => quote.bid + ticks * tick,
        };
        price.max(tick).min(Decimal::ONE - tick)
    }

    /// Execute an exit plan.
    ///
    /// Returns an error only for invariant violations; the position is left
    /// untouched past the violating fill. Every state change is saved to the
    /// position store as it happens.
    #[instrument(
        skip_all,
        fields(
            position_id = %position.id,
            condition = %plan.trigger.condition,
            priority = %plan.trigger.priority,
            quantity = %plan.quantity
        )
    )]
    pub async fn execute(
        &self,
        position: &mut Position,
        plan: &ExitPlan,
        quote: &Quote,
    ) -> Result<WalkReport, InvariantViolation> {
        let _timer = metrics::timer_exit_walk();
        let profile = *self.settings.profiles.for_priority(plan.trigger.priority);
        let side = position.side.exit_side();
        let halt_exempt = self.halt_policy == HaltPolicy::Flatten
            && plan.trigger.condition == ExitCondition::CircuitBreaker;

        position.status = PositionStatus::Exiting;
        position.last_exit_priority = Some(plan.trigger.priority);
        self.store.save(position);

        let mut target = plan.quantity.min(position.quantity);
        let mut filled_total = Decimal::ZERO;
        let mut attempts = 0u32;
        let mut halted = false;

        info!(style = %profile.style, max_stages = profile.max_stages, "Starting exit walk");

        for step in profile.steps() {
            if target <= Decimal::ZERO {
                break;
            }
            if !halt_exempt && self.halt.is_halted() {
                halted = true;
                break;
            }

            attempts += 1;
            let request = match step {
                Step::Limit(stage) => {
                    let price = self.limit_price(side, profile.style, stage, quote);
                    OrderRequest::limit(&position.token_id, side, price, target)
                }
                Step::Market => OrderRequest::market(&position.token_id, side, target),
            };

            let result = self
                .attempt(position, plan, &request, attempts, profile.stage_timeout)
                .await?;
            target -= result.filled;
            filled_total += result.filled;

            debug!(
                attempt = attempts,
                outcome = %result.outcome,
                filled = %result.filled,
                remaining = %target,
                "Exit attempt finished"
            );
        }

        if plan.partial.is_some() && filled_total > Decimal::ZERO {
            position.partial_stages_done += 1;
        }

        let outcome = if target <= Decimal::ZERO {
            WalkOutcome::Filled
        } else if halted {
            WalkOutcome::Halted
        } else if profile.must_complete() {
            WalkOutcome::Exhausted
        } else {
            WalkOutcome::Abandoned
        };

        match outcome {
            WalkOutcome::Halted if self.halt_policy == HaltPolicy::Flatten => {
                warn!(remaining = %position.quantity, "Exit walk halted, position left for the flatten exit");
            }
            WalkOutcome::Halted => {
                let reason = "circuit breaker halted exit walk";
                warn!(remaining = %position.quantity, "Exit walk halted by circuit breaker");
                self.freeze(position, reason);
            }
            WalkOutcome::Exhausted => {
                warn!(remaining = %position.quantity, "Exit walk exhausted escalation");
                self.alerts.raise(Alert::ExitExhausted {
                    position_id: position.id.clone(),
                    condition: plan.trigger.condition,
                    priority: plan.trigger.priority,
                    remaining: position.quantity,
                });
                self.freeze(position, "exit escalation exhausted");
            }
            WalkOutcome::Abandoned => {
                info!(remaining = %position.quantity, "Exit walk gave up, position stays open");
            }
            WalkOutcome::Filled => {
                info!(filled = %filled_total, remaining = %position.quantity, "Exit walk filled");
            }
        }

        if !position.is_closed() {
            position.status = PositionStatus::Open;
        }
        self.store.save(position);

        Ok(WalkReport {
            outcome,
            filled_qty: filled_total,
            attempts,
        })
    }

    fn freeze(&self, position: &mut Position, reason: &str) {
        position.flag_for_review(reason);
        self.alerts.raise(Alert::NeedsReview {
            position_id: position.id.clone(),
            reason: reason.to_string(),
        });
    }

    async fn attempt(
        &self,
        position: &mut Position,
        plan: &ExitPlan,
        request: &OrderRequest,
        sequence: u32,
        timeout: Duration,
    ) -> Result<AttemptResult, InvariantViolation> {
        let (handle, report) = match self.place_and_wait(position, request, timeout).await {
            Some(placed) => placed,
            None => {
                self.log_attempt(position, plan, request, sequence, timeout, None, AttemptOutcome::Rejected);
                return Ok(AttemptResult {
                    filled: Decimal::ZERO,
                    outcome: AttemptOutcome::Rejected,
                });
            }
        };

        let filled = report.filled_qty;
        let outcome = if filled >= request.quantity {
            AttemptOutcome::Filled
        } else if filled > Decimal::ZERO {
            AttemptOutcome::PartiallyFilled
        } else if report.status == OrderStatus::Rejected {
            AttemptOutcome::Rejected
        } else {
            AttemptOutcome::TimedOut
        };

        self.log_attempt(position, plan, request, sequence, timeout, Some(&report), outcome);

        if filled > request.quantity {
            return Err(InvariantViolation::OverFill {
                order_id: handle.order_id,
                filled,
                size: request.quantity,
            });
        }

        if filled > Decimal::ZERO {
            position.apply_exit(filled)?;
            self.store.save(position);

            let stage = plan.marker_for_fill(position.quantity);
            let exit = PositionExit {
                position_id: position.id.clone(),
                condition: plan.trigger.condition,
                priority: plan.trigger.priority,
                quantity: filled,
                price: report
                    .fill_price
                    .or(request.price)
                    .unwrap_or(position.current_price),
                stage,
                timestamp: OffsetDateTime::now_utc(),
            };
            if let Err(e) = self.audit.record_exit(&exit) {
                warn!(error = %e, "Failed to record position exit");
                metrics::inc_audit_failures();
            }
            metrics::inc_position_exits(&stage.to_string());
            info!(quantity = %filled, price = %exit.price, stage = %stage, "Position exit recorded");
        }

        Ok(AttemptResult { filled, outcome })
    }

    /// Place an order and wait out its stage. `None` when the gateway refused it.
    async fn place_and_wait(
        &self,
        position: &Position,
        request: &OrderRequest,
        timeout: Duration,
    ) -> Option<(OrderHandle, OrderReport)> {
        if let Err(reason) = request.validate() {
            warn!(reason = %reason, "Exit order failed validation");
            return None;
        }

        self.budget.acquire().await;
        let handle = match self.gateway.place_order(request).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, order_type = %request.order_type, "Exit order rejected");
                return None;
            }
        };
        debug!(order_id = %handle.order_id, price = ?request.price, "Exit order placed");

        let gateway = self.gateway.as_ref();
        let mut report = wait_for_fill(
            gateway,
            &self.budget,
            &handle,
            request,
            timeout,
            self.settings.poll_interval,
        )
        .await;

        if !report.status.is_terminal() && report.filled_qty < request.quantity {
            self.budget.acquire().await;
            if let Err(e) = gateway.cancel_order(&handle).await {
                warn!(order_id = %handle.order_id, error = %e, "Failed to cancel exit order");
            }

            // Fills can race the cancel.
            self.budget.acquire().await;
            match gateway.poll_order(&handle).await {
                Ok(after) => {
                    if after.filled_qty < report.filled_qty {
                        self.mismatch(
                            position,
                            &handle.order_id,
                            format!(
                                "filled quantity went from {} to {}",
                                report.filled_qty, after.filled_qty
                            ),
                        );
                    } else {
                        report = after;
                    }
                }
                Err(e) => {
                    warn!(order_id = %handle.order_id, error = %e, "Final poll after cancel failed");
                }
            }
        }

        if report.filled_qty > request.quantity {
            self.mismatch(
                position,
                &handle.order_id,
                format!(
                    "filled {} exceeds order size {}",
                    report.filled_qty, request.quantity
                ),
            );
        }

        Some((handle, report))
    }

    fn mismatch(&self, position: &Position, order_id: &str, detail: String) {
        warn!(order_id, detail = %detail, "Fill reconciliation mismatch");
        self.alerts.raise(Alert::ReconciliationMismatch {
            position_id: position.id.clone(),
            order_id: order_id.to_string(),
            detail,
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn log_attempt(
        &self,
        position: &Position,
        plan: &ExitPlan,
        request: &OrderRequest,
        sequence: u32,
        timeout: Duration,
        report: Option<&OrderReport>,
        outcome: AttemptOutcome,
    ) {
        let attempt = ExitAttempt {
            position_id: position.id.clone(),
            condition: plan.trigger.condition,
            priority: plan.trigger.priority,
            order_type: request.order_type,
            limit_price: request.price,
            fill_price: report.and_then(|r| r.fill_price),
            filled_qty: report.map_or(Decimal::ZERO, |r| r.filled_qty),
            sequence,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            outcome,
            timestamp: OffsetDateTime::now_utc(),
        };

        if let Err(e) = self.audit.record_attempt(&attempt) {
            warn!(error = %e, "Failed to record exit attempt");
            metrics::inc_audit_failures();
        }
        metrics::inc_exit_attempts(&outcome.to_string());
    }
}
