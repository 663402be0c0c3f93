//! Per-position monitoring tasks.
//!
//! Every open position gets its own task. A task runs strictly sequential
//! cycles: read the circuit breaker, fetch a quote through the cache, update
//! the trailing stop, evaluate all exit conditions, act on at most one, then
//! sleep until the scheduler's next wake time. Tasks share the call budget
//! and the halt signal, never each other's positions.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::budget::CallBudget;
use super::cache::PriceCache;
use super::circuit::{HaltPolicy, HaltSignal};
use super::scheduler::{Cadence, CadencePolicy, Scheduler};
use super::store::PositionStore;
use crate::alerts::{Alert, AlertSink};
use crate::audit::AuditLog;
use crate::config::Config;
use crate::error::InvariantViolation;
use crate::exit::{
    ExitCondition, ExitConditionEvaluator, ExitConditionResult, ExitPlan, MarketContext,
    PriceWalker, PriorityResolver, ThresholdBook, TrailingStopTracker, WalkReport,
};
use crate::market::{EdgeService, PriceFeed, RebalanceSignal};
use crate::metrics;
use crate::trading::{OrderGateway, Position, PositionStatus};

/// External collaborators the monitor is wired to.
pub struct Collaborators {
    /// Quote source.
    pub feed: Arc<dyn PriceFeed>,
    /// Order entry.
    pub gateway: Arc<dyn OrderGateway>,
    /// Edge estimates.
    pub edge: Arc<dyn EdgeService>,
    /// Rebalance hints.
    pub rebalance: Arc<dyn RebalanceSignal>,
    /// Position persistence.
    pub store: Arc<dyn PositionStore>,
    /// Audit trail.
    pub audit: Arc<dyn AuditLog>,
    /// Operator alerts.
    pub alerts: Arc<dyn AlertSink>,
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Circuit breaker hold: the position was frozen and nothing was placed.
    Held,
    /// Price data too stale to act on; decisions suspended this cycle.
    Suspended,
    /// Conditions were evaluated.
    Evaluated {
        /// The condition acted on, if any.
        action: Option<ExitConditionResult>,
        /// The walk that executed it.
        walk: Option<WalkReport>,
        /// Cadence chosen for the next cycle.
        cadence: Cadence,
    },
}

/// State a task carries between cycles.
#[derive(Debug, Default)]
pub struct TaskState {
    data_fault: bool,
    cycles: u64,
    cadence: Option<Cadence>,
}

impl TaskState {
    /// Cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Whether decisions are currently suspended on stale data.
    pub fn has_data_fault(&self) -> bool {
        self.data_fault
    }
}

/// Orchestrates monitoring and exits for a set of positions.
pub struct PositionMonitor {
    budget: Arc<CallBudget>,
    cache: PriceCache,
    walker: PriceWalker,
    evaluator: ExitConditionEvaluator,
    tracker: TrailingStopTracker,
    resolver: PriorityResolver,
    edge: Arc<dyn EdgeService>,
    rebalance: Arc<dyn RebalanceSignal>,
    store: Arc<dyn PositionStore>,
    alerts: Arc<dyn AlertSink>,
    halt: HaltSignal,
    halt_policy: HaltPolicy,
    cadence: CadencePolicy,
    scheduler: Mutex<Scheduler>,
    cycle_limit: Option<u64>,
}

impl PositionMonitor {
    /// Wire a monitor from configuration and collaborators.
    pub fn new(
        config: &Config,
        thresholds: ThresholdBook,
        collaborators: Collaborators,
        halt: HaltSignal,
    ) -> Self {
        let budget = Arc::new(CallBudget::per_minute(config.rate_limit_per_minute));
        let cache = PriceCache::new(collaborators.feed, budget.clone(), config.cache_settings());
        let walker = PriceWalker::new(
            collaborators.gateway,
            budget.clone(),
            collaborators.store.clone(),
            collaborators.audit,
            collaborators.alerts.clone(),
            halt.clone(),
            config.halt_policy,
            config.walk_settings(),
        );
        let cadence = config.cadence_policy();

        Self {
            budget,
            cache,
            walker,
            evaluator: ExitConditionEvaluator::new(thresholds),
            tracker: TrailingStopTracker,
            resolver: PriorityResolver,
            edge: collaborators.edge,
            rebalance: collaborators.rebalance,
            store: collaborators.store,
            alerts: collaborators.alerts,
            halt,
            halt_policy: config.halt_policy,
            cadence,
            scheduler: Mutex::new(Scheduler::new(cadence)),
            cycle_limit: None,
        }
    }

    /// Stop each position task after `cycles` cycles.
    pub fn with_cycle_limit(mut self, cycles: u64) -> Self {
        self.cycle_limit = Some(cycles);
        self
    }

    /// The shared call budget.
    pub fn budget(&self) -> &Arc<CallBudget> {
        &self.budget
    }

    /// The price cache.
    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    /// Current cadence of a monitored position.
    pub fn cadence_of(&self, position_id: &str) -> Option<Cadence> {
        self.scheduler().cadence(position_id)
    }

    /// Next wake time of a monitored position.
    pub fn next_wake(&self, position_id: &str) -> Option<Instant> {
        self.scheduler().next_wake(position_id)
    }

    /// Give a newly tracked position the trailing stop its strategy calls for.
    pub fn adopt(&self, position: Position) -> Position {
        let t = self.evaluator.thresholds_for(&position);
        if t.trailing_enabled && !position.trailing.enabled {
            let (activation, distance) = (t.trailing_activation, t.trailing_distance);
            return position.with_trailing(activation, distance);
        }
        position
    }

    /// Monitor positions until they all finish or `shutdown` resolves.
    ///
    /// Returns the final state of every position.
    pub async fn run<F>(self: Arc<Self>, positions: Vec<Position>, shutdown: F) -> Vec<Position>
    where
        F: Future<Output = ()> + Send,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        info!(positions = positions.len(), "Starting position monitor");

        let watcher = tokio::spawn(watch_breaker(
            self.halt.clone(),
            self.alerts.clone(),
            stop_rx.clone(),
        ));

        let handles: Vec<_> = positions
            .into_iter()
            .map(|position| {
                let monitor = self.clone();
                let stop = stop_rx.clone();
                let position = monitor.adopt(position);
                tokio::spawn(async move { monitor.watch_position(position, stop).await })
            })
            .collect();

        let joined = futures::future::join_all(handles);
        tokio::pin!(joined);
        let finished = tokio::select! {
            results = &mut joined => Some(results),
            _ = shutdown => None,
        };
        let results = match finished {
            Some(results) => results,
            None => {
                info!("Shutdown requested, stopping position tasks");
                let _ = stop_tx.send(true);
                joined.await
            }
        };

        let _ = stop_tx.send(true);
        if let Err(e) = watcher.await {
            error!(error = %e, "Circuit breaker watcher failed");
        }

        results
            .into_iter()
            .filter_map(|r| match r {
                Ok(position) => Some(position),
                Err(e) => {
                    error!(error = %e, "Position task failed");
                    None
                }
            })
            .collect()
    }

    #[instrument(skip_all, fields(position_id = %position.id))]
    async fn watch_position(&self, mut position: Position, mut stop: watch::Receiver<bool>) -> Position {
        let mut state = TaskState::default();
        let mut halt = self.halt.clone();
        let mut halt_alive = true;

        self.store.save(&position);
        info!(token_id = %position.token_id, quantity = %position.quantity, "Monitoring position");

        while position.is_actionable() && !*stop.borrow() {
            let cadence = match self.run_cycle(&mut position, &mut state).await {
                Ok(CycleOutcome::Evaluated { cadence, .. }) => cadence,
                Ok(CycleOutcome::Suspended) => state.cadence.unwrap_or(Cadence::Normal),
                Ok(CycleOutcome::Held) => break,
                Err(violation) => {
                    self.freeze_on_violation(&mut position, violation);
                    break;
                }
            };
            state.cadence = Some(cadence);

            if !position.is_actionable() {
                break;
            }
            if self.cycle_limit.is_some_and(|limit| state.cycles >= limit) {
                debug!(cycles = state.cycles, "Cycle limit reached");
                break;
            }

            let wake = self.scheduler().reschedule(&position.id, cadence, Instant::now());
            tokio::select! {
                _ = sleep_until(wake) => {}
                changed = halt.changed(), if halt_alive => {
                    // Re-check the breaker right away rather than at the next tick.
                    halt_alive = changed.is_some();
                }
                _ = stop.changed() => break,
            }
        }

        self.scheduler().remove(&position.id);
        self.store.save(&position);
        info!(
            status = %position.status,
            remaining = %position.quantity,
            needs_review = position.needs_review.is_some(),
            "Stopped monitoring position"
        );
        position
    }

    /// Run one monitoring cycle for a position.
    ///
    /// An invariant violation aborts the cycle; the caller must freeze the
    /// position.
    #[instrument(skip_all, fields(position_id = %position.id))]
    pub async fn run_cycle(
        &self,
        position: &mut Position,
        state: &mut TaskState,
    ) -> Result<CycleOutcome, InvariantViolation> {
        state.cycles += 1;
        metrics::inc_monitor_cycles();

        let halted = self.halt.is_halted();
        if halted && self.halt_policy == HaltPolicy::HoldAndAlert {
            self.hold_for_review(position);
            return Ok(CycleOutcome::Held);
        }

        let reading = match self.cache.get_price(position).await {
            Ok(reading) => reading,
            Err(e) => {
                metrics::inc_stale_faults();
                if !state.data_fault {
                    state.data_fault = true;
                    warn!(error = %e, "Suspending exit decisions on stale price data");
                    self.alerts.raise(Alert::DataStale {
                        position_id: position.id.clone(),
                        token_id: position.token_id.clone(),
                        reason: e.to_string(),
                    });
                }
                return Ok(CycleOutcome::Suspended);
            }
        };

        if state.data_fault {
            state.data_fault = false;
            info!("Price data recovered, resuming exit decisions");
            self.alerts.raise(Alert::DataRecovered {
                position_id: position.id.clone(),
                token_id: position.token_id.clone(),
            });
        }
        if reading.stale {
            debug!(
                age_ms = u64::try_from(reading.age.as_millis()).unwrap_or(u64::MAX),
                "Using last cached quote"
            );
        }

        let mark = reading.quote.mid();
        position.mark(mark);
        self.tracker.update(position, mark);

        let ctx = MarketContext {
            halted,
            edge: self.edge.get_current_edge(position).await,
            rebalance: self.rebalance.should_rebalance(position).await,
            now: OffsetDateTime::now_utc(),
        };
        let results = self.evaluator.evaluate(position, &reading.quote, &ctx);

        let action = if halted {
            // Flatten: every position takes the circuit breaker exit.
            results
                .iter()
                .find(|r| r.condition == ExitCondition::CircuitBreaker)
                .copied()
        } else {
            self.resolver.resolve(&results)
        };

        let thresholds = self.evaluator.thresholds_for(position);
        let mut walk = None;
        if let Some(trigger) = action {
            let plan = ExitPlan::for_trigger(position, trigger, &thresholds.stages);
            if plan.quantity > Decimal::ZERO {
                info!(
                    condition = %trigger.condition,
                    priority = %trigger.priority,
                    quantity = %plan.quantity,
                    pnl_pct = %position.unrealized_pnl_pct,
                    "Exit condition resolved"
                );
                walk = Some(self.walker.execute(position, &plan, &reading.quote).await?);
            }
        }
        self.store.save(position);

        let cadence = self.cadence.cadence_for(position, thresholds, &results);
        debug!(mark = %mark, cadence = %cadence, "Cycle complete");

        Ok(CycleOutcome::Evaluated {
            action,
            walk,
            cadence,
        })
    }

    fn hold_for_review(&self, position: &mut Position) {
        if position.needs_review.is_some() {
            return;
        }
        let reason = "circuit breaker active";
        warn!("Circuit breaker active, holding position for manual review");
        position.flag_for_review(reason);
        self.store.save(position);
        self.alerts.raise(Alert::NeedsReview {
            position_id: position.id.clone(),
            reason: reason.to_string(),
        });
    }

    fn freeze_on_violation(&self, position: &mut Position, violation: InvariantViolation) {
        error!(error = %violation, "Position invariant violated, freezing position");
        if !position.is_closed() {
            position.status = PositionStatus::Open;
        }
        position.flag_for_review(format!("invariant violation: {violation}"));
        self.store.save(position);
        self.alerts.raise(Alert::InvariantViolation {
            position_id: position.id.clone(),
            detail: violation.to_string(),
        });
    }

    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn watch_breaker(mut halt: HaltSignal, alerts: Arc<dyn AlertSink>, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            changed = halt.changed() => match changed {
                Some(halted) => alerts.raise(Alert::CircuitBreakerChanged { halted }),
                None => break,
            },
            _ = stop.changed() => break,
        }
    }
}
