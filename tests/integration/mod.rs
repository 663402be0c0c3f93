//! End-to-end tests for the exit engine.
//!
//! Each test drives `PositionMonitor::run` against the in-crate mock feed and
//! gateway on a paused tokio clock, so stage timeouts and cadences elapse
//! instantly.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc::UnboundedReceiver;

use pm_exit_engine::alerts::{Alert, ChannelAlertSink};
use pm_exit_engine::audit::{AttemptOutcome, MemoryAuditLog};
use pm_exit_engine::config::Config;
use pm_exit_engine::exit::{ExitCondition, ExitStage, Priority, ThresholdBook, TrailingPhase};
use pm_exit_engine::market::{
    FillBehavior, MockEdgeService, MockOrderGateway, MockPriceFeed, MockRebalance, Quote,
};
use pm_exit_engine::monitor::{
    CircuitBreaker, Collaborators, HaltPolicy, InMemoryPositionStore, PositionMonitor,
};
use pm_exit_engine::trading::{OrderType, Position, PositionSide, PositionStatus};

/// Mocks plus the monitor wired to them.
struct Engine {
    monitor: Arc<PositionMonitor>,
    gateway: MockOrderGateway,
    store: Arc<InMemoryPositionStore>,
    audit: Arc<MemoryAuditLog>,
    alerts: UnboundedReceiver<Alert>,
    breaker: Arc<CircuitBreaker>,
}

struct Setup {
    config: Config,
    feed: MockPriceFeed,
    gateway: MockOrderGateway,
    cycle_limit: Option<u64>,
}

impl Setup {
    fn new(config: Config) -> Self {
        Self {
            config,
            feed: MockPriceFeed::new(),
            gateway: MockOrderGateway::new(),
            cycle_limit: None,
        }
    }

    fn build(self) -> Engine {
        let store = Arc::new(InMemoryPositionStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let (sink, alerts) = ChannelAlertSink::new();
        let breaker = Arc::new(CircuitBreaker::new());

        let mut monitor = PositionMonitor::new(
            &self.config,
            ThresholdBook::new(self.config.exit_thresholds()),
            Collaborators {
                feed: Arc::new(self.feed),
                gateway: Arc::new(self.gateway.clone()),
                edge: Arc::new(MockEdgeService::new()),
                rebalance: Arc::new(MockRebalance::new()),
                store: store.clone(),
                audit: audit.clone(),
                alerts: Arc::new(sink),
            },
            breaker.signal(),
        );
        if let Some(limit) = self.cycle_limit {
            monitor = monitor.with_cycle_limit(limit);
        }

        Engine {
            monitor: Arc::new(monitor),
            gateway: self.gateway,
            store,
            audit,
            alerts,
            breaker,
        }
    }
}

impl Engine {
    async fn run(&self, positions: Vec<Position>) -> Vec<Position> {
        let mut finished = self
            .monitor
            .clone()
            .run(positions, tokio::time::sleep(Duration::from_secs(3600)))
            .await;
        finished.sort_by(|a, b| a.id.cmp(&b.id));
        finished
    }

    fn alert_kinds(&mut self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        while let Ok(alert) = self.alerts.try_recv() {
            kinds.push(alert.kind());
        }
        kinds
    }
}

/// Quote one cent either side of `mid`, with ample volume.
fn around(mid: Decimal) -> Quote {
    Quote::new(mid - dec!(0.01), mid + dec!(0.01), dec!(500))
}

/// Config with staged partial exits and take-profit pushed out of the way.
fn without_profit_taking() -> Config {
    Config {
        take_profit_pct: dec!(1000),
        partial_first_pct: dec!(900),
        partial_second_pct: dec!(950),
        ..Config::default()
    }
}

#[tokio::test(start_paused = true)]
async fn trailing_stop_arms_tightens_and_triggers() {
    let setup = Setup::new(without_profit_taking());
    setup
        .feed
        .set_path("tok", [dec!(0.70), dec!(0.75), dec!(0.85), dec!(0.79)].map(around));
    setup.gateway.set_limit_behavior(FillBehavior::Fill);
    let engine = setup.build();

    let position = engine
        .monitor
        .adopt(Position::new("pos-1", "tok", PositionSide::Long, dec!(10), dec!(0.70)));
    assert_eq!(position.trailing.activation_threshold, dec!(0.05));

    let finished = engine.run(vec![position]).await;

    let pos = &finished[0];
    assert_eq!(pos.status, PositionStatus::Closed);
    assert!(matches!(
        pos.trailing.phase,
        TrailingPhase::Triggered { stop, .. } if stop == dec!(0.80)
    ));

    let exits = engine.audit.exits();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].condition, ExitCondition::TrailingStop);
    assert_eq!(exits[0].priority, Priority::High);
    assert_eq!(exits[0].quantity, dec!(10));
    assert_eq!(exits[0].stage, ExitStage::Final);

    // Aggressive first stage: one tick inside the ask.
    let placed = engine.gateway.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].price, Some(dec!(0.79)));
}

#[tokio::test(start_paused = true)]
async fn stop_loss_wins_over_profit_target_with_market_order() {
    // Profit target set low enough to fire alongside the stop-loss.
    let config = Config {
        take_profit_pct: dec!(-40),
        ..Config::default()
    };
    let setup = Setup::new(config);
    setup.feed.set_quote("tok", around(dec!(0.35)));
    let engine = setup.build();

    let finished = engine
        .run(vec![Position::new("pos-1", "tok", PositionSide::Long, dec!(10), dec!(0.50))])
        .await;

    assert_eq!(finished[0].status, PositionStatus::Closed);
    assert_eq!(finished[0].last_exit_priority, Some(Priority::Critical));

    let attempts = engine.audit.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].condition, ExitCondition::StopLoss);
    assert_eq!(attempts[0].order_type, OrderType::Market);
    assert_eq!(attempts[0].timeout_ms, 5_000);
    assert_eq!(attempts[0].outcome, AttemptOutcome::Filled);

    let exits = engine.audit.exits();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].condition, ExitCondition::StopLoss);
}

#[tokio::test(start_paused = true)]
async fn medium_walk_gives_up_after_five_stages() {
    let config = Config {
        take_profit_pct: dec!(20),
        ..without_profit_taking()
    };
    let mut setup = Setup::new(config);
    // Best ask 0.52; limit orders rest by default.
    setup
        .feed
        .set_quote("tok", Quote::new(dec!(0.50), dec!(0.52), dec!(500)));
    setup.cycle_limit = Some(1);
    let engine = setup.build();

    let start = tokio::time::Instant::now();
    let finished = engine
        .run(vec![Position::new("pos-1", "tok", PositionSide::Long, dec!(10), dec!(0.40))])
        .await;

    let pos = &finished[0];
    assert_eq!(pos.status, PositionStatus::Open);
    assert_eq!(pos.quantity, dec!(10));
    assert!(pos.needs_review.is_none());

    let attempts = engine.audit.attempts();
    assert_eq!(attempts.len(), 5);
    assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::TimedOut));
    assert!(attempts.iter().all(|a| a.condition == ExitCondition::ProfitTarget));
    let prices: Vec<_> = attempts.iter().filter_map(|a| a.limit_price).collect();
    assert_eq!(
        prices,
        vec![dec!(0.52), dec!(0.51), dec!(0.50), dec!(0.49), dec!(0.48)]
    );
    let sequences: Vec<_> = attempts.iter().map(|a| a.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);

    assert_eq!(engine.gateway.cancelled().len(), 5);
    assert!(engine.audit.exits().is_empty());
    assert!(start.elapsed() >= Duration::from_secs(150));
}

#[tokio::test(start_paused = true)]
async fn partial_stages_then_trailing_stop_close() {
    let config = Config {
        take_profit_pct: dec!(1000),
        ..Config::default()
    };
    let setup = Setup::new(config);
    setup.feed.set_path(
        "tok",
        [dec!(0.47), dec!(0.51), dec!(0.55), dec!(0.49)].map(around),
    );
    setup.gateway.set_limit_behavior(FillBehavior::Fill);
    let engine = setup.build();

    let position = engine
        .monitor
        .adopt(Position::new("pos-1", "tok", PositionSide::Long, dec!(100), dec!(0.40)));
    let finished = engine.run(vec![position]).await;

    assert_eq!(finished[0].status, PositionStatus::Closed);
    assert_eq!(finished[0].partial_stages_done, 2);

    let exits = engine.audit.exits();
    let summary: Vec<_> = exits
        .iter()
        .map(|e| (e.condition, e.stage, e.quantity))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ExitCondition::PartialExitTarget, ExitStage::FirstPartial, dec!(50)),
            (ExitCondition::PartialExitTarget, ExitStage::SecondPartial, dec!(25)),
            (ExitCondition::TrailingStop, ExitStage::Final, dec!(25)),
        ]
    );

    let total: Decimal = exits.iter().map(|e| e.quantity).sum();
    assert_eq!(total, dec!(100));
    assert_eq!(engine.store.get("pos-1").map(|p| p.status), Some(PositionStatus::Closed));
}

#[tokio::test(start_paused = true)]
async fn circuit_breaker_mid_walk_stops_walk_and_freezes_book() {
    let config = Config {
        take_profit_pct: dec!(20),
        ..without_profit_taking()
    };
    let setup = Setup::new(config);
    // pos-1 is in profit and starts a MEDIUM walk; pos-2 is flat.
    setup.feed.set_quote("tok-1", Quote::new(dec!(0.50), dec!(0.52), dec!(500)));
    setup.feed.set_quote("tok-2", around(dec!(0.50)));
    let mut engine = setup.build();

    let breaker = engine.breaker.clone();
    engine.gateway.on_place(move |_| breaker.halt("exchange incident"));

    let finished = engine
        .run(vec![
            Position::new("pos-1", "tok-1", PositionSide::Long, dec!(10), dec!(0.40)),
            Position::new("pos-2", "tok-2", PositionSide::Long, dec!(10), dec!(0.50)),
        ])
        .await;

    // The in-flight order ran to its deadline; no further stage was placed.
    let attempts = engine.audit.attempts_for("pos-1");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, AttemptOutcome::TimedOut);
    assert_eq!(engine.gateway.placed().len(), 1);

    for pos in &finished {
        assert!(pos.needs_review.is_some(), "{} not flagged", pos.id);
        assert_eq!(pos.status, PositionStatus::Open);
        assert_eq!(pos.quantity, dec!(10));
    }

    let kinds = engine.alert_kinds();
    assert!(kinds.contains(&"circuit_breaker_changed"));
    assert_eq!(kinds.iter().filter(|k| **k == "needs_review").count(), 2);
}

#[tokio::test(start_paused = true)]
async fn flatten_policy_closes_a_walk_interrupted_by_halt() {
    let config = Config {
        take_profit_pct: dec!(20),
        halt_policy: HaltPolicy::Flatten,
        ..without_profit_taking()
    };
    let setup = Setup::new(config);
    setup.feed.set_quote("tok-1", Quote::new(dec!(0.50), dec!(0.52), dec!(500)));
    setup.feed.set_quote("tok-2", around(dec!(0.50)));
    let mut engine = setup.build();

    let breaker = engine.breaker.clone();
    engine.gateway.on_place(move |_| breaker.halt("exchange incident"));

    let finished = engine
        .run(vec![
            Position::new("pos-1", "tok-1", PositionSide::Long, dec!(10), dec!(0.40)),
            Position::new("pos-2", "tok-2", PositionSide::Long, dec!(10), dec!(0.50)),
        ])
        .await;

    for pos in &finished {
        assert_eq!(pos.status, PositionStatus::Closed, "{} not flattened", pos.id);
        assert_eq!(pos.quantity, Decimal::ZERO);
        assert!(pos.needs_review.is_none(), "{} flagged", pos.id);
    }

    // The interrupted profit walk, then the flatten exit at market.
    let attempts = engine.audit.attempts_for("pos-1");
    let trail: Vec<_> = attempts
        .iter()
        .map(|a| (a.condition, a.order_type, a.outcome))
        .collect();
    assert_eq!(
        trail,
        vec![
            (ExitCondition::ProfitTarget, OrderType::Limit, AttemptOutcome::TimedOut),
            (ExitCondition::CircuitBreaker, OrderType::Market, AttemptOutcome::Filled),
        ]
    );

    let exits = engine.audit.exits();
    assert_eq!(exits.len(), 2);
    assert!(exits.iter().all(|e| e.condition == ExitCondition::CircuitBreaker));
    assert_eq!(engine.store.get("pos-1").map(|p| p.status), Some(PositionStatus::Closed));
    assert!(!engine.alert_kinds().contains(&"needs_review"));
}

#[tokio::test(start_paused = true)]
async fn stale_feed_never_trades_and_recovers() {
    let setup = Setup::new(Config::default());
    let feed = setup.feed.clone();
    feed.set_quote("tok", around(dec!(0.30)));
    feed.set_failing(true);
    let mut engine = setup.build();

    let monitor = engine.monitor.clone();
    let run = tokio::spawn(async move {
        monitor
            .run(
                vec![Position::new("pos-1", "tok", PositionSide::Long, dec!(10), dec!(0.50))],
                tokio::time::sleep(Duration::from_secs(3600)),
            )
            .await
    });

    // Deep in stop-loss territory, but no trustworthy price for two cycles.
    tokio::time::sleep(Duration::from_secs(45)).await;
    assert!(engine.gateway.placed().is_empty());

    feed.set_failing(false);
    let finished = run.await.unwrap();

    assert_eq!(finished[0].status, PositionStatus::Closed);
    assert_eq!(engine.audit.exits()[0].condition, ExitCondition::StopLoss);
    assert_eq!(engine.alert_kinds(), vec!["data_stale", "data_recovered"]);
}
