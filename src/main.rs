//! Position monitoring and exit engine entry point.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pm_exit_engine::alerts::TracingAlertSink;
use pm_exit_engine::audit::{AttemptOutcome, AuditLog, JsonlAuditLog, MemoryAuditLog, TeeAuditLog};
use pm_exit_engine::config::Config;
use pm_exit_engine::exit::ThresholdBook;
use pm_exit_engine::market::{FillBehavior, MockOrderGateway, MockPriceFeed, NoEdge, NoRebalance, Quote};
use pm_exit_engine::metrics;
use pm_exit_engine::monitor::{CircuitBreaker, Collaborators, InMemoryPositionStore, PositionMonitor};
use pm_exit_engine::trading::{Position, PositionSide};
use pm_exit_engine::utils::shutdown_signal;

/// Position monitoring and adaptive exit execution.
#[derive(Parser, Debug)]
#[command(name = "pm-exit-engine")]
#[command(about = "Monitors open positions and executes exits by priority")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check configuration validity.
    CheckConfig,

    /// Run the monitor against mock collaborators on scripted prices.
    Simulate {
        /// Number of positions to open.
        #[arg(long, default_value = "4")]
        positions: usize,

        /// Cycles to run per position.
        #[arg(long, default_value = "12")]
        cycles: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("pm_exit_engine=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(args.json_logs.then(|| fmt::layer().json()))
        .with((!args.json_logs).then(|| fmt::layer()))
        .with(filter)
        .init();

    // Initialize metrics
    metrics::init_metrics();

    match args.command {
        Command::CheckConfig => cmd_check_config(),
        Command::Simulate { positions, cycles } => cmd_simulate(positions, cycles).await,
    }
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("EXIT ENGINE - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Stop Loss: {}%", config.stop_loss_pct);
    println!("  Take Profit: {}%", config.take_profit_pct);
    println!(
        "  Trailing Stop: {} (activation {}, distance {})",
        if config.trailing_enabled { "Enabled" } else { "Disabled" },
        config.trailing_activation,
        config.trailing_distance
    );
    println!(
        "  Partial Stages: {}% x {}, {}% x {}",
        config.partial_first_pct,
        config.partial_first_fraction,
        config.partial_second_pct,
        config.partial_second_fraction
    );
    println!("  Tick / Lot: {} / {}", config.tick_size, config.lot_size);
    println!(
        "  CRITICAL: {}s x {} attempts",
        config.critical_timeout_secs, config.critical_max_attempts
    );
    println!("  HIGH: {}s x {} stages", config.high_timeout_secs, config.high_max_stages);
    println!("  MEDIUM: {}s x {} stages", config.medium_timeout_secs, config.medium_max_stages);
    println!("  LOW: {}s x {} stages", config.low_timeout_secs, config.low_max_stages);
    println!(
        "  Cache TTL / Stale After: {}s / {}s",
        config.price_cache_ttl_secs, config.stale_threshold_secs
    );
    println!("  Rate Limit: {}/min", config.rate_limit_per_minute);
    println!(
        "  Cadence: {}s normal, {}s urgent (within {}%)",
        config.normal_cadence_secs, config.urgent_cadence_secs, config.urgent_proximity_pct
    );
    println!("  Halt Policy: {:?}", config.halt_policy);
    println!(
        "  Audit Log: {}",
        config.audit_log_path.as_deref().unwrap_or("in-memory")
    );
    match config.metrics_port {
        Some(port) => println!("  Metrics Port: {}", port),
        None => println!("  Metrics Port: disabled"),
    }
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Run the monitor on scripted prices with mock collaborators.
async fn cmd_simulate(positions: usize, cycles: u64) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    if let Some(port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()?;
        info!(port, "Prometheus exporter listening");
    }

    // One-second cycles so a run finishes in wall-clock seconds.
    config.normal_cadence_secs = 1;
    config.urgent_cadence_secs = 1;
    config.price_cache_ttl_secs = 0;
    config.order_poll_interval_ms = 100;
    let per_minute = u32::try_from(positions.saturating_mul(180)).unwrap_or(u32::MAX);
    config.rate_limit_per_minute = config.rate_limit_per_minute.max(per_minute);

    let feed = MockPriceFeed::new();
    let gateway = MockOrderGateway::new();
    gateway.set_limit_behavior(FillBehavior::Fill);
    let store = Arc::new(InMemoryPositionStore::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let sink = audit_sink(&config, audit.clone())?;
    let breaker = CircuitBreaker::new();

    let book: Vec<Position> = (0..positions)
        .map(|i| {
            let token_id = format!("token-{i}");
            feed.set_path(&token_id, scripted_path(i, cycles));
            Position::new(format!("sim-{i}"), token_id, PositionSide::Long, Decimal::new(100, 0), Decimal::new(50, 2))
        })
        .collect();

    let monitor = PositionMonitor::new(
        &config,
        ThresholdBook::new(config.exit_thresholds()),
        Collaborators {
            feed: Arc::new(feed),
            gateway: Arc::new(gateway),
            edge: Arc::new(NoEdge),
            rebalance: Arc::new(NoRebalance),
            store: store.clone(),
            audit: sink,
            alerts: Arc::new(TracingAlertSink),
        },
        breaker.signal(),
    )
    .with_cycle_limit(cycles);

    info!("========================================");
    info!("EXIT ENGINE SIMULATION STARTED");
    info!("========================================");
    info!("Positions: {}", positions);
    info!("Cycles per position: {}", cycles);
    info!("========================================");

    let finished = Arc::new(monitor).run(book, shutdown_signal()).await;

    let attempts = audit.attempts();
    let exits = audit.exits();
    let filled = attempts
        .iter()
        .filter(|a| matches!(a.outcome, AttemptOutcome::Filled | AttemptOutcome::PartiallyFilled))
        .count();

    println!("======================================================================");
    println!("SIMULATION SUMMARY");
    println!("======================================================================");
    for position in &finished {
        println!(
            "  {} {:<8} remaining {:>6}  mark {:>5}  pnl {:>7}%{}",
            position.id,
            position.status,
            position.quantity,
            position.current_price,
            position.unrealized_pnl_pct.round_dp(2),
            position
                .needs_review
                .as_deref()
                .map(|r| format!("  REVIEW: {r}"))
                .unwrap_or_default()
        );
    }
    println!("----------------------------------------------------------------------");
    println!("  Exit attempts: {} ({} with fills)", attempts.len(), filled);
    println!("  Position exits: {}", exits.len());
    for exit in &exits {
        println!(
            "    {} {} {} {} @ {} [{}]",
            exit.position_id, exit.condition, exit.priority, exit.quantity, exit.price, exit.stage
        );
    }
    println!("  Positions stored: {}", store.len());
    println!("======================================================================");

    Ok(())
}

/// Audit sink for a run: the in-memory log, teed to a JSONL file when configured.
fn audit_sink(config: &Config, memory: Arc<MemoryAuditLog>) -> pm_exit_engine::Result<Arc<dyn AuditLog>> {
    let memory: Arc<dyn AuditLog> = memory;
    let Some(path) = &config.audit_log_path else {
        return Ok(memory);
    };
    info!(path = %path, "Appending audit trail to file");
    let file: Arc<dyn AuditLog> = Arc::new(JsonlAuditLog::open(path)?);
    Ok(Arc::new(TeeAuditLog::new(vec![memory, file])))
}

/// Mid price of scripted path `i` at cycle `n`.
///
/// Paths rotate through a rally, a slide, a spike that fades, and a flat
/// line, so a run exercises every tier of exit.
fn scripted_mid(i: usize, n: u64, cycles: u64) -> Decimal {
    let step = Decimal::from(n.min(cycles));
    let cent = Decimal::new(1, 2);
    let half = Decimal::new(50, 2);
    let mid = match i % 4 {
        0 => half + step * Decimal::new(3, 2),
        1 => half - step * cent,
        2 => {
            let peak = Decimal::from(cycles / 2);
            if step <= peak {
                half + step * cent
            } else {
                half + peak * cent - (step - peak) * Decimal::new(2, 2)
            }
        }
        _ => half,
    };
    mid.clamp(Decimal::new(2, 2), Decimal::new(98, 2))
}

fn scripted_path(i: usize, cycles: u64) -> Vec<Quote> {
    let cent = Decimal::new(1, 2);
    (0..=cycles)
        .map(|n| {
            let mid = scripted_mid(i, n, cycles);
            Quote::new(mid - cent, mid + cent, Decimal::new(500, 0))
        })
        .collect()
}
