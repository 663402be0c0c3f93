//! Application configuration loaded from environment variables.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::exit::conditions::ExitThresholds;
use crate::exit::staging::StagePlan;
use crate::exit::walker::{ExecutionProfile, ExecutionProfiles, WalkSettings};
use crate::monitor::cache::CacheSettings;
use crate::monitor::circuit::HaltPolicy;
use crate::monitor::scheduler::CadencePolicy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Exit Thresholds ===
    /// Stop-loss floor on unrealized P&L percent (e.g. -20).
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,

    /// Take-profit level on unrealized P&L percent (e.g. 50).
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,

    /// Whether positions get a trailing stop.
    #[serde(default = "default_true")]
    pub trailing_enabled: bool,

    /// Favorable price move (price units) that arms the trailing stop.
    #[serde(default = "default_trailing_activation")]
    pub trailing_activation: Decimal,

    /// Distance (price units) between the favorable extreme and the stop.
    #[serde(default = "default_trailing_distance")]
    pub trailing_distance: Decimal,

    /// P&L percent that triggers the first partial exit.
    #[serde(default = "default_partial_first_pct")]
    pub partial_first_pct: Decimal,

    /// Fraction of the original quantity closed by the first partial exit.
    #[serde(default = "default_half")]
    pub partial_first_fraction: Decimal,

    /// P&L percent that triggers the second partial exit.
    #[serde(default = "default_partial_second_pct")]
    pub partial_second_pct: Decimal,

    /// Fraction of the remaining quantity closed by the second partial exit.
    #[serde(default = "default_half")]
    pub partial_second_fraction: Decimal,

    /// Time to settlement below which a losing position exits urgently.
    #[serde(default = "default_urgent_time_threshold")]
    pub urgent_time_threshold_secs: u64,

    /// Spread above which liquidity is considered dried up.
    #[serde(default = "default_max_spread")]
    pub max_spread: Decimal,

    /// Displayed volume below which liquidity is considered dried up.
    #[serde(default = "default_min_volume")]
    pub min_volume: Decimal,

    /// Edge below which the position is exited early.
    #[serde(default = "default_low_edge")]
    pub low_edge_threshold: Decimal,

    // === Market Granularity ===
    /// Minimum price increment.
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,

    /// Minimum quantity increment.
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,

    // === Execution Profiles ===
    /// Stage timeout for CRITICAL exits.
    #[serde(default = "default_critical_timeout")]
    pub critical_timeout_secs: u64,

    /// Market order attempts for CRITICAL exits.
    #[serde(default = "default_critical_attempts")]
    pub critical_max_attempts: u32,

    /// Stage timeout for HIGH exits.
    #[serde(default = "default_high_timeout")]
    pub high_timeout_secs: u64,

    /// Limit stages for HIGH exits before market escalation.
    #[serde(default = "default_high_stages")]
    pub high_max_stages: u32,

    /// Stage timeout for MEDIUM exits.
    #[serde(default = "default_medium_timeout")]
    pub medium_timeout_secs: u64,

    /// Limit stages for MEDIUM exits.
    #[serde(default = "default_medium_stages")]
    pub medium_max_stages: u32,

    /// Stage timeout for LOW exits.
    #[serde(default = "default_low_timeout")]
    pub low_timeout_secs: u64,

    /// Limit stages for LOW exits.
    #[serde(default = "default_low_stages")]
    pub low_max_stages: u32,

    /// Interval between order status polls while a stage is resting.
    #[serde(default = "default_poll_interval")]
    pub order_poll_interval_ms: u64,

    // === Price Data & Budget ===
    /// Price cache time-to-live.
    #[serde(default = "default_cache_ttl")]
    pub price_cache_ttl_secs: u64,

    /// Age after which a failing feed becomes a data-freshness fault.
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_secs: u64,

    /// External calls allowed per minute across all positions.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    // === Scheduling ===
    /// Cycle interval when no threshold is near.
    #[serde(default = "default_normal_cadence")]
    pub normal_cadence_secs: u64,

    /// Cycle interval near a CRITICAL/HIGH threshold.
    #[serde(default = "default_urgent_cadence")]
    pub urgent_cadence_secs: u64,

    /// Proximity (percent of price) that switches to urgent cadence.
    #[serde(default = "default_urgent_proximity")]
    pub urgent_proximity_pct: Decimal,

    /// Behavior while the circuit breaker is active: hold or flatten.
    #[serde(default)]
    pub halt_policy: HaltPolicy,

    // === Outputs ===
    /// JSONL file receiving exit attempts and position exits.
    #[serde(default)]
    pub audit_log_path: Option<String>,

    /// Port for the Prometheus exporter.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(-20, 0)
}

fn default_take_profit_pct() -> Decimal {
    Decimal::new(50, 0)
}

fn default_true() -> bool {
    true
}

fn default_trailing_activation() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_trailing_distance() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_partial_first_pct() -> Decimal {
    Decimal::new(15, 0)
}

fn default_partial_second_pct() -> Decimal {
    Decimal::new(25, 0)
}

fn default_half() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_urgent_time_threshold() -> u64 {
    3600
}

fn default_max_spread() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_min_volume() -> Decimal {
    Decimal::new(50, 0)
}

fn default_low_edge() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_lot_size() -> Decimal {
    Decimal::ONE
}

fn default_critical_timeout() -> u64 {
    5
}

fn default_critical_attempts() -> u32 {
    3
}

fn default_high_timeout() -> u64 {
    10
}

fn default_high_stages() -> u32 {
    2
}

fn default_medium_timeout() -> u64 {
    30
}

fn default_medium_stages() -> u32 {
    5
}

fn default_low_timeout() -> u64 {
    60
}

fn default_low_stages() -> u32 {
    10
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_cache_ttl() -> u64 {
    10
}

fn default_stale_threshold() -> u64 {
    60
}

fn default_rate_limit() -> u32 {
    60
}

fn default_normal_cadence() -> u64 {
    30
}

fn default_urgent_cadence() -> u64 {
    5
}

fn default_urgent_proximity() -> Decimal {
    Decimal::new(2, 0)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            trailing_enabled: true,
            trailing_activation: default_trailing_activation(),
            trailing_distance: default_trailing_distance(),
            partial_first_pct: default_partial_first_pct(),
            partial_first_fraction: default_half(),
            partial_second_pct: default_partial_second_pct(),
            partial_second_fraction: default_half(),
            urgent_time_threshold_secs: default_urgent_time_threshold(),
            max_spread: default_max_spread(),
            min_volume: default_min_volume(),
            low_edge_threshold: default_low_edge(),
            tick_size: default_tick_size(),
            lot_size: default_lot_size(),
            critical_timeout_secs: default_critical_timeout(),
            critical_max_attempts: default_critical_attempts(),
            high_timeout_secs: default_high_timeout(),
            high_max_stages: default_high_stages(),
            medium_timeout_secs: default_medium_timeout(),
            medium_max_stages: default_medium_stages(),
            low_timeout_secs: default_low_timeout(),
            low_max_stages: default_low_stages(),
            order_poll_interval_ms: default_poll_interval(),
            price_cache_ttl_secs: default_cache_ttl(),
            stale_threshold_secs: default_stale_threshold(),
            rate_limit_per_minute: default_rate_limit(),
            normal_cadence_secs: default_normal_cadence(),
            urgent_cadence_secs: default_urgent_cadence(),
            urgent_proximity_pct: default_urgent_proximity(),
            halt_policy: HaltPolicy::default(),
            audit_log_path: None,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    /// Load configuration from explicit key/value pairs (env-style keys).
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let pairs = pairs.into_iter().map(|(k, v)| (k.into(), v.into()));
        Ok(envy::from_iter(pairs)?)
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.tick_size <= Decimal::ZERO {
            return invalid("TICK_SIZE must be positive");
        }
        if self.lot_size <= Decimal::ZERO {
            return invalid("LOT_SIZE must be positive");
        }
        if self.stop_loss_pct >= Decimal::ZERO {
            return invalid("STOP_LOSS_PCT must be negative");
        }
        if self.take_profit_pct <= Decimal::ZERO {
            return invalid("TAKE_PROFIT_PCT must be positive");
        }
        if self.trailing_distance <= Decimal::ZERO {
            return invalid("TRAILING_DISTANCE must be positive");
        }
        if self.trailing_activation < Decimal::ZERO {
            return invalid("TRAILING_ACTIVATION must not be negative");
        }
        for fraction in [self.partial_first_fraction, self.partial_second_fraction] {
            if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
                return invalid("PARTIAL_*_FRACTION must be in (0, 1]");
            }
        }
        if self.partial_second_pct <= self.partial_first_pct {
            return invalid("PARTIAL_SECOND_PCT must exceed PARTIAL_FIRST_PCT");
        }
        if self.critical_max_attempts == 0
            || self.high_max_stages == 0
            || self.medium_max_stages == 0
            || self.low_max_stages == 0
        {
            return invalid("stage and attempt counts must be at least 1");
        }
        if self.order_poll_interval_ms == 0 {
            return invalid("ORDER_POLL_INTERVAL_MS must be positive");
        }
        if self.rate_limit_per_minute == 0 {
            return invalid("RATE_LIMIT_PER_MINUTE must be positive");
        }
        if self.urgent_cadence_secs == 0 || self.urgent_cadence_secs > self.normal_cadence_secs {
            return invalid("URGENT_CADENCE_SECS must be in 1..=NORMAL_CADENCE_SECS");
        }
        if self.stale_threshold_secs < self.price_cache_ttl_secs {
            return invalid("STALE_THRESHOLD_SECS must be at least PRICE_CACHE_TTL_SECS");
        }

        Ok(())
    }

    /// Exit thresholds used when a position's strategy has no override.
    pub fn exit_thresholds(&self) -> ExitThresholds {
        ExitThresholds {
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            trailing_enabled: self.trailing_enabled,
            trailing_activation: self.trailing_activation,
            trailing_distance: self.trailing_distance,
            stages: StagePlan {
                first_pct: self.partial_first_pct,
                first_fraction: self.partial_first_fraction,
                second_pct: self.partial_second_pct,
                second_fraction: self.partial_second_fraction,
                lot_size: self.lot_size,
            },
            urgent_time_threshold: Duration::from_secs(self.urgent_time_threshold_secs),
            max_spread: self.max_spread,
            min_volume: self.min_volume,
            low_edge_threshold: self.low_edge_threshold,
        }
    }

    /// Per-tier execution profiles.
    pub fn execution_profiles(&self) -> ExecutionProfiles {
        ExecutionProfiles {
            critical: ExecutionProfile::market(
                Duration::from_secs(self.critical_timeout_secs),
                self.critical_max_attempts,
            ),
            high: ExecutionProfile::aggressive(
                Duration::from_secs(self.high_timeout_secs),
                self.high_max_stages,
            ),
            medium: ExecutionProfile::fair(
                Duration::from_secs(self.medium_timeout_secs),
                self.medium_max_stages,
            ),
            low: ExecutionProfile::conservative(
                Duration::from_secs(self.low_timeout_secs),
                self.low_max_stages,
            ),
        }
    }

    /// Price walker settings.
    pub fn walk_settings(&self) -> WalkSettings {
        WalkSettings {
            profiles: self.execution_profiles(),
            tick_size: self.tick_size,
            poll_interval: Duration::from_millis(self.order_poll_interval_ms),
        }
    }

    /// Price cache settings.
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(self.price_cache_ttl_secs),
            stale_threshold: Duration::from_secs(self.stale_threshold_secs),
        }
    }

    /// Cadence policy for the scheduler.
    pub fn cadence_policy(&self) -> CadencePolicy {
        CadencePolicy {
            normal: Duration::from_secs(self.normal_cadence_secs),
            urgent: Duration::from_secs(self.urgent_cadence_secs),
            proximity_pct: self.urgent_proximity_pct,
        }
    }
}
