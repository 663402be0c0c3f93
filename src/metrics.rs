//! Prometheus metrics for the monitoring loop and exit execution.
//!
//! This module provides metrics for:
//! - Monitor cycles and price data freshness
//! - External call budget pressure
//! - Exit attempts, fills and walk latency
//! - Alerts and audit sink health

use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

// === Metric Name Constants ===

/// Monitor cycles counter metric name.
pub const METRIC_MONITOR_CYCLES: &str = "monitor_cycles_total";
/// Price feed calls counter metric name.
pub const METRIC_FEED_CALLS: &str = "price_feed_calls_total";
/// Price cache hits counter metric name.
pub const METRIC_CACHE_HITS: &str = "price_cache_hits_total";
/// Stale price faults counter metric name.
pub const METRIC_STALE_FAULTS: &str = "price_stale_faults_total";
/// External calls admitted by the budget.
pub const METRIC_EXTERNAL_CALLS: &str = "external_calls_total";
/// Budget wait histogram metric name.
pub const METRIC_BUDGET_WAIT: &str = "budget_wait_ms";
/// Exit attempts counter metric name.
pub const METRIC_EXIT_ATTEMPTS: &str = "exit_attempts_total";
/// Position exits counter metric name.
pub const METRIC_POSITION_EXITS: &str = "position_exits_total";
/// Exit walk duration histogram metric name.
pub const METRIC_WALK_DURATION: &str = "exit_walk_duration_ms";
/// Alerts raised counter metric name.
pub const METRIC_ALERTS: &str = "alerts_total";
/// Audit sink failures counter metric name.
pub const METRIC_AUDIT_FAILURES: &str = "audit_failures_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    // Latency histograms
    describe_histogram!(
        METRIC_BUDGET_WAIT,
        "Time spent waiting for external call budget in milliseconds"
    );
    describe_histogram!(
        METRIC_WALK_DURATION,
        "Duration of an exit price walk in milliseconds"
    );

    // Counters
    describe_counter!(METRIC_MONITOR_CYCLES, "Total number of position monitor cycles");
    describe_counter!(METRIC_FEED_CALLS, "Total number of price feed calls");
    describe_counter!(METRIC_CACHE_HITS, "Total number of price cache hits");
    describe_counter!(
        METRIC_STALE_FAULTS,
        "Total number of cycles suspended on stale price data"
    );
    describe_counter!(
        METRIC_EXTERNAL_CALLS,
        "Total number of external calls admitted by the call budget"
    );
    describe_counter!(METRIC_EXIT_ATTEMPTS, "Total number of exit order attempts");
    describe_counter!(METRIC_POSITION_EXITS, "Total number of recorded position exits");
    describe_counter!(METRIC_ALERTS, "Total number of operator alerts raised");
    describe_counter!(METRIC_AUDIT_FAILURES, "Total number of failed audit writes");

    debug!("Metrics initialized");
}

/// Record time spent waiting for budget.
pub fn record_budget_wait(waited: Duration) {
    histogram!(METRIC_BUDGET_WAIT).record(waited.as_secs_f64() * 1000.0);
}

/// Increment monitor cycles counter.
pub fn inc_monitor_cycles() {
    counter!(METRIC_MONITOR_CYCLES).increment(1);
}

/// Increment price feed calls counter.
pub fn inc_feed_calls() {
    counter!(METRIC_FEED_CALLS).increment(1);
}

/// Increment price cache hits counter.
pub fn inc_cache_hits() {
    counter!(METRIC_CACHE_HITS).increment(1);
}

/// Increment stale price faults counter.
pub fn inc_stale_faults() {
    counter!(METRIC_STALE_FAULTS).increment(1);
}

/// Increment external calls counter.
pub fn inc_external_calls() {
    counter!(METRIC_EXTERNAL_CALLS).increment(1);
}

/// Increment exit attempts counter for an outcome.
pub fn inc_exit_attempts(outcome: &str) {
    counter!(METRIC_EXIT_ATTEMPTS, "outcome" => outcome.to_string()).increment(1);
}

/// Increment position exits counter for a stage.
pub fn inc_position_exits(stage: &str) {
    counter!(METRIC_POSITION_EXITS, "stage" => stage.to_string()).increment(1);
}

/// Increment alerts counter for an alert kind.
pub fn inc_alerts(kind: &str) {
    counter!(METRIC_ALERTS, "kind" => kind.to_string()).increment(1);
}

/// Increment audit failures counter.
pub fn inc_audit_failures() {
    counter!(METRIC_AUDIT_FAILURES).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for an exit walk.
pub fn timer_exit_walk() -> LatencyTimer {
    LatencyTimer::new(METRIC_WALK_DURATION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn latency_timer_measures_time() {
        let timer = LatencyTimer::new("test_metric");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 9.0);
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        init_metrics();
        inc_exit_attempts("timed_out");
        record_budget_wait(Duration::from_millis(3));
    }
}
