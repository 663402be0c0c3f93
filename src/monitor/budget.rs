//! Shared external call budget.
//!
//! A GCRA limiter from `governor`: `max_calls` may burst at once, after
//! which one unit comes back every `window / max_calls`. Callers block until
//! a unit is available; nothing is ever dropped. Waiters queue on a fair
//! mutex, so admission is first-come-first-served regardless of the caller's
//! cadence.

use std::num::NonZeroU32;
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::clock::{Clock, Reference};
use governor::middleware::NoOpMiddleware;
use governor::nanos::Nanos;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::metrics;

/// Instant on tokio's clock, so paused test time drives the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokioInstant(Instant);

impl Add<Nanos> for TokioInstant {
    type Output = TokioInstant;

    fn add(self, other: Nanos) -> TokioInstant {
        TokioInstant(self.0 + Duration::from(other))
    }
}

impl Reference for TokioInstant {
    fn duration_since(&self, earlier: Self) -> Nanos {
        Nanos::from(self.0.saturating_duration_since(earlier.0))
    }

    fn saturating_sub(&self, duration: Nanos) -> Self {
        TokioInstant(self.0.checked_sub(Duration::from(duration)).unwrap_or(self.0))
    }
}

/// `governor` clock reading `tokio::time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = TokioInstant;

    fn now(&self) -> TokioInstant {
        TokioInstant(Instant::now())
    }
}

type Limiter = RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<TokioInstant>>;

/// Rate-limited budget shared by the price cache and the price walker.
pub struct CallBudget {
    limit: NonZeroU32,
    limiter: Limiter,
    clock: TokioClock,
    queue: Mutex<()>,
    total: AtomicU64,
}

impl CallBudget {
    /// Create a budget of `max_calls` per `window`. A zero limit is treated as one.
    pub fn new(max_calls: u32, window: Duration) -> Self {
        let limit = NonZeroU32::new(max_calls).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / limit.get())
            .unwrap_or_else(|| Quota::per_second(limit))
            .allow_burst(limit);
        Self::with_quota(limit, quota)
    }

    /// Create a per-minute budget.
    pub fn per_minute(max_calls: u32) -> Self {
        let limit = NonZeroU32::new(max_calls).unwrap_or(NonZeroU32::MIN);
        Self::with_quota(limit, Quota::per_minute(limit))
    }

    fn with_quota(limit: NonZeroU32, quota: Quota) -> Self {
        let clock = TokioClock;
        Self {
            limit,
            limiter: RateLimiter::direct_with_clock(quota, &clock),
            clock,
            queue: Mutex::new(()),
            total: AtomicU64::new(0),
        }
    }

    /// Wait for one unit of budget.
    pub async fn acquire(&self) {
        let started = Instant::now();
        let turn = self.queue.lock().await;

        while let Err(not_until) = self.limiter.check() {
            let wait = not_until.wait_time_from(self.clock.now());
            trace!(
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "Call budget exhausted, waiting"
            );
            sleep(wait.max(Duration::from_millis(1))).await;
        }
        drop(turn);

        self.total.fetch_add(1, Ordering::Relaxed);
        metrics::inc_external_calls();
        metrics::record_budget_wait(started.elapsed());
    }

    /// Total units handed out since creation.
    pub fn total_calls(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Configured burst, equal to the calls allowed per window.
    pub fn limit(&self) -> u32 {
        self.limit.get()
    }
}

impl std::fmt::Debug for CallBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallBudget")
            .field("limit", &self.limit)
            .field("total", &self.total_calls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_limit_without_waiting() {
        let budget = CallBudget::per_minute(3);
        let start = Instant::now();

        for _ in 0..3 {
            budget.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(budget.total_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_until_a_unit_replenishes() {
        let budget = CallBudget::new(2, Duration::from_secs(60));
        let start = Instant::now();

        budget.acquire().await;
        budget.acquire().await;
        budget.acquire().await;

        // Two per minute: one unit comes back every 30s.
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(60));
        assert_eq!(budget.total_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn full_window_leaves_caller_pending() {
        let budget = CallBudget::new(1, Duration::from_secs(10));
        budget.acquire().await;

        let mut next = tokio_test::task::spawn(budget.acquire());
        tokio_test::assert_pending!(next.poll());

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio_test::assert_ready!(next.poll());
        drop(next);
        assert_eq!(budget.total_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_served_in_arrival_order() {
        let budget = Arc::new(CallBudget::new(1, Duration::from_secs(10)));
        budget.acquire().await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for id in 0..3 {
            let budget = budget.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                budget.acquire().await;
                let _ = tx.send(id);
            });
            // Let each task reach the lock before spawning the next.
            tokio::task::yield_now().await;
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(id) = rx.recv().await {
            order.push(id);
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn zero_limit_is_clamped() {
        let budget = CallBudget::new(0, Duration::from_secs(1));
        assert_eq!(budget.limit(), 1);
        assert_eq!(CallBudget::per_minute(0).limit(), 1);
    }
}
