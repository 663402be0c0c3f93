//! Order gateway contract and fill waiting.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::order::{OrderHandle, OrderReport, OrderRequest};
use crate::error::OrderError;
use crate::monitor::budget::CallBudget;

/// Venue order entry consumed by the price walker.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Place an order. A venue rejection is `OrderError::Rejected`.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderHandle, OrderError>;

    /// Get current order status.
    async fn poll_order(&self, handle: &OrderHandle) -> Result<OrderReport, OrderError>;

    /// Cancel a resting order.
    async fn cancel_order(&self, handle: &OrderHandle) -> Result<(), OrderError>;
}

/// Poll an order until it is terminal, fully filled, or the deadline passes.
///
/// Every poll spends one unit of call budget. Returns the last report seen;
/// poll errors are logged and treated as "no news".
pub async fn wait_for_fill(
    gateway: &dyn OrderGateway,
    budget: &CallBudget,
    handle: &OrderHandle,
    request: &OrderRequest,
    timeout: Duration,
    poll_interval: Duration,
) -> OrderReport {
    let deadline = Instant::now() + timeout;
    let mut last = OrderReport::open();

    loop {
        let now = Instant::now();
        if now >= deadline {
            debug!(order_id = %handle.order_id, "Stage deadline reached");
            return last;
        }

        sleep(poll_interval.min(deadline - now)).await;

        budget.acquire().await;
        match gateway.poll_order(handle).await {
            Ok(report) => {
                last = report;
                if report.status.is_terminal() || report.filled_qty >= request.quantity {
                    return report;
                }
            }
            Err(e) => {
                warn!(order_id = %handle.order_id, error = %e, "Error polling order status");
            }
        }
    }
}
