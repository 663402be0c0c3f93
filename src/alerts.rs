//! Operator alerts.
//!
//! Expected conditions (timeouts, a stale tick, a rejection that still has
//! retries left) stay in the logs. Anything an operator has to act on goes
//! through an [`AlertSink`].

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::exit::conditions::{ExitCondition, Priority};
use crate::metrics;

/// Something an operator needs to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    /// Circuit breaker was activated or released.
    CircuitBreakerChanged {
        /// New state.
        halted: bool,
    },
    /// Exit decisions for a position are suspended on stale data.
    DataStale {
        /// Affected position.
        position_id: String,
        /// Token whose data went stale.
        token_id: String,
        /// Feed error text.
        reason: String,
    },
    /// Fresh data is flowing again for a position.
    DataRecovered {
        /// Affected position.
        position_id: String,
        /// Token whose data recovered.
        token_id: String,
    },
    /// A CRITICAL or HIGH exit ran out of escalation.
    ExitExhausted {
        /// Affected position.
        position_id: String,
        /// Condition being acted on.
        condition: ExitCondition,
        /// Its tier.
        priority: Priority,
        /// Quantity still open.
        remaining: Decimal,
    },
    /// A position was frozen pending manual review.
    NeedsReview {
        /// Affected position.
        position_id: String,
        /// Why.
        reason: String,
    },
    /// A position invariant was violated. The position task has stopped.
    InvariantViolation {
        /// Affected position.
        position_id: String,
        /// Violation text.
        detail: String,
    },
    /// Gateway fill reports disagree with what was already recorded.
    ReconciliationMismatch {
        /// Affected position.
        position_id: String,
        /// Order involved.
        order_id: String,
        /// What disagreed.
        detail: String,
    },
}

impl Alert {
    /// Short machine-readable kind, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Alert::CircuitBreakerChanged { .. } => "circuit_breaker_changed",
            Alert::DataStale { .. } => "data_stale",
            Alert::DataRecovered { .. } => "data_recovered",
            Alert::ExitExhausted { .. } => "exit_exhausted",
            Alert::NeedsReview { .. } => "needs_review",
            Alert::InvariantViolation { .. } => "invariant_violation",
            Alert::ReconciliationMismatch { .. } => "reconciliation_mismatch",
        }
    }

    /// Position the alert is about, if any.
    pub fn position_id(&self) -> Option<&str> {
        match self {
            Alert::CircuitBreakerChanged { .. } => None,
            Alert::DataStale { position_id, .. }
            | Alert::DataRecovered { position_id, .. }
            | Alert::ExitExhausted { position_id, .. }
            | Alert::NeedsReview { position_id, .. }
            | Alert::InvariantViolation { position_id, .. }
            | Alert::ReconciliationMismatch { position_id, .. } => Some(position_id),
        }
    }
}

/// Destination for operator alerts.
pub trait AlertSink: Send + Sync {
    /// Deliver an alert. Must not block.
    fn deliver(&self, alert: Alert);

    /// Count and deliver an alert.
    fn raise(&self, alert: Alert) {
        metrics::inc_alerts(alert.kind());
        self.deliver(alert);
    }
}

/// Writes alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn deliver(&self, alert: Alert) {
        let kind = alert.kind();
        match &alert {
            Alert::DataRecovered { position_id, .. } => {
                info!(kind, position_id = %position_id, "Price data recovered");
            }
            Alert::InvariantViolation { position_id, detail } => {
                error!(kind, position_id = %position_id, detail = %detail, "Position invariant violated");
            }
            Alert::ExitExhausted { position_id, condition, priority, remaining } => {
                error!(
                    kind,
                    position_id = %position_id,
                    condition = %condition,
                    priority = %priority,
                    remaining = %remaining,
                    "Exit exhausted escalation"
                );
            }
            other => {
                warn!(kind, alert = ?other, "Operator alert");
            }
        }
    }
}

/// Forwards alerts to a channel, for embedding applications and tests.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<Alert>,
}

impl ChannelAlertSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn deliver(&self, alert: Alert) {
        if let Err(e) = self.tx.send(alert) {
            warn!(alert = ?e.0, "Alert receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelAlertSink::new();
        sink.raise(Alert::NeedsReview {
            position_id: "pos-1".to_string(),
            reason: "circuit breaker".to_string(),
        });

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.kind(), "needs_review");
        assert_eq!(alert.position_id(), Some("pos-1"));
    }

    #[test]
    fn alerts_serialize_with_kind_tag() {
        let alert = Alert::ExitExhausted {
            position_id: "pos-1".to_string(),
            condition: ExitCondition::StopLoss,
            priority: Priority::Critical,
            remaining: dec!(10),
        };
        let json = serde_json::to_value(&alert).unwrap();

        assert_eq!(json["kind"], "exit_exhausted");
        assert_eq!(json["condition"], "stop_loss");
        assert_eq!(json["priority"], "CRITICAL");
    }

    #[test]
    fn tracing_sink_accepts_every_kind() {
        let sink = TracingAlertSink;
        sink.raise(Alert::CircuitBreakerChanged { halted: true });
        sink.raise(Alert::DataRecovered {
            position_id: "p".to_string(),
            token_id: "t".to_string(),
        });
    }
}
