//! System-wide circuit breaker.
//!
//! One [`CircuitBreaker`] authority flips the state; any number of
//! [`HaltSignal`] readers observe it. Position tasks get their own reader
//! handed in explicitly.

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::watch;
use tracing::warn;

/// What positions do while the breaker is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum HaltPolicy {
    /// Flag every position for manual review and place no orders.
    #[default]
    #[serde(rename = "hold")]
    #[strum(serialize = "hold")]
    HoldAndAlert,
    /// Market out of every position through the circuit breaker exit.
    #[serde(rename = "flatten")]
    #[strum(serialize = "flatten")]
    Flatten,
}

/// The single authority allowed to halt or resume trading.
#[derive(Debug)]
pub struct CircuitBreaker {
    tx: watch::Sender<bool>,
}

impl CircuitBreaker {
    /// Create a breaker in the running state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Halt all new order placement.
    pub fn halt(&self, reason: &str) {
        let changed = self.tx.send_if_modified(|halted| !std::mem::replace(halted, true));
        if changed {
            warn!(reason, "Circuit breaker activated");
        }
    }

    /// Resume trading.
    pub fn resume(&self) {
        let changed = self.tx.send_if_modified(|halted| std::mem::replace(halted, false));
        if changed {
            warn!("Circuit breaker released");
        }
    }

    /// Whether trading is currently halted.
    pub fn is_halted(&self) -> bool {
        *self.tx.borrow()
    }

    /// A read-only handle for a consumer.
    pub fn signal(&self) -> HaltSignal {
        HaltSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the circuit breaker.
#[derive(Debug, Clone)]
pub struct HaltSignal {
    rx: watch::Receiver<bool>,
}

impl HaltSignal {
    /// Whether trading is currently halted.
    pub fn is_halted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next state change. Returns the new state, or `None`
    /// once the authority is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_see_authority_state() {
        let breaker = CircuitBreaker::new();
        let signal = breaker.signal();
        assert!(!signal.is_halted());

        breaker.halt("venue outage");
        assert!(signal.is_halted());
        assert!(breaker.is_halted());

        breaker.resume();
        assert!(!signal.is_halted());
    }

    #[tokio::test]
    async fn changes_are_observable() {
        let breaker = CircuitBreaker::new();
        let mut signal = breaker.signal();

        breaker.halt("test");
        assert_eq!(signal.changed().await, Some(true));

        // Repeated halts do not notify again.
        breaker.halt("again");
        breaker.resume();
        assert_eq!(signal.changed().await, Some(false));

        drop(breaker);
        assert_eq!(signal.changed().await, None);
    }

    #[test]
    fn policy_names() {
        assert_eq!(HaltPolicy::default(), HaltPolicy::HoldAndAlert);
        assert_eq!(HaltPolicy::Flatten.to_string(), "flatten");
    }
}
