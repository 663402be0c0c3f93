//! Unified error types for the exit engine.

use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

/// Unified error type for the exit engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Price feed error.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Order gateway error.
    #[error("order error: {0}")]
    Order(#[from] OrderError),

    /// Position invariant violated. Fatal for the owning position task.
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    /// Audit sink error.
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment deserialization failed.
    #[error("failed to load environment: {0}")]
    Env(#[from] envy::Error),

    /// A value failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Price feed and cache errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The feed could not be reached or returned garbage.
    #[error("price feed unavailable for {token_id}: {reason}")]
    Unavailable {
        /// Token that was requested.
        token_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Feed is failing and the last cached quote is older than the stale threshold.
    #[error("price data for {token_id} stale for {age:?}")]
    Stale {
        /// Token whose data went stale.
        token_id: String,
        /// Age of the last good quote.
        age: Duration,
    },

    /// Feed is failing and nothing has ever been cached for this token.
    #[error("no price data for {token_id}")]
    NoData {
        /// Token that was requested.
        token_id: String,
    },
}

/// Order gateway errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// Order rejected by the venue.
    #[error("order rejected: {reason}")]
    Rejected {
        /// Rejection reason from the venue.
        reason: String,
    },

    /// Gateway does not know the order handle.
    #[error("unknown order {order_id}")]
    UnknownOrder {
        /// The order ID.
        order_id: String,
    },

    /// Transport or venue failure unrelated to the order contents.
    #[error("gateway failure: {0}")]
    Gateway(String),
}

/// Position invariant violations. Never clamped, always surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// An exit would take more than the remaining position.
    #[error("position {position_id}: exit of {requested} exceeds remaining {remaining}")]
    OverExit {
        /// Affected position.
        position_id: String,
        /// Quantity the exit tried to record.
        requested: Decimal,
        /// Quantity still open.
        remaining: Decimal,
    },

    /// Gateway reported a fill larger than the order.
    #[error("order {order_id}: filled {filled} exceeds order size {size}")]
    OverFill {
        /// Order ID.
        order_id: String,
        /// Reported filled quantity.
        filled: Decimal,
        /// Order quantity.
        size: Decimal,
    },
}

/// Audit log sink errors.
#[derive(Error, Debug)]
pub enum AuditError {
    /// Writing to the backing file failed.
    #[error("audit write failed: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing the record failed.
    #[error("audit serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A writer panicked while holding the sink lock.
    #[error("audit sink poisoned")]
    Poisoned,
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn feed_errors_name_the_token() {
        let stale = FeedError::Stale {
            token_id: "t".to_string(),
            age: Duration::from_secs(61),
        };
        assert_eq!(stale.to_string(), "price data for t stale for 61s");
    }

    #[test]
    fn over_fill_reports_order_and_size() {
        let violation = InvariantViolation::OverFill {
            order_id: "mock-1".to_string(),
            filled: dec!(60),
            size: dec!(50),
        };
        assert_eq!(violation.to_string(), "order mock-1: filled 60 exceeds order size 50");
    }

    #[test]
    fn invariant_converts_into_engine_error() {
        let violation = InvariantViolation::OverExit {
            position_id: "pos-1".to_string(),
            requested: dec!(60),
            remaining: dec!(50),
        };
        let err: EngineError = violation.into();
        assert!(matches!(err, EngineError::Invariant(_)));
        assert!(err.to_string().contains("exceeds remaining 50"));
    }
}
