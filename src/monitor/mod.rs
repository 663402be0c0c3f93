//! Position monitoring.
//!
//! This module handles:
//! - The shared external call budget
//! - Price caching and staleness detection
//! - The circuit breaker signal
//! - Cadence scheduling
//! - Position persistence hand-off
//! - Per-position monitoring tasks

pub mod budget;
pub mod cache;
pub mod circuit;
pub mod scheduler;
pub mod store;
pub mod task;

pub use budget::CallBudget;
pub use cache::{CacheSettings, PriceCache, PriceReading};
pub use circuit::{CircuitBreaker, HaltPolicy, HaltSignal};
pub use scheduler::{Cadence, CadencePolicy, Scheduler};
pub use store::{InMemoryPositionStore, PositionStore};
pub use task::{Collaborators, CycleOutcome, PositionMonitor, TaskState};
