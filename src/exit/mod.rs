//! Exit decision and execution.
//!
//! This module handles:
//! - Trailing stop tracking
//! - Evaluation of the ten exit conditions
//! - Priority resolution to a single action
//! - Partial exit staging
//! - Price-walking execution

pub mod conditions;
pub mod resolver;
pub mod staging;
pub mod trailing;
pub mod walker;

pub use conditions::{
    ConditionResults, ExitCondition, ExitConditionEvaluator, ExitConditionResult, ExitThresholds,
    MarketContext, Priority, ThresholdBook,
};
pub use resolver::PriorityResolver;
pub use staging::{ExitPlan, ExitStage, StagePlan};
pub use trailing::{TrailingPhase, TrailingStopState, TrailingStopTracker};
pub use walker::{
    ExecutionProfile, ExecutionProfiles, PriceWalker, WalkOutcome, WalkReport, WalkSettings,
};
