//! Trailing stop state machine.
//!
//! ```text
//!   Inactive ──(favorable move ≥ activation)──▶ Armed ──(price crosses stop)──▶ Triggered
//!                                                 │  ▲
//!                                                 └──┘ new favorable extreme: tighten stop
//! ```
//!
//! The stop only ever moves in the position's favor. For a long the stop sits
//! `distance` below the highest price seen since arming; for a short it sits
//! `distance` above the lowest.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::trading::{Position, PositionSide};

/// Phase of the trailing stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum TrailingPhase {
    /// Not yet armed.
    Inactive,
    /// Tracking the favorable extreme.
    Armed {
        /// Most favorable price since arming.
        peak: Decimal,
        /// Current stop price.
        stop: Decimal,
    },
    /// Stop was crossed. Terminal.
    Triggered {
        /// Most favorable price reached.
        peak: Decimal,
        /// Stop price that was crossed.
        stop: Decimal,
        /// Price that crossed it.
        trigger_price: Decimal,
    },
}

/// Trailing stop fields embedded in a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrailingStopState {
    /// Whether the mechanism is in use for this position.
    pub enabled: bool,
    /// Price at position open.
    pub activation_price: Decimal,
    /// Favorable move from the activation price needed to arm.
    pub activation_threshold: Decimal,
    /// Distance between the favorable extreme and the stop.
    pub distance: Decimal,
    /// Current phase.
    pub phase: TrailingPhase,
}

impl TrailingStopState {
    /// Create an enabled, unarmed trailing stop.
    pub fn new(activation_price: Decimal, activation_threshold: Decimal, distance: Decimal) -> Self {
        Self {
            enabled: true,
            activation_price,
            activation_threshold,
            distance,
            phase: TrailingPhase::Inactive,
        }
    }

    /// Create a trailing stop that never arms.
    pub fn disabled(activation_price: Decimal) -> Self {
        Self {
            enabled: false,
            ..Self::new(activation_price, Decimal::ZERO, Decimal::ZERO)
        }
    }

    /// Most favorable price since arming.
    pub fn peak_price(&self) -> Option<Decimal> {
        match self.phase {
            TrailingPhase::Inactive => None,
            TrailingPhase::Armed { peak, .. } | TrailingPhase::Triggered { peak, .. } => Some(peak),
        }
    }

    /// Current stop price.
    pub fn stop_price(&self) -> Option<Decimal> {
        match self.phase {
            TrailingPhase::Inactive => None,
            TrailingPhase::Armed { stop, .. } | TrailingPhase::Triggered { stop, .. } => Some(stop),
        }
    }

    /// Whether the stop is armed and tracking.
    pub fn is_armed(&self) -> bool {
        matches!(self.phase, TrailingPhase::Armed { .. })
    }

    /// Whether the stop has been crossed.
    pub fn is_triggered(&self) -> bool {
        matches!(self.phase, TrailingPhase::Triggered { .. })
    }

    /// Feed one price observation. Returns whether the stop is triggered.
    pub fn observe(&mut self, side: PositionSide, price: Decimal) -> bool {
        if !self.enabled {
            return false;
        }

        self.phase = match self.phase {
            TrailingPhase::Inactive => {
                let excursion = side.favorable_move(self.activation_price, price);
                if excursion >= self.activation_threshold {
                    let stop = self.stop_for(side, price);
                    Self::check_trigger(side, price, price, stop)
                } else {
                    TrailingPhase::Inactive
                }
            }
            TrailingPhase::Armed { peak, stop } => {
                let (peak, stop) = if side.favorable_move(peak, price) > Decimal::ZERO {
                    (price, Self::tighter(side, stop, self.stop_for(side, price)))
                } else {
                    (peak, stop)
                };
                Self::check_trigger(side, price, peak, stop)
            }
            triggered @ TrailingPhase::Triggered { .. } => triggered,
        };

        self.is_triggered()
    }

    fn stop_for(&self, side: PositionSide, peak: Decimal) -> Decimal {
        match side {
            PositionSide::Long => peak - self.distance,
            PositionSide::Short => peak + self.distance,
        }
    }

    fn tighter(side: PositionSide, current: Decimal, candidate: Decimal) -> Decimal {
        match side {
            PositionSide::Long => current.max(candidate),
            PositionSide::Short => current.min(candidate),
        }
    }

    fn check_trigger(side: PositionSide, price: Decimal, peak: Decimal, stop: Decimal) -> TrailingPhase {
        let crossed = match side {
            PositionSide::Long => price <= stop,
            PositionSide::Short => price >= stop,
        };

        if crossed {
            TrailingPhase::Triggered {
                peak,
                stop,
                trigger_price: price,
            }
        } else {
            TrailingPhase::Armed { peak, stop }
        }
    }
}

/// Drives a position's trailing stop from price observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingStopTracker;

impl TrailingStopTracker {
    /// Update the position's trailing stop with a new price.
    ///
    /// Returns true when the stop is (or already was) triggered.
    pub fn update(&self, position: &mut Position, price: Decimal) -> bool {
        let before = position.trailing.phase;
        let triggered = position.trailing.observe(position.side, price);
        let after = position.trailing.phase;

        if before != after {
            match after {
                TrailingPhase::Armed { peak, stop } if before == TrailingPhase::Inactive => {
                    info!(position_id = %position.id, peak = %peak, stop = %stop, "Trailing stop armed");
                }
                TrailingPhase::Armed { peak, stop } => {
                    debug!(position_id = %position.id, peak = %peak, stop = %stop, "Trailing stop tightened");
                }
                TrailingPhase::Triggered { stop, trigger_price, .. } => {
                    info!(
                        position_id = %position.id,
                        stop = %stop,
                        price = %trigger_price,
                        "Trailing stop triggered"
                    );
                }
                TrailingPhase::Inactive => {}
            }
        }

        triggered
    }
}
