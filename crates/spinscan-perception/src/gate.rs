//! Start gate and latest platform angle.
//!
//! Accumulation is withheld until the rotating platform has been seen within
//! [`GATE_TOLERANCE`] of its zero position.  The gate latches open exactly
//! once and never closes again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::info;

pub const GATE_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Closed,
    Open,
}

/// Last-writer-wins cell holding the platform angle.
///
/// Starts out unknown; an unknown angle never opens the gate.
#[derive(Debug)]
pub struct AngleCell {
    bits: AtomicU64,
}

impl Default for AngleCell {
    fn default() -> Self {
        Self {
            bits: AtomicU64::new(f64::NAN.to_bits()),
        }
    }
}

impl AngleCell {
    pub fn set(&self, angle: f64) {
        self.bits.store(angle.to_bits(), Ordering::Release);
    }

    /// Raw stored value (NaN while unknown).
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn latest(&self) -> Option<f64> {
        let angle = self.get();
        (!angle.is_nan()).then_some(angle)
    }
}

/// One-way latch guarding accumulation.
#[derive(Debug, Default)]
pub struct StartGate {
    open: AtomicBool,
}

impl StartGate {
    pub fn state(&self) -> GateState {
        if self.open.load(Ordering::Acquire) {
            GateState::Open
        } else {
            GateState::Closed
        }
    }

    /// Open the gate if it is closed and `angle` is within tolerance of zero.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn try_open(&self, angle: f64) -> bool {
        if self.open.load(Ordering::Acquire) || !(angle.abs() < GATE_TOLERANCE) {
            return false;
        }
        let opened = self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if opened {
            info!(angle, "ready to scan");
        }
        opened
    }

    pub fn observe(&self, angle: f64) -> GateState {
        self.try_open(angle);
        self.state()
    }
}

/// Process-wide state shared by every device dispatcher and the angle handler.
#[derive(Debug, Default)]
pub struct PlatformState {
    angle: AngleCell,
    gate: StartGate,
}

impl PlatformState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_angle(&self, angle: f64) {
        self.angle.set(angle);
    }

    pub fn latest_angle(&self) -> Option<f64> {
        self.angle.latest()
    }

    /// Feed the latest angle to the gate and report its state.
    pub fn observe_gate(&self) -> GateState {
        self.gate.observe(self.angle.get())
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }
}
