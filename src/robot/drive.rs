// Differential drive output with per-wheel damping
//
// The last requested wheel speeds are kept undamped. Every write, from the
// operator or from the evasion loop, recomputes the damped output from them.
// Lock order: drive state first, protocol second.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::WHEEL_SPEED_LIMIT;
use crate::protocol::{self, SharedProtocol};

/// Left/right wheel speeds, clamped to the wheel speed limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelCommand {
    pub left: i16,
    pub right: i16,
}

impl WheelCommand {
    pub fn new(left: i32, right: i32) -> Self {
        let limit = WHEEL_SPEED_LIMIT as i32;
        Self {
            left: left.clamp(-limit, limit) as i16,
            right: right.clamp(-limit, limit) as i16,
        }
    }

    pub fn stopped() -> Self {
        Self::default()
    }

    /// Wheels turning in opposite directions, or either wheel at rest
    pub fn is_pivot(&self) -> bool {
        (self.left <= 0 && self.right >= 0) || (self.left >= 0 && self.right <= 0)
    }
}

/// Multipliers applied to each wheel by direction of travel, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DampingFactors {
    pub left_fwd: f64,
    pub left_rev: f64,
    pub right_fwd: f64,
    pub right_rev: f64,
}

impl DampingFactors {
    pub const NONE: DampingFactors = DampingFactors {
        left_fwd: 1.0,
        left_rev: 1.0,
        right_fwd: 1.0,
        right_rev: 1.0,
    };

    /// Force every factor into [0, 1]; NaN becomes 0
    pub fn clamped(self) -> Self {
        fn unit(v: f64) -> f64 {
            if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
        }
        Self {
            left_fwd: unit(self.left_fwd),
            left_rev: unit(self.left_rev),
            right_fwd: unit(self.right_fwd),
            right_rev: unit(self.right_rev),
        }
    }

    /// Damped output for `requested`
    ///
    /// Pivots and in-place turns pass through untouched.
    pub fn apply(&self, requested: WheelCommand) -> WheelCommand {
        if requested.is_pivot() {
            return requested;
        }
        let left = if requested.left > 0 {
            requested.left as f64 * self.left_fwd
        } else {
            requested.left as f64 * self.left_rev
        };
        let right = if requested.right > 0 {
            requested.right as f64 * self.right_fwd
        } else {
            requested.right as f64 * self.right_rev
        };
        WheelCommand::new(left.trunc() as i32, right.trunc() as i32)
    }
}

impl Default for DampingFactors {
    fn default() -> Self {
        Self::NONE
    }
}

struct DriveState {
    requested: WheelCommand,
    damping: DampingFactors,
    output: WheelCommand,
}

pub struct DriveControl {
    state: Mutex<DriveState>,
    protocol: SharedProtocol,
    damping_enabled: AtomicBool,
}

impl DriveControl {
    pub fn new(protocol: SharedProtocol) -> Self {
        Self {
            state: Mutex::new(DriveState {
                requested: WheelCommand::stopped(),
                damping: DampingFactors::NONE,
                output: WheelCommand::stopped(),
            }),
            protocol,
            damping_enabled: AtomicBool::new(true),
        }
    }

    pub fn protocol(&self) -> &SharedProtocol {
        &self.protocol
    }

    /// Record a new requested speed and write its damped output
    pub fn set_wheel_speeds(&self, left: i32, right: i32) -> protocol::Result<WheelCommand> {
        let mut state = self.state.lock();
        state.requested = WheelCommand::new(left, right);
        self.output(&mut state)
    }

    /// Replace the damping factors and re-issue the last requested speed
    pub fn reapply(&self, damping: DampingFactors) -> protocol::Result<WheelCommand> {
        let mut state = self.state.lock();
        state.damping = damping.clamped();
        self.output(&mut state)
    }

    /// Back to undamped without touching the wire
    pub fn reset_damping(&self) {
        self.state.lock().damping = DampingFactors::NONE;
    }

    pub fn requested(&self) -> WheelCommand {
        self.state.lock().requested
    }

    pub fn last_output(&self) -> WheelCommand {
        self.state.lock().output
    }

    pub fn damping(&self) -> DampingFactors {
        self.state.lock().damping
    }

    pub fn damping_enabled(&self) -> bool {
        self.damping_enabled.load(Ordering::SeqCst)
    }

    /// Flip damping; returns the new state. Takes effect on the next output.
    pub fn toggle_damping(&self) -> bool {
        !self.damping_enabled.fetch_xor(true, Ordering::SeqCst)
    }

    fn output(&self, state: &mut DriveState) -> protocol::Result<WheelCommand> {
        let output = if self.damping_enabled() {
            state.damping.apply(state.requested)
        } else {
            state.requested
        };
        debug!(
            "Setting wheel speeds to ({}, {}), requested ({}, {})",
            output.left, output.right, state.requested.left, state.requested.right
        );
        self.protocol
            .lock()
            .set_wheel_speeds(output.left, output.right)?;
        state.output = output;
        Ok(output)
    }
}
