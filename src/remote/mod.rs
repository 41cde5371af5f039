// Remote-control mode
//
// Provides:
// - Tilt to differential wheel speed mixing
// - Deduplicating command sender over a remote uplink
// - The tilt send loop and its stop sequence
// - Keyboard teleop for desktops (see keyboard.rs)

pub mod keyboard;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{REMOTE_DEDUP_WINDOW, REMOTE_SEND_PERIOD, Settings, TOAST_DEDUP_WINDOW};
use crate::host::HostServices;
use crate::uplink::{ShutdownSignal, Uplink, UplinkError};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Terminal error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Uplink(#[from] UplinkError),
}

// Tilt within the dead zone reads as level
const DEAD_ZONE_DEG: f64 = 5.0;
// Tilt beyond this saturates the axis
const SATURATION_DEG: f64 = 50.0;
const MAX_WHEEL: f64 = 100.0;

/// Axis pushed past saturation, with the excess in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TiltWarning {
    TooFarForward(f64),
    TooFarBackward(f64),
    TooFarLeft(f64),
    TooFarRight(f64),
}

impl TiltWarning {
    pub fn message(&self) -> &'static str {
        match self {
            TiltWarning::TooFarForward(_) => "Too far forward",
            TiltWarning::TooFarBackward(_) => "Too far backward",
            TiltWarning::TooFarLeft(_) => "Too far left",
            TiltWarning::TooFarRight(_) => "Too far right",
        }
    }

    /// Buzz length grows with the overshoot
    pub fn vibrate_ms(&self) -> u64 {
        let excess = match self {
            TiltWarning::TooFarForward(e)
            | TiltWarning::TooFarBackward(e)
            | TiltWarning::TooFarLeft(e)
            | TiltWarning::TooFarRight(e) => *e,
        };
        (excess * 10.0).max(0.0) as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TiltDrive {
    pub left: i32,
    pub right: i32,
    pub warnings: Vec<TiltWarning>,
}

impl TiltDrive {
    pub fn command(&self) -> String {
        format!("ws {} {}", self.left, self.right)
    }
}

/// Map one tilt axis in degrees to [-100, 100], with the signed overshoot
/// past saturation
fn tilt_axis(degrees: f64) -> (f64, Option<f64>) {
    if degrees > SATURATION_DEG {
        (MAX_WHEEL, Some(degrees - SATURATION_DEG))
    } else if degrees < -SATURATION_DEG {
        (-MAX_WHEEL, Some(degrees + SATURATION_DEG))
    } else if degrees.abs() < DEAD_ZONE_DEG {
        (0.0, None)
    } else {
        (degrees * 2.0, None)
    }
}

fn power_scale(value: f64, exponent: f64) -> f64 {
    let clamped = value.clamp(-MAX_WHEEL, MAX_WHEEL);
    (clamped.abs() / MAX_WHEEL).powf(exponent).copysign(clamped) * MAX_WHEEL
}

/// Speed and direction to (left, right), rescaled so neither exceeds 100
pub fn mix(speed: f64, direction: f64) -> (i32, i32) {
    let mut left = speed + direction;
    let mut right = speed - direction;
    let peak = left.abs().max(right.abs());
    if peak > MAX_WHEEL {
        let scale = MAX_WHEEL / peak;
        left *= scale;
        right *= scale;
    }
    (left.round() as i32, right.round() as i32)
}

/// Pitch and roll in degrees to wheel speeds. Positive pitch drives
/// forward, positive roll turns right.
pub fn tilt_to_drive(
    pitch_deg: f64,
    roll_deg: f64,
    speed_scale_factor: f64,
    direction_scale_factor: f64,
) -> TiltDrive {
    let mut warnings = Vec::new();

    let (speed, overshoot) = tilt_axis(pitch_deg);
    if let Some(excess) = overshoot {
        warnings.push(if excess > 0.0 {
            TiltWarning::TooFarForward(excess)
        } else {
            TiltWarning::TooFarBackward(-excess)
        });
    }

    let (mut direction, overshoot) = tilt_axis(roll_deg);
    if let Some(excess) = overshoot {
        warnings.push(if excess > 0.0 {
            TiltWarning::TooFarLeft(excess)
        } else {
            TiltWarning::TooFarRight(-excess)
        });
    }

    // steer like a car when reversing
    if speed < 0.0 {
        direction = -direction;
    }

    let speed = power_scale(speed, speed_scale_factor);
    let direction = power_scale(direction, direction_scale_factor);
    let (left, right) = mix(speed, direction);
    TiltDrive {
        left,
        right,
        warnings,
    }
}

/// Suppresses a message identical to the last one sent within the window
#[derive(Debug)]
pub struct DedupGuard {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl DedupGuard {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Whether `msg` should go out at `now`; records it as sent if so
    pub fn should_send(&mut self, msg: &str, now: Instant) -> bool {
        let repeat = match &self.last {
            Some((previous, at)) => previous == msg && now.duration_since(*at) < self.window,
            None => false,
        };
        if !repeat {
            self.last = Some((msg.to_string(), now));
        }
        !repeat
    }
}

/// Outbound command path of a remote session
pub struct CommandSender {
    uplink: Arc<dyn Uplink>,
    host: Arc<dyn HostServices>,
    commands: Mutex<DedupGuard>,
    toasts: Mutex<DedupGuard>,
    paused: AtomicBool,
}

impl CommandSender {
    pub fn new(uplink: Arc<dyn Uplink>, host: Arc<dyn HostServices>) -> Self {
        Self {
            uplink,
            host,
            commands: Mutex::new(DedupGuard::new(REMOTE_DEDUP_WINDOW)),
            toasts: Mutex::new(DedupGuard::new(TOAST_DEDUP_WINDOW)),
            paused: AtomicBool::new(false),
        }
    }

    pub fn uplink(&self) -> &Arc<dyn Uplink> {
        &self.uplink
    }

    /// Hold the periodic stream while a one-off command runs
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Send `msg` toward the robot. `force` bypasses both the pause and the
    /// dedup window. Returns whether the message went out.
    pub fn send(&self, msg: &str, force: bool) -> bool {
        if self.is_paused() && !force {
            return false;
        }
        let fresh = self.commands.lock().should_send(msg, Instant::now());
        if !fresh && !force {
            return false;
        }
        debug!("Sending '{}'", msg);
        match self.uplink.send_command(msg) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send '{}': {}", msg, e);
                self.toast("Failed to send command to robot");
                false
            }
        }
    }

    /// Toast, at most once per window for a repeated message
    pub fn toast(&self, msg: &str) {
        if self.toasts.lock().should_send(msg, Instant::now()) {
            self.host.toast(msg);
        }
    }
}

/// Streams tilt as drive commands until stopped
pub struct RemoteControl {
    sender: Arc<CommandSender>,
    host: Arc<dyn HostServices>,
    speed_scale_factor: f64,
    direction_scale_factor: f64,
    send_quit: bool,
    shutdown: ShutdownSignal,
}

impl RemoteControl {
    pub fn new(uplink: Arc<dyn Uplink>, host: Arc<dyn HostServices>, settings: &Settings) -> Self {
        Self {
            sender: Arc::new(CommandSender::new(uplink, Arc::clone(&host))),
            host,
            speed_scale_factor: settings.remote.speed_scale_factor,
            direction_scale_factor: settings.remote.direction_scale_factor,
            send_quit: settings.remote.send_quit,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn sender(&self) -> &Arc<CommandSender> {
        &self.sender
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// Read the orientation sensor once and send the resulting command
    pub fn tilt_step(&self) -> TiltDrive {
        let (pitch, roll) = match self.host.read_orientation() {
            Ok(orientation) => (orientation.pitch.to_degrees(), orientation.roll.to_degrees()),
            Err(e) => {
                debug!("Orientation read failed: {}", e);
                self.sender.toast("Failed to read sensors");
                (0.0, 0.0)
            }
        };

        let drive = tilt_to_drive(
            pitch,
            roll,
            self.speed_scale_factor,
            self.direction_scale_factor,
        );
        for warning in &drive.warnings {
            self.host.vibrate(warning.vibrate_ms());
            self.sender.toast(warning.message());
        }
        self.sender.send(&drive.command(), false);
        drive
    }

    /// Tilt loop; returns after `stop`, once the robot was told to halt
    pub fn run_tilt(&self) {
        info!("Tilt remote running, sending every {:?}", REMOTE_SEND_PERIOD);
        while !self.shutdown.is_triggered() {
            self.tilt_step();
            self.shutdown.wait_timeout(REMOTE_SEND_PERIOD);
        }
        self.finish();
    }

    /// Halt the robot, and end its session when configured to
    pub fn finish(&self) {
        self.sender.send("ws 0 0", true);
        if self.send_quit {
            self.sender.send("q", true);
        }
        info!("Remote control stopped");
    }
}
