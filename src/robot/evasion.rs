// Obstacle evasion loop
//
// Reads the latest ranging snapshot every period, turns it into per-wheel
// damping factors and re-issues the last requested wheel speeds through
// the drive. Idle -> Active when supervised with data available, back to
// Idle when the data goes missing, the robot stops, or on halt.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::drive::{DampingFactors, DriveControl};
use crate::config::{ConfigError, EvasionSettings};
use crate::sensor_stream::SensorStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Front,
    FrontLeft,
    FrontRight,
    Rear,
    RearLeft,
    RearRight,
}

impl FromStr for Direction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(Direction::Front),
            "front-left" => Ok(Direction::FrontLeft),
            "front-right" => Ok(Direction::FrontRight),
            "rear" => Ok(Direction::Rear),
            "rear-left" => Ok(Direction::RearLeft),
            "rear-right" => Ok(Direction::RearRight),
            _ => Err(ConfigError::UnknownDirection(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RangeParseError {
    #[error("expected {expected} readings, got {found}")]
    TooFew { expected: usize, found: usize },

    #[error("bad reading '{0}'")]
    BadReading(String),
}

/// One reading per mounted sensor, in sensor units
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RangeSnapshot {
    pub front: Option<f64>,
    pub front_left: Option<f64>,
    pub front_right: Option<f64>,
    pub rear: Option<f64>,
    pub rear_left: Option<f64>,
    pub rear_right: Option<f64>,
}

impl RangeSnapshot {
    /// Decode a space-separated reading list, the i-th value belonging to
    /// `layout[i]`. Extra values are ignored.
    pub fn parse(raw: &str, layout: &[Direction]) -> Result<Self, RangeParseError> {
        let values: Vec<&str> = raw.split_whitespace().collect();
        if values.len() < layout.len() {
            return Err(RangeParseError::TooFew {
                expected: layout.len(),
                found: values.len(),
            });
        }
        let mut snapshot = RangeSnapshot::default();
        for (direction, value) in layout.iter().zip(values) {
            let reading: f64 = value
                .parse()
                .map_err(|_| RangeParseError::BadReading(value.to_string()))?;
            if !reading.is_finite() {
                return Err(RangeParseError::BadReading(value.to_string()));
            }
            snapshot.set(*direction, reading.max(0.0));
        }
        Ok(snapshot)
    }

    pub fn get(&self, direction: Direction) -> Option<f64> {
        match direction {
            Direction::Front => self.front,
            Direction::FrontLeft => self.front_left,
            Direction::FrontRight => self.front_right,
            Direction::Rear => self.rear,
            Direction::RearLeft => self.rear_left,
            Direction::RearRight => self.rear_right,
        }
    }

    pub fn set(&mut self, direction: Direction, reading: f64) {
        let slot = match direction {
            Direction::Front => &mut self.front,
            Direction::FrontLeft => &mut self.front_left,
            Direction::FrontRight => &mut self.front_right,
            Direction::Rear => &mut self.rear,
            Direction::RearLeft => &mut self.rear_left,
            Direction::RearRight => &mut self.rear_right,
        };
        *slot = Some(reading);
    }
}

impl fmt::Display for RangeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("front-left", self.front_left),
            ("front", self.front),
            ("front-right", self.front_right),
            ("rear-left", self.rear_left),
            ("rear", self.rear),
            ("rear-right", self.rear_right),
        ];
        let mut first = true;
        for (name, value) in fields {
            if let Some(value) = value {
                if !first {
                    f.write_str(", ")?;
                }
                write!(f, "{}={}", name, value)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EvasionConfig {
    pub threshold: f64,
    pub exponent: f64,
    pub linear_factor: f64,
    pub period: Duration,
    pub sensor_key: String,
    pub layout: Vec<Direction>,
}

impl EvasionConfig {
    pub fn from_settings(settings: &EvasionSettings) -> Result<Self, ConfigError> {
        let layout = settings
            .layout
            .iter()
            .map(|name| name.parse())
            .collect::<Result<Vec<Direction>, _>>()?;
        Ok(Self {
            threshold: settings.threshold,
            exponent: settings.exponent,
            linear_factor: settings.linear_factor,
            period: Duration::from_millis(settings.period_ms.max(1)),
            sensor_key: settings.sensor_key.clone(),
            layout,
        })
    }
}

impl Default for EvasionConfig {
    fn default() -> Self {
        // the default layout names are all valid directions
        Self::from_settings(&EvasionSettings::default()).unwrap_or(Self {
            threshold: crate::config::OBSTACLE_THRESHOLD,
            exponent: crate::config::EVASION_EXPONENT,
            linear_factor: crate::config::EVASION_LINEAR_FACTOR,
            period: crate::config::EVASION_PERIOD,
            sensor_key: crate::config::RANGING_SENSOR_KEY.to_string(),
            layout: vec![
                Direction::FrontLeft,
                Direction::Front,
                Direction::FrontRight,
                Direction::Rear,
            ],
        })
    }
}

/// Damping factors for one ranging snapshot
pub fn compute_damping(snapshot: &RangeSnapshot, config: &EvasionConfig) -> DampingFactors {
    let threshold = config.threshold;
    let close = |reading: Option<f64>| reading.filter(|r| *r < threshold);
    // Straight-ahead sensors scale with half the exponent
    let cardinal = |r: f64| config.linear_factor * (r / threshold).powf(config.exponent * 0.5);
    let diagonal =
        |r: f64| (config.linear_factor * (r / threshold).powf(config.exponent)).max(f64::EPSILON);

    let mut d = DampingFactors::NONE;

    if let Some(r) = close(snapshot.front) {
        let f = cardinal(r);
        d.left_fwd *= f;
        d.right_fwd *= f;
    }
    if let Some(r) = close(snapshot.front_right) {
        let f = diagonal(r);
        d.left_fwd *= f;
        d.right_fwd /= f;
    }
    if let Some(r) = close(snapshot.front_left) {
        let f = diagonal(r);
        d.right_fwd *= f;
        d.left_fwd /= f;
    }
    if let Some(r) = close(snapshot.rear) {
        let f = cardinal(r);
        d.left_rev *= f;
        d.right_rev *= f;
    }
    if let Some(r) = close(snapshot.rear_left) {
        let f = diagonal(r);
        d.right_rev *= f;
        d.left_rev /= f;
    }
    if let Some(r) = close(snapshot.rear_right) {
        let f = diagonal(r);
        d.left_rev *= f;
        d.right_rev /= f;
    }

    if snapshot.front_left.is_none() && snapshot.front_right.is_none() {
        d.left_fwd = d.left_fwd.powi(2);
        d.right_fwd = d.right_fwd.powi(2);
    }
    if snapshot.rear_left.is_none() && snapshot.rear_right.is_none() {
        d.left_rev = d.left_rev.powi(2);
        d.right_rev = d.right_rev.powi(2);
    }

    if close(snapshot.front).is_some() {
        d.left_fwd = 0.0;
        d.right_fwd = 0.0;
    }
    if close(snapshot.rear).is_some() {
        d.left_rev = 0.0;
        d.right_rev = 0.0;
    }

    d.clamped()
}

struct Shared {
    drive: Arc<DriveControl>,
    sensors: Arc<SensorStream>,
    config: EvasionConfig,
    desired: AtomicBool,
    active: AtomicBool,
    // Bumped to retire the running loop
    epoch: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct EvasionController {
    shared: Arc<Shared>,
}

impl EvasionController {
    pub fn new(drive: Arc<DriveControl>, sensors: Arc<SensorStream>, config: EvasionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                drive,
                sensors,
                config,
                desired: AtomicBool::new(true),
                active: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EvasionConfig {
        &self.shared.config
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn is_desired(&self) -> bool {
        self.shared.desired.load(Ordering::SeqCst)
    }

    /// Start the loop if it should run, is idle, and ranging data exists
    pub fn supervise(&self) -> bool {
        if !self.is_desired() || self.is_active() {
            return false;
        }
        if self.shared.sensors.latest(&self.shared.config.sensor_key).is_none() {
            return false;
        }
        self.start()
    }

    /// Spawn the loop; a no-op returning `false` while one is active
    pub fn start(&self) -> bool {
        if self
            .shared
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let mut worker = self.shared.worker.lock();
        if let Some(previous) = worker.take() {
            // retired by the epoch bump, exits within one period
            let _ = previous.join();
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("evasion".to_string())
            .spawn(move || run_loop(shared, epoch));
        match spawned {
            Ok(handle) => {
                info!("Obstacle evasion active");
                *worker = Some(handle);
                true
            }
            Err(e) => {
                warn!("Cannot start evasion thread: {}", e);
                self.shared.active.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Leave the loop until the next supervise; damping goes back to none
    pub fn pause(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        if self.shared.active.swap(false, Ordering::SeqCst) {
            info!("Obstacle evasion paused");
        }
        self.shared.drive.reset_damping();
    }

    /// Stop for good and wait for the thread
    pub fn halt(&self) {
        self.shared.desired.store(false, Ordering::SeqCst);
        self.pause();
        if let Some(handle) = self.shared.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(shared: Arc<Shared>, epoch: u64) {
    let config = &shared.config;
    let current = || {
        shared.desired.load(Ordering::SeqCst) && shared.epoch.load(Ordering::SeqCst) == epoch
    };

    loop {
        thread::sleep(config.period);
        if !current() {
            break;
        }

        let Some(raw) = shared.sensors.latest(&config.sensor_key) else {
            info!("No ranging data, obstacle evasion idle");
            break;
        };

        match RangeSnapshot::parse(&raw, &config.layout) {
            Ok(snapshot) => {
                let damping = compute_damping(&snapshot, config);
                debug!("Sensor values: {} -> {:?}", snapshot, damping);
                if let Err(e) = shared.drive.reapply(damping) {
                    warn!("Evasion output failed: {}", e);
                }
            }
            Err(e) => warn!("Skipping evasion cycle, {}: {:?}", e, raw),
        }
    }

    if shared.epoch.load(Ordering::SeqCst) == epoch {
        shared.drive.reset_damping();
        shared.active.store(false, Ordering::SeqCst);
    }
    debug!("Evasion loop {} exited", epoch);
}
