// Robot implementations
//
// Provides:
// - Robot kinds and their declared capabilities
// - Drive verbs on top of the damped differential drive
// - Host service call-throughs (speech, camera, location, audio)
// - Wire pass-throughs for the AVR command vocabulary

pub mod drive;
pub mod evasion;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::capability::{Capability, CapabilitySet};
use crate::config::{
    ConfigError, HEADING_DEADLINE, HEADING_PAUSE, HEADING_SETTLE, MAX_SPEED_SETTING, Settings,
};
use crate::host::{HostError, HostServices, Location};
use crate::protocol::{ProtocolError, SharedProtocol, Telemetry};
use crate::sensor_stream::SensorStream;

pub use drive::{DampingFactors, DriveControl, WheelCommand};
pub use evasion::{Direction, EvasionConfig, EvasionController, RangeSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum RobotError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("Robot implementation lacks capability: {0}")]
    Unsupported(Capability),

    #[error("New volume must be an integer between 0 and {max}")]
    InvalidVolume { max: u8 },

    #[error("Invalid speed: {0}")]
    InvalidSpeed(i32),
}

pub type Result<T> = std::result::Result<T, RobotError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotKind {
    /// AVR microcontroller over the ASCII or binary link
    Avr,
    /// AVR driving stepper motors, which cannot change speed
    AvrStepper,
    /// Differential drive with obstacle evasion
    Evasion,
}

impl FromStr for RobotKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arduino" | "avr" | "atmega168" | "atmega328" => Ok(RobotKind::Avr),
            "avr_stepper" | "avr-stepper" => Ok(RobotKind::AvrStepper),
            "evasion" | "obstacle-evasion" => Ok(RobotKind::Evasion),
            _ => Err(ConfigError::UnknownMicrocontroller(s.to_string())),
        }
    }
}

impl RobotKind {
    pub fn declared_capabilities(self) -> CapabilitySet {
        match self {
            RobotKind::Avr => Capability::ALL
                .into_iter()
                .filter(|cap| *cap != Capability::ToggleDamping)
                .collect(),
            RobotKind::AvrStepper => Capability::ALL
                .into_iter()
                .filter(|cap| !matches!(cap, Capability::ToggleDamping | Capability::ChangeSpeed))
                .collect(),
            RobotKind::Evasion => Capability::ALL
                .into_iter()
                .filter(|cap| {
                    !matches!(
                        cap,
                        Capability::ChangeSpeed
                            | Capability::Reset
                            | Capability::PairBluetooth
                            | Capability::CalibrateServo
                            | Capability::WriteRawCommand
                            | Capability::FindRange
                    )
                })
                .collect(),
        }
    }
}

/// Result of a compass orientation run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeadingOutcome {
    Reached { facing: f64 },
    TimedOut,
}

/// Timing of the compass orientation loop
#[derive(Debug, Clone, Copy)]
pub struct HeadingTiming {
    pub deadline: Duration,
    pub settle: Duration,
    pub pause: Duration,
    /// Run time for a 180 degree correction
    pub half_turn: Duration,
}

impl Default for HeadingTiming {
    fn default() -> Self {
        Self {
            deadline: HEADING_DEADLINE,
            settle: HEADING_SETTLE,
            pause: HEADING_PAUSE,
            half_turn: Duration::from_secs(1),
        }
    }
}

/// Signed correction in degrees, within [-180, 180]
pub fn heading_delta(target: f64, current: f64) -> f64 {
    let delta = target - current;
    if delta.abs() > 180.0 {
        if delta < 0.0 { delta + 360.0 } else { delta - 360.0 }
    } else {
        delta
    }
}

/// Wheel speed used to correct `error_deg` degrees of heading
pub fn correction_speed(error_deg: f64) -> i32 {
    ((error_deg / 180.0) * 40.0 + 15.0).min(50.0) as i32
}

struct RobotState {
    current_speed: u8,
    audio_on: bool,
    previous_speech: String,
}

pub struct Robot {
    kind: RobotKind,
    capabilities: CapabilitySet,
    drive: Arc<DriveControl>,
    sensors: Arc<SensorStream>,
    evasion: Option<EvasionController>,
    host: Arc<dyn HostServices>,
    state: Mutex<RobotState>,
    cardinal_margin: f64,
    heading_timing: HeadingTiming,
    running: AtomicBool,
}

impl Robot {
    pub fn new(
        kind: RobotKind,
        protocol: SharedProtocol,
        sensors: Arc<SensorStream>,
        host: Arc<dyn HostServices>,
        settings: &Settings,
    ) -> std::result::Result<Self, ConfigError> {
        let wire = protocol.lock().capabilities();
        let capabilities = kind.declared_capabilities().restricted_to_wire(&wire);
        let drive = Arc::new(DriveControl::new(protocol));

        let evasion = match kind {
            RobotKind::Evasion => Some(EvasionController::new(
                Arc::clone(&drive),
                Arc::clone(&sensors),
                EvasionConfig::from_settings(&settings.evasion)?,
            )),
            _ => None,
        };

        info!(
            "Robot {:?} ready with {} capabilities",
            kind,
            capabilities.len()
        );

        Ok(Self {
            kind,
            capabilities,
            drive,
            sensors,
            evasion,
            host,
            state: Mutex::new(RobotState {
                current_speed: settings.current_speed.min(MAX_SPEED_SETTING),
                audio_on: settings.audio_on,
                previous_speech: String::new(),
            }),
            cardinal_margin: settings.cardinal_margin,
            heading_timing: HeadingTiming::default(),
            running: AtomicBool::new(true),
        })
    }

    pub fn with_heading_timing(mut self, timing: HeadingTiming) -> Self {
        self.heading_timing = timing;
        self
    }

    pub fn kind(&self) -> RobotKind {
        self.kind
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn drive(&self) -> &DriveControl {
        &self.drive
    }

    pub fn sensors(&self) -> &Arc<SensorStream> {
        &self.sensors
    }

    pub fn evasion(&self) -> Option<&EvasionController> {
        self.evasion.as_ref()
    }

    pub fn host(&self) -> &Arc<dyn HostServices> {
        &self.host
    }

    pub fn current_speed(&self) -> u8 {
        self.state.lock().current_speed
    }

    pub fn audio_on(&self) -> bool {
        self.state.lock().audio_on
    }

    fn require(&self, capability: Capability) -> Result<()> {
        if self.has(capability) {
            Ok(())
        } else {
            Err(RobotError::Unsupported(capability))
        }
    }

    fn supervise_evasion(&self) {
        if let Some(evasion) = &self.evasion {
            evasion.supervise();
        }
    }

    // Drive

    pub fn move_forward(&self) -> Result<WheelCommand> {
        self.require(Capability::MoveForward)?;
        self.supervise_evasion();
        let speed = self.current_speed() as i32 * 10;
        Ok(self.drive.set_wheel_speeds(speed, speed)?)
    }

    pub fn move_backward(&self) -> Result<WheelCommand> {
        self.require(Capability::MoveBackward)?;
        self.supervise_evasion();
        let speed = self.current_speed() as i32 * -10;
        Ok(self.drive.set_wheel_speeds(speed, speed)?)
    }

    /// Spin in place at half the current speed
    pub fn turn_left(&self) -> Result<WheelCommand> {
        self.require(Capability::TurnLeft)?;
        let half = self.current_speed() as i32 * 10 / 2;
        Ok(self.drive.set_wheel_speeds(-half, half)?)
    }

    pub fn turn_right(&self) -> Result<WheelCommand> {
        self.require(Capability::TurnRight)?;
        let half = self.current_speed() as i32 * 10 / 2;
        Ok(self.drive.set_wheel_speeds(half, -half)?)
    }

    pub fn stop(&self) -> Result<WheelCommand> {
        if let Some(evasion) = &self.evasion {
            evasion.pause();
        }
        Ok(self.drive.set_wheel_speeds(0, 0)?)
    }

    pub fn set_wheel_speeds(&self, left: i32, right: i32) -> Result<WheelCommand> {
        self.require(Capability::SetWheelSpeeds)?;
        self.supervise_evasion();
        Ok(self.drive.set_wheel_speeds(left, right)?)
    }

    /// Store a new speed setting; applies from the next drive verb
    pub fn change_speed(&self, speed: i32) -> Result<()> {
        self.require(Capability::ChangeSpeed)?;
        if !(0..=MAX_SPEED_SETTING as i32).contains(&speed) {
            return Err(RobotError::InvalidSpeed(speed));
        }
        self.state.lock().current_speed = speed as u8;
        info!("Speed setting now {}", speed);
        Ok(())
    }

    /// Rotate until the compass reads `heading` degrees within the margin
    pub fn turn_to_heading(&self, heading: f64) -> Result<HeadingOutcome> {
        self.require(Capability::TurnToHeading)?;
        let timing = self.heading_timing;
        let deadline = Instant::now() + timing.deadline;

        while Instant::now() < deadline {
            let current = self.host.read_orientation()?.azimuth_degrees();
            let adjustment = heading_delta(heading, current);
            let error = adjustment.abs();

            if error < self.cardinal_margin {
                self.drive.set_wheel_speeds(0, 0)?;
                thread::sleep(timing.settle);
                return Ok(HeadingOutcome::Reached { facing: current });
            }

            let speed = correction_speed(error);
            self.drive.set_wheel_speeds(0, 0)?;
            if adjustment > 0.0 {
                self.drive.set_wheel_speeds(speed, -speed)?;
            } else {
                self.drive.set_wheel_speeds(-speed, speed)?;
            }
            thread::sleep(timing.half_turn.mul_f64(error / 180.0));
            self.drive.set_wheel_speeds(0, 0)?;
            thread::sleep(timing.pause);
        }

        self.drive.set_wheel_speeds(0, 0)?;
        Ok(HeadingOutcome::TimedOut)
    }

    pub fn toggle_damping(&self) -> Result<bool> {
        self.require(Capability::ToggleDamping)?;
        Ok(self.drive.toggle_damping())
    }

    // Host services

    /// Say `text` unless it repeats the previous message. Muted audio falls
    /// back to a toast; `override_mute` speaks regardless.
    pub fn speak(&self, text: &str, override_mute: bool) {
        let mut state = self.state.lock();
        let fresh = text != state.previous_speech;
        if (state.audio_on && fresh) || override_mute {
            if let Err(e) = self.host.speak(text) {
                warn!("Speech failed: {}", e);
                self.host.toast(text);
            }
        } else if fresh {
            self.host.toast(text);
        }
        state.previous_speech = text.to_string();
    }

    pub fn toggle_audio(&self) -> bool {
        let mut state = self.state.lock();
        state.audio_on = !state.audio_on;
        state.audio_on
    }

    pub fn recognize_speech(&self) -> Result<String> {
        self.require(Capability::RecognizeSpeech)?;
        self.host.toast("Launching voice recognition");
        Ok(self.host.recognize_speech()?)
    }

    pub fn capture_image(&self, path: &Path) -> Result<()> {
        self.require(Capability::CaptureImage)?;
        Ok(self.host.capture_picture(path)?)
    }

    pub fn read_location(&self) -> Result<Location> {
        self.require(Capability::ReadLocation)?;
        Ok(self.host.read_location()?)
    }

    pub fn start_audio_recording(&self, path: &Path) -> Result<()> {
        self.require(Capability::AudioRecording)?;
        self.host.toast("Starting audio recording");
        Ok(self.host.start_audio_recording(path)?)
    }

    pub fn stop_audio_recording(&self) -> Result<()> {
        self.require(Capability::AudioRecording)?;
        self.host.toast("Stopping audio recording");
        Ok(self.host.stop_audio_recording()?)
    }

    /// Set media volume from operator text
    pub fn set_volume(&self, raw: &str) -> Result<u8> {
        self.require(Capability::SetVolume)?;
        let max = self.host.max_media_volume()?;
        let volume = raw
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|v| *v <= max)
            .ok_or(RobotError::InvalidVolume { max })?;
        self.host.set_media_volume(volume)?;
        Ok(volume)
    }

    // Wire pass-throughs

    pub fn reset(&self) -> Result<()> {
        self.require(Capability::Reset)?;
        Ok(self.drive.protocol().lock().reset()?)
    }

    pub fn pair_bluetooth(&self) -> Result<()> {
        self.require(Capability::PairBluetooth)?;
        Ok(self.drive.protocol().lock().pair_bluetooth()?)
    }

    pub fn calibrate_servo(&self, x: &str, y: &str) -> Result<()> {
        self.require(Capability::CalibrateServo)?;
        Ok(self.drive.protocol().lock().calibrate_servo(x, y)?)
    }

    pub fn write_raw_command(&self, command: &str) -> Result<()> {
        self.require(Capability::WriteRawCommand)?;
        Ok(self.drive.protocol().lock().write_raw_command(command)?)
    }

    pub fn find_range(&self) -> Result<()> {
        self.require(Capability::FindRange)?;
        Ok(self.drive.protocol().lock().find_range()?)
    }

    /// Ask the microcontroller for one report and store the reply
    pub fn read_sensors(&self) -> Result<Option<Telemetry>> {
        self.require(Capability::ReadSensors)?;
        let reading = self.drive.protocol().lock().get_sensor_data()?;
        if let Some(telemetry) = &reading {
            self.on_telemetry(telemetry);
        }
        Ok(reading)
    }

    // Telemetry and lifecycle

    /// Store a telemetry value; ranging data may wake the evasion loop
    pub fn on_telemetry(&self, telemetry: &Telemetry) {
        self.sensors.push(&telemetry.key, &telemetry.value);
        if let Some(evasion) = &self.evasion {
            if telemetry.key == evasion.config().sensor_key {
                evasion.supervise();
            }
        }
    }

    pub fn latest_range(&self) -> Option<String> {
        let key = self
            .evasion
            .as_ref()
            .map_or(crate::config::RANGING_SENSOR_KEY, |e| e.config().sensor_key.as_str());
        self.sensors.latest(key)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the wheels and background work; the session ends after this
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down robot");
        if let Some(evasion) = &self.evasion {
            evasion.halt();
        }
        if let Err(e) = self.drive.set_wheel_speeds(0, 0) {
            warn!("Failed to stop wheels on shutdown: {}", e);
        }
    }
}

impl Drop for Robot {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::host::testing::RecordingHost;
    use crate::protocol::{self, testing::RecordingProtocol};

    pub struct RobotRig {
        pub robot: Arc<Robot>,
        pub protocol: RecordingProtocol,
        pub host: Arc<RecordingHost>,
    }

    pub fn rig(kind: RobotKind) -> RobotRig {
        rig_with(kind, RecordingProtocol::new(), Settings::default())
    }

    pub fn rig_with(kind: RobotKind, recorder: RecordingProtocol, settings: Settings) -> RobotRig {
        let host = Arc::new(RecordingHost::new());
        let robot = Robot::new(
            kind,
            protocol::shared(Box::new(recorder.clone())),
            Arc::new(SensorStream::default()),
            host.clone(),
            &settings,
        )
        .unwrap()
        .with_heading_timing(HeadingTiming {
            deadline: Duration::from_millis(200),
            settle: Duration::ZERO,
            pause: Duration::ZERO,
            half_turn: Duration::from_millis(1),
        });
        RobotRig {
            robot: Arc::new(robot),
            protocol: recorder,
            host,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{rig, rig_with};
    use super::*;
    use crate::host::Orientation;
    use crate::protocol::testing::RecordingProtocol;

    fn facing(degrees: f64) -> Orientation {
        Orientation {
            azimuth: degrees.to_radians(),
            ..Orientation::default()
        }
    }

    #[test]
    fn test_kind_from_microcontroller() {
        assert_eq!("arduino".parse::<RobotKind>().unwrap(), RobotKind::Avr);
        assert_eq!("AVR_Stepper".parse::<RobotKind>().unwrap(), RobotKind::AvrStepper);
        assert!(matches!(
            "pdp-11".parse::<RobotKind>(),
            Err(ConfigError::UnknownMicrocontroller(_))
        ));
    }

    #[test]
    fn test_drive_verbs_scale_with_speed() {
        let rig = rig(RobotKind::Avr);
        rig.robot.move_forward().unwrap();
        rig.robot.move_backward().unwrap();
        rig.robot.turn_left().unwrap();
        rig.robot.turn_right().unwrap();
        rig.robot.stop().unwrap();
        assert_eq!(
            rig.protocol.wheel_writes(),
            vec![(50, 50), (-50, -50), (-25, 25), (25, -25), (0, 0)]
        );
    }

    #[test]
    fn test_change_speed_applies_to_next_move() {
        let rig = rig(RobotKind::Avr);
        rig.robot.change_speed(9).unwrap();
        assert!(rig.protocol.wheel_writes().is_empty());
        rig.robot.move_forward().unwrap();
        assert_eq!(rig.protocol.wheel_writes(), vec![(90, 90)]);
        assert!(matches!(
            rig.robot.change_speed(10),
            Err(RobotError::InvalidSpeed(10))
        ));
    }

    #[test]
    fn test_stepper_cannot_change_speed() {
        let rig = rig(RobotKind::AvrStepper);
        assert!(!rig.robot.has(Capability::ChangeSpeed));
        assert!(matches!(
            rig.robot.change_speed(3),
            Err(RobotError::Unsupported(Capability::ChangeSpeed))
        ));
        assert_eq!(rig.robot.current_speed(), 5);
    }

    #[test]
    fn test_wire_capabilities_limit_robot() {
        let recorder = RecordingProtocol {
            wheels_only: true,
            ..RecordingProtocol::new()
        };
        let rig = rig_with(RobotKind::Avr, recorder, Settings::default());
        assert!(rig.robot.has(Capability::MoveForward));
        assert!(rig.robot.has(Capability::Speak));
        assert!(!rig.robot.has(Capability::Reset));
        assert!(matches!(
            rig.robot.reset(),
            Err(RobotError::Unsupported(Capability::Reset))
        ));
        assert!(rig.protocol.calls().is_empty());
    }

    #[test]
    fn test_pass_throughs_reach_protocol() {
        let rig = rig(RobotKind::Avr);
        rig.robot.reset().unwrap();
        rig.robot.pair_bluetooth().unwrap();
        rig.robot.calibrate_servo("90", "80").unwrap();
        rig.robot.find_range().unwrap();
        rig.robot.write_raw_command("h").unwrap();
        assert_eq!(rig.protocol.calls(), vec!["reset", "p", "c 90 80", "fr", "h"]);
    }

    #[test]
    fn test_speak_dedups_and_respects_mute() {
        let rig = rig(RobotKind::Avr);
        rig.robot.speak("Moving forward", false);
        rig.robot.speak("Moving forward", false);
        assert_eq!(rig.host.spoken(), vec!["Moving forward"]);

        assert!(!rig.robot.toggle_audio());
        rig.robot.speak("Stopping", false);
        assert_eq!(rig.host.toasts(), vec!["Stopping"]);
        rig.robot.speak("Stopping", true);
        assert_eq!(rig.host.spoken(), vec!["Moving forward", "Stopping"]);
    }

    #[test]
    fn test_set_volume_bounds() {
        let rig = rig(RobotKind::Avr);
        assert_eq!(rig.robot.set_volume("7").unwrap(), 7);
        assert_eq!(*rig.host.volume.lock(), 7);
        let err = rig.robot.set_volume("16").unwrap_err();
        assert_eq!(err.to_string(), "New volume must be an integer between 0 and 15");
        assert!(matches!(
            rig.robot.set_volume("loud"),
            Err(RobotError::InvalidVolume { max: 15 })
        ));
    }

    #[test]
    fn test_heading_delta_wraps() {
        assert_eq!(heading_delta(90.0, 80.0), 10.0);
        assert_eq!(heading_delta(10.0, 350.0), 20.0);
        assert_eq!(heading_delta(350.0, 10.0), -20.0);
        assert_eq!(correction_speed(180.0), 50);
        assert_eq!(correction_speed(0.0), 15);
    }

    #[test]
    fn test_turn_to_heading_corrects_then_settles() {
        let rig = rig(RobotKind::Avr);
        {
            let mut orientations = rig.host.orientations.lock();
            orientations.push_back(facing(0.0));
            orientations.push_back(facing(88.0));
        }
        let outcome = rig.robot.turn_to_heading(90.0).unwrap();
        assert!(matches!(outcome, HeadingOutcome::Reached { facing } if (facing - 88.0).abs() < 1e-6));
        // 90 degrees off: 90/180*40+15 = 35, turning right
        assert_eq!(
            rig.protocol.wheel_writes(),
            vec![(0, 0), (35, -35), (0, 0), (0, 0)]
        );
    }

    #[test]
    fn test_turn_to_heading_without_compass_fails() {
        let rig = rig(RobotKind::Avr);
        assert!(matches!(
            rig.robot.turn_to_heading(90.0),
            Err(RobotError::Host(_))
        ));
    }

    #[test]
    fn test_telemetry_wakes_evasion() {
        let rig = rig(RobotKind::Evasion);
        let evasion = rig.robot.evasion().unwrap();
        assert!(!evasion.is_active());
        rig.robot.on_telemetry(&Telemetry {
            key: "us".to_string(),
            value: "90 90 90 90".to_string(),
        });
        assert!(evasion.is_active());
        assert_eq!(rig.robot.latest_range().as_deref(), Some("90 90 90 90"));
        rig.robot.shutdown();
        assert!(!evasion.is_active());
        assert!(!rig.robot.is_running());
    }

    #[test]
    fn test_evasion_robot_capabilities() {
        let rig = rig(RobotKind::Evasion);
        assert!(rig.robot.has(Capability::ToggleDamping));
        assert!(!rig.robot.has(Capability::ChangeSpeed));
        assert!(!rig.robot.has(Capability::WriteRawCommand));
        assert!(rig.robot.toggle_damping().is_ok());
    }
}
