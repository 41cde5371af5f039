// Operator command dispatch
//
// Provides:
// - Tokenizing operator text into a verb and its arguments
// - Capability checks ahead of every robot-forwarding verb
// - Argument validation with operator-facing messages
// - Bounded reparsing for prefix verbs and voice transcripts

pub mod commands;
pub mod lexer;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Local;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::capability::Capability;
use crate::config::{HELP_LINES_PER_MESSAGE, MAX_REPARSE_DEPTH, MAX_SPEED_SETTING, Settings};
use crate::robot::{HeadingOutcome, Robot, RobotError};
use crate::uplink::{Uplink, UplinkError};

pub use commands::{Action, Command, CommandRegistry};
pub use lexer::{Lexer, unquote};

/// What became of one operator message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Executed,
    /// Blank input
    Empty,
    Unknown(String),
    MissingCapability(Capability),
    /// Arguments failed validation; nothing was forwarded
    Rejected(String),
    /// The robot or host reported an error
    Failed(String),
    TooDeep,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notify {
    All,
    UplinkOnly,
    SpeechOnly,
}

pub struct CommandDispatcher {
    registry: CommandRegistry,
    robot: Arc<Robot>,
    uplink: Arc<dyn Uplink>,
    media_dir: PathBuf,
    recording: Mutex<Option<PathBuf>>,
    quit: AtomicBool,
}

impl CommandDispatcher {
    pub fn new(robot: Arc<Robot>, uplink: Arc<dyn Uplink>, settings: &Settings) -> Self {
        Self {
            registry: CommandRegistry::standard(),
            robot,
            uplink,
            media_dir: settings.media_dir.clone(),
            recording: Mutex::new(None),
            quit: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn robot(&self) -> &Arc<Robot> {
        &self.robot
    }

    pub fn has_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    /// Handle one line of operator text
    pub fn parse(&self, text: &str) -> DispatchOutcome {
        self.parse_at(text, 0)
    }

    fn parse_at(&self, text: &str, depth: usize) -> DispatchOutcome {
        if self.has_quit() {
            debug!("Ignoring '{}' after quit", text);
            return DispatchOutcome::Quit;
        }
        if depth > MAX_REPARSE_DEPTH {
            self.notify("Command nesting too deep", Notify::UplinkOnly);
            return DispatchOutcome::TooDeep;
        }
        let mut lexer = Lexer::new(text);
        self.dispatch(&mut lexer, depth)
    }

    /// Run the verb at the head of `lexer`; handlers pull their own arguments
    pub fn dispatch(&self, lexer: &mut Lexer<'_>, depth: usize) -> DispatchOutcome {
        let Some(token) = lexer.next_token() else {
            debug!("Empty command");
            return DispatchOutcome::Empty;
        };

        let Some(command) = self.registry.lookup(token).copied() else {
            self.notify(&format!("Unknown command: '{}'", token), Notify::UplinkOnly);
            self.notify("Unknown command", Notify::SpeechOnly);
            return DispatchOutcome::Unknown(token.to_string());
        };

        if let Some(capability) = command.action.required_capability() {
            if !self.robot.has(capability) {
                self.notify(
                    &format!(
                        "Robot implementation lacks capability: {}. Unable to execute",
                        capability
                    ),
                    Notify::UplinkOnly,
                );
                return DispatchOutcome::MissingCapability(capability);
            }
        }

        debug!("Dispatching {:?} from '{}'", command.action, token);
        match self.handle(command.action, lexer, depth) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{} failed: {}", command.token, e);
                self.notify(&e.to_string(), Notify::UplinkOnly);
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    fn handle(
        &self,
        action: Action,
        lexer: &mut Lexer<'_>,
        depth: usize,
    ) -> Result<DispatchOutcome, RobotError> {
        use DispatchOutcome::Executed;

        match action {
            Action::AudioRecording => self.toggle_audio_recording(),
            Action::MoveBackward => {
                self.notify("Moving backward", Notify::All);
                self.robot.move_backward()?;
                Ok(Executed)
            }
            Action::TurnToHeading => self.turn_to_heading(lexer.next_token().unwrap_or("")),
            Action::Date => {
                let now = Local::now().format("Current time is %-I %M %p on %A, %B %-e, %Y");
                self.notify(&now.to_string(), Notify::All);
                Ok(Executed)
            }
            Action::MoveForward => {
                self.notify("Moving forward", Notify::All);
                self.robot.move_forward()?;
                Ok(Executed)
            }
            Action::ToggleDamping => {
                let enabled = self.robot.toggle_damping()?;
                self.notify(
                    &format!("Toggling damping, now enabled: {}", enabled),
                    Notify::All,
                );
                Ok(Executed)
            }
            Action::SayHi => {
                self.notify("Hello.", Notify::All);
                Ok(Executed)
            }
            Action::InfiniteRotation => {
                self.notify("Toggle infinite rotation not implemented", Notify::All);
                Ok(Executed)
            }
            Action::KillTheHumans => {
                self.notify("Kill the humans!", Notify::All);
                Ok(Executed)
            }
            Action::TurnLeft => {
                self.notify("Moving left", Notify::All);
                self.robot.turn_left()?;
                Ok(Executed)
            }
            Action::ToggleMute => {
                let on = self.robot.toggle_audio();
                info!("Audio output {}", if on { "on" } else { "muted" });
                self.notify("Audio mute toggled", Notify::All);
                Ok(Executed)
            }
            Action::TakePicture => {
                let path = self.media_path("jpg");
                self.notify("Taking picture", Notify::UplinkOnly);
                self.robot.capture_image(&path)?;
                self.notify(
                    &format!("Image file located at '{}'", path.display()),
                    Notify::UplinkOnly,
                );
                Ok(Executed)
            }
            Action::Quit => {
                self.quit_session();
                Ok(DispatchOutcome::Quit)
            }
            Action::TurnRight => {
                self.notify("Moving right", Notify::All);
                self.robot.turn_right()?;
                Ok(Executed)
            }
            Action::Stop => {
                self.notify("Stopping", Notify::All);
                self.robot.stop()?;
                Ok(Executed)
            }
            Action::Talk => {
                let words: Vec<&str> = lexer.by_ref().map(unquote).collect();
                let speech = words.join(" ");
                self.robot.speak(&speech.to_lowercase(), true);
                self.notify(&speech, Notify::UplinkOnly);
                Ok(Executed)
            }
            Action::VoiceRecognition => {
                self.notify("Launching voice recognition", Notify::UplinkOnly);
                let transcript = self.robot.recognize_speech().unwrap_or_else(|e| {
                    warn!("Voice recognition failed: {}", e);
                    String::new()
                });
                self.notify(
                    &format!("Voice commands: {}", transcript),
                    Notify::UplinkOnly,
                );
                Ok(self.parse_at(&transcript, depth + 1))
            }
            Action::Location => {
                let msg = match self.robot.read_location() {
                    Ok(location) => {
                        format!("You are in {}, {}", location.locality, location.admin_area)
                    }
                    Err(e) => {
                        debug!("Location lookup failed: {}", e);
                        "Failed to find location.".to_string()
                    }
                };
                self.notify(&msg, Notify::All);
                Ok(Executed)
            }
            Action::ChangeSpeed => {
                let raw = lexer.next_token().unwrap_or("");
                match parse_speed(raw) {
                    Some(speed) => {
                        self.notify(&format!("Changing speed to {}", speed), Notify::All);
                        self.robot.change_speed(speed)?;
                        Ok(Executed)
                    }
                    None => Ok(self.reject_speed(raw)),
                }
            }
            Action::Faster => self.step_speed(1, "Speeding up."),
            Action::Slower => self.step_speed(-1, "Slowing down."),
            Action::Volume => {
                let raw = lexer.next_token().unwrap_or("");
                match self.robot.set_volume(raw) {
                    Ok(volume) => {
                        self.notify(&format!("Volume set to {}", volume), Notify::UplinkOnly);
                        Ok(Executed)
                    }
                    Err(e @ RobotError::InvalidVolume { .. }) => {
                        self.notify(&e.to_string(), Notify::UplinkOnly);
                        Ok(DispatchOutcome::Rejected(e.to_string()))
                    }
                    Err(e) => Err(e),
                }
            }
            Action::SetWheelSpeeds => {
                let left_raw = lexer.next_token().unwrap_or("");
                let right_raw = lexer.next_token().unwrap_or("");
                let Some(left) = parse_wheel_speed(left_raw) else {
                    return Ok(self.reject_wheel("left", left_raw));
                };
                let Some(right) = parse_wheel_speed(right_raw) else {
                    return Ok(self.reject_wheel("right", right_raw));
                };
                self.notify(
                    &format!("Setting wheel speed, left {}, right {}", left, right),
                    Notify::SpeechOnly,
                );
                self.robot.set_wheel_speeds(left, right)?;
                Ok(Executed)
            }
            Action::Reparse => Ok(self.parse_at(lexer.rest(), depth + 1)),
            Action::PassToRobot => {
                let raw = lexer.remaining().join(" ");
                self.notify(&format!("Passing: {}", raw), Notify::UplinkOnly);
                self.robot.write_raw_command(&raw)?;
                Ok(Executed)
            }
            Action::FindRange => {
                self.notify("Checking distance", Notify::All);
                self.robot.find_range()?;
                let msg = match self.robot.latest_range() {
                    Some(range) => format!("Distance: {}", range),
                    None => "Distance unknown".to_string(),
                };
                self.notify(&msg, Notify::All);
                Ok(Executed)
            }
            Action::Sensors => {
                let include_history = lexer
                    .next_token()
                    .is_some_and(|arg| arg.eq_ignore_ascii_case("all"));
                self.notify("Reading sensors", Notify::UplinkOnly);
                if self.robot.read_sensors()?.is_none() {
                    debug!("No reply to sensor request");
                }
                let report = self.robot.sensors().report(include_history);
                if report.is_empty() {
                    self.notify("No sensor data", Notify::UplinkOnly);
                } else {
                    self.notify(report.trim_end(), Notify::UplinkOnly);
                }
                Ok(Executed)
            }
            Action::Calibrate => {
                let (Some(x), Some(y)) = (lexer.next_token(), lexer.next_token()) else {
                    self.notify("usage: calibrate x y", Notify::UplinkOnly);
                    return Ok(DispatchOutcome::Rejected("usage: calibrate x y".to_string()));
                };
                self.robot.calibrate_servo(x, y)?;
                self.notify(
                    &format!("Calibrating servos to center at {} and {}", x, y),
                    Notify::UplinkOnly,
                );
                Ok(Executed)
            }
            Action::Reset => {
                self.robot.reset()?;
                self.notify("Reset hardware settings to default", Notify::UplinkOnly);
                Ok(Executed)
            }
            Action::Pair => {
                self.notify(
                    "Asking Bluetooth module to go into pairing",
                    Notify::UplinkOnly,
                );
                self.robot.pair_bluetooth()?;
                Ok(Executed)
            }
            Action::Help => {
                self.notify("Listing Commands", Notify::All);
                for chunk in self.registry.help_lines().chunks(HELP_LINES_PER_MESSAGE) {
                    self.notify(&chunk.join("\n"), Notify::UplinkOnly);
                }
                Ok(Executed)
            }
        }
    }

    fn toggle_audio_recording(&self) -> Result<DispatchOutcome, RobotError> {
        let mut recording = self.recording.lock();
        match recording.take() {
            None => {
                let path = self.media_path("3gp");
                self.notify("Starting audio recording", Notify::UplinkOnly);
                self.robot.start_audio_recording(&path)?;
                *recording = Some(path);
            }
            Some(path) => {
                self.notify("Stopping audio recording", Notify::UplinkOnly);
                self.robot.stop_audio_recording()?;
                self.notify(
                    &format!("Audio file located at '{}'", path.display()),
                    Notify::UplinkOnly,
                );
            }
        }
        Ok(DispatchOutcome::Executed)
    }

    fn turn_to_heading(&self, raw: &str) -> Result<DispatchOutcome, RobotError> {
        let Ok(degrees) = raw.parse::<i32>() else {
            let msg = format!("Invalid heading: '{}'", raw);
            self.notify(&msg, Notify::UplinkOnly);
            return Ok(DispatchOutcome::Rejected(msg));
        };
        self.notify(&format!("Orienting {} degrees.", degrees), Notify::All);
        match self.robot.turn_to_heading(degrees.rem_euclid(360) as f64)? {
            HeadingOutcome::Reached { facing } => {
                self.notify(&format!("Facing {:.0} degrees", facing), Notify::UplinkOnly);
            }
            HeadingOutcome::TimedOut => {
                self.notify(
                    &format!("Unable to reach heading {} in time", degrees),
                    Notify::UplinkOnly,
                );
            }
        }
        Ok(DispatchOutcome::Executed)
    }

    fn step_speed(&self, step: i32, message: &str) -> Result<DispatchOutcome, RobotError> {
        let target = self.robot.current_speed() as i32 + step;
        if !(0..=MAX_SPEED_SETTING as i32).contains(&target) {
            return Ok(self.reject_speed(&target.to_string()));
        }
        self.notify(message, Notify::All);
        self.robot.change_speed(target)?;
        Ok(DispatchOutcome::Executed)
    }

    fn reject_speed(&self, raw: &str) -> DispatchOutcome {
        let msg = format!("Invalid speed: '{}'", raw);
        self.notify(&msg, Notify::UplinkOnly);
        self.notify("Invalid speed", Notify::SpeechOnly);
        DispatchOutcome::Rejected(msg)
    }

    fn reject_wheel(&self, side: &str, raw: &str) -> DispatchOutcome {
        let msg = format!("Invalid {} wheel speed: '{}'", side, raw);
        self.notify(&msg, Notify::UplinkOnly);
        self.notify(&format!("Invalid {} wheel speed", side), Notify::SpeechOnly);
        DispatchOutcome::Rejected(msg)
    }

    fn quit_session(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.notify(
            "Exiting program after receiving 'q' command.",
            Notify::UplinkOnly,
        );
        self.uplink.close();
        self.notify("Bye bye!", Notify::SpeechOnly);
        if let Some(path) = self.recording.lock().take() {
            if let Err(e) = self.robot.stop_audio_recording() {
                warn!("Failed to stop recording {}: {}", path.display(), e);
            }
        }
        self.robot.shutdown();
    }

    fn media_path(&self, extension: &str) -> PathBuf {
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        self.media_dir
            .join(format!("cellbot_{}.{}", stamp, extension))
    }

    fn notify(&self, message: &str, target: Notify) {
        if target != Notify::SpeechOnly {
            match self.uplink.write(message) {
                Ok(()) => {}
                Err(UplinkError::NotConnected) => debug!("No operator for: {}", message),
                Err(e) => warn!("Failed to reach operator: {}", e),
            }
        }
        if target != Notify::UplinkOnly {
            self.robot.speak(message, false);
        }
    }
}

/// Speed setting: one digit
fn parse_speed(raw: &str) -> Option<i32> {
    let speed = raw.parse::<u8>().ok().filter(|s| *s <= MAX_SPEED_SETTING)?;
    (raw.len() == 1).then_some(speed as i32)
}

fn parse_wheel_speed(raw: &str) -> Option<i32> {
    raw.parse::<i32>().ok().filter(|s| (-100..=100).contains(s))
}
