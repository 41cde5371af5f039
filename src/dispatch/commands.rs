// Operator verb table
//
// Many tokens alias one action. The registry is built once per session
// and never changes afterwards.

use std::collections::BTreeMap;

use crate::capability::Capability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    AudioRecording,
    MoveBackward,
    TurnToHeading,
    Date,
    MoveForward,
    ToggleDamping,
    SayHi,
    InfiniteRotation,
    KillTheHumans,
    TurnLeft,
    ToggleMute,
    TakePicture,
    Quit,
    TurnRight,
    Stop,
    Talk,
    VoiceRecognition,
    Location,
    ChangeSpeed,
    Faster,
    Slower,
    Volume,
    SetWheelSpeeds,
    Reparse,
    PassToRobot,
    FindRange,
    Sensors,
    Calibrate,
    Reset,
    Pair,
    Help,
}

impl Action {
    pub fn help(self) -> &'static str {
        match self {
            Action::AudioRecording => "Record audio.",
            Action::MoveBackward => "Move robot backwards.",
            Action::TurnToHeading => "Rotate to desired heading.",
            Action::Date => "Output current time.",
            Action::MoveForward => "Move robot forward.",
            Action::ToggleDamping => "Toggle damping ratio for obstacle avoidance",
            Action::SayHi => "Say hello.",
            Action::InfiniteRotation => "Toggle infinite rotations",
            Action::KillTheHumans => "Kill the humans",
            Action::TurnLeft => "Move robot left.",
            Action::ToggleMute => "Toggle audio output.",
            Action::TakePicture => "Take Picture.",
            Action::Quit => "Quit the runtime",
            Action::TurnRight => "Move robot right",
            Action::Stop => "Stop the robot.",
            Action::Talk => "Speak. ie. 'talk \"hello friend!\"'",
            Action::VoiceRecognition => "Enable voice recognition for speaking commands.",
            Action::Location => "Speak GPS Location.",
            Action::ChangeSpeed => "Change speed. ie. \"speed 4\"",
            Action::Faster => "Speed up the robot.",
            Action::Slower => "Slow down the robot.",
            Action::Volume => "Change volume. ie. \"volume 5\"",
            Action::SetWheelSpeeds => "Set wheel speeds. ie. \"w 5 5\"",
            Action::Reparse => "Reparse string. For internal use only.",
            Action::PassToRobot => "Pass raw command directly to robot.",
            Action::FindRange => "Get ultrasonic values.",
            Action::Sensors => "Request a sensor report. 'sensors all' includes history.",
            Action::Calibrate => "Calibrate Servos",
            Action::Reset => "Reset robot.",
            Action::Pair => "Repair Bluetooth.",
            Action::Help => "List commands.",
        }
    }

    /// Capability the robot must declare before the handler may run
    pub fn required_capability(self) -> Option<Capability> {
        match self {
            Action::AudioRecording => Some(Capability::AudioRecording),
            Action::MoveBackward => Some(Capability::MoveBackward),
            Action::TurnToHeading => Some(Capability::TurnToHeading),
            Action::MoveForward => Some(Capability::MoveForward),
            Action::ToggleDamping => Some(Capability::ToggleDamping),
            Action::TurnLeft => Some(Capability::TurnLeft),
            Action::TakePicture => Some(Capability::CaptureImage),
            Action::TurnRight => Some(Capability::TurnRight),
            Action::Talk => Some(Capability::Speak),
            Action::VoiceRecognition => Some(Capability::RecognizeSpeech),
            Action::Location => Some(Capability::ReadLocation),
            Action::ChangeSpeed | Action::Faster | Action::Slower => Some(Capability::ChangeSpeed),
            Action::Volume => Some(Capability::SetVolume),
            Action::SetWheelSpeeds => Some(Capability::SetWheelSpeeds),
            Action::PassToRobot => Some(Capability::WriteRawCommand),
            Action::FindRange => Some(Capability::FindRange),
            Action::Sensors => Some(Capability::ReadSensors),
            Action::Calibrate => Some(Capability::CalibrateServo),
            Action::Reset => Some(Capability::Reset),
            Action::Pair => Some(Capability::PairBluetooth),
            Action::Date
            | Action::SayHi
            | Action::InfiniteRotation
            | Action::KillTheHumans
            | Action::ToggleMute
            | Action::Quit
            | Action::Stop
            | Action::Reparse
            | Action::Help => None,
        }
    }
}

const ALIASES: &[(Action, &[&str])] = &[
    (Action::AudioRecording, &["audio", "record"]),
    (Action::MoveBackward, &["b", "back", "backward", "backwards"]),
    (
        Action::TurnToHeading,
        &["compass", "heading", "p", "point", "pointe", "face", "facing"],
    ),
    (Action::Date, &["date"]),
    (Action::MoveForward, &["f", "forward", "forwards", "scoot"]),
    (Action::ToggleDamping, &["damping"]),
    (Action::SayHi, &["hi", "h", "hello"]),
    (Action::InfiniteRotation, &["i", "infinite"]),
    (Action::KillTheHumans, &["kill", "rm"]),
    (Action::TurnLeft, &["l", "left", "a"]),
    (Action::ToggleMute, &["m", "mute", "silence"]),
    (Action::TakePicture, &["picture", "takepicture"]),
    (Action::Quit, &["exit", "quit", "q"]),
    (Action::TurnRight, &["r", "right", "d"]),
    (Action::Stop, &["s", "stop"]),
    (Action::Talk, &["t", "talk", "speak", "say"]),
    (Action::VoiceRecognition, &["v", "voice", "listen", "speech"]),
    (Action::Location, &["x", "location", "gps"]),
    (Action::ChangeSpeed, &["speed"]),
    (Action::Faster, &["faster", "hurry", "fast", "quicker"]),
    (Action::Slower, &["slower", "slow", "chill"]),
    (Action::Volume, &["volume"]),
    (Action::SetWheelSpeeds, &["w", "wheel", "ws"]),
    (Action::Reparse, &["move", "go", "turn", "take"]),
    (Action::PassToRobot, &["send", "pass"]),
    (Action::FindRange, &["range", "distance", "dist", "z"]),
    (Action::Sensors, &["sensors", "telemetry"]),
    (Action::Calibrate, &["c", "configuration", "calibrate"]),
    (Action::Reset, &["reset"]),
    (Action::Pair, &["pair", "pairing"]),
    (Action::Help, &["?", "help", "man"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub token: &'static str,
    pub action: Action,
    pub help: &'static str,
}

#[derive(Debug, Clone)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Command>,
}

impl CommandRegistry {
    /// The full operator vocabulary
    pub fn standard() -> Self {
        let mut commands = BTreeMap::new();
        for (action, tokens) in ALIASES {
            for token in *tokens {
                commands.insert(
                    *token,
                    Command {
                        token,
                        action: *action,
                        help: action.help(),
                    },
                );
            }
        }
        Self { commands }
    }

    /// Case-insensitive lookup
    pub fn lookup(&self, token: &str) -> Option<&Command> {
        self.commands.get(token.to_lowercase().as_str())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// "token : help" for every token, sorted by token
    pub fn help_lines(&self) -> Vec<String> {
        self.commands
            .values()
            .map(|command| format!("{} : {}", command.token, command.help))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_share_action() {
        let registry = CommandRegistry::standard();
        for token in ["f", "forward", "FORWARDS", "Scoot"] {
            assert_eq!(registry.lookup(token).unwrap().action, Action::MoveForward);
        }
        assert_eq!(registry.lookup("x").unwrap().action, Action::Location);
        assert_eq!(registry.lookup("p").unwrap().action, Action::TurnToHeading);
        assert!(registry.lookup("fly").is_none());
    }

    #[test]
    fn test_no_token_registered_twice() {
        let total: usize = ALIASES.iter().map(|(_, tokens)| tokens.len()).sum();
        assert_eq!(CommandRegistry::standard().len(), total);
    }

    #[test]
    fn test_help_is_sorted() {
        let lines = CommandRegistry::standard().help_lines();
        assert_eq!(lines[0], "? : List commands.");
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
    }

    #[test]
    fn test_wire_actions_need_capabilities() {
        assert_eq!(
            Action::Calibrate.required_capability(),
            Some(Capability::CalibrateServo)
        );
        assert_eq!(Action::Stop.required_capability(), None);
        assert_eq!(Action::Faster.required_capability(), Some(Capability::ChangeSpeed));
    }
}
