// Robot capabilities
//
// Every robot implementation declares the operations it supports. The
// dispatcher checks membership in that declared set before invoking a
// handler, so a missing operation is reported instead of attempted.

use std::collections::BTreeSet;
use std::fmt;

/// Operations a robot implementation may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    MoveForward,
    MoveBackward,
    TurnLeft,
    TurnRight,
    TurnToHeading,
    Stop,
    SetWheelSpeeds,
    ChangeSpeed,
    ToggleDamping,
    Speak,
    RecognizeSpeech,
    CaptureImage,
    ReadLocation,
    AudioRecording,
    SetVolume,
    Reset,
    PairBluetooth,
    CalibrateServo,
    WriteRawCommand,
    FindRange,
    ReadSensors,
}

impl Capability {
    pub const ALL: [Capability; 21] = [
        Capability::MoveForward,
        Capability::MoveBackward,
        Capability::TurnLeft,
        Capability::TurnRight,
        Capability::TurnToHeading,
        Capability::Stop,
        Capability::SetWheelSpeeds,
        Capability::ChangeSpeed,
        Capability::ToggleDamping,
        Capability::Speak,
        Capability::RecognizeSpeech,
        Capability::CaptureImage,
        Capability::ReadLocation,
        Capability::AudioRecording,
        Capability::SetVolume,
        Capability::Reset,
        Capability::PairBluetooth,
        Capability::CalibrateServo,
        Capability::WriteRawCommand,
        Capability::FindRange,
        Capability::ReadSensors,
    ];

    /// The wire-protocol capability this operation ends up using, if any.
    ///
    /// Drive verbs all resolve to wheel-speed writes; host-side operations
    /// (speech, camera, ...) never touch the wire.
    pub fn wire_requirement(self) -> Option<Capability> {
        match self {
            Capability::MoveForward
            | Capability::MoveBackward
            | Capability::TurnLeft
            | Capability::TurnRight
            | Capability::TurnToHeading
            | Capability::ChangeSpeed
            | Capability::ToggleDamping
            | Capability::SetWheelSpeeds => Some(Capability::SetWheelSpeeds),
            Capability::Reset
            | Capability::PairBluetooth
            | Capability::CalibrateServo
            | Capability::WriteRawCommand
            | Capability::FindRange
            | Capability::ReadSensors => Some(self),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Capability::MoveForward => "move_forward",
            Capability::MoveBackward => "move_backward",
            Capability::TurnLeft => "turn_left",
            Capability::TurnRight => "turn_right",
            Capability::TurnToHeading => "turn_to_heading",
            Capability::Stop => "stop",
            Capability::SetWheelSpeeds => "set_wheel_speeds",
            Capability::ChangeSpeed => "change_speed",
            Capability::ToggleDamping => "toggle_damping",
            Capability::Speak => "speak",
            Capability::RecognizeSpeech => "recognize_speech",
            Capability::CaptureImage => "capture_image",
            Capability::ReadLocation => "read_location",
            Capability::AudioRecording => "audio_recording",
            Capability::SetVolume => "set_volume",
            Capability::Reset => "reset",
            Capability::PairBluetooth => "pair_bluetooth",
            Capability::CalibrateServo => "calibrate_servo",
            Capability::WriteRawCommand => "write_raw_command",
            Capability::FindRange => "find_range",
            Capability::ReadSensors => "read_sensors",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared set of capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Keep only the operations whose wire requirement is met by `wire`
    pub fn restricted_to_wire(&self, wire: &CapabilitySet) -> CapabilitySet {
        self.0
            .iter()
            .copied()
            .filter(|cap| cap.wire_requirement().is_none_or(|req| wire.contains(req)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restricted_to_wire_drops_unbacked_operations() {
        let declared: CapabilitySet = [
            Capability::MoveForward,
            Capability::Reset,
            Capability::Speak,
            Capability::SetWheelSpeeds,
        ]
        .into_iter()
        .collect();
        let wire: CapabilitySet = [Capability::SetWheelSpeeds].into_iter().collect();

        let effective = declared.restricted_to_wire(&wire);
        assert!(effective.contains(Capability::MoveForward));
        assert!(effective.contains(Capability::Speak));
        assert!(effective.contains(Capability::SetWheelSpeeds));
        assert!(!effective.contains(Capability::Reset));
    }

    #[test]
    fn test_drive_verbs_require_wheel_speeds() {
        let wire = CapabilitySet::default();
        let declared: CapabilitySet = [Capability::MoveForward, Capability::Stop]
            .into_iter()
            .collect();
        let effective = declared.restricted_to_wire(&wire);
        assert!(!effective.contains(Capability::MoveForward));
        assert!(effective.contains(Capability::Stop));
    }
}
