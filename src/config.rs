// Timeouts, limits, defaults and the settings file
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

// Sensor stream history kept per key
pub const MAX_SENSOR_STREAM_LENGTH: usize = 50;

// Wheel speeds are clamped to [-WHEEL_SPEED_LIMIT, WHEEL_SPEED_LIMIT]
pub const WHEEL_SPEED_LIMIT: i16 = 100;

// Operator speed setting is a single digit
pub const MAX_SPEED_SETTING: u8 = 9;

// Obstacle evasion loop
pub const EVASION_PERIOD: Duration = Duration::from_millis(100);
pub const OBSTACLE_THRESHOLD: f64 = 60.0;
pub const EVASION_EXPONENT: f64 = 2.0;
pub const EVASION_LINEAR_FACTOR: f64 = 1.5;
pub const RANGING_SENSOR_KEY: &str = "us";

// Wire link
pub const DEFAULT_SERIAL_PORT: &str = "/dev/rfcomm0";
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const SENSOR_DATA_TIMEOUT: Duration = Duration::from_secs(2);
pub const TELEMETRY_POLL: Duration = Duration::from_millis(50);
pub const TELEMETRY_IDLE: Duration = Duration::from_millis(10);

// Operator command dispatch
pub const MAX_REPARSE_DEPTH: usize = 4;
pub const HELP_LINES_PER_MESSAGE: usize = 50;

// Uplinks
pub const DEFAULT_TELNET_PORT: u16 = 8023;
pub const UPLINK_POLL: Duration = Duration::from_millis(50);
pub const RELAY_POLL_INTERVAL: Duration = Duration::from_millis(300);
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(60);
pub const VOICE_RETRY_DELAY: Duration = Duration::from_secs(1);

// Remote control
pub const REMOTE_SEND_PERIOD: Duration = Duration::from_millis(250);
pub const REMOTE_DEDUP_WINDOW: Duration = Duration::from_secs(1);
pub const TOAST_DEDUP_WINDOW: Duration = Duration::from_secs(5);

// Compass orientation
pub const HEADING_DEADLINE: Duration = Duration::from_secs(60);
pub const HEADING_SETTLE: Duration = Duration::from_secs(2);
pub const HEADING_PAUSE: Duration = Duration::from_millis(500);

/// Errors while loading or interpreting the settings file.
///
/// These are the only errors allowed to end a session.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown mode: '{0}'")]
    UnknownMode(String),

    #[error("Uplink type unrecognized: '{0}'")]
    UnknownInputMethod(String),

    #[error("Unknown downlink: '{0}'")]
    UnknownOutputMethod(String),

    #[error("No robot implementation for microcontroller '{0}'")]
    UnknownMicrocontroller(String),

    #[error("Unknown sensor direction: '{0}'")]
    UnknownDirection(String),

    #[error("Unknown remote input: '{0}'")]
    UnknownRemoteInput(String),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Which side of the link this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Robot,
    Remote,
    SelfRemote,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "robot" => Ok(Mode::Robot),
            "remote" => Ok(Mode::Remote),
            "self" | "self-remote" | "commandbyself" => Ok(Mode::SelfRemote),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

/// Operator-facing transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMethod {
    Telnet,
    Chat,
    Relay,
    Voice,
}

impl FromStr for InputMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telnet" | "commandbytelnet" => Ok(InputMethod::Telnet),
            "chat" | "zenoh" | "xmpp" | "commandbyxmpp" => Ok(InputMethod::Chat),
            "relay" | "json" | "commandbyjson" => Ok(InputMethod::Relay),
            "voice" | "commandbyvoice" => Ok(InputMethod::Voice),
            _ => Err(ConfigError::UnknownInputMethod(s.to_string())),
        }
    }
}

impl fmt::Display for InputMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputMethod::Telnet => "telnet",
            InputMethod::Chat => "chat",
            InputMethod::Relay => "relay",
            InputMethod::Voice => "voice",
        };
        f.write_str(name)
    }
}

/// Robot-facing wire framing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMethod {
    SerialAscii,
    SerialBinary,
}

impl FromStr for OutputMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ascii" | "serial-ascii" | "outputserial" | "outputbluetooth"
            | "outputbluetoothascii" => Ok(OutputMethod::SerialAscii),
            "binary" | "serial-binary" | "outputbluetoothbinary" => Ok(OutputMethod::SerialBinary),
            _ => Err(ConfigError::UnknownOutputMethod(s.to_string())),
        }
    }
}

/// Source of drive input in remote-control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteInput {
    Tilt,
    Keyboard,
}

impl FromStr for RemoteInput {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tilt" | "accelerometer" => Ok(RemoteInput::Tilt),
            "keyboard" | "keys" => Ok(RemoteInput::Keyboard),
            _ => Err(ConfigError::UnknownRemoteInput(s.to_string())),
        }
    }
}

/// Flat settings read from `cellbot.toml`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: String,
    pub input_method: String,
    pub output_method: String,
    pub microcontroller: String,
    pub audio_on: bool,
    pub current_speed: u8,
    pub cardinal_margin: f64,
    pub media_dir: PathBuf,
    pub serial: SerialSettings,
    pub telnet: TelnetSettings,
    pub chat: ChatSettings,
    pub relay: RelaySettings,
    pub remote: RemoteSettings,
    pub evasion: EvasionSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baudrate: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelnetSettings {
    pub port: u16,
    pub robot_host: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub robot_name: String,
    pub operator_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub input: String,
    pub speed_scale_factor: f64,
    pub direction_scale_factor: f64,
    pub send_quit: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvasionSettings {
    pub threshold: f64,
    pub exponent: f64,
    pub linear_factor: f64,
    pub period_ms: u64,
    pub sensor_key: String,
    pub layout: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: "robot".to_string(),
            input_method: "telnet".to_string(),
            output_method: "serial-ascii".to_string(),
            microcontroller: "arduino".to_string(),
            audio_on: true,
            current_speed: 5,
            cardinal_margin: 10.0,
            media_dir: PathBuf::from("."),
            serial: SerialSettings::default(),
            telnet: TelnetSettings::default(),
            chat: ChatSettings::default(),
            relay: RelaySettings::default(),
            remote: RemoteSettings::default(),
            evasion: EvasionSettings::default(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERIAL_PORT.to_string(),
            baudrate: DEFAULT_BAUDRATE,
        }
    }
}

impl Default for TelnetSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_TELNET_PORT,
            robot_host: "127.0.0.1".to_string(),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            robot_name: "cellbot".to_string(),
            operator_name: "operator".to_string(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/relay".to_string(),
        }
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            input: "keyboard".to_string(),
            speed_scale_factor: 1.0,
            direction_scale_factor: 1.0,
            send_quit: true,
        }
    }
}

impl Default for EvasionSettings {
    fn default() -> Self {
        Self {
            threshold: OBSTACLE_THRESHOLD,
            exponent: EVASION_EXPONENT,
            linear_factor: EVASION_LINEAR_FACTOR,
            period_ms: EVASION_PERIOD.as_millis() as u64,
            sensor_key: RANGING_SENSOR_KEY.to_string(),
            layout: ["front-left", "front", "front-right", "rear"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Settings {
    /// Read and validate a settings file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.current_speed > MAX_SPEED_SETTING {
            return Err(ConfigError::Invalid {
                key: "current_speed",
                reason: format!("must be between 0 and {}", MAX_SPEED_SETTING),
            });
        }
        if self.evasion.threshold <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "evasion.threshold",
                reason: "must be positive".to_string(),
            });
        }
        if self.evasion.linear_factor <= 0.0 || self.evasion.exponent <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "evasion",
                reason: "linear_factor and exponent must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Mode, with the self-remote input method forcing self-remote mode
    pub fn mode(&self) -> Result<Mode, ConfigError> {
        if self.input_method.trim().eq_ignore_ascii_case("commandbyself")
            || self.input_method.trim().eq_ignore_ascii_case("self")
        {
            return Ok(Mode::SelfRemote);
        }
        self.mode.parse()
    }

    pub fn input_method(&self) -> Result<InputMethod, ConfigError> {
        self.input_method.parse()
    }

    pub fn output_method(&self) -> Result<OutputMethod, ConfigError> {
        self.output_method.parse()
    }

    pub fn remote_input(&self) -> Result<RemoteInput, ConfigError> {
        self.remote.input.parse()
    }

    pub fn evasion_period(&self) -> Duration {
        Duration::from_millis(self.evasion.period_ms.max(1))
    }
}
