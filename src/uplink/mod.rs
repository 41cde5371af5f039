// Operator-facing channels
//
// Provides:
// - The uplink contract shared by every transport
// - Telnet line server and client, and the in-process self-remote pair
// - Zenoh chat session with presence
// - Polling HTTP relay
// - Speech recognition loop

pub mod chat;
pub mod relay;
pub mod telnet;
pub mod voice;

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;

use crate::config::{ConfigError, InputMethod, Mode, Settings};
use crate::host::{HostError, HostServices};

pub use chat::ChatUplink;
pub use relay::RelayUplink;
pub use telnet::{SelfUplink, TelnetUplink};
pub use voice::VoiceUplink;

#[derive(Debug, thiserror::Error)]
pub enum UplinkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Zenoh error: {0}")]
    Zenoh(String),

    #[error("Relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Relay returned malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0} uplink cannot send commands")]
    Unsupported(&'static str),

    #[error("No operator connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, UplinkError>;

/// Receives each operator message, in arrival order
pub type CommandCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub trait Uplink: Send + Sync {
    fn name(&self) -> &'static str;

    fn set_command_parser(&self, callback: CommandCallback);

    /// Text back to the operator
    fn write(&self, text: &str) -> Result<()>;

    /// Remote-control side: forward a command toward the robot
    fn send_command(&self, _text: &str) -> Result<()> {
        Err(UplinkError::Unsupported(self.name()))
    }

    /// Whether the far end can answer on this channel. A relay only
    /// queues commands; its receive loop would drain the robot's queue.
    fn has_replies(&self) -> bool {
        true
    }

    /// Unblock `run` and release the transport
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Receive loop; returns once closed
    fn run(&self) -> Result<()>;
}

/// Registered callback, invoked outside the slot lock
#[derive(Default)]
pub struct CallbackSlot {
    callback: Mutex<Option<CommandCallback>>,
}

impl CallbackSlot {
    pub fn set(&self, callback: CommandCallback) {
        *self.callback.lock() = Some(callback);
    }

    /// Hand `text` to the callback; `false` when none is registered
    pub fn deliver(&self, text: &str) -> bool {
        let callback = self.callback.lock().clone();
        match callback {
            Some(callback) => {
                callback(text);
                true
            }
            None => false,
        }
    }
}

/// One-shot close flag observable from threads and async tasks
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Sleep up to `timeout`, waking early on trigger. Returns the flag.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let slice = Duration::from_millis(10);
        while !self.is_triggered() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(slice));
        }
        self.is_triggered()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the operator channel of a robot session
pub fn uplink_factory(settings: &Settings, host: Arc<dyn HostServices>) -> Result<Arc<dyn Uplink>> {
    let method = settings.input_method()?;
    info!("Initiating input by {}", method);
    let uplink: Arc<dyn Uplink> = match method {
        InputMethod::Telnet => Arc::new(TelnetUplink::listen(settings.telnet.port)?),
        InputMethod::Chat => Arc::new(ChatUplink::robot(&settings.chat.robot_name)?),
        InputMethod::Relay => Arc::new(RelayUplink::new(&settings.relay.url)?),
        InputMethod::Voice => Arc::new(VoiceUplink::new(host)),
    };
    Ok(uplink)
}

/// Build the command channel of a remote-control session
pub fn remote_uplink_factory(settings: &Settings) -> Result<Arc<dyn Uplink>> {
    let method = settings.input_method()?;
    info!("Remote control over {}", method);
    let uplink: Arc<dyn Uplink> = match method {
        InputMethod::Telnet => Arc::new(TelnetUplink::connect(
            &settings.telnet.robot_host,
            settings.telnet.port,
        )?),
        InputMethod::Chat => Arc::new(ChatUplink::operator(
            &settings.chat.robot_name,
            &settings.chat.operator_name,
        )?),
        InputMethod::Relay => Arc::new(RelayUplink::new(&settings.relay.url)?),
        InputMethod::Voice => {
            return Err(ConfigError::Invalid {
                key: "input_method",
                reason: "voice cannot drive a remote robot".to_string(),
            }
            .into());
        }
    };
    Ok(uplink)
}

/// Uplink for the configured mode, robot side
pub fn session_uplink(
    settings: &Settings,
    mode: Mode,
    host: Arc<dyn HostServices>,
) -> Result<Arc<dyn Uplink>> {
    match mode {
        Mode::SelfRemote => Ok(Arc::new(SelfUplink::new()?)),
        Mode::Robot => uplink_factory(settings, host),
        Mode::Remote => remote_uplink_factory(settings),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Uplink double recording writes and sent commands
    #[derive(Default)]
    pub struct RecordingUplink {
        pub written: Mutex<Vec<String>>,
        pub sent: Mutex<Vec<String>>,
        pub callback: CallbackSlot,
        pub shutdown: ShutdownSignal,
    }

    impl RecordingUplink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn written(&self) -> Vec<String> {
            self.written.lock().clone()
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }

        pub fn inject(&self, text: &str) -> bool {
            self.callback.deliver(text)
        }
    }

    impl Uplink for RecordingUplink {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn set_command_parser(&self, callback: CommandCallback) {
            self.callback.set(callback);
        }

        fn write(&self, text: &str) -> Result<()> {
            self.written.lock().push(text.to_string());
            Ok(())
        }

        fn send_command(&self, text: &str) -> Result<()> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        fn close(&self) {
            self.shutdown.trigger();
        }

        fn is_closed(&self) -> bool {
            self.shutdown.is_triggered()
        }

        fn run(&self) -> Result<()> {
            while !self.shutdown.wait_timeout(Duration::from_millis(10)) {}
            Ok(())
        }
    }
}
