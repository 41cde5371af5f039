// Speech recognition uplink
//
// Each transcript from the host's recognizer is one operator command.
// Listening is bounded by the uplink poll so `close` takes effect.

use std::sync::Arc;

use tracing::{info, warn};

use super::{CallbackSlot, CommandCallback, Result, ShutdownSignal, Uplink};
use crate::config::{UPLINK_POLL, VOICE_RETRY_DELAY};
use crate::host::HostServices;

pub struct VoiceUplink {
    host: Arc<dyn HostServices>,
    callback: CallbackSlot,
    shutdown: ShutdownSignal,
}

impl VoiceUplink {
    pub fn new(host: Arc<dyn HostServices>) -> Self {
        Self {
            host,
            callback: CallbackSlot::default(),
            shutdown: ShutdownSignal::new(),
        }
    }
}

impl Uplink for VoiceUplink {
    fn name(&self) -> &'static str {
        "voice"
    }

    fn set_command_parser(&self, callback: CommandCallback) {
        self.callback.set(callback);
    }

    fn write(&self, text: &str) -> Result<()> {
        self.host.toast(text);
        Ok(())
    }

    fn close(&self) {
        self.shutdown.trigger();
    }

    fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    fn run(&self) -> Result<()> {
        info!("Robot is now ready to take commands.");
        while !self.shutdown.is_triggered() {
            match self.host.listen(UPLINK_POLL) {
                Ok(None) => {}
                Ok(Some(transcript)) => {
                    let transcript = transcript.trim();
                    info!("Voice commands: {}", transcript);
                    if !transcript.is_empty() {
                        self.callback.deliver(transcript);
                    }
                }
                Err(e) => {
                    warn!("Speech recognition failed: {}", e);
                    self.shutdown.wait_timeout(VOICE_RETRY_DELAY);
                }
            }
        }
        Ok(())
    }
}
