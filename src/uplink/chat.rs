// Zenoh chat uplink
//
// Key layout:
//   cellbot/<robot>/alive               robot presence (liveliness token)
//   cellbot/<robot>/cmd/<operator>      operator -> robot
//   cellbot/<robot>/reply/<operator>    robot -> operator
//
// The robot answers whoever sent the last command.

use std::fmt::Display;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use zenoh::Wait;
use zenoh::handlers::FifoChannelHandler;
use zenoh::liveliness::LivelinessToken;
use zenoh::pubsub::Subscriber;
use zenoh::sample::Sample;

use super::{CallbackSlot, CommandCallback, Result, ShutdownSignal, Uplink, UplinkError};
use crate::config::UPLINK_POLL;

pub fn presence_key(robot: &str) -> String {
    format!("cellbot/{}/alive", robot)
}

pub fn command_key(robot: &str, operator: &str) -> String {
    format!("cellbot/{}/cmd/{}", robot, operator)
}

pub fn reply_key(robot: &str, operator: &str) -> String {
    format!("cellbot/{}/reply/{}", robot, operator)
}

/// Operator identity: last segment of a command key
pub fn operator_from_key(key: &str) -> Option<&str> {
    key.rsplit('/').next().filter(|segment| !segment.is_empty())
}

fn zenoh_err(e: impl Display) -> UplinkError {
    UplinkError::Zenoh(e.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Role {
    Robot,
    Operator(String),
}

pub struct ChatUplink {
    role: Role,
    robot: String,
    session: zenoh::Session,
    subscriber: Mutex<Option<Subscriber<FifoChannelHandler<Sample>>>>,
    token: Mutex<Option<LivelinessToken>>,
    // Operator who sent the latest command
    peer: Mutex<Option<String>>,
    callback: CallbackSlot,
    shutdown: ShutdownSignal,
}

impl ChatUplink {
    /// Robot side: announce presence and take commands from any operator
    pub fn robot(robot: &str) -> Result<Self> {
        Self::open(robot, Role::Robot)
    }

    /// Operator side: send commands to `robot`, receive its replies
    pub fn operator(robot: &str, operator: &str) -> Result<Self> {
        Self::open(robot, Role::Operator(operator.to_string()))
    }

    fn open(robot: &str, role: Role) -> Result<Self> {
        info!("Opening Zenoh session...");
        let session = zenoh::open(zenoh::Config::default())
            .wait()
            .map_err(zenoh_err)?;

        let (token_key, listen_key) = match &role {
            Role::Robot => (presence_key(robot), format!("cellbot/{}/cmd/*", robot)),
            Role::Operator(operator) => (
                format!("cellbot/{}/operators/{}", robot, operator),
                reply_key(robot, operator),
            ),
        };

        let token = session
            .liveliness()
            .declare_token(token_key.as_str())
            .wait()
            .map_err(zenoh_err)?;
        let subscriber = session
            .declare_subscriber(listen_key.as_str())
            .wait()
            .map_err(zenoh_err)?;
        info!("Subscribed to: {}", listen_key);

        Ok(Self {
            role,
            robot: robot.to_string(),
            session,
            subscriber: Mutex::new(Some(subscriber)),
            token: Mutex::new(Some(token)),
            peer: Mutex::new(None),
            callback: CallbackSlot::default(),
            shutdown: ShutdownSignal::new(),
        })
    }

    fn put(&self, key: &str, text: &str) -> Result<()> {
        debug!("Publishing to {}: {:?}", key, text);
        self.session
            .put(key, text.to_string())
            .wait()
            .map_err(zenoh_err)
    }

    fn on_sample(&self, sample: Sample) {
        let text = String::from_utf8_lossy(&sample.payload().to_bytes())
            .trim()
            .to_string();
        if self.role == Role::Robot {
            if let Some(operator) = operator_from_key(sample.key_expr().as_str()) {
                *self.peer.lock() = Some(operator.to_string());
            }
        }
        if !text.is_empty() {
            self.callback.deliver(&text);
        }
    }
}

impl Uplink for ChatUplink {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn set_command_parser(&self, callback: CommandCallback) {
        self.callback.set(callback);
    }

    fn write(&self, text: &str) -> Result<()> {
        match &self.role {
            Role::Robot => {
                let peer = self.peer.lock().clone().ok_or(UplinkError::NotConnected)?;
                self.put(&reply_key(&self.robot, &peer), text)
            }
            Role::Operator(operator) => self.put(&command_key(&self.robot, operator), text),
        }
    }

    fn send_command(&self, text: &str) -> Result<()> {
        match &self.role {
            Role::Robot => Err(UplinkError::Unsupported("chat robot")),
            Role::Operator(operator) => self.put(&command_key(&self.robot, operator), text),
        }
    }

    fn close(&self) {
        self.shutdown.trigger();
        self.subscriber.lock().take();
        self.token.lock().take();
        if let Err(e) = self.session.close().wait() {
            warn!("Zenoh session did not close cleanly: {}", e);
        }
    }

    fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    fn run(&self) -> Result<()> {
        info!("Robot is now ready to take commands.");
        while !self.shutdown.is_triggered() {
            let next = match self.subscriber.lock().as_ref() {
                Some(subscriber) => subscriber.try_recv(),
                None => break,
            };
            match next {
                Ok(Some(sample)) => self.on_sample(sample),
                Ok(None) => {
                    self.shutdown.wait_timeout(UPLINK_POLL);
                }
                Err(e) => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    return Err(zenoh_err(e));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(presence_key("rover"), "cellbot/rover/alive");
        assert_eq!(command_key("rover", "ana"), "cellbot/rover/cmd/ana");
        assert_eq!(reply_key("rover", "ana"), "cellbot/rover/reply/ana");
    }

    #[test]
    fn test_operator_is_last_segment() {
        assert_eq!(operator_from_key("cellbot/rover/cmd/ana"), Some("ana"));
        assert_eq!(operator_from_key("cellbot/rover/cmd/"), None);
        assert_eq!(operator_from_key("solo"), Some("solo"));
    }
}
