// Session wiring
//
// Builds the layers from the settings (wire protocol, robot, dispatcher,
// uplink), joins them with callbacks and runs until the operator quits.
// The uplink receive loop owns the calling thread; telemetry and evasion run
// on their own threads.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::config::{Mode, RemoteInput, Settings};
use crate::dispatch::CommandDispatcher;
use crate::host::{ConsoleHost, HostServices};
use crate::protocol::{self, RobotProtocol};
use crate::remote::{RemoteControl, keyboard};
use crate::robot::{Robot, RobotKind};
use crate::sensor_stream::SensorStream;
use crate::telemetry::TelemetryReader;
use crate::uplink::{self, Uplink, UplinkError};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A wired robot session, ready to receive operator commands
pub struct RobotSession {
    robot: Arc<Robot>,
    uplink: Arc<dyn Uplink>,
    dispatcher: Arc<CommandDispatcher>,
    telemetry: TelemetryReader,
}

impl RobotSession {
    pub fn robot(&self) -> &Arc<Robot> {
        &self.robot
    }

    pub fn uplink(&self) -> &Arc<dyn Uplink> {
        &self.uplink
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    /// Receive loop on the calling thread; returns once the uplink closes
    pub fn run(self) -> Result<(), UplinkError> {
        let result = self.uplink.run();
        self.finish();
        result
    }

    /// Run the receive loop on its own thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<Result<(), UplinkError>>> {
        thread::Builder::new()
            .name(format!("uplink-{}", self.uplink.name()))
            .spawn(move || self.run())
    }

    fn finish(mut self) {
        self.robot.shutdown();
        self.telemetry.stop();
        info!("Robot session ended");
    }
}

/// Build the robot layers around `protocol` and register the dispatcher
/// with `uplink`
pub fn start_robot(
    settings: &Settings,
    protocol: Box<dyn RobotProtocol>,
    host: Arc<dyn HostServices>,
    uplink: Arc<dyn Uplink>,
) -> Result<RobotSession, BoxError> {
    let kind: RobotKind = settings.microcontroller.parse()?;
    let robot = Arc::new(Robot::new(
        kind,
        protocol::shared(protocol),
        Arc::new(SensorStream::default()),
        host,
        settings,
    )?);

    let dispatcher = Arc::new(CommandDispatcher::new(
        Arc::clone(&robot),
        Arc::clone(&uplink),
        settings,
    ));
    let parser = Arc::downgrade(&dispatcher);
    uplink.set_command_parser(Arc::new(move |text: &str| {
        if let Some(dispatcher) = parser.upgrade() {
            info!("Operator: {}", text);
            dispatcher.parse(text);
        }
    }));

    let telemetry = TelemetryReader::spawn(Arc::clone(&robot))?;

    info!("Send the letter 'q' or say 'quit' to exit the program.");
    Ok(RobotSession {
        robot,
        uplink,
        dispatcher,
        telemetry,
    })
}

/// Run the session selected by the settings until it ends
pub fn run(settings: Settings) -> Result<(), BoxError> {
    let mode = settings.mode()?;
    info!("Starting in {:?} mode", mode);
    let host: Arc<dyn HostServices> = Arc::new(ConsoleHost::new());

    match mode {
        Mode::Robot => run_robot(&settings, host),
        Mode::Remote => run_remote(&settings, host),
        Mode::SelfRemote => run_self_remote(&settings, host),
    }
}

fn run_robot(settings: &Settings, host: Arc<dyn HostServices>) -> Result<(), BoxError> {
    let uplink = uplink::uplink_factory(settings, Arc::clone(&host))?;
    let protocol = protocol::protocol_factory(settings)?;
    let session = start_robot(settings, protocol, host, uplink)?;
    session.run()?;
    Ok(())
}

fn run_remote(settings: &Settings, host: Arc<dyn HostServices>) -> Result<(), BoxError> {
    let uplink = uplink::remote_uplink_factory(settings)?;
    let remote = RemoteControl::new(Arc::clone(&uplink), host, settings);
    let receiver = spawn_receiver(Arc::clone(&uplink), &remote)?;
    let result = drive_remote(settings, &remote);

    uplink.close();
    if let Some(receiver) = receiver {
        join_receiver(receiver);
    }
    result
}

fn run_self_remote(settings: &Settings, host: Arc<dyn HostServices>) -> Result<(), BoxError> {
    let uplink = uplink::session_uplink(settings, Mode::SelfRemote, Arc::clone(&host))?;
    let protocol = protocol::protocol_factory(settings)?;
    let session = start_robot(settings, protocol, Arc::clone(&host), Arc::clone(&uplink))?;
    let robot_thread = session.spawn()?;

    let remote = RemoteControl::new(Arc::clone(&uplink), host, settings);
    let result = drive_remote(settings, &remote);

    uplink.close();
    match robot_thread.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Robot uplink ended with error: {}", e),
        Err(_) => error!("Robot session thread panicked"),
    }
    result
}

fn drive_remote(settings: &Settings, remote: &RemoteControl) -> Result<(), BoxError> {
    match settings.remote_input()? {
        RemoteInput::Keyboard => keyboard::run_keyboard(remote)?,
        RemoteInput::Tilt => remote.run_tilt(),
    }
    Ok(())
}

/// Replies from the robot; a closed link also stops the remote loop.
/// `None` when the uplink has no reply channel.
fn spawn_receiver(
    uplink: Arc<dyn Uplink>,
    remote: &RemoteControl,
) -> std::io::Result<Option<JoinHandle<Result<(), UplinkError>>>> {
    if !uplink.has_replies() {
        info!("No replies over {}, sending only", uplink.name());
        return Ok(None);
    }
    uplink.set_command_parser(Arc::new(|reply: &str| info!("robot> {}", reply)));
    let stop = remote.shutdown_signal();
    thread::Builder::new()
        .name("remote-replies".to_string())
        .spawn(move || {
            let result = uplink.run();
            stop.trigger();
            result
        })
        .map(Some)
}

fn join_receiver(receiver: JoinHandle<Result<(), UplinkError>>) {
    match receiver.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Remote uplink ended with error: {}", e),
        Err(_) => error!("Remote uplink thread panicked"),
    }
}
