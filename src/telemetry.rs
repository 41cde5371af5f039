// Telemetry reader thread
//
// Drains replies from the wire link into the robot's sensor stream. The
// protocol lock is held only for one bounded poll so drive writes interleave.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config::{TELEMETRY_IDLE, TELEMETRY_POLL};
use crate::robot::Robot;
use crate::uplink::ShutdownSignal;

pub struct TelemetryReader {
    shutdown: ShutdownSignal,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryReader {
    pub fn spawn(robot: Arc<Robot>) -> std::io::Result<Self> {
        let shutdown = ShutdownSignal::new();
        let signal = shutdown.clone();
        let handle = thread::Builder::new()
            .name("telemetry".to_string())
            .spawn(move || read_loop(&robot, &signal))?;
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Telemetry reader panicked");
            }
        }
    }
}

impl Drop for TelemetryReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(robot: &Robot, shutdown: &ShutdownSignal) {
    info!("Telemetry reader started");
    while !shutdown.is_triggered() && robot.is_running() {
        let reading = robot.drive().protocol().lock().poll_telemetry(TELEMETRY_POLL);
        match reading {
            Some(telemetry) => {
                debug!("Telemetry {} = {}", telemetry.key, telemetry.value);
                robot.on_telemetry(&telemetry);
            }
            None => {
                shutdown.wait_timeout(TELEMETRY_IDLE);
            }
        }
    }
    info!("Telemetry reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::protocol::Telemetry;
    use crate::protocol::testing::RecordingProtocol;
    use crate::robot::RobotKind;
    use crate::robot::testing::rig_with;
    use crate::config::Settings;

    #[test]
    fn test_replies_reach_sensor_stream() {
        let recorder = RecordingProtocol::new();
        recorder.telemetry.lock().extend([
            Telemetry {
                key: "us".to_string(),
                value: "120 110 100 90".to_string(),
            },
            Telemetry {
                key: "bat".to_string(),
                value: "7.4".to_string(),
            },
        ]);
        let rig = rig_with(RobotKind::Avr, recorder, Settings::default());
        let mut reader = TelemetryReader::spawn(Arc::clone(&rig.robot)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while rig.robot.sensors().latest("bat").is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        reader.stop();

        assert_eq!(rig.robot.latest_range().as_deref(), Some("120 110 100 90"));
        assert_eq!(rig.robot.sensors().latest("bat").as_deref(), Some("7.4"));
        assert!(reader.is_finished());
    }

    #[test]
    fn test_exits_when_robot_shuts_down() {
        let rig = rig_with(RobotKind::Avr, RecordingProtocol::new(), Settings::default());
        let reader = TelemetryReader::spawn(Arc::clone(&rig.robot)).unwrap();
        rig.robot.shutdown();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(reader.is_finished());
    }
}
