// Robot-facing call contract
//
// One implementation per wire framing. Callers never branch on framing:
// they hold a `SharedProtocol` and check the declared capabilities.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::capability::{Capability, CapabilitySet};
use crate::config::{ConfigError, OutputMethod, SENSOR_DATA_TIMEOUT, Settings};
use crate::downlink::binary::CommandId;
use crate::downlink::{
    AsciiDownlink, BinaryDownlink, BinaryFrame, Downlink, DownlinkError, SerialTransport,
    Transport,
};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Downlink(#[from] DownlinkError),

    #[error("Protocol does not support {0}")]
    Unsupported(Capability),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// One key/value pair reported by the microcontroller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telemetry {
    pub key: String,
    pub value: String,
}

pub trait RobotProtocol: Send {
    fn name(&self) -> &'static str;

    /// Operations this framing can carry
    fn capabilities(&self) -> CapabilitySet;

    fn set_wheel_speeds(&mut self, left: i16, right: i16) -> Result<()>;

    fn reset(&mut self) -> Result<()> {
        Err(ProtocolError::Unsupported(Capability::Reset))
    }

    fn pair_bluetooth(&mut self) -> Result<()> {
        Err(ProtocolError::Unsupported(Capability::PairBluetooth))
    }

    fn calibrate_servo(&mut self, _x: &str, _y: &str) -> Result<()> {
        Err(ProtocolError::Unsupported(Capability::CalibrateServo))
    }

    fn write_raw_command(&mut self, _command: &str) -> Result<()> {
        Err(ProtocolError::Unsupported(Capability::WriteRawCommand))
    }

    fn find_range(&mut self) -> Result<()> {
        Err(ProtocolError::Unsupported(Capability::FindRange))
    }

    /// Ask for a sensor report and wait for one reply
    fn get_sensor_data(&mut self) -> Result<Option<Telemetry>> {
        Err(ProtocolError::Unsupported(Capability::ReadSensors))
    }

    /// Next unsolicited telemetry value, if one arrives within `timeout`
    fn poll_telemetry(&mut self, timeout: Duration) -> Option<Telemetry>;

    fn flush_input(&mut self) -> Result<()>;
}

pub type SharedProtocol = Arc<Mutex<Box<dyn RobotProtocol>>>;

pub fn shared(protocol: Box<dyn RobotProtocol>) -> SharedProtocol {
    Arc::new(Mutex::new(protocol))
}

/// ASCII command vocabulary of the AVR firmware
pub struct AsciiRobotProtocol {
    link: AsciiDownlink,
}

impl AsciiRobotProtocol {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            link: AsciiDownlink::new(transport),
        }
    }

    fn send(&mut self, command: &str) -> Result<()> {
        self.link.write_command(command)?;
        Ok(())
    }
}

impl RobotProtocol for AsciiRobotProtocol {
    fn name(&self) -> &'static str {
        "serial-ascii"
    }

    fn capabilities(&self) -> CapabilitySet {
        [
            Capability::SetWheelSpeeds,
            Capability::Reset,
            Capability::PairBluetooth,
            Capability::CalibrateServo,
            Capability::WriteRawCommand,
            Capability::FindRange,
            Capability::ReadSensors,
        ]
        .into_iter()
        .collect()
    }

    fn set_wheel_speeds(&mut self, left: i16, right: i16) -> Result<()> {
        self.send(&format!("w {} {}", left, right))
    }

    fn reset(&mut self) -> Result<()> {
        self.send("reset")
    }

    fn pair_bluetooth(&mut self) -> Result<()> {
        self.send("p")
    }

    fn calibrate_servo(&mut self, x: &str, y: &str) -> Result<()> {
        self.send(&format!("c {} {}", x, y))
    }

    fn write_raw_command(&mut self, command: &str) -> Result<()> {
        self.send(command)
    }

    fn find_range(&mut self) -> Result<()> {
        self.send("fr")
    }

    fn get_sensor_data(&mut self) -> Result<Option<Telemetry>> {
        self.send("d")?;
        Ok(self.poll_telemetry(SENSOR_DATA_TIMEOUT))
    }

    fn poll_telemetry(&mut self, timeout: Duration) -> Option<Telemetry> {
        self.link.read_reply(timeout).map(|reply| Telemetry {
            key: reply.key,
            value: reply.value,
        })
    }

    fn flush_input(&mut self) -> Result<()> {
        self.link.flush_input()?;
        Ok(())
    }
}

/// Binary framing: one SET_MOTOR_SPEED frame per wheel
pub struct BinaryRobotProtocol {
    link: BinaryDownlink,
}

pub const MOTOR_LEFT: i16 = 1;
pub const MOTOR_RIGHT: i16 = 2;

impl BinaryRobotProtocol {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            link: BinaryDownlink::new(transport),
        }
    }
}

impl RobotProtocol for BinaryRobotProtocol {
    fn name(&self) -> &'static str {
        "serial-binary"
    }

    fn capabilities(&self) -> CapabilitySet {
        [Capability::SetWheelSpeeds].into_iter().collect()
    }

    fn set_wheel_speeds(&mut self, left: i16, right: i16) -> Result<()> {
        let id = CommandId::SetMotorSpeed as u16;
        self.link
            .write_command(&BinaryFrame::new(id, vec![MOTOR_LEFT, left, 0]))?;
        self.link
            .write_command(&BinaryFrame::new(id, vec![MOTOR_RIGHT, right, 0]))?;
        Ok(())
    }

    fn poll_telemetry(&mut self, timeout: Duration) -> Option<Telemetry> {
        let reply = self.link.read_reply(timeout)?;
        let value = reply
            .args
            .iter()
            .map(i16::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        let key = if reply.command_id == CommandId::SensorReport as u16 {
            crate::config::RANGING_SENSOR_KEY.to_string()
        } else {
            debug!("Unrecognized binary reply 0x{:04X}", reply.command_id);
            format!("cmd:{}", reply.command_id)
        };
        Some(Telemetry { key, value })
    }

    fn flush_input(&mut self) -> Result<()> {
        self.link.flush_input()?;
        Ok(())
    }
}

/// Open the serial port and wrap it in the configured framing
pub fn protocol_factory(
    settings: &Settings,
) -> std::result::Result<Box<dyn RobotProtocol>, ProtocolFactoryError> {
    let method = settings.output_method()?;
    let transport = SerialTransport::open(&settings.serial.port, settings.serial.baudrate)?;
    let protocol = protocol_for(method, Box::new(transport));
    info!("Robot protocol: {}", protocol.name());
    Ok(protocol)
}

pub fn protocol_for(method: OutputMethod, transport: Box<dyn Transport>) -> Box<dyn RobotProtocol> {
    match method {
        OutputMethod::SerialAscii => Box::new(AsciiRobotProtocol::new(transport)),
        OutputMethod::SerialBinary => Box::new(BinaryRobotProtocol::new(transport)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolFactoryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Downlink(#[from] DownlinkError),
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::downlink::testing::MemoryTransport;

    #[test]
    fn test_ascii_vocabulary() {
        let transport = MemoryTransport::new();
        let mut protocol = AsciiRobotProtocol::new(Box::new(transport.clone()));
        protocol.set_wheel_speeds(40, -40).unwrap();
        protocol.reset().unwrap();
        protocol.pair_bluetooth().unwrap();
        protocol.calibrate_servo("90", "85").unwrap();
        protocol.find_range().unwrap();
        protocol.write_raw_command("h 1").unwrap();
        assert_eq!(
            transport.written_text(),
            vec!["w 40 -40\n", "reset\n", "p\n", "c 90 85\n", "fr\n", "h 1\n"]
        );
    }

    #[test]
    fn test_ascii_get_sensor_data() {
        let transport = MemoryTransport::new();
        let mut protocol = AsciiRobotProtocol::new(Box::new(transport.clone()));
        transport.feed(b"us:20 80 80 90\n");
        let reading = protocol.get_sensor_data().unwrap().unwrap();
        assert_eq!(transport.written_text(), vec!["d\n"]);
        assert_eq!(reading.key, "us");
        assert_eq!(reading.value, "20 80 80 90");
    }

    #[test]
    fn test_binary_wheel_frames() {
        let transport = MemoryTransport::new();
        let mut protocol = BinaryRobotProtocol::new(Box::new(transport.clone()));
        protocol.set_wheel_speeds(50, -20).unwrap();
        let writes = transport.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes[0],
            BinaryFrame::new(0x02, vec![1, 50, 0]).encode().unwrap()
        );
        assert_eq!(
            writes[1],
            BinaryFrame::new(0x02, vec![2, -20, 0]).encode().unwrap()
        );
    }

    #[test]
    fn test_binary_declares_only_wheel_speeds() {
        let protocol = BinaryRobotProtocol::new(Box::new(MemoryTransport::new()));
        let caps = protocol.capabilities();
        assert_eq!(caps.len(), 1);
        assert!(caps.contains(Capability::SetWheelSpeeds));

        let mut protocol = protocol;
        assert!(matches!(
            protocol.reset(),
            Err(ProtocolError::Unsupported(Capability::Reset))
        ));
    }

    #[test]
    fn test_binary_sensor_report_maps_to_ranging_key() {
        let transport = MemoryTransport::new();
        let mut protocol = BinaryRobotProtocol::new(Box::new(transport.clone()));
        let frame = BinaryFrame::new(0x10, vec![30, 70, 80, 90]);
        transport.feed(&frame.encode().unwrap());
        let reading = protocol.poll_telemetry(Duration::from_millis(20)).unwrap();
        assert_eq!(reading.key, "us");
        assert_eq!(reading.value, "30 70 80 90");
    }

    #[test]
    fn test_write_failure_surfaces_error() {
        let transport = MemoryTransport::new();
        *transport.fail_writes.lock() = true;
        let mut protocol = AsciiRobotProtocol::new(Box::new(transport));
        assert!(matches!(
            protocol.set_wheel_speeds(1, 1),
            Err(ProtocolError::Downlink(DownlinkError::Io(_)))
        ));
    }
}
