// Fixed-header binary framing
//
// Frame format (big-endian):
// [command_id: u16][tag: u8][arg_count: u8][arg0: i16]...[argN: i16]

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{Downlink, DownlinkError, Result, Transport, read_exact_by};

/// Header length in bytes
pub const HEADER_LEN: usize = 4;

/// Tag written on outgoing frames
pub const DEFAULT_TAG: u8 = 1;

/// Command identifiers understood by the AVR firmware
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandId {
    SetMotorSpeed = 0x02,
    SensorReport = 0x10,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    pub command_id: u16,
    pub tag: u8,
    pub args: Vec<i16>,
}

impl BinaryFrame {
    pub fn new(command_id: u16, args: Vec<i16>) -> Self {
        Self {
            command_id,
            tag: DEFAULT_TAG,
            args,
        }
    }

    /// Pack header and arguments; the count byte always matches `args`
    pub fn encode(&self) -> Result<Vec<u8>> {
        let count = u8::try_from(self.args.len())
            .map_err(|_| DownlinkError::TooManyArgs { count: self.args.len() })?;
        let mut packet = Vec::with_capacity(HEADER_LEN + self.args.len() * 2);
        packet.extend_from_slice(&self.command_id.to_be_bytes());
        packet.push(self.tag);
        packet.push(count);
        for arg in &self.args {
            packet.extend_from_slice(&arg.to_be_bytes());
        }
        Ok(packet)
    }
}

/// Decode the 4-byte header into (command_id, tag, arg_count)
pub fn decode_header(header: [u8; HEADER_LEN]) -> (u16, u8, u8) {
    (u16::from_be_bytes([header[0], header[1]]), header[2], header[3])
}

/// A decoded reply: command id and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryReply {
    pub command_id: u16,
    pub args: Vec<i16>,
}

pub struct BinaryDownlink {
    transport: Box<dyn Transport>,
}

impl BinaryDownlink {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl Downlink for BinaryDownlink {
    type Command = BinaryFrame;
    type Reply = BinaryReply;

    fn write_command(&mut self, frame: &BinaryFrame) -> Result<()> {
        let packet = frame.encode()?;
        debug!(
            "Wire out: command=0x{:04X} args={:?}",
            frame.command_id, frame.args
        );
        self.transport.write_all(&packet)?;
        Ok(())
    }

    fn read_reply(&mut self, timeout: Duration) -> Option<BinaryReply> {
        let deadline = Instant::now() + timeout;

        let header = match read_exact_by(self.transport.as_mut(), HEADER_LEN, deadline) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Binary downlink read failed: {}", e);
                return None;
            }
        };
        let (command_id, _tag, count) =
            decode_header([header[0], header[1], header[2], header[3]]);

        let mut args = Vec::with_capacity(count as usize);
        if count > 0 {
            let body = match read_exact_by(self.transport.as_mut(), count as usize * 2, deadline) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!("Discarding truncated frame 0x{:04X}", command_id);
                    return None;
                }
                Err(e) => {
                    warn!("Binary downlink read failed: {}", e);
                    return None;
                }
            };
            args.extend(
                body.chunks_exact(2)
                    .map(|pair| i16::from_be_bytes([pair[0], pair[1]])),
            );
        }

        Some(BinaryReply { command_id, args })
    }

    fn flush_input(&mut self) -> Result<()> {
        self.transport.clear_input()?;
        Ok(())
    }
}
