// Wire link to the robot's microcontroller
//
// Provides:
// - A byte transport abstraction over the serial port
// - Line-oriented ASCII key:value framing
// - Fixed-header binary framing

pub mod ascii;
pub mod binary;

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use tracing::info;

pub use ascii::{AsciiDownlink, AsciiReply};
pub use binary::{BinaryDownlink, BinaryFrame, BinaryReply};

/// Error types for the wire link
#[derive(Debug, thiserror::Error)]
pub enum DownlinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame carries {count} arguments, at most 255 fit the header")]
    TooManyArgs { count: usize },
}

pub type Result<T> = std::result::Result<T, DownlinkError>;

/// Raw byte channel underneath a framing
pub trait Transport: Send {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read whatever arrives within `timeout`. `Ok(0)` means nothing came.
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Drop any pending input
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Framing contract shared by the ASCII and binary links
pub trait Downlink: Send {
    type Command: ?Sized;
    type Reply;

    fn write_command(&mut self, command: &Self::Command) -> Result<()>;

    /// One reply, or `None` on timeout, read failure or malformed input
    fn read_reply(&mut self, timeout: Duration) -> Option<Self::Reply>;

    fn flush_input(&mut self) -> Result<()>;
}

/// Serial port (USB serial, Bluetooth rfcomm) transport
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        info!("Opening serial link on {} at {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(100))
            .open()?;
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if timeout.is_zero() {
            return Ok(0);
        }
        self.port.set_timeout(timeout).map_err(io::Error::from)?;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Read exactly `len` bytes before `deadline`, or `None` if they do not arrive
pub(crate) fn read_exact_by(
    transport: &mut dyn Transport,
    len: usize,
    deadline: Instant,
) -> io::Result<Option<Vec<u8>>> {
    let mut out = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        let n = transport.read_chunk(&mut out[filled..], remaining)?;
        filled += n;
    }
    Ok(Some(out))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::Transport;

    /// In-memory transport: scripted incoming chunks, recorded writes
    #[derive(Clone, Default)]
    pub struct MemoryTransport {
        pub incoming: Arc<Mutex<VecDeque<Vec<u8>>>>,
        pub written: Arc<Mutex<Vec<Vec<u8>>>>,
        pub fail_writes: Arc<Mutex<bool>>,
    }

    impl MemoryTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn feed(&self, bytes: &[u8]) {
            self.incoming.lock().push_back(bytes.to_vec());
        }

        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.written.lock().clone()
        }

        pub fn written_text(&self) -> Vec<String> {
            self.writes()
                .iter()
                .map(|w| String::from_utf8_lossy(w).into_owned())
                .collect()
        }
    }

    impl Transport for MemoryTransport {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            if *self.fail_writes.lock() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down"));
            }
            self.written.lock().push(bytes.to_vec());
            Ok(())
        }

        fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
            let mut incoming = self.incoming.lock();
            let Some(mut chunk) = incoming.pop_front() else {
                drop(incoming);
                std::thread::sleep(timeout.min(Duration::from_millis(1)));
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                incoming.push_front(chunk.split_off(n));
            }
            Ok(n)
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.incoming.lock().clear();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryTransport;
    use super::*;

    #[test]
    fn test_read_exact_across_chunks() {
        let mut transport = MemoryTransport::new();
        transport.feed(&[1, 2]);
        transport.feed(&[3, 4, 5]);
        let deadline = Instant::now() + Duration::from_millis(50);
        let bytes = read_exact_by(&mut transport, 4, deadline).unwrap();
        assert_eq!(bytes, Some(vec![1, 2, 3, 4]));
        // the fifth byte stays queued
        let rest = read_exact_by(&mut transport, 1, deadline).unwrap();
        assert_eq!(rest, Some(vec![5]));
    }

    #[test]
    fn test_read_exact_times_out() {
        let mut transport = MemoryTransport::new();
        transport.feed(&[1]);
        let deadline = Instant::now() + Duration::from_millis(5);
        assert_eq!(read_exact_by(&mut transport, 2, deadline).unwrap(), None);
    }
}
