// Line-oriented ASCII framing
//
// Commands go out as newline-terminated strings. Replies come back as
// "<key>:<value>\n", one pair per line, possibly split across reads.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{Downlink, Result, Transport};

/// A parsed "<key>:<value>" reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiReply {
    pub key: String,
    pub value: String,
}

pub struct AsciiDownlink {
    transport: Box<dyn Transport>,
    // Bytes received but not yet terminated by a newline
    buf: Vec<u8>,
}

impl AsciiDownlink {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            buf: Vec::new(),
        }
    }

    /// Bytes held over from a partial line
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=newline).collect();
        line.pop();
        Some(line)
    }
}

/// Parse a single reply line (without its newline)
///
/// Lines shorter than two characters, or not made of exactly two
/// colon-separated fields, are rejected.
pub fn parse_line(line: &str) -> Option<AsciiReply> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().chars().count() < 2 {
        debug!("Trouble parsing k/v pair: too short");
        return None;
    }
    let mut fields = line.split(':');
    match (fields.next(), fields.next(), fields.next()) {
        (Some(key), Some(value), None) => Some(AsciiReply {
            key: key.to_string(),
            value: value.to_string(),
        }),
        _ => {
            debug!("Trouble parsing k/v pair: {:?}", line);
            None
        }
    }
}

impl Downlink for AsciiDownlink {
    type Command = str;
    type Reply = AsciiReply;

    fn write_command(&mut self, command: &str) -> Result<()> {
        debug!("Wire out: {:?}", command);
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\n');
        self.transport.write_all(&line)?;
        Ok(())
    }

    fn read_reply(&mut self, timeout: Duration) -> Option<AsciiReply> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];

        loop {
            if let Some(line) = self.take_line() {
                let line = String::from_utf8_lossy(&line);
                debug!("Bot says: {:?}", line);
                return parse_line(&line);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            match self.transport.read_chunk(&mut chunk, remaining) {
                Ok(0) => continue,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    warn!("ASCII downlink read failed: {}", e);
                    return None;
                }
            }
        }
    }

    fn flush_input(&mut self) -> Result<()> {
        self.buf.clear();
        self.transport.clear_input()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::MemoryTransport;
    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    fn downlink() -> (AsciiDownlink, MemoryTransport) {
        let transport = MemoryTransport::new();
        (AsciiDownlink::new(Box::new(transport.clone())), transport)
    }

    #[test]
    fn test_write_appends_newline() {
        let (mut link, transport) = downlink();
        link.write_command("w 10 -10").unwrap();
        assert_eq!(transport.written_text(), vec!["w 10 -10\n"]);
    }

    #[test]
    fn test_reply_split_across_reads() {
        let (mut link, transport) = downlink();
        transport.feed(b"di");
        transport.feed(b"st:7\n");
        let reply = link.read_reply(SHORT);
        assert_eq!(
            reply,
            Some(AsciiReply {
                key: "dist".to_string(),
                value: "7".to_string()
            })
        );
        assert!(link.pending().is_empty());
    }

    #[test]
    fn test_timeout_keeps_partial_line() {
        let (mut link, transport) = downlink();
        transport.feed(b"di");
        assert_eq!(link.read_reply(SHORT), None);
        assert_eq!(link.pending(), b"di");

        transport.feed(b"st:7\n");
        let reply = link.read_reply(SHORT).unwrap();
        assert_eq!(reply.key, "dist");
        assert_eq!(reply.value, "7");
    }

    #[test]
    fn test_malformed_lines_are_consumed() {
        let (mut link, transport) = downlink();
        transport.feed(b"a:b:c\nx\nus:1 2 3 4\n");
        assert_eq!(link.read_reply(SHORT), None);
        assert_eq!(link.read_reply(SHORT), None);
        let reply = link.read_reply(SHORT).unwrap();
        assert_eq!(reply.key, "us");
        assert_eq!(reply.value, "1 2 3 4");
    }

    #[test]
    fn test_parse_line_rules() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("k"), None);
        assert_eq!(parse_line(" \r"), None);
        assert_eq!(parse_line("nocolon"), None);
        assert_eq!(parse_line("a:b:c"), None);
        assert_eq!(
            parse_line("k:\r"),
            Some(AsciiReply {
                key: "k".to_string(),
                value: String::new()
            })
        );
    }

    #[test]
    fn test_flush_drops_buffer() {
        let (mut link, transport) = downlink();
        transport.feed(b"partial");
        assert_eq!(link.read_reply(SHORT), None);
        link.flush_input().unwrap();
        assert!(link.pending().is_empty());
    }
}
