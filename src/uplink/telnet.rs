// Telnet line uplink
//
// Server side accepts one operator at a time and acknowledges every
// non-empty line with "ok". Client side connects to a robot and forwards
// whatever the robot prints to the callback.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{CallbackSlot, CommandCallback, Result, ShutdownSignal, Uplink, UplinkError};
use crate::config::UPLINK_POLL;

pub struct TelnetUplink {
    listener: Option<TcpListener>,
    stream: Mutex<Option<TcpStream>>,
    callback: CallbackSlot,
    shutdown: ShutdownSignal,
}

impl TelnetUplink {
    /// Listen on all interfaces; port 0 picks a free port
    pub fn listen(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        info!("Ready to accept telnet on {}", listener.local_addr()?);
        Ok(Self {
            listener: Some(listener),
            stream: Mutex::new(None),
            callback: CallbackSlot::default(),
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn connect(host: &str, port: u16) -> Result<Self> {
        info!("Connecting to robot: {}:{}...", host, port);
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "robot host did not resolve"))?;
        Self::connect_addr(addr)
    }

    pub fn connect_addr(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self {
            listener: None,
            stream: Mutex::new(Some(stream)),
            callback: CallbackSlot::default(),
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.listener {
            Some(listener) => Ok(listener.local_addr()?),
            None => Err(UplinkError::NotConnected),
        }
    }

    fn send_line(&self, text: &str) -> Result<()> {
        let mut guard = self.stream.lock();
        let stream = guard.as_mut().ok_or(UplinkError::NotConnected)?;
        stream.write_all(format!("{}\r\n", text).as_bytes())?;
        Ok(())
    }

    fn run_server(&self, listener: &TcpListener) -> Result<()> {
        info!("Robot is now ready to take commands.");
        while !self.shutdown.is_triggered() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!("Operator connected from {}", peer);
                    if let Err(e) = self.serve(stream, true) {
                        warn!("Telnet session ended: {}", e);
                    }
                    *self.stream.lock() = None;
                    info!("Operator {} disconnected", peer);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.shutdown.wait_timeout(UPLINK_POLL);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read lines from `stream` until it closes or the uplink does
    fn serve(&self, stream: TcpStream, acknowledge: bool) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(UPLINK_POLL))?;
        if acknowledge {
            *self.stream.lock() = Some(stream.try_clone()?);
        }
        let mut ack = stream.try_clone()?;
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        while !self.shutdown.is_triggered() {
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) if buf.last() != Some(&b'\n') => continue,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).replace(['\r', '\n'], "");
                    buf.clear();
                    if line.is_empty() {
                        continue;
                    }
                    debug!("Received: {:?}", line);
                    if acknowledge {
                        ack.write_all(b"ok\r\n")?;
                    }
                    self.callback.deliver(&line);
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn run_client(&self) -> Result<()> {
        let stream = match self.stream.lock().as_ref() {
            Some(stream) => stream.try_clone()?,
            None => return Err(UplinkError::NotConnected),
        };
        self.serve(stream, false)
    }
}

impl Uplink for TelnetUplink {
    fn name(&self) -> &'static str {
        "telnet"
    }

    fn set_command_parser(&self, callback: CommandCallback) {
        self.callback.set(callback);
    }

    fn write(&self, text: &str) -> Result<()> {
        self.send_line(text)
    }

    fn send_command(&self, text: &str) -> Result<()> {
        if self.listener.is_some() {
            return Err(UplinkError::Unsupported("telnet server"));
        }
        self.send_line(text)
    }

    fn close(&self) {
        info!("Shutting down telnet");
        self.shutdown.trigger();
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    fn run(&self) -> Result<()> {
        match &self.listener {
            Some(listener) => self.run_server(listener),
            None => self.run_client(),
        }
    }
}

/// Robot server and remote client joined in one process
pub struct SelfUplink {
    robot: Arc<TelnetUplink>,
    remote: Arc<TelnetUplink>,
}

impl SelfUplink {
    pub fn new() -> Result<Self> {
        let robot = TelnetUplink::listen(0)?;
        let port = robot.local_addr()?.port();
        let remote = TelnetUplink::connect_addr(SocketAddr::from(([127, 0, 0, 1], port)))?;
        remote.set_command_parser(Arc::new(|reply: &str| info!("robot> {}", reply)));
        Ok(Self {
            robot: Arc::new(robot),
            remote: Arc::new(remote),
        })
    }
}

impl Uplink for SelfUplink {
    fn name(&self) -> &'static str {
        "self"
    }

    fn set_command_parser(&self, callback: CommandCallback) {
        self.robot.set_command_parser(callback);
    }

    fn write(&self, text: &str) -> Result<()> {
        self.robot.write(text)
    }

    fn send_command(&self, text: &str) -> Result<()> {
        self.remote.send_command(text)
    }

    fn close(&self) {
        self.remote.close();
        self.robot.close();
    }

    fn is_closed(&self) -> bool {
        self.robot.is_closed()
    }

    fn run(&self) -> Result<()> {
        let remote = Arc::clone(&self.remote);
        let reader = thread::Builder::new()
            .name("self-remote".to_string())
            .spawn(move || {
                if let Err(e) = remote.run() {
                    warn!("Self remote reader stopped: {}", e);
                }
            })?;
        let result = self.robot.run();
        self.remote.close();
        let _ = reader.join();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::time::Duration;

    fn collecting() -> (CommandCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (
            Arc::new(move |text: &str| sink.lock().push(text.to_string())),
            seen,
        )
    }

    fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_server_acks_and_delivers_lines() {
        let server = Arc::new(TelnetUplink::listen(0).unwrap());
        let addr = SocketAddr::from(([127, 0, 0, 1], server.local_addr().unwrap().port()));
        let (callback, seen) = collecting();
        server.set_command_parser(callback);

        let runner = Arc::clone(&server);
        let handle = thread::spawn(move || runner.run());

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"f\r\n\r\nw 10").unwrap();
        client.write_all(b" 10\n").unwrap();

        let mut reader = BufReader::new(client.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "ok\r\n");

        assert!(wait_for(|| seen.lock().len() == 2));
        assert_eq!(*seen.lock(), vec!["f", "w 10 10"]);

        assert!(wait_for(|| server.write("Moving forward").is_ok()));
        let mut ok_or_text = String::new();
        loop {
            ok_or_text.clear();
            reader.read_line(&mut ok_or_text).unwrap();
            if ok_or_text != "ok\r\n" {
                break;
            }
        }
        assert_eq!(ok_or_text, "Moving forward\r\n");

        server.close();
        drop(client);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_write_without_operator() {
        let server = TelnetUplink::listen(0).unwrap();
        assert!(matches!(server.write("hello"), Err(UplinkError::NotConnected)));
        assert!(matches!(
            server.send_command("f"),
            Err(UplinkError::Unsupported(_))
        ));
    }

    #[test]
    fn test_close_unblocks_idle_server() {
        let server = Arc::new(TelnetUplink::listen(0).unwrap());
        let runner = Arc::clone(&server);
        let handle = thread::spawn(move || runner.run());
        thread::sleep(Duration::from_millis(20));
        server.close();
        handle.join().unwrap().unwrap();
        assert!(server.is_closed());
    }

    #[test]
    fn test_self_uplink_round_trip() {
        let uplink = Arc::new(SelfUplink::new().unwrap());
        let (callback, seen) = collecting();
        uplink.set_command_parser(callback);

        let runner = Arc::clone(&uplink);
        let handle = thread::spawn(move || runner.run());

        uplink.send_command("ws 20 20").unwrap();
        assert!(wait_for(|| seen.lock().len() == 1));
        assert_eq!(*seen.lock(), vec!["ws 20 20"]);

        uplink.close();
        handle.join().unwrap().unwrap();
    }
}
