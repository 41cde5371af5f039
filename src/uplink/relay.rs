// HTTP relay uplink
//
// The robot POSTs a status update to the relay on a fixed cadence and gets
// back any queued operator commands. The remote side queues commands with
// a put_cmd message.

use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::{CallbackSlot, CommandCallback, Result, ShutdownSignal, Uplink};
use crate::config::{RELAY_POLL_INTERVAL, RELAY_TIMEOUT};
use crate::messages::{PutCommand, RelayStatus, StatusUpdate};

pub struct RelayUplink {
    url: String,
    client: reqwest::Client,
    runtime: Runtime,
    interval: Duration,
    callback: CallbackSlot,
    shutdown: ShutdownSignal,
}

impl RelayUplink {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_interval(url, RELAY_POLL_INTERVAL)
    }

    pub fn with_interval(url: &str, interval: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("relay")
            .enable_all()
            .build()?;
        let client = reqwest::Client::builder().timeout(RELAY_TIMEOUT).build()?;
        info!("msgRelayUrl: {}", url);
        Ok(Self {
            url: url.to_string(),
            client,
            runtime,
            interval,
            callback: CallbackSlot::default(),
            shutdown: ShutdownSignal::new(),
        })
    }

    async fn post(&self, msg: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .form(&[("msg", msg)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }

    /// One status update; the first queued command, if any
    pub fn poll_once(&self) -> Result<Option<String>> {
        let msg = serde_json::to_string(&StatusUpdate::default())?;
        let body = self.runtime.block_on(async {
            tokio::select! {
                body = self.post(&msg) => body.map(Some),
                _ = self.shutdown.triggered() => Ok(None),
            }
        })?;
        let Some(body) = body else {
            return Ok(None);
        };
        let status: RelayStatus = serde_json::from_str(&body)?;
        Ok(status.into_first_command())
    }

    fn pause(&self) {
        self.runtime.block_on(async {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.triggered() => {}
            }
        });
    }
}

impl Uplink for RelayUplink {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn set_command_parser(&self, callback: CommandCallback) {
        self.callback.set(callback);
    }

    fn write(&self, text: &str) -> Result<()> {
        // the relay has no return path to the operator
        debug!("Relay operator output: {}", text);
        Ok(())
    }

    fn send_command(&self, text: &str) -> Result<()> {
        let msg = serde_json::to_string(&PutCommand::single(text))?;
        self.runtime.block_on(self.post(&msg))?;
        Ok(())
    }

    fn has_replies(&self) -> bool {
        false
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
            match self.poll_once() {
                // delivered outside block_on so the callback may use the runtime
                Ok(Some(command)) => {
                    self.callback.deliver(&command);
                }
                Ok(None) => {}
                Err(e) => warn!("Relay poll failed: {}", e),
            }
            self.pause();
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    use parking_lot::Mutex;

    /// Answer `replies.len()` requests with canned JSON, capturing bodies
    pub fn fake_relay(replies: Vec<&'static str>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/relay", listener.local_addr().unwrap());
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&bodies);
        thread::spawn(move || {
            for reply in replies {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    let lower = line.to_ascii_lowercase();
                    if let Some(value) = lower.strip_prefix("content-length:") {
                        length = value.trim().parse().unwrap();
                    }
                }
                let mut body = vec![0u8; length];
                reader.read_exact(&mut body).unwrap();
                captured.lock().push(String::from_utf8(body).unwrap());

                let mut stream = stream;
                write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    reply.len(),
                    reply
                )
                .unwrap();
            }
        });
        (url, bodies)
    }
}
