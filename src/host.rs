// Host device services
//
// Speech, camera, location, audio and orientation are opaque services of
// the device the runtime runs on. The robot only calls through this trait.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use parking_lot::Mutex;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("{0} is not available on this host")]
    Unavailable(&'static str),

    #[error("{service} failed: {reason}")]
    Failed { service: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;

/// Device orientation, radians
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Orientation {
    pub pitch: f64,
    pub roll: f64,
    pub azimuth: f64,
}

impl Orientation {
    pub fn azimuth_degrees(&self) -> f64 {
        self.azimuth.to_degrees()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub locality: String,
    pub admin_area: String,
}

pub trait HostServices: Send + Sync {
    fn speak(&self, text: &str) -> Result<()>;

    /// Short on-screen notice
    fn toast(&self, text: &str);

    fn recognize_speech(&self) -> Result<String>;

    /// Listen for at most `window`; `Ok(None)` when nothing was heard
    fn listen(&self, _window: Duration) -> Result<Option<String>> {
        self.recognize_speech().map(Some)
    }

    fn capture_picture(&self, path: &Path) -> Result<()>;

    fn read_location(&self) -> Result<Location>;

    fn start_audio_recording(&self, path: &Path) -> Result<()>;

    fn stop_audio_recording(&self) -> Result<()>;

    fn media_volume(&self) -> Result<u8>;

    fn max_media_volume(&self) -> Result<u8>;

    fn set_media_volume(&self, volume: u8) -> Result<()>;

    fn read_orientation(&self) -> Result<Orientation>;

    fn vibrate(&self, _duration_ms: u64) {}
}

/// Host backed by the process console
///
/// Speech and toasts go to the log, speech recognition reads lines from
/// stdin on a dedicated thread so a bounded `listen` can give up.
/// Camera, location and sensors are not present on a plain host.
pub struct ConsoleHost {
    volume: AtomicU8,
    stdin: Mutex<Option<Receiver<String>>>,
}

const CONSOLE_MAX_VOLUME: u8 = 15;

fn end_of_input() -> HostError {
    HostError::Failed {
        service: "speech recognition",
        reason: "end of input".to_string(),
    }
}

fn spawn_stdin_reader() -> io::Result<Receiver<String>> {
    let (tx, rx) = bounded::<String>(16);
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

impl ConsoleHost {
    pub fn new() -> Self {
        Self {
            volume: AtomicU8::new(CONSOLE_MAX_VOLUME / 2),
            stdin: Mutex::new(None),
        }
    }

    /// Next stdin line; waits forever when `window` is `None`
    fn next_line(&self, window: Option<Duration>) -> Result<Option<String>> {
        let mut stdin = self.stdin.lock();
        if stdin.is_none() {
            *stdin = Some(spawn_stdin_reader()?);
        }
        let Some(lines) = stdin.as_ref() else {
            return Err(HostError::Unavailable("stdin"));
        };
        let line = match window {
            Some(window) => match lines.recv_timeout(window) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(end_of_input()),
            },
            None => lines.recv().map_err(|_| end_of_input())?,
        };
        Ok(Some(line.trim().to_string()))
    }
}

impl Default for ConsoleHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostServices for ConsoleHost {
    fn speak(&self, text: &str) -> Result<()> {
        info!("[speech] {}", text);
        Ok(())
    }

    fn toast(&self, text: &str) {
        info!("[toast] {}", text);
    }

    fn recognize_speech(&self) -> Result<String> {
        print!("say> ");
        io::stdout().flush()?;
        self.next_line(None)?.ok_or_else(end_of_input)
    }

    fn listen(&self, window: Duration) -> Result<Option<String>> {
        self.next_line(Some(window))
    }

    fn capture_picture(&self, path: &Path) -> Result<()> {
        warn!("No camera, not writing {}", path.display());
        Err(HostError::Unavailable("camera"))
    }

    fn read_location(&self) -> Result<Location> {
        Err(HostError::Unavailable("location"))
    }

    fn start_audio_recording(&self, _path: &Path) -> Result<()> {
        Err(HostError::Unavailable("microphone"))
    }

    fn stop_audio_recording(&self) -> Result<()> {
        Err(HostError::Unavailable("microphone"))
    }

    fn media_volume(&self) -> Result<u8> {
        Ok(self.volume.load(Ordering::Relaxed))
    }

    fn max_media_volume(&self) -> Result<u8> {
        Ok(CONSOLE_MAX_VOLUME)
    }

    fn set_media_volume(&self, volume: u8) -> Result<()> {
        self.volume.store(volume.min(CONSOLE_MAX_VOLUME), Ordering::Relaxed);
        info!("Media volume set to {}", volume);
        Ok(())
    }

    fn read_orientation(&self) -> Result<Orientation> {
        Err(HostError::Unavailable("orientation sensor"))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::path::PathBuf;

    use parking_lot::Mutex;

    use super::*;

    /// Records every call; scripted speech and orientation readings
    #[derive(Default)]
    pub struct RecordingHost {
        pub spoken: Mutex<Vec<String>>,
        pub toasts: Mutex<Vec<String>>,
        pub pictures: Mutex<Vec<PathBuf>>,
        pub recordings: Mutex<Vec<String>>,
        pub transcripts: Mutex<VecDeque<String>>,
        pub orientations: Mutex<VecDeque<Orientation>>,
        pub location: Mutex<Option<Location>>,
        pub volume: Mutex<u8>,
        pub vibrations: Mutex<usize>,
    }

    impl RecordingHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn spoken(&self) -> Vec<String> {
            self.spoken.lock().clone()
        }

        pub fn toasts(&self) -> Vec<String> {
            self.toasts.lock().clone()
        }
    }

    impl HostServices for RecordingHost {
        fn speak(&self, text: &str) -> Result<()> {
            self.spoken.lock().push(text.to_string());
            Ok(())
        }

        fn toast(&self, text: &str) {
            self.toasts.lock().push(text.to_string());
        }

        fn recognize_speech(&self) -> Result<String> {
            self.transcripts
                .lock()
                .pop_front()
                .ok_or(HostError::Unavailable("speech recognition"))
        }

        fn listen(&self, window: Duration) -> Result<Option<String>> {
            let next = self.transcripts.lock().pop_front();
            if next.is_none() {
                std::thread::sleep(window);
            }
            Ok(next)
        }

        fn capture_picture(&self, path: &Path) -> Result<()> {
            self.pictures.lock().push(path.to_path_buf());
            Ok(())
        }

        fn read_location(&self) -> Result<Location> {
            self.location
                .lock()
                .clone()
                .ok_or(HostError::Unavailable("location"))
        }

        fn start_audio_recording(&self, path: &Path) -> Result<()> {
            self.recordings
                .lock()
                .push(format!("start {}", path.display()));
            Ok(())
        }

        fn stop_audio_recording(&self) -> Result<()> {
            self.recordings.lock().push("stop".to_string());
            Ok(())
        }

        fn media_volume(&self) -> Result<u8> {
            Ok(*self.volume.lock())
        }

        fn max_media_volume(&self) -> Result<u8> {
            Ok(15)
        }

        fn set_media_volume(&self, volume: u8) -> Result<()> {
            *self.volume.lock() = volume;
            Ok(())
        }

        fn read_orientation(&self) -> Result<Orientation> {
            self.orientations
                .lock()
                .pop_front()
                .ok_or(HostError::Unavailable("orientation sensor"))
        }

        fn vibrate(&self, _duration_ms: u64) {
            *self.vibrations.lock() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_volume_is_bounded() {
        let host = ConsoleHost::new();
        host.set_media_volume(40).unwrap();
        assert_eq!(host.media_volume().unwrap(), CONSOLE_MAX_VOLUME);
    }

    #[test]
    fn test_console_has_no_camera() {
        let host = ConsoleHost::new();
        assert!(matches!(
            host.capture_picture(Path::new("/tmp/x.jpg")),
            Err(HostError::Unavailable("camera"))
        ));
    }

    #[test]
    fn test_azimuth_in_degrees() {
        let orientation = Orientation {
            azimuth: std::f64::consts::FRAC_PI_2,
            ..Orientation::default()
        };
        assert!((orientation.azimuth_degrees() - 90.0).abs() < 1e-9);
    }
}
