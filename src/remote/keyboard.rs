// Keyboard teleop: WASD drive, R/F speed, space stop, H/C/X/V verbs, Q quit
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tracing::info;

use super::{RemoteControl, RemoteError, mix};

const SPEEDS: [f64; 3] = [30.0, 60.0, 100.0];
const TURN_SPEEDS: [f64; 3] = [20.0, 35.0, 50.0];
const KEY_POLL: Duration = Duration::from_millis(20);
// Drive input decays to a stop after this long without a key
const INPUT_TIMEOUT: Duration = Duration::from_millis(300);

/// What a key press asks the remote to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Drive,
    Verb(&'static str),
    Quit,
    Ignored,
}

/// Drive state built up from key presses
#[derive(Debug, Clone)]
pub struct KeyboardDrive {
    speed_idx: usize,
    speed: f64,
    direction: f64,
    last_input: Instant,
}

impl KeyboardDrive {
    pub fn new(now: Instant) -> Self {
        Self {
            speed_idx: 0,
            speed: 0.0,
            direction: 0.0,
            last_input: now,
        }
    }

    pub fn speed_label(&self) -> &'static str {
        ["LOW", "MED", "HIGH"][self.speed_idx]
    }

    pub fn handle_key(&mut self, code: KeyCode, now: Instant) -> KeyAction {
        match code {
            KeyCode::Char('w') | KeyCode::Up => {
                self.speed = SPEEDS[self.speed_idx];
                self.last_input = now;
                KeyAction::Drive
            }
            KeyCode::Char('s') | KeyCode::Down => {
                self.speed = -SPEEDS[self.speed_idx];
                self.last_input = now;
                KeyAction::Drive
            }
            KeyCode::Char('a') | KeyCode::Left => {
                self.direction = -TURN_SPEEDS[self.speed_idx];
                self.last_input = now;
                KeyAction::Drive
            }
            KeyCode::Char('d') | KeyCode::Right => {
                self.direction = TURN_SPEEDS[self.speed_idx];
                self.last_input = now;
                KeyAction::Drive
            }
            KeyCode::Char(' ') => {
                self.speed = 0.0;
                self.direction = 0.0;
                KeyAction::Drive
            }
            KeyCode::Char('r') => {
                self.speed_idx = (self.speed_idx + 1).min(SPEEDS.len() - 1);
                info!("Speed: {}", self.speed_label());
                KeyAction::Ignored
            }
            KeyCode::Char('f') => {
                self.speed_idx = self.speed_idx.saturating_sub(1);
                info!("Speed: {}", self.speed_label());
                KeyAction::Ignored
            }
            KeyCode::Char('h') => KeyAction::Verb("hi"),
            KeyCode::Char('c') => KeyAction::Verb("picture"),
            KeyCode::Char('x') => KeyAction::Verb("x"),
            KeyCode::Char('z') => KeyAction::Verb("z"),
            KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
            _ => KeyAction::Ignored,
        }
    }

    /// Current wheel speeds; stale input reads as stopped
    pub fn wheels(&mut self, now: Instant) -> (i32, i32) {
        if now.duration_since(self.last_input) > INPUT_TIMEOUT {
            self.speed = 0.0;
            self.direction = 0.0;
        }
        // steer like a car when reversing
        let direction = if self.speed < 0.0 { -self.direction } else { self.direction };
        mix(self.speed, direction)
    }
}

/// Drive the robot from the terminal until Q or Esc
pub fn run_keyboard(remote: &RemoteControl) -> Result<(), RemoteError> {
    info!("Controls: WASD=drive, space=stop, R/F=speed, H=hello, C=picture, X=location, Z=range, Q=quit");

    enable_raw_mode()?;
    let result = teleop(remote);
    disable_raw_mode()?;
    remote.finish();

    result
}

fn teleop(remote: &RemoteControl) -> Result<(), RemoteError> {
    let shutdown = remote.shutdown_signal();
    let sender = remote.sender();
    let mut drive = KeyboardDrive::new(Instant::now());
    info!("Speed: {}", drive.speed_label());

    while !shutdown.is_triggered() {
        if event::poll(KEY_POLL)? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                if pressed {
                    match drive.handle_key(code, Instant::now()) {
                        KeyAction::Verb(verb) => {
                            sender.send(verb, true);
                        }
                        KeyAction::Quit => break,
                        KeyAction::Drive | KeyAction::Ignored => {}
                    }
                }
            }
        }

        let (left, right) = drive.wheels(Instant::now());
        sender.send(&format!("ws {} {}", left, right), false);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wasd_drives() {
        let t0 = Instant::now();
        let mut drive = KeyboardDrive::new(t0);
        assert_eq!(drive.handle_key(KeyCode::Char('w'), t0), KeyAction::Drive);
        assert_eq!(drive.wheels(t0), (30, 30));
        drive.handle_key(KeyCode::Char('d'), t0);
        assert_eq!(drive.wheels(t0), (50, 10));
        drive.handle_key(KeyCode::Char(' '), t0);
        assert_eq!(drive.wheels(t0), (0, 0));
    }

    #[test]
    fn test_reverse_steering_and_timeout() {
        let t0 = Instant::now();
        let mut drive = KeyboardDrive::new(t0);
        drive.handle_key(KeyCode::Char('s'), t0);
        drive.handle_key(KeyCode::Char('a'), t0);
        // -30 speed, left turn inverted while reversing
        assert_eq!(drive.wheels(t0), (-10, -50));
        assert_eq!(drive.wheels(t0 + Duration::from_secs(1)), (0, 0));
    }

    #[test]
    fn test_speed_levels_saturate() {
        let t0 = Instant::now();
        let mut drive = KeyboardDrive::new(t0);
        for _ in 0..5 {
            drive.handle_key(KeyCode::Char('r'), t0);
        }
        assert_eq!(drive.speed_label(), "HIGH");
        drive.handle_key(KeyCode::Char('w'), t0);
        drive.handle_key(KeyCode::Char('d'), t0);
        // 150 / 50 rescaled to 100 / 33
        assert_eq!(drive.wheels(t0), (100, 33));
        for _ in 0..5 {
            drive.handle_key(KeyCode::Char('f'), t0);
        }
        assert_eq!(drive.speed_label(), "LOW");
    }

    #[test]
    fn test_verbs_and_quit() {
        let t0 = Instant::now();
        let mut drive = KeyboardDrive::new(t0);
        assert_eq!(drive.handle_key(KeyCode::Char('h'), t0), KeyAction::Verb("hi"));
        assert_eq!(drive.handle_key(KeyCode::Esc, t0), KeyAction::Quit);
        assert_eq!(drive.handle_key(KeyCode::Tab, t0), KeyAction::Ignored);
    }
}
