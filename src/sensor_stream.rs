// Bounded per-key history of telemetry values reported by the robot
//
// Appended to by the telemetry reader thread, read by the evasion loop and
// the command dispatcher. Each key keeps its most recent samples first.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Local};
use parking_lot::RwLock;

use crate::config::MAX_SENSOR_STREAM_LENGTH;

/// One telemetry value and when it arrived
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    pub value: String,
    pub observed_at: DateTime<Local>,
}

pub struct SensorStream {
    capacity: usize,
    samples: RwLock<HashMap<String, VecDeque<SensorSample>>>,
}

impl SensorStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: RwLock::new(HashMap::new()),
        }
    }

    /// Record a value, evicting the oldest sample once the key is at capacity
    pub fn push(&self, key: &str, value: &str) {
        let sample = SensorSample {
            value: value.to_string(),
            observed_at: Local::now(),
        };
        let mut samples = self.samples.write();
        let history = samples.entry(key.to_string()).or_default();
        history.push_front(sample);
        history.truncate(self.capacity);
    }

    /// Latest value for `key`, or `None` if nothing was reported yet
    pub fn latest(&self, key: &str) -> Option<String> {
        self.samples
            .read()
            .get(key)
            .and_then(|history| history.front())
            .map(|sample| sample.value.clone())
    }

    /// Full history for `key`, most recent first
    pub fn history(&self, key: &str) -> Vec<SensorSample> {
        self.samples
            .read()
            .get(key)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.samples.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Human readable dump, latest value only unless `include_history`
    pub fn report(&self, include_history: bool) -> String {
        let mut out = String::new();
        for key in self.keys() {
            out.push_str(&key);
            out.push('\n');
            let history = self.history(&key);
            let shown = if include_history { history.len() } else { 1 };
            for sample in history.iter().take(shown) {
                out.push_str(&format!("\tvalue: {}\n", sample.value));
                out.push_str(&format!(
                    "\ttime : {}\n",
                    sample.observed_at.format("%A, %d. %B %Y %I:%M:%S%p")
                ));
            }
        }
        out
    }
}

impl Default for SensorStream {
    fn default() -> Self {
        Self::new(MAX_SENSOR_STREAM_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_is_most_recent() {
        let stream = SensorStream::default();
        assert_eq!(stream.latest("us"), None);
        stream.push("us", "10 20 30 40");
        stream.push("us", "11 21 31 41");
        assert_eq!(stream.latest("us").as_deref(), Some("11 21 31 41"));
        assert_eq!(stream.latest("battery"), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let stream = SensorStream::new(3);
        for i in 0..10 {
            stream.push("dist", &i.to_string());
            assert!(stream.history("dist").len() <= 3);
        }
        let values: Vec<String> = stream.history("dist").into_iter().map(|s| s.value).collect();
        assert_eq!(values, vec!["9", "8", "7"]);
    }

    #[test]
    fn test_keys_are_independent() {
        let stream = SensorStream::new(2);
        stream.push("a", "1");
        stream.push("a", "2");
        stream.push("a", "3");
        stream.push("b", "x");
        assert_eq!(stream.history("a").len(), 2);
        assert_eq!(stream.history("b").len(), 1);
        assert_eq!(stream.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_report_latest_only() {
        let stream = SensorStream::default();
        stream.push("dist", "7");
        stream.push("dist", "8");
        let report = stream.report(false);
        assert!(report.starts_with("dist\n"));
        assert!(report.contains("value: 8"));
        assert!(!report.contains("value: 7"));
        assert!(stream.report(true).contains("value: 7"));
    }

    #[test]
    fn test_concurrent_pushes_respect_capacity() {
        use std::sync::Arc;
        use std::thread;

        let stream = Arc::new(SensorStream::new(5));
        let writers: Vec<_> = (0..4)
            .map(|n| {
                let stream = Arc::clone(&stream);
                thread::spawn(move || {
                    for i in 0..100 {
                        stream.push("us", &format!("{n}-{i}"));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(stream.history("us").len(), 5);
    }
}
