use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of time for every blocking wait in the pipeline.
///
/// The pipeline never calls `std::thread::sleep` directly; it asks a Clock. This keeps
/// waits deterministic under test (see [ManualClock]).
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created
    fn now(&self) -> Duration;
    /// Suspend the calling worker for the given duration
    fn sleep(&self, duration: Duration);
}

/// The real, monotonic clock
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// A clock that only advances when someone sleeps on it. Sleeping returns immediately.
#[derive(Debug, Default)]
pub struct ManualClock {
    elapsed: Mutex<Duration>,
    sleeps: Mutex<usize>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times a worker slept on this clock
    pub fn sleep_count(&self) -> usize {
        self.sleeps.lock().map(|s| *s).unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
        if let Ok(mut sleeps) = self.sleeps.lock() {
            *sleeps += 1;
        }
    }
}

/// How often to poll and how long to keep polling, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaitPolicy {
    pub poll_interval_secs: f64,
    pub timeout_secs: f64,
}

impl WaitPolicy {
    pub fn new(poll_interval_secs: f64, timeout_secs: f64) -> Self {
        Self {
            poll_interval_secs,
            timeout_secs,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs.max(0.0))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }
}

/// Blocks a worker until an artifact written by an external job becomes usable.
#[derive(Clone)]
pub struct FileWaiter {
    clock: Arc<dyn Clock>,
    policy: WaitPolicy,
}

impl std::fmt::Debug for FileWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWaiter")
            .field("policy", &self.policy)
            .finish()
    }
}

impl FileWaiter {
    pub fn new(clock: Arc<dyn Clock>, policy: WaitPolicy) -> Self {
        Self { clock, policy }
    }

    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    /// Wait until `path` exists, is non-empty and, if `required_line` is given, contains a
    /// line with that substring.
    ///
    /// Returns false if the artifact did not become ready before the policy timeout. The
    /// caller decides what an unfinished artifact means for its run.
    pub fn wait_for_ready(&self, path: &Path, required_line: Option<&str>) -> bool {
        let start = self.clock.now();
        let mut attempts: usize = 0;
        loop {
            attempts += 1;
            if is_ready(path, required_line) {
                if let Ok(meta) = path.metadata() {
                    log::debug!(
                        "{} ready after {} attempt(s) ({})",
                        path.display(),
                        attempts,
                        human_bytes::human_bytes(meta.len() as f64)
                    );
                }
                return true;
            }

            if self.clock.now().saturating_sub(start) >= self.policy.timeout() {
                match required_line {
                    Some(line) => log::warn!(
                        "Line '{}' not found in {} after {} attempt(s)",
                        line,
                        path.display(),
                        attempts
                    ),
                    None => log::warn!(
                        "{} still missing or empty after {} attempt(s)",
                        path.display(),
                        attempts
                    ),
                }
                return false;
            }
            self.clock.sleep(self.policy.poll_interval());
        }
    }
}

/// A single readiness check, no waiting
pub fn is_ready(path: &Path, required_line: Option<&str>) -> bool {
    match path.metadata() {
        Ok(meta) if meta.is_file() && meta.len() > 0 => (),
        _ => return false,
    }
    match required_line {
        None => true,
        Some(needle) => match std::fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes)
                .lines()
                .any(|line| line.contains(needle)),
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    /// Writes content to a file on the nth sleep, standing in for a slow external job.
    struct WritingClock {
        inner: ManualClock,
        path: PathBuf,
        content: String,
        on_sleep: usize,
    }

    impl Clock for WritingClock {
        fn now(&self) -> Duration {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);
            if self.inner.sleep_count() == self.on_sleep {
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .unwrap();
                file.write_all(self.content.as_bytes()).unwrap();
            }
        }
    }

    #[test]
    fn test_existing_file_is_ready_without_sleeping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_CCstar.dat");
        std::fs::write(&path, "1/d centre CC*\n").unwrap();
        let clock = Arc::new(ManualClock::new());
        let waiter = FileWaiter::new(clock.clone(), WaitPolicy::new(2.0, 10.0));
        assert!(waiter.wait_for_ready(&path, None));
        assert_eq!(clock.sleep_count(), 0);
    }

    #[test]
    fn test_empty_file_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.err");
        std::fs::write(&path, "").unwrap();
        let clock = Arc::new(ManualClock::new());
        let waiter = FileWaiter::new(clock.clone(), WaitPolicy::new(2.0, 10.0));
        assert!(!waiter.wait_for_ready(&path, None));
        assert_eq!(clock.sleep_count(), 5);
    }

    #[test]
    fn test_missing_marker_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.err");
        std::fs::write(&path, "Overall CC = 0.95\n").unwrap();
        let clock = Arc::new(ManualClock::new());
        let waiter = FileWaiter::new(clock, WaitPolicy::new(2.0, 40.0));
        assert!(!waiter.wait_for_ready(&path, Some("B =")));
        assert!(waiter.wait_for_ready(&path, Some("Overall CC")));
    }

    #[test]
    fn test_marker_arrives_during_wait() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.err");
        std::fs::write(&path, "Overall CC = 0.95\n").unwrap();
        let clock = Arc::new(WritingClock {
            inner: ManualClock::new(),
            path: path.clone(),
            content: String::from("B = 23.41 A^2\n"),
            on_sleep: 3,
        });
        let waiter = FileWaiter::new(clock.clone(), WaitPolicy::new(2.0, 40.0));
        assert!(waiter.wait_for_ready(&path, Some("B =")));
        assert_eq!(clock.inner.sleep_count(), 3);
    }

    #[test]
    fn test_file_created_during_wait() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_SNR.dat");
        let clock = Arc::new(WritingClock {
            inner: ManualClock::new(),
            path: path.clone(),
            content: String::from("header\n"),
            on_sleep: 1,
        });
        let waiter = FileWaiter::new(clock, WaitPolicy::new(5.0, 60.0));
        assert!(waiter.wait_for_ready(&path, None));
    }
}
