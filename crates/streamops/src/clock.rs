//! Injectable clock for retry loops.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::Result;

/// Poll interval between whole-cycle retries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Something that can wait between attempts.
pub trait Clock: Send + Sync {
    /// Wait for `duration` unless `cancel` fires first.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<()>;
}

/// Real time, interruptible by the token.
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<()> {
        cancel.wait_timeout(duration)
    }
}

/// Clock that returns immediately and remembers what it was asked to wait.
#[derive(Debug, Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every requested sleep, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Clock for RecordingClock {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        Ok(())
    }
}

/// Retry loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait between attempts.
    pub interval: Duration,
    /// Give up after this many attempts; `None` retries until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
        }
    }
}

impl PollConfig {
    /// Whether `attempts` has reached the bound.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_clock_records() {
        let clock = RecordingClock::new();
        let token = CancelToken::new();
        clock.sleep(Duration::from_secs(1), &token).unwrap();
        clock.sleep(Duration::from_secs(2), &token).unwrap();

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_recording_clock_honors_cancel() {
        let clock = RecordingClock::new();
        let token = CancelToken::new();
        token.cancel();

        assert!(clock.sleep(Duration::from_secs(1), &token).is_err());
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_poll_config_bounds() {
        let unbounded = PollConfig::default();
        assert_eq!(unbounded.interval, Duration::from_secs(1));
        assert!(!unbounded.exhausted(u32::MAX));

        let bounded = PollConfig {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(!bounded.exhausted(2));
        assert!(bounded.exhausted(3));
    }
}
