//! Cancellation tokens.
//!
//! Every blocking wait in the engine goes through a [`CancelToken`], so an
//! explicit cancel or a caller-supplied deadline stops it promptly.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    cond: Condvar,
    deadline: Option<Instant>,
}

/// Shared cancellation signal with an optional deadline.
///
/// Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// A token that only fires when [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also fires once `deadline` passes.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                deadline: Some(deadline),
                ..Default::default()
            }),
        }
    }

    /// A token that fires `timeout` from now.
    ///
    /// A timeout too large to represent as an instant sets no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::with_deadline(deadline),
            None => {
                log::debug!("timeout {timeout:?} overflows, running without a deadline");
                Self::new()
            }
        }
    }

    /// Fire the token and wake every waiter.
    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.inner.cond.notify_all();
    }

    fn explicitly_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn deadline_passed(&self) -> bool {
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Whether the token has fired, explicitly or by deadline.
    pub fn is_cancelled(&self) -> bool {
        self.explicitly_cancelled() || self.deadline_passed()
    }

    /// Time left before the deadline, if one was set.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// `Ok` while the token has not fired; otherwise the matching error.
    pub fn check(&self) -> Result<()> {
        if self.explicitly_cancelled() {
            Err(Error::Cancelled)
        } else if self.deadline_passed() {
            Err(Error::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, returning early with an error if the token
    /// fires in the meantime.
    pub fn wait_timeout(&self, duration: Duration) -> Result<()> {
        // None: the sleep outlasts any representable instant.
        let until = Instant::now().checked_add(duration);
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if *cancelled {
                return Err(Error::Cancelled);
            }
            let now = Instant::now();
            if self.inner.deadline.is_some_and(|deadline| now >= deadline) {
                return Err(Error::DeadlineExceeded);
            }
            if until.is_some_and(|until| now >= until) {
                return Ok(());
            }

            let wake = match (until, self.inner.deadline) {
                (Some(until), Some(deadline)) => Some(until.min(deadline)),
                (until, deadline) => until.or(deadline),
            };
            cancelled = match wake {
                Some(wake) => {
                    self.inner
                        .cond
                        .wait_timeout(cancelled, wake - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .inner
                    .cond
                    .wait(cancelled)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fresh_token_is_live() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
        assert!(token.remaining().is_none());
    }

    #[test]
    fn test_cancel_is_shared_by_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();

        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_deadline_fires() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::DeadlineExceeded)));
    }

    #[test]
    fn test_huge_timeout_means_no_deadline() {
        let token = CancelToken::with_timeout(Duration::from_secs(u64::MAX));
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
        assert!(token.remaining().is_none());
    }

    #[test]
    fn test_huge_wait_still_wakes_on_cancel() {
        let token = CancelToken::new();
        let canceller = token.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let result = token.wait_timeout(Duration::from_secs(u64::MAX));
        handle.join().unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_wait_timeout_elapses() {
        let token = CancelToken::new();
        assert!(token.wait_timeout(Duration::from_millis(5)).is_ok());
    }

    #[test]
    fn test_wait_timeout_wakes_on_cancel() {
        let token = CancelToken::new();
        let canceller = token.clone();
        let started = Instant::now();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let result = token.wait_timeout(Duration::from_secs(30));
        handle.join().unwrap();

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_timeout_stops_at_deadline() {
        let token = CancelToken::with_timeout(Duration::from_millis(20));
        let result = token.wait_timeout(Duration::from_secs(30));
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }
}
