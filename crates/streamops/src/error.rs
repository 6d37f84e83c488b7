//! Error types for stream operations.
//!
//! Store failures are wrapped as-is so their category survives; the engine
//! adds the outcomes it produces itself: adaptation failures, the no-op
//! signal, watch closure and cancellation.

use kubestore::NamespacedName;
use thiserror::Error;

use crate::definition::Phase;

/// Result type alias for stream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during stream operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The resource store failed.
    #[error(transparent)]
    Store(#[from] kubestore::Error),

    /// A raw object could not be adapted to a typed view.
    #[error("cannot parse {object}: {message}")]
    Parse {
        /// Identity of the offending object
        object: String,
        /// What was missing or malformed
        message: String,
    },

    /// The stream already has the requested phase; nothing was changed.
    #[error("Stream already has desired phase {phase}: {name}")]
    NoOp {
        /// The phase that already holds
        phase: Phase,
        /// The stream that was inspected
        name: NamespacedName,
    },

    /// The watch stream ended before the awaited condition was observed.
    #[error("watch channel closed")]
    WatchClosed,

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller-supplied deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A bounded retry loop gave up.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// The error from the final attempt
        last: String,
    },
}

impl Error {
    /// Create a parse error about `object`.
    pub fn parse(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Returns true if the requested state already held (a success outcome).
    pub fn is_no_op(&self) -> bool {
        matches!(self, Error::NoOp { .. })
    }

    /// Returns true if the operation stopped because of cancellation or deadline.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// Returns true for optimistic-concurrency conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Store(e) if e.is_conflict())
    }

    /// Returns true if waiting and trying again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(e) if e.is_retryable())
    }
}
