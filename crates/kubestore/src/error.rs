//! Error types for resource store operations.
//!
//! Errors are categorized so callers can decide between retrying the whole
//! read-modify-write cycle (conflicts), backing off (network), or giving up.

use std::fmt;
use std::io;
use std::sync::Arc;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of store errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connectivity problems or server-side 5xx (transient, retryable).
    Network,
    /// The object or stream class does not exist.
    NotFound,
    /// Optimistic-concurrency violation: the resource version is stale.
    Conflict,
    /// The server rejected the object.
    Validation,
    /// Credentials were rejected or lack permission.
    Forbidden,
    /// The response could not be decoded.
    Format,
    /// Other/unknown errors.
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Conflict)
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Cluster connectivity issue",
            Self::NotFound => "Resource not found",
            Self::Conflict => "Resource was modified concurrently",
            Self::Validation => "Resource rejected by the API server",
            Self::Forbidden => "Access denied",
            Self::Format => "Unexpected response format",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check that the API server (or kubectl proxy) is reachable",
            Self::NotFound => "Verify the stream class, stream id and namespace",
            Self::Conflict => "Run the command again",
            Self::Validation => "Check that the installed CRDs match this plugin version",
            Self::Forbidden => "Check the token and the RBAC rules bound to it",
            Self::Format => "The server may run an incompatible API version",
            Self::Other => "Check the error details for more information",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while talking to the resource store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The stream class indirection could not be resolved.
    #[error("stream class not found: {0}")]
    ClassNotFound(String),

    /// A named resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The update carried a stale resource version.
    #[error("conflict updating {0}: the object has been modified")]
    Conflict(String),

    /// Server-side validation rejected the object.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Authentication or authorization failure.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// HTTP transport failure or server error.
    #[error("HTTP request failed: {message}")]
    Network {
        /// Error message.
        message: String,
        /// HTTP status code if available.
        status: Option<u16>,
    },

    /// The store handle could not be constructed. Every caller of a lazy
    /// store shares the first failure.
    #[error("resource store unavailable: {0}")]
    Unavailable(Arc<Error>),

    /// The server answered with something that is not a valid object.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    /// The watch stream reported an error event.
    #[error("watch failed: {0}")]
    Watch(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a network error.
    pub fn network(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Network {
            message: message.into(),
            status,
        }
    }

    /// Get the error category for retry logic.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ClassNotFound(_) | Error::NotFound(_) => ErrorCategory::NotFound,
            Error::Conflict(_) => ErrorCategory::Conflict,
            Error::Validation(_) => ErrorCategory::Validation,
            Error::Forbidden(_) => ErrorCategory::Forbidden,
            Error::Network { .. } | Error::Io(_) => ErrorCategory::Network,
            Error::InvalidResponse(_) => ErrorCategory::Format,
            Error::Unavailable(cause) => cause.category(),
            Error::Watch(_) => ErrorCategory::Other,
        }
    }

    /// Whether this is an optimistic-concurrency conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.category() == ErrorCategory::Conflict
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Map an HTTP status to an error about `target`.
    ///
    /// `404` maps to [`Error::NotFound`]; callers resolving stream classes
    /// translate it further.
    pub fn from_status(status: u16, target: &str) -> Self {
        match status {
            404 => Self::NotFound(target.to_string()),
            409 => Self::Conflict(target.to_string()),
            400 | 422 => Self::Validation(format!("{target}: HTTP {status}")),
            401 | 403 => Self::Forbidden(format!("{target}: HTTP {status}")),
            _ => Self::network(format!("{target}: HTTP {status}"), Some(status)),
        }
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::network(format!("HTTP {code}"), Some(code)),
            other => Self::network(other.to_string(), None),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Conflict.is_retryable());
        assert!(!ErrorCategory::NotFound.is_retryable());
        assert!(!ErrorCategory::Validation.is_retryable());
        assert!(!ErrorCategory::Forbidden.is_retryable());
        assert!(!ErrorCategory::Format.is_retryable());
        assert!(!ErrorCategory::Other.is_retryable());
    }

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(Error::from_status(404, "x"), Error::NotFound(_)));
        assert!(Error::from_status(409, "x").is_conflict());
        assert!(matches!(Error::from_status(422, "x"), Error::Validation(_)));
        assert!(matches!(Error::from_status(400, "x"), Error::Validation(_)));
        assert!(matches!(Error::from_status(403, "x"), Error::Forbidden(_)));

        let err = Error::from_status(503, "x");
        assert_eq!(err.category(), ErrorCategory::Network);
        match err {
            Error::Network { status, .. } => assert_eq!(status, Some(503)),
            _ => panic!("Expected Error::Network"),
        }
    }

    #[test]
    fn test_unavailable_keeps_cause_category() {
        let err = Error::Unavailable(Arc::new(Error::Forbidden("token rejected".to_string())));
        assert_eq!(err.category(), ErrorCategory::Forbidden);
        assert!(!err.is_retryable());

        let cause = io::Error::new(io::ErrorKind::NotFound, "token file missing");
        let err = Error::Unavailable(Arc::new(Error::Io(cause)));
        assert_eq!(err.category(), ErrorCategory::Network);
        assert!(err.to_string().contains("token file missing"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::ClassNotFound("arcane-stream-mock".to_string());
        assert!(err.to_string().contains("arcane-stream-mock"));

        let err = Error::Conflict("ns/name".to_string());
        assert!(err.to_string().contains("modified"));
    }

    #[test]
    fn test_error_category_display() {
        let display = format!("{}", ErrorCategory::Conflict);
        assert!(display.contains("concurrently"));
        assert!(!ErrorCategory::Network.advice().is_empty());
    }
}
