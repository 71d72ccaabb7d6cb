//! Error types for wrapped invocations
//!
//! Wrappers absorb the wrapped operation's own errors and re-signal only
//! success or failure at their boundary. The variants here are everything a
//! caller of a wrapper can observe.

use thiserror::Error;

/// Result type alias for wrapper construction and wrapped calls.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for callguard.
#[derive(Debug, Error)]
pub enum Error {
    /// A wrapper was built without a required part (operation or receiver),
    /// or a configuration value could not be parsed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The guarded operation failed. The original reason is not carried.
    #[error("Operation failed")]
    OperationFailed,

    /// Every attempt of a retried call failed.
    ///
    /// Only the final attempt's error is kept.
    #[error("Operation failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        /// Total number of attempts made, including the first
        attempts: u32,
        /// Error of the last attempt
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A wrapped operation was called outside a Tokio runtime.
    #[error("No async runtime available to dispatch the invocation")]
    NoRuntime,

    /// The dispatched invocation was torn down before it settled.
    #[error("Invocation aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Check if this error came from a failed operation, as opposed to a
    /// construction or runtime problem.
    pub fn is_operation_failure(&self) -> bool {
        matches!(
            self,
            Self::OperationFailed | Self::RetriesExhausted { .. }
        )
    }

    /// Number of attempts made before giving up, if this is a retry failure.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
