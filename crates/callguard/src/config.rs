//! Configuration for retried operations

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Environment variable read by [`RetryConfig::from_env`].
pub const RETRY_COUNT_ENV: &str = "CALLGUARD_RETRY_COUNT";

/// Configuration for [`BoundedRetry`](crate::retry::BoundedRetry).
///
/// The count is the number of retries *after* the first attempt, so an
/// always-failing operation is invoked `retry_count + 1` times per call.
///
/// ```rust
/// use callguard::config::RetryConfig;
///
/// let config: RetryConfig = "3".parse().unwrap();
/// assert_eq!(config.retry_count, 3);
/// assert_eq!(RetryConfig::default().retry_count, 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub retry_count: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { retry_count: 1 }
    }
}

impl RetryConfig {
    /// Create a configuration with the given retry count.
    pub fn new(retry_count: u32) -> Self {
        Self { retry_count }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `CALLGUARD_RETRY_COUNT`. A missing variable yields the default;
    /// a value that is not a non-negative integer is rejected.
    #[cfg(feature = "env")]
    pub fn from_env() -> Result<Self> {
        match std::env::var(RETRY_COUNT_ENV) {
            Ok(value) => value.parse(),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(std::env::VarError::NotUnicode(_)) => Err(Error::invalid_argument(format!(
                "{RETRY_COUNT_ENV} is not valid unicode"
            ))),
        }
    }
}

impl FromStr for RetryConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .map(Self::new)
            .map_err(|e| Error::invalid_argument(format!("retry count {s:?}: {e}")))
    }
}
