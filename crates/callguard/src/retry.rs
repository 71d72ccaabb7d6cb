//! Bounded retry on failure.
//!
//! Each call to a [`BoundedRetry`] invokes the operation, and on failure
//! invokes it again immediately, up to `retry_count` more times. There is no
//! delay between attempts.
//!
//! Attempt accounting lives in a [`RetryState`] owned by the call, so
//! concurrent calls to the same wrapper never share a budget.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::invocation::{Invocation, current_runtime};
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, debug, debug_span, warn};

/// Attempt accounting for a single external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    remaining_attempts: u32,
    attempts: u32,
}

impl RetryState {
    /// Fresh state for one call.
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            remaining_attempts: config.retry_count,
            attempts: 0,
        }
    }

    /// Count an attempt as started.
    ///
    /// The count saturates at `u32::MAX`.
    pub fn begin_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Record a failed attempt.
    ///
    /// Returns `true` if another attempt is allowed, consuming one unit of
    /// the remaining budget. The first attempt never draws on the budget.
    pub fn record_failure(&mut self) -> bool {
        if self.remaining_attempts > 0 {
            self.remaining_attempts -= 1;
            true
        } else {
            false
        }
    }

    /// Retries still available.
    pub fn remaining_attempts(&self) -> u32 {
        self.remaining_attempts
    }

    /// Attempts started so far, including the first.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Wraps an async operation so each call retries it on failure.
///
/// The operation is called as `operation(receiver, args)`. `args` is cloned
/// for every attempt, and every attempt re-runs the operation's side effects
/// in full; the operation must be safe to invoke again.
///
/// A call resolves to `Ok(())` on the first successful attempt. Once
/// `retry_count + 1` attempts have failed it resolves to
/// [`Error::RetriesExhausted`], carrying only the last attempt's error.
///
/// # Examples
///
/// ```rust
/// use callguard::config::RetryConfig;
/// use callguard::retry::BoundedRetry;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// # #[tokio::main]
/// # async fn main() -> callguard::Result<()> {
/// let attempts = Arc::new(AtomicU32::new(0));
/// let counter = Arc::clone(&attempts);
///
/// let fetch = BoundedRetry::new(
///     move |_: Arc<()>, url: &'static str| {
///         let attempt = counter.fetch_add(1, Ordering::SeqCst);
///         async move {
///             if attempt < 2 {
///                 Err(std::io::Error::other(format!("{url} unreachable")))
///             } else {
///                 Ok(())
///             }
///         }
///     },
///     RetryConfig::new(2),
/// );
///
/// fetch.call("https://example.com").await?;
/// assert_eq!(attempts.load(Ordering::SeqCst), 3);
/// # Ok(())
/// # }
/// ```
pub struct BoundedRetry<R, F> {
    operation: Arc<F>,
    receiver: Arc<R>,
    config: RetryConfig,
    name: Cow<'static, str>,
}

impl<F> BoundedRetry<(), F> {
    /// Retry a free-standing operation.
    pub fn new(operation: F, config: RetryConfig) -> Self {
        Self::with_receiver(Arc::new(()), operation, config)
    }

    /// Create a builder for configuring a retry wrapper.
    pub fn builder() -> BoundedRetryBuilder<(), F> {
        BoundedRetryBuilder::default()
    }
}

impl<R, F> BoundedRetry<R, F> {
    /// Retry an operation bound to `receiver`.
    pub fn with_receiver(receiver: Arc<R>, operation: F, config: RetryConfig) -> Self {
        Self {
            operation: Arc::new(operation),
            receiver,
            config,
            name: Cow::Borrowed("anonymous"),
        }
    }

    /// Call the operation, retrying on failure.
    ///
    /// The first attempt is invoked now and the attempt loop is dispatched
    /// onto the current Tokio runtime, so it runs to completion even if the
    /// returned [`Invocation`] is dropped. Outside a runtime the call
    /// resolves to [`Error::NoRuntime`] without invoking the operation.
    pub fn call<A, Fut, T, E>(&self, args: A) -> Invocation
    where
        F: Fn(Arc<R>, A) -> Fut + Send + Sync + 'static,
        R: Send + Sync + 'static,
        A: Clone + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let runtime = match current_runtime() {
            Ok(runtime) => runtime,
            Err(err) => return Invocation::ready(Err(err)),
        };

        let operation = Arc::clone(&self.operation);
        let receiver = Arc::clone(&self.receiver);
        let mut state = RetryState::new(&self.config);
        let span = debug_span!(
            "bounded_retry",
            operation = %self.name,
            retry_count = self.config.retry_count
        );

        let first = span.in_scope(|| {
            state.begin_attempt();
            operation(Arc::clone(&receiver), args.clone())
        });

        let handle = runtime.spawn(
            async move {
                let mut pending = first;
                loop {
                    match pending.await {
                        Ok(_) => {
                            debug!(attempts = state.attempts(), "Attempt succeeded");
                            return Ok(());
                        }
                        Err(err) if state.record_failure() => {
                            debug!(
                                attempt = state.attempts(),
                                remaining = state.remaining_attempts(),
                                error = %err,
                                "Attempt failed, retrying"
                            );
                            state.begin_attempt();
                            pending = operation(Arc::clone(&receiver), args.clone());
                        }
                        Err(err) => {
                            warn!(attempts = state.attempts(), error = %err, "Attempts exhausted");
                            return Err(Error::RetriesExhausted {
                                attempts: state.attempts(),
                                source: Box::new(err),
                            });
                        }
                    }
                }
            }
            .instrument(span),
        );

        Invocation::dispatched(handle)
    }

    /// The configuration fixed at construction.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// The receiver the operation is invoked with.
    pub fn receiver(&self) -> &Arc<R> {
        &self.receiver
    }

    /// Label used in log output.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<R, F> fmt::Debug for BoundedRetry<R, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedRetry")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`BoundedRetry`].
///
/// Uses [`RetryConfig::default`] (one retry) unless told otherwise.
#[derive(Debug)]
pub struct BoundedRetryBuilder<R, F> {
    receiver: Arc<R>,
    operation: Option<F>,
    config: RetryConfig,
    name: Option<Cow<'static, str>>,
}

impl<F> Default for BoundedRetryBuilder<(), F> {
    fn default() -> Self {
        Self {
            receiver: Arc::new(()),
            operation: None,
            config: RetryConfig::default(),
            name: None,
        }
    }
}

impl<R, F> BoundedRetryBuilder<R, F> {
    /// Bind the receiver the operation is invoked with.
    pub fn receiver<R2>(self, receiver: Arc<R2>) -> BoundedRetryBuilder<R2, F> {
        BoundedRetryBuilder {
            receiver,
            operation: self.operation,
            config: self.config,
            name: self.name,
        }
    }

    /// Set the operation to retry.
    pub fn operation(mut self, operation: F) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Set the number of retries after the first attempt.
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.config.retry_count = retry_count;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the label used in log output.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the retry wrapper.
    ///
    /// Fails with [`Error::InvalidArgument`] if no operation was set.
    pub fn build(self) -> Result<BoundedRetry<R, F>> {
        let operation = self
            .operation
            .ok_or_else(|| Error::invalid_argument("BoundedRetry requires an operation"))?;

        let mut retry = BoundedRetry::with_receiver(self.receiver, operation, self.config);
        if let Some(name) = self.name {
            retry.name = name;
        }
        Ok(retry)
    }
}
