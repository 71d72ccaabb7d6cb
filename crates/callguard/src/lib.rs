#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Invocation control for async operations.
//!
//! This crate provides two wrappers that change how an async operation may be
//! called repeatedly, without touching what the operation does:
//!
//! - **Single-flight gating** via [`SingleFlightGuard`]
//!   - At most one invocation in flight
//!   - A failure reopens the guard, a success closes it for good
//!   - Gated calls return a future that never settles
//! - **Bounded retry** via [`BoundedRetry`]
//!   - Immediate re-invocation on failure, `retry_count` times at most
//!   - Per-call attempt budget
//!
//! Both wrappers invoke the operation as `operation(receiver, args)`, with a
//! receiver captured at construction. The [`decorate`] module applies them to
//! free functions or bound methods.
//!
//! Invocations are dispatched onto the ambient Tokio runtime, so a started
//! operation always runs to completion.
//!
//! # Examples
//!
//! ```rust
//! use callguard::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> callguard::Result<()> {
//! let save = SingleFlightGuard::new(|_: Arc<()>, doc: &'static str| async move {
//!     println!("saving {doc}");
//!     Ok::<_, std::io::Error>(())
//! });
//!
//! let first = save.call("draft");
//! // Gated while the first call is in flight, and after it has succeeded.
//! assert!(save.call("draft").is_gated());
//! first.await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decorate;
pub mod error;
pub mod guard;
pub mod invocation;
pub mod retry;

pub use config::RetryConfig;
pub use error::{Error, Result};
pub use guard::SingleFlightGuard;
pub use invocation::Invocation;
pub use retry::BoundedRetry;

/// Convenient re-exports of commonly used items.
///
/// Import everything with:
///
/// ```rust
/// use callguard::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::RetryConfig;
    pub use crate::decorate::{
        Decorator, OnceDecorator, RetryDecorator, decorate_function, decorate_method,
    };
    pub use crate::error::{Error, Result};
    pub use crate::guard::{GuardPhase, GuardState, SingleFlightGuard};
    pub use crate::invocation::Invocation;
    pub use crate::retry::{BoundedRetry, RetryState};
}
