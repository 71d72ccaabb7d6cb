//! Applying wrappers to free functions and bound methods.
//!
//! A [`Decorator`] turns an operation into a wrapped one. The two helpers
//! differ only in the receiver the operation is bound to:
//!
//! - [`decorate_function`] binds the unit receiver `()`.
//! - [`decorate_method`] binds the receiver passed by the caller.
//!
//! ```rust
//! use callguard::config::RetryConfig;
//! use callguard::decorate::{decorate_method, RetryDecorator};
//! use std::sync::Arc;
//!
//! struct Mailer {
//!     host: String,
//! }
//!
//! let mailer = Arc::new(Mailer { host: "smtp.local".into() });
//! let send = decorate_method(
//!     |mailer: Arc<Mailer>, to: &'static str| async move {
//!         println!("sending to {to} via {}", mailer.host);
//!         Ok::<_, std::io::Error>(())
//!     },
//!     RetryDecorator::new(RetryConfig::new(3)),
//!     mailer,
//! )
//! .unwrap();
//!
//! assert_eq!(send.config().retry_count, 3);
//! ```

use crate::config::RetryConfig;
use crate::error::Result;
use crate::guard::SingleFlightGuard;
use crate::retry::BoundedRetry;
use std::sync::Arc;

/// Something that wraps an operation bound to a receiver of type `R`.
pub trait Decorator<R, F> {
    /// The wrapped operation.
    type Output;

    /// Wrap `operation`, binding `receiver` as its execution context.
    fn decorate(self, receiver: Arc<R>, operation: F) -> Result<Self::Output>;
}

/// Decorator producing a [`SingleFlightGuard`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OnceDecorator;

impl<R, F> Decorator<R, F> for OnceDecorator {
    type Output = SingleFlightGuard<R, F>;

    fn decorate(self, receiver: Arc<R>, operation: F) -> Result<Self::Output> {
        SingleFlightGuard::builder()
            .receiver(receiver)
            .operation(operation)
            .build()
    }
}

/// Decorator producing a [`BoundedRetry`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryDecorator {
    config: RetryConfig,
}

impl RetryDecorator {
    /// Decorator retrying according to `config`.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl<R, F> Decorator<R, F> for RetryDecorator {
    type Output = BoundedRetry<R, F>;

    fn decorate(self, receiver: Arc<R>, operation: F) -> Result<Self::Output> {
        BoundedRetry::builder()
            .receiver(receiver)
            .operation(operation)
            .config(self.config)
            .build()
    }
}

/// Wrap a free-standing operation.
pub fn decorate_function<F, D>(operation: F, decorator: D) -> Result<D::Output>
where
    D: Decorator<(), F>,
{
    decorator.decorate(Arc::new(()), operation)
}

/// Wrap an operation with `receiver` bound as its execution context.
pub fn decorate_method<R, F, D>(operation: F, decorator: D, receiver: Arc<R>) -> Result<D::Output>
where
    D: Decorator<R, F>,
{
    decorator.decorate(receiver, operation)
}
