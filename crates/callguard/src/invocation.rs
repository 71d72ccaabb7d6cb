//! The future returned by every wrapped call.

use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Outcome of calling a wrapped operation.
///
/// An `Invocation` is in one of three shapes:
///
/// - **dispatched**: the operation was started on the Tokio runtime at call
///   time. Awaiting yields its outcome. Dropping the `Invocation` does not
///   stop the operation; it always runs to completion.
/// - **gated**: a [`SingleFlightGuard`](crate::guard::SingleFlightGuard)
///   refused the call. The future **never settles**. Awaiting it without an
///   external timeout hangs forever. Use [`Invocation::is_gated`] to detect
///   this without polling.
/// - **ready**: the call was resolved immediately, e.g. with
///   [`Error::NoRuntime`].
///
/// A panic inside the wrapped operation is resumed on the task awaiting
/// the `Invocation`.
#[derive(Debug)]
#[must_use = "a dispatched invocation runs regardless, but its outcome is only observable by awaiting"]
pub struct Invocation {
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    Gated,
    Dispatched(JoinHandle<Result<()>>),
    Ready(Option<Result<()>>),
}

impl Invocation {
    pub(crate) fn gated() -> Self {
        Self {
            inner: Inner::Gated,
        }
    }

    pub(crate) fn dispatched(handle: JoinHandle<Result<()>>) -> Self {
        Self {
            inner: Inner::Dispatched(handle),
        }
    }

    pub(crate) fn ready(result: Result<()>) -> Self {
        Self {
            inner: Inner::Ready(Some(result)),
        }
    }

    /// Returns `true` if this call was gated and will never settle.
    pub fn is_gated(&self) -> bool {
        matches!(self.inner, Inner::Gated)
    }

    /// Returns `true` if the operation was actually started for this call.
    pub fn is_dispatched(&self) -> bool {
        matches!(self.inner, Inner::Dispatched(_))
    }
}

impl Future for Invocation {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match &mut this.inner {
            // No waker is registered: nothing will ever complete this call.
            Inner::Gated => Poll::Pending,

            Inner::Dispatched(handle) => match Pin::new(handle).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(err)) if err.is_panic() => {
                    std::panic::resume_unwind(err.into_panic())
                }
                Poll::Ready(Err(err)) => Poll::Ready(Err(Error::Aborted(err.to_string()))),
            },

            Inner::Ready(result) => match result.take() {
                Some(result) => Poll::Ready(result),
                None => panic!("`Invocation` polled after completion"),
            },
        }
    }
}

/// Handle to the ambient Tokio runtime, used to dispatch invocations.
pub(crate) fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|_| Error::NoRuntime)
}
