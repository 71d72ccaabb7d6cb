//! Shared helpers for integration tests

#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing_subscriber::EnvFilter;

pub type BoxedOutcome = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// Install a test-writer subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Invocation counter shared between a test and its operation.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call, returning its 1-based ordinal.
    pub fn hit(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Operation that fails its first `failures` invocations, then succeeds.
pub fn flaky(
    failures: u32,
    counter: CallCounter,
) -> impl Fn(Arc<()>, ()) -> BoxedOutcome + Send + Sync + 'static {
    move |_, _| {
        let call = counter.hit();
        Box::pin(async move {
            if call <= failures {
                Err(io::Error::other(format!("call {call} failed")))
            } else {
                Ok(())
            }
        })
    }
}
