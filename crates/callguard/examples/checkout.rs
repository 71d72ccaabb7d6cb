//! Example: guarding a checkout button and retrying a flaky payment gateway
//!
//! This example demonstrates:
//! 1. A single-flight guard swallowing double clicks
//! 2. Bounded retry around a flaky gateway, decorated as a method
//!
//! Run with:
//! ```bash
//! RUST_LOG=callguard=debug cargo run -p callguard --example checkout
//! ```

use callguard::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// A simulated payment gateway that drops the first few requests
struct Gateway {
    requests: AtomicU32,
    drop_first: u32,
}

impl Gateway {
    fn new(drop_first: u32) -> Self {
        Self {
            requests: AtomicU32::new(0),
            drop_first,
        }
    }

    async fn charge(self: Arc<Self>, cents: u64) -> std::io::Result<()> {
        let request = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(50)).await;

        if request <= self.drop_first {
            println!("  Request {request}: charge of {cents} cents DROPPED");
            Err(std::io::Error::other("gateway timeout"))
        } else {
            println!("  Request {request}: charged {cents} cents");
            Ok(())
        }
    }

    fn total_requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("\n=== Retrying a flaky gateway ===\n");

    let gateway = Arc::new(Gateway::new(2));
    let charge = decorate_method(
        Gateway::charge,
        RetryDecorator::new(RetryConfig::new(3)),
        Arc::clone(&gateway),
    )?;

    charge.call(1_999).await?;
    println!("Gateway saw {} request(s)", gateway.total_requests());

    println!("\n=== Guarding the checkout button ===\n");

    let button = SingleFlightGuard::builder()
        .name("checkout")
        .operation(move |_: Arc<()>, cents: u64| charge.call(cents))
        .build()?;

    let first_click = button.call(4_250);
    let double_click = button.call(4_250);
    println!("Double click gated: {}", double_click.is_gated());

    first_click.await?;
    println!("Checkout state: {:?}", button.state());
    println!("Later click gated: {}", button.call(4_250).is_gated());

    Ok(())
}
