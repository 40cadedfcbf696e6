//! Basic circuit breaker usage example
//!
//! Run with `RUST_LOG=debug` to see the breaker's own log lines.

use durable_breaker::{CircuitBreaker, MemoryStore, RemoteCircuitBreaker};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Circuit Breaker Basic Example ===\n");

    // Create a circuit with builder API
    let mut circuit = CircuitBreaker::builder("payment_api")
        .failure_threshold(3)
        .reset_timeout_ms(200)
        .success_threshold(2)
        .on_open(|name| println!("🔴 Circuit '{}' opened!", name))
        .on_close(|name| println!("🟢 Circuit '{}' closed!", name))
        .on_half_open(|name| println!("🟡 Circuit '{}' half-open, testing...", name))
        .build();

    println!("Initial state: {}\n", circuit.status());

    println!("--- Successful calls ---");
    for i in 1..=2 {
        match circuit.call(move || Ok::<_, String>(format!("Payment {}", i))) {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ Error: {}", e),
        }
    }
    println!("State: {}\n", circuit.status());

    println!("--- Triggering failures ---");
    for i in 1..=3 {
        match circuit.call(move || Err::<String, _>(format!("Payment failed {}", i))) {
            Ok(_) => println!("✓ Success"),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("State: {} (circuit opened)\n", circuit.status());

    println!("--- Attempting call while open ---");
    match circuit.call(|| Ok::<_, String>("Should be rejected")) {
        Ok(_) => println!("✓ Success"),
        Err(e) => println!("✗ {}", e),
    }
    println!();

    // Share the open state through a store
    println!("--- Persisting state ---");
    let store = Arc::new(MemoryStore::new());
    let mut remote = RemoteCircuitBreaker::new(circuit, store.clone())?;
    let version = remote.safe_save().await?;
    println!("Saved as version {}", version);

    let mut replica = RemoteCircuitBreaker::new(CircuitBreaker::builder("payment_api").build(), store)?;
    replica.refresh().await?;
    println!("Replica state after refresh: {}\n", replica.status());

    println!("--- Waiting for the reset timeout ---");
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    for _ in 0..2 {
        remote.can_execute()?;
        remote.record_success();
    }
    remote.save().await?;
    println!("State after trial calls: {}", remote.status());

    Ok(())
}
