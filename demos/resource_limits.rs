//! Example demonstrating resource limiting capabilities.
//!
//! This example shows how to configure and handle:
//! - Timeouts for long-running code
//! - Recursion depth limits
//! - Memory limits
//! - The faulted state that follows any of them
//!
//! Run with: cargo run --example resource_limits

use std::time::{Duration, Instant};

use script_sandbox_rs::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Resource Limits Example ===\n");

    // Example 1: Timeout protection
    println!("--- Test 1: Timeout Protection ---");
    {
        let limits = ExecutionLimits::builder()
            .timeout(Duration::from_millis(500)) // Short timeout
            .build();
        let mut engine = SandboxedEngine::new(limits)?;

        println!("Executing infinite loop with 500ms timeout...");
        let started = Instant::now();
        match engine.execute("let n = 0; loop { n += 1; }") {
            Ok(()) => println!("Unexpected success"),
            Err(e) if e.is_timeout() => {
                println!("Timeout triggered as expected after {:?}: {}", started.elapsed(), e);
            }
            Err(e) => println!("Unexpected error: {}", e),
        }

        // The engine cannot be trusted any more
        println!("State: {:?}", engine.state());
        match engine.evaluate("1 + 1") {
            Ok(value) => println!("Unexpected success: {:?}", value),
            Err(e) => println!("Follow-up call refused: {}", e),
        }
    }
    println!();

    // Example 2: Recursion limits
    println!("--- Test 2: Recursion Limits ---");
    {
        let limits = ExecutionLimits::builder().recursion_depth(16).build();
        let mut engine = SandboxedEngine::new(limits)?;
        engine.execute("fn countdown(n) { if n == 0 { 0 } else { 1 + countdown(n - 1) } }")?;

        for depth in [10, 1000] {
            match engine.evaluate(&format!("countdown({depth})")) {
                Ok(value) => println!("countdown({depth}) = {:?}", value),
                Err(e) if e.is_recursion_limit() => println!("countdown({depth}) stopped: {}", e),
                Err(e) => println!("countdown({depth}) failed: {}", e),
            }
        }
    }
    println!();

    // Example 3: Memory limits
    println!("--- Test 3: Memory Limits ---");
    {
        let limits = ExecutionLimits::builder()
            .memory_bytes(64 * 1024) // 64KB - very small
            .build();
        let mut engine = SandboxedEngine::new(limits)?;

        println!("Attempting to grow a string with a 64KB limit...");
        match engine.execute(r#"let s = "x"; loop { s += s; }"#) {
            Ok(()) => println!("Unexpected success"),
            Err(e) if e.is_memory_limit() => println!("Memory limit triggered: {}", e),
            Err(e) => println!("Error: {}", e),
        }
    }
    println!();

    // Example 4: Limits that cannot be enforced
    println!("--- Test 4: Invalid Limits ---");
    {
        let limits = ExecutionLimits::builder().memory_bytes(0).build();
        match SandboxedEngine::new(limits) {
            Ok(_) => println!("Unexpected success"),
            Err(e) => println!("Rejected: {}", e),
        }
    }

    Ok(())
}
