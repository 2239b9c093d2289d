//! Example demonstrating error handling patterns.
//!
//! This example shows how to handle the error kinds a host sees:
//! - Syntax errors
//! - Script-thrown error records
//! - Host function failures
//! - Self-referencing values
//! - Configuration errors
//!
//! Run with: cargo run --example error_handling

use std::time::Duration;

use script_sandbox_rs::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Error Handling Example ===\n");

    let limits = ExecutionLimits::builder()
        .timeout(Duration::from_secs(5))
        .build();
    let mut engine = SandboxedEngine::new(limits)?;

    // Example 1: Syntax error
    println!("--- Test 1: Syntax error ---");
    if let Err(e) = engine.execute("let x = ;\n") {
        println!("kind: {:?}", e.kind());
        println!("line: {:?}, column: {:?}", e.line(), e.column());
        println!("message: {}", e.message());
    }

    // Example 2: Domain error thrown by the script
    println!("\n--- Test 2: Thrown error record ---");
    engine.execute(
        r#"
        fn withdraw(balance, amount) {
            if amount > balance {
                throw #{ name: "InsufficientFunds", message: `need ${amount - balance} more` };
            }
            balance - amount
        }
        "#,
    )?;
    match engine.evaluate("withdraw(10, 25)") {
        Ok(value) => println!("unexpected success: {:?}", value),
        Err(e) => match SandboxedEngine::unwrap_exception(&e) {
            Some(record) => {
                println!("script raised {:?}", record.get("name"));
                println!("details: {:?}", record.get("message"));
                println!("call stack: {:?}", e.call_stack());
            }
            None => println!("interpreter failure: {}", e),
        },
    }

    // Example 3: Undefined references are runtime errors, not domain errors
    println!("\n--- Test 3: Undefined reference ---");
    if let Err(e) = engine.evaluate("balance + 1") {
        println!("kind: {:?}", e.kind());
        println!("unwrap_exception: {:?}", SandboxedEngine::unwrap_exception(&e));
    }

    // Example 4: Host function failure with a cause chain
    println!("\n--- Test 4: Host failure ---");
    engine.set_global_function("store", |_: &[HostValue]| -> anyhow::Result<HostValue> {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
        Err(anyhow::Error::new(io).context("could not persist result"))
    })?;
    if let Err(e) = engine.execute("store(42);") {
        println!("{}", e);
        if let Some(failure) = e.host_failure() {
            for (depth, message) in failure.messages.iter().enumerate() {
                println!("  cause {}: {}", depth, message);
            }
        }
    }

    // Example 5: Self-referencing host value
    println!("\n--- Test 5: Self reference ---");
    let node = HostRecord::new();
    node.insert("name", "loop");
    node.insert("self", node.clone());
    if let Err(e) = engine.set_global_value("node", node.clone()) {
        println!("kind: {:?}", e.kind());
        println!("message: {}", e.message());
    }
    node.remove("self");

    // Example 6: Configuration error
    println!("\n--- Test 6: Invalid limits ---");
    let invalid = ExecutionLimits::builder().timeout(Duration::ZERO).build();
    match SandboxedEngine::new(invalid) {
        Ok(_) => println!("unexpected success"),
        Err(e) => println!("{}", e),
    }

    println!("\nEngine state after all of the above: {:?}", engine.state());

    Ok(())
}
