//! Basic example of executing scripts in the sandbox.
//!
//! Run with: cargo run --example basic_execution
//!
//! Script `print` output goes to the log; set `RUST_LOG=script=info` to see it.

use std::time::Duration;

use script_sandbox_rs::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    // Configure the limits
    let limits = ExecutionLimits::builder()
        .timeout(Duration::from_secs(5))
        .recursion_depth(32)
        .memory_bytes(32 * 1024 * 1024) // 32MB
        .build();

    println!("Creating engine with limits: {:?}", limits);
    let mut engine = SandboxedEngine::new(limits)?;

    // Evaluate simple arithmetic
    println!("\n=== Test 1: Simple arithmetic ===");
    match engine.evaluate("1 + 1") {
        Ok(value) => println!("result: {:?}", value),
        Err(e) => eprintln!("Error: {}", e),
    }

    // Define a function, then call it later
    println!("\n=== Test 2: Functions persist ===");
    engine.execute("fn double(n) { n * 2 }")?;
    let doubled = engine.evaluate("double(21)")?;
    println!("double(21) = {:?}", doubled);

    // Loop with printed output
    println!("\n=== Test 3: Loop execution ===");
    let code = r#"
        let total = 0;
        for i in 0..5 {
            print(`Count: ${i}`);
            total += i;
        }
    "#;
    engine.execute(code)?;
    println!("total = {:?}", engine.get_global_value("total")?);

    // Records and lists come back as host values
    println!("\n=== Test 4: Structured results ===");
    let rows = engine.evaluate(r#"[#{ name: "a", size: 1 }, #{ name: "b", size: 2 }]"#)?;
    if let Some(list) = rows.as_list() {
        for row in list.lock().iter() {
            if let Some(record) = row.as_record() {
                println!("row {:?}: {:?}", record.get("name"), record.get("size"));
            }
        }
    }

    // Script errors are values, not panics
    println!("\n=== Test 5: Script error ===");
    match engine.execute(r#"throw "test error";"#) {
        Ok(()) => println!("unexpected success"),
        Err(e) => eprintln!("Execution error: {}", e),
    }

    Ok(())
}
