//! Example of running scripts concurrently.
//!
//! Engines are single-threaded, so concurrency comes from running one engine
//! per blocking task.
//!
//! Run with: cargo run --example concurrent_execution

use std::time::{Duration, Instant};

use script_sandbox_rs::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Run one script on a fresh engine and render its result.
fn run_task(code: &str) -> Result<String> {
    let limits = ExecutionLimits::builder()
        .timeout(Duration::from_secs(10))
        .build();
    let mut engine = SandboxedEngine::new(limits)?;
    let value = engine.evaluate(code)?;
    Ok(format!("{:?}", value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .init();

    println!("=== Concurrent Execution Example ===\n");

    // Define some tasks to run concurrently
    let tasks = vec![
        (
            "Task 1",
            "let sum = 0; for i in 0..100 { sum += i * i; } sum",
            "Sum of squares",
        ),
        (
            "Task 2",
            "let count = 0; for x in 0..1000 { if x % 3 == 0 { count += 1; } } count",
            "Count divisible by 3",
        ),
        (
            "Task 3",
            r#"let s = ""; for i in 0..50 { s += `${i % 10}`; } s"#,
            "Generate digits",
        ),
        (
            "Task 4",
            "fn fib(n) { if n < 2 { n } else { fib(n - 1) + fib(n - 2) } } fib(20)",
            "Fibonacci",
        ),
    ];

    println!("Running {} tasks concurrently...\n", tasks.len());
    let started = Instant::now();

    let handles: Vec<_> = tasks
        .into_iter()
        .map(|(name, code, description)| {
            let handle = tokio::task::spawn_blocking(move || run_task(code));
            (name, description, handle)
        })
        .collect();

    for (name, description, handle) in handles {
        match handle.await? {
            Ok(result) => println!("{} ({}): {}", name, description, result),
            Err(e) => println!("{} ({}) failed: {}", name, description, e),
        }
    }

    println!("\nAll tasks finished in {:?}", started.elapsed());

    Ok(())
}
