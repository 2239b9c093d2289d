//! Example of exposing host values and functions to scripts.
//!
//! Run with: cargo run --example host_functions

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use script_sandbox_rs::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Host Functions Example ===\n");

    let limits = ExecutionLimits::builder()
        .timeout(Duration::from_secs(5))
        .build();
    let mut engine = SandboxedEngine::new(limits)?;

    // Values are copied in as script literals
    engine.set_global_value("tenant", "acme")?;
    engine.set_global_value("started", Utc::now())?;
    engine.set_global_value(
        "settings",
        HostValue::record([("threshold", HostValue::from(10)), ("verbose", false.into())]),
    )?;

    // Functions are called back with marshalled arguments
    engine.set_global_function("lookup_price", |args: &[HostValue]| -> anyhow::Result<HostValue> {
        let sku = args
            .first()
            .and_then(HostValue::as_str)
            .context("lookup_price expects a SKU string")?;
        match sku {
            "apple" => Ok(1.25.into()),
            "pear" => Ok(2.5.into()),
            other => anyhow::bail!("unknown SKU {other}"),
        }
    })?;

    engine.execute(
        r#"
        fn basket_total(items) {
            let total = 0.0;
            for sku in items {
                total += lookup_price(sku);
            }
            total
        }
        "#,
    )?;

    println!("--- Registered bindings ---");
    for (name, kind) in engine.bindings() {
        println!("  {name}: {kind:?}");
    }

    println!("\n--- Calling into the host ---");
    let total = engine.evaluate(r#"basket_total(["apple", "pear", "apple"])"#)?;
    println!("basket_total = {:?}", total);

    let started = engine.evaluate("started.year")?;
    println!("started.year = {:?}", started);

    println!("\n--- Static inspection ---");
    println!(
        "basket_total uses lookup_price: {}",
        engine.has_function_variable("basket_total", "lookup_price")
    );
    println!(
        "basket_total uses tenant: {}",
        engine.has_function_variable("basket_total", "tenant")
    );

    println!("\n--- Host failure ---");
    match engine.evaluate(r#"basket_total(["apple", "durian"])"#) {
        Ok(value) => println!("unexpected success: {:?}", value),
        Err(e) => {
            println!("{}", e);
            println!("{}", e.details());
        }
    }

    Ok(())
}
