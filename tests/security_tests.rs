//! Security tests to verify sandbox isolation and limit enforcement.
//!
//! These tests drive scripts into every resource ceiling and try the usual
//! escape routes to verify the sandbox contains them.

use std::time::{Duration, Instant};

use script_sandbox_rs::prelude::*;

/// Helper to create test limits.
fn test_limits() -> ExecutionLimits {
    ExecutionLimits::builder()
        .timeout(Duration::from_secs(5))
        .recursion_depth(8)
        .memory_bytes(32 * 1024 * 1024)
        .build()
}

fn test_engine() -> SandboxedEngine {
    SandboxedEngine::new(test_limits()).unwrap()
}

/// Check that a faulted engine refuses every further call.
fn assert_faulted(engine: &mut SandboxedEngine) {
    assert_eq!(engine.state(), EngineState::Faulted);
    assert!(engine.evaluate("1").unwrap_err().is_faulted());
    assert!(engine.execute("let y = 1;").unwrap_err().is_faulted());
    assert!(engine.get_global_value("x").unwrap_err().is_faulted());
    assert!(engine.set_global_value("x", 1).unwrap_err().is_faulted());
    assert!(engine
        .set_global_function("f", |_: &[HostValue]| -> anyhow::Result<HostValue> {
            Ok(HostValue::Null)
        })
        .unwrap_err()
        .is_faulted());
    assert!(!engine.has_global_value("x"));
    assert!(!engine.has_function_variable("f", "n"));
}

/// Test that infinite loops are properly terminated.
#[test]
fn test_infinite_loop_timeout() {
    let limits = ExecutionLimits::builder()
        .timeout(Duration::from_millis(100))
        .build();
    let mut engine = SandboxedEngine::new(limits).unwrap();
    engine.execute("let x = 0;").unwrap();

    let started = Instant::now();
    let error = engine.execute("loop { x += 1; }").unwrap_err();
    assert!(error.is_timeout(), "infinite loop should time out: {error}");
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_faulted(&mut engine);
}

/// Test that runaway recursion is stopped at the depth ceiling.
#[test]
fn test_recursion_limit() {
    let mut engine = test_engine();
    engine.execute("fn dive(n) { dive(n + 1) }").unwrap();

    let error = engine.evaluate("dive(0)").unwrap_err();
    assert!(error.is_recursion_limit(), "recursion should be capped: {error}");
    assert!(error.message().contains('8'));

    assert_faulted(&mut engine);
}

/// Test that recursion within the ceiling is fine.
#[test]
fn test_recursion_within_limit() {
    let mut engine = test_engine();
    engine
        .execute("fn fact(n) { if n <= 1 { 1 } else { n * fact(n - 1) } }")
        .unwrap();

    assert_eq!(engine.evaluate("fact(5)").unwrap(), HostValue::Number(120.0));
    assert_eq!(engine.state(), EngineState::Ready);
}

/// Test memory exhaustion protection for strings.
#[test]
fn test_string_memory_exhaustion() {
    let limits = ExecutionLimits::builder().memory_bytes(1024).build();
    let mut engine = SandboxedEngine::new(limits).unwrap();

    let error = engine
        .execute(r#"let s = "abcdefgh"; loop { s += s; }"#)
        .unwrap_err();
    assert!(error.is_memory_limit(), "string growth should be capped: {error}");

    assert_faulted(&mut engine);
}

/// Test memory exhaustion protection for arrays.
#[test]
fn test_array_memory_exhaustion() {
    let limits = ExecutionLimits::builder().memory_bytes(1024).build();
    let mut engine = SandboxedEngine::new(limits).unwrap();

    let error = engine
        .execute("let data = []; loop { data.push(1); }")
        .unwrap_err();
    assert!(error.is_memory_limit(), "array growth should be capped: {error}");
}

/// Test memory exhaustion protection for maps grown by index assignment.
#[test]
fn test_map_memory_exhaustion() {
    let limits = ExecutionLimits::builder().memory_bytes(4096).build();
    let mut engine = SandboxedEngine::new(limits).unwrap();

    let started = Instant::now();
    let error = engine
        .execute("let m = #{}; let i = 0; while i < 5000 { m[`k${i}`] = i; i += 1; }")
        .unwrap_err();
    assert!(error.is_memory_limit(), "map growth should be capped: {error}");
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_faulted(&mut engine);
}

/// Test that ordinary failures do not fault the engine.
#[test]
fn test_non_limit_failures_keep_engine_usable() {
    let mut engine = test_engine();

    assert_eq!(
        engine.execute("let = ;").unwrap_err().kind(),
        ScriptErrorKind::SyntaxError
    );
    assert_eq!(
        engine.execute(r#"throw "nope";"#).unwrap_err().kind(),
        ScriptErrorKind::RuntimeError
    );

    let record = HostRecord::new();
    record.insert("self", record.clone());
    let error = engine.set_global_value("r", record.clone()).unwrap_err();
    assert!(error.is_self_reference());
    record.remove("self");

    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.evaluate("40 + 2").unwrap(), HostValue::Number(42.0));
}

/// Test that eval is not available to scripts.
#[test]
fn test_eval_blocked() {
    let mut engine = test_engine();

    let error = engine.evaluate(r#"eval("40 + 2")"#).unwrap_err();
    assert_eq!(error.kind(), ScriptErrorKind::SyntaxError);
}

/// Test that there is no filesystem or process access from scripts.
#[test]
fn test_host_access_blocked() {
    let mut engine = test_engine();

    for script in [
        r#"open("/etc/passwd")"#,
        r#"read_file("/etc/passwd")"#,
        r#"system("echo BREACH")"#,
        r#"import "os" as os;"#,
    ] {
        let error = engine.execute(script).unwrap_err();
        assert!(
            matches!(
                error.kind(),
                ScriptErrorKind::RuntimeError | ScriptErrorKind::SyntaxError
            ),
            "{script} should fail: {error}"
        );
    }
    assert_eq!(engine.state(), EngineState::Ready);
}

/// Test that binding names cannot smuggle code into the declaration.
#[test]
fn test_binding_name_injection() {
    let mut engine = test_engine();

    for name in ["", "   ", "x = 1; let pwned", "a.b", "x\n"] {
        let error = engine.set_global_value(name, 1).unwrap_err();
        assert_eq!(error.kind(), ScriptErrorKind::InvalidBindingNameError);
    }
    assert!(!engine.has_global_value("pwned"));
}

/// Test that string values cannot break out of their literal.
#[test]
fn test_string_value_injection() {
    let mut engine = test_engine();
    let payload = "\"; let pwned = 1; let tail = \"\\";

    engine.set_global_value("note", payload).unwrap();
    assert!(!engine.has_global_value("pwned"));
    assert_eq!(engine.get_global_value("note").unwrap(), HostValue::from(payload));
}

/// Test that a blocked script cannot reach another engine's globals.
#[test]
fn test_instances_are_isolated() {
    let mut first = test_engine();
    let mut second = test_engine();

    first.set_global_value("secret", "s3cr3t").unwrap();
    assert!(!second.has_global_value("secret"));
    let error = second.evaluate("secret").unwrap_err();
    assert_eq!(error.kind(), ScriptErrorKind::RuntimeError);
}

/// Test that independent engines run concurrently, one per thread.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_engines() {
    let mut handles = Vec::new();
    for i in 0..8_i64 {
        handles.push(tokio::task::spawn_blocking(move || -> Result<f64> {
            let mut engine = SandboxedEngine::new(test_limits())?;
            engine.set_global_value("seed", i)?;
            engine.execute("fn square(n) { n * n }")?;
            let value = engine.evaluate("square(seed) + 1")?;
            Ok(value.as_number().unwrap_or(f64::NAN))
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let value = handle.await.unwrap().unwrap();
        let i = i as f64;
        assert_eq!(value, i * i + 1.0);
    }
}

/// Test that a faulted engine does not affect a fresh one on another thread.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fault_is_per_instance() {
    let faulted = tokio::task::spawn_blocking(|| -> Result<()> {
        let limits = ExecutionLimits::builder()
            .timeout(Duration::from_millis(50))
            .build();
        let mut engine = SandboxedEngine::new(limits)?;
        engine.execute("let n = 0; loop { n += 1; }")
    });
    let healthy = tokio::task::spawn_blocking(|| -> Result<HostValue> {
        let mut engine = SandboxedEngine::new(test_limits())?;
        engine.evaluate("[1, 2, 3].len()")
    });

    assert!(faulted.await.unwrap().unwrap_err().is_timeout());
    assert_eq!(healthy.await.unwrap().unwrap(), HostValue::Number(3.0));
}
