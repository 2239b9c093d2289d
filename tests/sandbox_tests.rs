//! Behavioral tests for evaluation, bindings, marshalling and error reporting.

use std::time::Duration;

use anyhow::Context;
use chrono::{TimeZone, Utc};
use script_sandbox_rs::prelude::*;
use script_sandbox_rs::{BindingKind, MemoryLoader};

fn engine() -> SandboxedEngine {
    let limits = ExecutionLimits::builder()
        .timeout(Duration::from_secs(5))
        .recursion_depth(16)
        .build();
    SandboxedEngine::new(limits).unwrap()
}

fn number(value: &HostValue) -> f64 {
    value.as_number().unwrap()
}

#[test]
fn test_script_function_is_callable_later() {
    let mut engine = engine();
    engine.execute("fn double(n) { return n * 2; }").unwrap();

    let result = engine.evaluate("double(21)").unwrap();
    assert_eq!(result, HostValue::Number(42.0));
}

#[test]
fn test_globals_persist_across_calls() {
    let mut engine = engine();
    engine.execute("let total = 10;").unwrap();
    engine.execute("total += 5;").unwrap();

    assert_eq!(engine.get_global_value("total").unwrap(), HostValue::Number(15.0));
    assert!(engine.has_global_value("total"));
}

#[test]
fn test_host_function_returning_records() {
    let mut engine = engine();
    engine
        .set_global_function("rows", |_: &[HostValue]| -> anyhow::Result<HostValue> {
            Ok(HostValue::list([
                HostValue::record([("a", 1)]),
                HostValue::record([("a", 2)]),
            ]))
        })
        .unwrap();

    let result = engine.evaluate("rows()").unwrap();
    let list = result.as_list().unwrap();
    assert_eq!(list.len(), 2);
    for (index, expected) in [1.0, 2.0].into_iter().enumerate() {
        let row = list.get(index).unwrap();
        let record = row.as_record().unwrap();
        assert_eq!(record.keys(), vec!["a"]);
        assert_eq!(record.get("a"), Some(HostValue::Number(expected)));
    }
}

#[test]
fn test_host_function_arguments() {
    let mut engine = engine();
    engine
        .set_global_function("describe", |args: &[HostValue]| -> anyhow::Result<HostValue> {
            let person = args[0].as_record().context("expected a record")?;
            let name = person.get("name").unwrap_or_default();
            let times = args[1].as_number().context("expected a number")?;
            Ok(format!("{}x{}", name.as_str().unwrap_or("?"), times).into())
        })
        .unwrap();

    let result = engine.evaluate(r#"describe(#{ name: "ada" }, 3)"#).unwrap();
    assert_eq!(result, HostValue::from("adax3"));

    let arity = engine
        .set_global_function("count", |args: &[HostValue]| -> anyhow::Result<HostValue> {
            Ok(HostValue::from(args.len() as u32))
        })
        .and_then(|_| engine.evaluate("count() + count(1, 2, 3, 4, 5, 6, 7, 8)"))
        .unwrap();
    assert_eq!(arity, HostValue::Number(8.0));
}

#[test]
fn test_arrays_of_records_are_lists_at_any_depth() {
    let mut engine = engine();
    let result = engine
        .evaluate(r#"#{ outer: #{ rows: [#{ a: 1 }, #{ a: [#{ b: 2 }] }] } }"#)
        .unwrap();

    let outer = result.as_record().unwrap().get("outer").unwrap();
    let rows = outer.as_record().unwrap().get("rows").unwrap();
    let rows = rows.as_list().unwrap();
    assert_eq!(rows.len(), 2);

    let nested = rows.get(1).unwrap().as_record().unwrap().get("a").unwrap();
    let nested = nested.as_list().unwrap();
    let inner = nested.get(0).unwrap();
    assert_eq!(inner.as_record().unwrap().get("b"), Some(HostValue::Number(2.0)));
}

#[test]
fn test_self_referencing_record_is_rejected() {
    let mut engine = engine();
    let record = HostRecord::new();
    record.insert("id", 7);
    record.insert("self", record.clone());

    let error = engine.set_global_value("r", record.clone()).unwrap_err();
    assert!(error.is_self_reference());
    assert!(error.message().contains("'self'"), "{}", error.message());
    assert!(error.message().contains("'r'"), "{}", error.message());
    record.remove("self");

    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.get_global_value("r").unwrap(), HostValue::Null);
}

#[test]
fn test_nested_self_reference_names_field() {
    let mut engine = engine();
    let root = HostRecord::new();
    let child = HostRecord::new();
    child.insert("parent", root.clone());
    root.insert("child", child.clone());

    let error = engine.set_global_value("tree", root.clone()).unwrap_err();
    assert!(error.is_self_reference());
    assert!(error.message().contains("'parent'"));
    child.remove("parent");
}

#[test]
fn test_round_trip_through_globals() {
    let mut engine = engine();
    let when = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 0).unwrap();
    let value = HostValue::record([
        ("name", HostValue::from("report \"Q1\"\n")),
        ("count", HostValue::from(3)),
        ("ratio", HostValue::from(0.75)),
        ("active", HostValue::from(true)),
        ("missing", HostValue::Null),
        ("when", HostValue::from(when)),
        (
            "rows",
            HostValue::list([HostValue::record([("a", 1)]), HostValue::list([1, 2])]),
        ),
    ]);

    engine.set_global_value("config", value.clone()).unwrap();
    assert_eq!(engine.get_global_value("config").unwrap(), value);
}

#[test]
fn test_dates_are_native_inside_scripts() {
    let mut engine = engine();
    let when = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 0).unwrap();
    engine.set_global_value("when", when).unwrap();

    assert_eq!(engine.evaluate("when.year").unwrap(), HostValue::Number(2024.0));
    assert_eq!(engine.evaluate("when.month").unwrap(), HostValue::Number(3.0));
    assert_eq!(engine.evaluate("type_of(when)").unwrap(), HostValue::from("Date"));
    assert_eq!(engine.get_global_value("when").unwrap(), HostValue::DateTime(when));
}

#[test]
fn test_later_binding_shadows_earlier() {
    let mut engine = engine();
    engine.set_global_value("limit", 1).unwrap();
    engine.set_global_value("limit", 2).unwrap();

    assert_eq!(engine.evaluate("limit * 10").unwrap(), HostValue::Number(20.0));
    let bindings: Vec<_> = engine.bindings().collect();
    assert_eq!(bindings, [("limit", BindingKind::Value)]);
}

#[test]
fn test_get_global_value_edge_cases() {
    let mut engine = engine();
    assert_eq!(engine.get_global_value("nothing").unwrap(), HostValue::Null);
    assert!(!engine.has_global_value("nothing"));

    engine.execute("fn helper() { 1 }").unwrap();
    assert!(engine.has_global_value("helper"));
    assert_eq!(
        engine.get_global_value("helper").unwrap(),
        HostValue::Function(FunctionRef::new("helper"))
    );
}

#[test]
fn test_has_function_variable() {
    let mut engine = engine();
    engine
        .execute(
            r#"
            fn calc(items) {
                let total = 0;
                for item in items {
                    if item.price > 0 {
                        total += item.price * factor();
                    }
                }
                total
            }
            "#,
        )
        .unwrap();

    assert!(engine.has_function_variable("calc", "items"));
    assert!(engine.has_function_variable("calc", "total"));
    assert!(engine.has_function_variable("calc", "item"));
    assert!(engine.has_function_variable("calc", "factor"));
    assert!(!engine.has_function_variable("calc", "discount"));
    assert!(!engine.has_function_variable("missing", "items"));

    // Inspection never runs the body, so the undefined `factor` is harmless.
    assert_eq!(engine.state(), EngineState::Ready);
}

#[test]
fn test_thrown_error_record_is_unwrappable() {
    let mut engine = engine();
    let error = engine
        .execute(r#"throw #{ name: "ValidationError", message: "amount must be positive" };"#)
        .unwrap_err();

    assert_eq!(error.kind(), ScriptErrorKind::RuntimeError);
    assert_eq!(error.message(), "ValidationError: amount must be positive");

    let record = SandboxedEngine::unwrap_exception(&error).unwrap();
    assert_eq!(
        record.get("name"),
        Some(&ScriptValue::String("ValidationError".into()))
    );
}

#[test]
fn test_interpreter_failures_are_not_unwrappable() {
    let mut engine = engine();

    let thrown_string = engine.execute(r#"throw "plain";"#).unwrap_err();
    assert!(SandboxedEngine::unwrap_exception(&thrown_string).is_none());

    let unnamed = engine.execute("throw #{ code: 1 };").unwrap_err();
    assert!(SandboxedEngine::unwrap_exception(&unnamed).is_none());

    let undefined = engine.evaluate("nobody + 1").unwrap_err();
    assert_eq!(undefined.kind(), ScriptErrorKind::RuntimeError);
    assert!(SandboxedEngine::unwrap_exception(&undefined).is_none());

    let unknown_fn = engine.evaluate("nobody_fn()").unwrap_err();
    assert_eq!(unknown_fn.kind(), ScriptErrorKind::RuntimeError);
    assert!(SandboxedEngine::unwrap_exception(&unknown_fn).is_none());
}

#[test]
fn test_syntax_error_location() {
    let mut engine = engine();
    let error = engine.execute("let a = 1;\nlet b = ;").unwrap_err();

    assert_eq!(error.kind(), ScriptErrorKind::SyntaxError);
    assert_eq!(error.line(), Some(2));
    assert!(error.column().is_some());
    assert!(error.to_string().contains("line 2"));
}

#[test]
fn test_runtime_error_call_stack() {
    let mut engine = engine();
    engine
        .execute(
            r#"
            fn inner() { throw "boom"; }
            fn outer() { inner() }
            "#,
        )
        .unwrap();

    let error = engine.evaluate("outer()").unwrap_err();
    assert_eq!(error.call_stack(), ["outer", "inner"]);
    assert!(error.details().contains("Call stack: outer -> inner"));
}

#[test]
fn test_host_failure_chain() {
    let mut engine = engine();
    engine
        .set_global_function("fetch", |_: &[HostValue]| -> anyhow::Result<HostValue> {
            Err(anyhow::anyhow!("connection refused")).context("Failed to download CSV")
        })
        .unwrap();
    engine.execute("fn load() { fetch() }").unwrap();

    let error = engine.evaluate("load()").unwrap_err();
    assert!(error.is_host_binding());
    assert_eq!(error.call_stack(), ["load"]);
    let failure = error.host_failure().unwrap();
    assert_eq!(failure.function, "fetch");
    assert_eq!(failure.messages[0], "Failed to download CSV");
    assert_eq!(failure.innermost(), Some("connection refused"));
    assert!(SandboxedEngine::unwrap_exception(&error).is_none());

    let source = std::error::Error::source(&error).unwrap();
    assert_eq!(source.to_string(), "Failed to download CSV");
    assert_eq!(engine.state(), EngineState::Ready);
}

#[test]
fn test_host_failure_can_be_caught_by_script() {
    let mut engine = engine();
    engine
        .set_global_function("fetch", |_: &[HostValue]| -> anyhow::Result<HostValue> {
            anyhow::bail!("offline")
        })
        .unwrap();

    let result = engine
        .evaluate(
            r#"
            let outcome = "";
            try { fetch(); } catch (err) { outcome = `${err.name} in ${err.function}: ${err.message}`; }
            outcome
            "#,
        )
        .unwrap();
    assert_eq!(result, HostValue::from("HostBindingError in fetch: offline"));
}

#[test]
fn test_execute_file() {
    let loader = MemoryLoader::new().with_script(
        "init.rhai",
        "let greeting = \"hello\";\nfn greet(prefix, n) { prefix + \", \" + n }",
    );
    let mut engine = engine().with_loader(loader);

    engine.execute_file("init.rhai").unwrap();
    assert_eq!(
        engine.evaluate(r#"greet(greeting, "bob")"#).unwrap(),
        HostValue::from("hello, bob")
    );

    let error = engine.execute_file("absent.rhai").unwrap_err();
    assert_eq!(error.kind(), ScriptErrorKind::SourceUnavailable);
    assert_eq!(engine.state(), EngineState::Ready);
}

#[test]
fn test_numbers_keep_their_value() {
    let mut engine = engine();
    assert_eq!(number(&engine.evaluate("7 / 2").unwrap()), 3.0);
    assert_eq!(number(&engine.evaluate("7.0 / 2.0").unwrap()), 3.5);

    engine.set_global_value("big", 1e300).unwrap();
    assert_eq!(number(&engine.get_global_value("big").unwrap()), 1e300);

    engine.set_global_value("tiny", -2.5e-7).unwrap();
    assert_eq!(number(&engine.get_global_value("tiny").unwrap()), -2.5e-7);
}

fn nested_lists(levels: usize) -> HostValue {
    let mut value = HostValue::from(1);
    for _ in 0..levels {
        value = HostValue::list([value]);
    }
    value
}

#[test]
fn test_record_keys_keep_host_order() {
    let mut engine = engine();
    let value = HostValue::record([("zeta", 1), ("alpha", 2), ("mid", 3)]);
    engine.set_global_value("config", value).unwrap();

    let config = engine.get_global_value("config").unwrap();
    assert_eq!(config.as_record().unwrap().keys(), vec!["zeta", "alpha", "mid"]);

    engine
        .set_global_function("rows", |_: &[HostValue]| -> anyhow::Result<HostValue> {
            Ok(HostValue::list([HostValue::record([
                ("name", HostValue::from("a")),
                ("id", HostValue::from(1)),
            ])]))
        })
        .unwrap();
    let rows = engine.evaluate("rows()").unwrap();
    let row = rows.as_list().unwrap().get(0).unwrap();
    assert_eq!(row.as_record().unwrap().keys(), vec!["name", "id"]);

    let literal = engine.evaluate(r#"#{ when: 1, what: "x", who: () }"#).unwrap();
    assert_eq!(literal.as_record().unwrap().keys(), vec!["when", "what", "who"]);
}

#[test]
fn test_deeply_nested_lists_round_trip() {
    let mut engine = SandboxedEngine::new(ExecutionLimits::default()).unwrap();
    let value = nested_lists(40);

    engine.set_global_value("deep", value.clone()).unwrap();
    assert_eq!(engine.get_global_value("deep").unwrap(), value);
    assert_eq!(engine.state(), EngineState::Ready);
}

#[test]
fn test_nesting_past_recursion_depth_is_rejected() {
    let mut engine = engine();
    let error = engine.set_global_value("deep", nested_lists(30)).unwrap_err();
    assert!(error.is_self_reference(), "{error}");
    assert_eq!(engine.state(), EngineState::Ready);
}

#[test]
fn test_has_function_variable_sees_closures() {
    let mut engine = engine();
    engine
        .execute("fn f(items) { items.map(|x| helper(x)) }")
        .unwrap();

    assert!(engine.has_function_variable("f", "items"));
    assert!(engine.has_function_variable("f", "helper"));
    assert!(engine.has_function_variable("f", "x"));
    assert!(!engine.has_function_variable("f", "other"));
}
