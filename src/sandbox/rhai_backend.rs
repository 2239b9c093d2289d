//! [`Interpreter`] implementation backed by the Rhai scripting engine.
//!
//! One [`RhaiInterpreter`] owns one Rhai [`Engine`], the persistent global
//! [`Scope`] and the accumulated function library. Everything a script defines
//! at the top level (variables through the scope, functions through the
//! library) stays visible to later calls on the same instance.
//!
//! Rhai object maps keep their keys sorted. The interpreter remembers the field
//! order of every record that enters it (host values, host function results and
//! record literals in scripts) and restores that order on the way out.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use anyhow::Context;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{
    Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, Map, OptimizationLevel, ParseError,
    ParseErrorType, Position, Scope, AST, INT,
};
use tracing::{debug, info, trace};

use crate::sandbox::config::ExecutionLimits;
use crate::sandbox::inspect;
use crate::sandbox::interpreter::{
    HostFunction, Interpreter, NativeValue, NativeView, MAX_HOST_ARGS,
};
use crate::sandbox::limits::{self, Deadline};
use crate::sandbox::marshal::{is_integral, FieldOrder, Marshaller};
use crate::sandbox::translate::{Fault, Location};
use crate::value::ScriptValue;

/// Script-visible type name of dates.
pub const DATE_TYPE_NAME: &str = "Date";

/// `name` field of the error record a failing host function throws.
pub const HOST_ERROR_NAME: &str = "HostBindingError";

/// Rhai interpreter with persistent globals and enforced limits.
pub struct RhaiInterpreter {
    engine: Engine,
    scope: Scope<'static>,
    library: AST,
    deadline: Deadline,
    timeout: std::time::Duration,
    marshaller: Marshaller,
    host_functions: HashSet<String>,
    failures: Rc<RefCell<HostFailureLog>>,
    field_order: Rc<RefCell<FieldOrder>>,
}

impl RhaiInterpreter {
    /// Create an interpreter enforcing `limits`.
    pub fn new(limits: &ExecutionLimits) -> Self {
        let mut engine = Engine::new();
        engine.set_strict_variables(true);
        engine.set_optimization_level(OptimizationLevel::None);
        engine.disable_symbol("eval");
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.on_print(|text| info!(target: "script", "{text}"));
        engine.on_debug(|text, source, pos| {
            debug!(target: "script", source = source.unwrap_or_default(), line = pos.line(), "{text}");
        });

        let deadline = Deadline::new();
        limits::install(&mut engine, limits, &deadline);
        register_date(&mut engine);

        Self {
            engine,
            scope: Scope::new(),
            library: AST::empty(),
            deadline,
            timeout: limits.timeout,
            marshaller: Marshaller::new(limits.recursion_depth),
            host_functions: HashSet::new(),
            failures: Rc::new(RefCell::new(HostFailureLog::default())),
            field_order: Rc::new(RefCell::new(FieldOrder::new())),
        }
    }

    fn has_function(&self, name: &str) -> bool {
        self.host_functions.contains(name) || self.library.iter_functions().any(|f| f.name == name)
    }

    fn classify(&self, error: Box<EvalAltResult>) -> Fault<Dynamic> {
        let mut call_stack = Vec::new();
        let mut error = *error;
        while let EvalAltResult::ErrorInFunctionCall(function, _, inner, _) = error {
            call_stack.push(function);
            error = *inner;
        }
        let location = location_of(error.position());

        match error {
            EvalAltResult::ErrorParsing(kind, _) => syntax_fault(&kind, location),
            EvalAltResult::ErrorStackOverflow(_) => Fault::StackOverflow {
                location,
                call_stack,
            },
            EvalAltResult::ErrorTerminated(..) | EvalAltResult::ErrorTooManyOperations(_) => {
                Fault::Timeout { location }
            }
            EvalAltResult::ErrorDataTooLarge(message, _) => Fault::DataTooLarge { message, location },
            EvalAltResult::ErrorRuntime(value, _) => match self.take_host_failure(&value) {
                Some((function, error)) => Fault::Host {
                    function,
                    error,
                    location,
                    call_stack,
                },
                None => Fault::Thrown {
                    value,
                    location,
                    call_stack,
                },
            },
            mut other => {
                other.clear_position();
                Fault::Runtime {
                    message: other.to_string(),
                    location,
                    call_stack,
                }
            }
        }
    }

    /// Claim the host error behind a thrown host-failure record.
    fn take_host_failure(&self, value: &Dynamic) -> Option<(String, anyhow::Error)> {
        let record = value.clone().try_cast::<Map>()?;
        let name = record.get("name")?.clone().into_string().ok()?;
        if name != HOST_ERROR_NAME {
            return None;
        }
        let id = record.get("id")?.as_int().ok()?;
        self.failures.borrow_mut().take(id)
    }
}

impl Interpreter for RhaiInterpreter {
    type Value = Dynamic;

    fn run(&mut self, code: &str) -> Result<Dynamic, Fault<Dynamic>> {
        self.failures.borrow_mut().clear();

        let ast = self
            .engine
            .compile_with_scope(&self.scope, code)
            .map_err(parse_fault)?;
        {
            let mut order = self.field_order.borrow_mut();
            inspect::record_literals(&ast, |keys| order.remember(keys.iter().copied()));
        }
        self.library.combine(ast.clone_functions_only());
        let program = self.library.merge(&ast);

        self.deadline.arm(self.timeout);
        let outcome = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut self.scope, &program);
        self.deadline.disarm();

        outcome.map_err(|error| self.classify(error))
    }

    fn declare_global(&mut self, name: &str, value: &ScriptValue) -> Result<(), Fault<Dynamic>> {
        self.field_order.borrow_mut().remember_value(value);
        let declaration = format!("let {name} = {};", render_literal(value));
        trace!(name, "declaring global from literal");
        self.run(&declaration).map(|_| ())
    }

    fn global(&self, name: &str) -> Option<Dynamic> {
        if let Some(value) = self.scope.get_value::<Dynamic>(name) {
            return Some(value);
        }
        if self.has_function(name) {
            return FnPtr::new(name).ok().map(Dynamic::from);
        }
        None
    }

    fn has_global(&self, name: &str) -> bool {
        self.scope.contains(name) || self.has_function(name)
    }

    fn set_function(&mut self, name: &str, function: Rc<dyn HostFunction>) {
        for arity in 0..=MAX_HOST_ARGS {
            let binding = HostBinding {
                name: name.to_owned(),
                function: Rc::clone(&function),
                marshaller: self.marshaller,
                failures: Rc::clone(&self.failures),
                field_order: Rc::clone(&self.field_order),
            };
            #[allow(deprecated)]
            self.engine.register_raw_fn(
                name,
                vec![TypeId::of::<Dynamic>(); arity],
                move |_ctx, args| binding.invoke(args),
            );
        }
        self.host_functions.insert(name.to_owned());
    }

    fn function_references(&self, function: &str, identifier: &str) -> bool {
        inspect::function_references(&self.library, function, identifier)
    }

    fn restore_field_order(&self, value: &mut ScriptValue) {
        self.field_order.borrow().restore(value);
    }
}

/// Host errors raised during the current run, keyed by the id carried in the
/// thrown record.
#[derive(Default)]
struct HostFailureLog {
    next_id: INT,
    pending: HashMap<INT, (String, anyhow::Error)>,
}

impl HostFailureLog {
    fn record(&mut self, function: &str, error: anyhow::Error) -> INT {
        self.next_id += 1;
        self.pending
            .insert(self.next_id, (function.to_owned(), error));
        self.next_id
    }

    fn take(&mut self, id: INT) -> Option<(String, anyhow::Error)> {
        self.pending.remove(&id)
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

/// One host function installed at one arity.
struct HostBinding {
    name: String,
    function: Rc<dyn HostFunction>,
    marshaller: Marshaller,
    failures: Rc<RefCell<HostFailureLog>>,
    field_order: Rc<RefCell<FieldOrder>>,
}

impl HostBinding {
    fn invoke(&self, args: &mut [&mut Dynamic]) -> Result<Dynamic, Box<EvalAltResult>> {
        let mut host_args = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            let mut value = self
                .marshaller
                .from_native(&format!("{}#{index}", self.name), &**arg)
                .map_err(|error| -> Box<EvalAltResult> { error.to_string().into() })?;
            self.field_order.borrow().restore(&mut value);
            host_args.push(Marshaller::script_to_host(&value));
        }
        trace!(function = %self.name, args = host_args.len(), "calling host function");

        let outcome = self.function.call(&host_args).and_then(|result| {
            self.marshaller
                .host_to_script(&result)
                .with_context(|| format!("host function '{}' returned an unmarshallable value", self.name))
        });
        match outcome {
            Ok(value) => {
                self.field_order.borrow_mut().remember_value(&value);
                Ok(Dynamic::from_script(&value))
            }
            Err(error) => Err(self.raise(error)),
        }
    }

    /// Turn a host error into a catchable script error record.
    fn raise(&self, error: anyhow::Error) -> Box<EvalAltResult> {
        let message = error.to_string();
        debug!(function = %self.name, error = %message, "host function failed");
        let id = self.failures.borrow_mut().record(&self.name, error);

        let mut thrown = Map::new();
        thrown.insert("name".into(), text(HOST_ERROR_NAME));
        thrown.insert("function".into(), text(&self.name));
        thrown.insert("message".into(), text(&message));
        thrown.insert("id".into(), Dynamic::from_int(id));
        Box::new(EvalAltResult::ErrorRuntime(
            Dynamic::from_map(thrown),
            Position::NONE,
        ))
    }
}

fn text(s: &str) -> Dynamic {
    Dynamic::from(ImmutableString::from(s))
}

fn location_of(position: Position) -> Location {
    Location {
        line: position.line(),
        column: position.position(),
    }
}

fn parse_fault(error: ParseError) -> Fault<Dynamic> {
    syntax_fault(error.err_type(), location_of(error.position()))
}

/// Undefined variables are rejected at compile time under strict variables,
/// but are reported as runtime reference failures.
fn syntax_fault(kind: &ParseErrorType, location: Location) -> Fault<Dynamic> {
    match kind {
        ParseErrorType::VariableUndefined(name) => Fault::Runtime {
            message: format!("Variable not found: {name}"),
            location,
            call_stack: Vec::new(),
        },
        other => Fault::Syntax {
            message: other.to_string(),
            location,
        },
    }
}

fn register_date(engine: &mut Engine) {
    engine
        .register_type_with_name::<DateTime<Utc>>(DATE_TYPE_NAME)
        .register_fn(
            "date",
            |millis: INT| -> Result<DateTime<Utc>, Box<EvalAltResult>> {
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| format!("{millis} is not a valid timestamp").into())
            },
        )
        .register_get("year", |d: &mut DateTime<Utc>| INT::from(d.year()))
        .register_get("month", |d: &mut DateTime<Utc>| INT::from(d.month()))
        .register_get("day", |d: &mut DateTime<Utc>| INT::from(d.day()))
        .register_get("hour", |d: &mut DateTime<Utc>| INT::from(d.hour()))
        .register_get("minute", |d: &mut DateTime<Utc>| INT::from(d.minute()))
        .register_get("second", |d: &mut DateTime<Utc>| INT::from(d.second()))
        .register_get("millis", |d: &mut DateTime<Utc>| d.timestamp_millis())
        .register_fn("to_string", |d: &mut DateTime<Utc>| d.to_rfc3339())
        .register_fn("to_debug", |d: &mut DateTime<Utc>| d.to_rfc3339());
}

impl NativeValue for Dynamic {
    fn view(&self) -> NativeView<Self> {
        let value = self.flatten_clone();
        if value.is_unit() {
            return NativeView::Null;
        }
        if let Ok(b) = value.as_bool() {
            return NativeView::Bool(b);
        }
        if let Ok(i) = value.as_int() {
            return NativeView::Int(i);
        }
        if let Ok(f) = value.as_float() {
            return NativeView::Float(f);
        }
        if let Ok(c) = value.as_char() {
            return NativeView::Text(c.to_string());
        }
        if value.is_string() {
            return NativeView::Text(value.to_string());
        }

        let type_name = Dynamic::type_name(&value);
        if value.is_array() {
            return match value.into_array() {
                Ok(cells) => NativeView::Array(cells),
                Err(_) => NativeView::Opaque(type_name.to_owned()),
            };
        }
        if value.is_map() {
            return match value.try_cast::<Map>() {
                Some(map) => NativeView::Map(
                    map.into_iter()
                        .map(|(key, value)| (key.to_string(), value))
                        .collect(),
                ),
                None => NativeView::Opaque(type_name.to_owned()),
            };
        }
        if value.is::<FnPtr>() {
            return match value.try_cast::<FnPtr>() {
                Some(fn_ptr) => NativeView::Function(fn_ptr.fn_name().to_owned()),
                None => NativeView::Opaque(type_name.to_owned()),
            };
        }
        if value.is::<DateTime<Utc>>() {
            return match value.try_cast::<DateTime<Utc>>() {
                Some(dt) => NativeView::Date(dt),
                None => NativeView::Opaque(type_name.to_owned()),
            };
        }
        NativeView::Opaque(value.to_string())
    }

    fn type_name(&self) -> String {
        let value = self.flatten_clone();
        if value.is::<DateTime<Utc>>() {
            return DATE_TYPE_NAME.to_owned();
        }
        Dynamic::type_name(&value).to_owned()
    }

    fn from_script(value: &ScriptValue) -> Self {
        match value {
            ScriptValue::Null => Dynamic::UNIT,
            ScriptValue::Bool(b) => Dynamic::from_bool(*b),
            ScriptValue::Number(n) if is_integral(*n) => Dynamic::from_int(*n as INT),
            ScriptValue::Number(n) => Dynamic::from_float(*n),
            ScriptValue::String(s) => text(s),
            ScriptValue::DateTime(dt) => Dynamic::from(*dt),
            ScriptValue::Function(f) => FnPtr::new(f.name()).map_or(Dynamic::UNIT, Dynamic::from),
            ScriptValue::List(items) => {
                Dynamic::from_array(items.iter().map(Dynamic::from_script).collect())
            }
            ScriptValue::Record(record) => {
                let mut map = Map::new();
                for (key, value) in record {
                    map.insert(key.as_str().into(), Dynamic::from_script(value));
                }
                Dynamic::from_map(map)
            }
        }
    }
}

/// Render a canonical value as Rhai literal source.
pub(crate) fn render_literal(value: &ScriptValue) -> String {
    let mut out = String::new();
    write_literal(&mut out, value);
    out
}

fn write_literal(out: &mut String, value: &ScriptValue) {
    match value {
        ScriptValue::Null => out.push_str("()"),
        ScriptValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        ScriptValue::Number(n) => write_number(out, *n),
        ScriptValue::String(s) => write_string(out, s),
        ScriptValue::DateTime(dt) => out.push_str(&format!("date({})", dt.timestamp_millis())),
        ScriptValue::Function(f) => {
            out.push_str("Fn(");
            write_string(out, f.name());
            out.push(')');
        }
        ScriptValue::List(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                write_literal(out, item);
            }
            out.push(']');
        }
        ScriptValue::Record(record) => {
            out.push_str("#{");
            for (index, (key, value)) in record.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                write_string(out, key);
                out.push_str(": ");
                write_literal(out, value);
            }
            out.push('}');
        }
    }
}

fn write_number(out: &mut String, n: f64) {
    if is_integral(n) {
        out.push_str(&(n as i64).to_string());
    } else if n.is_finite() {
        // Rhai needs a decimal point in every float literal.
        let literal = format!("{n:?}");
        match literal.split_once('e') {
            Some((mantissa, exponent)) if !mantissa.contains('.') => {
                out.push_str(&format!("{mantissa}.0e{exponent}"));
            }
            _ => out.push_str(&literal),
        }
    } else {
        out.push_str("()");
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", u32::from(c))),
            c => out.push(c),
        }
    }
    out.push('"');
}
