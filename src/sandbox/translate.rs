//! Translation of interpreter faults into [`ScriptError`].
//!
//! The interpreter reports what went wrong as a [`Fault`], carrying its own
//! value type for thrown values. [`ExceptionTranslator`] is the only place in
//! the crate that turns faults and other boundary failures into the uniform
//! error taxonomy.

use std::backtrace::BacktraceStatus;
use std::path::Path;

use tracing::debug;

use crate::error::{HostFailure, ScriptError, ScriptErrorKind};
use crate::sandbox::config::{ExecutionLimits, LimitsError};
use crate::sandbox::interpreter::NativeValue;
use crate::sandbox::marshal::{MarshalError, Marshaller};
use crate::value::{Record, ScriptValue};

/// A source position reported by the interpreter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    /// One-based line number.
    pub line: Option<usize>,
    /// One-based column number.
    pub column: Option<usize>,
}

/// What went wrong inside the interpreter.
#[derive(Debug)]
pub enum Fault<V> {
    /// The source did not parse.
    Syntax { message: String, location: Location },
    /// An interpreter-level runtime failure such as an undefined function.
    Runtime {
        message: String,
        location: Location,
        call_stack: Vec<String>,
    },
    /// The script threw a value that nothing caught.
    Thrown {
        value: V,
        location: Location,
        call_stack: Vec<String>,
    },
    /// A host function returned an error that nothing caught.
    Host {
        function: String,
        error: anyhow::Error,
        location: Location,
        call_stack: Vec<String>,
    },
    /// The deadline passed.
    Timeout { location: Location },
    /// The call depth ceiling was hit.
    StackOverflow {
        location: Location,
        call_stack: Vec<String>,
    },
    /// A string, array or map outgrew its budget.
    DataTooLarge { message: String, location: Location },
}

impl<V> Fault<V> {
    /// Whether this fault came from an execution limit.
    pub fn is_limit_violation(&self) -> bool {
        matches!(
            self,
            Fault::Timeout { .. } | Fault::StackOverflow { .. } | Fault::DataTooLarge { .. }
        )
    }
}

/// Builds every [`ScriptError`] the sandbox reports.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionTranslator<'a> {
    limits: &'a ExecutionLimits,
    marshaller: &'a Marshaller,
}

impl<'a> ExceptionTranslator<'a> {
    /// Create a translator for an engine configured with `limits`.
    pub fn new(limits: &'a ExecutionLimits, marshaller: &'a Marshaller) -> Self {
        Self { limits, marshaller }
    }

    /// Translate an interpreter fault.
    pub fn translate<V: NativeValue>(&self, fault: Fault<V>) -> ScriptError {
        let error = match fault {
            Fault::Syntax { message, location } => {
                at(ScriptError::new(ScriptErrorKind::SyntaxError, message), location)
            }
            Fault::Runtime {
                message,
                location,
                call_stack,
            } => {
                let mut error = at(ScriptError::new(ScriptErrorKind::RuntimeError, message), location);
                error.call_stack = call_stack;
                error
            }
            Fault::Thrown {
                value,
                location,
                call_stack,
            } => {
                let mut error = match self.marshaller.from_native("thrown", &value) {
                    Ok(thrown) => {
                        let mut error =
                            ScriptError::new(ScriptErrorKind::RuntimeError, thrown_message(&thrown));
                        error.thrown = Some(thrown);
                        error
                    }
                    Err(err) => ScriptError::new(
                        ScriptErrorKind::RuntimeError,
                        format!("script threw a value of type {}: {err}", value.type_name()),
                    ),
                };
                error.call_stack = call_stack;
                at(error, location)
            }
            Fault::Host {
                function,
                error: source,
                location,
                call_stack,
            } => {
                let mut error = at(
                    ScriptError::new(
                        ScriptErrorKind::HostBindingError,
                        format!("host function '{function}' failed: {source}"),
                    ),
                    location,
                );
                error.call_stack = call_stack;
                error.host_failure = Some(HostFailure {
                    function,
                    messages: source.chain().map(ToString::to_string).collect(),
                    backtrace: captured_backtrace(&source),
                });
                error.source = Some(source);
                error
            }
            Fault::Timeout { location } => at(
                ScriptError::new(
                    ScriptErrorKind::TimeoutError,
                    format!("script exceeded the time limit of {:?}", self.limits.timeout),
                ),
                location,
            ),
            Fault::StackOverflow {
                location,
                call_stack,
            } => {
                let mut error = at(
                    ScriptError::new(
                        ScriptErrorKind::RecursionLimitExceeded,
                        format!(
                            "script exceeded the call depth limit of {}",
                            self.limits.recursion_depth
                        ),
                    ),
                    location,
                );
                error.call_stack = call_stack;
                error
            }
            Fault::DataTooLarge { message, location } => at(
                ScriptError::new(
                    ScriptErrorKind::MemoryLimitExceeded,
                    format!(
                        "{message} exceeds the memory limit of {} bytes",
                        self.limits.memory_bytes
                    ),
                ),
                location,
            ),
        };
        debug!(kind = %error.kind, line = error.line, "translated interpreter fault");
        error
    }

    /// Execution limits that cannot be enforced.
    pub fn configuration(error: LimitsError) -> ScriptError {
        ScriptError::new(
            ScriptErrorKind::ConfigurationError,
            format!("invalid execution limits: {error}"),
        )
    }

    /// A binding name that is empty or not an identifier.
    pub fn invalid_binding_name(name: &str) -> ScriptError {
        ScriptError::new(
            ScriptErrorKind::InvalidBindingNameError,
            format!("{name:?} is not a valid binding name"),
        )
    }

    /// A call on an engine that faulted earlier.
    pub fn faulted() -> ScriptError {
        ScriptError::new(
            ScriptErrorKind::EngineFaultedError,
            "engine faulted after exceeding a resource limit and must be discarded",
        )
    }

    /// A value that refused conversion.
    pub fn marshal(error: MarshalError) -> ScriptError {
        let message = match &error {
            MarshalError::SelfReference {
                binding: Some(binding),
                ..
            } => format!("{error} Path '{binding}'."),
            MarshalError::SelfReference { binding: None, .. } => error.to_string(),
        };
        let mut script_error = ScriptError::new(ScriptErrorKind::SelfReferenceLoopError, message);
        script_error.source = Some(error.into());
        script_error
    }

    /// A script file that could not be read.
    pub fn source_unavailable(path: &Path, error: std::io::Error) -> ScriptError {
        let mut script_error = ScriptError::new(
            ScriptErrorKind::SourceUnavailable,
            format!("failed to read script {}: {error}", path.display()),
        );
        script_error.source = Some(error.into());
        script_error
    }

    /// Recover a script-thrown error record from an error chain.
    ///
    /// Returns the record only if the chain holds a [`ScriptError`] created by
    /// an explicit script throw of a record with a `name` field.
    pub fn unwrap_exception(error: &(dyn std::error::Error + 'static)) -> Option<Record> {
        let mut current = Some(error);
        while let Some(err) = current {
            if let Some(script_error) = err.downcast_ref::<ScriptError>() {
                return script_error
                    .thrown
                    .as_ref()
                    .and_then(ScriptValue::as_record)
                    .filter(|record| record.contains_key("name"))
                    .cloned();
            }
            current = err.source();
        }
        None
    }
}

fn at(mut error: ScriptError, location: Location) -> ScriptError {
    error.line = location.line;
    error.column = location.column;
    error
}

/// Message for a thrown value: `name: message` for error records, the text
/// itself for strings.
fn thrown_message(value: &ScriptValue) -> String {
    match value {
        ScriptValue::String(text) => text.clone(),
        ScriptValue::Record(record) => {
            let name = record.get("name").and_then(ScriptValue::as_str);
            let message = record.get("message").and_then(ScriptValue::as_str);
            match (name, message) {
                (Some(name), Some(message)) => format!("{name}: {message}"),
                (Some(name), None) => name.to_owned(),
                (None, Some(message)) => message.to_owned(),
                (None, None) => value.to_string(),
            }
        }
        other => other.to_string(),
    }
}

fn captured_backtrace(error: &anyhow::Error) -> Option<String> {
    let backtrace = error.backtrace();
    (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string())
}
