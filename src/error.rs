//! Error types for the script sandbox.
//!
//! Every failure that crosses the sandbox boundary is a [`ScriptError`]. Values
//! of this type are only built by the exception translator, so the taxonomy in
//! [`ScriptErrorKind`] is the complete list of things a host has to handle.

use std::fmt;

use thiserror::Error;

use crate::value::ScriptValue;

/// Classification of a [`ScriptError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptErrorKind {
    /// The script source failed to parse and never ran.
    SyntaxError,
    /// The script threw, or hit an interpreter-level fault such as an undefined reference.
    RuntimeError,
    /// The wall-clock limit was exceeded mid-execution.
    TimeoutError,
    /// The call-stack depth ceiling was exceeded mid-execution.
    RecursionLimitExceeded,
    /// The allocation ceiling was exceeded mid-execution.
    MemoryLimitExceeded,
    /// A cyclic structure was found while converting a value.
    SelfReferenceLoopError,
    /// A host-registered function failed during a script-initiated call.
    HostBindingError,
    /// A binding name was empty or not a valid identifier.
    InvalidBindingNameError,
    /// Execution limits were not positive.
    ConfigurationError,
    /// The engine instance faulted earlier and refuses further work.
    EngineFaultedError,
    /// A script resource could not be read.
    SourceUnavailable,
}

impl ScriptErrorKind {
    /// Whether this kind moves an engine instance into the faulted state.
    pub fn is_limit_violation(self) -> bool {
        matches!(
            self,
            ScriptErrorKind::TimeoutError
                | ScriptErrorKind::RecursionLimitExceeded
                | ScriptErrorKind::MemoryLimitExceeded
        )
    }
}

impl fmt::Display for ScriptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Details of a failed host function call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFailure {
    /// Name the function was registered under.
    pub function: String,
    /// Error messages from outermost to innermost cause.
    pub messages: Vec<String>,
    /// Backtrace captured with the host error, if backtraces were enabled.
    pub backtrace: Option<String>,
}

impl HostFailure {
    /// The innermost cause's message.
    pub fn innermost(&self) -> Option<&str> {
        self.messages.last().map(String::as_str)
    }
}

/// A failure reported by the sandbox.
#[derive(Error, Debug)]
#[error("{kind}: {message}{}", location_suffix(.line, .column))]
pub struct ScriptError {
    pub(crate) kind: ScriptErrorKind,
    pub(crate) message: String,
    pub(crate) line: Option<usize>,
    pub(crate) column: Option<usize>,
    pub(crate) call_stack: Vec<String>,
    pub(crate) host_failure: Option<HostFailure>,
    pub(crate) thrown: Option<ScriptValue>,
    #[source]
    pub(crate) source: Option<anyhow::Error>,
}

impl ScriptError {
    pub(crate) fn new(kind: ScriptErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
            column: None,
            call_stack: Vec::new(),
            host_failure: None,
            thrown: None,
            source: None,
        }
    }

    /// The error's classification.
    pub fn kind(&self) -> ScriptErrorKind {
        self.kind
    }

    /// Human-readable message, without location.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Line of the failing source position, when the interpreter reported one.
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    /// Column of the failing source position, when the interpreter reported one.
    pub fn column(&self) -> Option<usize> {
        self.column
    }

    /// Script functions that were active when the failure happened, outermost first.
    pub fn call_stack(&self) -> &[String] {
        &self.call_stack
    }

    /// Details of the host function failure, for [`ScriptErrorKind::HostBindingError`].
    pub fn host_failure(&self) -> Option<&HostFailure> {
        self.host_failure.as_ref()
    }

    /// The value a script explicitly threw, converted to the sandbox model.
    pub fn thrown_value(&self) -> Option<&ScriptValue> {
        self.thrown.as_ref()
    }

    /// Full report for operators: message, location, call stack and host details.
    pub fn details(&self) -> String {
        let mut out = format!("{}: {}", self.kind, self.message);
        if let Some(line) = self.line {
            out.push_str(&format!("\nLine: {line}"));
        }
        if let Some(column) = self.column {
            out.push_str(&format!("\nColumn: {column}"));
        }
        if !self.call_stack.is_empty() {
            out.push_str(&format!("\nCall stack: {}", self.call_stack.join(" -> ")));
        }
        if let Some(failure) = &self.host_failure {
            out.push_str(&format!("\nFunction: {}", failure.function));
            if let Some(innermost) = failure.innermost() {
                out.push_str(&format!("\nDetails: {innermost}"));
            }
            if let Some(backtrace) = &failure.backtrace {
                out.push_str(&format!("\nStack trace: {backtrace}"));
            }
        }
        out
    }

    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        self.kind == ScriptErrorKind::TimeoutError
    }

    /// Check if this error represents a recursion limit violation.
    pub fn is_recursion_limit(&self) -> bool {
        self.kind == ScriptErrorKind::RecursionLimitExceeded
    }

    /// Check if this error represents a memory limit violation.
    pub fn is_memory_limit(&self) -> bool {
        self.kind == ScriptErrorKind::MemoryLimitExceeded
    }

    /// Check if this error represents a self-referencing value.
    pub fn is_self_reference(&self) -> bool {
        self.kind == ScriptErrorKind::SelfReferenceLoopError
    }

    /// Check if this error came from a host-registered function.
    pub fn is_host_binding(&self) -> bool {
        self.kind == ScriptErrorKind::HostBindingError
    }

    /// Check if this error was caused by calling a faulted engine.
    pub fn is_faulted(&self) -> bool {
        self.kind == ScriptErrorKind::EngineFaultedError
    }

    /// Check if this error faulted the engine that produced it.
    pub fn is_limit_violation(&self) -> bool {
        self.kind.is_limit_violation()
    }
}

fn location_suffix(line: &Option<usize>, column: &Option<usize>) -> String {
    match (*line, *column) {
        (Some(line), Some(column)) => format!(" (line {line}, column {column})"),
        (Some(line), None) => format!(" (line {line})"),
        _ => String::new(),
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_location() {
        let mut error = ScriptError::new(ScriptErrorKind::RuntimeError, "boom");
        assert_eq!(error.to_string(), "RuntimeError: boom");

        error.line = Some(3);
        error.column = Some(7);
        assert_eq!(error.to_string(), "RuntimeError: boom (line 3, column 7)");
    }

    #[test]
    fn test_error_helpers() {
        let timeout = ScriptError::new(ScriptErrorKind::TimeoutError, "t");
        assert!(timeout.is_timeout());
        assert!(timeout.is_limit_violation());
        assert!(!timeout.is_memory_limit());

        let loop_error = ScriptError::new(ScriptErrorKind::SelfReferenceLoopError, "s");
        assert!(loop_error.is_self_reference());
        assert!(!loop_error.is_limit_violation());
    }

    #[test]
    fn test_details_report() {
        let mut error = ScriptError::new(ScriptErrorKind::HostBindingError, "download failed");
        error.line = Some(2);
        error.call_stack = vec!["after_action".into(), "load".into()];
        error.host_failure = Some(HostFailure {
            function: "ftpDownloadCsv".into(),
            messages: vec!["download failed".into(), "connection refused".into()],
            backtrace: None,
        });

        let details = error.details();
        assert!(details.contains("Line: 2"));
        assert!(details.contains("Call stack: after_action -> load"));
        assert!(details.contains("Function: ftpDownloadCsv"));
        assert!(details.contains("Details: connection refused"));
    }

    #[test]
    fn test_source_chain_is_exposed() {
        use std::error::Error as _;

        let mut error = ScriptError::new(ScriptErrorKind::SourceUnavailable, "missing");
        assert!(error.source().is_none());

        error.source = Some(anyhow::anyhow!("disk gone"));
        assert_eq!(error.source().map(ToString::to_string), Some("disk gone".into()));
    }

    #[test]
    fn test_script_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ScriptError>();
    }
}
