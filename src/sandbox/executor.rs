//! Core execution engine for the script sandbox.

use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::Result;
use crate::sandbox::config::ExecutionLimits;
use crate::sandbox::interpreter::{HostFunction, Interpreter};
use crate::sandbox::io::{FsLoader, ScriptLoader};
use crate::sandbox::marshal::Marshaller;
use crate::sandbox::rhai_backend::RhaiInterpreter;
use crate::sandbox::translate::{ExceptionTranslator, Fault};
use crate::value::{HostValue, Record};

/// Lifecycle state of a [`SandboxedEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created; no binding or script call has been attempted yet.
    Created,
    /// Idle and usable. Any binding or script call moves a new engine here,
    /// including one refused before reaching the interpreter.
    Ready,
    /// A call is in progress.
    Running,
    /// A resource limit was exceeded; every further call is refused.
    Faulted,
}

/// What a host binding installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// A global value set with [`SandboxedEngine::set_global_value`].
    Value,
    /// A host function set with [`SandboxedEngine::set_global_function`].
    Function,
}

/// A sandboxed script execution environment.
///
/// One engine owns one interpreter instance. Globals and functions defined by
/// scripts or bindings persist across calls on the same engine. The engine is
/// not `Send`: it stays on the thread that created it, and concurrent scripts
/// each need their own engine.
pub struct SandboxedEngine<I: Interpreter = RhaiInterpreter> {
    limits: ExecutionLimits,
    interpreter: I,
    marshaller: Marshaller,
    loader: Box<dyn ScriptLoader>,
    state: EngineState,
    bindings: IndexMap<String, BindingKind>,
}

impl SandboxedEngine<RhaiInterpreter> {
    /// Create a new engine enforcing `limits`.
    pub fn new(limits: ExecutionLimits) -> Result<Self> {
        limits.validate().map_err(ExceptionTranslator::configuration)?;
        let interpreter = RhaiInterpreter::new(&limits);
        Ok(Self::assemble(limits, interpreter))
    }

    /// Recover the record a script explicitly threw from any error chain.
    pub fn unwrap_exception(error: &(dyn std::error::Error + 'static)) -> Option<Record> {
        ExceptionTranslator::unwrap_exception(error)
    }
}

impl<I: Interpreter> SandboxedEngine<I> {
    /// Create an engine around an already configured interpreter.
    ///
    /// The interpreter is expected to enforce `limits` itself.
    pub fn with_interpreter(limits: ExecutionLimits, interpreter: I) -> Result<Self> {
        limits.validate().map_err(ExceptionTranslator::configuration)?;
        Ok(Self::assemble(limits, interpreter))
    }

    fn assemble(limits: ExecutionLimits, interpreter: I) -> Self {
        debug!(
            timeout = ?limits.timeout,
            recursion_depth = limits.recursion_depth,
            memory_bytes = limits.memory_bytes,
            "created sandboxed engine"
        );
        Self {
            limits,
            interpreter,
            marshaller: Marshaller::new(limits.recursion_depth),
            loader: Box::new(FsLoader),
            state: EngineState::Created,
            bindings: IndexMap::new(),
        }
    }

    /// Replace the collaborator that reads scripts for [`execute_file`](Self::execute_file).
    pub fn with_loader(mut self, loader: impl ScriptLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The limits this engine enforces.
    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Host bindings installed so far, in first-registration order.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, BindingKind)> + '_ {
        self.bindings.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    /// Run an expression and return its value.
    ///
    /// Arrays in the result, at any depth, come back as [`HostValue::List`].
    pub fn evaluate(&mut self, code: &str) -> Result<HostValue> {
        let value = self.run("evaluate", code)?;
        self.read_out("result", &value)
    }

    /// Run a program for its side effects.
    pub fn execute(&mut self, code: &str) -> Result<()> {
        self.run("execute", code).map(|_| ())
    }

    /// Read a script through the engine's loader and run it like [`execute`](Self::execute).
    pub fn execute_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.begin()?;
        let path = path.as_ref();
        let code = self
            .loader
            .load(path)
            .map_err(|error| ExceptionTranslator::source_unavailable(path, error))?;
        debug!(path = %path.display(), bytes = code.len(), "loaded script file");
        self.execute(&code)
    }

    /// Read a global variable or function.
    ///
    /// Unknown names read as [`HostValue::Null`]; script and host functions read
    /// as [`HostValue::Function`].
    pub fn get_global_value(&self, name: &str) -> Result<HostValue> {
        self.ensure_usable()?;
        let Some(value) = self.interpreter.global(name) else {
            return Ok(HostValue::Null);
        };
        self.read_out(name, &value)
    }

    /// Check whether a global variable or function exists. Always false once faulted.
    pub fn has_global_value(&self, name: &str) -> bool {
        self.state != EngineState::Faulted && self.interpreter.has_global(name)
    }

    /// Install a global value, replacing any previous one.
    ///
    /// The value is re-declared from its literal form, so scripts see dates as
    /// native dates and never share identity with host objects.
    pub fn set_global_value(&mut self, name: &str, value: impl Into<HostValue>) -> Result<()> {
        self.begin()?;
        validate_binding_name(name)?;
        let value = value.into();
        let script = self
            .marshaller
            .host_to_script(&value)
            .map_err(|error| ExceptionTranslator::marshal(error.with_binding(name)))?;

        self.enter("set_global_value", |interpreter| {
            interpreter.declare_global(name, &script)
        })?;
        self.bindings.insert(name.to_owned(), BindingKind::Value);
        debug!(name, type_name = script.type_name(), "set global value");
        Ok(())
    }

    /// Install a host function callable from scripts by `name`.
    pub fn set_global_function<F>(&mut self, name: &str, function: F) -> Result<()>
    where
        F: HostFunction + 'static,
    {
        self.begin()?;
        validate_binding_name(name)?;
        self.interpreter.set_function(name, Rc::new(function));
        self.bindings.insert(name.to_owned(), BindingKind::Function);
        debug!(name, "set global function");
        Ok(())
    }

    /// Check whether script function `function` references `variable`, without running it.
    ///
    /// Always false once faulted or when no such function exists.
    pub fn has_function_variable(&self, function: &str, variable: &str) -> bool {
        self.state != EngineState::Faulted
            && self.interpreter.function_references(function, variable)
    }

    fn run(&mut self, operation: &'static str, code: &str) -> Result<I::Value> {
        self.begin()?;
        debug!(operation, bytes = code.len(), "running script");
        self.enter(operation, |interpreter| interpreter.run(code))
    }

    /// Call into the interpreter, faulting the engine on a limit violation.
    fn enter<T>(
        &mut self,
        operation: &'static str,
        call: impl FnOnce(&mut I) -> std::result::Result<T, Fault<I::Value>>,
    ) -> Result<T> {
        self.state = EngineState::Running;
        let started = Instant::now();
        let outcome = call(&mut self.interpreter);
        let elapsed = started.elapsed();

        match outcome {
            Ok(value) => {
                self.state = EngineState::Ready;
                debug!(operation, ?elapsed, "script call finished");
                Ok(value)
            }
            Err(fault) => {
                let faults_engine = fault.is_limit_violation();
                let mut error =
                    ExceptionTranslator::new(&self.limits, &self.marshaller).translate(fault);
                if let Some(thrown) = error.thrown.as_mut() {
                    self.interpreter.restore_field_order(thrown);
                }
                if faults_engine {
                    self.state = EngineState::Faulted;
                    warn!(operation, kind = %error.kind(), ?elapsed, "engine faulted: {error}");
                } else {
                    self.state = EngineState::Ready;
                    debug!(operation, kind = %error.kind(), ?elapsed, "script call failed");
                }
                Err(error)
            }
        }
    }

    /// Convert an interpreter value into a host value in its original field order.
    fn read_out(&self, binding: &str, value: &I::Value) -> Result<HostValue> {
        let mut script = self
            .marshaller
            .from_native(binding, value)
            .map_err(ExceptionTranslator::marshal)?;
        self.interpreter.restore_field_order(&mut script);
        Ok(Marshaller::script_to_host(&script))
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.state == EngineState::Faulted {
            return Err(ExceptionTranslator::faulted());
        }
        Ok(())
    }

    /// Accept a binding or script call, leaving the created state.
    fn begin(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.state == EngineState::Created {
            self.state = EngineState::Ready;
        }
        Ok(())
    }
}

impl<I: Interpreter> fmt::Debug for SandboxedEngine<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxedEngine")
            .field("limits", &self.limits)
            .field("state", &self.state)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

/// Binding names must be plain identifiers, since they are spliced into a declaration.
fn validate_binding_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ExceptionTranslator::invalid_binding_name(name))
    }
}
