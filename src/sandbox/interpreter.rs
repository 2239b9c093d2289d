//! The narrow capability interface between the engine and an interpreter.
//!
//! [`SandboxedEngine`](crate::sandbox::executor::SandboxedEngine) never touches
//! the interpreter's object model directly. It parses and evaluates through
//! [`Interpreter`], and inspects values only through the structural
//! [`NativeView`] each [`NativeValue`] exposes.

use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::sandbox::translate::Fault;
use crate::value::{HostValue, ScriptValue};

/// Maximum number of arguments a host function can be called with.
pub const MAX_HOST_ARGS: usize = 8;

/// A host-implemented function callable from scripts.
pub trait HostFunction {
    /// Invoke the function with already-marshalled arguments.
    fn call(&self, args: &[HostValue]) -> anyhow::Result<HostValue>;
}

impl<F> HostFunction for F
where
    F: Fn(&[HostValue]) -> anyhow::Result<HostValue>,
{
    fn call(&self, args: &[HostValue]) -> anyhow::Result<HostValue> {
        self(args)
    }
}

/// Structural view of one interpreter value.
#[derive(Debug, Clone)]
pub enum NativeView<V> {
    /// The interpreter's unit/null value.
    Null,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A string or character.
    Text(String),
    /// A native date.
    Date(DateTime<Utc>),
    /// A function pointer, by name.
    Function(String),
    /// A native array; the cells may hold records, scalars or further arrays.
    Array(Vec<V>),
    /// A native key-value record.
    Map(Vec<(String, V)>),
    /// Anything else, by its display form.
    Opaque(String),
}

/// A value owned by an interpreter.
pub trait NativeValue: Sized {
    /// Look at the value's shape.
    fn view(&self) -> NativeView<Self>;

    /// The interpreter's name for the value's runtime type.
    fn type_name(&self) -> String;

    /// Build an interpreter value from a canonical one.
    fn from_script(value: &ScriptValue) -> Self;
}

/// An embedded interpreter instance.
///
/// Implementations keep their own global state across calls and enforce the
/// limits they were created with.
pub trait Interpreter {
    /// The interpreter's value type.
    type Value: NativeValue;

    /// Parse and evaluate `code`, returning its completion value.
    fn run(&mut self, code: &str) -> Result<Self::Value, Fault<Self::Value>>;

    /// Re-declare a global from its literal form in the script language.
    fn declare_global(
        &mut self,
        name: &str,
        value: &ScriptValue,
    ) -> Result<(), Fault<Self::Value>>;

    /// Read a global binding. Functions are returned as function values.
    fn global(&self, name: &str) -> Option<Self::Value>;

    /// Check whether a global variable or function exists.
    fn has_global(&self, name: &str) -> bool;

    /// Install a host function under `name`, replacing any previous one.
    fn set_function(&mut self, name: &str, function: Rc<dyn HostFunction>);

    /// Check whether script function `function` references `identifier`, without running it.
    fn function_references(&self, function: &str, identifier: &str) -> bool;

    /// Put the records inside a value read out of the interpreter back into
    /// their original field order. Interpreters whose maps keep insertion order
    /// have nothing to do.
    fn restore_field_order(&self, _value: &mut ScriptValue) {}
}
