//! Prelude module for convenient imports.

pub use crate::error::{Result, ScriptError, ScriptErrorKind};
pub use crate::sandbox::{
    config::ExecutionLimits,
    executor::{EngineState, SandboxedEngine},
    interpreter::HostFunction,
};
pub use crate::value::{FunctionRef, HostList, HostRecord, HostValue, Record, ScriptValue};
