//! # Script Sandbox
//!
//! A sandboxed engine for running short, untrusted scripts inside a host
//! application.
//!
//! Scripts are written in [Rhai](https://rhai.rs). Each [`SandboxedEngine`]
//! owns one interpreter instance and enforces hard resource ceilings on it:
//!
//! - **Timeout**: wall-clock limit per call, checked by the interpreter's operation accounting
//! - **Recursion depth**: ceiling on nested script function calls
//! - **Memory**: ceiling on the size of strings, arrays and maps a script builds
//!
//! A call that exceeds any of these faults the engine; every later call fails
//! with [`ScriptErrorKind::EngineFaultedError`] without running code.
//!
//! ## Example
//!
//! ```rust
//! use script_sandbox_rs::prelude::*;
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let limits = ExecutionLimits::builder()
//!         .timeout(Duration::from_secs(5))
//!         .recursion_depth(32)
//!         .build();
//!
//!     let mut engine = SandboxedEngine::new(limits)?;
//!     engine.execute("fn double(n) { n * 2 }")?;
//!
//!     let result = engine.evaluate("double(21)")?;
//!     assert_eq!(result, HostValue::Number(42.0));
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Crossing the boundary
//!
//! Values enter the sandbox as [`HostValue`]s and come out as [`HostValue`]s.
//! In between they pass through the canonical [`ScriptValue`] model:
//!
//! 1. **Arrays** of records come back as ordered lists of records, at any depth
//! 2. **Cycles** in host graphs are rejected with `SelfReferenceLoopError`
//! 3. **Globals** are re-declared from literal source, never shared by reference
//! 4. **Host functions** may fail with any `anyhow::Error`; scripts can catch the
//!    failure, and an uncaught one surfaces as `HostBindingError` with the full
//!    cause chain

pub mod error;
pub mod prelude;
pub mod sandbox;
pub mod value;

// Re-export main types at crate root for convenience
pub use error::{HostFailure, Result, ScriptError, ScriptErrorKind};
pub use sandbox::config::{ExecutionLimits, ExecutionLimitsBuilder, LimitsError};
pub use sandbox::executor::{BindingKind, EngineState, SandboxedEngine};
pub use sandbox::interpreter::{HostFunction, Interpreter, NativeValue, NativeView, MAX_HOST_ARGS};
pub use sandbox::io::{FsLoader, MemoryLoader, ScriptLoader};
pub use sandbox::marshal::{MarshalError, Marshaller};
pub use sandbox::rhai_backend::RhaiInterpreter;
pub use value::{FunctionRef, HostList, HostRecord, HostValue, Record, ScriptValue};
