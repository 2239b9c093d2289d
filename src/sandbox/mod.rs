//! Sandbox module containing all execution-related components.

pub mod config;
pub mod executor;
pub mod inspect;
pub mod interpreter;
pub mod io;
pub mod limits;
pub mod marshal;
pub mod rhai_backend;
pub mod translate;
