//! Execution limits with builder pattern.

use std::time::Duration;

use thiserror::Error;

/// Hard resource ceilings for one engine instance.
///
/// Limits are fixed when the engine is created and cannot change afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Maximum wall-clock time for a single call.
    pub timeout: Duration,
    /// Maximum depth of nested script function calls.
    pub recursion_depth: usize,
    /// Maximum memory in bytes that script data may occupy.
    pub memory_bytes: u64,
}

impl ExecutionLimits {
    /// Default time limit for running a script.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

    /// Default recursion depth limit.
    pub const DEFAULT_RECURSION_DEPTH: usize = 100;

    /// Default memory limit: 2.5GB, enough for scripts that pull in a ~20MB CSV.
    pub const DEFAULT_MEMORY_BYTES: u64 = 2_684_354_560;

    /// Create a new builder for ExecutionLimits.
    pub fn builder() -> ExecutionLimitsBuilder {
        ExecutionLimitsBuilder::default()
    }

    /// Check that every limit is positive.
    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.timeout.is_zero() {
            return Err(LimitsError::ZeroTimeout);
        }
        if self.recursion_depth == 0 {
            return Err(LimitsError::ZeroRecursionDepth);
        }
        if self.memory_bytes == 0 {
            return Err(LimitsError::ZeroMemory);
        }
        Ok(())
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            recursion_depth: Self::DEFAULT_RECURSION_DEPTH,
            memory_bytes: Self::DEFAULT_MEMORY_BYTES,
        }
    }
}

/// A limit that cannot be enforced.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitsError {
    /// The timeout was zero.
    #[error("timeout must be positive")]
    ZeroTimeout,
    /// The recursion depth was zero.
    #[error("recursion depth must be positive")]
    ZeroRecursionDepth,
    /// The memory limit was zero.
    #[error("memory limit must be positive")]
    ZeroMemory,
}

/// Builder for creating ExecutionLimits instances.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLimitsBuilder {
    timeout: Option<Duration>,
    recursion_depth: Option<usize>,
    memory_bytes: Option<u64>,
}

impl ExecutionLimitsBuilder {
    /// Set the maximum execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the maximum recursion depth.
    pub fn recursion_depth(mut self, depth: usize) -> Self {
        self.recursion_depth = Some(depth);
        self
    }

    /// Set the maximum memory limit in bytes.
    pub fn memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }

    /// Build the ExecutionLimits. Validation happens when an engine is created.
    pub fn build(self) -> ExecutionLimits {
        let default = ExecutionLimits::default();
        ExecutionLimits {
            timeout: self.timeout.unwrap_or(default.timeout),
            recursion_depth: self.recursion_depth.unwrap_or(default.recursion_depth),
            memory_bytes: self.memory_bytes.unwrap_or(default.memory_bytes),
        }
    }
}
