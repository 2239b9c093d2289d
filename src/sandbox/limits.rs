//! Resource limiting for the embedded interpreter.
//!
//! Time is enforced through the interpreter's per-operation progress callback
//! checking an armed [`Deadline`]. Memory is enforced through the interpreter's
//! data-size accounting, derived from the byte budget by [`DataLimits`], plus a
//! size check on variable access: growing a map in place through `m[k] = v`
//! is not covered by the interpreter's own accounting.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Position};

use crate::sandbox::config::ExecutionLimits;

/// Operations between two clock reads in the progress callback.
const CLOCK_CHECK_INTERVAL: u64 = 128;

/// Variable accesses between two full size measurements. Prime, so a periodic
/// access pattern still reaches every variable.
const DEEP_CHECK_INTERVAL: u64 = 1021;

/// Parser nesting levels allowed per level of value nesting.
const EXPR_LEVELS_PER_NESTING: usize = 8;

/// The interpreter's default expression depth.
const MIN_EXPR_DEPTH: usize = 64;

/// Token returned from the progress callback when the deadline has passed.
pub(crate) const TIMEOUT_TOKEN: &str = "sandbox-timeout";

/// A wall-clock deadline shared between the engine and the progress callback.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Rc<Cell<Option<Instant>>>,
}

impl Deadline {
    /// Create a disarmed deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock for one call.
    pub fn arm(&self, timeout: Duration) {
        self.at.set(Instant::now().checked_add(timeout));
    }

    /// Stop the clock.
    pub fn disarm(&self) {
        self.at.set(None);
    }

    /// Check the clock.
    pub fn expired(&self) -> bool {
        self.at.get().is_some_and(|at| Instant::now() >= at)
    }
}

/// Container size ceilings derived from a byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLimits {
    /// Maximum string length in bytes.
    pub max_string_size: usize,
    /// Maximum number of array elements.
    pub max_array_size: usize,
    /// Maximum number of map entries.
    pub max_map_size: usize,
}

impl DataLimits {
    /// Derive container limits from the memory budget.
    ///
    /// Every slot of an array or map holds at least one interpreter value, so the
    /// element ceilings are the budget divided by the size of one value.
    pub fn from_memory_bytes(memory_bytes: u64) -> Self {
        let bytes = usize::try_from(memory_bytes).unwrap_or(usize::MAX).max(1);
        let slots = (bytes / std::mem::size_of::<Dynamic>()).max(1);
        Self {
            max_string_size: bytes,
            max_array_size: slots,
            max_map_size: slots,
        }
    }

    /// Check the outermost container of a value, in constant time.
    pub fn check_shallow(&self, value: &Dynamic) -> Result<(), &'static str> {
        if let Some(map) = value.read_lock::<Map>() {
            return within(map.len(), self.max_map_size, MAP_SIZE);
        }
        if let Some(array) = value.read_lock::<Array>() {
            return within(array.len(), self.max_array_size, ARRAY_SIZE);
        }
        if let Some(text) = value.read_lock::<ImmutableString>() {
            return within(text.len(), self.max_string_size, STRING_SIZE);
        }
        Ok(())
    }

    /// Total every container nested in a value, down to `max_depth` levels.
    pub fn check_deep(&self, value: &Dynamic, max_depth: usize) -> Result<(), &'static str> {
        let mut totals = DataSize::default();
        self.measure(value, max_depth, &mut totals)
    }

    fn measure(
        &self,
        value: &Dynamic,
        depth_left: usize,
        totals: &mut DataSize,
    ) -> Result<(), &'static str> {
        if let Some(map) = value.read_lock::<Map>() {
            totals.map_entries += map.len();
            within(totals.map_entries, self.max_map_size, MAP_SIZE)?;
            if depth_left > 0 {
                for field in map.values() {
                    self.measure(field, depth_left - 1, totals)?;
                }
            }
        } else if let Some(array) = value.read_lock::<Array>() {
            totals.array_cells += array.len();
            within(totals.array_cells, self.max_array_size, ARRAY_SIZE)?;
            if depth_left > 0 {
                for cell in array.iter() {
                    self.measure(cell, depth_left - 1, totals)?;
                }
            }
        } else if let Some(text) = value.read_lock::<ImmutableString>() {
            totals.string_bytes += text.len();
            within(totals.string_bytes, self.max_string_size, STRING_SIZE)?;
        }
        Ok(())
    }
}

const MAP_SIZE: &str = "Size of object map";
const ARRAY_SIZE: &str = "Size of array";
const STRING_SIZE: &str = "Length of string";

#[derive(Default)]
struct DataSize {
    map_entries: usize,
    array_cells: usize,
    string_bytes: usize,
}

fn within(size: usize, limit: usize, what: &'static str) -> Result<(), &'static str> {
    if size > limit {
        Err(what)
    } else {
        Ok(())
    }
}

/// Parser depth needed for a literal nested `recursion_depth` containers deep.
pub fn expression_depth(recursion_depth: usize) -> usize {
    recursion_depth
        .saturating_add(1)
        .saturating_mul(EXPR_LEVELS_PER_NESTING)
        .max(MIN_EXPR_DEPTH)
}

/// Apply all execution limits to an interpreter engine.
pub(crate) fn install(engine: &mut Engine, limits: &ExecutionLimits, deadline: &Deadline) {
    engine.set_max_call_levels(limits.recursion_depth);
    let expr_depth = expression_depth(limits.recursion_depth);
    engine.set_max_expr_depths(expr_depth, expr_depth);

    let data = DataLimits::from_memory_bytes(limits.memory_bytes);
    engine.set_max_string_size(data.max_string_size);
    engine.set_max_array_size(data.max_array_size);
    engine.set_max_map_size(data.max_map_size);

    let max_depth = limits.recursion_depth;
    let accesses = Rc::new(Cell::new(0_u64));
    engine.on_var(move |name, _index, context| {
        let Some(value) = context.scope().get(name) else {
            return Ok(None);
        };
        let count = accesses.get().wrapping_add(1);
        accesses.set(count);
        let checked = if count % DEEP_CHECK_INTERVAL == 0 {
            data.check_deep(value, max_depth)
        } else {
            data.check_shallow(value)
        };
        match checked {
            Ok(()) => Ok(None),
            Err(what) => Err(Box::new(EvalAltResult::ErrorDataTooLarge(
                what.to_string(),
                Position::NONE,
            ))),
        }
    });

    let deadline = deadline.clone();
    engine.on_progress(move |operations| {
        if operations % CLOCK_CHECK_INTERVAL != 0 {
            return None;
        }
        deadline
            .expired()
            .then(|| Dynamic::from(TIMEOUT_TOKEN.to_string()))
    });
}
