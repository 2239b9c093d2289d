//! Bidirectional conversion between host values, canonical script values and
//! interpreter values.
//!
//! Interpreter arrays are always canonicalized: an array of records becomes an
//! ordered list of records, at any nesting depth. Conversion never follows a
//! cycle. Host graphs are checked by node identity; interpreter values, whose
//! identity is not observable, are cut off at the recursion-depth ceiling. Both
//! directions share that ceiling, so anything accepted going in can be read back.
//!
//! [`FieldOrder`] restores record field order for interpreters whose maps keep
//! their keys sorted.

use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use crate::sandbox::interpreter::{NativeValue, NativeView};
use crate::value::{FunctionRef, HostList, HostRecord, HostValue, Record, ScriptValue};

/// Largest integer magnitude an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Whether a number is a whole number that survives a round trip through an integer.
pub(crate) fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER
}

/// A value that cannot cross the sandbox boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// The value refers back to one of its ancestors.
    #[error("Self referencing loop detected for property '{property}' with type '{type_name}'.")]
    SelfReference {
        /// Field whose value closes the loop.
        property: String,
        /// The global binding being converted, if any.
        binding: Option<String>,
        /// Runtime type of the value being converted.
        type_name: String,
    },
}

impl MarshalError {
    /// Attach the global binding the failed conversion belongs to.
    pub fn with_binding(self, name: &str) -> Self {
        match self {
            MarshalError::SelfReference {
                property,
                type_name,
                ..
            } => MarshalError::SelfReference {
                property,
                binding: Some(name.to_owned()),
                type_name,
            },
        }
    }
}

/// Converter between the three value representations.
#[derive(Debug, Clone, Copy)]
pub struct Marshaller {
    max_depth: usize,
}

impl Marshaller {
    /// Create a marshaller that refuses interpreter values nested deeper than `max_depth`.
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Convert a host value into the canonical model.
    ///
    /// Records and lists nested deeper than the ceiling are refused like cycles.
    pub fn host_to_script(&self, value: &HostValue) -> Result<ScriptValue, MarshalError> {
        let mut ancestors = Vec::new();
        host_node(value, "", self.max_depth, &mut ancestors)
    }

    /// Convert a canonical value into a fresh, acyclic host value.
    pub fn script_to_host(value: &ScriptValue) -> HostValue {
        match value {
            ScriptValue::Null => HostValue::Null,
            ScriptValue::Bool(b) => HostValue::Bool(*b),
            ScriptValue::Number(n) => HostValue::Number(*n),
            ScriptValue::String(s) => HostValue::String(s.clone()),
            ScriptValue::DateTime(dt) => HostValue::DateTime(*dt),
            ScriptValue::Function(f) => HostValue::Function(f.clone()),
            ScriptValue::List(items) => {
                let list = HostList::new();
                for item in items {
                    list.push(Self::script_to_host(item));
                }
                HostValue::List(list)
            }
            ScriptValue::Record(record) => {
                let host = HostRecord::new();
                for (key, value) in record {
                    host.insert(key.clone(), Self::script_to_host(value));
                }
                HostValue::Record(host)
            }
        }
    }

    /// Convert an interpreter value read from `binding` into the canonical model.
    pub fn from_native<V: NativeValue>(
        &self,
        binding: &str,
        value: &V,
    ) -> Result<ScriptValue, MarshalError> {
        let root_type = value.type_name();
        self.native_node(binding, &root_type, binding, value, 0)
    }

    fn native_node<V: NativeValue>(
        &self,
        binding: &str,
        root_type: &str,
        property: &str,
        value: &V,
        depth: usize,
    ) -> Result<ScriptValue, MarshalError> {
        let view = value.view();
        // Depth counts containers only; the field holding the first one past the
        // ceiling is the one that re-enters.
        if matches!(view, NativeView::Array(_) | NativeView::Map(_)) && depth > self.max_depth {
            return Err(MarshalError::SelfReference {
                property: property.to_owned(),
                binding: Some(binding.to_owned()),
                type_name: root_type.to_owned(),
            });
        }

        let converted = match view {
            NativeView::Null => ScriptValue::Null,
            NativeView::Bool(b) => ScriptValue::Bool(b),
            NativeView::Int(i) => ScriptValue::Number(i as f64),
            NativeView::Float(f) => ScriptValue::Number(f),
            NativeView::Text(s) => ScriptValue::String(s),
            NativeView::Date(dt) => ScriptValue::DateTime(dt),
            NativeView::Function(name) => ScriptValue::Function(FunctionRef::new(name)),
            NativeView::Opaque(display) => {
                trace!(binding, type_name = %value.type_name(), "converting opaque value to string");
                ScriptValue::String(display)
            }
            // Cells inherit the property name of the field holding the array.
            NativeView::Array(cells) => ScriptValue::List(
                cells
                    .iter()
                    .map(|cell| self.native_node(binding, root_type, property, cell, depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
            NativeView::Map(entries) => {
                let mut record = Record::with_capacity(entries.len());
                for (key, entry) in &entries {
                    let converted = self.native_node(binding, root_type, key, entry, depth + 1)?;
                    record.insert(key.clone(), converted);
                }
                ScriptValue::Record(record)
            }
        };
        Ok(converted)
    }
}

fn host_node(
    value: &HostValue,
    property: &str,
    max_depth: usize,
    ancestors: &mut Vec<*const ()>,
) -> Result<ScriptValue, MarshalError> {
    let converted = match value {
        HostValue::Null => ScriptValue::Null,
        HostValue::Bool(b) => ScriptValue::Bool(*b),
        HostValue::Number(n) => ScriptValue::Number(*n),
        HostValue::String(s) => ScriptValue::String(s.clone()),
        HostValue::DateTime(dt) => ScriptValue::DateTime(*dt),
        HostValue::Function(f) => ScriptValue::Function(f.clone()),
        HostValue::List(list) => {
            enter(list.node_id(), property, "list", max_depth, ancestors)?;
            let items = list
                .lock()
                .iter()
                .enumerate()
                .map(|(index, item)| host_node(item, &format!("[{index}]"), max_depth, ancestors))
                .collect::<Result<Vec<_>, _>>();
            ancestors.pop();
            ScriptValue::List(items?)
        }
        HostValue::Record(record) => {
            enter(record.node_id(), property, "record", max_depth, ancestors)?;
            let fields = record
                .lock()
                .iter()
                .map(|(key, value)| Ok((key.clone(), host_node(value, key, max_depth, ancestors)?)))
                .collect::<Result<Record, MarshalError>>();
            ancestors.pop();
            ScriptValue::Record(fields?)
        }
    };
    Ok(converted)
}

/// Push a container onto the ancestor path. The node is checked before it is
/// locked, so a cycle never locks the same node twice.
fn enter(
    id: *const (),
    property: &str,
    type_name: &str,
    max_depth: usize,
    ancestors: &mut Vec<*const ()>,
) -> Result<(), MarshalError> {
    if ancestors.contains(&id) || ancestors.len() > max_depth {
        return Err(MarshalError::SelfReference {
            property: property.to_owned(),
            binding: None,
            type_name: type_name.to_owned(),
        });
    }
    ancestors.push(id);
    Ok(())
}

/// Most field sets a [`FieldOrder`] remembers.
const MAX_REMEMBERED_ORDERS: usize = 4096;

/// Field order of records that went into an interpreter whose maps sort their keys.
///
/// Orders are remembered per set of field names. A record read back out is
/// rearranged into the order last seen for its field set; records with a field
/// set never seen keep the interpreter's order.
#[derive(Debug, Default)]
pub struct FieldOrder {
    orders: HashMap<Vec<String>, Vec<String>>,
}

impl FieldOrder {
    /// Create an empty order registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the order of one record's field names.
    pub fn remember<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        let order: Vec<String> = keys.into_iter().map(str::to_owned).collect();
        if order.len() < 2 {
            return;
        }
        let mut sorted = order.clone();
        sorted.sort_unstable();
        if sorted == order {
            self.orders.remove(&sorted);
        } else if self.orders.len() < MAX_REMEMBERED_ORDERS || self.orders.contains_key(&sorted) {
            self.orders.insert(sorted, order);
        }
    }

    /// Remember the order of every record inside `value`.
    pub fn remember_value(&mut self, value: &ScriptValue) {
        match value {
            ScriptValue::List(items) => items.iter().for_each(|item| self.remember_value(item)),
            ScriptValue::Record(record) => {
                self.remember(record.keys().map(String::as_str));
                record.values().for_each(|field| self.remember_value(field));
            }
            _ => {}
        }
    }

    /// Rearrange every record inside `value` into its remembered order.
    pub fn restore(&self, value: &mut ScriptValue) {
        if self.orders.is_empty() {
            return;
        }
        match value {
            ScriptValue::List(items) => items.iter_mut().for_each(|item| self.restore(item)),
            ScriptValue::Record(record) => {
                record.values_mut().for_each(|field| self.restore(field));
                let mut keys: Vec<String> = record.keys().cloned().collect();
                keys.sort_unstable();
                if let Some(order) = self.orders.get(&keys) {
                    let mut arranged = Record::with_capacity(record.len());
                    for key in order {
                        if let Some((key, field)) = record.swap_remove_entry(key) {
                            arranged.insert(key, field);
                        }
                    }
                    *record = arranged;
                }
            }
            _ => {}
        }
    }
}
