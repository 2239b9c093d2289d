//! Value models on both sides of the sandbox boundary.
//!
//! [`ScriptValue`] is the canonical, owned, acyclic representation of a value
//! inside the sandbox. [`HostValue`] is its host-side counterpart: records and
//! lists are shared, interior-mutable nodes, so a host object graph may alias
//! and may even refer back to itself. Crossing the boundary always goes through
//! the marshaller, which rejects such cycles instead of following them.
//!
//! Host nodes are `Send + Sync`, so a result read on an engine's worker thread
//! can be handed to another thread. Holding a [`HostRecord::lock`] guard while
//! mutating the same node deadlocks.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// An ordered key→value record with unique keys.
pub type Record = IndexMap<String, ScriptValue>;

/// A reference to a function by name.
///
/// Only the name crosses the boundary; there is no host object identity behind it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionRef {
    name: String,
}

impl FunctionRef {
    /// Create a reference to the function called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The referenced function's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A value as seen inside the sandbox.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// The absence of a value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number. Integers and floats share this representation.
    Number(f64),
    /// A string.
    String(String),
    /// A point in time, observed by scripts as the native `Date` type.
    DateTime(DateTime<Utc>),
    /// A function reference.
    Function(FunctionRef),
    /// An ordered sequence.
    List(Vec<ScriptValue>),
    /// An ordered record.
    Record(Record),
}

impl ScriptValue {
    /// The name of this value's type, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::DateTime(_) => "date",
            ScriptValue::Function(_) => "function",
            ScriptValue::List(_) => "list",
            ScriptValue::Record(_) => "record",
        }
    }

    /// Borrow the record if this is one.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            ScriptValue::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Borrow the string if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The number if this is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Null => f.write_str("null"),
            ScriptValue::Bool(b) => write!(f, "{b}"),
            ScriptValue::Number(n) => write!(f, "{n}"),
            ScriptValue::String(s) => write!(f, "{s:?}"),
            ScriptValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            ScriptValue::Function(func) => write!(f, "Fn({})", func.name()),
            ScriptValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            ScriptValue::Record(record) => {
                f.write_str("{")?;
                for (i, (key, value)) in record.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// A shared, mutable host record.
///
/// Cloning a `HostRecord` clones the handle, not the contents.
#[derive(Clone, Default)]
pub struct HostRecord(Arc<Mutex<IndexMap<String, HostValue>>>);

impl HostRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, keeping the original position of an existing key.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<HostValue>) {
        self.lock().insert(key.into(), value.into());
    }

    /// Remove a field, preserving the order of the remaining ones.
    pub fn remove(&self, key: &str) -> Option<HostValue> {
        self.lock().shift_remove(key)
    }

    /// Clone out the value of a field.
    pub fn get(&self, key: &str) -> Option<HostValue> {
        self.lock().get(key).cloned()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Lock the fields for reading or in-place changes.
    pub fn lock(&self) -> MutexGuard<'_, IndexMap<String, HostValue>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn node_id(&self) -> *const () {
        Arc::as_ptr(&self.0).cast()
    }
}

impl PartialEq for HostRecord {
    fn eq(&self, other: &Self) -> bool {
        // Compare snapshots: nested nodes are locked one at a time.
        Arc::ptr_eq(&self.0, &other.0) || {
            let mine = self.lock().clone();
            let theirs = other.lock().clone();
            mine == theirs
        }
    }
}

impl fmt::Debug for HostRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Print keys only; a record may contain itself.
        f.debug_tuple("HostRecord").field(&self.keys()).finish()
    }
}

/// A shared, mutable host list.
#[derive(Clone, Default)]
pub struct HostList(Arc<Mutex<Vec<HostValue>>>);

impl HostList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element.
    pub fn push(&self, value: impl Into<HostValue>) {
        self.lock().push(value.into());
    }

    /// Clone out the element at `index`.
    pub fn get(&self, index: usize) -> Option<HostValue> {
        self.lock().get(index).cloned()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lock the elements for reading or in-place changes.
    pub fn lock(&self) -> MutexGuard<'_, Vec<HostValue>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn node_id(&self) -> *const () {
        Arc::as_ptr(&self.0).cast()
    }
}

impl PartialEq for HostList {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || {
            let mine = self.lock().clone();
            let theirs = other.lock().clone();
            mine == theirs
        }
    }
}

impl fmt::Debug for HostList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostList").field(&self.len()).finish()
    }
}

/// A value as seen by the host.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    /// The absence of a value.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(f64),
    /// A string.
    String(String),
    /// A UTC timestamp.
    DateTime(DateTime<Utc>),
    /// A reference to a function known to the sandbox.
    Function(FunctionRef),
    /// A shared list.
    List(HostList),
    /// A shared record.
    Record(HostRecord),
}

impl HostValue {
    /// Build a record from key/value pairs, in iteration order.
    pub fn record<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<HostValue>,
    {
        let record = HostRecord::new();
        for (key, value) in fields {
            record.insert(key, value);
        }
        HostValue::Record(record)
    }

    /// Build a list from values, in iteration order.
    pub fn list<V: Into<HostValue>>(items: impl IntoIterator<Item = V>) -> Self {
        let list = HostList::new();
        for item in items {
            list.push(item);
        }
        HostValue::List(list)
    }

    /// The number if this is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow the string if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The boolean if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The record handle if this is one.
    pub fn as_record(&self) -> Option<&HostRecord> {
        match self {
            HostValue::Record(record) => Some(record),
            _ => None,
        }
    }

    /// The list handle if this is one.
    pub fn as_list(&self) -> Option<&HostList> {
        match self {
            HostValue::List(list) => Some(list),
            _ => None,
        }
    }

    /// Check for [`HostValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Number(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        HostValue::Number(value as f64)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Number(f64::from(value))
    }
}

impl From<u32> for HostValue {
    fn from(value: u32) -> Self {
        HostValue::Number(f64::from(value))
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::String(value)
    }
}

impl From<DateTime<Utc>> for HostValue {
    fn from(value: DateTime<Utc>) -> Self {
        HostValue::DateTime(value)
    }
}

impl From<FunctionRef> for HostValue {
    fn from(value: FunctionRef) -> Self {
        HostValue::Function(value)
    }
}

impl From<HostRecord> for HostValue {
    fn from(value: HostRecord) -> Self {
        HostValue::Record(value)
    }
}

impl From<HostList> for HostValue {
    fn from(value: HostList) -> Self {
        HostValue::List(value)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(value: Vec<T>) -> Self {
        HostValue::list(value)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(HostValue::Null, Into::into)
    }
}
