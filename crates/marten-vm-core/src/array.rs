//! Engine arrays
//!
//! A growable sequence of engine values. There is no bulk transfer primitive:
//! embedders fill arrays with one index write per element.

use crate::value::Value;
use parking_lot::Mutex;

/// Approximate per-element accounting size for an array slot
pub const ELEMENT_SIZE: usize = std::mem::size_of::<Value>();

/// An engine array
///
/// The interior mutex exists for Rust safety only; arrays are confined to the
/// engine thread by discipline.
pub struct JsArray {
    elements: Mutex<Vec<Value>>,
}

impl JsArray {
    /// Create an array with the given element capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            elements: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.lock().len()
    }

    /// Check if the array is empty
    pub fn is_empty(&self) -> bool {
        self.elements.lock().is_empty()
    }

    /// Get the element at `index`, if present
    pub fn get(&self, index: usize) -> Option<Value> {
        self.elements.lock().get(index).cloned()
    }

    /// Write `value` at `index`, growing with `undefined` holes as needed
    pub fn set(&self, index: usize, value: Value) {
        let mut elements = self.elements.lock();
        if index >= elements.len() {
            elements.resize(index + 1, Value::undefined());
        }
        elements[index] = value;
    }

    /// Append `value`
    pub fn push(&self, value: Value) {
        self.elements.lock().push(value);
    }

    /// Snapshot the elements into a plain vector
    pub fn to_vec(&self) -> Vec<Value> {
        self.elements.lock().clone()
    }
}

impl std::fmt::Debug for JsArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsArray(len={})", self.len())
    }
}
