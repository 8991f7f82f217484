//! Worklist of handles still to be traced.

use core_types::{ObjRef, Value};

/// Handles pushed by REPR mark functions and drained by the collector.
#[derive(Debug, Default)]
pub struct Worklist {
    items: Vec<ObjRef>,
}

impl Worklist {
    /// Creates an empty worklist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handle.
    pub fn push(&mut self, obj: ObjRef) {
        self.items.push(obj);
    }

    /// Adds the handle held by `value`, if any.
    pub fn push_value(&mut self, value: &Value) {
        if let Value::Obj(obj) = value {
            self.items.push(*obj);
        }
    }

    /// Adds an optional handle.
    pub fn push_opt(&mut self, obj: Option<ObjRef>) {
        if let Some(obj) = obj {
            self.items.push(obj);
        }
    }

    /// Takes the most recently pushed handle.
    pub fn pop(&mut self) -> Option<ObjRef> {
        self.items.pop()
    }

    /// Number of pending handles.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Removes and returns every pending handle.
    pub fn take(&mut self) -> Vec<ObjRef> {
        std::mem::take(&mut self.items)
    }
}
