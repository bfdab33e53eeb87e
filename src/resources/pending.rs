//! # Pending value buffering for remote attributes.
//!
//! Writes to remote attributes never touch the substrate directly: they land
//! in a [`PendingValue`], and the attribute loop flushes the buffer with one
//! `attr_set` task. Rapid local writes therefore collapse into a single
//! remote update.
//!
//! A buffer holds at most one full **replacement** plus an ordered queue of
//! incremental **list operations**:
//!
//! - [`PendingValue::set`] stores a replacement and drops previously queued
//!   operations (they were relative to a value that no longer matters).
//! - [`PendingValue::add`] / [`PendingValue::remove`] / [`PendingValue::clear_list`]
//!   queue element operations, applied in arrival order on top of the
//!   replacement (or, when there is none, the current value).
//!
//! ## Rules
//! - `add` is add-if-absent; `remove` removes every equal element.
//! - List operations against a non-list base promote it first: `Null`
//!   becomes an empty list, a scalar becomes a one-element list.
//! - An empty buffer means "nothing to flush": the attribute goes clean
//!   without any set being issued.

use crate::model::Value;

/// A queued incremental operation against a collection attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum ListOp {
    /// Append the value unless an equal element is already present.
    Add(Value),
    /// Remove every element equal to the value.
    Remove(Value),
    /// Empty the collection.
    Clear,
}

/// Buffered, not-yet-flushed writes for one attribute.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PendingValue {
    replace: Option<Value>,
    ops: Vec<ListOp>,
}

impl PendingValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when there is nothing to flush.
    pub fn is_empty(&self) -> bool {
        self.replace.is_none() && self.ops.is_empty()
    }

    /// Buffers a full replacement, dropping previously queued operations.
    pub fn set(&mut self, value: Value) {
        self.replace = Some(value);
        self.ops.clear();
    }

    /// Queues an add-if-absent element operation.
    pub fn add(&mut self, value: Value) {
        self.ops.push(ListOp::Add(value));
    }

    /// Queues a remove-all-equal element operation.
    pub fn remove(&mut self, value: Value) {
        self.ops.push(ListOp::Remove(value));
    }

    /// Queues a collection wipe.
    pub fn clear_list(&mut self) {
        self.ops.push(ListOp::Clear);
    }

    /// Drops the whole buffer (after a successful flush).
    pub fn reset(&mut self) {
        self.replace = None;
        self.ops.clear();
    }

    /// Computes the value this buffer converges the attribute to, given the
    /// currently applied value.
    ///
    /// Starts from the replacement if one is buffered, otherwise from
    /// `current`; then applies the queued list operations in order. With no
    /// operations queued the base is returned as-is.
    pub fn resolve(&self, current: Option<&Value>) -> Value {
        let base = self
            .replace
            .clone()
            .or_else(|| current.cloned())
            .unwrap_or(Value::Null);

        if self.ops.is_empty() {
            return base;
        }

        let mut items = match base {
            Value::List(items) => items,
            Value::Null => Vec::new(),
            scalar => vec![scalar],
        };

        for op in &self.ops {
            match op {
                ListOp::Add(v) => {
                    if !items.contains(v) {
                        items.push(v.clone());
                    }
                }
                ListOp::Remove(v) => {
                    items.retain(|item| item != v);
                }
                ListOp::Clear => items.clear(),
            }
        }
        Value::List(items)
    }
}
