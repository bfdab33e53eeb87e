//! # Attribute values and resource identifiers.
//!
//! [`Value`] is the dynamic value model shared by attributes, task results,
//! and the public read/write API. It stays deliberately small: scalars,
//! resource references, lists, and string-keyed maps — the shapes that
//! probe/create tasks report and that attribute flushes consume.
//!
//! ## Rules
//! - Task results are `Value`s; only [`Value::Map`] participates in
//!   concurrent merging and attribute application.
//! - Collection attributes hold [`Value::List`]; reference attributes hold
//!   [`Value::Ref`] (or a list of them).
//! - [`Attrs`] is the ordered map used everywhere a named value set travels
//!   (creation attributes, task outputs, applied values).

use std::collections::BTreeMap;
use std::fmt;

/// Engine-assigned identifier of a resource instance.
///
/// Ids are allocated sequentially at registration and are unique within one
/// engine. They are plain data: cheap to copy, ordered, hashable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub(crate) u64);

impl ResourceId {
    /// Raw numeric form, for diagnostics.
    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named set of values, ordered by key.
pub type Attrs = BTreeMap<String, Value>;

/// Dynamic attribute/task value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// String scalar.
    Str(String),
    /// Reference to another resource instance.
    Ref(ResourceId),
    /// Ordered collection of values.
    List(Vec<Value>),
    /// String-keyed mapping (task outputs, nested records).
    Map(Attrs),
}

impl Value {
    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrows the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the referenced resource id, if this is a reference.
    pub fn as_ref_id(&self) -> Option<ResourceId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Borrows the element list, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrows the mapping, if this is a map.
    pub fn as_map(&self) -> Option<&Attrs> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Every resource id reachable from this value (refs inside lists
    /// included; maps are not descended, they are task-output shapes).
    pub fn ref_ids(&self) -> Vec<ResourceId> {
        match self {
            Value::Ref(id) => vec![*id],
            Value::List(items) => items.iter().filter_map(Value::as_ref_id).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Ref(id) => write!(f, "{id}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<ResourceId> for Value {
    fn from(id: ResourceId) -> Self {
        Value::Ref(id)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_ids_from_list() {
        let v = Value::List(vec![
            Value::Ref(ResourceId(1)),
            Value::Int(9),
            Value::Ref(ResourceId(4)),
        ]);
        assert_eq!(v.ref_ids(), vec![ResourceId(1), ResourceId(4)]);
        assert!(Value::Int(9).ref_ids().is_empty());
    }

    #[test]
    fn test_display_is_compact() {
        let mut m = Attrs::new();
        m.insert("up".into(), Value::Bool(true));
        m.insert("mtu".into(), Value::Int(1500));
        let v = Value::Map(m);
        assert_eq!(v.to_string(), "{mtu: 1500, up: true}");
    }
}
