//! # Attribute schemas.
//!
//! An [`AttributeSchema`] describes one named slot on a resource type: its
//! value kind, multiplicity, where it converges (local vs. remote), and how
//! it participates in dependency wiring (reference kinds, reverse
//! attributes, auto-instantiation).
//!
//! ## Rules
//! - `remote` attributes buffer writes and converge through the attribute
//!   state machine; local attributes apply immediately and never converge.
//! - `key` attributes must settle before the owning resource is created.
//! - `auto` reference attributes are filled by capability resolution when a
//!   dependency wait finds them unset.
//! - A `reverse` name injects a mirrored attribute into the referenced type
//!   at registration; injected attributes are local and aggregate.

use std::fmt;
use std::sync::Arc;

use crate::model::value::{Attrs, Value};

/// Relationship arity between a referencing attribute and its target type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Multiplicity {
    /// Single value on both sides.
    OneToOne,
    /// This side holds a list; each target points back at one owner.
    OneToMany,
    /// Single value here; the target collects many.
    ManyToOne,
    /// Lists on both sides.
    ManyToMany,
}

impl Multiplicity {
    /// The arity seen from the target type, used when injecting reverse
    /// attributes.
    pub fn reverse(self) -> Multiplicity {
        match self {
            Multiplicity::OneToOne => Multiplicity::OneToOne,
            Multiplicity::OneToMany => Multiplicity::ManyToOne,
            Multiplicity::ManyToOne => Multiplicity::OneToMany,
            Multiplicity::ManyToMany => Multiplicity::ManyToMany,
        }
    }

    /// True when this side of the relation holds a list of values.
    pub fn is_collection(self) -> bool {
        matches!(self, Multiplicity::OneToMany | Multiplicity::ManyToMany)
    }
}

/// Value kind an attribute accepts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrKind {
    /// Boolean scalar.
    Bool,
    /// Integer scalar.
    Int,
    /// String scalar.
    Str,
    /// Reference to an instance of the named type (concrete or abstract).
    Ref(String),
}

impl AttrKind {
    /// Target type name for reference kinds.
    pub fn ref_target(&self) -> Option<&str> {
        match self {
            AttrKind::Ref(t) => Some(t),
            _ => None,
        }
    }
}

/// Default applied at registration when the caller left an attribute unset.
#[derive(Clone)]
pub enum DefaultValue {
    /// A fixed value.
    Static(Value),
    /// Computed from the attributes already resolved for the new instance.
    Computed(Arc<dyn Fn(&Attrs) -> Value + Send + Sync>),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(v) => write!(f, "Static({v})"),
            DefaultValue::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// Schema of one attribute on a resource type.
///
/// Built with chained setters; only `name` and `kind` are required:
///
/// ```
/// use labvisor::{AttrKind, AttributeSchema, Multiplicity};
///
/// let attr = AttributeSchema::new("interfaces", AttrKind::Ref("interface".into()))
///     .multiplicity(Multiplicity::OneToMany)
///     .reverse("node");
/// assert!(attr.is_ref());
/// assert!(attr.is_collection());
/// ```
#[derive(Clone, Debug)]
pub struct AttributeSchema {
    /// Attribute name, unique within its resource type.
    pub name: String,
    /// Accepted value kind.
    pub kind: AttrKind,
    /// Relationship arity; non-reference attributes are one-to-one.
    pub multiplicity: Multiplicity,
    /// Must be set (directly, by default, or by auto-instantiation) before
    /// the resource can be created.
    pub mandatory: bool,
    /// Rejects writes through the public API.
    pub read_only: bool,
    /// Participates in the identity phase before creation.
    pub key: bool,
    /// Converges against the substrate through get/set tasks.
    pub remote: bool,
    /// Eligible for capability-driven auto-instantiation when unset.
    pub auto: bool,
    /// Maintained by the engine (reverse side of a relation); never
    /// converged, never written directly.
    pub aggregate: bool,
    /// Default applied at registration.
    pub default: Option<DefaultValue>,
    /// Name of the mirrored attribute to inject into the referenced type.
    pub reverse: Option<String>,
}

impl AttributeSchema {
    /// New local, optional, writable scalar attribute.
    pub fn new(name: impl Into<String>, kind: AttrKind) -> Self {
        Self {
            name: name.into(),
            kind,
            multiplicity: Multiplicity::OneToOne,
            mandatory: false,
            read_only: false,
            key: false,
            remote: false,
            auto: false,
            aggregate: false,
            default: None,
            reverse: None,
        }
    }

    pub fn multiplicity(mut self, m: Multiplicity) -> Self {
        self.multiplicity = m;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Marks the attribute as part of the resource identity. Key attributes
    /// are remote by definition.
    pub fn key(mut self) -> Self {
        self.key = true;
        self.remote = true;
        self
    }

    pub fn remote(mut self) -> Self {
        self.remote = true;
        self
    }

    pub fn auto(mut self) -> Self {
        self.auto = true;
        self
    }

    pub fn default_value(mut self, v: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(v.into()));
        self
    }

    pub fn computed(mut self, f: impl Fn(&Attrs) -> Value + Send + Sync + 'static) -> Self {
        self.default = Some(DefaultValue::Computed(Arc::new(f)));
        self
    }

    pub fn reverse(mut self, name: impl Into<String>) -> Self {
        self.reverse = Some(name.into());
        self
    }

    /// True for reference kinds.
    pub fn is_ref(&self) -> bool {
        matches!(self.kind, AttrKind::Ref(_))
    }

    /// True when values of this attribute are lists.
    pub fn is_collection(&self) -> bool {
        self.multiplicity.is_collection()
    }
}
