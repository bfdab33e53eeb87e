//! # Resource type schemas.
//!
//! A [`ResourceSchema`] declares everything the engine needs to know about
//! a resource type before any instance exists: its attributes, the abstract
//! tags it answers to, ordering constraints against other types, and
//! structural capability requirements.
//!
//! ## Rules
//! - Every schema carries a built-in local `name` attribute; instance names
//!   are unique per engine and default to `<type>-<id>`.
//! - `after` delays dependency release until all instances of the named
//!   types are settled; `after_init` only waits for their initialization.
//! - Key attributes are the subset that is both `key` and `remote`; they
//!   converge before creation.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::attribute::{AttrKind, AttributeSchema};
use crate::model::requirement::Requirement;

/// Declaration of one resource type.
#[derive(Clone, Debug)]
pub struct ResourceSchema {
    /// Concrete type name, unique within a registry.
    pub type_name: String,
    /// Abstract names this type also answers to.
    pub tags: BTreeSet<String>,
    /// Attribute declarations by name.
    pub attributes: BTreeMap<String, AttributeSchema>,
    /// Types whose instances must settle before ours leave the wait phase.
    pub after: Vec<String>,
    /// Types whose instances must initialize before ours leave the wait
    /// phase.
    pub after_init: Vec<String>,
    /// Structural capability requirements shared by all instances.
    pub requirements: Vec<Requirement>,
}

impl ResourceSchema {
    /// New schema with only the built-in `name` attribute.
    pub fn new(type_name: impl Into<String>) -> Self {
        let mut attributes = BTreeMap::new();
        let name_attr = AttributeSchema::new("name", AttrKind::Str);
        attributes.insert(name_attr.name.clone(), name_attr);
        Self {
            type_name: type_name.into(),
            tags: BTreeSet::new(),
            attributes,
            after: Vec::new(),
            after_init: Vec::new(),
            requirements: Vec::new(),
        }
    }

    /// Adds an abstract tag this type answers to.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds (or replaces) an attribute declaration.
    pub fn attr(mut self, attr: AttributeSchema) -> Self {
        self.attributes.insert(attr.name.clone(), attr);
        self
    }

    /// All instances of `type_name` must settle before instances of this
    /// type proceed past their dependency wait.
    pub fn after(mut self, type_name: impl Into<String>) -> Self {
        self.after.push(type_name.into());
        self
    }

    /// All instances of `type_name` must reach initialization first.
    pub fn after_init(mut self, type_name: impl Into<String>) -> Self {
        self.after_init.push(type_name.into());
        self
    }

    /// Adds a structural capability requirement.
    pub fn require(mut self, req: Requirement) -> Self {
        self.requirements.push(req);
        self
    }

    /// Looks up an attribute declaration.
    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    /// True when this schema answers to `name` (concrete name or tag).
    pub fn has_type(&self, name: &str) -> bool {
        self.type_name == name || self.tags.contains(name)
    }

    /// Attributes that must hold a value before creation.
    pub fn mandatory_attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.values().filter(|a| a.mandatory)
    }

    /// Identity attributes converged ahead of creation.
    pub fn key_attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.values().filter(|a| a.key && a.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_attribute_is_built_in() {
        let schema = ResourceSchema::new("node");
        let name = schema.attribute("name").unwrap();
        assert_eq!(name.kind, AttrKind::Str);
        assert!(!name.remote);
        assert!(!name.mandatory);
    }

    #[test]
    fn test_has_type_matches_tags() {
        let schema = ResourceSchema::new("lxd-container").tag("node");
        assert!(schema.has_type("lxd-container"));
        assert!(schema.has_type("node"));
        assert!(!schema.has_type("switch"));
    }

    #[test]
    fn test_key_attributes_filter() {
        let schema = ResourceSchema::new("interface")
            .attr(AttributeSchema::new("mac", AttrKind::Str).key())
            .attr(AttributeSchema::new("mtu", AttrKind::Int).remote());
        let keys: Vec<_> = schema.key_attributes().map(|a| a.name.as_str()).collect();
        assert_eq!(keys, vec!["mac"]);
    }
}
