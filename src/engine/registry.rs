//! # Type registry: registration, reverse injection, capability resolution.
//!
//! [`TypeRegistry`] is the mutable staging area where resource types are
//! declared before an engine starts; [`TypeRegistry::freeze`] turns it into
//! the immutable [`TypeTable`] the manager consults for the rest of its
//! life.
//!
//! ## Reverse-attribute injection
//! Registering a type whose attribute declares a `reverse` name injects the
//! mirrored attribute into the *referenced* type's schema: an aggregate,
//! local, engine-maintained slot with the reversed multiplicity. The target
//! name may be concrete or abstract; an abstract target lands on every
//! implementer. Both registration orders work — declarations stay parked
//! for the registry's lifetime and land on each matching type as it
//! arrives. A target that already declares the attribute wins; the
//! injection is skipped.
//!
//! ## Capability resolution
//! `resolve(name, caps)` maps a reference-site type name to one concrete
//! candidate. A concrete name resolves to itself if its capability set
//! covers `caps`; an abstract name scans candidates in registration order
//! and the first covering candidate wins. No covering candidate is a hard
//! [`RuntimeError::NoCandidate`]; a name nothing implements is
//! [`RuntimeError::UnknownType`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::RuntimeError;
use crate::model::{AttrKind, AttributeSchema, ResourceSchema};

use super::types::TypeSpec;

/// Reverse attribute parked against its target name. Kept for the
/// registry's lifetime: an abstract target matches every implementer,
/// including ones registered later.
struct PendingReverse {
    target: String,
    attr: AttributeSchema,
}

/// Mutable set of type registrations.
///
/// ```
/// use labvisor::{Resource, ResourceSchema, TypeRegistry, TypeSpec};
///
/// struct Host;
/// impl Resource for Host {}
///
/// let mut registry = TypeRegistry::new();
/// registry
///     .register(TypeSpec::new(ResourceSchema::new("host"), || Host).implements("node"))
///     .unwrap();
/// ```
pub struct TypeRegistry {
    specs: Vec<TypeSpec>,
    index: BTreeMap<String, usize>,
    pending_reverses: Vec<PendingReverse>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            index: BTreeMap::new(),
            pending_reverses: Vec::new(),
        }
    }

    /// Registers one type.
    ///
    /// - Duplicate concrete names are rejected.
    /// - The `implements` name (if any) becomes a schema tag.
    /// - Declared reverse attributes are injected into every type answering
    ///   to the target name (concrete or abstract), whether registered
    ///   before or after this one.
    pub fn register(&mut self, mut spec: TypeSpec) -> Result<(), RuntimeError> {
        let type_name = spec.schema.type_name.clone();
        if self.index.contains_key(&type_name) {
            return Err(RuntimeError::DuplicateName { name: type_name });
        }
        if let Some(abstract_name) = &spec.implements {
            spec.schema = spec.schema.clone().tag(abstract_name.clone());
        }

        // Reverse attributes parked by earlier registrations land on the
        // newcomer first.
        for pending in &self.pending_reverses {
            if spec.schema.has_type(&pending.target)
                && spec.schema.attribute(&pending.attr.name).is_none()
            {
                spec.schema
                    .attributes
                    .insert(pending.attr.name.clone(), pending.attr.clone());
            }
        }

        // Collect this type's outgoing reverse declarations before it
        // moves into the table.
        let outgoing: Vec<PendingReverse> = spec
            .schema
            .attributes
            .values()
            .filter_map(|attr| {
                let (Some(reverse_name), Some(target)) = (&attr.reverse, attr.kind.ref_target())
                else {
                    return None;
                };
                Some(PendingReverse {
                    target: target.to_string(),
                    attr: reverse_of(reverse_name, &type_name, attr),
                })
            })
            .collect();

        self.index.insert(type_name.clone(), self.specs.len());
        self.specs.push(spec);

        for pending in outgoing {
            self.inject(&pending);
            self.pending_reverses.push(pending);
        }
        Ok(())
    }

    /// Lands one reverse injection on every registered type answering to
    /// its target name.
    fn inject(&mut self, pending: &PendingReverse) {
        for spec in &mut self.specs {
            if !spec.schema.has_type(&pending.target) {
                continue;
            }
            // An attribute the target declares itself is left alone.
            if spec.schema.attribute(&pending.attr.name).is_none() {
                spec.schema
                    .attributes
                    .insert(pending.attr.name.clone(), pending.attr.clone());
            }
        }
    }

    /// Looks up a registered spec by concrete name.
    pub fn get(&self, type_name: &str) -> Option<&TypeSpec> {
        self.index.get(type_name).map(|&slot| &self.specs[slot])
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Consumes the registry into the immutable table the engine keeps.
    ///
    /// Parked reverse declarations die with the registry: a target type
    /// that never arrived never gets the injection.
    pub fn freeze(self) -> TypeTable {
        let entries: Vec<Arc<TypeEntry>> = self
            .specs
            .into_iter()
            .map(|spec| {
                Arc::new(TypeEntry {
                    schema: Arc::new(spec.schema.clone()),
                    spec,
                })
            })
            .collect();
        let index = entries
            .iter()
            .enumerate()
            .map(|(slot, entry)| (entry.spec.schema.type_name.clone(), slot))
            .collect();
        TypeTable { entries, index }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the mirrored attribute injected into `source_attr`'s target type.
fn reverse_of(reverse_name: &str, source_type: &str, source_attr: &AttributeSchema) -> AttributeSchema {
    let mut attr = AttributeSchema::new(reverse_name, AttrKind::Ref(source_type.to_string()))
        .multiplicity(source_attr.multiplicity.reverse());
    attr.aggregate = true;
    attr
}

/// One frozen registration.
pub(crate) struct TypeEntry {
    pub(crate) spec: TypeSpec,
    /// Shared schema handed to every record of this type.
    pub(crate) schema: Arc<ResourceSchema>,
}

impl TypeEntry {
    pub(crate) fn type_name(&self) -> &str {
        &self.spec.schema.type_name
    }
}

/// Immutable registration table consulted by the engine.
pub(crate) struct TypeTable {
    /// Registration order, which capability resolution scans.
    entries: Vec<Arc<TypeEntry>>,
    index: BTreeMap<String, usize>,
}

impl TypeTable {
    /// Entry for a concrete type name.
    pub(crate) fn get(&self, type_name: &str) -> Option<&Arc<TypeEntry>> {
        self.index.get(type_name).map(|&slot| &self.entries[slot])
    }

    /// All entries whose concrete name or tags answer to `name`.
    pub(crate) fn answering_to<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Arc<TypeEntry>> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.spec.schema.has_type(name))
    }

    /// Resolves a reference-site type name against required capabilities.
    ///
    /// Concrete names must cover the capabilities themselves; abstract names
    /// pick the first implementing candidate (registration order) whose
    /// capability set covers them.
    pub(crate) fn resolve(
        &self,
        name: &str,
        caps: &BTreeSet<String>,
    ) -> Result<Arc<TypeEntry>, RuntimeError> {
        if let Some(entry) = self.get(name) {
            if caps.is_subset(&entry.spec.capabilities) {
                return Ok(Arc::clone(entry));
            }
            return Err(RuntimeError::NoCandidate {
                type_name: name.to_string(),
                capabilities: caps.iter().cloned().collect(),
            });
        }

        let mut implemented = false;
        for entry in &self.entries {
            if entry.spec.implements.as_deref() != Some(name) {
                continue;
            }
            implemented = true;
            if caps.is_subset(&entry.spec.capabilities) {
                return Ok(Arc::clone(entry));
            }
        }
        if implemented {
            Err(RuntimeError::NoCandidate {
                type_name: name.to_string(),
                capabilities: caps.iter().cloned().collect(),
            })
        } else {
            Err(RuntimeError::UnknownType {
                type_name: name.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Multiplicity;
    use crate::resources::Resource;

    struct Bare;
    impl Resource for Bare {}

    fn spec(schema: ResourceSchema) -> TypeSpec {
        TypeSpec::new(schema, || Bare)
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut reg = TypeRegistry::new();
        reg.register(spec(ResourceSchema::new("node"))).unwrap();
        let err = reg.register(spec(ResourceSchema::new("node"))).unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateName { .. }));
    }

    #[test]
    fn test_implements_becomes_tag() {
        let mut reg = TypeRegistry::new();
        reg.register(spec(ResourceSchema::new("lxd")).implements("node"))
            .unwrap();
        assert!(reg.get("lxd").unwrap().schema.has_type("node"));
    }

    #[test]
    fn test_reverse_injected_target_first() {
        let mut reg = TypeRegistry::new();
        reg.register(spec(ResourceSchema::new("node"))).unwrap();
        reg.register(spec(ResourceSchema::new("interface").attr(
            AttributeSchema::new("node", AttrKind::Ref("node".into()))
                .multiplicity(Multiplicity::ManyToOne)
                .reverse("interfaces"),
        )))
        .unwrap();

        let injected = reg.get("node").unwrap().schema.attribute("interfaces").unwrap();
        assert!(injected.aggregate);
        assert!(!injected.remote);
        assert_eq!(injected.multiplicity, Multiplicity::OneToMany);
        assert_eq!(injected.kind, AttrKind::Ref("interface".into()));
    }

    #[test]
    fn test_reverse_injected_source_first() {
        let mut reg = TypeRegistry::new();
        reg.register(spec(ResourceSchema::new("interface").attr(
            AttributeSchema::new("node", AttrKind::Ref("node".into()))
                .multiplicity(Multiplicity::ManyToOne)
                .reverse("interfaces"),
        )))
        .unwrap();
        reg.register(spec(ResourceSchema::new("node"))).unwrap();

        assert!(reg.get("node").unwrap().schema.attribute("interfaces").is_some());
    }

    #[test]
    fn test_reverse_lands_on_abstract_implementers() {
        let mut reg = TypeRegistry::new();
        reg.register(spec(ResourceSchema::new("lxd")).implements("node"))
            .unwrap();
        reg.register(spec(ResourceSchema::new("iface").attr(
            AttributeSchema::new("node", AttrKind::Ref("node".into()))
                .multiplicity(Multiplicity::ManyToOne)
                .reverse("ifaces"),
        )))
        .unwrap();
        reg.register(spec(ResourceSchema::new("phys")).implements("node"))
            .unwrap();

        // Registered before and after the declaration, both implementers
        // carry the injected aggregate.
        assert!(reg.get("lxd").unwrap().schema.attribute("ifaces").is_some());
        assert!(reg.get("phys").unwrap().schema.attribute("ifaces").is_some());
    }

    #[test]
    fn test_reverse_does_not_clobber_declared_attribute() {
        let mut reg = TypeRegistry::new();
        reg.register(spec(ResourceSchema::new("node").attr(
            AttributeSchema::new("interfaces", AttrKind::Str),
        )))
        .unwrap();
        reg.register(spec(ResourceSchema::new("interface").attr(
            AttributeSchema::new("node", AttrKind::Ref("node".into())).reverse("interfaces"),
        )))
        .unwrap();

        let kept = reg.get("node").unwrap().schema.attribute("interfaces").unwrap();
        assert_eq!(kept.kind, AttrKind::Str);
        assert!(!kept.aggregate);
    }

    #[test]
    fn test_resolve_concrete_checks_capabilities() {
        let mut reg = TypeRegistry::new();
        reg.register(spec(ResourceSchema::new("vpp")).capability("icn"))
            .unwrap();
        let table = reg.freeze();

        assert!(table.resolve("vpp", &BTreeSet::new()).is_ok());
        let mut caps = BTreeSet::new();
        caps.insert("dpdk".to_string());
        assert!(matches!(
            table.resolve("vpp", &caps),
            Err(RuntimeError::NoCandidate { .. })
        ));
    }

    #[test]
    fn test_resolve_abstract_first_covering_wins() {
        let mut reg = TypeRegistry::new();
        reg.register(spec(ResourceSchema::new("plain")).implements("forwarder"))
            .unwrap();
        reg.register(
            spec(ResourceSchema::new("vpp"))
                .implements("forwarder")
                .capability("icn"),
        )
        .unwrap();
        let table = reg.freeze();

        let any = table.resolve("forwarder", &BTreeSet::new()).unwrap();
        assert_eq!(any.type_name(), "plain");

        let mut caps = BTreeSet::new();
        caps.insert("icn".to_string());
        let icn = table.resolve("forwarder", &caps).unwrap();
        assert_eq!(icn.type_name(), "vpp");
    }

    #[test]
    fn test_resolve_unknown_vs_no_candidate() {
        let mut reg = TypeRegistry::new();
        reg.register(spec(ResourceSchema::new("plain")).implements("forwarder"))
            .unwrap();
        let table = reg.freeze();

        assert!(matches!(
            table.resolve("router", &BTreeSet::new()),
            Err(RuntimeError::UnknownType { .. })
        ));
        let mut caps = BTreeSet::new();
        caps.insert("icn".to_string());
        assert!(matches!(
            table.resolve("forwarder", &caps),
            Err(RuntimeError::NoCandidate { .. })
        ));
    }
}
