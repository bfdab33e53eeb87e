//! # Type registrations: schema + driver factory + capabilities.
//!
//! A [`TypeSpec`] bundles everything the engine needs to instantiate a
//! resource type: its [`ResourceSchema`], a factory producing the driver,
//! the abstract name it implements (if any), and the capability set it
//! advertises. The `implements`/capability pair is what lets an abstract
//! reference like `"node"` pick between an LXD-container type and a
//! physical-host type at runtime.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::model::ResourceSchema;
use crate::resources::Resource;

/// Everything registered for one concrete resource type.
///
/// Built with chained setters around a schema and a driver factory:
///
/// ```
/// use labvisor::{Resource, ResourceSchema, TypeSpec};
///
/// struct Container;
/// impl Resource for Container {}
///
/// let spec = TypeSpec::new(ResourceSchema::new("lxd-container"), || Container)
///     .implements("node")
///     .capability("linux")
///     .capability("isolated");
/// assert_eq!(spec.schema.type_name, "lxd-container");
/// ```
#[derive(Clone)]
pub struct TypeSpec {
    /// Attribute and ordering declarations.
    pub schema: ResourceSchema,
    /// Builds one driver instance per registered resource.
    pub(crate) factory: Arc<dyn Fn() -> Arc<dyn Resource> + Send + Sync>,
    /// Abstract type name this concrete type implements, if any.
    pub implements: Option<String>,
    /// Capabilities advertised to capability resolution.
    pub capabilities: BTreeSet<String>,
}

impl TypeSpec {
    /// New registration from a schema and a driver constructor.
    pub fn new<R, F>(schema: ResourceSchema, factory: F) -> Self
    where
        R: Resource,
        F: Fn() -> R + Send + Sync + 'static,
    {
        Self {
            schema,
            factory: Arc::new(move || Arc::new(factory())),
            implements: None,
            capabilities: BTreeSet::new(),
        }
    }

    /// Declares the abstract (factory) name this type implements.
    ///
    /// The name is also added to the schema's tags, so `by_type` lookups
    /// and `after` constraints naming the abstract type match instances of
    /// this one.
    pub fn implements(mut self, abstract_name: impl Into<String>) -> Self {
        self.implements = Some(abstract_name.into());
        self
    }

    /// Advertises one capability.
    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Advertises several capabilities at once.
    pub fn capabilities(mut self, caps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.capabilities.extend(caps.into_iter().map(Into::into));
        self
    }

    pub(crate) fn build_driver(&self) -> Arc<dyn Resource> {
        (self.factory)()
    }
}

impl std::fmt::Debug for TypeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeSpec")
            .field("type_name", &self.schema.type_name)
            .field("implements", &self.implements)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;
    impl Resource for Bare {}

    #[test]
    fn test_builder_collects_capabilities() {
        let spec = TypeSpec::new(ResourceSchema::new("vpp"), || Bare)
            .implements("forwarder")
            .capability("icn")
            .capabilities(["dpdk", "icn"]);

        assert_eq!(spec.implements.as_deref(), Some("forwarder"));
        assert_eq!(spec.capabilities.len(), 2);
        assert!(spec.capabilities.contains("dpdk"));
    }

    #[test]
    fn test_factory_builds_fresh_drivers() {
        let spec = TypeSpec::new(ResourceSchema::new("n"), || Bare);
        let a = spec.build_driver();
        let b = spec.build_driver();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
