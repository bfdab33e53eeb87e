//! # The resource driver trait.
//!
//! A [`Resource`] implementation makes one resource type real: it knows how
//! to probe, create, configure, and tear down instances on whatever
//! substrate it fronts (a hypervisor, a kernel netlink socket, a remote
//! API). Hooks **build and return tasks**; they never execute work
//! themselves, so a hook is always a cheap synchronous call and the engine
//! stays in charge of scheduling, retries, and cancellation.
//!
//! Every hook receives a [`ResourceHandle`] — a live view of the instance
//! being converged — for reading attribute values and leaving diagnostic
//! notes.
//!
//! ## Rules
//! - `probe` must settle with [`TaskError::NotFound`](crate::TaskError) when
//!   the instance does not exist; the default probe does exactly that, so a
//!   hookless type is simply created on first convergence.
//! - `create` should tolerate losing a creation race: settle with
//!   [`TaskError::AlreadyExists`](crate::TaskError) rather than a failure.
//! - `attr_get`/`attr_set` returning `None` means "no handler for this
//!   attribute"; the engine skips the probe (get) or fails the flush (set).
//! - `delete` returning `None` marks teardown as explicitly unimplemented:
//!   the instance is dropped from the engine with a trail notice and the
//!   substrate object is left behind.

use std::sync::Arc;

use crate::error::TaskError;
use crate::model::{Attrs, ResourceId, Value};
use crate::tasks::{Action, Expr, Task};

use super::record::Record;

/// Declaration of one owned child: the type to instantiate and its initial
/// attributes.
///
/// Returned by [`Resource::sub_resources`] as the leaves of a
/// [`SubResources`] expression. The engine registers each child with the
/// declaring resource as owner and drives it per the expression's ordering.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubSpec {
    /// Concrete or abstract type name to instantiate.
    pub type_name: String,
    /// Initial attribute values.
    pub attrs: Attrs,
}

impl SubSpec {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attrs: Attrs::new(),
        }
    }

    /// Adds an initial attribute value.
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(attribute.into(), value.into());
        self
    }

    /// Wraps this spec into a single-leaf expression.
    pub fn into_expr(self) -> SubResources {
        Expr::Leaf(self)
    }
}

impl From<SubSpec> for SubResources {
    fn from(spec: SubSpec) -> Self {
        spec.into_expr()
    }
}

/// Ordered composition of owned children.
///
/// The same algebra as [`Task`], with child specs as leaves: `|` registers
/// and converges children concurrently, `>>` and `.pipe(..)` force one
/// child to settle before the next is registered.
pub type SubResources = Expr<SubSpec>;

/// Live view of one resource instance, handed to driver hooks.
///
/// Reads are **desired-state** reads: buffered writes that have not yet been
/// flushed to the substrate are already visible through [`get`](Self::get),
/// so a hook always builds tasks against the configuration it is converging
/// towards.
#[derive(Clone)]
pub struct ResourceHandle {
    pub(crate) record: Arc<Record>,
}

impl ResourceHandle {
    pub(crate) fn new(record: Arc<Record>) -> Self {
        Self { record }
    }

    /// Engine-assigned identity.
    pub fn id(&self) -> ResourceId {
        self.record.id
    }

    /// Unique instance name.
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Concrete type name.
    pub fn type_name(&self) -> &str {
        &self.record.type_name
    }

    /// Owning resource, for auto-instantiated and sub-resources.
    pub fn owner(&self) -> Option<ResourceId> {
        self.record.owner
    }

    /// False for pre-existing instances registered observe-only.
    pub fn managed(&self) -> bool {
        self.record.managed
    }

    /// Desired value of an attribute: the buffered pending value resolved
    /// over the applied one, or the applied value when nothing is buffered.
    pub fn get(&self, attribute: &str) -> Option<Value> {
        self.record.desired(attribute)
    }

    /// Appends a line to this instance's diagnostic trail.
    pub fn note(&self, message: impl Into<String>) {
        self.record.note(message);
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .field("type_name", &self.record.type_name)
            .finish()
    }
}

/// Driver hooks for one resource type.
///
/// All hooks have defaults, so a minimal driver is an empty impl: such a
/// type probes not-found once, "creates" with no work, and has no remote
/// attributes. Implement exactly the hooks the substrate needs.
#[allow(unused_variables)]
pub trait Resource: Send + Sync + 'static {
    /// Pre-creation setup (runs once deps are resolved, before the probe).
    fn initialize(&self, handle: &ResourceHandle) -> Task {
        Task::empty()
    }

    /// Existence check. Settle with a map of discovered attribute values
    /// when the instance exists, with [`TaskError::NotFound`] when it does
    /// not. The default reports not-found.
    fn probe(&self, handle: &ResourceHandle) -> Task {
        Action::inline(format!("{}:probe", handle.name()), || Err(TaskError::NotFound)).into_task()
    }

    /// Brings the instance into existence. A map result is merged into the
    /// applied attribute values.
    fn create(&self, handle: &ResourceHandle) -> Task {
        Task::empty()
    }

    /// Reads one remote attribute from the substrate. A map result is merged
    /// into the applied values; any other result is stored under `attribute`
    /// itself. `None` skips the read and leaves the attribute unknown.
    fn attr_get(&self, handle: &ResourceHandle, attribute: &str) -> Option<Task> {
        None
    }

    /// Writes one remote attribute to the substrate. `value` is the resolved
    /// pending value. `None` means the driver cannot set this attribute and
    /// fails the flush.
    fn attr_set(&self, handle: &ResourceHandle, attribute: &str, value: &Value) -> Option<Task> {
        None
    }

    /// Owned children to register and converge alongside this instance.
    fn sub_resources(&self, handle: &ResourceHandle) -> SubResources {
        Expr::empty()
    }

    /// Removes the instance from the substrate during teardown. `None`
    /// marks deletion as unimplemented (skipped with a trail notice).
    fn delete(&self, handle: &ResourceHandle) -> Option<Task> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;
    impl Resource for Bare {}

    #[test]
    fn test_sub_spec_builder() {
        let spec = SubSpec::new("interface")
            .with("mtu", 1500i64)
            .with("up", true);
        assert_eq!(spec.type_name, "interface");
        assert_eq!(spec.attrs.get("mtu"), Some(&Value::Int(1500)));
        assert_eq!(spec.attrs.get("up"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_sub_resources_compose() {
        let both = SubSpec::new("a").into_expr() | SubSpec::new("b").into_expr();
        assert_eq!(both.len(), 2);

        let ordered = SubSpec::new("a").into_expr() >> SubSpec::new("b").into_expr();
        assert!(matches!(ordered, Expr::Sequential(_)));
    }

    #[tokio::test]
    async fn test_default_probe_reports_not_found() {
        let record = Record::stub("node-1", "node");
        let handle = ResourceHandle::new(record);
        let task = Bare.probe(&handle);

        let exec = Arc::new(crate::tasks::Executor::new(1));
        let out = task.run(exec, None).await;
        assert!(matches!(out, Err(TaskError::NotFound)));
    }

    #[test]
    fn test_default_hooks_are_empty() {
        let record = Record::stub("node-1", "node");
        let handle = ResourceHandle::new(record);
        assert!(Bare.initialize(&handle).is_empty());
        assert!(Bare.create(&handle).is_empty());
        assert!(Bare.attr_get(&handle, "x").is_none());
        assert!(Bare.attr_set(&handle, "x", &Value::Null).is_none());
        assert!(Bare.sub_resources(&handle).is_empty());
        assert!(Bare.delete(&handle).is_none());
    }
}
