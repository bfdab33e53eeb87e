//! # Per-instance engine state.
//!
//! A [`Record`] is everything the engine tracks about one registered
//! resource: its identity, schema and driver, the resource state machine,
//! per-attribute cells, applied attribute values, and the diagnostic trail.
//! Records live behind `Arc` and are shared between the manager, the
//! resource actor, and attribute actors.
//!
//! ## Rules
//! - `state` transitions go through [`Record::set_state`], which keeps the
//!   `clean` / `init` / `failed` flags consistent with the new state.
//! - Applied values (`values`) always reflect what the substrate holds;
//!   buffered writes live in each cell's [`PendingValue`] until flushed.
//! - `write_lock` is held by the actor across the whole update phase and by
//!   every public write, so buffered mutations never interleave with an
//!   in-flight flush.
//! - The attribute `lock` in each [`AttrCell`] serializes that attribute's
//!   state transitions; it is never held across task execution.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use tokio::sync::{Mutex, Notify};

use crate::model::{Attrs, Requirement, ResourceId, ResourceSchema, Value};

use super::pending::PendingValue;
use super::resource::Resource;
use super::state::{AttributeState, Flag, ResourceState};

/// Convergence state of one remote attribute.
pub(crate) struct AttrCell {
    state: StdMutex<AttributeState>,
    pub(crate) pending: StdMutex<PendingValue>,
    /// Serializes this attribute's FSM; never held across task execution.
    pub(crate) lock: Mutex<()>,
}

impl AttrCell {
    fn new() -> Self {
        Self {
            state: StdMutex::new(AttributeState::Uninitialized),
            pending: StdMutex::new(PendingValue::new()),
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn state(&self) -> AttributeState {
        *self.state.lock().unwrap()
    }

    /// Swaps the state, returning the previous one.
    pub(crate) fn set_state(&self, next: AttributeState) -> AttributeState {
        std::mem::replace(&mut *self.state.lock().unwrap(), next)
    }

    /// True when nothing is buffered for this attribute.
    pub(crate) fn pending_empty(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }
}

/// Engine-side state of one registered resource instance.
pub(crate) struct Record {
    pub(crate) id: ResourceId,
    pub(crate) name: String,
    pub(crate) type_name: String,
    pub(crate) owner: Option<ResourceId>,
    pub(crate) managed: bool,
    pub(crate) schema: Arc<ResourceSchema>,
    pub(crate) driver: Arc<dyn Resource>,
    /// Set by the converge pass that spawns this record's actor.
    pub(crate) launched: AtomicBool,
    state: StdMutex<ResourceState>,
    /// Held across the update phase and by every buffered write.
    pub(crate) write_lock: Mutex<()>,
    /// Wakes the parked actor after a write marks the record dirty.
    pub(crate) changed: Notify,
    /// Latched once the record first reaches `Initialized`.
    pub(crate) init: Flag,
    /// Set while the record is `Clean`; cleared on any re-entry.
    pub(crate) clean: Flag,
    /// Latched when the record fails terminally.
    pub(crate) failed: Flag,
    values: StdRwLock<Attrs>,
    /// One cell per remote attribute, fixed at registration.
    pub(crate) cells: BTreeMap<String, AttrCell>,
    trail: StdMutex<Vec<String>>,
    /// Instance-level requirements, merged with the schema's during the
    /// dependency wait.
    pub(crate) requirements: StdMutex<Vec<Requirement>>,
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .finish()
    }
}

impl Record {
    pub(crate) fn new(
        id: ResourceId,
        name: String,
        schema: Arc<ResourceSchema>,
        driver: Arc<dyn Resource>,
        owner: Option<ResourceId>,
        managed: bool,
    ) -> Arc<Self> {
        let cells = schema
            .attributes
            .values()
            .filter(|attr| attr.remote)
            .map(|attr| (attr.name.clone(), AttrCell::new()))
            .collect();
        Arc::new(Self {
            id,
            name,
            type_name: schema.type_name.clone(),
            owner,
            managed,
            schema,
            driver,
            launched: AtomicBool::new(false),
            state: StdMutex::new(ResourceState::Uninitialized),
            write_lock: Mutex::new(()),
            changed: Notify::new(),
            init: Flag::new(),
            clean: Flag::new(),
            failed: Flag::new(),
            values: StdRwLock::new(Attrs::new()),
            cells,
            trail: StdMutex::new(Vec::new()),
            requirements: StdMutex::new(Vec::new()),
        })
    }

    pub(crate) fn state(&self) -> ResourceState {
        *self.state.lock().unwrap()
    }

    /// Swaps the state, returning the previous one, and re-latches the
    /// lifecycle flags: `clean` tracks `Clean`, `init` and `failed` latch.
    pub(crate) fn set_state(&self, next: ResourceState) -> ResourceState {
        let prev = std::mem::replace(&mut *self.state.lock().unwrap(), next);
        match next {
            ResourceState::Clean => self.clean.set(),
            ResourceState::Failed => {
                self.clean.clear();
                self.failed.set();
            }
            ResourceState::Initialized => {
                self.clean.clear();
                self.init.set();
            }
            _ => self.clean.clear(),
        }
        prev
    }

    /// Applied value of one attribute.
    pub(crate) fn get_value(&self, attribute: &str) -> Option<Value> {
        self.values.read().unwrap().get(attribute).cloned()
    }

    /// Stores an applied value (substrate-confirmed or local).
    pub(crate) fn apply_value(&self, attribute: &str, value: Value) {
        self.values
            .write()
            .unwrap()
            .insert(attribute.to_string(), value);
    }

    /// Snapshot of all applied values.
    pub(crate) fn values(&self) -> Attrs {
        self.values.read().unwrap().clone()
    }

    /// Desired value: the buffered pending value resolved over the applied
    /// one; falls back to the applied value when nothing is buffered.
    pub(crate) fn desired(&self, attribute: &str) -> Option<Value> {
        if let Some(cell) = self.cells.get(attribute) {
            let pending = cell.pending.lock().unwrap();
            if !pending.is_empty() {
                let applied = self.get_value(attribute);
                return Some(pending.resolve(applied.as_ref()));
            }
        }
        self.get_value(attribute)
    }

    /// Merges a task-produced map into the applied values, keeping only
    /// keys the schema declares. Returns the ignored keys.
    pub(crate) fn merge_applied(&self, map: Attrs) -> Vec<String> {
        let mut ignored = Vec::new();
        let mut values = self.values.write().unwrap();
        for (key, value) in map {
            if self.schema.attribute(&key).is_some() {
                values.insert(key, value);
            } else {
                ignored.push(key);
            }
        }
        ignored
    }

    /// Appends a line to the diagnostic trail.
    pub(crate) fn note(&self, message: impl Into<String>) {
        self.trail.lock().unwrap().push(message.into());
    }

    /// Snapshot of the diagnostic trail.
    pub(crate) fn trail(&self) -> Vec<String> {
        self.trail.lock().unwrap().clone()
    }

    /// Minimal record for unit tests: bare schema, hookless driver.
    #[cfg(test)]
    pub(crate) fn stub(name: &str, type_name: &str) -> Arc<Self> {
        struct Hookless;
        impl Resource for Hookless {}
        Record::new(
            ResourceId(1),
            name.to_string(),
            Arc::new(ResourceSchema::new(type_name)),
            Arc::new(Hookless),
            None,
            true,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrKind, AttributeSchema};

    fn remote_schema() -> Arc<ResourceSchema> {
        Arc::new(
            ResourceSchema::new("iface")
                .attr(AttributeSchema::new("mtu", AttrKind::Int).remote())
                .attr(AttributeSchema::new("comment", AttrKind::Str)),
        )
    }

    fn record(schema: Arc<ResourceSchema>) -> Arc<Record> {
        struct Hookless;
        impl Resource for Hookless {}
        Record::new(
            ResourceId(7),
            "iface-7".to_string(),
            schema,
            Arc::new(Hookless),
            None,
            true,
        )
    }

    #[test]
    fn test_cells_cover_remote_attributes_only() {
        let rec = record(remote_schema());
        assert!(rec.cells.contains_key("mtu"));
        assert!(!rec.cells.contains_key("comment"));
        assert!(!rec.cells.contains_key("name"));
    }

    #[test]
    fn test_set_state_latches_flags() {
        let rec = record(remote_schema());
        assert_eq!(rec.state(), ResourceState::Uninitialized);

        rec.set_state(ResourceState::Initialized);
        assert!(rec.init.is_set());
        assert!(!rec.clean.is_set());

        rec.set_state(ResourceState::Clean);
        assert!(rec.clean.is_set());
        assert!(rec.init.is_set());

        let prev = rec.set_state(ResourceState::Dirty);
        assert_eq!(prev, ResourceState::Clean);
        assert!(!rec.clean.is_set());

        rec.set_state(ResourceState::Failed);
        assert!(rec.failed.is_set());
    }

    #[test]
    fn test_desired_resolves_pending_over_applied() {
        let rec = record(remote_schema());
        rec.apply_value("mtu", Value::Int(1500));
        assert_eq!(rec.desired("mtu"), Some(Value::Int(1500)));

        rec.cells["mtu"].pending.lock().unwrap().set(Value::Int(9000));
        assert_eq!(rec.desired("mtu"), Some(Value::Int(9000)));
        // Applied value is untouched until the flush lands.
        assert_eq!(rec.get_value("mtu"), Some(Value::Int(1500)));
    }

    #[test]
    fn test_merge_applied_filters_unknown_keys() {
        let rec = record(remote_schema());
        let mut map = Attrs::new();
        map.insert("mtu".into(), Value::Int(1500));
        map.insert("bogus".into(), Value::Bool(true));

        let ignored = rec.merge_applied(map);
        assert_eq!(ignored, vec!["bogus".to_string()]);
        assert_eq!(rec.get_value("mtu"), Some(Value::Int(1500)));
        assert_eq!(rec.get_value("bogus"), None);
    }

    #[test]
    fn test_trail_keeps_order() {
        let rec = record(remote_schema());
        rec.note("first");
        rec.note("second");
        assert_eq!(rec.trail(), vec!["first".to_string(), "second".to_string()]);
    }
}
