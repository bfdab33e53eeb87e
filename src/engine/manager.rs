//! # Manager: the engine facade.
//!
//! The [`Manager`] owns everything with a lifetime: the frozen type table,
//! the record index, the event bus, the task executor, the cancellation
//! token, and one actor task per managed resource. Callers declare resources
//! against it, converge, mutate attributes at runtime, and finally tear down
//! or shut down gracefully.
//!
//! ```text
//!              ┌──────────────────────────────────────────────────┐
//!              │                     Manager                      │
//! create ────► │ resolve type ► validate ► defaults ► Record      │
//! converge ──► │ launch actors ► await CLEAN/FAILED (fixpoint)    │
//! set/add ───► │ buffer write ► CLEAN→DIRTY ► wake actor          │
//! teardown ──► │ reverse topological delete                       │
//! shutdown ──► │ cancel ► drain actors within grace ► flush subs  │
//!              └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - Registration is synchronous bookkeeping; no driver code runs until the
//!   record is launched by [`Manager::commit`] or [`Manager::converge`].
//! - The manager only touches resource state where no actor step can be in
//!   flight: at registration (unmanaged records go straight to `CLEAN`), on
//!   writes against settled records (`CLEAN → DIRTY` under the write lock),
//!   and in teardown after the record has settled.
//! - [`Manager::converge`] runs to a fixpoint: records registered while the
//!   pass is in flight (sub-resources, auto-instantiated providers) are
//!   launched and awaited by the same call.
//! - Every mutation of a reference attribute maintains the mirrored
//!   aggregate on the referenced record, in both directions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::select;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::model::{Attrs, AttributeSchema, DefaultValue, Requirement, ResourceId, Value};
use crate::resources::{AttributeState, PendingValue, Record, ResourceState, SubSpec};
use crate::subscribers::{StateTracker, Subscribe, SubscriberSet};
use crate::tasks::{Executor, Task, TaskHandle};

use super::actor::ResourceActor;
use super::builder::ManagerBuilder;
use super::deps;
use super::registry::{TypeRegistry, TypeTable};
use super::shutdown;

/// Outcome summary of one [`Manager::converge`] pass.
///
/// Under [`ErrorPolicy::Quarantine`](crate::ErrorPolicy) a pass can succeed
/// with casualties; the summary names both camps so callers can decide
/// whether a partial testbed is usable.
#[derive(Clone, Debug, Default)]
pub struct Convergence {
    /// Names of resources that settled `CLEAN`, sorted.
    pub clean: Vec<String>,
    /// Names of resources quarantined in `FAILED`, sorted.
    pub quarantined: Vec<String>,
}

impl Convergence {
    /// True when no resource failed.
    pub fn is_fully_clean(&self) -> bool {
        self.quarantined.is_empty()
    }
}

/// Instance index: id is the primary key, names are unique aliases.
#[derive(Default)]
struct Index {
    by_id: BTreeMap<ResourceId, Arc<Record>>,
    by_name: BTreeMap<String, ResourceId>,
}

/// One buffered mutation against an attribute.
enum WriteOp {
    Set(Value),
    Add(Value),
    Remove(Value),
    Clear,
}

impl WriteOp {
    fn apply(self, pending: &mut PendingValue) {
        match self {
            WriteOp::Set(v) => pending.set(v),
            WriteOp::Add(v) => pending.add(v),
            WriteOp::Remove(v) => pending.remove(v),
            WriteOp::Clear => pending.clear_list(),
        }
    }
}

/// The orchestration engine.
///
/// Built through [`Manager::builder`]; always handled as `Arc<Manager>`
/// because actors and scheduled tasks hold their own references.
pub struct Manager {
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    pub(crate) exec: Arc<Executor>,
    pub(crate) token: CancellationToken,
    types: TypeTable,
    tracker: Arc<StateTracker>,
    next_id: AtomicU64,
    records: StdMutex<Index>,
    /// Join handles of launched actors, removed on teardown/shutdown.
    actors: StdMutex<BTreeMap<ResourceId, JoinHandle<()>>>,
    /// First abort wins; converge surfaces it as [`RuntimeError::Aborted`].
    abort: StdMutex<Option<(String, String)>>,
    /// Bus-to-subscribers pump; awaited on shutdown so final lines flush.
    listener: StdMutex<Option<JoinHandle<()>>>,
}

impl Manager {
    /// Starts a fluent build. See [`ManagerBuilder`].
    pub fn builder(cfg: Config) -> ManagerBuilder {
        ManagerBuilder::new(cfg)
    }

    /// Assembles the engine. Must be called inside a Tokio runtime: the
    /// subscriber listener task is spawned here.
    pub(crate) fn new(
        cfg: Config,
        types: TypeRegistry,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Arc<Self> {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let exec = Arc::new(Executor::new(cfg.worker_count()));
        let tracker = Arc::new(StateTracker::new());

        let mut subscribers = subscribers;
        subscribers.push(Arc::clone(&tracker) as Arc<dyn Subscribe>);
        let set = SubscriberSet::new(subscribers, bus.clone());
        let listener = Self::spawn_listener(bus.subscribe(), set);

        Arc::new(Self {
            cfg,
            bus,
            exec,
            token: CancellationToken::new(),
            types: types.freeze(),
            tracker,
            next_id: AtomicU64::new(1),
            records: StdMutex::new(Index::default()),
            actors: StdMutex::new(BTreeMap::new()),
            abort: StdMutex::new(None),
            listener: StdMutex::new(Some(listener)),
        })
    }

    /// Pumps bus events into the subscriber set until the terminal shutdown
    /// event has been forwarded, then drains the per-subscriber queues.
    fn spawn_listener(mut rx: broadcast::Receiver<Event>, set: SubscriberSet) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => {
                        let last = matches!(
                            ev.kind,
                            EventKind::AllSettledWithin | EventKind::GraceExceeded
                        );
                        set.emit_arc(Arc::new(ev));
                        if last {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            set.shutdown().await;
        })
    }

    // ───────────────────────── registration ─────────────────────────

    /// Registers a managed resource and returns its id.
    ///
    /// The instance stays inert until [`Manager::commit`] or
    /// [`Manager::converge`] launches its actor.
    pub fn create(&self, type_name: &str, attrs: Attrs) -> Result<ResourceId, RuntimeError> {
        let record = self.register(type_name, attrs, None, true, &BTreeSet::new())?;
        Ok(record.id)
    }

    /// Registers a pre-existing substrate object the engine must never
    /// create, update, or delete. The record is `CLEAN` immediately and can
    /// be referenced like any other.
    pub fn create_unmanaged(
        &self,
        type_name: &str,
        attrs: Attrs,
    ) -> Result<ResourceId, RuntimeError> {
        let record = self.register(type_name, attrs, None, false, &BTreeSet::new())?;
        Ok(record.id)
    }

    /// Shared registration path: resolve the type, validate and default the
    /// attribute set, allocate identity, index the record, seed its values.
    fn register(
        &self,
        type_name: &str,
        attrs: Attrs,
        owner: Option<ResourceId>,
        managed: bool,
        caps: &BTreeSet<String>,
    ) -> Result<Arc<Record>, RuntimeError> {
        let entry = self.types.resolve(type_name, caps)?;
        let schema = Arc::clone(&entry.schema);

        for key in attrs.keys() {
            let Some(attr) = schema.attribute(key) else {
                return Err(RuntimeError::UnknownAttribute {
                    type_name: schema.type_name.clone(),
                    attribute: key.clone(),
                });
            };
            if attr.read_only || attr.aggregate {
                return Err(RuntimeError::ReadOnlyAttribute {
                    type_name: schema.type_name.clone(),
                    attribute: key.clone(),
                });
            }
        }

        // Static defaults first, then computed ones over the merged set.
        let mut resolved = attrs;
        for attr in schema.attributes.values() {
            if resolved.contains_key(&attr.name) {
                continue;
            }
            if let Some(DefaultValue::Static(value)) = &attr.default {
                resolved.insert(attr.name.clone(), value.clone());
            }
        }
        for attr in schema.attributes.values() {
            if resolved.contains_key(&attr.name) {
                continue;
            }
            if let Some(DefaultValue::Computed(compute)) = &attr.default {
                let value = compute(&resolved);
                if !value.is_null() {
                    resolved.insert(attr.name.clone(), value);
                }
            }
        }

        // Mandatory means supplied, defaulted, or fillable by
        // auto-instantiation during the dependency wait.
        for attr in schema.mandatory_attributes() {
            let present = resolved.get(&attr.name).is_some_and(|v| !v.is_null());
            if !present && !attr.auto {
                return Err(RuntimeError::MissingMandatory {
                    type_name: schema.type_name.clone(),
                    attribute: attr.name.clone(),
                });
            }
        }

        let id = ResourceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let name = match resolved.get("name") {
            Some(Value::Str(s)) if !s.is_empty() => s.clone(),
            _ => format!("{}-{}", schema.type_name, id.index()),
        };
        resolved.insert("name".to_string(), Value::Str(name.clone()));

        let driver = entry.spec.build_driver();
        let record = {
            let mut index = self.records.lock().unwrap();
            if index.by_name.contains_key(&name) {
                return Err(RuntimeError::DuplicateName { name });
            }
            let record = Record::new(id, name.clone(), schema, driver, owner, managed);
            index.by_id.insert(id, Arc::clone(&record));
            index.by_name.insert(name, id);
            record
        };

        // Seed values: remote attributes become buffered desired writes,
        // local ones apply immediately.
        for (key, value) in resolved {
            let Some(attr) = record.schema.attribute(&key) else {
                continue;
            };
            if let Some(cell) = record.cells.get(&key) {
                cell.pending.lock().unwrap().set(value.clone());
            } else {
                record.apply_value(&key, value.clone());
            }
            if attr.is_ref() && !attr.aggregate {
                self.wire_reverse(&record, attr, &value.ref_ids(), &[]);
            }
        }

        if !managed {
            let prev = record.set_state(ResourceState::Clean);
            self.publish_state(&record, prev, ResourceState::Clean);
            record.note("registered unmanaged; convergence skipped");
        } else {
            record.note(format!("registered as '{}'", record.type_name));
        }

        self.bus.publish(
            Event::new(EventKind::ResourceRegistered)
                .with_resource(record.name.clone())
                .with_reason(record.type_name.clone()),
        );
        Ok(record)
    }

    /// Registers a sub-resource owned by `parent` and launches it. Called
    /// from the parent's dependency wait.
    pub(crate) fn register_owned(
        self: &Arc<Self>,
        parent: &Arc<Record>,
        spec: SubSpec,
    ) -> Result<Arc<Record>, RuntimeError> {
        let record = self.register(&spec.type_name, spec.attrs, Some(parent.id), true, &BTreeSet::new())?;
        self.ensure_launched(&record);
        Ok(record)
    }

    /// Fills an unset `auto` reference attribute by instantiating a provider
    /// chosen through capability resolution.
    ///
    /// Creation attributes for the provider are derived from its mandatory
    /// attributes: references the requester satisfies are wired back to it,
    /// same-named values are copied over. The requester becomes the owner,
    /// the provider is launched, and the new reference is stored (and
    /// reverse-wired) on the requester.
    pub(crate) fn auto_instantiate(
        self: &Arc<Self>,
        requester: &Arc<Record>,
        attribute: &str,
        caps: &BTreeSet<String>,
    ) -> Result<ResourceId, RuntimeError> {
        let Some(attr) = requester.schema.attribute(attribute) else {
            return Err(RuntimeError::UnknownAttribute {
                type_name: requester.type_name.clone(),
                attribute: attribute.to_string(),
            });
        };
        let Some(target) = attr.kind.ref_target() else {
            return Err(RuntimeError::UnknownAttribute {
                type_name: requester.type_name.clone(),
                attribute: attribute.to_string(),
            });
        };
        let entry = self.types.resolve(target, caps)?;

        let mut attrs = Attrs::new();
        for mandatory in entry.schema.mandatory_attributes() {
            if let Some(back_target) = mandatory.kind.ref_target() {
                if requester.schema.has_type(back_target) {
                    let back = Value::Ref(requester.id);
                    let back = if mandatory.is_collection() {
                        Value::List(vec![back])
                    } else {
                        back
                    };
                    attrs.insert(mandatory.name.clone(), back);
                    continue;
                }
            }
            if let Some(value) = requester.desired(&mandatory.name) {
                attrs.insert(mandatory.name.clone(), value);
            }
        }

        let provider = self.register(entry.type_name(), attrs, Some(requester.id), true, caps)?;
        self.ensure_launched(&provider);

        // Store the provider reference on the requester. The requester is
        // mid-dependency-wait, so no flush can be in flight; the buffer's
        // own lock suffices.
        let value = Value::Ref(provider.id);
        if let Some(cell) = requester.cells.get(attribute) {
            let mut pending = cell.pending.lock().unwrap();
            if attr.is_collection() {
                pending.add(value);
            } else {
                pending.set(value);
            }
        } else {
            let mut one_shot = PendingValue::new();
            if attr.is_collection() {
                one_shot.add(value);
            } else {
                one_shot.set(value);
            }
            let current = requester.get_value(attribute);
            requester.apply_value(attribute, one_shot.resolve(current.as_ref()));
        }
        self.wire_reverse(requester, attr, &[provider.id], &[]);
        Ok(provider.id)
    }

    // ─────────────────────────── lookups ────────────────────────────

    /// Id of the instance registered under `name`.
    pub fn by_name(&self, name: &str) -> Option<ResourceId> {
        self.records.lock().unwrap().by_name.get(name).copied()
    }

    /// Ids of all instances answering to `type_name` (concrete name, abstract
    /// tag, or `implements` target), in registration order.
    pub fn by_type(&self, type_name: &str) -> Vec<ResourceId> {
        self.records
            .lock()
            .unwrap()
            .by_id
            .values()
            .filter(|r| r.schema.has_type(type_name))
            .map(|r| r.id)
            .collect()
    }

    /// Current lifecycle state, if the id is known.
    pub fn state(&self, id: ResourceId) -> Option<ResourceState> {
        self.instance(id).map(|r| r.state())
    }

    /// Diagnostic trail of one instance: registration, step notes, retries,
    /// failure reasons.
    pub fn trail(&self, id: ResourceId) -> Option<Vec<String>> {
        self.instance(id).map(|r| r.trail())
    }

    /// Owner of a sub-resource or auto-instantiated provider.
    pub fn owner(&self, id: ResourceId) -> Option<ResourceId> {
        self.instance(id).and_then(|r| r.owner)
    }

    /// Desired value of one attribute: buffered writes resolved over the
    /// last applied value.
    pub fn get(&self, id: ResourceId, attribute: &str) -> Result<Option<Value>, RuntimeError> {
        let record = self.instance(id).ok_or_else(|| unknown(id))?;
        if record.schema.attribute(attribute).is_none() {
            return Err(RuntimeError::UnknownAttribute {
                type_name: record.type_name.clone(),
                attribute: attribute.to_string(),
            });
        }
        Ok(record.desired(attribute))
    }

    /// Snapshot of all applied values of one instance.
    pub fn values(&self, id: ResourceId) -> Result<Attrs, RuntimeError> {
        let record = self.instance(id).ok_or_else(|| unknown(id))?;
        Ok(record.values())
    }

    pub(crate) fn instance(&self, id: ResourceId) -> Option<Arc<Record>> {
        self.records.lock().unwrap().by_id.get(&id).cloned()
    }

    pub(crate) fn instances_of(&self, type_name: &str) -> Vec<Arc<Record>> {
        self.records
            .lock()
            .unwrap()
            .by_id
            .values()
            .filter(|r| r.schema.has_type(type_name))
            .cloned()
            .collect()
    }

    fn all_records(&self) -> Vec<Arc<Record>> {
        self.records.lock().unwrap().by_id.values().cloned().collect()
    }

    // ─────────────────────────── writes ─────────────────────────────

    /// Replaces the desired value of an attribute.
    ///
    /// Remote attributes buffer the write and converge it through one
    /// `attr_set` flush; local attributes apply immediately. A write landing
    /// on a `CLEAN` record re-enters convergence.
    pub async fn set(
        &self,
        id: ResourceId,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<(), RuntimeError> {
        self.write(id, attribute, WriteOp::Set(value.into())).await
    }

    /// Adds an element to a collection attribute (add-if-absent).
    pub async fn add(
        &self,
        id: ResourceId,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<(), RuntimeError> {
        self.write(id, attribute, WriteOp::Add(value.into())).await
    }

    /// Removes every equal element from a collection attribute.
    pub async fn remove(
        &self,
        id: ResourceId,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<(), RuntimeError> {
        self.write(id, attribute, WriteOp::Remove(value.into())).await
    }

    /// Empties a collection attribute.
    pub async fn clear(&self, id: ResourceId, attribute: &str) -> Result<(), RuntimeError> {
        self.write(id, attribute, WriteOp::Clear).await
    }

    async fn write(
        &self,
        id: ResourceId,
        attribute: &str,
        op: WriteOp,
    ) -> Result<(), RuntimeError> {
        let record = self.instance(id).ok_or_else(|| unknown(id))?;
        let Some(attr) = record.schema.attribute(attribute) else {
            return Err(RuntimeError::UnknownAttribute {
                type_name: record.type_name.clone(),
                attribute: attribute.to_string(),
            });
        };
        if attr.read_only || attr.aggregate {
            return Err(RuntimeError::ReadOnlyAttribute {
                type_name: record.type_name.clone(),
                attribute: attribute.to_string(),
            });
        }
        let state = record.state();
        if state.is_terminal() {
            return Err(RuntimeError::TerminalResource {
                resource: record.name.clone(),
                state: state.to_string(),
            });
        }

        // Excludes any in-flight flush; rapid writes coalesce in the buffer.
        let _guard = record.write_lock.lock().await;

        let track_refs = attr.is_ref() && attr.reverse.is_some() && !attr.aggregate;
        let before: Vec<ResourceId> = if track_refs {
            record
                .desired(attribute)
                .map(|v| v.ref_ids())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        if let Some(cell) = record.cells.get(attribute) {
            op.apply(&mut cell.pending.lock().unwrap());
            if cell.state() == AttributeState::Clean {
                cell.set_state(AttributeState::Dirty);
                self.bus.publish(
                    Event::new(EventKind::AttributeState)
                        .with_resource(record.name.clone())
                        .with_attribute(attribute.to_string())
                        .with_attr_states(AttributeState::Clean, AttributeState::Dirty),
                );
            }
        } else {
            let mut one_shot = PendingValue::new();
            op.apply(&mut one_shot);
            let current = record.get_value(attribute);
            record.apply_value(attribute, one_shot.resolve(current.as_ref()));
        }

        if track_refs {
            let after: Vec<ResourceId> = record
                .desired(attribute)
                .map(|v| v.ref_ids())
                .unwrap_or_default();
            let added: Vec<ResourceId> =
                after.iter().filter(|i| !before.contains(i)).copied().collect();
            let removed: Vec<ResourceId> =
                before.iter().filter(|i| !after.contains(i)).copied().collect();
            self.wire_reverse(&record, attr, &added, &removed);
        }

        // Re-converge a settled record; anything earlier in the lifecycle
        // picks the buffer up when its update phase runs.
        if record.state() == ResourceState::Clean {
            let prev = record.set_state(ResourceState::Dirty);
            self.publish_state(&record, prev, ResourceState::Dirty);
            record.changed.notify_one();
        }
        Ok(())
    }

    /// Adds an instance-level capability requirement, merged with the
    /// schema's requirements during the dependency wait.
    pub fn add_requirement(
        &self,
        id: ResourceId,
        requirement: Requirement,
    ) -> Result<(), RuntimeError> {
        let record = self.instance(id).ok_or_else(|| unknown(id))?;
        if record.schema.attribute(&requirement.attribute).is_none() {
            return Err(RuntimeError::UnknownAttribute {
                type_name: record.type_name.clone(),
                attribute: requirement.attribute.clone(),
            });
        }
        record.requirements.lock().unwrap().push(requirement);
        Ok(())
    }

    // ─────────────────────── reverse wiring ─────────────────────────

    /// Maintains the mirrored aggregate on records gaining or losing a
    /// reference from `source.attr`.
    fn wire_reverse(
        &self,
        source: &Arc<Record>,
        attr: &AttributeSchema,
        added: &[ResourceId],
        removed: &[ResourceId],
    ) {
        let Some(reverse) = attr.reverse.as_deref() else {
            return;
        };
        for id in removed {
            if let Some(target) = self.instance(*id) {
                detach_reverse(&target, reverse, source.id);
            }
        }
        for id in added {
            if let Some(target) = self.instance(*id) {
                attach_reverse(&target, reverse, source.id);
            }
        }
    }

    /// Merges driver-reported attributes into the applied values and keeps
    /// reverse aggregates consistent. Unknown keys are skipped and noted on
    /// the trail.
    pub(crate) fn merge_discovered(&self, record: &Arc<Record>, map: Attrs) {
        let mut diffs: Vec<(String, Vec<ResourceId>, Vec<ResourceId>)> = Vec::new();
        for (key, value) in &map {
            let Some(attr) = record.schema.attribute(key) else {
                continue;
            };
            if !attr.is_ref() || attr.aggregate || attr.reverse.is_none() {
                continue;
            }
            let before = record
                .get_value(key)
                .map(|v| v.ref_ids())
                .unwrap_or_default();
            let after = value.ref_ids();
            let added = after.iter().filter(|i| !before.contains(i)).copied().collect();
            let removed = before.iter().filter(|i| !after.contains(i)).copied().collect();
            diffs.push((key.clone(), added, removed));
        }

        let ignored = record.merge_applied(map);
        if !ignored.is_empty() {
            record.note(format!(
                "driver reported unknown keys (skipped): {}",
                ignored.join(", ")
            ));
        }

        for (key, added, removed) in diffs {
            if let Some(attr) = record.schema.attribute(&key) {
                self.wire_reverse(record, attr, &added, &removed);
            }
        }
    }

    // ────────────────────── convergence control ─────────────────────

    /// Launches the record's convergence actor. Idempotent; unmanaged
    /// records have no actor.
    pub fn commit(self: &Arc<Self>, id: ResourceId) -> Result<(), RuntimeError> {
        let record = self.instance(id).ok_or_else(|| unknown(id))?;
        self.ensure_launched(&record);
        Ok(())
    }

    pub(crate) fn ensure_launched(self: &Arc<Self>, record: &Arc<Record>) {
        if !record.managed {
            return;
        }
        if record
            .launched
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let actor = ResourceActor::new(Arc::clone(self), Arc::clone(record));
        let handle = tokio::spawn(actor.run());
        self.actors.lock().unwrap().insert(record.id, handle);
    }

    /// Launches every registered record and waits until all of them settle,
    /// including records registered while the pass runs.
    ///
    /// Under [`ErrorPolicy::Abort`](crate::ErrorPolicy) the first terminal
    /// failure cancels the run and surfaces as [`RuntimeError::Aborted`];
    /// under quarantine the pass completes and reports the casualties in the
    /// [`Convergence`] summary.
    pub async fn converge(self: &Arc<Self>) -> Result<Convergence, RuntimeError> {
        loop {
            let total = {
                let index = self.records.lock().unwrap();
                index.by_id.len()
            };
            let managed: Vec<Arc<Record>> = self
                .all_records()
                .into_iter()
                .filter(|r| r.managed)
                .collect();

            // A reference cycle among managed records would wait forever;
            // refuse it up front. Edges through unmanaged records do not
            // block anyone and are left out.
            deps::sort_records(&managed)?;

            for record in &managed {
                self.ensure_launched(record);
            }

            let pending: Vec<Arc<Record>> = managed
                .iter()
                .filter(|r| !r.state().is_settled())
                .cloned()
                .collect();
            if pending.is_empty() {
                let now = self.records.lock().unwrap().by_id.len();
                if now == total {
                    break;
                }
                continue; // late registrations appeared while settling
            }

            for record in pending {
                select! {
                    _ = record.clean.wait() => {}
                    _ = record.failed.wait() => {}
                    _ = self.token.cancelled() => break,
                }
            }
            if self.token.is_cancelled() {
                break;
            }
        }

        if let Some((resource, reason)) = self.abort.lock().unwrap().clone() {
            return Err(RuntimeError::Aborted { resource, reason });
        }
        Ok(self.summary())
    }

    fn summary(&self) -> Convergence {
        let mut clean = Vec::new();
        let mut quarantined = Vec::new();
        for record in self.all_records() {
            match record.state() {
                ResourceState::Clean => clean.push(record.name.clone()),
                ResourceState::Failed => quarantined.push(record.name.clone()),
                _ => {}
            }
        }
        clean.sort_unstable();
        quarantined.sort_unstable();
        Convergence { clean, quarantined }
    }

    /// Stores the failure that triggered an abort; first caller wins.
    pub(crate) fn record_abort(&self, resource: &str, reason: &str) {
        let mut slot = self.abort.lock().unwrap();
        if slot.is_none() {
            *slot = Some((resource.to_string(), reason.to_string()));
        }
    }

    /// Registration ids in dependency order: every resource appears after
    /// the references it holds and after its owner.
    pub fn sorted(&self) -> Result<Vec<ResourceId>, RuntimeError> {
        let ordered = deps::sort_records(&self.all_records())?;
        Ok(ordered.into_iter().map(|r| r.id).collect())
    }

    // ───────────────────────── scheduling ───────────────────────────

    /// Runs a one-off task against a registered resource on the shared
    /// executor, outside the lifecycle machinery. Publishes the usual task
    /// events; the returned handle resolves to the task's outcome.
    pub fn schedule(&self, id: ResourceId, task: Task) -> Result<TaskHandle, RuntimeError> {
        let record = self.instance(id).ok_or_else(|| unknown(id))?;
        let label: Arc<str> = Arc::from(task.describe().as_ref());
        let resource: Arc<str> = Arc::from(record.name.as_str());
        record.note(format!("task '{label}' scheduled"));
        self.bus.publish(
            Event::new(EventKind::TaskScheduled)
                .with_task(Arc::clone(&label))
                .with_resource(Arc::clone(&resource)),
        );

        let (tx, rx) = oneshot::channel();
        let exec = Arc::clone(&self.exec);
        let bus = self.bus.clone();
        let task_label = Arc::clone(&label);
        tokio::spawn(async move {
            let outcome = task.run(exec, None).await;
            match &outcome {
                Ok(_) => bus.publish(
                    Event::new(EventKind::TaskCompleted)
                        .with_task(Arc::clone(&task_label))
                        .with_resource(Arc::clone(&resource)),
                ),
                Err(err) => bus.publish(
                    Event::new(EventKind::TaskFailed)
                        .with_task(Arc::clone(&task_label))
                        .with_resource(Arc::clone(&resource))
                        .with_reason(err.as_message()),
                ),
            }
            let _ = tx.send(outcome);
        });
        Ok(TaskHandle::new(label, rx))
    }

    /// A fresh subscription to the live event stream.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    // ─────────────────────────── teardown ───────────────────────────

    /// Deletes managed resources in reverse dependency order.
    ///
    /// Each record is allowed to settle, redirected to `PENDING_DELETE`, and
    /// its actor awaited. Unmanaged records are left in place; failed ones
    /// are skipped because their substrate state is unknown. Records that
    /// were never launched are marked deleted directly.
    pub async fn teardown(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let ordered = deps::sort_records(&self.all_records())?;
        for record in ordered.into_iter().rev() {
            if !record.managed {
                record.note("unmanaged; teardown leaves it in place");
                continue;
            }
            if record.state() == ResourceState::Deleted {
                continue;
            }

            let handle = self.actors.lock().unwrap().remove(&record.id);
            let Some(handle) = handle else {
                let prev = record.set_state(ResourceState::Deleted);
                self.publish_state(&record, prev, ResourceState::Deleted);
                record.note("never converged; nothing to delete");
                continue;
            };

            select! {
                _ = record.clean.wait() => {
                    {
                        let _guard = record.write_lock.lock().await;
                        let prev = record.set_state(ResourceState::PendingDelete);
                        self.publish_state(&record, prev, ResourceState::PendingDelete);
                    }
                    record.changed.notify_one();
                    let _ = handle.await;
                }
                _ = record.failed.wait() => {
                    record.note("failed; teardown skipped");
                    let _ = handle.await;
                }
                _ = self.token.cancelled() => {
                    let _ = handle.await;
                }
            }
        }
        Ok(())
    }

    // ─────────────────────────── shutdown ───────────────────────────

    /// Graceful shutdown: cancel everything, give actors the configured
    /// grace to settle, then flush subscribers.
    ///
    /// Returns [`RuntimeError::GraceExceeded`] naming the stuck resources
    /// when the grace window runs out.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.shutdown_with_reason("requested").await
    }

    async fn shutdown_with_reason(&self, reason: &str) -> Result<(), RuntimeError> {
        self.bus.publish(
            Event::new(EventKind::ShutdownRequested).with_reason(reason.to_string()),
        );
        self.token.cancel();
        self.exec.close();

        let actors = std::mem::take(&mut *self.actors.lock().unwrap());
        let drain = async move {
            for (_, handle) in actors {
                let _ = handle.await;
            }
        };

        let result = match time::timeout(self.cfg.grace, drain).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllSettledWithin));
                Ok(())
            }
            Err(_) => {
                self.bus.publish(Event::new(EventKind::GraceExceeded));
                Err(RuntimeError::GraceExceeded {
                    grace: self.cfg.grace,
                    stuck: self.tracker.stuck(),
                })
            }
        };

        // The listener exits after forwarding the terminal event above and
        // drains subscriber queues; awaiting it flushes the final lines.
        let listener = self.listener.lock().unwrap().take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        result
    }

    /// Converges in the background, then runs until SIGINT/SIGTERM/SIGQUIT
    /// (Ctrl-C elsewhere) or an abort, and shuts down gracefully.
    ///
    /// A convergence error (abort, dependency cycle) takes precedence over
    /// the shutdown outcome.
    pub async fn run_until_signal(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let engine = Arc::clone(self);
        let converged = tokio::spawn(async move { engine.converge().await });

        let reason = select! {
            fired = shutdown::wait_for_shutdown_signal() => fired.unwrap_or("signal"),
            _ = self.token.cancelled() => "aborted",
        };
        let result = self.shutdown_with_reason(reason).await;

        match converged.await {
            Ok(Err(err)) => Err(err),
            Ok(Ok(_)) | Err(_) => result,
        }
    }

    /// Publishes a state transition performed by the manager itself.
    fn publish_state(&self, record: &Record, prev: ResourceState, next: ResourceState) {
        if prev == next {
            return;
        }
        self.bus.publish(
            Event::new(EventKind::ResourceState)
                .with_resource(record.name.clone())
                .with_states(prev, next),
        );
        if next == ResourceState::Clean {
            self.bus
                .publish(Event::new(EventKind::ResourceClean).with_resource(record.name.clone()));
        }
    }
}

fn unknown(id: ResourceId) -> RuntimeError {
    RuntimeError::UnknownResource {
        resource: id.to_string(),
    }
}

/// Adds `source` to the mirrored aggregate on `target`.
fn attach_reverse(target: &Record, reverse: &str, source: ResourceId) {
    let Some(mirror) = target.schema.attribute(reverse) else {
        return;
    };
    if mirror.is_collection() {
        let mut items = match target.get_value(reverse) {
            Some(Value::List(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other],
        };
        if !items.contains(&Value::Ref(source)) {
            items.push(Value::Ref(source));
        }
        target.apply_value(reverse, Value::List(items));
    } else {
        target.apply_value(reverse, Value::Ref(source));
    }
}

/// Removes `source` from the mirrored aggregate on `target`.
fn detach_reverse(target: &Record, reverse: &str, source: ResourceId) {
    if target.schema.attribute(reverse).is_none() {
        return;
    }
    match target.get_value(reverse) {
        Some(Value::List(items)) => {
            let kept: Vec<Value> = items
                .into_iter()
                .filter(|v| *v != Value::Ref(source))
                .collect();
            target.apply_value(reverse, Value::List(kept));
        }
        Some(Value::Ref(held)) if held == source => {
            target.apply_value(reverse, Value::Null);
        }
        _ => {}
    }
}
