//! # Dependency resolution: the wait phase of the resource FSM.
//!
//! [`wait_dependencies`] is what a resource actor runs while its record sits
//! in `PENDING_DEPS`. It settles everything the resource needs before its
//! own hooks may run, in four passes:
//!
//! ```text
//! wait_dependencies(record)
//!   1. providers      ── unset `auto` reference attributes get an instance
//!                        (capability resolution over merged requirements)
//!   2. references     ── every managed resource referenced by an attribute
//!                        must settle
//!   3. predecessors   ── `after` types must settle, `after_init` types must
//!                        initialize
//!   4. sub-resources  ── the driver's Expr<SubSpec> is registered and
//!                        settled per its combinators
//! ```
//!
//! ## Rules
//! - Every error out of this phase is fatal or a cancellation: a missing
//!   candidate, an unknown reference, or a terminally failed dependency does
//!   not improve on a second pass, so the phase never re-enters under a
//!   retry policy.
//! - Waits resolve against the per-record latches: `clean` for settlement,
//!   `init` for initialization, `failed` to propagate a dependency's
//!   terminal failure to its waiters.
//! - Registrations made here (providers, sub-resource children) go through
//!   the manager, so naming, reverse wiring, and events are identical to
//!   externally created resources.
//! - `Concurrent` sub-resources are all registered before any settlement
//!   wait resolves; `Sequential` and `Piped` register and settle strictly
//!   one child at a time.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::select;

use crate::error::{RuntimeError, TaskError};
use crate::model::ResourceId;
use crate::resources::{Record, ResourceHandle, SubResources};
use crate::tasks::Expr;

use super::manager::Manager;

/// Settles everything `record` depends on. Runs in `PENDING_DEPS`.
pub(crate) async fn wait_dependencies(
    manager: &Arc<Manager>,
    record: &Arc<Record>,
) -> Result<(), TaskError> {
    instantiate_providers(manager, record)?;
    wait_references(manager, record).await?;
    wait_predecessors(manager, record).await?;
    settle_sub_resources(manager, record).await
}

/// Fills every unset `auto` reference attribute with a freshly registered
/// provider, resolved against the capabilities accumulated from the schema
/// and instance requirements naming that attribute.
fn instantiate_providers(manager: &Arc<Manager>, record: &Arc<Record>) -> Result<(), TaskError> {
    let requirements = merged_requirements(record);

    // A requirement naming an undeclared attribute is a configuration
    // mistake; surface it instead of silently never applying it.
    for attribute in requirements.keys() {
        if record.schema.attribute(attribute).is_none() {
            return Err(TaskError::fatal(format!(
                "requirement names unknown attribute '{attribute}'"
            )));
        }
    }

    for attr in record.schema.attributes.values() {
        if !attr.auto || !attr.is_ref() {
            continue;
        }
        if record.desired(&attr.name).is_some_and(|v| !v.is_null()) {
            continue;
        }
        let caps = requirements.get(&attr.name).cloned().unwrap_or_default();
        let id = manager
            .auto_instantiate(record, &attr.name, &caps)
            .map_err(TaskError::fatal)?;
        record.note(format!("attribute '{}' auto-instantiated as {id}", attr.name));
    }
    Ok(())
}

/// Capability sets per attribute, merged from the schema's structural
/// requirements and the instance-level additions.
fn merged_requirements(record: &Record) -> BTreeMap<String, BTreeSet<String>> {
    let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for req in &record.schema.requirements {
        merged
            .entry(req.attribute.clone())
            .or_default()
            .extend(req.capabilities.iter().cloned());
    }
    for req in record.requirements.lock().unwrap().iter() {
        merged
            .entry(req.attribute.clone())
            .or_default()
            .extend(req.capabilities.iter().cloned());
    }
    merged
}

/// Waits for every managed resource referenced by an attribute to settle.
///
/// References back to the record's owner are exempt: the owner is itself
/// mid-dependency-wait awaiting this record (sub-resources, derived
/// provider back-references), so that edge can never be waited on.
async fn wait_references(manager: &Arc<Manager>, record: &Arc<Record>) -> Result<(), TaskError> {
    let mut deps: Vec<Arc<Record>> = Vec::new();
    for attr in record.schema.attributes.values() {
        // Aggregates are the engine-maintained reverse side of a relation;
        // waiting on them would make every bidirectional pair a deadlock.
        if !attr.is_ref() || attr.aggregate {
            continue;
        }
        let Some(value) = record.desired(&attr.name) else {
            continue;
        };
        for id in value.ref_ids() {
            if id == record.id || Some(id) == record.owner {
                continue;
            }
            let Some(dep) = manager.instance(id) else {
                return Err(TaskError::fatal(format!(
                    "attribute '{}' references unknown resource {id}",
                    attr.name
                )));
            };
            if dep.managed {
                deps.push(dep);
            }
        }
    }

    let waits = deps.iter().map(|dep| wait_settled(manager, dep));
    for outcome in future::join_all(waits).await {
        outcome?;
    }
    Ok(())
}

/// Waits for the type-level orderings: every instance of an `after` type
/// must settle, every instance of an `after_init` type must initialize.
async fn wait_predecessors(manager: &Arc<Manager>, record: &Arc<Record>) -> Result<(), TaskError> {
    for type_name in &record.schema.after {
        let peers = manager.instances_of(type_name);
        let waits = peers
            .iter()
            .filter(|peer| peer.id != record.id)
            .map(|peer| wait_settled(manager, peer));
        for outcome in future::join_all(waits).await {
            outcome?;
        }
    }
    for type_name in &record.schema.after_init {
        let peers = manager.instances_of(type_name);
        let waits = peers
            .iter()
            .filter(|peer| peer.id != record.id)
            .map(|peer| wait_initialized(manager, peer));
        for outcome in future::join_all(waits).await {
            outcome?;
        }
    }
    Ok(())
}

/// Registers the driver's sub-resources and settles them per the expression.
async fn settle_sub_resources(
    manager: &Arc<Manager>,
    record: &Arc<Record>,
) -> Result<(), TaskError> {
    let expr = record
        .driver
        .sub_resources(&ResourceHandle::new(Arc::clone(record)));
    if expr.is_empty() {
        return Ok(());
    }
    record.note(format!("registering {} sub-resources", expr.len()));
    settle_expr(manager, record, expr).await
}

/// Recursive driver for one sub-resource expression node.
///
/// A leaf registers its spec (owner = parent) and waits for it to settle.
/// Concurrent branches are polled together, so every registration (the
/// synchronous prefix of each branch) lands before any settlement resolves.
fn settle_expr<'a>(
    manager: &'a Arc<Manager>,
    parent: &'a Arc<Record>,
    expr: SubResources,
) -> BoxFuture<'a, Result<(), TaskError>> {
    async move {
        match expr {
            Expr::Empty => Ok(()),
            Expr::Leaf(spec) => {
                let child = manager
                    .register_owned(parent, spec)
                    .map_err(TaskError::fatal)?;
                parent.note(format!("sub-resource '{}' registered", child.name));
                wait_settled(manager, &child).await
            }
            Expr::Concurrent(kids) => {
                let branches = kids
                    .into_iter()
                    .map(|kid| settle_expr(manager, parent, kid));
                for outcome in future::join_all(branches).await {
                    outcome?;
                }
                Ok(())
            }
            Expr::Sequential(kids) | Expr::Piped(kids) => {
                for kid in kids {
                    settle_expr(manager, parent, kid).await?;
                }
                Ok(())
            }
        }
    }
    .boxed()
}

/// Resolves once `dep` settles clean; fails fatally when it fails terminally.
async fn wait_settled(manager: &Arc<Manager>, dep: &Arc<Record>) -> Result<(), TaskError> {
    manager.ensure_launched(dep);
    select! {
        _ = dep.clean.wait() => Ok(()),
        _ = dep.failed.wait() => Err(TaskError::fatal(format!(
            "dependency '{}' failed",
            dep.name
        ))),
        _ = manager.token.cancelled() => Err(TaskError::Canceled),
    }
}

/// Resolves once `dep` has initialized (the weaker `after_init` ordering).
async fn wait_initialized(manager: &Arc<Manager>, dep: &Arc<Record>) -> Result<(), TaskError> {
    manager.ensure_launched(dep);
    select! {
        _ = dep.init.wait() => Ok(()),
        _ = dep.failed.wait() => Err(TaskError::fatal(format!(
            "dependency '{}' failed",
            dep.name
        ))),
        _ = manager.token.cancelled() => Err(TaskError::Canceled),
    }
}

/// Topological order of `records`: dependencies first, dependents after.
///
/// Edges are the structural ones — non-aggregate attribute references and
/// the owner of a sub-resource. Teardown walks the result in reverse so
/// children and dependents go before what they point at.
pub(crate) fn sort_records(records: &[Arc<Record>]) -> Result<Vec<Arc<Record>>, RuntimeError> {
    let by_id: BTreeMap<ResourceId, &Arc<Record>> =
        records.iter().map(|record| (record.id, record)).collect();

    let mut indegree: BTreeMap<ResourceId, usize> = by_id.keys().map(|id| (*id, 0)).collect();
    let mut dependents: BTreeMap<ResourceId, Vec<ResourceId>> = BTreeMap::new();
    for record in by_id.values() {
        for dep in structural_deps(record) {
            // References leaving the sorted set do not constrain the order.
            if !by_id.contains_key(&dep) {
                continue;
            }
            dependents.entry(dep).or_default().push(record.id);
            if let Some(n) = indegree.get_mut(&record.id) {
                *n += 1;
            }
        }
    }

    let mut ready: VecDeque<ResourceId> = indegree
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut sorted: Vec<Arc<Record>> = Vec::with_capacity(by_id.len());
    while let Some(id) = ready.pop_front() {
        if let Some(record) = by_id.get(&id) {
            sorted.push(Arc::clone(record));
        }
        for dependent in dependents.remove(&id).unwrap_or_default() {
            if let Some(n) = indegree.get_mut(&dependent) {
                *n -= 1;
                if *n == 0 {
                    ready.push_back(dependent);
                }
            }
        }
    }

    if sorted.len() < by_id.len() {
        let placed: BTreeSet<ResourceId> = sorted.iter().map(|record| record.id).collect();
        let mut remaining: Vec<String> = by_id
            .values()
            .filter(|record| !placed.contains(&record.id))
            .map(|record| record.name.clone())
            .collect();
        remaining.sort_unstable();
        return Err(RuntimeError::DependencyCycle { remaining });
    }
    Ok(sorted)
}

/// Ids this record structurally depends on: non-aggregate attribute
/// references plus the owning resource, minus itself.
fn structural_deps(record: &Record) -> BTreeSet<ResourceId> {
    let mut deps = BTreeSet::new();
    for attr in record.schema.attributes.values() {
        if !attr.is_ref() || attr.aggregate {
            continue;
        }
        if let Some(value) = record.desired(&attr.name) {
            deps.extend(value.ref_ids());
        }
    }
    if let Some(owner) = record.owner {
        deps.insert(owner);
    }
    deps.remove(&record.id);
    deps
}
