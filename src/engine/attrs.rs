//! # AttrActor: per-attribute convergence loop.
//!
//! One [`AttrActor`] drives a single remote attribute of a single resource
//! through its state machine until the attribute is `CLEAN`. The resource
//! actor runs a batch of them per phase: key attributes before create,
//! everything else during the update phase.
//!
//! ## State flow
//! ```text
//! UNINITIALIZED ──(attr_get)──► PENDING_INIT ──► INITIALIZED
//!       ▲                                             │
//!       │ (Transient)                   (pending empty: no set issued)
//!       │                                             ▼
//!       └──── PENDING_UPDATE ◄──(attr_set)── INITIALIZED / DIRTY ──► CLEAN
//! ```
//!
//! ## Rules
//! - A missing getter skips the probe: the attribute starts from whatever
//!   the engine already knows.
//! - `NotFound` from a getter is not an error; the attribute simply has no
//!   remote value yet.
//! - An empty pending buffer goes straight to `CLEAN`; no set is issued.
//! - A missing setter with buffered data fails the flush.
//! - `Transient` outcomes reset the attribute to `UNINITIALIZED` and retry
//!   after a paced delay; every other failure propagates to the resource
//!   actor, which applies the configured error policy.
//! - The cell lock guards state transitions only; it is never held across
//!   task execution or backoff sleeps.

use std::sync::Arc;

use futures::future;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::model::Value;
use crate::policies::BackoffPolicy;
use crate::resources::{AttrCell, AttributeState, Record, Resource, ResourceHandle};
use crate::tasks::Executor;

/// Drives one remote attribute to `CLEAN`.
pub(crate) struct AttrActor {
    record: Arc<Record>,
    attribute: String,
    /// Instance name, cached for event publishing.
    resource: Arc<str>,
    exec: Arc<Executor>,
    bus: Bus,
    /// Pacing between retries after allow-listed transient races.
    backoff: BackoffPolicy,
    token: CancellationToken,
}

impl AttrActor {
    pub(crate) fn new(
        record: &Arc<Record>,
        attribute: String,
        exec: &Arc<Executor>,
        bus: &Bus,
        backoff: &BackoffPolicy,
        token: &CancellationToken,
    ) -> Self {
        let resource = Arc::from(record.name.as_str());
        Self {
            record: Arc::clone(record),
            attribute,
            resource,
            exec: Arc::clone(exec),
            bus: bus.clone(),
            backoff: backoff.clone(),
            token: token.clone(),
        }
    }

    /// Runs the loop until the attribute is `CLEAN` or a failure propagates.
    ///
    /// Cancellation is checked at safe points: the loop top and retry
    /// sleeps. In-flight driver tasks are not interrupted.
    pub(crate) async fn run(self) -> Result<(), TaskError> {
        let Some(cell) = self.record.cells.get(&self.attribute) else {
            return Err(TaskError::fail(format!(
                "{} has no remote attribute {}",
                self.record.name, self.attribute
            )));
        };

        let mut attempt: u32 = 0;
        loop {
            if self.token.is_cancelled() {
                return Err(TaskError::Canceled);
            }

            match cell.state() {
                AttributeState::Clean => return Ok(()),
                AttributeState::Uninitialized => self.probe_step(cell, &mut attempt).await?,
                AttributeState::Initialized | AttributeState::Dirty => {
                    self.flush_step(cell, &mut attempt).await?;
                }
                state @ (AttributeState::PendingInit | AttributeState::PendingUpdate) => {
                    // The loop settles every step it starts before
                    // re-reading the state, so in-flight states here mean
                    // another driver is racing us.
                    return Err(TaskError::fail(format!(
                        "attribute {} of {} is already converging ({state})",
                        self.attribute, self.record.name
                    )));
                }
            }
        }
    }

    /// `UNINITIALIZED`: learn the remote value through the driver's getter.
    async fn probe_step(&self, cell: &AttrCell, attempt: &mut u32) -> Result<(), TaskError> {
        let handle = ResourceHandle::new(Arc::clone(&self.record));
        let Some(task) = self.record.driver.attr_get(&handle, &self.attribute) else {
            // No getter: nothing to learn remotely.
            self.settle(cell, AttributeState::Initialized).await;
            return Ok(());
        };

        self.settle(cell, AttributeState::PendingInit).await;
        match task.run(Arc::clone(&self.exec), None).await {
            Ok(value) => {
                self.merge_probe(value);
                self.settle(cell, AttributeState::Initialized).await;
                Ok(())
            }
            Err(TaskError::NotFound) => {
                // No remote value yet; the flush will create one.
                self.settle(cell, AttributeState::Initialized).await;
                Ok(())
            }
            Err(TaskError::Transient { reason }) => {
                self.settle(cell, AttributeState::Uninitialized).await;
                self.pace_transient(attempt, &reason).await
            }
            Err(err) => Err(err),
        }
    }

    /// `INITIALIZED`/`DIRTY`: flush the buffered pending value, if any.
    async fn flush_step(&self, cell: &AttrCell, attempt: &mut u32) -> Result<(), TaskError> {
        // Resolve the buffer against the applied value before building the
        // setter, so the driver sees the value it must converge to.
        let resolved = {
            let pending = cell.pending.lock().unwrap();
            if pending.is_empty() {
                None
            } else {
                Some(pending.resolve(self.record.get_value(&self.attribute).as_ref()))
            }
        };

        let Some(resolved) = resolved else {
            // Nothing buffered: converged without issuing a set.
            self.settle(cell, AttributeState::Clean).await;
            return Ok(());
        };

        let handle = ResourceHandle::new(Arc::clone(&self.record));
        let Some(task) = self
            .record
            .driver
            .attr_set(&handle, &self.attribute, &resolved)
        else {
            return Err(TaskError::fail(format!(
                "{} has buffered writes for {} but no setter",
                self.record.type_name, self.attribute
            )));
        };

        self.settle(cell, AttributeState::PendingUpdate).await;
        match task.run(Arc::clone(&self.exec), None).await {
            Ok(value) => {
                if let Value::Map(map) = value {
                    self.note_ignored(self.record.merge_applied(map));
                }
                // The flushed value wins over anything the setter reported
                // for this attribute.
                self.record.apply_value(&self.attribute, resolved);
                cell.pending.lock().unwrap().reset();
                self.settle(cell, AttributeState::Clean).await;
                Ok(())
            }
            Err(TaskError::Transient { reason }) => {
                self.settle(cell, AttributeState::Uninitialized).await;
                self.pace_transient(attempt, &reason).await
            }
            Err(err) => Err(err),
        }
    }

    /// Stores a getter result: maps merge into the applied values, anything
    /// else lands under the attribute's own name. `Null` carries nothing.
    fn merge_probe(&self, value: Value) {
        match value {
            Value::Null => {}
            Value::Map(map) => self.note_ignored(self.record.merge_applied(map)),
            other => self.record.apply_value(&self.attribute, other),
        }
    }

    fn note_ignored(&self, ignored: Vec<String>) {
        for key in ignored {
            self.record.note(format!(
                "attribute {}: dropped undeclared key {key} from task result",
                self.attribute
            ));
        }
    }

    /// Transitions under the cell lock and publishes the change.
    async fn settle(&self, cell: &AttrCell, next: AttributeState) {
        let _guard = cell.lock.lock().await;
        let prev = cell.set_state(next);
        if prev != next {
            self.bus.publish(
                Event::new(EventKind::AttributeState)
                    .with_resource(Arc::clone(&self.resource))
                    .with_attribute(self.attribute.as_str())
                    .with_attr_states(prev, next),
            );
        }
    }

    /// Sleeps out the transient backoff, abandoning the wait on cancellation.
    async fn pace_transient(&self, attempt: &mut u32, reason: &str) -> Result<(), TaskError> {
        let delay = self.backoff.next(*attempt);
        *attempt += 1;
        self.bus.publish(
            Event::new(EventKind::RetryScheduled)
                .with_resource(Arc::clone(&self.resource))
                .with_attribute(self.attribute.as_str())
                .with_attempt(*attempt)
                .with_delay(delay)
                .with_reason(reason),
        );

        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        select! {
            _ = &mut sleep => Ok(()),
            _ = self.token.cancelled() => Err(TaskError::Canceled),
        }
    }
}

/// Converges the remote key attributes ahead of create.
pub(crate) async fn converge_keys(
    record: &Arc<Record>,
    exec: &Arc<Executor>,
    bus: &Bus,
    backoff: &BackoffPolicy,
    token: &CancellationToken,
) -> Result<(), TaskError> {
    converge_matching(record, true, exec, bus, backoff, token).await
}

/// Converges every remote non-key attribute (the update phase).
pub(crate) async fn converge_remaining(
    record: &Arc<Record>,
    exec: &Arc<Executor>,
    bus: &Bus,
    backoff: &BackoffPolicy,
    token: &CancellationToken,
) -> Result<(), TaskError> {
    converge_matching(record, false, exec, bus, backoff, token).await
}

/// Runs one [`AttrActor`] per matching attribute concurrently and reports
/// the first failure in attribute order after all of them settle.
async fn converge_matching(
    record: &Arc<Record>,
    keys: bool,
    exec: &Arc<Executor>,
    bus: &Bus,
    backoff: &BackoffPolicy,
    token: &CancellationToken,
) -> Result<(), TaskError> {
    let mut loops = Vec::new();
    for name in record.cells.keys() {
        let is_key = record
            .schema
            .attribute(name)
            .is_some_and(|attr| attr.key);
        if is_key != keys {
            continue;
        }
        loops.push(AttrActor::new(record, name.clone(), exec, bus, backoff, token).run());
    }

    if loops.is_empty() {
        return Ok(());
    }
    for outcome in future::join_all(loops).await {
        outcome?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrKind, Attrs, AttributeSchema, ResourceId, ResourceSchema};
    use crate::tasks::{Action, Task};

    struct Getter;
    impl Resource for Getter {
        fn attr_get(&self, _handle: &ResourceHandle, attribute: &str) -> Option<Task> {
            let attribute = attribute.to_string();
            Some(
                Action::inline(format!("get:{attribute}"), move || {
                    let mut m = Attrs::new();
                    m.insert(attribute.clone(), Value::Int(42));
                    m.insert("extra".into(), Value::Bool(true));
                    Ok(Value::Map(m))
                })
                .into_task(),
            )
        }

        fn attr_set(&self, _handle: &ResourceHandle, attribute: &str, _value: &Value) -> Option<Task> {
            Some(Action::inline(format!("set:{attribute}"), || Ok(Value::Null)).into_task())
        }
    }

    fn schema() -> ResourceSchema {
        ResourceSchema::new("iface")
            .attr(AttributeSchema::new("mtu", AttrKind::Int).remote())
            .attr(AttributeSchema::new("extra", AttrKind::Bool).remote())
    }

    fn record_with(driver: impl Resource) -> Arc<Record> {
        Record::new(
            ResourceId(1),
            "iface-1".to_string(),
            Arc::new(schema()),
            Arc::new(driver),
            None,
            true,
        )
    }

    fn actor(record: &Arc<Record>, attribute: &str) -> AttrActor {
        AttrActor::new(
            record,
            attribute.to_string(),
            &Arc::new(Executor::new(1)),
            &Bus::new(8),
            &BackoffPolicy::default(),
            &CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_probe_then_clean_without_pending() {
        let record = record_with(Getter);
        actor(&record, "mtu").run().await.unwrap();

        assert_eq!(record.cells["mtu"].state(), AttributeState::Clean);
        assert_eq!(record.get_value("mtu"), Some(Value::Int(42)));
        // The probe map carried a second declared attribute.
        assert_eq!(record.get_value("extra"), Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_flush_applies_pending_locally() {
        let record = record_with(Getter);
        record.cells["mtu"].pending.lock().unwrap().set(Value::Int(9000));

        actor(&record, "mtu").run().await.unwrap();

        assert_eq!(record.get_value("mtu"), Some(Value::Int(9000)));
        assert!(record.cells["mtu"].pending_empty());
    }

    #[tokio::test]
    async fn test_missing_getter_skips_probe() {
        struct SetOnly;
        impl Resource for SetOnly {
            fn attr_set(&self, _h: &ResourceHandle, a: &str, _v: &Value) -> Option<Task> {
                Some(Action::inline(format!("set:{a}"), || Ok(Value::Null)).into_task())
            }
        }

        let record = record_with(SetOnly);
        actor(&record, "mtu").run().await.unwrap();
        assert_eq!(record.cells["mtu"].state(), AttributeState::Clean);
        // Nothing was learned and nothing was applied.
        assert_eq!(record.get_value("mtu"), None);
    }

    #[tokio::test]
    async fn test_missing_setter_fails_flush() {
        struct GetOnly;
        impl Resource for GetOnly {}

        let record = record_with(GetOnly);
        record.cells["mtu"].pending.lock().unwrap().set(Value::Int(1500));

        let err = actor(&record, "mtu").run().await.unwrap_err();
        assert!(matches!(err, TaskError::Fail { .. }));
    }

    #[tokio::test]
    async fn test_not_found_probe_is_not_an_error() {
        struct Missing;
        impl Resource for Missing {
            fn attr_get(&self, _h: &ResourceHandle, a: &str) -> Option<Task> {
                Some(Action::inline(format!("get:{a}"), || Err(TaskError::NotFound)).into_task())
            }
        }

        let record = record_with(Missing);
        actor(&record, "mtu").run().await.unwrap();
        assert_eq!(record.cells["mtu"].state(), AttributeState::Clean);
    }

    #[tokio::test]
    async fn test_transient_resets_and_retries() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct Flaky(Arc<AtomicU32>);
        impl Resource for Flaky {
            fn attr_get(&self, _h: &ResourceHandle, a: &str) -> Option<Task> {
                let calls = Arc::clone(&self.0);
                Some(
                    Action::inline(format!("get:{a}"), move || {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(TaskError::transient("backend race"))
                        } else {
                            Ok(Value::Int(7))
                        }
                    })
                    .into_task(),
                )
            }
        }

        let calls = Arc::new(AtomicU32::new(0));
        let record = record_with(Flaky(Arc::clone(&calls)));
        let fast = BackoffPolicy {
            first: std::time::Duration::from_millis(1),
            max: std::time::Duration::from_millis(2),
            factor: 1.0,
            jitter: crate::policies::JitterPolicy::None,
        };
        AttrActor::new(
            &record,
            "mtu".to_string(),
            &Arc::new(Executor::new(1)),
            &Bus::new(8),
            &fast,
            &CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(record.get_value("mtu"), Some(Value::Int(7)));
    }

    #[tokio::test]
    async fn test_converge_keys_selects_key_attributes() {
        struct Probe;
        impl Resource for Probe {
            fn attr_get(&self, _h: &ResourceHandle, a: &str) -> Option<Task> {
                let a = a.to_string();
                Some(Action::inline(format!("get:{a}"), move || Ok(Value::Str(a.clone()))).into_task())
            }
        }

        let schema = ResourceSchema::new("iface")
            .attr(AttributeSchema::new("slot", AttrKind::Str).key())
            .attr(AttributeSchema::new("mtu", AttrKind::Int).remote());
        let record = Record::new(
            ResourceId(2),
            "iface-2".to_string(),
            Arc::new(schema),
            Arc::new(Probe),
            None,
            true,
        );

        let exec = Arc::new(Executor::new(1));
        let bus = Bus::new(8);
        let backoff = BackoffPolicy::default();
        let token = CancellationToken::new();

        converge_keys(&record, &exec, &bus, &backoff, &token).await.unwrap();
        assert_eq!(record.cells["slot"].state(), AttributeState::Clean);
        // Non-key attribute untouched by the keys phase.
        assert_eq!(record.cells["mtu"].state(), AttributeState::Uninitialized);

        converge_remaining(&record, &exec, &bus, &backoff, &token).await.unwrap();
        assert_eq!(record.cells["mtu"].state(), AttributeState::Clean);
    }
}
