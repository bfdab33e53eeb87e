//! # ResourceActor: per-resource convergence loop.
//!
//! One actor drives one registered resource through the lifecycle state
//! machine until the resource is `CLEAN`, then parks on its change
//! notification and re-enters the update loop whenever a write lands. The
//! actor is the only writer of the resource state; everything else observes
//! it through flags and events.
//!
//! ## State flow
//! ```text
//! UNINITIALIZED ─► PENDING_DEPS ─► DEPS_OK ─► PENDING_INIT ─► INITIALIZED
//!                                                                  │
//!                       ┌─────────────(probe)──────────────────────┘
//!                       ▼
//!                  PENDING_GET ──(found: attrs merged)────────► CREATED
//!                       │                                          ▲
//!                  (not found)                                     │
//!                       ▼                                          │
//!                   GET_DONE ─► PENDING_KEYS ─► KEYS_OK ─► PENDING_CREATE
//!                       └────(no identity keys)────┘
//!
//!         CREATED / DIRTY ─► PENDING_UPDATE ─► CLEAN ──(write)──► DIRTY
//!
//!         PENDING_DELETE ─► DELETED          FAILED (policy, terminal)
//! ```
//!
//! ## Rules
//! - Cancellation is honored at safe points: loop top, the clean park, and
//!   retry sleeps. Driver tasks are never interrupted mid-flight.
//! - `Transient` outcomes reset to the re-entry state from the table above
//!   and are paced by the configured transient backoff.
//! - Unrecoverable failures go through the configured [`ErrorPolicy`]:
//!   abort cancels the whole run, quarantine fails this resource only,
//!   retry re-enters from the reset state until attempts are exhausted.
//! - The write lock is held across the whole update phase and released only
//!   after the resulting state is set.

use std::sync::Arc;

use tokio::{select, time};

use crate::error::TaskError;
use crate::events::{Event, EventKind};
use crate::model::Value;
use crate::policies::ErrorPolicy;
use crate::resources::{Record, ResourceHandle, ResourceState};
use crate::tasks::Task;

use super::attrs;
use super::deps;
use super::manager::Manager;

/// What the loop does after a step.
#[derive(PartialEq)]
enum Flow {
    Continue,
    Exit,
}

/// Drives one resource to its settled state and keeps it converged.
pub(crate) struct ResourceActor {
    manager: Arc<Manager>,
    record: Arc<Record>,
    /// Instance name, cached for event publishing.
    resource: Arc<str>,
}

impl ResourceActor {
    pub(crate) fn new(manager: Arc<Manager>, record: Arc<Record>) -> Self {
        let resource = Arc::from(record.name.as_str());
        Self {
            manager,
            record,
            resource,
        }
    }

    /// Runs the loop until the resource is terminal or the run is cancelled.
    ///
    /// A `CLEAN` resource does not return: it parks on the change
    /// notification so later writes re-enter the update loop, and exits
    /// only on teardown or cancellation.
    pub(crate) async fn run(self) {
        // Both counters are monotonic for the lifetime of the actor.
        let mut transients: u32 = 0;
        let mut retries: u32 = 0;

        loop {
            if self.manager.token.is_cancelled() {
                break;
            }

            let state = self.record.state();
            let flow = match state {
                ResourceState::Uninitialized => self.step_deps(&mut retries).await,
                ResourceState::DepsOk => self.step_init(&mut retries).await,
                ResourceState::Initialized => self.step_probe(&mut transients, &mut retries).await,
                ResourceState::GetDone => {
                    if self.record.schema.key_attributes().next().is_some() {
                        self.step_keys(&mut transients, &mut retries).await
                    } else {
                        self.step_create(&mut transients, &mut retries).await
                    }
                }
                ResourceState::KeysOk => self.step_create(&mut transients, &mut retries).await,
                ResourceState::Created | ResourceState::Dirty => {
                    self.step_update(&mut transients, &mut retries).await
                }
                ResourceState::Clean => self.park().await,
                ResourceState::PendingDelete => self.step_delete(&mut retries).await,
                ResourceState::Deleted | ResourceState::Failed => break,
                ResourceState::PendingDeps
                | ResourceState::PendingInit
                | ResourceState::PendingGet
                | ResourceState::PendingKeys
                | ResourceState::PendingCreate
                | ResourceState::PendingUpdate => {
                    // This actor is the only state writer and settles every
                    // step it starts, so an in-flight state here means the
                    // record is being driven twice.
                    self.fail_terminal(&format!("observed in-flight state {state} at loop top"));
                    Flow::Exit
                }
            };

            if flow == Flow::Exit {
                break;
            }
        }
    }

    /// `UNINITIALIZED`: wait for references, requirements, orderings, and
    /// sub-resources.
    async fn step_deps(&self, retries: &mut u32) -> Flow {
        self.transition(ResourceState::PendingDeps);
        match deps::wait_dependencies(&self.manager, &self.record).await {
            Ok(()) => {
                self.record.note("dependencies settled");
                self.transition(ResourceState::DepsOk);
                Flow::Continue
            }
            Err(err) => {
                self.handle_failure("dependency wait", err, ResourceState::Uninitialized, retries)
                    .await
            }
        }
    }

    /// `DEPS_OK`: run the driver's pre-creation setup.
    async fn step_init(&self, retries: &mut u32) -> Flow {
        self.transition(ResourceState::PendingInit);
        let task = self.record.driver.initialize(&self.handle());
        match self.run_task(task).await {
            Ok(_) => {
                self.transition(ResourceState::Initialized);
                Flow::Continue
            }
            Err(err) => {
                self.handle_failure("initialize", err, ResourceState::DepsOk, retries)
                    .await
            }
        }
    }

    /// `INITIALIZED`: probe the substrate for an existing instance.
    async fn step_probe(&self, transients: &mut u32, retries: &mut u32) -> Flow {
        self.transition(ResourceState::PendingGet);
        let task = self.record.driver.probe(&self.handle());
        match self.run_task(task).await {
            Ok(value) => {
                if let Value::Map(map) = value {
                    self.manager.merge_discovered(&self.record, map);
                }
                self.record.note("probe found an existing instance");
                self.transition(ResourceState::Created);
                Flow::Continue
            }
            Err(TaskError::NotFound) => {
                self.record.note("probe reported not found");
                self.transition(ResourceState::GetDone);
                Flow::Continue
            }
            Err(TaskError::Transient { reason }) => {
                self.transition(ResourceState::Initialized);
                self.pace_transient("probe", &reason, transients).await
            }
            Err(err) => {
                self.handle_failure("probe", err, ResourceState::Initialized, retries)
                    .await
            }
        }
    }

    /// `GET_DONE` with identity keys: converge them ahead of create.
    async fn step_keys(&self, transients: &mut u32, retries: &mut u32) -> Flow {
        self.transition(ResourceState::PendingKeys);
        let outcome = attrs::converge_keys(
            &self.record,
            &self.manager.exec,
            &self.manager.bus,
            &self.manager.cfg.transient_backoff,
            &self.manager.token,
        )
        .await;
        match outcome {
            Ok(()) => {
                self.record.note("identity keys converged");
                self.transition(ResourceState::KeysOk);
                Flow::Continue
            }
            Err(TaskError::Transient { reason }) => {
                self.transition(ResourceState::GetDone);
                self.pace_transient("keys", &reason, transients).await
            }
            Err(err) => {
                self.handle_failure("keys", err, ResourceState::GetDone, retries)
                    .await
            }
        }
    }

    /// `GET_DONE`/`KEYS_OK`: bring the instance into existence.
    async fn step_create(&self, transients: &mut u32, retries: &mut u32) -> Flow {
        self.transition(ResourceState::PendingCreate);
        let task = self.record.driver.create(&self.handle());
        match self.run_task(task).await {
            Ok(value) => {
                if let Value::Map(map) = value {
                    self.manager.merge_discovered(&self.record, map);
                }
                self.record.note("created");
                self.transition(ResourceState::Created);
                Flow::Continue
            }
            Err(TaskError::AlreadyExists) => {
                // Lost a creation race; the instance is there either way.
                self.record.note("create reported already exists");
                self.transition(ResourceState::Created);
                Flow::Continue
            }
            Err(TaskError::Transient { reason }) => {
                self.transition(ResourceState::Initialized);
                self.pace_transient("create", &reason, transients).await
            }
            Err(err) => {
                self.handle_failure("create", err, ResourceState::KeysOk, retries)
                    .await
            }
        }
    }

    /// `CREATED`/`DIRTY`: converge every remaining remote attribute.
    async fn step_update(&self, transients: &mut u32, retries: &mut u32) -> Flow {
        let outcome = {
            // Buffered writes cannot interleave with the flush: the lock is
            // taken before PENDING_UPDATE and released only after the next
            // state is set.
            let _guard = self.record.write_lock.lock().await;
            self.transition(ResourceState::PendingUpdate);
            let outcome = attrs::converge_remaining(
                &self.record,
                &self.manager.exec,
                &self.manager.bus,
                &self.manager.cfg.transient_backoff,
                &self.manager.token,
            )
            .await;
            match &outcome {
                Ok(()) => {
                    self.record.note("update done; attributes clean");
                    self.transition(ResourceState::Clean);
                }
                Err(TaskError::Transient { .. }) => {
                    self.transition(ResourceState::Created);
                }
                Err(_) => {}
            }
            outcome
        };

        match outcome {
            Ok(()) => Flow::Continue,
            Err(TaskError::Transient { reason }) => {
                self.pace_transient("update", &reason, transients).await
            }
            Err(err) => {
                self.handle_failure("update", err, ResourceState::Created, retries)
                    .await
            }
        }
    }

    /// `PENDING_DELETE` (set by teardown): remove the instance.
    async fn step_delete(&self, retries: &mut u32) -> Flow {
        let Some(task) = self.record.driver.delete(&self.handle()) else {
            // Explicitly unimplemented: drop the instance from the engine
            // and leave the substrate object behind.
            self.record
                .note("delete unimplemented; substrate object left behind");
            self.transition(ResourceState::Deleted);
            return Flow::Continue;
        };

        match self.run_task(task).await {
            Ok(_) => {
                self.record.note("deleted");
                self.transition(ResourceState::Deleted);
                Flow::Continue
            }
            Err(err) => {
                self.handle_failure("delete", err, ResourceState::PendingDelete, retries)
                    .await
            }
        }
    }

    /// `CLEAN`: park until a write, a teardown, or cancellation wakes us.
    async fn park(&self) -> Flow {
        select! {
            _ = self.record.changed.notified() => Flow::Continue,
            _ = self.manager.token.cancelled() => Flow::Exit,
        }
    }

    fn handle(&self) -> ResourceHandle {
        ResourceHandle::new(Arc::clone(&self.record))
    }

    /// Swaps the state and publishes the transition; `CLEAN` additionally
    /// publishes the converged event.
    fn transition(&self, next: ResourceState) {
        let prev = self.record.set_state(next);
        if prev == next {
            return;
        }
        self.manager.bus.publish(
            Event::new(EventKind::ResourceState)
                .with_resource(Arc::clone(&self.resource))
                .with_states(prev, next),
        );
        if next == ResourceState::Clean {
            self.manager.bus.publish(
                Event::new(EventKind::ResourceClean).with_resource(Arc::clone(&self.resource)),
            );
        }
    }

    /// Runs one driver-built task on the shared executor, publishing task
    /// lifecycle events. Empty tasks settle immediately without events.
    async fn run_task(&self, task: Task) -> Result<Value, TaskError> {
        if task.is_empty() {
            return Ok(Value::Null);
        }
        let label: Arc<str> = Arc::from(task.describe().as_ref());
        self.manager.bus.publish(
            Event::new(EventKind::TaskScheduled)
                .with_task(Arc::clone(&label))
                .with_resource(Arc::clone(&self.resource)),
        );
        let outcome = task.run(Arc::clone(&self.manager.exec), None).await;
        match &outcome {
            Ok(_) => self.manager.bus.publish(
                Event::new(EventKind::TaskCompleted)
                    .with_task(label)
                    .with_resource(Arc::clone(&self.resource)),
            ),
            Err(err) => self.manager.bus.publish(
                Event::new(EventKind::TaskFailed)
                    .with_task(label)
                    .with_resource(Arc::clone(&self.resource))
                    .with_reason(err.as_message()),
            ),
        }
        outcome
    }

    /// Marks the resource failed and publishes the terminal event.
    fn fail_terminal(&self, reason: &str) {
        self.record.note(format!("failed: {reason}"));
        self.transition(ResourceState::Failed);
        self.manager.bus.publish(
            Event::new(EventKind::ResourceFailed)
                .with_resource(Arc::clone(&self.resource))
                .with_reason(reason.to_string()),
        );
    }

    /// Applies the configured error policy to an unrecoverable failure.
    ///
    /// `reset` is the state a retry re-enters from. Cancellation exits
    /// quietly; the resource keeps its current state for the stuck report.
    async fn handle_failure(
        &self,
        step: &'static str,
        err: TaskError,
        reset: ResourceState,
        retries: &mut u32,
    ) -> Flow {
        if matches!(err, TaskError::Canceled) {
            return Flow::Exit;
        }
        let reason = format!("{step}: {err}");

        if let ErrorPolicy::Retry {
            backoff,
            max_attempts,
        } = self.manager.cfg.on_error
        {
            if err.is_retryable() && *retries < max_attempts {
                *retries += 1;
                let delay = backoff.next(*retries - 1);
                self.record
                    .note(format!("retry {} after {reason}", *retries));
                self.manager.bus.publish(
                    Event::new(EventKind::RetryScheduled)
                        .with_resource(Arc::clone(&self.resource))
                        .with_attempt(*retries)
                        .with_delay(delay)
                        .with_reason(reason),
                );
                self.transition(reset);

                let sleep = time::sleep(delay);
                tokio::pin!(sleep);
                return select! {
                    _ = &mut sleep => Flow::Continue,
                    _ = self.manager.token.cancelled() => Flow::Exit,
                };
            }
        }

        match self.manager.cfg.on_error {
            ErrorPolicy::Abort => {
                self.fail_terminal(&reason);
                self.manager.record_abort(&self.resource, &reason);
                self.manager.token.cancel();
            }
            // Retry lands here once attempts are exhausted or the error is
            // not retryable.
            ErrorPolicy::Quarantine | ErrorPolicy::Retry { .. } => {
                self.fail_terminal(&reason);
            }
        }
        Flow::Exit
    }

    /// Paces a transient reset, abandoning the sleep on cancellation.
    async fn pace_transient(&self, step: &'static str, reason: &str, transients: &mut u32) -> Flow {
        let delay = self.manager.cfg.transient_backoff.next(*transients);
        *transients += 1;
        self.record
            .note(format!("{step} reset by transient: {reason}"));
        self.manager.bus.publish(
            Event::new(EventKind::RetryScheduled)
                .with_resource(Arc::clone(&self.resource))
                .with_attempt(*transients)
                .with_delay(delay)
                .with_reason(reason),
        );

        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        select! {
            _ = &mut sleep => Flow::Continue,
            _ = self.manager.token.cancelled() => Flow::Exit,
        }
    }
}
