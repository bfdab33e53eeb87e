//! # Runtime events emitted by the engine, actors, and subscriber workers.
//!
//! The [`EventKind`] enum classifies events across four categories:
//! - **Registration/lifecycle**: resources appearing and moving through
//!   their state machines (registered, state changes, clean/failed terminals)
//! - **Attribute lifecycle**: per-attribute state changes while converging
//! - **Task events**: scheduling and settling of driver-built tasks, plus
//!   retry scheduling under a retry policy
//! - **Engine events**: shutdown trio and subscriber overflow/panic
//!
//! The [`Event`] struct carries optional metadata (resource/attribute names,
//! state pairs, reasons, attempt counters, delays) depending on the kind.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore exact order when events are observed
//! out of order across subscribers.
//!
//! ## Example
//! ```rust
//! use labvisor::{Event, EventKind, ResourceState};
//!
//! let ev = Event::new(EventKind::ResourceState)
//!     .with_resource("node-1")
//!     .with_states(ResourceState::Initialized, ResourceState::PendingGet);
//!
//! assert_eq!(ev.kind, EventKind::ResourceState);
//! assert_eq!(ev.resource.as_deref(), Some("node-1"));
//! assert_eq!(ev.state_to, Some(ResourceState::PendingGet));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::resources::{AttributeState, ResourceState};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `task`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `task`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or explicit call).
    ShutdownRequested,

    /// All actors stopped within the configured grace period.
    AllSettledWithin,

    /// Grace period exceeded; some resources did not settle in time.
    GraceExceeded,

    // === Resource lifecycle events ===
    /// A resource instance was registered with the engine.
    ///
    /// Sets:
    /// - `resource`: instance name
    /// - `reason`: concrete type name
    ResourceRegistered,

    /// A resource moved between lifecycle states.
    ///
    /// Sets:
    /// - `resource`: instance name
    /// - `state_from` / `state_to`: the transition
    ResourceState,

    /// A resource reached the converged steady state.
    ///
    /// Sets:
    /// - `resource`: instance name
    ResourceClean,

    /// A resource failed terminally.
    ///
    /// Sets:
    /// - `resource`: instance name
    /// - `reason`: failure message
    ResourceFailed,

    // === Attribute lifecycle events ===
    /// An attribute moved between lifecycle states while converging.
    ///
    /// Sets:
    /// - `resource`: instance name
    /// - `attribute`: attribute name
    /// - `attr_from` / `attr_to`: the transition
    AttributeState,

    // === Task events ===
    /// A task was handed to the executor.
    ///
    /// Sets:
    /// - `task`: task label
    /// - `resource`: owning instance name (when scheduled for a resource)
    TaskScheduled,

    /// A task settled successfully.
    ///
    /// Sets:
    /// - `task`: task label
    /// - `resource`: owning instance name (when scheduled for a resource)
    TaskCompleted,

    /// A task settled with an error.
    ///
    /// Sets:
    /// - `task`: task label
    /// - `resource`: owning instance name (when scheduled for a resource)
    /// - `reason`: outcome message
    TaskFailed,

    /// A failing step will be retried after a backoff delay.
    ///
    /// Sets:
    /// - `resource`: instance name
    /// - `attempt`: retry number (1-based)
    /// - `delay_ms`: sleep before the retry (ms)
    /// - `reason`: the failure that triggered the retry
    RetryScheduled,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Resource instance name, if applicable.
    pub resource: Option<Arc<str>>,
    /// Attribute name, if applicable.
    pub attribute: Option<Arc<str>>,
    /// Task label; also carries the subscriber name for subscriber events.
    pub task: Option<Arc<str>>,
    /// Previous resource state (state-change events).
    pub state_from: Option<ResourceState>,
    /// New resource state (state-change events).
    pub state_to: Option<ResourceState>,
    /// Previous attribute state (attribute events).
    pub attr_from: Option<AttributeState>,
    /// New attribute state (attribute events).
    pub attr_to: Option<AttributeState>,
    /// Human-readable reason (errors, overflow details, type names).
    pub reason: Option<Arc<str>>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Backoff delay before the next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// the next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            resource: None,
            attribute: None,
            task: None,
            state_from: None,
            state_to: None,
            attr_from: None,
            attr_to: None,
            reason: None,
            attempt: None,
            delay_ms: None,
        }
    }

    /// Attaches a resource instance name.
    #[inline]
    pub fn with_resource(mut self, resource: impl Into<Arc<str>>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attaches an attribute name.
    #[inline]
    pub fn with_attribute(mut self, attribute: impl Into<Arc<str>>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Attaches a task label.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a resource state transition.
    #[inline]
    pub fn with_states(mut self, from: ResourceState, to: ResourceState) -> Self {
        self.state_from = Some(from);
        self.state_to = Some(to);
        self
    }

    /// Attaches an attribute state transition.
    #[inline]
    pub fn with_attr_states(mut self, from: AttributeState, to: AttributeState) -> Self {
        self.attr_from = Some(from);
        self.attr_to = Some(to);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    /// True for events produced by the subscriber plumbing itself.
    ///
    /// The fan-out uses this to avoid re-publishing overflow reports about
    /// overflow reports.
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::ResourceClean);
        let b = Event::new(EventKind::ResourceClean);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_setters_fill_fields() {
        let ev = Event::new(EventKind::AttributeState)
            .with_resource("node-1")
            .with_attribute("ip4_address")
            .with_attr_states(AttributeState::Initialized, AttributeState::PendingUpdate)
            .with_reason("flush");

        assert_eq!(ev.resource.as_deref(), Some("node-1"));
        assert_eq!(ev.attribute.as_deref(), Some("ip4_address"));
        assert_eq!(ev.attr_from, Some(AttributeState::Initialized));
        assert_eq!(ev.attr_to, Some(AttributeState::PendingUpdate));
        assert_eq!(ev.reason.as_deref(), Some("flush"));
    }

    #[test]
    fn test_subscriber_event_guard() {
        assert!(Event::subscriber_overflow("log", "full").is_subscriber_event());
        assert!(!Event::new(EventKind::TaskFailed).is_subscriber_event());
    }
}
