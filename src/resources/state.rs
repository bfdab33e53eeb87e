//! # Lifecycle states for resources and attributes.
//!
//! Every managed resource is driven through [`ResourceState`] by its actor;
//! every remote attribute is driven through [`AttributeState`] while the
//! resource converges. States are observable through
//! [`Event`](crate::Event) state-change notifications and through
//! [`Manager::state`](crate::Manager::state).
//!
//! ## Resource lifecycle
//! ```text
//! UNINITIALIZED ─► PENDING_DEPS ─► DEPS_OK ─► PENDING_INIT ─► INITIALIZED
//!                                                                  │
//!                                            ┌─────────────────────┘
//!                                            ▼
//!                                       PENDING_GET ──(found)──────────► CREATED
//!                                            │                              │
//!                                        (not found)                       │
//!                                            ▼                              │
//!                                        GET_DONE ─► PENDING_KEYS ─► KEYS_OK│
//!                                            │ (no keys)    │              │
//!                                            └──────────────┴► PENDING_CREATE
//!                                                                    │
//!                                                                    ▼
//!                                   CLEAN ◄── PENDING_UPDATE ◄── CREATED
//!                                     │              ▲
//!                                     └── (write) ──► DIRTY
//!
//! PENDING_DELETE ─► DELETED        FAILED (terminal, any step)
//! ```
//!
//! ## Rules
//! - `PENDING_*` states mean a step is in flight; only the owning actor moves
//!   the resource out of them.
//! - `CLEAN` is the steady state: the resource parks there until a write
//!   marks it `DIRTY` or teardown marks it `PENDING_DELETE`.
//! - `FAILED` and `DELETED` are terminal.

use tokio::sync::watch;

/// Lifecycle state of a managed resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Registered, not yet picked up by an actor.
    Uninitialized,
    /// Waiting for referenced resources, orderings, and sub-resources.
    PendingDeps,
    /// All dependencies settled.
    DepsOk,
    /// Driver `initialize` task in flight.
    PendingInit,
    /// Initialization done; ready to probe.
    Initialized,
    /// Driver `probe` task in flight.
    PendingGet,
    /// Probe reported not-found; the create path is taken.
    GetDone,
    /// Key attributes converging ahead of create.
    PendingKeys,
    /// Key attributes settled.
    KeysOk,
    /// Driver `create` task in flight.
    PendingCreate,
    /// Exists on the substrate; attributes not yet reconciled.
    Created,
    /// A write landed after the resource was clean.
    Dirty,
    /// Attribute reconciliation in flight.
    PendingUpdate,
    /// Converged; parked until written to or torn down.
    Clean,
    /// Driver `delete` task in flight.
    PendingDelete,
    /// Removed from the substrate (terminal).
    Deleted,
    /// Unrecoverable failure (terminal).
    Failed,
}

impl ResourceState {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            ResourceState::Uninitialized => "uninitialized",
            ResourceState::PendingDeps => "pending_deps",
            ResourceState::DepsOk => "deps_ok",
            ResourceState::PendingInit => "pending_init",
            ResourceState::Initialized => "initialized",
            ResourceState::PendingGet => "pending_get",
            ResourceState::GetDone => "get_done",
            ResourceState::PendingKeys => "pending_keys",
            ResourceState::KeysOk => "keys_ok",
            ResourceState::PendingCreate => "pending_create",
            ResourceState::Created => "created",
            ResourceState::Dirty => "dirty",
            ResourceState::PendingUpdate => "pending_update",
            ResourceState::Clean => "clean",
            ResourceState::PendingDelete => "pending_delete",
            ResourceState::Deleted => "deleted",
            ResourceState::Failed => "failed",
        }
    }

    /// True for states the resource can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResourceState::Deleted | ResourceState::Failed)
    }

    /// True once the resource no longer needs actor work: converged or terminal.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ResourceState::Clean | ResourceState::Deleted | ResourceState::Failed
        )
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Lifecycle state of a single remote attribute.
///
/// Attributes move `UNINITIALIZED → PENDING_INIT → INITIALIZED →
/// PENDING_UPDATE → CLEAN`; a buffered write re-enters via `DIRTY`, and a
/// transient backend race resets the attribute to `UNINITIALIZED` for another
/// pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeState {
    /// Not yet reconciled against the substrate.
    Uninitialized,
    /// Getter task in flight.
    PendingInit,
    /// Remote value known (or known absent).
    Initialized,
    /// Setter task in flight.
    PendingUpdate,
    /// Converged.
    Clean,
    /// A write landed after the attribute was clean.
    Dirty,
}

impl AttributeState {
    /// Returns a short stable label (snake_case) for use in logs/events.
    pub fn as_label(&self) -> &'static str {
        match self {
            AttributeState::Uninitialized => "uninitialized",
            AttributeState::PendingInit => "pending_init",
            AttributeState::Initialized => "initialized",
            AttributeState::PendingUpdate => "pending_update",
            AttributeState::Clean => "clean",
            AttributeState::Dirty => "dirty",
        }
    }
}

impl std::fmt::Display for AttributeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Resettable async flag over a `watch` channel.
///
/// `wait()` resolves once the flag is set, including when it was set before
/// the call; `clear()` re-arms it. Used for the per-resource `clean`, `init`
/// and `failed` latches that dependency waits select on.
#[derive(Debug)]
pub(crate) struct Flag {
    tx: watch::Sender<bool>,
}

impl Flag {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub(crate) fn set(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is set. Multiple waiters are all woken.
    pub(crate) async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for cannot observe a closed channel.
        let _ = rx.wait_for(|set| *set).await;
    }
}
