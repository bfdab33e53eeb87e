//! # labvisor
//!
//! **Labvisor** is a declarative orchestration engine for network-experiment
//! testbeds.
//!
//! Experiments are described as a set of typed resources (containers, links,
//! interfaces, channels, applications) with attribute values; the engine
//! computes the dependency order, drives every resource through a
//! convergence state machine, and keeps it converged while attributes change
//! at runtime. Substrate side effects run as composable tasks on a bounded
//! executor.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!    ┌─────────────┐  ┌─────────────┐  ┌─────────────┐
//!    │  TypeSpec   │  │  TypeSpec   │  │  TypeSpec   │   (schema + driver
//!    │ "container" │  │ "interface" │  │  "channel"  │    factory + caps)
//!    └──────┬──────┘  └──────┬──────┘  └──────┬──────┘
//!           ▼                ▼                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Manager (engine facade)                                        │
//! │  - TypeTable (frozen registrations, capability resolution)      │
//! │  - Record index (id / name / type lookups, reverse wiring)      │
//! │  - Executor (bounded blocking pool shared by all tasks)         │
//! │  - Bus (broadcast events)                                       │
//! └──────┬──────────────────┬──────────────────┬────────────────┬───┘
//!        ▼                  ▼                  ▼                │
//!  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//!  │ResourceActor│   │ResourceActor│   │ResourceActor│         │
//!  │ (lifecycle) │   │ (lifecycle) │   │ (lifecycle) │         │
//!  └┬────────────┘   └┬────────────┘   └┬────────────┘         │
//!   │ per converging  │                 │                      │
//!   │ attribute:      │ Publishes:      │                      │
//!   │  AttrActor      │ - ResourceState │                      │
//!   │  (get/set loop) │ - TaskScheduled │                      │
//!   │                 │ - RetryScheduled│                      │
//!   ▼                 ▼                 ▼                      ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Bus (broadcast channel)                     │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 ▼
//!                      ┌────────────────────┐
//!                      │  event listener    │
//!                      │   (in Manager)     │
//!                      └──┬──────────────┬──┘
//!                         ▼              ▼
//!                   StateTracker   SubscriberSet
//!                  (stuck report)  (per-sub queues)
//! ```
//!
//! ### Resource lifecycle
//! ```text
//! create() ──► Record ──► converge() ──► ResourceActor::run()
//!
//! UNINITIALIZED ─► PENDING_DEPS ─► DEPS_OK ─► PENDING_INIT ─► INITIALIZED
//!      (refs, orderings, requirements, sub-resources)              │
//!                      ┌────────────(probe)───────────────────────┘
//!                      ▼
//!                 PENDING_GET ──(found: attrs merged)──────► CREATED
//!                      │                                        ▲
//!                 (not found)                                   │
//!                      ▼                                        │
//!                  GET_DONE ─► PENDING_KEYS ─► KEYS_OK ─► PENDING_CREATE
//!                      └───────(no identity keys)───┘
//!
//!        CREATED / DIRTY ─► PENDING_UPDATE ─► CLEAN ──(write)──► DIRTY
//!                            (one get/set loop per remote attribute)
//!
//!        PENDING_DELETE ─► DELETED            FAILED (policy, terminal)
//! ```
//!
//! ## Features
//! | Area               | Description                                                               | Key types / traits                        |
//! |--------------------|---------------------------------------------------------------------------|-------------------------------------------|
//! | **Resource model** | Declare typed resources: attributes, references, orderings, capabilities. | [`ResourceSchema`], [`AttributeSchema`]   |
//! | **Drivers**        | Hook substrate side effects into the lifecycle.                           | [`Resource`], [`TypeSpec`]                |
//! | **Task algebra**   | Compose side effects concurrently, sequentially, or piped.                | [`Task`], [`Action`], [`Expr`]            |
//! | **Convergence**    | Per-resource state machines with abort/quarantine/retry policies.         | [`Manager`], [`Convergence`], [`ErrorPolicy`] |
//! | **Subscriber API** | Hook into engine events (logging, state tracking, custom sinks).          | [`Subscribe`]                             |
//! | **Errors**         | Typed errors for orchestration and task execution.                        | [`RuntimeError`], [`TaskError`]           |
//! | **Configuration**  | Centralize runtime settings.                                              | [`Config`]                                |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use labvisor::{
//!     Attrs, Config, LogWriter, Manager, Resource, ResourceSchema, Subscribe, TypeRegistry,
//!     TypeSpec,
//! };
//!
//! struct Host;
//! impl Resource for Host {}
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = TypeRegistry::new();
//!     registry.register(TypeSpec::new(ResourceSchema::new("host"), || Host))?;
//!
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!     let engine = Manager::builder(Config::default())
//!         .with_types(registry)
//!         .with_subscribers(subs)
//!         .build();
//!
//!     engine.create("host", Attrs::new())?;
//!     let summary = engine.converge().await?;
//!     assert_eq!(summary.clean.len(), 1);
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod engine;
mod error;
mod events;
mod model;
mod policies;
mod resources;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use config::Config;
pub use engine::{Convergence, Manager, ManagerBuilder, TypeRegistry, TypeSpec};
pub use error::{RuntimeError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use model::{
    AttrKind, Attrs, AttributeSchema, DefaultValue, Multiplicity, Requirement, ResourceId,
    ResourceSchema, Value,
};
pub use policies::{BackoffPolicy, ErrorPolicy, JitterPolicy};
pub use resources::{
    AttributeState, Resource, ResourceHandle, ResourceState, SubResources, SubSpec,
};
pub use subscribers::{LogWriter, StateTracker, Subscribe, SubscriberSet};
pub use tasks::{Action, Expr, Task, TaskHandle};
