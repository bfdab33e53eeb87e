//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by the manager, resource
//! actors, attribute loops, and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Manager`, `engine::actor`, `engine::attrs`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumer**: the manager's subscriber listener, which fans out to
//!   `SubscriberSet` (and through it to the built-in `StateTracker`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
