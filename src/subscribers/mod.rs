//! Event subscribers for the labvisor engine.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`]
//! fan-out, and two built-in subscribers:
//!
//! - [`LogWriter`] — prints events to stdout (tests/demos)
//! - [`StateTracker`] — tracks the last observed state per resource; consulted
//!   by the manager to report stuck resources on shutdown
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   actors ── publish(Event) ──► Bus ──► manager listener ──► SubscriberSet::emit
//!                                                               │
//!                                                   ┌───────────┼───────────┐
//!                                                   ▼           ▼           ▼
//!                                               LogWriter  StateTracker  custom...
//! ```

mod log;
mod set;
mod subscriber;
mod tracker;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
pub use tracker::StateTracker;
