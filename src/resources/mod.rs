//! # Resource drivers and per-instance engine state.
//!
//! [`Resource`] is the plugin surface: a driver implements it once per
//! resource type and returns tasks from its hooks. [`ResourceState`] and
//! [`AttributeState`] are the two lifecycle state machines the engine walks
//! for every instance; `record` holds the engine-side state behind them.

mod pending;
mod record;
mod resource;
mod state;

pub use resource::{Resource, ResourceHandle, SubResources, SubSpec};
pub use state::{AttributeState, ResourceState};

pub(crate) use pending::PendingValue;
pub(crate) use record::{AttrCell, Record};
