//! # StateTracker – last observed state per resource
//!
//! Maintains an in-memory map of resource name → latest
//! [`ResourceState`](crate::ResourceState), fed by
//! [`EventKind::ResourceState`] events.
//!
//! ## Why?
//! The manager consults the tracker during graceful shutdown to name the
//! resources that never settled, and UIs/metrics can display the live map.
//!
//! ## Internal scheme
//! ```text
//! on_event(ev):
//!   └─ if ev.kind == ResourceState && ev.resource && ev.state_to:
//!        keep the entry with the highest seq (out-of-order delivery guard)
//!
//! snapshot() -> Vec<(String, ResourceState)>   (sorted by name)
//! stuck()    -> Vec<String>                     (names not settled, sorted)
//! ```

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::resources::ResourceState;
use crate::subscribers::Subscribe;

/// Tracks the last observed lifecycle state of every resource.
pub struct StateTracker {
    inner: RwLock<HashMap<String, (u64, ResourceState)>>,
    capacity: usize,
}

impl StateTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            capacity: 2048,
        }
    }

    /// Configure the queue capacity for this subscriber.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Returns a snapshot of the current map, sorted by resource name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, ResourceState)> {
        let g = self.inner.read().unwrap();
        let mut v: Vec<(String, ResourceState)> = g
            .iter()
            .map(|(name, (_, state))| (name.clone(), *state))
            .collect();
        v.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        v
    }

    /// Names of resources whose last observed state is not settled
    /// (neither clean nor terminal), sorted.
    #[must_use]
    pub fn stuck(&self) -> Vec<String> {
        let g = self.inner.read().unwrap();
        let mut v: Vec<String> = g
            .iter()
            .filter(|(_, (_, state))| !state.is_settled())
            .map(|(name, _)| name.clone())
            .collect();
        v.sort_unstable();
        v
    }

    fn observe(&self, name: &str, seq: u64, state: ResourceState) {
        let mut g = self.inner.write().unwrap();
        match g.get(name) {
            Some((last_seq, _)) if *last_seq >= seq => {}
            _ => {
                g.insert(name.to_owned(), (seq, state));
            }
        }
    }
}

#[async_trait]
impl Subscribe for StateTracker {
    async fn on_event(&self, ev: &Event) {
        if ev.kind != EventKind::ResourceState {
            return;
        }
        if let (Some(name), Some(state)) = (ev.resource.as_deref(), ev.state_to) {
            self.observe(name, ev.seq, state);
        }
    }

    fn name(&self) -> &'static str {
        "StateTracker"
    }

    fn queue_capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
