//! # Fluent construction of a [`Manager`].
//!
//! Collects the configuration, the type registrations, and the event
//! subscribers, then assembles the engine in one shot. Building spawns the
//! subscriber listener, so it must happen inside a Tokio runtime.

use std::sync::Arc;

use crate::config::Config;
use crate::subscribers::Subscribe;

use super::manager::Manager;
use super::registry::TypeRegistry;

/// Builder returned by [`Manager::builder`].
///
/// ```no_run
/// use std::sync::Arc;
/// use labvisor::{Config, LogWriter, Manager, TypeRegistry};
///
/// # async fn demo() {
/// let registry = TypeRegistry::new();
/// let engine = Manager::builder(Config::default())
///     .with_types(registry)
///     .with_subscribers(vec![Arc::new(LogWriter::new())])
///     .build();
/// # let _ = engine;
/// # }
/// ```
pub struct ManagerBuilder {
    cfg: Config,
    types: TypeRegistry,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl ManagerBuilder {
    pub(crate) fn new(cfg: Config) -> Self {
        Self {
            cfg,
            types: TypeRegistry::new(),
            subscribers: Vec::new(),
        }
    }

    /// Sets the resource type registrations the engine instantiates from.
    ///
    /// The registry is frozen at build time; no type can be added to a
    /// running engine.
    pub fn with_types(mut self, types: TypeRegistry) -> Self {
        self.types = types;
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive engine events (resource and attribute state
    /// transitions, task lifecycle, retries) through dedicated workers with
    /// bounded queues. A state tracker feeding the shutdown stuck-report is
    /// always installed alongside.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Assembles the engine: freezes the type table, wires the bus, the
    /// executor, and the subscriber listener. Must be called inside a Tokio
    /// runtime.
    pub fn build(self) -> Arc<Manager> {
        Manager::new(self.cfg, self.types, self.subscribers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceSchema;
    use crate::resources::Resource;
    use crate::engine::types::TypeSpec;

    struct Bare;
    impl Resource for Bare {}

    #[tokio::test]
    async fn test_build_freezes_types() {
        let mut registry = TypeRegistry::new();
        registry
            .register(TypeSpec::new(ResourceSchema::new("node"), || Bare))
            .unwrap();

        let engine = Manager::builder(Config::default())
            .with_types(registry)
            .build();
        assert!(engine.create("node", Default::default()).is_ok());
        assert!(matches!(
            engine.create("ghost", Default::default()),
            Err(crate::error::RuntimeError::UnknownType { .. })
        ));
    }
}
