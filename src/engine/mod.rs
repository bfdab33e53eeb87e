//! # Engine internals: manager, actors, dependency machinery.
//!
//! The public surface is the [`Manager`] facade (built through
//! [`ManagerBuilder`]) and the type registration pair
//! [`TypeRegistry`]/[`TypeSpec`]. Everything else — the per-resource actor,
//! the attribute convergence loops, the dependency wait, capability
//! resolution — is internal and reachable only through the manager.

mod actor;
mod attrs;
mod builder;
mod deps;
mod manager;
mod registry;
mod shutdown;
mod types;

pub use builder::ManagerBuilder;
pub use manager::{Convergence, Manager};
pub use registry::TypeRegistry;
pub use types::TypeSpec;
