//! # Example: minimal
//!
//! Smallest possible testbed: one resource type, one instance, one
//! convergence pass.
//!
//! Demonstrates how to:
//! - Implement the [`Resource`] driver trait for a type.
//! - Register it in a [`TypeRegistry`] and build a [`Manager`].
//! - Create an instance, converge it, and shut down cleanly.
//!
//! ## Flow
//! ```text
//! TypeRegistry ──► Manager::builder().build()
//!     ├─► create("bridge", {name: br0})      UNINITIALIZED
//!     ├─► converge()
//!     │     ├─► probe  ──► not found
//!     │     ├─► create ──► CREATED
//!     │     └─► update ──► CLEAN
//!     └─► shutdown()
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example minimal
//! ```

use std::sync::Arc;

use labvisor::{
    Action, Attrs, Config, LogWriter, Manager, Resource, ResourceHandle, ResourceSchema, Task,
    TaskError, TypeRegistry, TypeSpec, Value,
};

struct Bridge;

impl Resource for Bridge {
    fn probe(&self, handle: &ResourceHandle) -> Task {
        // Nothing pre-exists; send the lifecycle through create.
        Action::inline(format!("{}:probe", handle.name()), || Err(TaskError::NotFound)).into_task()
    }

    fn create(&self, handle: &ResourceHandle) -> Task {
        let name = handle.name().to_string();
        Action::inline(format!("{name}:create"), move || {
            println!("[bridge] creating {name}");
            Ok(Value::Null)
        })
        .into_task()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Declare the resource type
    let mut registry = TypeRegistry::new();
    registry.register(TypeSpec::new(ResourceSchema::new("bridge"), || Bridge))?;

    // 2. Build the engine with a line-per-event log subscriber
    let engine = Manager::builder(Config::default())
        .with_types(registry)
        .with_subscribers(vec![Arc::new(LogWriter::new())])
        .build();

    // 3. Declare one instance
    let mut attrs = Attrs::new();
    attrs.insert("name".into(), Value::Str("br0".into()));
    let id = engine.create("bridge", attrs)?;

    // 4. Converge the testbed
    let summary = engine.converge().await?;
    println!("clean: {:?}", summary.clean);
    println!("state: {:?}", engine.state(id));

    // 5. Shut down gracefully
    engine.shutdown().await?;
    Ok(())
}
