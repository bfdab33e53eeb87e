use std::sync::Arc;
use std::time::Duration;

use labvisor::{
    Action, AttrKind, Attrs, AttributeSchema, BackoffPolicy, Config, ErrorPolicy, LogWriter,
    Manager, Multiplicity, Resource, ResourceHandle, ResourceSchema, Task, TaskError,
    TypeRegistry, TypeSpec, Value,
};

struct LxdNode;

impl Resource for LxdNode {
    fn probe(&self, handle: &ResourceHandle) -> Task {
        Action::inline(format!("{}:probe", handle.name()), || Err(TaskError::NotFound)).into_task()
    }

    fn create(&self, handle: &ResourceHandle) -> Task {
        let name = handle.name().to_string();
        Action::blocking(format!("{name}:create"), move || {
            // Stands in for an `lxc launch` call.
            std::thread::sleep(Duration::from_millis(50));
            println!("[lxd] container {name} up");
            Ok(Value::Null)
        })
        .into_task()
    }

    fn delete(&self, handle: &ResourceHandle) -> Option<Task> {
        let name = handle.name().to_string();
        Some(
            Action::inline(format!("{name}:delete"), move || {
                println!("[lxd] container {name} removed");
                Ok(Value::Null)
            })
            .into_task(),
        )
    }
}

struct Iface;

impl Resource for Iface {
    fn create(&self, handle: &ResourceHandle) -> Task {
        let name = handle.name().to_string();
        Action::inline(format!("{name}:create"), move || {
            println!("[iface] {name} attached");
            Ok(Value::Null)
        })
        .into_task()
    }

    fn attr_set(&self, handle: &ResourceHandle, attribute: &str, value: &Value) -> Option<Task> {
        let name = handle.name().to_string();
        let attribute = attribute.to_string();
        let value = value.clone();
        Some(
            Action::inline(format!("{name}:set:{attribute}"), move || {
                println!("[iface] {name} {attribute} <- {value:?}");
                Ok(Value::Null)
            })
            .into_task(),
        )
    }

    fn delete(&self, handle: &ResourceHandle) -> Option<Task> {
        let name = handle.name().to_string();
        Some(
            Action::inline(format!("{name}:delete"), move || {
                println!("[iface] {name} detached");
                Ok(Value::Null)
            })
            .into_task(),
        )
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let mut cfg = Config::default();
    cfg.grace = Duration::from_secs(5);
    cfg.workers = 2;
    cfg.on_error = ErrorPolicy::Retry {
        backoff: BackoffPolicy::default(),
        max_attempts: 3,
    };

    let mut registry = TypeRegistry::new();
    registry.register(
        TypeSpec::new(ResourceSchema::new("lxd-node"), || LxdNode)
            .implements("node")
            .capability("linux"),
    )?;
    registry.register(TypeSpec::new(
        ResourceSchema::new("iface")
            .attr(
                AttributeSchema::new("node", AttrKind::Ref("node".into()))
                    .mandatory()
                    .auto()
                    .multiplicity(Multiplicity::ManyToOne)
                    .reverse("ifaces"),
            )
            .attr(AttributeSchema::new("mtu", AttrKind::Int).remote()),
        || Iface,
    ))?;

    let engine = Manager::builder(cfg)
        .with_types(registry)
        .with_subscribers(vec![Arc::new(LogWriter::new())])
        .build();

    // The iface's abstract "node" reference is unset, so convergence
    // auto-instantiates an lxd-node and wires both directions.
    let mut attrs = Attrs::new();
    attrs.insert("name".into(), Value::Str("eth0".into()));
    attrs.insert("mtu".into(), Value::Int(1500));
    let eth0 = engine.create("iface", attrs)?;

    let summary = engine.converge().await?;
    println!("clean after first pass: {:?}", summary.clean);
    if let Some(node) = engine.by_type("node").first().copied() {
        println!(
            "auto node state={:?} ifaces={:?}",
            engine.state(node),
            engine.get(node, "ifaces")?
        );
    }

    // Runtime reconfiguration: the buffered write flushes on the next pass.
    engine.set(eth0, "mtu", 9000).await?;
    let summary = engine.converge().await?;
    println!("clean after mtu bump: {:?}", summary.clean);

    // Tear the testbed down in reverse dependency order, then stop.
    engine.teardown().await?;
    match engine.shutdown().await {
        Ok(()) => println!("testbed stopped gracefully"),
        Err(e) => println!("testbed stopped with error: {e}"),
    }
    Ok(())
}
