//! Capability-based provider resolution: abstract references, requirement
//! merging, auto-instantiation with derived attributes, and reverse wiring.

use std::sync::Arc;

use labvisor::{
    AttrKind, Attrs, AttributeSchema, Config, ErrorPolicy, Manager, Multiplicity, Requirement,
    Resource, ResourceSchema, ResourceState, RuntimeError, TypeRegistry, TypeSpec, Value,
};

struct Bare;
impl Resource for Bare {}

/// Engine under the quarantine policy, so resolution failures isolate
/// instead of aborting the run.
fn engine_with(types: Vec<TypeSpec>) -> Arc<Manager> {
    let mut registry = TypeRegistry::new();
    for spec in types {
        registry.register(spec).unwrap();
    }
    Manager::builder(Config {
        on_error: ErrorPolicy::Quarantine,
        ..Config::default()
    })
    .with_types(registry)
    .build()
}

fn named(name: &str) -> Attrs {
    let mut attrs = Attrs::new();
    attrs.insert("name".into(), Value::Str(name.into()));
    attrs
}

/// A client whose `fwd` attribute wants some forwarder, any forwarder.
fn client_schema() -> ResourceSchema {
    ResourceSchema::new("client").attr(
        AttributeSchema::new("fwd", AttrKind::Ref("forwarder".into()))
            .mandatory()
            .auto(),
    )
}

fn plain() -> TypeSpec {
    TypeSpec::new(ResourceSchema::new("plain"), || Bare).implements("forwarder")
}

fn vpp() -> TypeSpec {
    TypeSpec::new(ResourceSchema::new("vpp"), || Bare)
        .implements("forwarder")
        .capabilities(["dpdk", "icn"])
}

fn icn_fwd() -> TypeSpec {
    TypeSpec::new(ResourceSchema::new("icn-fwd"), || Bare)
        .implements("forwarder")
        .capability("icn")
}

#[tokio::test]
async fn test_abstract_reference_picks_the_first_registered_implementer() {
    let engine = engine_with(vec![plain(), vpp(), TypeSpec::new(client_schema(), || Bare)]);
    let client = engine.create("client", named("c0")).unwrap();

    let summary = engine.converge().await.unwrap();
    assert!(summary.is_fully_clean());

    // No capabilities demanded: registration order decides.
    let providers = engine.by_type("plain");
    assert_eq!(providers.len(), 1);
    assert!(engine.by_type("vpp").is_empty());

    let provider = providers[0];
    assert_eq!(engine.get(client, "fwd").unwrap(), Some(Value::Ref(provider)));
    assert_eq!(engine.owner(provider), Some(client));
    let trail = engine.trail(client).unwrap().join("\n");
    assert!(trail.contains("auto-instantiated"));
}

#[tokio::test]
async fn test_schema_requirements_steer_resolution() {
    let client = TypeSpec::new(
        client_schema().require(Requirement::new("fwd", ["dpdk"])),
        || Bare,
    );
    let engine = engine_with(vec![plain(), vpp(), client]);
    engine.create("client", named("c0")).unwrap();

    let summary = engine.converge().await.unwrap();
    assert!(summary.is_fully_clean());
    assert!(engine.by_type("plain").is_empty());
    assert_eq!(engine.by_type("vpp").len(), 1);
}

#[tokio::test]
async fn test_instance_requirements_union_with_the_schema() {
    let client = TypeSpec::new(
        client_schema().require(Requirement::new("fwd", ["icn"])),
        || Bare,
    );
    let engine = engine_with(vec![plain(), icn_fwd(), vpp(), client]);
    let c0 = engine.create("client", named("c0")).unwrap();

    // The schema alone would pick icn-fwd; the union {icn, dpdk} leaves
    // only vpp.
    engine
        .add_requirement(c0, Requirement::new("fwd", ["dpdk"]))
        .unwrap();

    let summary = engine.converge().await.unwrap();
    assert!(summary.is_fully_clean());
    assert!(engine.by_type("icn-fwd").is_empty());
    assert_eq!(engine.by_type("vpp").len(), 1);
}

#[tokio::test]
async fn test_missing_candidate_quarantines_the_requester() {
    let client = TypeSpec::new(
        client_schema().require(Requirement::new("fwd", ["quantum"])),
        || Bare,
    );
    let engine = engine_with(vec![plain(), vpp(), client]);
    let c0 = engine.create("client", named("c0")).unwrap();

    let summary = engine.converge().await.unwrap();
    assert_eq!(summary.quarantined, vec!["c0".to_string()]);
    assert_eq!(engine.state(c0), Some(ResourceState::Failed));
    let trail = engine.trail(c0).unwrap().join("\n");
    assert!(trail.contains("no candidate for type 'forwarder'"));
}

#[tokio::test]
async fn test_concrete_references_never_switch_type() {
    let pinned_bad = TypeSpec::new(
        ResourceSchema::new("pinned-bad")
            .attr(
                AttributeSchema::new("fwd", AttrKind::Ref("plain".into()))
                    .mandatory()
                    .auto(),
            )
            .require(Requirement::new("fwd", ["dpdk"])),
        || Bare,
    );
    let pinned_good = TypeSpec::new(
        ResourceSchema::new("pinned-good")
            .attr(
                AttributeSchema::new("fwd", AttrKind::Ref("vpp".into()))
                    .mandatory()
                    .auto(),
            )
            .require(Requirement::new("fwd", ["dpdk"])),
        || Bare,
    );
    let engine = engine_with(vec![plain(), vpp(), pinned_bad, pinned_good]);
    let bad = engine.create("pinned-bad", named("pb")).unwrap();
    let good = engine.create("pinned-good", named("pg")).unwrap();

    let summary = engine.converge().await.unwrap();

    // vpp would cover the demand, but a concrete reference is pinned to
    // its named type.
    assert_eq!(summary.quarantined, vec!["pb".to_string()]);
    assert_eq!(engine.state(good), Some(ResourceState::Clean));
    assert!(engine.by_type("plain").is_empty());
    assert_eq!(engine.by_type("vpp").len(), 1);
    let trail = engine.trail(bad).unwrap().join("\n");
    assert!(trail.contains("no candidate for type 'plain'"));
}

#[tokio::test]
async fn test_derived_attributes_wire_back_to_the_requester() {
    // The provider demands a reference back to whoever asked for it, plus
    // a region it cannot know by itself.
    let provider = TypeSpec::new(
        ResourceSchema::new("plain")
            .attr(
                AttributeSchema::new("client", AttrKind::Ref("client".into())).mandatory(),
            )
            .attr(AttributeSchema::new("region", AttrKind::Str).mandatory()),
        || Bare,
    )
    .implements("forwarder");
    let client = TypeSpec::new(
        client_schema().attr(AttributeSchema::new("region", AttrKind::Str)),
        || Bare,
    );
    let engine = engine_with(vec![provider, client]);
    let mut attrs = named("c0");
    attrs.insert("region".into(), Value::Str("eu-1".into()));
    let c0 = engine.create("client", attrs).unwrap();

    let summary = engine.converge().await.unwrap();
    assert!(summary.is_fully_clean());

    let p = engine.by_type("plain")[0];
    assert_eq!(engine.get(p, "client").unwrap(), Some(Value::Ref(c0)));
    assert_eq!(
        engine.values(p).unwrap().get("region"),
        Some(&Value::Str("eu-1".into()))
    );
    assert_eq!(engine.owner(p), Some(c0));
}

#[tokio::test]
async fn test_supplied_references_skip_auto_instantiation() {
    let engine = engine_with(vec![plain(), vpp(), TypeSpec::new(client_schema(), || Bare)]);
    let v0 = engine.create("vpp", named("v0")).unwrap();
    let mut attrs = named("c0");
    attrs.insert("fwd".into(), Value::Ref(v0));
    let c0 = engine.create("client", attrs).unwrap();

    let summary = engine.converge().await.unwrap();
    assert!(summary.is_fully_clean());

    // The supplied reference is kept; no provider is derived.
    assert_eq!(engine.by_type("forwarder"), vec![v0]);
    assert_eq!(engine.get(c0, "fwd").unwrap(), Some(Value::Ref(v0)));
    assert_eq!(engine.owner(v0), None);
}

#[tokio::test]
async fn test_requirements_must_name_a_declared_attribute() {
    let ghost = TypeSpec::new(
        ResourceSchema::new("ghost-req").require(Requirement::new("ghost", ["x"])),
        || Bare,
    );
    let engine = engine_with(vec![plain(), ghost]);
    let g0 = engine.create("ghost-req", named("g0")).unwrap();

    // Instance-level additions are validated eagerly.
    let err = engine
        .add_requirement(g0, Requirement::new("missing", ["x"]))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownAttribute { .. }));

    // Schema-level ones surface during the dependency wait.
    let summary = engine.converge().await.unwrap();
    assert_eq!(summary.quarantined, vec!["g0".to_string()]);
    let trail = engine.trail(g0).unwrap().join("\n");
    assert!(trail.contains("requirement names unknown attribute 'ghost'"));
}

#[tokio::test]
async fn test_reverse_attributes_mirror_forward_references() {
    let node = TypeSpec::new(ResourceSchema::new("node"), || Bare);
    let iface = TypeSpec::new(
        ResourceSchema::new("iface").attr(
            AttributeSchema::new("node", AttrKind::Ref("node".into()))
                .multiplicity(Multiplicity::ManyToOne)
                .reverse("ifaces"),
        ),
        || Bare,
    );
    let engine = engine_with(vec![node, iface]);
    let n0 = engine.create("node", named("n0")).unwrap();
    let mut attrs = named("i0");
    attrs.insert("node".into(), Value::Ref(n0));
    let i0 = engine.create("iface", attrs).unwrap();

    let summary = engine.converge().await.unwrap();
    assert!(summary.is_fully_clean());

    // The injected aggregate on the target mirrors the forward edge.
    assert_eq!(
        engine.values(n0).unwrap().get("ifaces"),
        Some(&Value::List(vec![Value::Ref(i0)]))
    );
}
