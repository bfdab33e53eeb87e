//! Task algebra end to end: composition through the public operators,
//! execution through [`Manager::schedule`].
//!
//! Covers the combinator contract:
//! - `|` runs children at once and merges map results key-by-key into lists
//! - `>>` runs children in order, stops at the first error, settles with Null
//! - `.pipe(..)` threads each child's result into the next `*_with` action
//! - `Empty` is the identity everywhere and settles with Null

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use labvisor::{
    Action, Attrs, Config, EventKind, Expr, Manager, Resource, ResourceId, ResourceSchema,
    TaskError, TypeRegistry, TypeSpec, Value,
};

struct Bare;
impl Resource for Bare {}

/// One-type engine with a single registered instance to schedule against.
fn engine_with(cfg: Config) -> (Arc<Manager>, ResourceId) {
    let mut registry = TypeRegistry::new();
    registry
        .register(TypeSpec::new(ResourceSchema::new("host"), || Bare))
        .unwrap();
    let engine = Manager::builder(cfg).with_types(registry).build();
    let id = engine.create("host", Attrs::new()).unwrap();
    (engine, id)
}

fn map_of(pairs: &[(&str, Value)]) -> Value {
    Value::Map(
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect(),
    )
}

#[test]
fn test_operators_flatten_same_combinator() {
    let leaf = |label: &'static str| Action::inline(label, || Ok(Value::Null)).into_task();

    let all = (leaf("a") | leaf("b")) | leaf("c");
    assert_eq!(all.describe(), "concurrent[3]");
    assert_eq!(all.len(), 3);
    assert!(matches!(all, Expr::Concurrent(ref kids) if kids.len() == 3));

    let ordered = leaf("a") >> (leaf("b") >> leaf("c"));
    assert_eq!(ordered.describe(), "sequential[3]");

    let piped = leaf("a").pipe(leaf("b")).pipe(leaf("c"));
    assert_eq!(piped.describe(), "piped[3]");

    // Different combinators nest instead of flattening.
    let mixed = (leaf("a") | leaf("b")) >> leaf("c");
    assert_eq!(mixed.describe(), "sequential[2]");
    assert_eq!(mixed.len(), 3);
}

#[test]
fn test_empty_is_the_identity() {
    let leaf = || Action::inline("step", || Ok(Value::Null)).into_task();

    assert_eq!((leaf() | Expr::Empty).describe(), "step");
    assert_eq!((Expr::Empty >> leaf()).describe(), "step");
    assert_eq!(leaf().pipe(Expr::Empty).describe(), "step");
    assert!(Expr::<Action>::empty().is_empty());
}

#[tokio::test]
async fn test_scheduled_leaf_settles_with_its_result() {
    let (engine, id) = engine_with(Config::default());

    let task = Action::inline("mtu:read", || Ok(Value::Int(9000))).into_task();
    let handle = engine.schedule(id, task).unwrap();
    assert_eq!(handle.label(), "mtu:read");
    assert_eq!(handle.outcome().await.unwrap(), Value::Int(9000));
}

#[tokio::test]
async fn test_scheduled_empty_settles_with_null() {
    let (engine, id) = engine_with(Config::default());

    let handle = engine.schedule(id, Expr::empty()).unwrap();
    assert_eq!(handle.label(), "empty");
    assert_eq!(handle.outcome().await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_concurrent_merges_map_results_into_lists() {
    let (engine, id) = engine_with(Config::default());

    // Two children report "addr"; one adds its own key; the scalar result
    // of the last child is dropped by the merge.
    let a = Action::inline("a", || Ok(map_of(&[("addr", Value::Str("10.0.0.1".into()))])));
    let b = Action::inline("b", || {
        Ok(map_of(&[
            ("addr", Value::Str("10.0.0.2".into())),
            ("mtu", Value::Int(1500)),
        ]))
    });
    let c = Action::inline("c", || Ok(Value::Int(42)));

    let handle = engine
        .schedule(id, a.into_task() | b.into_task() | c.into_task())
        .unwrap();
    let expected = map_of(&[
        (
            "addr",
            Value::List(vec![
                Value::Str("10.0.0.1".into()),
                Value::Str("10.0.0.2".into()),
            ]),
        ),
        ("mtu", Value::List(vec![Value::Int(1500)])),
    ]);
    assert_eq!(handle.outcome().await.unwrap(), expected);
}

#[tokio::test]
async fn test_concurrent_fails_with_first_error_in_child_order() {
    let (engine, id) = engine_with(Config::default());
    let finished = Arc::new(AtomicBool::new(false));

    // The first child fails late, the second fails instantly; the reported
    // error is still the first child's, and the healthy third child runs to
    // completion before the combinator settles.
    let slow = Action::future("slow", async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Err(TaskError::fail("slow loris"))
    });
    let instant = Action::inline("instant", || Err(TaskError::fail("instant")));
    let healthy = {
        let finished = Arc::clone(&finished);
        Action::future("healthy", async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            finished.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        })
    };

    let handle = engine
        .schedule(
            id,
            slow.into_task() | instant.into_task() | healthy.into_task(),
        )
        .unwrap();
    match handle.outcome().await {
        Err(TaskError::Fail { error }) => assert_eq!(error, "slow loris"),
        other => panic!("expected the first child's failure, got {other:?}"),
    }
    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_sequential_runs_in_order_and_settles_with_null() {
    let (engine, id) = engine_with(Config::default());
    let order = Arc::new(Mutex::new(Vec::new()));

    let step = |label: &'static str, order: &Arc<Mutex<Vec<&'static str>>>| {
        let order = Arc::clone(order);
        Action::inline(label, move || {
            order.lock().unwrap().push(label);
            Ok(Value::Int(1))
        })
        .into_task()
    };

    let task = step("up", &order) >> step("addr", &order) >> step("route", &order);
    let handle = engine.schedule(id, task).unwrap();

    // Intermediate results are dropped.
    assert_eq!(handle.outcome().await.unwrap(), Value::Null);
    assert_eq!(*order.lock().unwrap(), vec!["up", "addr", "route"]);
}

#[tokio::test]
async fn test_sequential_stops_at_the_first_error() {
    let (engine, id) = engine_with(Config::default());
    let ran = Arc::new(AtomicUsize::new(0));

    let count = |label: &'static str, ran: &Arc<AtomicUsize>| {
        let ran = Arc::clone(ran);
        Action::inline(label, move || {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        })
        .into_task()
    };

    let task = count("first", &ran)
        >> Action::inline("boom", || Err(TaskError::fail("no carrier"))).into_task()
        >> count("never", &ran);
    let handle = engine.schedule(id, task).unwrap();

    match handle.outcome().await {
        Err(TaskError::Fail { error }) => assert_eq!(error, "no carrier"),
        other => panic!("expected the middle failure, got {other:?}"),
    }
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pipe_threads_results_across_action_flavors() {
    let (engine, id) = engine_with(Config::default());

    let emit = Action::inline("emit", || Ok(Value::Int(40)));
    let bump_blocking = Action::blocking_with("bump:blocking", |input| match input {
        Some(Value::Int(n)) => Ok(Value::Int(n + 1)),
        other => Err(TaskError::fail(format!("unexpected input: {other:?}"))),
    });
    let bump_future = Action::future_with("bump:future", |input| async move {
        match input {
            Some(Value::Int(n)) => Ok(Value::Int(n + 1)),
            other => Err(TaskError::fail(format!("unexpected input: {other:?}"))),
        }
    });

    let task = emit
        .into_task()
        .pipe(bump_blocking.into_task())
        .pipe(bump_future.into_task());
    let handle = engine.schedule(id, task).unwrap();
    assert_eq!(handle.label(), "piped[3]");
    assert_eq!(handle.outcome().await.unwrap(), Value::Int(42));
}

#[tokio::test]
async fn test_pipe_head_starts_without_input() {
    let (engine, id) = engine_with(Config::default());

    let head = Action::inline_with("head", |input| {
        assert!(input.is_none(), "pipe heads must not receive input");
        Ok(Value::Bool(true))
    });
    let tail = Action::inline_with("tail", |input| {
        assert_eq!(input, Some(Value::Bool(true)));
        Ok(Value::Bool(false))
    });

    let handle = engine
        .schedule(id, head.into_task().pipe(tail.into_task()))
        .unwrap();
    assert_eq!(handle.outcome().await.unwrap(), Value::Bool(false));
}

#[tokio::test]
async fn test_task_events_carry_label_and_failure_reason() {
    let (engine, id) = engine_with(Config::default());
    let mut events = engine.events();

    let handle = engine
        .schedule(
            id,
            Action::inline("veth:create", || Err(TaskError::fail("no such device"))).into_task(),
        )
        .unwrap();
    assert!(handle.outcome().await.is_err());

    let mut scheduled = None;
    let mut failed = None;
    while let Ok(ev) = events.try_recv() {
        match ev.kind {
            EventKind::TaskScheduled => scheduled = Some(ev),
            EventKind::TaskFailed => failed = Some(ev),
            _ => {}
        }
    }

    let scheduled = scheduled.expect("TaskScheduled event");
    assert_eq!(scheduled.task.as_deref(), Some("veth:create"));
    let failed = failed.expect("TaskFailed event");
    assert_eq!(failed.task.as_deref(), Some("veth:create"));
    assert!(failed.reason.as_deref().unwrap().contains("no such device"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocking_children_respect_the_configured_width() {
    let (engine, id) = engine_with(Config {
        workers: 1,
        ..Config::default()
    });

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let job = |label: String| {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        Action::blocking(label, move || {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        })
        .into_task()
    };

    let task = job("job-1".into()) | job("job-2".into()) | job("job-3".into());
    let handle = engine.schedule(id, task).unwrap();
    assert!(handle.outcome().await.is_ok());
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}
