//! # Executable tasks: actions, composition, and outcome handles.
//!
//! A [`Task`] is an [`Expr`] whose leaves are [`Action`]s — single units of
//! work built by resource drivers (shell-outs, API calls, local computation).
//! Tasks settle with `Result<Value, TaskError>`.
//!
//! ## Result semantics
//! - `Empty` settles with [`Value::Null`].
//! - A leaf settles with its action's result.
//! - `Concurrent` runs all children at once and **merges** their map results:
//!   every key of every child map is promoted to a list, so a key produced by
//!   one child yields `[v]` and a key produced by several children collects
//!   all of them in child order. Non-map child results are ignored. If any
//!   child fails, the combinator fails with the first error in child order
//!   once all children have settled.
//! - `Sequential` runs children in order, stops at the first error, and
//!   settles with [`Value::Null`] (intermediate results are dropped).
//! - `Piped` runs children in order, feeding each child the previous child's
//!   result; it settles with the last result.
//!
//! ## Action flavors
//! | Constructor            | Runs on                      | Input-aware |
//! |------------------------|------------------------------|-------------|
//! | [`Action::blocking`]   | worker pool (`spawn_blocking`) | no        |
//! | [`Action::blocking_with`] | worker pool                | yes         |
//! | [`Action::future`]     | current async task           | no          |
//! | [`Action::future_with`]| current async task           | yes         |
//! | [`Action::inline`]     | current async task, sync     | no          |
//! | [`Action::inline_with`]| current async task, sync     | yes         |
//!
//! The `*_with` flavors receive `Some(value)` when the action is reached
//! through a pipe, `None` otherwise.
//!
//! ## Execution
//! A task is executed **exactly once**; execution consumes it. Tasks reach
//! the executor either through the engine (driver hooks) or through
//! [`Manager::schedule`](crate::Manager::schedule), which returns a
//! [`TaskHandle`] for observing the outcome.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio::sync::oneshot;

use crate::error::TaskError;
use crate::model::Value;

use super::executor::Executor;
use super::expr::Expr;

/// A composable unit of executable work: an [`Expr`] over [`Action`] leaves.
pub type Task = Expr<Action>;

/// The work carried by an [`Action`].
pub(crate) enum Work {
    /// Synchronous body run directly on the async task (keep it short).
    Inline(Box<dyn FnOnce(Option<Value>) -> Result<Value, TaskError> + Send>),
    /// Synchronous body dispatched to the bounded blocking pool.
    Blocking(Box<dyn FnOnce(Option<Value>) -> Result<Value, TaskError> + Send>),
    /// Async body awaited on the current task.
    Future(Box<dyn FnOnce(Option<Value>) -> BoxFuture<'static, Result<Value, TaskError>> + Send>),
}

/// A single labeled unit of work.
///
/// Actions are the leaves of the task algebra. The label shows up in
/// [`TaskScheduled`](crate::EventKind::TaskScheduled)/
/// [`TaskFailed`](crate::EventKind::TaskFailed) events and in resource trails;
/// pick something a log reader can act on (`"veth:create"`, `"node:probe"`).
pub struct Action {
    label: Cow<'static, str>,
    pub(crate) work: Work,
}

impl Action {
    /// Work that may block (process spawns, synchronous I/O); dispatched to
    /// the bounded worker pool.
    pub fn blocking<F>(label: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce() -> Result<Value, TaskError> + Send + 'static,
    {
        Self {
            label: label.into(),
            work: Work::Blocking(Box::new(move |_| f())),
        }
    }

    /// Like [`Action::blocking`], but receives the piped input, if any.
    pub fn blocking_with<F>(label: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(Option<Value>) -> Result<Value, TaskError> + Send + 'static,
    {
        Self {
            label: label.into(),
            work: Work::Blocking(Box::new(f)),
        }
    }

    /// Async work awaited in place (non-blocking bodies only).
    pub fn future<Fut>(label: impl Into<Cow<'static, str>>, fut: Fut) -> Self
    where
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        Self {
            label: label.into(),
            work: Work::Future(Box::new(move |_| fut.boxed())),
        }
    }

    /// Like [`Action::future`], but the body is built from the piped input.
    pub fn future_with<F, Fut>(label: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(Option<Value>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        Self {
            label: label.into(),
            work: Work::Future(Box::new(move |input| f(input).boxed())),
        }
    }

    /// Short synchronous work run directly on the async task.
    pub fn inline<F>(label: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce() -> Result<Value, TaskError> + Send + 'static,
    {
        Self {
            label: label.into(),
            work: Work::Inline(Box::new(move |_| f())),
        }
    }

    /// Like [`Action::inline`], but receives the piped input, if any.
    pub fn inline_with<F>(label: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(Option<Value>) -> Result<Value, TaskError> + Send + 'static,
    {
        Self {
            label: label.into(),
            work: Work::Inline(Box::new(f)),
        }
    }

    /// The diagnostic label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wraps this action into a single-leaf [`Task`].
    pub fn into_task(self) -> Task {
        Expr::Leaf(self)
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl From<Action> for Task {
    fn from(action: Action) -> Self {
        action.into_task()
    }
}

impl Expr<Action> {
    /// Diagnostic label for the whole expression: the leaf's own label, or
    /// the combinator name with its child count.
    pub fn describe(&self) -> Cow<'static, str> {
        match self {
            Expr::Empty => Cow::Borrowed("empty"),
            Expr::Leaf(action) => Cow::Owned(action.label().to_owned()),
            Expr::Concurrent(kids) => Cow::Owned(format!("concurrent[{}]", kids.len())),
            Expr::Sequential(kids) => Cow::Owned(format!("sequential[{}]", kids.len())),
            Expr::Piped(kids) => Cow::Owned(format!("piped[{}]", kids.len())),
        }
    }

    /// Executes the expression to completion, consuming it.
    ///
    /// `input` is threaded to leaves reached through a pipe; combinator
    /// children that are not pipe heads always start with `None`.
    pub(crate) fn run(
        self,
        exec: Arc<Executor>,
        input: Option<Value>,
    ) -> BoxFuture<'static, Result<Value, TaskError>> {
        async move {
            match self {
                Expr::Empty => Ok(Value::Null),
                Expr::Leaf(action) => exec.run_action(action, input).await,
                Expr::Concurrent(kids) => {
                    let futs: Vec<_> = kids
                        .into_iter()
                        .map(|kid| kid.run(Arc::clone(&exec), None))
                        .collect();
                    let results = join_all(futs).await;

                    let mut merged: BTreeMap<String, Vec<Value>> = BTreeMap::new();
                    let mut first_err: Option<TaskError> = None;
                    for res in results {
                        match res {
                            Ok(Value::Map(map)) => {
                                for (key, value) in map {
                                    merged.entry(key).or_default().push(value);
                                }
                            }
                            Ok(_) => {}
                            Err(err) => {
                                if first_err.is_none() {
                                    first_err = Some(err);
                                }
                            }
                        }
                    }
                    if let Some(err) = first_err {
                        return Err(err);
                    }
                    Ok(Value::Map(
                        merged
                            .into_iter()
                            .map(|(key, values)| (key, Value::List(values)))
                            .collect(),
                    ))
                }
                Expr::Sequential(kids) => {
                    for kid in kids {
                        kid.run(Arc::clone(&exec), None).await?;
                    }
                    Ok(Value::Null)
                }
                Expr::Piped(kids) => {
                    let mut carry = input;
                    let mut last = Value::Null;
                    for kid in kids {
                        last = kid.run(Arc::clone(&exec), carry).await?;
                        carry = Some(last.clone());
                    }
                    Ok(last)
                }
            }
        }
        .boxed()
    }
}

/// One-shot handle to the outcome of a scheduled task.
///
/// Returned by [`Manager::schedule`](crate::Manager::schedule). Dropping the
/// handle does not cancel the task; it only discards the outcome.
pub struct TaskHandle {
    label: Arc<str>,
    rx: oneshot::Receiver<Result<Value, TaskError>>,
}

impl TaskHandle {
    pub(crate) fn new(label: Arc<str>, rx: oneshot::Receiver<Result<Value, TaskError>>) -> Self {
        Self { label, rx }
    }

    /// The label of the scheduled task.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Waits for the task to settle and returns its outcome.
    ///
    /// Settles with [`TaskError::Canceled`] if the engine dropped the task
    /// before it could run (shutdown).
    pub async fn outcome(self) -> Result<Value, TaskError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(TaskError::Canceled),
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec() -> Arc<Executor> {
        Arc::new(Executor::new(4))
    }

    fn map_of(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_empty_settles_with_null() {
        let out = Task::Empty.run(exec(), None).await;
        assert_eq!(out.ok(), Some(Value::Null));
    }

    #[tokio::test]
    async fn test_concurrent_promotes_every_key_to_list() {
        let a = Action::inline("a", || Ok(map_of(&[("x", Value::Int(1))])));
        let b = Action::inline("b", || {
            Ok(map_of(&[("x", Value::Int(2)), ("y", Value::Int(3))]))
        });

        let out = (a.into_task() | b.into_task()).run(exec(), None).await;
        let expected = map_of(&[
            ("x", Value::List(vec![Value::Int(1), Value::Int(2)])),
            ("y", Value::List(vec![Value::Int(3)])),
        ]);
        assert_eq!(out.ok(), Some(expected));
    }

    #[tokio::test]
    async fn test_concurrent_ignores_non_map_results() {
        let a = Action::inline("a", || Ok(Value::Int(42)));
        let b = Action::inline("b", || Ok(map_of(&[("k", Value::Bool(true))])));

        let out = (a.into_task() | b.into_task()).run(exec(), None).await;
        assert_eq!(
            out.ok(),
            Some(map_of(&[("k", Value::List(vec![Value::Bool(true)]))]))
        );
    }

    #[tokio::test]
    async fn test_sequential_settles_with_null_and_stops_on_error() {
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let first = Action::inline("first", || Err(TaskError::fail("boom")));
        let second = Action::inline("second", move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(Value::Null)
        });

        let out = (first.into_task() >> second.into_task())
            .run(exec(), None)
            .await;
        assert!(matches!(out, Err(TaskError::Fail { .. })));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_piped_threads_results() {
        let first = Action::inline("emit", || Ok(Value::Int(41)));
        let second = Action::inline_with("bump", |input| match input {
            Some(Value::Int(n)) => Ok(Value::Int(n + 1)),
            other => Err(TaskError::fail(format!("unexpected input: {other:?}"))),
        });

        let out = first
            .into_task()
            .pipe(second.into_task())
            .run(exec(), None)
            .await;
        assert_eq!(out.ok(), Some(Value::Int(42)));
    }

    #[tokio::test]
    async fn test_describe_labels() {
        let t = Action::inline("probe", || Ok(Value::Null)).into_task();
        assert_eq!(t.describe(), "probe");

        let c = Action::inline("a", || Ok(Value::Null)).into_task()
            | Action::inline("b", || Ok(Value::Null)).into_task();
        assert_eq!(c.describe(), "concurrent[2]");
    }
}
