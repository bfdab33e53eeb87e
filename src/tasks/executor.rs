//! # Bounded executor for task bodies.
//!
//! [`Executor`] runs [`Action`] bodies. Blocking bodies are dispatched to
//! tokio's blocking pool behind a semaphore of configurable width, so a burst
//! of converging resources cannot pile up an unbounded number of OS threads.
//! Async and inline bodies run on the calling task and are not gated.
//!
//! ```text
//! run_action(action, input)
//!   ├─ Inline(f)   → f(input)                      (no gate)
//!   ├─ Future(f)   → f(input).await                (no gate)
//!   └─ Blocking(f) → acquire permit ─► spawn_blocking(f) ─► release
//!                        │
//!                        └─ semaphore closed → TaskError::Canceled
//! ```
//!
//! ## Rules
//! - The permit is held for the whole blocking execution: at most `workers`
//!   blocking bodies run at once.
//! - `close()` makes every pending and future acquire settle with
//!   [`TaskError::Canceled`]; bodies already running finish on their own.
//! - A panicking blocking body surfaces as [`TaskError::Fail`] instead of
//!   tearing down the engine.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::TaskError;
use crate::model::Value;

use super::task::{Action, Work};

/// Bounded runner for action bodies.
pub(crate) struct Executor {
    semaphore: Arc<Semaphore>,
    workers: usize,
}

impl Executor {
    /// Creates an executor allowing up to `workers` concurrent blocking
    /// bodies (clamped to a minimum of 1).
    pub(crate) fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// The configured blocking width.
    pub(crate) fn workers(&self) -> usize {
        self.workers
    }

    /// Runs one action body to completion.
    pub(crate) async fn run_action(
        &self,
        action: Action,
        input: Option<Value>,
    ) -> Result<Value, TaskError> {
        match action.work {
            Work::Inline(f) => f(input),
            Work::Future(f) => f(input).await,
            Work::Blocking(f) => {
                let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Err(TaskError::Canceled),
                };
                let joined = tokio::task::spawn_blocking(move || f(input)).await;
                drop(permit);
                match joined {
                    Ok(result) => result,
                    Err(join_err) => {
                        Err(TaskError::fail(format!("worker panicked: {join_err}")))
                    }
                }
            }
        }
    }

    /// Closes the pool: pending and future blocking acquisitions settle with
    /// [`TaskError::Canceled`].
    pub(crate) fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_blocking_width_is_bounded() {
        let exec = Arc::new(Executor::new(1));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..4 {
            let exec = Arc::clone(&exec);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let action = Action::blocking(format!("job-{i}"), move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                });
                exec.run_action(action, None).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_cancels_blocking() {
        let exec = Executor::new(1);
        exec.close();

        let action = Action::blocking("late", || Ok(Value::Null));
        let out = exec.run_action(action, None).await;
        assert!(matches!(out, Err(TaskError::Canceled)));
    }

    #[tokio::test]
    async fn test_blocking_panic_becomes_fail() {
        let exec = Executor::new(1);
        let action = Action::blocking("bad", || panic!("kaboom"));
        let out = exec.run_action(action, None).await;
        assert!(matches!(out, Err(TaskError::Fail { .. })));
    }

    #[tokio::test]
    async fn test_inline_bypasses_gate() {
        let exec = Executor::new(1);
        exec.close();
        // Inline bodies are not gated by the pool.
        let action = Action::inline("quick", || Ok(Value::Int(7)));
        let out = exec.run_action(action, None).await;
        assert_eq!(out.ok(), Some(Value::Int(7)));
    }
}
