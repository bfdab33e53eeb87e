//! # Task algebra and execution.
//!
//! This module provides the composable work model:
//! - [`Expr`] - the generic combinator algebra (`|`, `>>`, `pipe`)
//! - [`Action`] - a single labeled unit of work (blocking/async/inline)
//! - [`Task`] - `Expr<Action>`, the executable instantiation
//! - [`TaskHandle`] - one-shot outcome observer for scheduled tasks
//!
//! Execution itself is crate-internal: drivers *return* tasks from their
//! hooks, and the engine runs them through the bounded [`Executor`].

mod executor;
mod expr;
mod task;

pub use expr::Expr;
pub use task::{Action, Task, TaskHandle};

pub(crate) use executor::Executor;
