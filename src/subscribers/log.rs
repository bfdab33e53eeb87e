//! # LogWriter — simple event printer
//!
//! A minimal subscriber that prints incoming [`Event`]s to stdout.
//! Use it for tests or demos.
//!
//! ## Example output
//! ```text
//! [registered] resource="node-1" type="lxd-container"
//! [state] resource="node-1" initialized -> pending_get
//! [attr] resource="node-1" attribute="ip4_address" initialized -> pending_update
//! [task-failed] task="node:create" resource="node-1" reason="execution failed: ..."
//! [retry] resource="node-1" attempt=2 delay=200ms
//! [clean] resource="node-1"
//! [shutdown-requested]
//! ```

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;
use async_trait::async_trait;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn opt(field: &Option<std::sync::Arc<str>>) -> &str {
    field.as_deref().unwrap_or("?")
}

fn state_pair(ev: &Event) -> String {
    match (ev.state_from, ev.state_to) {
        (Some(f), Some(t)) => format!("{f} -> {t}"),
        (None, Some(t)) => format!("-> {t}"),
        _ => String::from("?"),
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::ResourceRegistered => {
                println!(
                    "[registered] resource={:?} type={:?}",
                    opt(&e.resource),
                    opt(&e.reason)
                );
            }
            EventKind::ResourceState => {
                println!("[state] resource={:?} {}", opt(&e.resource), state_pair(e));
            }
            EventKind::ResourceClean => {
                println!("[clean] resource={:?}", opt(&e.resource));
            }
            EventKind::ResourceFailed => {
                println!(
                    "[failed] resource={:?} reason={:?}",
                    opt(&e.resource),
                    opt(&e.reason)
                );
            }
            EventKind::AttributeState => {
                let pair = match (e.attr_from, e.attr_to) {
                    (Some(f), Some(t)) => format!("{f} -> {t}"),
                    _ => String::from("?"),
                };
                println!(
                    "[attr] resource={:?} attribute={:?} {}",
                    opt(&e.resource),
                    opt(&e.attribute),
                    pair
                );
            }
            EventKind::TaskScheduled => {
                println!(
                    "[scheduled] task={:?} resource={:?}",
                    opt(&e.task),
                    opt(&e.resource)
                );
            }
            EventKind::TaskCompleted => {
                println!(
                    "[completed] task={:?} resource={:?}",
                    opt(&e.task),
                    opt(&e.resource)
                );
            }
            EventKind::TaskFailed => {
                println!(
                    "[task-failed] task={:?} resource={:?} reason={:?}",
                    opt(&e.task),
                    opt(&e.resource),
                    opt(&e.reason)
                );
            }
            EventKind::RetryScheduled => {
                println!(
                    "[retry] resource={:?} attempt={:?} delay={:?}ms reason={:?}",
                    opt(&e.resource),
                    e.attempt,
                    e.delay_ms,
                    opt(&e.reason)
                );
            }
            EventKind::ShutdownRequested => {
                println!("[shutdown-requested]");
            }
            EventKind::AllSettledWithin => {
                println!("[all-settled-within-grace]");
            }
            EventKind::GraceExceeded => {
                println!("[grace-exceeded]");
            }
            EventKind::SubscriberOverflow => {
                println!(
                    "[subscriber-overflow] subscriber={:?} reason={:?}",
                    opt(&e.task),
                    opt(&e.reason)
                );
            }
            EventKind::SubscriberPanicked => {
                println!(
                    "[subscriber-panicked] subscriber={:?} info={:?}",
                    opt(&e.task),
                    opt(&e.reason)
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
