//! # Global engine configuration.
//!
//! Provides [`Config`], the centralized settings for a [`Manager`](crate::Manager).
//!
//! ## Sentinel values
//! - `workers = 0` → sized from the host: `available_parallelism() + 1`
//! - `bus_capacity` is clamped to a minimum of 1 by the bus
//!
//! Prefer the helper accessors ([`Config::worker_count`],
//! [`Config::bus_capacity_clamped`]) over reading the raw fields, so sentinel
//! handling stays in one place.

use std::time::Duration;

use crate::policies::{BackoffPolicy, ErrorPolicy, JitterPolicy};

/// Global configuration for the resource engine.
///
/// Defines:
/// - **Shutdown behavior**: grace period for graceful termination
/// - **Worker pool**: how many blocking task executions may run at once
/// - **Event system**: bus capacity for event delivery
/// - **Failure handling**: what happens when a resource fails to converge
///
/// ## Field semantics
/// - `grace`: maximum wait for actors to stop on shutdown (`0s` = do not wait)
/// - `workers`: blocking-executor width (`0` = `available_parallelism() + 1`)
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by the bus)
/// - `on_error`: policy applied when a resource fails (abort, quarantine, retry)
/// - `transient_backoff`: pacing for allow-listed backend races that reset an
///   attribute and try again
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for actors to finish after cancellation.
    ///
    /// When shutdown is requested:
    /// - Actors are cancelled via `CancellationToken`
    /// - The manager waits up to `grace` for them to exit
    /// - If the timeout is exceeded, `shutdown()` returns
    ///   [`RuntimeError::GraceExceeded`](crate::RuntimeError::GraceExceeded)
    pub grace: Duration,

    /// Width of the blocking worker pool shared by all task executions.
    ///
    /// - `0` = sized from the host (`available_parallelism() + 1`)
    /// - `n > 0` = at most `n` blocking task bodies run simultaneously
    ///
    /// Applies only to blocking task bodies; async and inline bodies are not
    /// gated by this limit.
    pub workers: usize,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` messages will
    /// receive `Lagged` and skip older items. Minimum value is 1.
    pub bus_capacity: usize,

    /// What to do when a resource fails to converge.
    ///
    /// See [`ErrorPolicy`] for the three behaviors. The default aborts the
    /// whole run on the first failure.
    pub on_error: ErrorPolicy,

    /// Pacing between attribute retries after an allow-listed transient
    /// backend error.
    ///
    /// Transient conditions reset the attribute state machine and try again;
    /// this backoff spaces out those retries so a persistently racy backend
    /// does not get hammered.
    pub transient_backoff: BackoffPolicy,
}

impl Config {
    /// Returns the effective blocking worker pool width.
    ///
    /// Resolves the `0` sentinel to `available_parallelism() + 1`, falling
    /// back to 2 when the host parallelism cannot be queried.
    #[inline]
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() + 1)
            .unwrap_or(2)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    ///
    /// The bus should use this value to avoid constructing an invalid channel.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 60s` (reasonable graceful shutdown window)
    /// - `workers = 0` (sized from the host)
    /// - `bus_capacity = 1024` (good baseline)
    /// - `on_error = ErrorPolicy::Abort` (fail fast)
    /// - `transient_backoff = 100ms..5s, factor 2.0, equal jitter`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            workers: 0,
            bus_capacity: 1024,
            on_error: ErrorPolicy::Abort,
            transient_backoff: BackoffPolicy {
                first: Duration::from_millis(100),
                max: Duration::from_secs(5),
                factor: 2.0,
                jitter: JitterPolicy::Equal,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_sentinel_resolves_to_host() {
        let cfg = Config::default();
        assert!(cfg.worker_count() >= 2);
    }

    #[test]
    fn test_worker_count_explicit_wins() {
        let cfg = Config {
            workers: 3,
            ..Config::default()
        };
        assert_eq!(cfg.worker_count(), 3);
    }

    #[test]
    fn test_bus_capacity_clamped() {
        let cfg = Config {
            bus_capacity: 0,
            ..Config::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
