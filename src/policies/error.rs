//! # Error policy: what happens when a resource fails to converge.
//!
//! A resource fails when one of its lifecycle steps (initialize, probe,
//! create, attribute update, delete) settles with an unrecoverable
//! [`TaskError`](crate::TaskError). [`ErrorPolicy`] decides what the engine
//! does next:
//!
//! - [`ErrorPolicy::Abort`] — cancel the whole run. The failing resource is
//!   marked failed, every other actor is cancelled, and
//!   [`Manager::converge`](crate::Manager::converge) returns
//!   [`RuntimeError::Aborted`](crate::RuntimeError::Aborted). This is the
//!   default: on a shared testbed, half-converged state is worse than a clean
//!   stop.
//! - [`ErrorPolicy::Quarantine`] — mark the failing resource failed, leave the
//!   rest of the run alone, and report the quarantined set in the
//!   [`Convergence`](crate::Convergence) summary. Resources that depend on a
//!   quarantined one fail in turn when they wait on it.
//! - [`ErrorPolicy::Retry`] — re-enter the failing step after a
//!   [`BackoffPolicy`] delay, up to `max_attempts` times, then quarantine.
//!   Fatal errors are never retried.

use crate::policies::backoff::BackoffPolicy;

/// Engine-wide policy for resources that fail to converge.
#[derive(Clone, Copy, Debug)]
pub enum ErrorPolicy {
    /// Cancel the whole run on the first failing resource (default).
    Abort,

    /// Mark the failing resource failed and keep converging the others.
    Quarantine,

    /// Retry the failing step with backoff, then quarantine.
    Retry {
        /// Delay schedule between attempts.
        backoff: BackoffPolicy,
        /// Retries after the initial attempt; `0` behaves like `Quarantine`.
        max_attempts: u32,
    },
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        ErrorPolicy::Abort
    }
}

impl ErrorPolicy {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorPolicy::Abort => "abort",
            ErrorPolicy::Quarantine => "quarantine",
            ErrorPolicy::Retry { .. } => "retry",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_abort() {
        assert!(matches!(ErrorPolicy::default(), ErrorPolicy::Abort));
    }

    #[test]
    fn test_labels() {
        let retry = ErrorPolicy::Retry {
            backoff: BackoffPolicy::default(),
            max_attempts: 3,
        };
        assert_eq!(ErrorPolicy::Abort.as_label(), "abort");
        assert_eq!(ErrorPolicy::Quarantine.as_label(), "quarantine");
        assert_eq!(retry.as_label(), "retry");
    }
}
