//! Error types used by the labvisor engine and by task execution.
//!
//! This module defines two main error enums:
//!
//! - [`RuntimeError`] — errors raised by the orchestration engine itself
//!   (registration, resolution, convergence, shutdown).
//! - [`TaskError`] — outcomes of individual task executions, including the
//!   two outcomes that are *expected* during convergence (`NotFound` on a
//!   probe, `AlreadyExists` on a create) and the allow-listed `Transient`
//!   class that resets state instead of failing it.
//!
//! Both types provide helper methods (`as_label`, `as_message`) for
//! logs/metrics, plus [`TaskError::is_retryable`].

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the labvisor engine.
///
/// These represent failures of the orchestration layer: bad registrations,
/// unresolvable references, dependency cycles, aborted or incomplete
/// convergence runs, and shutdown overruns.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A resource type name was referenced but never registered.
    #[error("unknown resource type '{type_name}'")]
    UnknownType {
        /// The unresolved type name.
        type_name: String,
    },

    /// A resource id or name did not match any registered instance.
    #[error("unknown resource '{resource}'")]
    UnknownResource {
        /// The id or name that failed to resolve.
        resource: String,
    },

    /// An attribute name is not declared by the resource's schema.
    #[error("type '{type_name}' has no attribute '{attribute}'")]
    UnknownAttribute {
        /// Owning type name.
        type_name: String,
        /// The undeclared attribute.
        attribute: String,
    },

    /// An external write targeted a read-only attribute.
    #[error("attribute '{attribute}' of type '{type_name}' is read-only")]
    ReadOnlyAttribute {
        /// Owning type name.
        type_name: String,
        /// The read-only attribute.
        attribute: String,
    },

    /// A write targeted a resource already in a terminal state.
    #[error("resource '{resource}' is {state}; it no longer accepts writes")]
    TerminalResource {
        /// The resource's instance name.
        resource: String,
        /// The terminal state label.
        state: String,
    },

    /// A mandatory attribute had neither a supplied value nor a default.
    #[error("mandatory attribute '{attribute}' of type '{type_name}' is missing")]
    MissingMandatory {
        /// Owning type name.
        type_name: String,
        /// The missing attribute.
        attribute: String,
    },

    /// Two instances were registered under the same name.
    #[error("resource name '{name}' is already taken")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },

    /// Capability resolution found no implementing type.
    #[error("no candidate for type '{type_name}' with capabilities {capabilities:?}")]
    NoCandidate {
        /// The abstract or concrete type that was requested.
        type_name: String,
        /// The capabilities the reference site required.
        capabilities: Vec<String>,
    },

    /// The dependency graph contains a cycle; no topological order exists.
    #[error("dependency cycle among resources: {remaining:?}")]
    DependencyCycle {
        /// Names of the resources left unsorted once the cycle was hit.
        remaining: Vec<String>,
    },

    /// A resource failed under [`ErrorPolicy::Abort`](crate::ErrorPolicy)
    /// and the whole run was cancelled.
    #[error("convergence aborted by '{resource}': {reason}")]
    Aborted {
        /// The resource whose failure triggered the abort.
        resource: String,
        /// The underlying failure message.
        reason: String,
    },

    /// Shutdown grace period was exceeded; some resources never settled.
    #[error("shutdown grace {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of resources that did not settle in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use labvisor::RuntimeError;
    ///
    /// let err = RuntimeError::DuplicateName { name: "node-1".into() };
    /// assert_eq!(err.as_label(), "runtime_duplicate_name");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::UnknownType { .. } => "runtime_unknown_type",
            RuntimeError::UnknownResource { .. } => "runtime_unknown_resource",
            RuntimeError::UnknownAttribute { .. } => "runtime_unknown_attribute",
            RuntimeError::ReadOnlyAttribute { .. } => "runtime_read_only_attribute",
            RuntimeError::TerminalResource { .. } => "runtime_terminal_resource",
            RuntimeError::MissingMandatory { .. } => "runtime_missing_mandatory",
            RuntimeError::DuplicateName { .. } => "runtime_duplicate_name",
            RuntimeError::NoCandidate { .. } => "runtime_no_candidate",
            RuntimeError::DependencyCycle { .. } => "runtime_dependency_cycle",
            RuntimeError::Aborted { .. } => "runtime_aborted",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// # Outcomes of task execution.
///
/// The convergence loops treat the first three variants as signals, not
/// failures: `NotFound` advances the probe path, `AlreadyExists` completes
/// the create path, and `Transient` (the benign-race allow-list) resets the
/// state machine for another pass. Everything else is unrecoverable and is
/// handled per the configured [`ErrorPolicy`](crate::ErrorPolicy).
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// Probe determined the entity does not exist on the backing system.
    #[error("not found")]
    NotFound,

    /// Create determined the entity already exists on the backing system.
    #[error("already exists")]
    AlreadyExists,

    /// Allow-listed transient backend condition; the state machine resets
    /// and tries again instead of failing.
    #[error("transient backend condition: {reason}")]
    Transient {
        /// What the backend reported.
        reason: String,
    },

    /// Task execution failed but may succeed if retried.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable fatal error (never retried, even under a retry policy).
    #[error("fatal error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Task was cancelled because the engine is shutting down.
    #[error("engine cancelled")]
    Canceled,
}

impl TaskError {
    /// Builds a [`TaskError::Fail`] from any displayable error.
    pub fn fail(error: impl ToString) -> Self {
        TaskError::Fail {
            error: error.to_string(),
        }
    }

    /// Builds a [`TaskError::Transient`] from any displayable reason.
    pub fn transient(reason: impl ToString) -> Self {
        TaskError::Transient {
            reason: reason.to_string(),
        }
    }

    /// Builds a [`TaskError::Fatal`] from any displayable error.
    pub fn fatal(error: impl ToString) -> Self {
        TaskError::Fatal {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use labvisor::TaskError;
    ///
    /// assert_eq!(TaskError::NotFound.as_label(), "task_not_found");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::NotFound => "task_not_found",
            TaskError::AlreadyExists => "task_already_exists",
            TaskError::Transient { .. } => "task_transient",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Returns a human-readable message with details about the outcome.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::NotFound => "not found".to_string(),
            TaskError::AlreadyExists => "already exists".to_string(),
            TaskError::Transient { reason } => format!("transient: {reason}"),
            TaskError::Fail { error } => format!("error: {error}"),
            TaskError::Fatal { error } => format!("fatal: {error}"),
            TaskError::Canceled => "engine cancelled".to_string(),
        }
    }

    /// Indicates whether the outcome is safe to retry.
    ///
    /// Returns `true` for [`TaskError::Fail`] and [`TaskError::Transient`],
    /// `false` otherwise.
    ///
    /// # Example
    /// ```
    /// use labvisor::TaskError;
    ///
    /// assert!(TaskError::fail("boom").is_retryable());
    /// assert!(!TaskError::Canceled.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fail { .. } | TaskError::Transient { .. })
    }
}
