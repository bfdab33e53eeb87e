//! Failure and retry policies.
//!
//! This module groups the knobs that control **what happens** when a resource
//! fails to converge and **how long** to wait between attempts.
//!
//! ## Contents
//! - [`ErrorPolicy`] what to do with a failing resource (abort / quarantine / retry)
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`] randomization to avoid synchronized retries
//!
//! ## Quick wiring
//! ```text
//! Config { on_error: ErrorPolicy, transient_backoff: BackoffPolicy }
//!      └─► engine::actor::ResourceActor uses:
//!           - on_error to decide abort/quarantine/retry on failure
//!           - backoff.next(attempt) to pace retries and transient resets
//! ```
//!
//! ## Defaults
//! - `ErrorPolicy::Abort` (a half-converged testbed is worse than a clean stop).
//! - `BackoffPolicy::default()` → first=100ms, factor=1.0 (constant), max=30s, jitter=None.
//! - `JitterPolicy::None` by default; consider `Equal` for balanced randomness.

mod backoff;
mod error;
mod jitter;

pub use backoff::BackoffPolicy;
pub use error::ErrorPolicy;
pub use jitter::JitterPolicy;
