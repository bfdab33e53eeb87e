//! # Capability requirements.
//!
//! A [`Requirement`] narrows what may satisfy one of a resource's own
//! reference attributes: the candidate type must advertise every listed
//! capability. Requirements come from two places — the type schema
//! (structural, shared by all instances) and per-instance additions made
//! before convergence starts. Both feed capability resolution when an
//! `auto` attribute needs a provider.

use std::collections::BTreeSet;

/// Demands that whatever fills `attribute` is built from a type carrying
/// all of `capabilities`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    /// Name of the requiring resource's own attribute.
    pub attribute: String,
    /// Capabilities the provider type must advertise.
    pub capabilities: BTreeSet<String>,
}

impl Requirement {
    pub fn new(
        attribute: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }
}
