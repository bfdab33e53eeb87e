//! # Declarative data model.
//!
//! Everything the engine knows statically about resources lives here:
//! dynamic [`Value`]s and [`ResourceId`]s, per-attribute declarations
//! ([`AttributeSchema`]), capability [`Requirement`]s, and whole-type
//! [`ResourceSchema`]s. The model is inert — behavior is supplied by
//! [`Resource`](crate::Resource) drivers and the engine itself.

mod attribute;
mod requirement;
mod schema;
mod value;

pub use attribute::{AttrKind, AttributeSchema, DefaultValue, Multiplicity};
pub use requirement::Requirement;
pub use schema::ResourceSchema;
pub use value::{Attrs, ResourceId, Value};
