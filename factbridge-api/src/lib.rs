//! factbridge-api: Fact value model for the factbridge Ruby host
//!
//! This crate defines the host-side data shared between the fact collection
//! and the embedded runtime bridge. It has no dependency on the runtime
//! itself.

pub mod collection;
pub mod path;
pub mod value;

pub use collection::FactCollection;
pub use path::{canonical_key, split_query};
pub use value::{FactValue, ForeignFact, ForeignValue, Navigation};
