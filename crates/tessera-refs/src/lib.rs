//! Reference management for Tessera.
//!
//! References are the human-readable entry points into the object graph:
//! branches under `refs/heads/`, tags under `refs/tags/`, remote tracking
//! refs, and `HEAD`. Each one targets either an object ID or, symbolically,
//! another reference.
//!
//! # Modules
//!
//! - [`error`]: Error types for ref operations
//! - [`types`]: [`Reference`] and [`ReferenceTarget`]
//! - [`traits`]: The [`RefStore`] trait, including compare-and-swap
//! - [`names`]: Reference name validation
//! - [`memory`]: In-memory [`InMemoryRefStore`]

pub mod error;
pub mod memory;
pub mod names;
pub mod traits;
pub mod types;

pub use error::{RefError, RefResult};
pub use memory::InMemoryRefStore;
pub use names::{is_root_ref, validate_reference_name, REFS_PREFIX};
pub use traits::{RefIter, RefStore, MAX_RESOLVE_DEPTH};
pub use types::{Reference, ReferenceTarget, HEAD, SYMREF_PREFIX};
