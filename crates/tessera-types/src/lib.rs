//! Foundation types for Tessera.
//!
//! This crate provides the identifier type shared by every other Tessera
//! crate: the content-addressed [`ObjectId`].
//!
//! # Key Types
//!
//! - [`ObjectId`]: 20-byte content hash, displayed as 40 hex digits
//! - [`TypeError`]: parse failures for identifiers

pub mod error;
pub mod object;

pub use error::TypeError;
pub use object::{ObjectId, OBJECT_ID_LEN};
