//! Content-addressed object storage for Tessera.
//!
//! This crate defines the object model and the object store contract shared
//! by every backend. Objects -- commits, trees, blobs and tags -- are stored
//! immutably and identified by the digest of their kind and content.
//!
//! # Object Model
//!
//! - [`ObjectKind`] -- the four storable kinds, the two delta kinds and the
//!   `Any` query wildcard
//! - [`EncodedObject`] -- kind + content; its ID is always derived
//! - [`DeltaObject`] / [`PackedObject`] -- entries still held as deltas
//! - [`ObjectHasher`] -- the injected hash function ([`GitHasher`] by default)
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and scratch use
//!
//! Optional capabilities ([`DeltaObjectStore`], [`PackfileStore`],
//! [`Transactioner`]) are discovered through accessor methods on
//! [`ObjectStore`] that return `None` when a backend lacks them.
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written (content-addressing guarantees this).
//! 2. Deltas only enter a store through packfile ingestion, never `put`.
//! 3. Concurrent reads are always safe; concurrent identical puts are harmless.
//! 4. The store never interprets object contents -- it is a pure key-value store.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod object;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use memory::{ensure_storable, InMemoryObjectStore};
pub use object::{
    DeltaBase, DeltaObject, EncodedObject, GitHasher, ObjectHasher, ObjectKind, PackedObject,
    ParseKindError,
};
pub use traits::{
    DeltaObjectStore, ObjectIter, ObjectStore, ObjectTransaction, PackfileStore, PackfileWriter,
    Transactioner,
};
