//! Staging index for Tessera.
//!
//! The index records which blob each tracked path should have in the next
//! commit. It is a plain record: storage backends persist it wholesale.
//!
//! # Key Types
//!
//! - [`Index`] -- Versioned, path-sorted set of entries
//! - [`IndexEntry`] -- A tracked path with its blob ID, mode and stat data
//! - [`EntryMode`] -- Git file modes
//! - [`IndexFlags`] -- Per-entry worktree flags

pub mod entry;
pub mod error;
pub mod index;

pub use entry::{EntryMode, IndexEntry, IndexFlags};
pub use error::{IndexError, IndexResult};
pub use index::{Index, DEFAULT_INDEX_VERSION};
