//! Repository storage for Tessera.
//!
//! A [`Storer`] bundles everything a repository persists: objects,
//! references, the shallow list, config, the staging index and submodule
//! stores. Three implementations are provided:
//!
//! - [`MemoryStorage`] -- everything in process memory
//! - [`FilesystemStorage`] -- a bare-git-style layout on any [`Filesystem`]
//! - [`TransactionalStorage`] -- stages writes in one store over another
//!   and copies them across on [`commit`](TransactionalStorage::commit)
//!
//! Optional object capabilities (delta reads, raw packfile writes, object
//! transactions) are discovered through the accessors on [`ObjectStore`].
//! [`update_object_storage`] loads a packfile into any store, using the
//! packfile capability when the store has it.

pub mod config;
pub mod error;
pub mod filesystem;
pub mod memory;
pub mod traits;
pub mod transactional;
mod update;

#[cfg(test)]
mod test_suite;

pub use config::{BranchConfig, Config, ConfigError, CoreConfig, RemoteConfig};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use filesystem::{
    Filesystem, FilesystemStorage, MemFilesystem, Options as FilesystemOptions, OsFilesystem,
};
pub use memory::MemoryStorage;
pub use traits::{ConfigStore, IndexStore, ModuleStore, ShallowStore, Storer};
pub use transactional::TransactionalStorage;
pub use update::update_object_storage;

// Re-export the capability traits callers need alongside a Storer.
pub use tessera_index::Index;
pub use tessera_refs::{RefStore, Reference};
pub use tessera_store::{EncodedObject, ObjectKind, ObjectStore};
pub use tessera_types::ObjectId;
