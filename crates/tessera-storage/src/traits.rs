//! Capability traits beyond objects and references, and the [`Storer`]
//! umbrella every backend implements.

use std::sync::Arc;

use tessera_index::Index;
use tessera_refs::RefStore;
use tessera_store::ObjectStore;
use tessera_types::ObjectId;

use crate::config::Config;
use crate::error::StorageResult;

/// Commits at the boundary of a shallow clone.
pub trait ShallowStore: Send + Sync {
    /// The whole shallow list; empty if never set.
    fn shallow(&self) -> StorageResult<Vec<ObjectId>>;

    /// Replace the whole list.
    fn set_shallow(&self, commits: &[ObjectId]) -> StorageResult<()>;
}

/// Repository configuration.
pub trait ConfigStore: Send + Sync {
    /// The stored config, or [`Config::default`] if none was ever set.
    fn config(&self) -> StorageResult<Config>;

    /// Validate and replace the config. An invalid config is rejected with
    /// [`StorageError::InvalidConfig`](crate::StorageError::InvalidConfig)
    /// and the previous one stays in place.
    fn set_config(&self, config: &Config) -> StorageResult<()>;
}

/// The staging index.
pub trait IndexStore: Send + Sync {
    /// The stored index, or an empty version 2 index if none was set.
    fn index(&self) -> StorageResult<Index>;

    fn set_index(&self, index: &Index) -> StorageResult<()>;
}

/// Nested stores for submodules.
pub trait ModuleStore: Send + Sync {
    /// Open the store for submodule `name`, creating it on first use.
    /// Repeated calls with the same name reach the same data.
    fn module(&self, name: &str) -> StorageResult<Arc<dyn Storer>>;
}

/// The full capability set of a repository store.
pub trait Storer:
    ObjectStore + RefStore + ShallowStore + ConfigStore + IndexStore + ModuleStore
{
}

impl<T> Storer for T where
    T: ObjectStore + RefStore + ShallowStore + ConfigStore + IndexStore + ModuleStore + ?Sized
{
}

/// Module names become path components, so they must be plain relative
/// paths.
pub(crate) fn validate_module_name(name: &str) -> StorageResult<()> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(crate::StorageError::InvalidModuleName(name.to_string()));
    }
    Ok(())
}
