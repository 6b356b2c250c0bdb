//! Fully in-memory storage.
//!
//! [`MemoryStorage`] composes the in-memory object and reference stores
//! with lock-protected auxiliary records. It keeps only resolved objects,
//! so it offers neither the delta nor the packfile capability; packs reach
//! it through [`update_object_storage`](crate::update_object_storage).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tessera_index::Index;
use tessera_refs::{InMemoryRefStore, RefIter, RefResult, RefStore, Reference};
use tessera_store::{
    EncodedObject, GitHasher, InMemoryObjectStore, ObjectHasher, ObjectIter, ObjectKind,
    ObjectStore, StoreResult, Transactioner,
};
use tessera_types::ObjectId;

use crate::config::Config;
use crate::error::StorageResult;
use crate::traits::{
    validate_module_name, ConfigStore, IndexStore, ModuleStore, ShallowStore, Storer,
};

pub struct MemoryStorage {
    hasher: Arc<dyn ObjectHasher>,
    objects: InMemoryObjectStore,
    refs: InMemoryRefStore,
    shallow: RwLock<Vec<ObjectId>>,
    config: RwLock<Config>,
    index: RwLock<Index>,
    modules: RwLock<HashMap<String, Arc<MemoryStorage>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_hasher(Arc::new(GitHasher))
    }

    /// Objects, including those of submodule stores, are named with `hasher`.
    pub fn with_hasher(hasher: Arc<dyn ObjectHasher>) -> Self {
        Self {
            objects: InMemoryObjectStore::with_hasher(Arc::clone(&hasher)),
            hasher,
            refs: InMemoryRefStore::default(),
            shallow: RwLock::default(),
            config: RwLock::default(),
            index: RwLock::default(),
            modules: RwLock::default(),
        }
    }

    /// The underlying object store.
    pub fn objects(&self) -> &InMemoryObjectStore {
        &self.objects
    }
}

impl ObjectStore for MemoryStorage {
    fn put(&self, object: &EncodedObject) -> StoreResult<ObjectId> {
        self.objects.put(object)
    }

    fn get(&self, kind: ObjectKind, id: &ObjectId) -> StoreResult<EncodedObject> {
        self.objects.get(kind, id)
    }

    fn iter(&self, kind: ObjectKind) -> StoreResult<ObjectIter<'_>> {
        self.objects.iter(kind)
    }

    fn contains(&self, id: &ObjectId) -> StoreResult<bool> {
        self.objects.contains(id)
    }

    fn transactioner(&self) -> Option<&dyn Transactioner> {
        self.objects.transactioner()
    }
}

impl RefStore for MemoryStorage {
    fn set_ref(&self, reference: &Reference) -> RefResult<()> {
        self.refs.set_ref(reference)
    }

    fn check_and_set_ref(&self, new: &Reference, old: Option<&Reference>) -> RefResult<()> {
        self.refs.check_and_set_ref(new, old)
    }

    fn get_ref(&self, name: &str) -> RefResult<Reference> {
        self.refs.get_ref(name)
    }

    fn remove_ref(&self, name: &str) -> RefResult<()> {
        self.refs.remove_ref(name)
    }

    fn iter_refs(&self) -> RefResult<RefIter<'_>> {
        self.refs.iter_refs()
    }

    fn count_refs(&self) -> RefResult<usize> {
        self.refs.count_refs()
    }
}

impl ShallowStore for MemoryStorage {
    fn shallow(&self) -> StorageResult<Vec<ObjectId>> {
        Ok(self.shallow.read().expect("lock poisoned").clone())
    }

    fn set_shallow(&self, commits: &[ObjectId]) -> StorageResult<()> {
        *self.shallow.write().expect("lock poisoned") = commits.to_vec();
        Ok(())
    }
}

impl ConfigStore for MemoryStorage {
    fn config(&self) -> StorageResult<Config> {
        Ok(self.config.read().expect("lock poisoned").clone())
    }

    fn set_config(&self, config: &Config) -> StorageResult<()> {
        config.validate()?;
        *self.config.write().expect("lock poisoned") = config.clone();
        Ok(())
    }
}

impl IndexStore for MemoryStorage {
    fn index(&self) -> StorageResult<Index> {
        Ok(self.index.read().expect("lock poisoned").clone())
    }

    fn set_index(&self, index: &Index) -> StorageResult<()> {
        *self.index.write().expect("lock poisoned") = index.clone();
        Ok(())
    }
}

impl ModuleStore for MemoryStorage {
    fn module(&self, name: &str) -> StorageResult<Arc<dyn Storer>> {
        validate_module_name(name)?;
        let hasher = Arc::clone(&self.hasher);
        let mut modules = self.modules.write().expect("lock poisoned");
        let module = modules
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStorage::with_hasher(hasher)));
        Ok(Arc::clone(module) as Arc<dyn Storer>)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("objects", &self.objects.len())
            .field("refs", &self.refs.count_refs().unwrap_or(0))
            .field(
                "modules",
                &self.modules.read().expect("lock poisoned").len(),
            )
            .finish()
    }
}
