//! A write overlay that stages changes over a base store.
//!
//! Every write lands in the temporal store; reads try the temporal store
//! first and fall back to the base. [`TransactionalStorage::commit`] copies
//! the staged state into the base. Dropping the overlay without committing
//! leaves the base untouched.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tessera_index::Index;
use tessera_refs::{RefError, RefIter, RefResult, RefStore, Reference};
use tessera_store::{
    EncodedObject, ObjectIter, ObjectKind, ObjectStore, PackfileStore, PackfileWriter,
    StoreError, StoreResult,
};
use tessera_types::ObjectId;
use tracing::info;

use crate::config::Config;
use crate::error::StorageResult;
use crate::traits::{ConfigStore, IndexStore, ModuleStore, ShallowStore, Storer};

/// Overlay of a private `temporal` store on top of a shared `base`.
///
/// `temporal` must not be shared with anything else, or discarding the
/// transaction would leak its writes.
pub struct TransactionalStorage {
    base: Arc<dyn Storer>,
    temporal: Arc<dyn Storer>,
    /// References removed in this transaction; hidden from base reads.
    removed_refs: RwLock<HashSet<String>>,
    /// Serializes staged writes against each other and against commit.
    ref_lock: Mutex<()>,
    shallow_set: AtomicBool,
    config_set: AtomicBool,
    index_set: AtomicBool,
}

impl TransactionalStorage {
    pub fn new(base: Arc<dyn Storer>, temporal: Arc<dyn Storer>) -> Self {
        Self {
            base,
            temporal,
            removed_refs: RwLock::new(HashSet::new()),
            ref_lock: Mutex::new(()),
            shallow_set: AtomicBool::new(false),
            config_set: AtomicBool::new(false),
            index_set: AtomicBool::new(false),
        }
    }

    pub fn base(&self) -> &Arc<dyn Storer> {
        &self.base
    }

    pub fn temporal(&self) -> &Arc<dyn Storer> {
        &self.temporal
    }

    /// Copy everything staged into the base store.
    ///
    /// Objects go first, so a reference never lands in the base before the
    /// object it points at. If storing an object fails, the base gains some
    /// of the objects but none of the reference changes. Nothing is
    /// unstaged on failure, so the commit can be retried.
    ///
    /// On success the staged references, removals and auxiliary records are
    /// dropped from the overlay, which then reads through to the base again
    /// and can stage a further transaction.
    pub fn commit(&self) -> StorageResult<()> {
        let _guard = self.ref_lock.lock().expect("lock poisoned");

        let mut objects = 0;
        for object in self.temporal.iter(ObjectKind::Any)? {
            self.base.put(&object?)?;
            objects += 1;
        }

        let removed: Vec<String> = self
            .removed_refs
            .read()
            .expect("lock poisoned")
            .iter()
            .cloned()
            .collect();
        for name in &removed {
            self.base.remove_ref(name)?;
        }
        let staged = self.temporal.iter_refs()?.collect::<RefResult<Vec<_>>>()?;
        for reference in &staged {
            self.base.set_ref(reference)?;
        }

        if self.shallow_set.load(Ordering::Acquire) {
            self.base.set_shallow(&self.temporal.shallow()?)?;
        }
        if self.config_set.load(Ordering::Acquire) {
            self.base.set_config(&self.temporal.config()?)?;
        }
        if self.index_set.load(Ordering::Acquire) {
            self.base.set_index(&self.temporal.index()?)?;
        }

        for reference in &staged {
            self.temporal.remove_ref(reference.name())?;
        }
        self.removed_refs.write().expect("lock poisoned").clear();
        self.shallow_set.store(false, Ordering::Release);
        self.config_set.store(false, Ordering::Release);
        self.index_set.store(false, Ordering::Release);

        info!(
            objects,
            refs = staged.len(),
            removed = removed.len(),
            "transaction committed"
        );
        Ok(())
    }

    fn is_removed(&self, name: &str) -> bool {
        self.removed_refs
            .read()
            .expect("lock poisoned")
            .contains(name)
    }

    fn unmark_removed(&self, name: &str) {
        self.removed_refs
            .write()
            .expect("lock poisoned")
            .remove(name);
    }
}

impl ObjectStore for TransactionalStorage {
    fn put(&self, object: &EncodedObject) -> StoreResult<ObjectId> {
        self.temporal.put(object)
    }

    fn get(&self, kind: ObjectKind, id: &ObjectId) -> StoreResult<EncodedObject> {
        match self.temporal.get(kind, id) {
            Err(StoreError::ObjectNotFound(_)) => self.base.get(kind, id),
            other => other,
        }
    }

    fn iter(&self, kind: ObjectKind) -> StoreResult<ObjectIter<'_>> {
        let staged = self.temporal.iter(kind)?;
        let committed = self.base.iter(kind)?;
        let mut seen = HashSet::new();
        Ok(Box::new(staged.chain(committed).filter(move |item| {
            match item {
                Ok(object) => seen.insert(object.id()),
                Err(_) => true,
            }
        })))
    }

    fn packfile_store(&self) -> Option<&dyn PackfileStore> {
        self.temporal.packfile_store().map(|_| self as &dyn PackfileStore)
    }
}

impl PackfileStore for TransactionalStorage {
    fn packfile_writer(&self) -> StoreResult<Box<dyn PackfileWriter + '_>> {
        match self.temporal.packfile_store() {
            Some(store) => store.packfile_writer(),
            None => Err(StoreError::CorruptPackfile(
                "temporal store does not accept packfiles".to_string(),
            )),
        }
    }
}

impl RefStore for TransactionalStorage {
    fn set_ref(&self, reference: &Reference) -> RefResult<()> {
        let _guard = self.ref_lock.lock().expect("lock poisoned");
        self.temporal.set_ref(reference)?;
        self.unmark_removed(reference.name());
        Ok(())
    }

    fn check_and_set_ref(&self, new: &Reference, old: Option<&Reference>) -> RefResult<()> {
        let _guard = self.ref_lock.lock().expect("lock poisoned");
        if let Some(old) = old {
            let unchanged = match self.get_ref(new.name()) {
                Ok(current) => current.same_target(old),
                Err(RefError::NotFound { .. }) => false,
                Err(e) => return Err(e),
            };
            if !unchanged {
                return Err(RefError::HasChanged {
                    name: new.name().to_string(),
                });
            }
        }
        self.temporal.set_ref(new)?;
        self.unmark_removed(new.name());
        Ok(())
    }

    fn get_ref(&self, name: &str) -> RefResult<Reference> {
        match self.temporal.get_ref(name) {
            Err(RefError::NotFound { .. }) if !self.is_removed(name) => self.base.get_ref(name),
            other => other,
        }
    }

    fn remove_ref(&self, name: &str) -> RefResult<()> {
        let _guard = self.ref_lock.lock().expect("lock poisoned");
        self.temporal.remove_ref(name)?;
        self.removed_refs
            .write()
            .expect("lock poisoned")
            .insert(name.to_string());
        Ok(())
    }

    fn iter_refs(&self) -> RefResult<RefIter<'_>> {
        let mut refs = BTreeMap::new();
        for reference in self.base.iter_refs()? {
            let reference = reference?;
            if !self.is_removed(reference.name()) {
                refs.insert(reference.name().to_string(), reference);
            }
        }
        for reference in self.temporal.iter_refs()? {
            let reference = reference?;
            refs.insert(reference.name().to_string(), reference);
        }
        Ok(Box::new(refs.into_values().map(Ok)))
    }
}

impl ShallowStore for TransactionalStorage {
    fn shallow(&self) -> StorageResult<Vec<ObjectId>> {
        if self.shallow_set.load(Ordering::Acquire) {
            return self.temporal.shallow();
        }
        self.base.shallow()
    }

    fn set_shallow(&self, commits: &[ObjectId]) -> StorageResult<()> {
        let _guard = self.ref_lock.lock().expect("lock poisoned");
        self.temporal.set_shallow(commits)?;
        self.shallow_set.store(true, Ordering::Release);
        Ok(())
    }
}

impl ConfigStore for TransactionalStorage {
    fn config(&self) -> StorageResult<Config> {
        if self.config_set.load(Ordering::Acquire) {
            return self.temporal.config();
        }
        self.base.config()
    }

    fn set_config(&self, config: &Config) -> StorageResult<()> {
        let _guard = self.ref_lock.lock().expect("lock poisoned");
        self.temporal.set_config(config)?;
        self.config_set.store(true, Ordering::Release);
        Ok(())
    }
}

impl IndexStore for TransactionalStorage {
    fn index(&self) -> StorageResult<Index> {
        if self.index_set.load(Ordering::Acquire) {
            return self.temporal.index();
        }
        self.base.index()
    }

    fn set_index(&self, index: &Index) -> StorageResult<()> {
        let _guard = self.ref_lock.lock().expect("lock poisoned");
        self.temporal.set_index(index)?;
        self.index_set.store(true, Ordering::Release);
        Ok(())
    }
}

impl ModuleStore for TransactionalStorage {
    /// Submodules are not staged; they open directly on the base.
    fn module(&self, name: &str) -> StorageResult<Arc<dyn Storer>> {
        self.base.module(name)
    }
}

impl std::fmt::Debug for TransactionalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalStorage")
            .field(
                "removed_refs",
                &self.removed_refs.read().expect("lock poisoned").len(),
            )
            .field("shallow_set", &self.shallow_set.load(Ordering::Relaxed))
            .field("config_set", &self.config_set.load(Ordering::Relaxed))
            .field("index_set", &self.index_set.load(Ordering::Relaxed))
            .finish()
    }
}
