use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tessera_types::ObjectId;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::object::{EncodedObject, GitHasher, ObjectHasher, ObjectKind};
use crate::traits::{ObjectIter, ObjectStore, ObjectTransaction, Transactioner};

/// In-memory, HashMap-based object store.
///
/// Intended for tests, scratch space and embedding. All objects are held in
/// memory behind a `RwLock` for safe concurrent access. Objects are cloned on
/// read/write. Objects are always stored fully resolved, so the store has no
/// delta capability; it does support object-level transactions.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectId, EncodedObject>>,
    hasher: Arc<dyn ObjectHasher>,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store using [`GitHasher`].
    pub fn new() -> Self {
        Self::with_hasher(Arc::new(GitHasher))
    }

    /// Create a new empty store with an injected hash function.
    pub fn with_hasher(hasher: Arc<dyn ObjectHasher>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            hasher,
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .map(|obj| obj.size())
            .sum()
    }

    /// Return a sorted list of all object IDs in the store.
    pub fn all_ids(&self) -> Vec<ObjectId> {
        let map = self.objects.read().expect("lock poisoned");
        let mut ids: Vec<ObjectId> = map.keys().copied().collect();
        ids.sort();
        ids
    }

    fn insert(&self, id: ObjectId, object: &EncodedObject) {
        let mut map = self.objects.write().expect("lock poisoned");
        // Idempotent: the same ID always maps to the same content.
        map.entry(id).or_insert_with(|| object.clone());
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject kinds that may not be written directly to a store.
pub fn ensure_storable(object: &EncodedObject) -> StoreResult<()> {
    if object.kind().is_storable() {
        Ok(())
    } else {
        Err(StoreError::InvalidObjectKind(object.kind()))
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put(&self, object: &EncodedObject) -> StoreResult<ObjectId> {
        ensure_storable(object)?;
        let id = object.id_with(self.hasher.as_ref());
        self.insert(id, object);
        Ok(id)
    }

    fn get(&self, kind: ObjectKind, id: &ObjectId) -> StoreResult<EncodedObject> {
        let map = self.objects.read().expect("lock poisoned");
        match map.get(id) {
            Some(obj) if kind.matches(obj.kind()) => Ok(obj.clone()),
            _ => Err(StoreError::ObjectNotFound(*id)),
        }
    }

    fn iter(&self, kind: ObjectKind) -> StoreResult<ObjectIter<'_>> {
        let map = self.objects.read().expect("lock poisoned");
        let mut matching: Vec<(ObjectId, EncodedObject)> = map
            .iter()
            .filter(|(_, obj)| kind.matches(obj.kind()))
            .map(|(id, obj)| (*id, obj.clone()))
            .collect();
        matching.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Box::new(matching.into_iter().map(|(_, obj)| Ok(obj))))
    }

    fn contains(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.objects.read().expect("lock poisoned").contains_key(id))
    }

    fn transactioner(&self) -> Option<&dyn Transactioner> {
        Some(self)
    }
}

impl Transactioner for InMemoryObjectStore {
    fn begin(&self) -> Box<dyn ObjectTransaction + '_> {
        Box::new(MemoryTransaction {
            store: self,
            staged: HashMap::new(),
        })
    }
}

/// Object writes staged against an [`InMemoryObjectStore`].
struct MemoryTransaction<'a> {
    store: &'a InMemoryObjectStore,
    staged: HashMap<ObjectId, EncodedObject>,
}

impl ObjectTransaction for MemoryTransaction<'_> {
    fn put(&mut self, object: &EncodedObject) -> StoreResult<ObjectId> {
        ensure_storable(object)?;
        let id = object.id_with(self.store.hasher.as_ref());
        self.staged.entry(id).or_insert_with(|| object.clone());
        Ok(id)
    }

    fn get(&self, kind: ObjectKind, id: &ObjectId) -> StoreResult<EncodedObject> {
        match self.staged.get(id) {
            Some(obj) if kind.matches(obj.kind()) => Ok(obj.clone()),
            Some(_) => Err(StoreError::ObjectNotFound(*id)),
            None => self.store.get(kind, id),
        }
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        debug!(objects = self.staged.len(), "committing object transaction");
        let mut map = self.store.objects.write().expect("lock poisoned");
        for (id, obj) in self.staged {
            map.entry(id).or_insert(obj);
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len();
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &count)
            .finish()
    }
}
