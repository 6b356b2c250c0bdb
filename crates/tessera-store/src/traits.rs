use std::io::Write;

use tessera_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::object::{EncodedObject, ObjectKind, PackedObject};

/// Lazy, finite sequence of objects produced by [`ObjectStore::iter`].
pub type ObjectIter<'a> = Box<dyn Iterator<Item = StoreResult<EncodedObject>> + Send + 'a>;

/// Content-addressed object store.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written. Content-addressing guarantees this:
///   the same kind and data always produce the same ID.
/// - `put` is idempotent and never duplicates storage.
/// - Only the four content kinds are accepted; delta kinds enter a store
///   exclusively through packfile ingestion.
/// - A concrete kind passed to `get` must match the stored kind exactly.
/// - All I/O errors are propagated, never silently ignored.
///
/// Optional capabilities are exposed through the accessor methods at the end
/// of the trait; backends that lack one return `None`.
pub trait ObjectStore: Send + Sync {
    /// A zero-valued object for incremental construction.
    fn new_object(&self) -> EncodedObject {
        EncodedObject::default()
    }

    /// Write an object and return its content-addressed ID.
    ///
    /// Fails with [`StoreError::InvalidObjectKind`] for delta kinds and the
    /// `Any` wildcard.
    fn put(&self, object: &EncodedObject) -> StoreResult<ObjectId>;

    /// Read an object by ID.
    ///
    /// `ObjectKind::Any` matches every stored kind; any other kind must match
    /// exactly or the call fails with [`StoreError::ObjectNotFound`].
    fn get(&self, kind: ObjectKind, id: &ObjectId) -> StoreResult<EncodedObject>;

    /// Iterate over stored objects of `kind` (or all of them for `Any`).
    ///
    /// Every call starts a fresh iterator. Order is unspecified, but repeated
    /// iteration without intervening writes yields the same set.
    fn iter(&self, kind: ObjectKind) -> StoreResult<ObjectIter<'_>>;

    /// Check whether an object exists under any kind.
    fn contains(&self, id: &ObjectId) -> StoreResult<bool> {
        match self.get(ObjectKind::Any, id) {
            Ok(_) => Ok(true),
            Err(StoreError::ObjectNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Size in bytes of a stored object.
    fn object_size(&self, id: &ObjectId) -> StoreResult<u64> {
        self.get(ObjectKind::Any, id).map(|obj| obj.size())
    }

    /// Access to unresolved delta entries, if the backend keeps them.
    fn delta_store(&self) -> Option<&dyn DeltaObjectStore> {
        None
    }

    /// Access to raw packfile ingestion, if supported.
    fn packfile_store(&self) -> Option<&dyn PackfileStore> {
        None
    }

    /// Access to object-level transactions, if supported.
    fn transactioner(&self) -> Option<&dyn Transactioner> {
        None
    }
}

/// Reads objects without resolving their delta chain.
pub trait DeltaObjectStore: Send + Sync {
    /// Return the entry in its stored form: a [`PackedObject::Delta`] if the
    /// backing storage still holds it as a delta, otherwise the resolved
    /// object. `kind` is matched against the resolved kind.
    fn get_delta(&self, kind: ObjectKind, id: &ObjectId) -> StoreResult<PackedObject>;
}

/// Opens sinks that accept raw packfile bytes.
pub trait PackfileStore: Send + Sync {
    fn packfile_writer(&self) -> StoreResult<Box<dyn PackfileWriter + '_>>;
}

/// Scoped sink for raw packfile bytes.
///
/// Bytes are only guaranteed to be visible to readers after [`close`]
/// returns; closing parses and ingests the whole pack synchronously.
///
/// [`close`]: PackfileWriter::close
pub trait PackfileWriter: Write + Send {
    /// Finish the pack, returning the number of objects ingested.
    fn close(self: Box<Self>) -> StoreResult<usize>;
}

/// Starts object-level transactions.
pub trait Transactioner: Send + Sync {
    fn begin(&self) -> Box<dyn ObjectTransaction + '_>;
}

/// A batch of object writes that become visible together on `commit`.
pub trait ObjectTransaction: Send {
    fn put(&mut self, object: &EncodedObject) -> StoreResult<ObjectId>;

    /// Reads staged objects first, then the underlying store.
    fn get(&self, kind: ObjectKind, id: &ObjectId) -> StoreResult<EncodedObject>;

    fn commit(self: Box<Self>) -> StoreResult<()>;

    fn rollback(self: Box<Self>) -> StoreResult<()>;
}
