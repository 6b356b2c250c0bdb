use tessera_types::ObjectId;

use crate::object::ObjectKind;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found, or exists under a different kind.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// The object kind cannot be stored directly (delta kinds, the
    /// `any` wildcard).
    #[error("invalid object kind: {0}")]
    InvalidObjectKind(ObjectKind),

    /// The object data is malformed or cannot be decoded.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectId, reason: String },

    /// A packfile handed to the store could not be ingested.
    #[error("corrupt packfile: {0}")]
    CorruptPackfile(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` for [`StoreError::ObjectNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
