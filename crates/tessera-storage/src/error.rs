use tessera_index::IndexError;
use tessera_pack::PackError;
use tessera_refs::RefError;
use tessera_store::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by a full storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("pack error: {0}")]
    Pack(#[from] PackError),

    #[error("ref error: {0}")]
    Ref(#[from] RefError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("invalid module name: {0:?}")]
    InvalidModuleName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error category, for callers that branch on what went wrong
/// rather than where.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ObjectNotFound,
    ReferenceNotFound,
    ReferenceHasChanged,
    InvalidObjectKind,
    InvalidReference,
    InvalidConfig,
    CorruptPackfile,
    CorruptData,
    Io,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => store_kind(e),
            Self::Pack(PackError::Io(_)) => ErrorKind::Io,
            Self::Pack(PackError::Store(e)) => store_kind(e),
            Self::Pack(_) => ErrorKind::CorruptPackfile,
            Self::Ref(e) => match e {
                RefError::NotFound { .. } => ErrorKind::ReferenceNotFound,
                RefError::HasChanged { .. } => ErrorKind::ReferenceHasChanged,
                RefError::InvalidName { .. }
                | RefError::InvalidTarget { .. }
                | RefError::SymbolicLoop { .. } => ErrorKind::InvalidReference,
                RefError::Corrupt(_) => ErrorKind::CorruptData,
                RefError::Io(_) => ErrorKind::Io,
            },
            Self::Index(_) => ErrorKind::CorruptData,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::InvalidModuleName(_) => ErrorKind::InvalidReference,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ObjectNotFound | ErrorKind::ReferenceNotFound
        )
    }
}

fn store_kind(e: &StoreError) -> ErrorKind {
    match e {
        StoreError::ObjectNotFound(_) => ErrorKind::ObjectNotFound,
        StoreError::InvalidObjectKind(_) => ErrorKind::InvalidObjectKind,
        StoreError::CorruptPackfile(_) => ErrorKind::CorruptPackfile,
        StoreError::CorruptObject { .. } | StoreError::Serialization(_) => ErrorKind::CorruptData,
        StoreError::Io(_) => ErrorKind::Io,
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
