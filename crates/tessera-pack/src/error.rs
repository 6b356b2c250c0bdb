use tessera_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("invalid pack magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    #[error("pack checksum mismatch")]
    ChecksumMismatch,

    #[error("corrupt pack entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("CRC32 mismatch for entry at offset {offset}")]
    CrcMismatch { offset: u64 },

    #[error("decompression failed at offset {offset}: {reason}")]
    DecompressionFailed { offset: u64, reason: String },

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    #[error("delta base not found: {0}")]
    DeltaBaseNotFound(String),

    #[error("{0} delta(s) reference bases that never appeared")]
    UnresolvedDeltas(usize),

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PackError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptEntry {
            offset,
            reason: reason.into(),
        }
    }
}

/// Format problems surface from a store as `CorruptPackfile`; I/O and store
/// errors keep their own category.
impl From<PackError> for StoreError {
    fn from(err: PackError) -> Self {
        match err {
            PackError::Io(e) => StoreError::Io(e),
            PackError::Store(e) => e,
            other => StoreError::CorruptPackfile(other.to_string()),
        }
    }
}

pub type PackResult<T> = Result<T, PackError>;
