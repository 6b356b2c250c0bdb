//! Error types for the index crate.

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The specified path was not found in the index.
    #[error("path not found in index: {0}")]
    PathNotFound(String),

    /// An invalid path was provided.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Merge stages run from 0 to 3.
    #[error("invalid stage {stage} for path {path}")]
    InvalidStage { path: String, stage: u8 },

    /// The encoded index declares a version this crate cannot read.
    #[error("unsupported index version: {0}")]
    UnsupportedVersion(u32),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
