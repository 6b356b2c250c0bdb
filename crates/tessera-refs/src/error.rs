//! Error types for reference operations.

use thiserror::Error;

/// Errors that can occur during reference operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// The reference was not found.
    #[error("reference not found: {name}")]
    NotFound { name: String },

    /// A compare-and-swap found a different value than expected.
    #[error("reference has changed: {name}")]
    HasChanged { name: String },

    /// The reference name is invalid.
    #[error("invalid reference name: {name}: {reason}")]
    InvalidName { name: String, reason: String },

    /// The target string is neither `ref: <name>` nor a hex object ID.
    #[error("invalid target for {name}: {target:?}")]
    InvalidTarget { name: String, target: String },

    /// Symbolic references nest deeper than the resolver allows.
    #[error("symbolic reference chain too deep starting at {name}")]
    SymbolicLoop { name: String },

    /// Stored reference data could not be parsed.
    #[error("corrupt reference data: {0}")]
    Corrupt(String),

    /// I/O error during file-based ref operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RefError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_string(),
        }
    }
}

/// Convenience type alias for ref operations.
pub type RefResult<T> = std::result::Result<T, RefError>;
