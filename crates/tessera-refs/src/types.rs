//! Core reference types.
//!
//! A reference is a name plus a target. The target is either an object ID
//! (a hash reference) or the name of another reference (a symbolic one,
//! like `HEAD` pointing at `refs/heads/main`).

use std::fmt;

use serde::{Deserialize, Serialize};
use tessera_types::ObjectId;

use crate::error::{RefError, RefResult};

/// Name of the repository's current-branch pointer.
pub const HEAD: &str = "HEAD";

/// Prefix marking a symbolic target in on-disk form.
pub const SYMREF_PREFIX: &str = "ref: ";

/// What a reference points at.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceTarget {
    Hash(ObjectId),
    Symbolic(String),
}

impl fmt::Display for ReferenceTarget {
    /// Renders the loose-file form: 40 hex digits, or `ref: <name>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash(id) => write!(f, "{id}"),
            Self::Symbolic(name) => write!(f, "{SYMREF_PREFIX}{name}"),
        }
    }
}

/// A named reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    name: String,
    target: ReferenceTarget,
}

impl Reference {
    /// A reference pointing directly at an object.
    pub fn hash(name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            target: ReferenceTarget::Hash(id),
        }
    }

    /// A reference pointing at another reference.
    pub fn symbolic(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: ReferenceTarget::Symbolic(target.into()),
        }
    }

    /// Parse a target in on-disk form.
    ///
    /// ```
    /// use tessera_refs::Reference;
    ///
    /// let head = Reference::from_strings("HEAD", "ref: refs/heads/main").unwrap();
    /// assert_eq!(head.symbolic_target(), Some("refs/heads/main"));
    /// ```
    pub fn from_strings(name: impl Into<String>, target: &str) -> RefResult<Self> {
        let name = name.into();
        let target = target.trim_end();
        if let Some(symbolic) = target.strip_prefix(SYMREF_PREFIX) {
            let symbolic = symbolic.trim();
            if !symbolic.is_empty() {
                return Ok(Self::symbolic(name, symbolic));
            }
        } else if let Ok(id) = ObjectId::from_hex(target) {
            return Ok(Self::hash(name, id));
        }
        Err(RefError::InvalidTarget {
            name,
            target: target.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &ReferenceTarget {
        &self.target
    }

    /// The object ID for hash references.
    pub fn hash_target(&self) -> Option<ObjectId> {
        match &self.target {
            ReferenceTarget::Hash(id) => Some(*id),
            ReferenceTarget::Symbolic(_) => None,
        }
    }

    /// The referenced name for symbolic references.
    pub fn symbolic_target(&self) -> Option<&str> {
        match &self.target {
            ReferenceTarget::Symbolic(name) => Some(name),
            ReferenceTarget::Hash(_) => None,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self.target, ReferenceTarget::Symbolic(_))
    }

    /// Whether both point at the same target, regardless of name.
    pub fn same_target(&self, other: &Reference) -> bool {
        self.target == other.target
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.target, self.name)
    }
}
