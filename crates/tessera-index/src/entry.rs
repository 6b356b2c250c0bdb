//! Index entry types for tracked paths.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tessera_types::ObjectId;

/// Git file modes an index entry can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryMode {
    /// Normal file (0o100644).
    Regular,
    /// Executable file (0o100755).
    Executable,
    /// Symbolic link (0o120000).
    Symlink,
    /// Submodule commit (0o160000).
    Gitlink,
}

impl EntryMode {
    /// Octal mode value.
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Gitlink => 0o160000,
        }
    }

    /// Parse from an octal mode value.
    pub fn from_mode_bits(bits: u32) -> Option<Self> {
        match bits {
            0o100644 => Some(Self::Regular),
            0o100755 => Some(Self::Executable),
            0o120000 => Some(Self::Symlink),
            0o160000 => Some(Self::Gitlink),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06o}", self.mode_bits())
    }
}

/// An entry in the staging index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Slash-separated path from the worktree root.
    pub path: String,
    /// Blob (or, for gitlinks, commit) the path should have.
    pub object_id: ObjectId,
    pub mode: EntryMode,
    /// File size in bytes when staged.
    pub size: u64,
    /// Last modification time, for quick dirty checks.
    pub mtime: SystemTime,
    /// Merge stage: 0 for a normal entry, 1-3 for base/ours/theirs.
    pub stage: u8,
    pub flags: IndexFlags,
}

impl IndexEntry {
    /// Create a stage-0 entry stamped with the current time.
    pub fn new(path: impl Into<String>, object_id: ObjectId, mode: EntryMode, size: u64) -> Self {
        Self {
            path: path.into(),
            object_id,
            mode,
            size,
            mtime: SystemTime::now(),
            stage: 0,
            flags: IndexFlags::default(),
        }
    }

    /// True for entries left behind by an unresolved merge.
    pub fn is_conflicted(&self) -> bool {
        self.stage != 0
    }
}

/// Worktree flags for an index entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFlags {
    /// Skip stat checks; treat the worktree file as unchanged.
    pub assume_valid: bool,
    /// Sparse checkout: the path is absent from the worktree on purpose.
    pub skip_worktree: bool,
    /// Recorded with `add -N`; no content staged yet.
    pub intent_to_add: bool,
}
