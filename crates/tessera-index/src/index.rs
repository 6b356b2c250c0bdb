//! The [`Index`] record and its binary encoding.
//!
//! The index is a `BTreeMap<String, IndexEntry>` plus a version number. It
//! holds no handle to any store; filesystem I/O and object writes belong to
//! the storage layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tessera_types::ObjectId;

use crate::entry::{EntryMode, IndexEntry};
use crate::error::{IndexError, IndexResult};

/// Version given to a freshly created index.
pub const DEFAULT_INDEX_VERSION: u32 = 2;

/// Versions this crate can read back.
const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 2..=4;

/// The staging index: which blob each tracked path should have.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub version: u32,
    /// All tracked entries, keyed by path.
    pub entries: BTreeMap<String, IndexEntry>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            version: DEFAULT_INDEX_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

impl Index {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get an entry by path.
    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    // ---------------------------------------------------------------
    // Stage operations
    // ---------------------------------------------------------------

    /// Add or replace an entry.
    pub fn stage(&mut self, entry: IndexEntry) -> IndexResult<()> {
        validate_path(&entry.path)?;
        if entry.stage > 3 {
            return Err(IndexError::InvalidStage {
                path: entry.path,
                stage: entry.stage,
            });
        }
        self.entries.insert(entry.path.clone(), entry);
        Ok(())
    }

    /// Stage an already-stored blob at `path`.
    pub fn stage_object(
        &mut self,
        path: &str,
        object_id: ObjectId,
        mode: EntryMode,
        size: u64,
    ) -> IndexResult<()> {
        self.stage(IndexEntry::new(path, object_id, mode, size))
    }

    /// Remove an entry, returning it.
    pub fn remove(&mut self, path: &str) -> IndexResult<IndexEntry> {
        self.entries
            .remove(path)
            .ok_or_else(|| IndexError::PathNotFound(path.to_string()))
    }

    /// Returns `true` if any entry sits at a non-zero merge stage.
    pub fn has_conflicts(&self) -> bool {
        self.entries.values().any(IndexEntry::is_conflicted)
    }

    // ---------------------------------------------------------------
    // Encoding
    // ---------------------------------------------------------------

    /// Encode with bincode.
    pub fn to_bytes(&self) -> IndexResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| IndexError::Serialization(e.to_string()))
    }

    /// Decode with bincode, rejecting unknown versions.
    pub fn from_bytes(data: &[u8]) -> IndexResult<Self> {
        let index: Self =
            bincode::deserialize(data).map_err(|e| IndexError::Serialization(e.to_string()))?;
        if !SUPPORTED_VERSIONS.contains(&index.version) {
            return Err(IndexError::UnsupportedVersion(index.version));
        }
        Ok(index)
    }
}

fn validate_path(path: &str) -> IndexResult<()> {
    if path.is_empty() {
        return Err(IndexError::InvalidPath("empty path".to_string()));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(IndexError::InvalidPath(format!(
            "{path}: must be relative and name a file"
        )));
    }
    if path.split('/').any(|c| c.is_empty() || c == "." || c == "..") {
        return Err(IndexError::InvalidPath(format!(
            "{path}: empty, '.' or '..' component"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn blob_id(byte: u8) -> ObjectId {
        ObjectId::from_hash([byte; 20])
    }

    #[test]
    fn new_index_is_empty_version_two() {
        let idx = Index::new();
        assert!(idx.is_empty());
        assert_eq!(idx.version, 2);
        assert_eq!(idx, Index::default());
    }

    #[test]
    fn stage_object_adds_entry() {
        let mut idx = Index::new();
        idx.stage_object("src/main.rs", blob_id(1), EntryMode::Regular, 42)
            .unwrap();
        assert_eq!(idx.len(), 1);
        let entry = idx.get("src/main.rs").unwrap();
        assert_eq!(entry.object_id, blob_id(1));
        assert_eq!(entry.size, 42);
    }

    #[test]
    fn restage_replaces_entry() {
        let mut idx = Index::new();
        idx.stage_object("a.txt", blob_id(1), EntryMode::Regular, 1).unwrap();
        idx.stage_object("a.txt", blob_id(2), EntryMode::Executable, 2).unwrap();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.get("a.txt").unwrap().mode, EntryMode::Executable);
    }

    #[test]
    fn stage_rejects_bad_paths() {
        let mut idx = Index::new();
        for bad in ["", "/abs", "dir/", "a//b", "a/../b", "./a"] {
            let err = idx
                .stage_object(bad, blob_id(1), EntryMode::Regular, 0)
                .unwrap_err();
            assert!(matches!(err, IndexError::InvalidPath(_)), "{bad}");
        }
        assert!(idx.is_empty());
    }

    #[test]
    fn stage_rejects_out_of_range_stage() {
        let mut idx = Index::new();
        let mut entry = IndexEntry::new("x", blob_id(1), EntryMode::Regular, 0);
        entry.stage = 4;
        assert!(matches!(
            idx.stage(entry),
            Err(IndexError::InvalidStage { stage: 4, .. })
        ));
    }

    #[test]
    fn remove_entry_and_missing() {
        let mut idx = Index::new();
        idx.stage_object("gone.txt", blob_id(3), EntryMode::Regular, 0).unwrap();
        let removed = idx.remove("gone.txt").unwrap();
        assert_eq!(removed.object_id, blob_id(3));
        assert!(matches!(idx.remove("gone.txt"), Err(IndexError::PathNotFound(_))));
    }

    #[test]
    fn conflicts_are_detected() {
        let mut idx = Index::new();
        idx.stage_object("clean", blob_id(1), EntryMode::Regular, 0).unwrap();
        assert!(!idx.has_conflicts());
        let mut theirs = IndexEntry::new("merged", blob_id(2), EntryMode::Regular, 0);
        theirs.stage = 3;
        idx.stage(theirs).unwrap();
        assert!(idx.has_conflicts());
    }

    #[test]
    fn iteration_is_path_ordered() {
        let mut idx = Index::new();
        for path in ["z", "a/b", "m"] {
            idx.stage_object(path, blob_id(0), EntryMode::Regular, 0).unwrap();
        }
        let paths: Vec<_> = idx.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a/b", "m", "z"]);
    }

    #[test]
    fn bytes_roundtrip() {
        let mut idx = Index::new();
        let mut entry = IndexEntry::new("bin/tool", blob_id(9), EntryMode::Executable, 1234);
        entry.mtime = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        entry.flags.skip_worktree = true;
        idx.stage(entry).unwrap();

        let decoded = Index::from_bytes(&idx.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, idx);
    }

    #[test]
    fn from_bytes_rejects_unknown_version() {
        let idx = Index {
            version: 99,
            entries: BTreeMap::new(),
        };
        let bytes = idx.to_bytes().unwrap();
        assert!(matches!(
            Index::from_bytes(&bytes),
            Err(IndexError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        assert!(matches!(
            Index::from_bytes(&[0xff; 3]),
            Err(IndexError::Serialization(_))
        ));
    }
}
