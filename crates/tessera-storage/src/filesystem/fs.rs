//! Byte store the filesystem backend runs on.
//!
//! Paths are `/`-separated and relative to the filesystem's root. Writes
//! are atomic: a reader sees either the old file or the complete new one.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tempfile::NamedTempFile;

/// One entry returned by [`Filesystem::read_dir`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Minimal file API used by the filesystem backend.
pub trait Filesystem: Send + Sync + fmt::Debug {
    fn read_file(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Replace `path` atomically, creating parent directories as needed.
    fn write_file(&self, path: &str, data: &[u8]) -> io::Result<()>;

    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    fn remove_file(&self, path: &str) -> io::Result<()>;

    /// Entries directly under `path`, sorted by name. A missing directory
    /// is an [`io::ErrorKind::NotFound`] error.
    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>>;

    fn create_dir_all(&self, path: &str) -> io::Result<()>;

    fn exists(&self, path: &str) -> bool;

    /// A filesystem rooted at `path` inside this one.
    fn chroot(&self, path: &str) -> Arc<dyn Filesystem>;
}

// ---------------------------------------------------------------------------
// OS directory
// ---------------------------------------------------------------------------

/// A directory on the local disk.
#[derive(Clone, Debug)]
pub struct OsFilesystem {
    root: PathBuf,
}

impl OsFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut full = self.root.clone();
        full.extend(path.split('/').filter(|part| !part.is_empty()));
        full
    }
}

impl Filesystem for OsFilesystem {
    fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(path))
    }

    fn write_file(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let target = self.resolve(path);
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
        fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let to = self.resolve(to);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(self.resolve(from), to)
    }

    fn remove_file(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path))? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            entries.push(DirEntry {
                name,
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort();
        Ok(entries)
    }

    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn chroot(&self, path: &str) -> Arc<dyn Filesystem> {
        Arc::new(Self::new(self.resolve(path)))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Files held in a shared map. Directories exist implicitly while they
/// contain a file, plus any created explicitly.
///
/// Clones and chroots share the same data.
#[derive(Clone, Default)]
pub struct MemFilesystem {
    nodes: Arc<RwLock<MemNodes>>,
    prefix: String,
}

#[derive(Default)]
struct MemNodes {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeMap<String, ()>,
}

impl MemFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn full(&self, path: &str) -> String {
        let mut full = self.prefix.clone();
        for part in path.split('/').filter(|part| !part.is_empty()) {
            if !full.is_empty() {
                full.push('/');
            }
            full.push_str(part);
        }
        full
    }

    /// Number of files stored, across all chroots.
    pub fn file_count(&self) -> usize {
        self.nodes.read().expect("lock poisoned").files.len()
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{path}: no such file"))
}

impl Filesystem for MemFilesystem {
    fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        let nodes = self.nodes.read().expect("lock poisoned");
        nodes
            .files
            .get(&self.full(path))
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn write_file(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let mut nodes = self.nodes.write().expect("lock poisoned");
        nodes.files.insert(self.full(path), data.to_vec());
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut nodes = self.nodes.write().expect("lock poisoned");
        let data = nodes
            .files
            .remove(&self.full(from))
            .ok_or_else(|| not_found(from))?;
        nodes.files.insert(self.full(to), data);
        Ok(())
    }

    fn remove_file(&self, path: &str) -> io::Result<()> {
        let mut nodes = self.nodes.write().expect("lock poisoned");
        nodes
            .files
            .remove(&self.full(path))
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let dir = self.full(path);
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let nodes = self.nodes.read().expect("lock poisoned");
        let mut children: BTreeMap<String, bool> = BTreeMap::new();
        let keys = nodes
            .files
            .keys()
            .map(|k| (k, false))
            .chain(nodes.dirs.keys().map(|k| (k, true)));
        for (key, explicit_dir) in keys {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                Some((child, _)) => {
                    children.insert(child.to_string(), true);
                }
                None => {
                    let is_dir = children.get(rest).copied().unwrap_or(false) || explicit_dir;
                    children.insert(rest.to_string(), is_dir);
                }
            }
        }
        let known_dir = dir.is_empty() || nodes.dirs.contains_key(&dir);
        if children.is_empty() && !known_dir {
            return Err(not_found(path));
        }
        Ok(children
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect())
    }

    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        let full = self.full(path);
        if !full.is_empty() {
            self.nodes
                .write()
                .expect("lock poisoned")
                .dirs
                .insert(full, ());
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        let full = self.full(path);
        let nodes = self.nodes.read().expect("lock poisoned");
        if full.is_empty() || nodes.files.contains_key(&full) || nodes.dirs.contains_key(&full) {
            return true;
        }
        let prefix = format!("{full}/");
        nodes
            .files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    fn chroot(&self, path: &str) -> Arc<dyn Filesystem> {
        Arc::new(Self {
            nodes: Arc::clone(&self.nodes),
            prefix: self.full(path),
        })
    }
}

impl fmt::Debug for MemFilesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemFilesystem")
            .field("prefix", &self.prefix)
            .field("files", &self.file_count())
            .finish()
    }
}
