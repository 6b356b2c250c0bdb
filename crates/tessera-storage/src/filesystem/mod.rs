//! Storage laid out like a bare git directory on a [`Filesystem`].
//!
//! ```text
//! <root>/objects/xx/<38 hex>          loose objects
//! <root>/objects/pack/pack-<sum>.*    packs and their indexes
//! <root>/HEAD, <root>/refs/...        loose references
//! <root>/packed-refs                  packed references
//! <root>/shallow                      shallow commits, one hex ID per line
//! <root>/config                       repository config (TOML)
//! <root>/index                        staging index (bincode)
//! <root>/modules/<name>/              submodule stores
//! ```
//!
//! Nothing is written until the first mutation, so opening a storage on an
//! empty directory leaves it empty.

pub mod fs;
pub mod object;
pub mod reference;

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tessera_index::Index;
use tessera_refs::{RefIter, RefResult, RefStore, Reference};
use tessera_store::{
    DeltaObjectStore, EncodedObject, GitHasher, ObjectHasher, ObjectIter, ObjectKind, ObjectStore,
    PackfileStore, StoreResult,
};
use tessera_types::ObjectId;

use crate::config::{Config, ConfigError};
use crate::error::{StorageError, StorageResult};
use crate::traits::{
    validate_module_name, ConfigStore, IndexStore, ModuleStore, ShallowStore, Storer,
};

pub use fs::{DirEntry, Filesystem, MemFilesystem, OsFilesystem};
pub use object::FsObjectStore;
pub use reference::FsRefStore;

const SHALLOW_FILE: &str = "shallow";
const CONFIG_FILE: &str = "config";
const INDEX_FILE: &str = "index";
const MODULES_DIR: &str = "modules";

/// Construction options for [`FilesystemStorage`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Options {
    /// The caller guarantees no other process touches the directory, so
    /// directory listings may be cached in-process. Breaking that promise
    /// leaves the caches stale; it is not detected.
    pub exclusive_access: bool,
}

/// A complete [`Storer`] over a [`Filesystem`].
pub struct FilesystemStorage {
    fs: Arc<dyn Filesystem>,
    options: Options,
    hasher: Arc<dyn ObjectHasher>,
    objects: FsObjectStore,
    refs: FsRefStore,
    modules: RwLock<HashMap<String, Arc<FilesystemStorage>>>,
}

impl FilesystemStorage {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self::with_options(fs, Options::default())
    }

    pub fn with_options(fs: Arc<dyn Filesystem>, options: Options) -> Self {
        Self::with_hasher(fs, options, Arc::new(GitHasher))
    }

    /// Objects, including those of submodule stores, are named with `hasher`.
    pub fn with_hasher(
        fs: Arc<dyn Filesystem>,
        options: Options,
        hasher: Arc<dyn ObjectHasher>,
    ) -> Self {
        Self {
            objects: FsObjectStore::with_hasher(Arc::clone(&fs), options, Arc::clone(&hasher)),
            refs: FsRefStore::new(Arc::clone(&fs)),
            fs,
            options,
            hasher,
            modules: RwLock::new(HashMap::new()),
        }
    }

    /// Storage rooted at a directory on the local disk.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::new(Arc::new(OsFilesystem::new(path.as_ref())))
    }

    pub fn filesystem(&self) -> &Arc<dyn Filesystem> {
        &self.fs
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn objects(&self) -> &FsObjectStore {
        &self.objects
    }

    /// Fold loose references into `packed-refs`.
    pub fn pack_refs(&self) -> StorageResult<usize> {
        Ok(self.refs.pack_refs()?)
    }

    /// Read a whole file, mapping a missing file to `None`.
    fn read_optional(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        match self.fs.read_file(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl ObjectStore for FilesystemStorage {
    fn put(&self, object: &EncodedObject) -> StoreResult<ObjectId> {
        self.objects.put(object)
    }

    fn get(&self, kind: ObjectKind, id: &ObjectId) -> StoreResult<EncodedObject> {
        self.objects.get(kind, id)
    }

    fn iter(&self, kind: ObjectKind) -> StoreResult<ObjectIter<'_>> {
        self.objects.iter(kind)
    }

    fn delta_store(&self) -> Option<&dyn DeltaObjectStore> {
        self.objects.delta_store()
    }

    fn packfile_store(&self) -> Option<&dyn PackfileStore> {
        self.objects.packfile_store()
    }
}

impl RefStore for FilesystemStorage {
    fn set_ref(&self, reference: &Reference) -> RefResult<()> {
        self.refs.set_ref(reference)
    }

    fn check_and_set_ref(&self, new: &Reference, old: Option<&Reference>) -> RefResult<()> {
        self.refs.check_and_set_ref(new, old)
    }

    fn get_ref(&self, name: &str) -> RefResult<Reference> {
        self.refs.get_ref(name)
    }

    fn remove_ref(&self, name: &str) -> RefResult<()> {
        self.refs.remove_ref(name)
    }

    fn iter_refs(&self) -> RefResult<RefIter<'_>> {
        self.refs.iter_refs()
    }
}

impl ShallowStore for FilesystemStorage {
    fn shallow(&self) -> StorageResult<Vec<ObjectId>> {
        let Some(bytes) = self.read_optional(SHALLOW_FILE)? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8(bytes).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("{SHALLOW_FILE}: {e}"))
        })?;
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                ObjectId::from_hex(line).map_err(|e| {
                    StorageError::from(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("{SHALLOW_FILE}: {e}"),
                    ))
                })
            })
            .collect()
    }

    fn set_shallow(&self, commits: &[ObjectId]) -> StorageResult<()> {
        let mut text = String::with_capacity(commits.len() * 41);
        for id in commits {
            text.push_str(&id.to_hex());
            text.push('\n');
        }
        self.fs.write_file(SHALLOW_FILE, text.as_bytes())?;
        Ok(())
    }
}

impl ConfigStore for FilesystemStorage {
    fn config(&self) -> StorageResult<Config> {
        let Some(bytes) = self.read_optional(CONFIG_FILE)? else {
            return Ok(Config::default());
        };
        let text = String::from_utf8(bytes)
            .map_err(|e| ConfigError::Parse(format!("{CONFIG_FILE}: {e}")))?;
        Ok(Config::from_toml(&text)?)
    }

    fn set_config(&self, config: &Config) -> StorageResult<()> {
        config.validate()?;
        let text = config.to_toml()?;
        self.fs.write_file(CONFIG_FILE, text.as_bytes())?;
        Ok(())
    }
}

impl IndexStore for FilesystemStorage {
    fn index(&self) -> StorageResult<Index> {
        match self.read_optional(INDEX_FILE)? {
            Some(bytes) => Ok(Index::from_bytes(&bytes)?),
            None => Ok(Index::default()),
        }
    }

    fn set_index(&self, index: &Index) -> StorageResult<()> {
        self.fs.write_file(INDEX_FILE, &index.to_bytes()?)?;
        Ok(())
    }
}

impl ModuleStore for FilesystemStorage {
    fn module(&self, name: &str) -> StorageResult<Arc<dyn Storer>> {
        validate_module_name(name)?;
        let open = || {
            let fs = self.fs.chroot(&format!("{MODULES_DIR}/{name}"));
            Arc::new(FilesystemStorage::with_hasher(
                fs,
                self.options,
                Arc::clone(&self.hasher),
            ))
        };
        if !self.options.exclusive_access {
            return Ok(open() as Arc<dyn Storer>);
        }
        let mut modules = self.modules.write().expect("lock poisoned");
        let module = modules.entry(name.to_string()).or_insert_with(open);
        Ok(Arc::clone(module) as Arc<dyn Storer>)
    }
}

impl std::fmt::Debug for FilesystemStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemStorage")
            .field("fs", &self.fs)
            .field("options", &self.options)
            .finish()
    }
}
