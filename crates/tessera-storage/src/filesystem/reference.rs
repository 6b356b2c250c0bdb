//! References on a [`Filesystem`]: one loose file per reference, plus an
//! optional `packed-refs` file.
//!
//! A loose file holds either a 40-hex object ID or `ref: <name>`, followed
//! by a newline. `packed-refs` holds `<hex> <name>` lines; a loose file of
//! the same name takes precedence.
//!
//! Only names under `refs/` and root references like `HEAD` map to files,
//! so a reference can never land on `config`, `index` or any other
//! repository file sharing the root.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};

use tessera_refs::{
    is_root_ref, validate_reference_name, RefError, RefIter, RefResult, RefStore, Reference,
};
use tracing::debug;

use super::fs::{DirEntry, Filesystem};

const PACKED_REFS: &str = "packed-refs";
const PACKED_REFS_HEADER: &str = "# pack-refs with: sorted";

/// Reference store over a [`Filesystem`] root.
///
/// Writers on one instance serialize through a mutex, which makes
/// compare-and-swap atomic in-process.
pub struct FsRefStore {
    fs: Arc<dyn Filesystem>,
    write_lock: Mutex<()>,
}

impl FsRefStore {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self {
            fs,
            write_lock: Mutex::new(()),
        }
    }

    /// Move every loose hash reference under `refs/` into `packed-refs`.
    /// Root references such as `HEAD` stay loose.
    /// Returns the number of references packed.
    pub fn pack_refs(&self) -> RefResult<usize> {
        let _guard = self.write_lock.lock().expect("lock poisoned");
        let mut packed = self.packed_refs()?;
        let mut moved = Vec::new();
        for name in self.loose_names()? {
            if is_root_ref(&name) {
                continue;
            }
            if let Some(reference) = self.read_loose(&name)? {
                if reference.hash_target().is_some() {
                    packed.insert(name.clone(), reference);
                    moved.push(name);
                }
            }
        }
        self.write_packed(&packed)?;
        for name in &moved {
            remove_if_present(self.fs.as_ref(), name)?;
        }
        debug!(count = moved.len(), "references packed");
        Ok(moved.len())
    }

    fn read_loose(&self, name: &str) -> RefResult<Option<Reference>> {
        let bytes = match self.fs.read_file(name) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8(bytes)
            .map_err(|_| RefError::Corrupt(format!("{name}: not UTF-8")))?;
        Reference::from_strings(name, &text).map(Some)
    }

    fn write_loose(&self, reference: &Reference) -> RefResult<()> {
        let line = format!("{}\n", reference.target());
        self.fs.write_file(reference.name(), line.as_bytes())?;
        Ok(())
    }

    fn read(&self, name: &str) -> RefResult<Option<Reference>> {
        if let Some(reference) = self.read_loose(name)? {
            return Ok(Some(reference));
        }
        Ok(self.packed_refs()?.remove(name))
    }

    fn packed_refs(&self) -> RefResult<BTreeMap<String, Reference>> {
        let bytes = match self.fs.read_file(PACKED_REFS) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8(bytes)
            .map_err(|_| RefError::Corrupt(format!("{PACKED_REFS}: not UTF-8")))?;

        let mut refs = BTreeMap::new();
        for line in text.lines() {
            // Peeled tag lines (`^<hex>`) describe the previous entry.
            if line.is_empty() || line.starts_with('#') || line.starts_with('^') {
                continue;
            }
            let (hash, name) = line
                .split_once(' ')
                .ok_or_else(|| RefError::Corrupt(format!("{PACKED_REFS}: bad line {line:?}")))?;
            refs.insert(name.to_string(), Reference::from_strings(name, hash)?);
        }
        Ok(refs)
    }

    fn write_packed(&self, refs: &BTreeMap<String, Reference>) -> RefResult<()> {
        if refs.is_empty() {
            remove_if_present(self.fs.as_ref(), PACKED_REFS)?;
            return Ok(());
        }
        let mut text = format!("{PACKED_REFS_HEADER}\n");
        for reference in refs.values() {
            if let Some(id) = reference.hash_target() {
                text.push_str(&format!("{id} {}\n", reference.name()));
            }
        }
        self.fs.write_file(PACKED_REFS, text.as_bytes())?;
        Ok(())
    }

    /// Names of every loose reference: root references such as `HEAD`,
    /// plus everything under `refs/`.
    fn loose_names(&self) -> RefResult<Vec<String>> {
        let mut names: Vec<String> = read_dir_or_empty(self.fs.as_ref(), "")?
            .into_iter()
            .filter(|entry| !entry.is_dir && is_root_ref(&entry.name))
            .map(|entry| entry.name)
            .collect();
        let mut dirs = vec!["refs".to_string()];
        while let Some(dir) = dirs.pop() {
            for entry in read_dir_or_empty(self.fs.as_ref(), &dir)? {
                // Temp files from in-flight writes start with a dot.
                if entry.name.starts_with('.') {
                    continue;
                }
                let path = format!("{dir}/{}", entry.name);
                if entry.is_dir {
                    dirs.push(path);
                } else {
                    names.push(path);
                }
            }
        }
        Ok(names)
    }
}

fn read_dir_or_empty(fs: &dyn Filesystem, path: &str) -> io::Result<Vec<DirEntry>> {
    match fs.read_dir(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        other => other,
    }
}

fn remove_if_present(fs: &dyn Filesystem, path: &str) -> io::Result<()> {
    match fs.remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl RefStore for FsRefStore {
    fn set_ref(&self, reference: &Reference) -> RefResult<()> {
        validate_reference_name(reference.name())?;
        let _guard = self.write_lock.lock().expect("lock poisoned");
        self.write_loose(reference)
    }

    fn check_and_set_ref(&self, new: &Reference, old: Option<&Reference>) -> RefResult<()> {
        validate_reference_name(new.name())?;
        let _guard = self.write_lock.lock().expect("lock poisoned");
        if let Some(old) = old {
            let unchanged = self
                .read(new.name())?
                .is_some_and(|current| current.same_target(old));
            if !unchanged {
                debug!(name = new.name(), "reference changed since it was read");
                return Err(RefError::HasChanged {
                    name: new.name().to_string(),
                });
            }
        }
        self.write_loose(new)
    }

    fn get_ref(&self, name: &str) -> RefResult<Reference> {
        let not_found = || RefError::NotFound {
            name: name.to_string(),
        };
        // Nothing is ever stored under an invalid name; its path may belong
        // to another store.
        if validate_reference_name(name).is_err() {
            return Err(not_found());
        }
        self.read(name)?.ok_or_else(not_found)
    }

    fn remove_ref(&self, name: &str) -> RefResult<()> {
        if validate_reference_name(name).is_err() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().expect("lock poisoned");
        remove_if_present(self.fs.as_ref(), name)?;
        let mut packed = self.packed_refs()?;
        if packed.remove(name).is_some() {
            self.write_packed(&packed)?;
        }
        Ok(())
    }

    fn iter_refs(&self) -> RefResult<RefIter<'_>> {
        let mut refs = self.packed_refs()?;
        for name in self.loose_names()? {
            if let Some(reference) = self.read_loose(&name)? {
                refs.insert(name, reference);
            }
        }
        Ok(Box::new(refs.into_values().map(Ok)))
    }
}

impl std::fmt::Debug for FsRefStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsRefStore").field("fs", &self.fs).finish()
    }
}
