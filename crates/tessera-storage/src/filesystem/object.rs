//! Object storage on a [`Filesystem`]: loose objects plus pack files.
//!
//! Loose objects live at `objects/xx/<38 hex>` as zlib of
//! `"<kind> <len>\0" ++ data`. Packs live at
//! `objects/pack/pack-<checksum>.{pack,idx}`; the `.idx` is written second
//! and its presence is what makes a pack visible to readers.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::{self, Read, Write};
use std::sync::{Arc, RwLock};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tessera_pack::{ingest_packfile, IngestSink, IngestedEntry, PackFileReader, PackIndex, PackResult};
use tessera_store::{
    ensure_storable, DeltaObjectStore, EncodedObject, GitHasher, ObjectHasher, ObjectIter,
    ObjectKind, ObjectStore, PackedObject, PackfileStore, PackfileWriter, StoreError, StoreResult,
};
use tessera_types::ObjectId;
use tracing::{debug, info, warn};

use super::fs::Filesystem;
use super::Options;

const OBJECTS_DIR: &str = "objects";
const PACK_DIR: &str = "objects/pack";

#[derive(Default)]
struct ObjectCache {
    /// Parsed packs by file stem. Pack files are immutable once written, so
    /// entries never go stale; only the listing does.
    packs: BTreeMap<String, Arc<PackFileReader>>,
    /// Exclusive access only: `packs` is the complete list.
    packs_listed: bool,
    /// Exclusive access only: every loose object ID.
    loose: Option<HashSet<ObjectId>>,
}

/// Loose and packed objects under a [`Filesystem`] root.
pub struct FsObjectStore {
    fs: Arc<dyn Filesystem>,
    options: Options,
    hasher: Arc<dyn ObjectHasher>,
    cache: RwLock<ObjectCache>,
}

impl FsObjectStore {
    pub fn new(fs: Arc<dyn Filesystem>, options: Options) -> Self {
        Self::with_hasher(fs, options, Arc::new(GitHasher))
    }

    /// Objects are named, and verified on read, with `hasher`.
    pub fn with_hasher(
        fs: Arc<dyn Filesystem>,
        options: Options,
        hasher: Arc<dyn ObjectHasher>,
    ) -> Self {
        Self {
            fs,
            options,
            hasher,
            cache: RwLock::new(ObjectCache::default()),
        }
    }

    /// Number of pack files currently visible.
    pub fn pack_count(&self) -> StoreResult<usize> {
        Ok(self.packs()?.len())
    }

    // -----------------------------------------------------------------------
    // Loose objects
    // -----------------------------------------------------------------------

    fn loose_path(id: &ObjectId) -> String {
        let hex = id.to_hex();
        format!("{OBJECTS_DIR}/{}/{}", &hex[..2], &hex[2..])
    }

    fn with_loose_cache<R>(&self, f: impl FnOnce(&mut HashSet<ObjectId>) -> R) -> StoreResult<R> {
        let mut cache = self.cache.write().expect("lock poisoned");
        if cache.loose.is_none() {
            cache.loose = Some(self.scan_loose()?.into_iter().collect());
        }
        Ok(f(cache.loose.get_or_insert_with(HashSet::new)))
    }

    fn has_loose(&self, id: &ObjectId) -> StoreResult<bool> {
        if self.options.exclusive_access {
            return self.with_loose_cache(|loose| loose.contains(id));
        }
        Ok(self.fs.exists(&Self::loose_path(id)))
    }

    fn scan_loose(&self) -> StoreResult<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for dir in read_dir_or_empty(self.fs.as_ref(), OBJECTS_DIR)? {
            if !dir.is_dir || dir.name.len() != 2 {
                continue;
            }
            let path = format!("{OBJECTS_DIR}/{}", dir.name);
            for file in read_dir_or_empty(self.fs.as_ref(), &path)? {
                if file.is_dir {
                    continue;
                }
                if let Ok(id) = ObjectId::from_hex(&format!("{}{}", dir.name, file.name)) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    fn loose_ids(&self) -> StoreResult<Vec<ObjectId>> {
        if self.options.exclusive_access {
            return self.with_loose_cache(|loose| loose.iter().copied().collect());
        }
        self.scan_loose()
    }

    fn read_loose(&self, id: &ObjectId) -> StoreResult<Option<EncodedObject>> {
        if self.options.exclusive_access && !self.has_loose(id)? {
            return Ok(None);
        }
        let compressed = match self.fs.read_file(&Self::loose_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_loose(id, &compressed, self.hasher.as_ref()).map(Some)
    }

    fn write_loose(&self, id: &ObjectId, object: &EncodedObject) -> StoreResult<()> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        write!(encoder, "{} {}\0", object.kind(), object.size())?;
        encoder.write_all(object.data())?;
        let compressed = encoder.finish()?;
        self.fs.write_file(&Self::loose_path(id), &compressed)?;
        if self.options.exclusive_access {
            self.with_loose_cache(|loose| loose.insert(*id))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Packs
    // -----------------------------------------------------------------------

    fn packs(&self) -> StoreResult<Vec<Arc<PackFileReader>>> {
        let mut cache = self.cache.write().expect("lock poisoned");
        if self.options.exclusive_access && cache.packs_listed {
            return Ok(cache.packs.values().cloned().collect());
        }

        let mut visible = Vec::new();
        for entry in read_dir_or_empty(self.fs.as_ref(), PACK_DIR)? {
            let Some(stem) = entry
                .name
                .strip_suffix(".idx")
                .filter(|stem| stem.starts_with("pack-"))
            else {
                continue;
            };
            if let Some(reader) = cache.packs.get(stem) {
                visible.push(Arc::clone(reader));
                continue;
            }
            match self.load_pack(stem) {
                Ok(reader) => {
                    let reader = Arc::new(reader);
                    cache.packs.insert(stem.to_string(), Arc::clone(&reader));
                    visible.push(reader);
                }
                Err(e) => warn!(pack = stem, error = %e, "skipping unreadable pack"),
            }
        }
        cache.packs_listed = self.options.exclusive_access;
        Ok(visible)
    }

    fn load_pack(&self, stem: &str) -> PackResult<PackFileReader> {
        let index = PackIndex::from_bytes(&self.fs.read_file(&format!("{PACK_DIR}/{stem}.idx"))?)?;
        let pack = self.fs.read_file(&format!("{PACK_DIR}/{stem}.pack"))?;
        PackFileReader::from_bytes(pack, index)
    }

    /// Persist a verified pack and its index and make it visible.
    fn register_pack(&self, pack: Vec<u8>, index: PackIndex) -> StoreResult<()> {
        let stem = format!("pack-{}", hex::encode(index.pack_checksum));
        let index_bytes = index.to_bytes();
        self.fs.write_file(&format!("{PACK_DIR}/{stem}.pack"), &pack)?;
        self.fs.write_file(&format!("{PACK_DIR}/{stem}.idx"), &index_bytes)?;

        let objects = index.object_count();
        let reader = PackFileReader::from_bytes(pack, index)?;
        self.cache
            .write()
            .expect("lock poisoned")
            .packs
            .insert(stem.clone(), Arc::new(reader));
        info!(pack = %stem, objects, "pack registered");
        Ok(())
    }

    /// Look up bases of reference deltas that point outside their pack.
    fn external_base(&self, id: &ObjectId) -> PackResult<Option<EncodedObject>> {
        match self.get(ObjectKind::Any, id) {
            Ok(object) => Ok(Some(object)),
            Err(StoreError::ObjectNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_dir_or_empty(fs: &dyn Filesystem, path: &str) -> io::Result<Vec<super::fs::DirEntry>> {
    match fs.read_dir(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        other => other,
    }
}

fn decode_loose(
    id: &ObjectId,
    compressed: &[u8],
    hasher: &dyn ObjectHasher,
) -> StoreResult<EncodedObject> {
    let corrupt = |reason: String| StoreError::CorruptObject { id: *id, reason };

    let mut raw = Vec::new();
    ZlibDecoder::new(compressed)
        .read_to_end(&mut raw)
        .map_err(|e| corrupt(format!("inflate failed: {e}")))?;
    let nul = raw
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| corrupt("missing header terminator".into()))?;
    let header =
        std::str::from_utf8(&raw[..nul]).map_err(|_| corrupt("header is not UTF-8".into()))?;
    let (kind, len) = header
        .split_once(' ')
        .ok_or_else(|| corrupt(format!("malformed header {header:?}")))?;
    let kind: ObjectKind = kind.parse().map_err(|e| corrupt(format!("{e}")))?;
    if !kind.is_storable() {
        return Err(corrupt(format!("{kind} cannot be stored loose")));
    }
    let len: usize = len
        .parse()
        .map_err(|_| corrupt(format!("bad length in header {header:?}")))?;

    let data = raw.split_off(nul + 1);
    if data.len() != len {
        return Err(corrupt(format!(
            "header says {len} bytes, found {}",
            data.len()
        )));
    }
    let object = EncodedObject::new(kind, data);
    let actual = object.id_with(hasher);
    if actual != *id {
        return Err(corrupt(format!("content hashes to {actual}")));
    }
    Ok(object)
}

impl ObjectStore for FsObjectStore {
    fn put(&self, object: &EncodedObject) -> StoreResult<ObjectId> {
        ensure_storable(object)?;
        let id = object.id_with(self.hasher.as_ref());
        if self.has_loose(&id)? || self.packs()?.iter().any(|pack| pack.contains(&id)) {
            return Ok(id);
        }
        self.write_loose(&id, object)?;
        debug!(id = %id, kind = %object.kind(), "loose object written");
        Ok(id)
    }

    fn get(&self, kind: ObjectKind, id: &ObjectId) -> StoreResult<EncodedObject> {
        let object = match self.read_loose(id)? {
            Some(object) => Some(object),
            None => {
                let bases = |base: &ObjectId| self.external_base(base);
                let mut found = None;
                for pack in self.packs()? {
                    if let Some(object) = pack.read_object(id, &bases)? {
                        found = Some(object);
                        break;
                    }
                }
                found
            }
        };
        match object {
            Some(object) if kind.matches(object.kind()) => Ok(object),
            _ => Err(StoreError::ObjectNotFound(*id)),
        }
    }

    fn iter(&self, kind: ObjectKind) -> StoreResult<ObjectIter<'_>> {
        let mut ids: BTreeSet<ObjectId> = self.loose_ids()?.into_iter().collect();
        for pack in self.packs()? {
            ids.extend(pack.object_ids().iter().copied());
        }
        Ok(Box::new(ids.into_iter().filter_map(move |id| {
            match self.get(ObjectKind::Any, &id) {
                Ok(object) if kind.matches(object.kind()) => Some(Ok(object)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }
        })))
    }

    fn delta_store(&self) -> Option<&dyn DeltaObjectStore> {
        Some(self)
    }

    fn packfile_store(&self) -> Option<&dyn PackfileStore> {
        Some(self)
    }
}

impl DeltaObjectStore for FsObjectStore {
    fn get_delta(&self, kind: ObjectKind, id: &ObjectId) -> StoreResult<PackedObject> {
        if let Some(object) = self.read_loose(id)? {
            if kind.matches(object.kind()) {
                return Ok(PackedObject::Resolved(object));
            }
            return Err(StoreError::ObjectNotFound(*id));
        }
        let bases = |base: &ObjectId| self.external_base(base);
        for pack in self.packs()? {
            let Some(packed) = pack.read_packed(id, &bases)? else {
                continue;
            };
            let resolved_kind = match &packed {
                PackedObject::Resolved(object) => object.kind(),
                PackedObject::Delta(delta) => delta.resolved_kind(),
            };
            if kind.matches(resolved_kind) {
                return Ok(packed);
            }
            break;
        }
        Err(StoreError::ObjectNotFound(*id))
    }
}

impl PackfileStore for FsObjectStore {
    fn packfile_writer(&self) -> StoreResult<Box<dyn PackfileWriter + '_>> {
        Ok(Box::new(FsPackfileWriter {
            store: self,
            buffer: Vec::new(),
        }))
    }
}

impl std::fmt::Debug for FsObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.read().expect("lock poisoned");
        f.debug_struct("FsObjectStore")
            .field("fs", &self.fs)
            .field("options", &self.options)
            .field("cached_packs", &cache.packs.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pack ingestion
// ---------------------------------------------------------------------------

/// Buffers a whole pack, then verifies, indexes and stores it on close.
struct FsPackfileWriter<'a> {
    store: &'a FsObjectStore,
    buffer: Vec<u8>,
}

impl Write for FsPackfileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PackfileWriter for FsPackfileWriter<'_> {
    fn close(self: Box<Self>) -> StoreResult<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let mut sink = IndexingSink {
            store: self.store,
            resolved: HashMap::new(),
        };
        let report = ingest_packfile(&self.buffer, &mut sink)?;
        self.store.register_pack(self.buffer, report.build_index())?;
        Ok(report.objects)
    }
}

/// Keeps resolved objects in memory only for delta resolution; the pack
/// itself is what gets persisted.
struct IndexingSink<'a> {
    store: &'a FsObjectStore,
    resolved: HashMap<ObjectId, EncodedObject>,
}

impl IngestSink for IndexingSink<'_> {
    fn store(&mut self, object: &EncodedObject, _entry: &IngestedEntry) -> PackResult<ObjectId> {
        let id = object.id_with(self.store.hasher.as_ref());
        self.resolved.insert(id, object.clone());
        Ok(id)
    }

    fn load(&mut self, id: &ObjectId) -> PackResult<Option<EncodedObject>> {
        if let Some(object) = self.resolved.get(id) {
            return Ok(Some(object.clone()));
        }
        self.store.external_base(id)
    }
}
