//! Streaming packfile ingestion.
//!
//! Entries are consumed in file order. A delta whose base has not been seen
//! yet is parked until the base shows up, so reference deltas may point
//! forward in the pack. Once a base resolves, everything waiting on it (and
//! on its descendants) is resolved iteratively.

use std::collections::HashMap;

use tessera_store::{DeltaBase, EncodedObject, ObjectKind, ObjectStore, StoreError};
use tessera_types::{ObjectId, OBJECT_ID_LEN};
use tracing::{debug, info};

use crate::delta::apply_delta;
use crate::entry::{PackRecord, RecordKind};
use crate::error::{PackError, PackResult};
use crate::index::PackIndex;
use crate::scanner::Scanner;

/// Where a resolved object came from in the pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestedEntry {
    pub offset: u64,
    pub crc32: u32,
    /// Kind as stored in the pack (a delta kind for deltified entries).
    pub stored_as: ObjectKind,
    pub base: Option<DeltaBase>,
}

/// Destination for resolved objects.
pub trait IngestSink {
    /// Persist a resolved object and return its ID.
    fn store(&mut self, object: &EncodedObject, entry: &IngestedEntry) -> PackResult<ObjectId>;

    /// Fetch an object previously stored, or one that already existed
    /// outside the pack.
    fn load(&mut self, id: &ObjectId) -> PackResult<Option<EncodedObject>>;
}

/// Sink that writes every resolved object into an [`ObjectStore`].
pub struct StoreSink<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ObjectStore + ?Sized> StoreSink<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }
}

impl<S: ObjectStore + ?Sized> IngestSink for StoreSink<'_, S> {
    fn store(&mut self, object: &EncodedObject, _entry: &IngestedEntry) -> PackResult<ObjectId> {
        Ok(self.store.put(object)?)
    }

    fn load(&mut self, id: &ObjectId) -> PackResult<Option<EncodedObject>> {
        match self.store.get(ObjectKind::Any, id) {
            Ok(object) => Ok(Some(object)),
            Err(StoreError::ObjectNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Summary of an ingested pack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestReport {
    /// Objects resolved and stored.
    pub objects: usize,
    /// How many of those were stored as deltas.
    pub deltas: usize,
    /// (id, crc32, offset) for every entry, ready for [`PackIndex::build`].
    pub entries: Vec<(ObjectId, u32, u64)>,
    /// Trailing checksum of the pack.
    pub checksum: [u8; OBJECT_ID_LEN],
}

impl IngestReport {
    pub fn build_index(&self) -> PackIndex {
        PackIndex::build(self.entries.clone(), self.checksum)
    }
}

struct PendingDelta {
    offset: u64,
    crc32: u32,
    stored_as: ObjectKind,
    base: DeltaBase,
    delta: Vec<u8>,
}

/// Resolves a stream of pack records into whole objects.
pub struct Ingester<'s, S: IngestSink + ?Sized> {
    sink: &'s mut S,
    resolved: HashMap<u64, ObjectId>,
    pending: HashMap<DeltaBase, Vec<PendingDelta>>,
    entries: Vec<(ObjectId, u32, u64)>,
    deltas: usize,
}

impl<'s, S: IngestSink + ?Sized> Ingester<'s, S> {
    pub fn new(sink: &'s mut S) -> Self {
        Self {
            sink,
            resolved: HashMap::new(),
            pending: HashMap::new(),
            entries: Vec::new(),
            deltas: 0,
        }
    }

    /// Feed the next record in pack order.
    pub fn push(&mut self, record: PackRecord) -> PackResult<()> {
        let PackRecord {
            offset,
            kind,
            data,
            crc32,
        } = record;

        let base = match kind {
            RecordKind::Full(object_kind) => {
                let object = EncodedObject::new(object_kind, data);
                let entry = IngestedEntry {
                    offset,
                    crc32,
                    stored_as: object_kind,
                    base: None,
                };
                let id = self.sink.store(&object, &entry)?;
                self.record(offset, crc32, id);
                return self.drain(offset, id);
            }
            delta_kind => delta_kind
                .delta_base()
                .ok_or_else(|| PackError::corrupt(offset, "delta entry without base"))?,
        };

        let pending = PendingDelta {
            offset,
            crc32,
            stored_as: kind.object_kind(),
            base,
            delta: data,
        };

        let available = match base {
            DeltaBase::Offset(base_offset) => match self.resolved.get(&base_offset).copied() {
                Some(id) => self.sink.load(&id)?,
                None if base_offset >= offset => {
                    return Err(PackError::corrupt(offset, "offset delta points forward"))
                }
                None => None,
            },
            DeltaBase::Id(id) => self.sink.load(&id)?,
        };

        match available {
            Some(base_object) => {
                let id = self.materialize(&base_object, pending)?;
                self.drain(offset, id)
            }
            None => {
                debug!(offset, ?base, "parking delta until its base arrives");
                self.pending.entry(base).or_default().push(pending);
                Ok(())
            }
        }
    }

    /// Fails if any delta is still waiting for a base.
    pub fn finish(self, checksum: [u8; OBJECT_ID_LEN]) -> PackResult<IngestReport> {
        let unresolved: usize = self.pending.values().map(Vec::len).sum();
        if unresolved > 0 {
            return Err(PackError::UnresolvedDeltas(unresolved));
        }
        Ok(IngestReport {
            objects: self.entries.len(),
            deltas: self.deltas,
            entries: self.entries,
            checksum,
        })
    }

    fn record(&mut self, offset: u64, crc32: u32, id: ObjectId) {
        self.resolved.insert(offset, id);
        self.entries.push((id, crc32, offset));
    }

    /// Resolve everything that was waiting on the object at `offset`.
    fn drain(&mut self, offset: u64, id: ObjectId) -> PackResult<()> {
        let mut work = vec![(offset, id)];
        while let Some((offset, id)) = work.pop() {
            let mut waiting = self
                .pending
                .remove(&DeltaBase::Offset(offset))
                .unwrap_or_default();
            waiting.extend(self.pending.remove(&DeltaBase::Id(id)).unwrap_or_default());
            if waiting.is_empty() {
                continue;
            }

            let base = self
                .sink
                .load(&id)?
                .ok_or_else(|| PackError::DeltaBaseNotFound(id.to_hex()))?;
            for delta in waiting {
                let delta_offset = delta.offset;
                let resolved = self.materialize(&base, delta)?;
                work.push((delta_offset, resolved));
            }
        }
        Ok(())
    }

    fn materialize(&mut self, base: &EncodedObject, delta: PendingDelta) -> PackResult<ObjectId> {
        let data = apply_delta(base.data(), &delta.delta)?;
        let object = EncodedObject::new(base.kind(), data);
        let entry = IngestedEntry {
            offset: delta.offset,
            crc32: delta.crc32,
            stored_as: delta.stored_as,
            base: Some(delta.base),
        };
        let id = self.sink.store(&object, &entry)?;
        self.record(delta.offset, delta.crc32, id);
        self.deltas += 1;
        Ok(id)
    }
}

/// Decode, resolve and store every object in `pack`, then verify its
/// trailer.
///
/// Objects are handed to the sink as they resolve; a failure part-way
/// leaves earlier objects stored.
pub fn ingest_packfile<S: IngestSink + ?Sized>(
    pack: &[u8],
    sink: &mut S,
) -> PackResult<IngestReport> {
    let mut scanner = Scanner::new(pack)?;
    let mut ingester = Ingester::new(sink);
    for record in scanner.by_ref() {
        ingester.push(record?)?;
    }
    let checksum = scanner.finish()?;
    let report = ingester.finish(checksum)?;
    info!(
        objects = report.objects,
        deltas = report.deltas,
        "packfile ingested"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::PackWriter;
    use tessera_store::InMemoryObjectStore;

    fn blob(content: &str) -> EncodedObject {
        EncodedObject::new(ObjectKind::Blob, content.as_bytes().to_vec())
    }

    /// Records every call, backed by a map.
    #[derive(Default)]
    struct RecordingSink {
        objects: HashMap<ObjectId, EncodedObject>,
        stored: Vec<IngestedEntry>,
    }

    impl IngestSink for RecordingSink {
        fn store(&mut self, object: &EncodedObject, entry: &IngestedEntry) -> PackResult<ObjectId> {
            let id = object.id();
            self.objects.insert(id, object.clone());
            self.stored.push(*entry);
            Ok(id)
        }

        fn load(&mut self, id: &ObjectId) -> PackResult<Option<EncodedObject>> {
            Ok(self.objects.get(id).cloned())
        }
    }

    #[test]
    fn ingests_full_objects_and_ofs_deltas() {
        let base = blob("common text, first edition");
        let next = blob("common text, second edition");
        let mut writer = PackWriter::new();
        let at = writer.add_object(base.clone());
        writer.add_ofs_delta(at, next.clone()).unwrap();
        let (pack, index) = writer.finish().unwrap();

        let mut sink = RecordingSink::default();
        let report = ingest_packfile(&pack, &mut sink).unwrap();
        assert_eq!(report.objects, 2);
        assert_eq!(report.deltas, 1);
        assert_eq!(report.build_index(), index);
        assert_eq!(sink.objects.get(&next.id()), Some(&next));
        assert_eq!(sink.stored[1].stored_as, ObjectKind::OfsDelta);
        assert_eq!(
            sink.stored[1].base,
            Some(DeltaBase::Offset(sink.stored[0].offset))
        );
    }

    #[test]
    fn forward_ref_delta_waits_for_its_base() {
        let base = blob("appears after the delta that needs it");
        let target = blob("appears after the delta that needs it!!");
        let chained = blob("appears after the delta that needs it!!??");
        let mut writer = PackWriter::new();
        let first = writer.add_ref_delta(&base, target.clone()).unwrap();
        writer.add_ofs_delta(first, chained.clone()).unwrap();
        writer.add_object(base.clone());
        let (pack, _) = writer.finish().unwrap();

        let mut sink = RecordingSink::default();
        let report = ingest_packfile(&pack, &mut sink).unwrap();
        assert_eq!(report.objects, 3);
        assert_eq!(report.deltas, 2);
        for obj in [&base, &target, &chained] {
            assert_eq!(sink.objects.get(&obj.id()), Some(obj));
        }
    }

    #[test]
    fn ref_delta_against_existing_object() {
        let store = InMemoryObjectStore::new();
        let base = blob("already in the store before the pack arrives");
        store.put(&base).unwrap();
        let target = blob("already in the store before the pack arrives, edited");
        let mut writer = PackWriter::new();
        writer.add_ref_delta(&base, target.clone()).unwrap();
        let (pack, _) = writer.finish().unwrap();

        let report = ingest_packfile(&pack, &mut StoreSink::new(&store)).unwrap();
        assert_eq!(report.objects, 1);
        assert_eq!(store.get(ObjectKind::Blob, &target.id()).unwrap(), target);
    }

    #[test]
    fn missing_base_is_reported() {
        let base = blob("never shipped");
        let target = blob("never shipped either");
        let mut writer = PackWriter::new();
        writer.add_ref_delta(&base, target).unwrap();
        let (pack, _) = writer.finish().unwrap();

        let err = ingest_packfile(&pack, &mut RecordingSink::default()).unwrap_err();
        assert!(matches!(err, PackError::UnresolvedDeltas(1)));
        let store_err: StoreError = err.into();
        assert!(matches!(store_err, StoreError::CorruptPackfile(_)));
    }

    #[test]
    fn bad_trailer_fails_after_ingest() {
        let mut writer = PackWriter::new();
        writer.add_object(blob("payload"));
        let (mut pack, _) = writer.finish().unwrap();
        let last = pack.len() - 1;
        pack[last] ^= 0x01;

        let err = ingest_packfile(&pack, &mut RecordingSink::default()).unwrap_err();
        assert!(matches!(err, PackError::ChecksumMismatch));
    }

    #[test]
    fn empty_pack_ingests_nothing() {
        let (pack, _) = PackWriter::new().finish().unwrap();
        let report = ingest_packfile(&pack, &mut RecordingSink::default()).unwrap();
        assert_eq!(report.objects, 0);
        assert!(report.entries.is_empty());
    }
}
