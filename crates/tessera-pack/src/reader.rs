use std::collections::{HashMap, HashSet};

use tessera_store::{DeltaObject, EncodedObject, PackedObject};
use tessera_types::ObjectId;

use crate::delta::apply_delta;
use crate::entry::{PackRecord, RecordKind};
use crate::error::{PackError, PackResult};
use crate::index::PackIndex;
use crate::scanner::{decode_entry, PackHeader};

/// Fetches delta bases that live outside the pack being read.
pub trait BaseResolver {
    fn resolve_base(&self, id: &ObjectId) -> PackResult<Option<EncodedObject>>;
}

/// Resolver for self-contained packs.
pub struct NoExternalBases;

impl BaseResolver for NoExternalBases {
    fn resolve_base(&self, _id: &ObjectId) -> PackResult<Option<EncodedObject>> {
        Ok(None)
    }
}

impl<F> BaseResolver for F
where
    F: Fn(&ObjectId) -> PackResult<Option<EncodedObject>>,
{
    fn resolve_base(&self, id: &ObjectId) -> PackResult<Option<EncodedObject>> {
        self(id)
    }
}

/// Reads objects from a pack file using an index for random access.
pub struct PackFileReader {
    pack_data: Vec<u8>,
    index: PackIndex,
    ids_by_offset: HashMap<u64, ObjectId>,
}

impl PackFileReader {
    /// Open from raw bytes. The pack's trailer must match the checksum the
    /// index was built for.
    pub fn from_bytes(pack_data: Vec<u8>, index: PackIndex) -> PackResult<Self> {
        PackHeader::parse(&pack_data)?;
        let trailer_start = pack_data
            .len()
            .checked_sub(index.pack_checksum.len())
            .ok_or_else(|| PackError::corrupt(0, "pack data too short for trailer"))?;
        if pack_data[trailer_start..] != index.pack_checksum[..] {
            return Err(PackError::ChecksumMismatch);
        }
        let ids_by_offset = index.entries().map(|(id, _, offset)| (offset, id)).collect();
        Ok(Self {
            pack_data,
            index,
            ids_by_offset,
        })
    }

    /// Check containment.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    /// Object count.
    pub fn object_count(&self) -> usize {
        self.index.object_count()
    }

    /// Access the index.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// The pack's trailing checksum.
    pub fn checksum(&self) -> [u8; 20] {
        self.index.pack_checksum
    }

    /// List all object IDs.
    pub fn object_ids(&self) -> &[ObjectId] {
        &self.index.object_ids
    }

    /// Read and fully resolve an object by ID.
    pub fn read_object(
        &self,
        id: &ObjectId,
        bases: &dyn BaseResolver,
    ) -> PackResult<Option<EncodedObject>> {
        match self.index.lookup(id) {
            Some((offset, _)) => self.resolve_at(offset, bases).map(Some),
            None => Ok(None),
        }
    }

    /// Read an object as stored: delta entries come back unresolved, with
    /// their resolved kind filled in.
    pub fn read_packed(
        &self,
        id: &ObjectId,
        bases: &dyn BaseResolver,
    ) -> PackResult<Option<PackedObject>> {
        let Some((offset, _)) = self.index.lookup(id) else {
            return Ok(None);
        };
        let record = self.record_at(offset)?;
        let packed = match record.kind {
            RecordKind::Full(kind) => PackedObject::Resolved(EncodedObject::new(kind, record.data)),
            delta_kind => {
                let resolved_kind = self.resolve_at(offset, bases)?.kind();
                let base = delta_kind
                    .delta_base()
                    .ok_or_else(|| PackError::corrupt(offset, "delta entry without base"))?;
                PackedObject::Delta(DeltaObject::new(
                    delta_kind.object_kind(),
                    base,
                    record.data,
                    *id,
                    resolved_kind,
                ))
            }
        };
        Ok(Some(packed))
    }

    fn record_at(&self, offset: u64) -> PackResult<PackRecord> {
        let body = &self.pack_data[..self.pack_data.len() - self.index.pack_checksum.len()];
        let (record, _) = decode_entry(body, offset)?;
        if let Some(expected) = self
            .ids_by_offset
            .get(&offset)
            .and_then(|id| self.index.lookup(id))
            .map(|(_, crc)| crc)
        {
            if expected != record.crc32 {
                return Err(PackError::CrcMismatch { offset });
            }
        }
        Ok(record)
    }

    /// Walk the delta chain down to a full object, then apply the deltas
    /// back up. Iterative so long chains cannot overflow the stack.
    fn resolve_at(&self, offset: u64, bases: &dyn BaseResolver) -> PackResult<EncodedObject> {
        let mut chain: Vec<Vec<u8>> = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = offset;

        let mut base = loop {
            if !seen.insert(cursor) {
                return Err(PackError::corrupt(cursor, "delta chain forms a cycle"));
            }
            let record = self.record_at(cursor)?;
            match record.kind {
                RecordKind::Full(kind) => break EncodedObject::new(kind, record.data),
                RecordKind::OfsDelta { base_offset } => {
                    chain.push(record.data);
                    cursor = base_offset;
                }
                RecordKind::RefDelta { base } => {
                    chain.push(record.data);
                    match self.index.lookup(&base) {
                        Some((base_offset, _)) => cursor = base_offset,
                        None => {
                            break bases
                                .resolve_base(&base)?
                                .ok_or_else(|| PackError::DeltaBaseNotFound(base.to_hex()))?
                        }
                    }
                }
            }
        };

        while let Some(delta) = chain.pop() {
            let data = apply_delta(base.data(), &delta)?;
            base = EncodedObject::new(base.kind(), data);
        }
        Ok(base)
    }
}

impl std::fmt::Debug for PackFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackFileReader")
            .field("objects", &self.index.object_count())
            .field("bytes", &self.pack_data.len())
            .finish()
    }
}
