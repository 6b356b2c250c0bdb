use std::borrow::Cow;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use tessera_crypto::StreamChecksum;
use tessera_store::EncodedObject;
use tracing::debug;

use crate::delta::encode_delta;
use crate::entry::RecordKind;
use crate::error::{PackError, PackResult};
use crate::index::PackIndex;
use crate::scanner::{PackHeader, PACK_VERSION};

enum Planned {
    Full(EncodedObject),
    OfsDelta {
        base: usize,
        target: EncodedObject,
    },
    RefDelta {
        base: EncodedObject,
        target: EncodedObject,
    },
}

impl Planned {
    /// The object this entry resolves to.
    fn target(&self) -> &EncodedObject {
        match self {
            Self::Full(object) => object,
            Self::OfsDelta { target, .. } | Self::RefDelta { target, .. } => target,
        }
    }
}

/// Builds a version-2 packfile in memory.
///
/// Entries are written in the order they were added. Offset deltas must
/// point at an earlier entry; reference deltas may name any object, inside
/// the pack or not, including one added later.
#[derive(Default)]
pub struct PackWriter {
    entries: Vec<Planned>,
}

impl PackWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full object. Returns its entry position.
    pub fn add_object(&mut self, object: EncodedObject) -> usize {
        self.entries.push(Planned::Full(object));
        self.entries.len() - 1
    }

    /// Queue `target` as an offset delta against the entry at `base`.
    pub fn add_ofs_delta(&mut self, base: usize, target: EncodedObject) -> PackResult<usize> {
        let base_kind = self
            .entries
            .get(base)
            .map(|entry| entry.target().kind())
            .ok_or_else(|| PackError::DeltaBaseNotFound(format!("entry #{base}")))?;
        check_kinds(base_kind, &target)?;
        self.entries.push(Planned::OfsDelta { base, target });
        Ok(self.entries.len() - 1)
    }

    /// Queue `target` as a reference delta against `base`.
    pub fn add_ref_delta(
        &mut self,
        base: &EncodedObject,
        target: EncodedObject,
    ) -> PackResult<usize> {
        check_kinds(base.kind(), &target)?;
        self.entries.push(Planned::RefDelta {
            base: base.clone(),
            target,
        });
        Ok(self.entries.len() - 1)
    }

    /// Number of objects queued.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode the pack and build its index.
    pub fn finish(self) -> PackResult<(Vec<u8>, PackIndex)> {
        let header = PackHeader {
            version: PACK_VERSION,
            object_count: u32::try_from(self.entries.len())
                .map_err(|_| PackError::CompressionFailed("too many objects".into()))?,
        };
        let mut pack = header.to_bytes().to_vec();
        let mut offsets: Vec<u64> = Vec::with_capacity(self.entries.len());
        let mut index_entries = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            let offset = pack.len() as u64;
            let target = entry.target();

            let (kind, payload): (RecordKind, Cow<'_, [u8]>) = match entry {
                Planned::Full(object) => {
                    (RecordKind::Full(object.kind()), Cow::Borrowed(object.data()))
                }
                Planned::OfsDelta { base, target } => {
                    let base_object = self.entries[*base].target();
                    (
                        RecordKind::OfsDelta {
                            base_offset: offsets[*base],
                        },
                        Cow::Owned(encode_delta(base_object.data(), target.data())),
                    )
                }
                Planned::RefDelta { base, target } => (
                    RecordKind::RefDelta { base: base.id() },
                    Cow::Owned(encode_delta(base.data(), target.data())),
                ),
            };

            write_entry_header(&mut pack, kind.type_code(), payload.len() as u64);
            match kind {
                RecordKind::OfsDelta { base_offset } => {
                    write_base_distance(&mut pack, offset - base_offset)
                }
                RecordKind::RefDelta { base } => pack.extend_from_slice(base.as_bytes()),
                RecordKind::Full(_) => {}
            }
            pack.extend_from_slice(&compress(&payload)?);

            let crc = crc32fast::hash(&pack[offset as usize..]);
            offsets.push(offset);
            index_entries.push((target.id(), crc, offset));
        }

        let mut checksum = StreamChecksum::new();
        checksum.update(&pack);
        let checksum = checksum.finish();
        pack.extend_from_slice(&checksum);

        debug!(
            objects = self.entries.len(),
            bytes = pack.len(),
            "packfile built"
        );
        Ok((pack, PackIndex::build(index_entries, checksum)))
    }
}

fn check_kinds(base: tessera_store::ObjectKind, target: &EncodedObject) -> PackResult<()> {
    if base != target.kind() {
        return Err(PackError::InvalidDelta(format!(
            "delta target is a {} but its base is a {base}",
            target.kind()
        )));
    }
    Ok(())
}

/// Type in bits 6-4 of the first byte, size as a little-endian varint
/// starting with the low 4 bits.
fn write_entry_header(buf: &mut Vec<u8>, type_code: u8, mut size: u64) {
    let mut byte = (type_code << 4) | (size & 0x0f) as u8;
    size >>= 4;
    while size != 0 {
        buf.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    buf.push(byte);
}

/// Offset-delta distance, big-endian with the "+1 per continuation" bias.
fn write_base_distance(buf: &mut Vec<u8>, mut distance: u64) {
    let mut bytes = vec![(distance & 0x7f) as u8];
    distance >>= 7;
    while distance != 0 {
        distance -= 1;
        bytes.push(0x80 | (distance & 0x7f) as u8);
        distance >>= 7;
    }
    bytes.reverse();
    buf.extend_from_slice(&bytes);
}

fn compress(data: &[u8]) -> PackResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| PackError::CompressionFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| PackError::CompressionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{Scanner, PACK_HEADER_LEN};
    use tessera_store::ObjectKind;

    fn blob(content: &[u8]) -> EncodedObject {
        EncodedObject::new(ObjectKind::Blob, content.to_vec())
    }

    #[test]
    fn entry_header_small_and_large_sizes() {
        let mut buf = Vec::new();
        write_entry_header(&mut buf, 3, 10);
        assert_eq!(buf, vec![0x3a]);

        let mut buf = Vec::new();
        write_entry_header(&mut buf, 1, 100);
        // low nibble 4, continuation, then 100 >> 4 = 6.
        assert_eq!(buf, vec![0x94, 0x06]);
    }

    #[test]
    fn base_distance_encoding() {
        let mut buf = Vec::new();
        write_base_distance(&mut buf, 100);
        assert_eq!(buf, vec![100]);

        let mut buf = Vec::new();
        write_base_distance(&mut buf, 128);
        assert_eq!(buf, vec![0x80, 0x00]);
    }

    #[test]
    fn empty_pack_layout() {
        let writer = PackWriter::new();
        assert!(writer.is_empty());
        let (pack, index) = writer.finish().unwrap();
        assert_eq!(pack.len(), PACK_HEADER_LEN + 20);
        assert_eq!(&pack[0..4], b"PACK");
        assert_eq!(index.object_count(), 0);
        assert_eq!(&pack[PACK_HEADER_LEN..], &index.pack_checksum[..]);
    }

    #[test]
    fn index_names_resolved_objects() {
        let base = blob(b"version one of the file");
        let next = blob(b"version two of the file");
        let mut writer = PackWriter::new();
        let at = writer.add_object(base.clone());
        writer.add_ofs_delta(at, next.clone()).unwrap();
        assert_eq!(writer.len(), 2);

        let (pack, index) = writer.finish().unwrap();
        assert!(index.contains(&base.id()));
        assert!(index.contains(&next.id()));
        assert_eq!(index.lookup(&base.id()).unwrap().0, PACK_HEADER_LEN as u64);

        let records: Vec<_> = Scanner::new(&pack)
            .unwrap()
            .collect::<PackResult<_>>()
            .unwrap();
        for record in &records {
            let (id, crc, offset) = index
                .entries()
                .find(|(_, _, offset)| *offset == record.offset)
                .unwrap();
            assert_eq!(crc, record.crc32, "crc for {id}");
            assert_eq!(offset, record.offset);
        }
    }

    #[test]
    fn ofs_delta_needs_existing_base() {
        let mut writer = PackWriter::new();
        let err = writer.add_ofs_delta(3, blob(b"x")).unwrap_err();
        assert!(matches!(err, PackError::DeltaBaseNotFound(_)));
    }

    #[test]
    fn delta_kinds_must_agree() {
        let mut writer = PackWriter::new();
        let tree = EncodedObject::new(ObjectKind::Tree, Vec::new());
        let err = writer.add_ref_delta(&tree, blob(b"x")).unwrap_err();
        assert!(matches!(err, PackError::InvalidDelta(_)));
    }
}
