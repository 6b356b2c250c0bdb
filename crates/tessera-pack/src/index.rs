use tessera_crypto::StreamChecksum;
use tessera_types::{ObjectId, OBJECT_ID_LEN};

use crate::error::{PackError, PackResult};

const INDEX_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];
const INDEX_VERSION: u32 = 2;
/// Offsets at or above this go to the 64-bit table.
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// Pack index for fast random-access lookups.
///
/// Serialized in git's pack index v2 layout:
/// - Magic `\377tOc` and version 2
/// - Fan-out table: 256 entries counting objects with first byte <= index
/// - Sorted ObjectId array
/// - CRC32 array (parallel)
/// - 32-bit offset array (parallel); values with the high bit set index
///   into a trailing table of 64-bit offsets
/// - Pack checksum, then a checksum of the index itself
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackIndex {
    pub fan_out: [u32; 256],
    pub object_ids: Vec<ObjectId>,
    pub crc32s: Vec<u32>,
    pub offsets: Vec<u64>,
    pub pack_checksum: [u8; OBJECT_ID_LEN],
}

impl PackIndex {
    /// Build an index from (id, crc32, offset) entries and a pack checksum.
    pub fn build(
        mut entries: Vec<(ObjectId, u32, u64)>,
        pack_checksum: [u8; OBJECT_ID_LEN],
    ) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| a.0 == b.0);

        let mut fan_out = [0u32; 256];
        let mut object_ids = Vec::with_capacity(entries.len());
        let mut crc32s = Vec::with_capacity(entries.len());
        let mut offsets = Vec::with_capacity(entries.len());

        for (id, crc, offset) in &entries {
            fan_out[id.as_bytes()[0] as usize] += 1;
            object_ids.push(*id);
            crc32s.push(*crc);
            offsets.push(*offset);
        }
        for i in 1..256 {
            fan_out[i] += fan_out[i - 1];
        }

        Self {
            fan_out,
            object_ids,
            crc32s,
            offsets,
            pack_checksum,
        }
    }

    /// Look up an object's (offset, crc32) by ID.
    pub fn lookup(&self, id: &ObjectId) -> Option<(u64, u32)> {
        let first_byte = id.as_bytes()[0] as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.fan_out[first_byte - 1] as usize
        };
        let end = self.fan_out[first_byte] as usize;

        let range = self.object_ids.get(start..end)?;
        match range.binary_search(id) {
            Ok(pos) => {
                let idx = start + pos;
                Some((self.offsets[idx], self.crc32s[idx]))
            }
            Err(_) => None,
        }
    }

    /// Total object count.
    pub fn object_count(&self) -> usize {
        self.object_ids.len()
    }

    /// Check if an object exists.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.lookup(id).is_some()
    }

    /// Iterate over (id, crc32, offset) in ID order.
    pub fn entries(&self) -> impl Iterator<Item = (ObjectId, u32, u64)> + '_ {
        self.object_ids
            .iter()
            .zip(&self.crc32s)
            .zip(&self.offsets)
            .map(|((id, crc), offset)| (*id, *crc, *offset))
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let count = self.object_ids.len();
        let mut buf = Vec::with_capacity(8 + 256 * 4 + count * 28 + 2 * OBJECT_ID_LEN);
        buf.extend_from_slice(&INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        for &count in &self.fan_out {
            buf.extend_from_slice(&count.to_be_bytes());
        }
        for id in &self.object_ids {
            buf.extend_from_slice(id.as_bytes());
        }
        for &crc in &self.crc32s {
            buf.extend_from_slice(&crc.to_be_bytes());
        }

        let mut large = Vec::new();
        for &offset in &self.offsets {
            if offset < u64::from(LARGE_OFFSET_FLAG) {
                buf.extend_from_slice(&(offset as u32).to_be_bytes());
            } else {
                let slot = LARGE_OFFSET_FLAG | large.len() as u32;
                buf.extend_from_slice(&slot.to_be_bytes());
                large.push(offset);
            }
        }
        for offset in large {
            buf.extend_from_slice(&offset.to_be_bytes());
        }

        buf.extend_from_slice(&self.pack_checksum);
        let mut checksum = StreamChecksum::new();
        checksum.update(&buf);
        buf.extend_from_slice(&checksum.finish());
        buf
    }

    /// Deserialize from bytes, verifying the trailing checksum.
    pub fn from_bytes(data: &[u8]) -> PackResult<Self> {
        if data.len() < 8 {
            return Err(PackError::IndexCorrupted("too short".into()));
        }
        if data[0..4] != INDEX_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: "\\377tOc".into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = be_u32(&data[4..8]);
        if version != INDEX_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }

        let mut pos = 8;
        if data.len() < pos + 256 * 4 {
            return Err(PackError::IndexCorrupted("fan-out truncated".into()));
        }
        let mut fan_out = [0u32; 256];
        for entry in &mut fan_out {
            *entry = be_u32(&data[pos..pos + 4]);
            pos += 4;
        }
        if fan_out.windows(2).any(|w| w[0] > w[1]) {
            return Err(PackError::IndexCorrupted("fan-out not monotonic".into()));
        }

        let count = fan_out[255] as usize;
        let needed = pos + count * (OBJECT_ID_LEN + 8) + 2 * OBJECT_ID_LEN;
        if data.len() < needed {
            return Err(PackError::IndexCorrupted("data truncated".into()));
        }

        let body_len = data.len() - OBJECT_ID_LEN;
        let mut checksum = StreamChecksum::new();
        checksum.update(&data[..body_len]);
        if checksum.finish()[..] != data[body_len..] {
            return Err(PackError::IndexCorrupted("index checksum mismatch".into()));
        }

        let mut object_ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = ObjectId::from_slice(&data[pos..pos + OBJECT_ID_LEN])
                .map_err(|e| PackError::IndexCorrupted(e.to_string()))?;
            object_ids.push(id);
            pos += OBJECT_ID_LEN;
        }
        if object_ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PackError::IndexCorrupted("object IDs not sorted".into()));
        }

        let mut crc32s = Vec::with_capacity(count);
        for _ in 0..count {
            crc32s.push(be_u32(&data[pos..pos + 4]));
            pos += 4;
        }

        let mut small = Vec::with_capacity(count);
        for _ in 0..count {
            small.push(be_u32(&data[pos..pos + 4]));
            pos += 4;
        }

        let large_start = pos;
        let trailer_start = data.len() - 2 * OBJECT_ID_LEN;
        let mut offsets = Vec::with_capacity(count);
        for value in small {
            if value & LARGE_OFFSET_FLAG == 0 {
                offsets.push(u64::from(value));
                continue;
            }
            let slot = (value & !LARGE_OFFSET_FLAG) as usize;
            let at = large_start + slot * 8;
            if at + 8 > trailer_start {
                return Err(PackError::IndexCorrupted(format!(
                    "large offset slot {slot} out of range"
                )));
            }
            offsets.push(be_u64(&data[at..at + 8]));
        }

        let mut pack_checksum = [0u8; OBJECT_ID_LEN];
        pack_checksum.copy_from_slice(&data[trailer_start..trailer_start + OBJECT_ID_LEN]);

        Ok(Self {
            fan_out,
            object_ids,
            crc32s,
            offsets,
            pack_checksum,
        })
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}
