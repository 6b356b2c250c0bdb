use std::io::Read;

use flate2::bufread::ZlibDecoder;
use tessera_crypto::StreamChecksum;
use tessera_types::{ObjectId, OBJECT_ID_LEN};

use crate::entry::{kind_from_type_code, PackRecord, RecordKind};
use crate::error::{PackError, PackResult};

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
/// Signature, version and object count.
pub const PACK_HEADER_LEN: usize = 12;

/// Preallocation cap for inflated payloads; the declared size is untrusted.
const MAX_PREALLOC: u64 = 1 << 20;

/// Fixed header at the start of every packfile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackHeader {
    pub version: u32,
    pub object_count: u32,
}

impl PackHeader {
    pub fn parse(data: &[u8]) -> PackResult<Self> {
        if data.len() < PACK_HEADER_LEN {
            return Err(PackError::corrupt(0, "pack data too short"));
        }
        if &data[0..4] != PACK_SIGNATURE {
            return Err(PackError::InvalidMagic {
                expected: "PACK".into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != PACK_VERSION && version != 3 {
            return Err(PackError::UnsupportedVersion(version));
        }
        let object_count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        Ok(Self {
            version,
            object_count,
        })
    }

    pub fn to_bytes(&self) -> [u8; PACK_HEADER_LEN] {
        let mut buf = [0u8; PACK_HEADER_LEN];
        buf[0..4].copy_from_slice(PACK_SIGNATURE);
        buf[4..8].copy_from_slice(&self.version.to_be_bytes());
        buf[8..12].copy_from_slice(&self.object_count.to_be_bytes());
        buf
    }
}

/// Sequential decoder over an in-memory packfile.
///
/// Yields one [`PackRecord`] per entry in file order. Stops after the first
/// error. Call [`Scanner::finish`] once iteration is exhausted to check the
/// trailing checksum.
pub struct Scanner<'a> {
    data: &'a [u8],
    header: PackHeader,
    pos: usize,
    remaining: u32,
    failed: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(data: &'a [u8]) -> PackResult<Self> {
        let header = PackHeader::parse(data)?;
        if data.len() < PACK_HEADER_LEN + OBJECT_ID_LEN {
            return Err(PackError::corrupt(0, "pack data too short for trailer"));
        }
        Ok(Self {
            data,
            header,
            pos: PACK_HEADER_LEN,
            remaining: header.object_count,
            failed: false,
        })
    }

    pub fn header(&self) -> PackHeader {
        self.header
    }

    /// Decode the entry starting at `offset` without moving the cursor.
    pub fn read_at(&self, offset: u64) -> PackResult<PackRecord> {
        decode_entry(self.entries(), offset).map(|(record, _)| record)
    }

    /// Verify that every entry was read and the trailer matches the SHA-1 of
    /// everything before it. Returns the checksum.
    pub fn finish(&self) -> PackResult<[u8; OBJECT_ID_LEN]> {
        if self.remaining != 0 || self.failed {
            return Err(PackError::corrupt(
                self.pos as u64,
                format!("{} entries left unread", self.remaining),
            ));
        }
        if self.pos + OBJECT_ID_LEN != self.data.len() {
            return Err(PackError::corrupt(
                self.pos as u64,
                "unexpected bytes between last entry and trailer",
            ));
        }
        verify_trailer(self.data)
    }

    /// The pack without its trailer.
    fn entries(&self) -> &'a [u8] {
        &self.data[..self.data.len() - OBJECT_ID_LEN]
    }
}

impl Iterator for Scanner<'_> {
    type Item = PackResult<PackRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.failed {
            return None;
        }
        match decode_entry(self.entries(), self.pos as u64) {
            Ok((record, end)) => {
                self.pos = end;
                self.remaining -= 1;
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = if self.failed { 0 } else { self.remaining as usize };
        (0, Some(n))
    }
}

/// Check the trailing SHA-1 of a complete pack and return it.
pub fn verify_trailer(data: &[u8]) -> PackResult<[u8; OBJECT_ID_LEN]> {
    if data.len() < PACK_HEADER_LEN + OBJECT_ID_LEN {
        return Err(PackError::corrupt(0, "pack data too short for trailer"));
    }
    let body_len = data.len() - OBJECT_ID_LEN;
    let mut checksum = StreamChecksum::new();
    checksum.update(&data[..body_len]);
    let actual = checksum.finish();
    if actual[..] != data[body_len..] {
        return Err(PackError::ChecksumMismatch);
    }
    Ok(actual)
}

/// Decode one entry at `offset`. Returns the record and the offset just past
/// its compressed payload.
pub(crate) fn decode_entry(data: &[u8], offset: u64) -> PackResult<(PackRecord, usize)> {
    let start = usize::try_from(offset)
        .ok()
        .filter(|start| *start < data.len())
        .ok_or_else(|| PackError::corrupt(offset, "offset beyond pack data"))?;
    let mut pos = start;
    let truncated = || PackError::corrupt(offset, "truncated entry header");

    let mut byte = *data.get(pos).ok_or_else(truncated)?;
    pos += 1;
    let type_code = (byte >> 4) & 0x07;
    let mut size = u64::from(byte & 0x0f);
    let mut shift = 4;
    while byte & 0x80 != 0 {
        byte = *data.get(pos).ok_or_else(truncated)?;
        pos += 1;
        if shift > 57 {
            return Err(PackError::corrupt(offset, "entry size overflows"));
        }
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }

    let kind = match type_code {
        6 => {
            let mut c = *data.get(pos).ok_or_else(truncated)?;
            pos += 1;
            let mut distance = u64::from(c & 0x7f);
            while c & 0x80 != 0 {
                c = *data.get(pos).ok_or_else(truncated)?;
                pos += 1;
                distance = distance
                    .checked_add(1)
                    .and_then(|d| d.checked_mul(128))
                    .ok_or_else(|| PackError::corrupt(offset, "base offset overflows"))?
                    | u64::from(c & 0x7f);
            }
            if distance == 0 || distance > offset {
                return Err(PackError::corrupt(
                    offset,
                    format!("base distance {distance} points outside the pack"),
                ));
            }
            RecordKind::OfsDelta {
                base_offset: offset - distance,
            }
        }
        7 => {
            let raw = data.get(pos..pos + OBJECT_ID_LEN).ok_or_else(truncated)?;
            pos += OBJECT_ID_LEN;
            let base = ObjectId::from_slice(raw)
                .map_err(|e| PackError::corrupt(offset, e.to_string()))?;
            RecordKind::RefDelta { base }
        }
        code => RecordKind::Full(kind_from_type_code(code).ok_or_else(|| {
            PackError::corrupt(offset, format!("unknown type code: {code}"))
        })?),
    };

    let mut decoder = ZlibDecoder::new(&data[pos..]);
    let mut payload = Vec::with_capacity(size.min(MAX_PREALLOC) as usize);
    decoder
        .read_to_end(&mut payload)
        .map_err(|e| PackError::DecompressionFailed {
            offset,
            reason: e.to_string(),
        })?;
    pos += decoder.total_in() as usize;

    if payload.len() as u64 != size {
        return Err(PackError::corrupt(
            offset,
            format!("size mismatch: header says {size}, inflated {}", payload.len()),
        ));
    }

    let record = PackRecord {
        offset,
        kind,
        data: payload,
        crc32: crc32fast::hash(&data[start..pos]),
    };
    Ok((record, pos))
}
