//! Git's delta instruction stream.
//!
//! A delta opens with the base size and the target size, each a
//! little-endian base-128 varint, followed by opcodes:
//!
//! ```text
//! 1xxxxxxx  copy   offset bytes selected by bits 0-3, size bytes by bits 4-6
//! 0nnnnnnn  insert the next n bytes verbatim (n > 0)
//! 00000000  reserved
//! ```

use crate::error::{PackError, PackResult};

/// Largest copy a single instruction may carry in this encoder.
const MAX_COPY: usize = 0xffff;
/// Largest literal a single insert instruction may carry.
const MAX_INSERT: usize = 0x7f;

/// Apply `delta` to `base`, returning the reconstructed target.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> PackResult<Vec<u8>> {
    let (base_size, mut pos) = decode_varint(delta)?;
    if base_size != base.len() as u64 {
        return Err(PackError::InvalidDelta(format!(
            "base size mismatch: delta expects {base_size}, base has {}",
            base.len()
        )));
    }
    let (target_size, consumed) = decode_varint(&delta[pos..])?;
    pos += consumed;

    let mut out = Vec::with_capacity(target_size.min(1 << 24) as usize);
    while pos < delta.len() {
        let op = delta[pos];
        pos += 1;

        if op & 0x80 != 0 {
            let mut offset = 0u64;
            for i in 0..4 {
                if op & (1 << i) != 0 {
                    offset |= u64::from(next_byte(delta, &mut pos)?) << (8 * i);
                }
            }
            let mut size = 0u64;
            for i in 0..3 {
                if op & (0x10 << i) != 0 {
                    size |= u64::from(next_byte(delta, &mut pos)?) << (8 * i);
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let end = offset
                .checked_add(size)
                .filter(|end| *end <= base.len() as u64)
                .ok_or_else(|| {
                    PackError::InvalidDelta(format!(
                        "copy {offset}+{size} exceeds base of {} bytes",
                        base.len()
                    ))
                })?;
            out.extend_from_slice(&base[offset as usize..end as usize]);
        } else if op != 0 {
            let len = op as usize;
            let literal = delta.get(pos..pos + len).ok_or_else(|| {
                PackError::InvalidDelta("insert runs past end of delta".into())
            })?;
            out.extend_from_slice(literal);
            pos += len;
        } else {
            return Err(PackError::InvalidDelta("reserved opcode 0".into()));
        }
    }

    if out.len() as u64 != target_size {
        return Err(PackError::InvalidDelta(format!(
            "target size mismatch: expected {target_size}, produced {}",
            out.len()
        )));
    }
    Ok(out)
}

/// Encode `target` as a delta against `base`.
///
/// Copies the longest common prefix and suffix and inserts whatever lies
/// between. Not as tight as a sliding-window matcher, but always valid.
pub fn encode_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_varint(&mut out, base.len() as u64);
    encode_varint(&mut out, target.len() as u64);

    let limit = base.len().min(target.len());
    let prefix = base
        .iter()
        .zip(target)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = base[prefix..]
        .iter()
        .rev()
        .zip(target[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count()
        .min(limit - prefix);

    emit_copy(&mut out, 0, prefix);
    emit_insert(&mut out, &target[prefix..target.len() - suffix]);
    emit_copy(&mut out, base.len() - suffix, suffix);
    out
}

fn emit_copy(out: &mut Vec<u8>, mut offset: usize, mut len: usize) {
    while len > 0 {
        let chunk = len.min(MAX_COPY);
        let mut op = 0x80u8;
        let mut args = Vec::with_capacity(7);
        for i in 0..4 {
            let byte = ((offset >> (8 * i)) & 0xff) as u8;
            if byte != 0 {
                op |= 1 << i;
                args.push(byte);
            }
        }
        for i in 0..3 {
            let byte = ((chunk >> (8 * i)) & 0xff) as u8;
            if byte != 0 {
                op |= 0x10 << i;
                args.push(byte);
            }
        }
        out.push(op);
        out.extend_from_slice(&args);
        offset += chunk;
        len -= chunk;
    }
}

fn emit_insert(out: &mut Vec<u8>, literal: &[u8]) {
    for chunk in literal.chunks(MAX_INSERT) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
}

fn next_byte(data: &[u8], pos: &mut usize) -> PackResult<u8> {
    let byte = *data
        .get(*pos)
        .ok_or_else(|| PackError::InvalidDelta("truncated copy instruction".into()))?;
    *pos += 1;
    Ok(byte)
}

/// Encode a u64 as a variable-length integer.
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer. Returns (value, bytes_consumed).
pub(crate) fn decode_varint(data: &[u8]) -> PackResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err(PackError::InvalidDelta("varint overflow".into()));
        }
    }
    Err(PackError::InvalidDelta("truncated varint".into()))
}
