use tessera_store::{DeltaBase, ObjectKind};
use tessera_types::ObjectId;

/// How a packfile entry is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    /// Complete object with its full data.
    Full(ObjectKind),
    /// Delta against the entry starting at `base_offset`.
    OfsDelta { base_offset: u64 },
    /// Delta against the object named `base`.
    RefDelta { base: ObjectId },
}

impl RecordKind {
    /// The 3-bit type code written in the entry header.
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Full(ObjectKind::Commit) => 1,
            Self::Full(ObjectKind::Tree) => 2,
            Self::Full(ObjectKind::Blob) => 3,
            Self::Full(ObjectKind::Tag) => 4,
            Self::OfsDelta { .. } => 6,
            Self::RefDelta { .. } => 7,
            // Unstorable kinds never reach an encoder.
            Self::Full(_) => 0,
        }
    }

    /// The object kind as stored: a content kind, or one of the delta kinds.
    pub fn object_kind(&self) -> ObjectKind {
        match self {
            Self::Full(kind) => *kind,
            Self::OfsDelta { .. } => ObjectKind::OfsDelta,
            Self::RefDelta { .. } => ObjectKind::RefDelta,
        }
    }

    /// The base reference for delta entries.
    pub fn delta_base(&self) -> Option<DeltaBase> {
        match self {
            Self::Full(_) => None,
            Self::OfsDelta { base_offset } => Some(DeltaBase::Offset(*base_offset)),
            Self::RefDelta { base } => Some(DeltaBase::Id(*base)),
        }
    }

    pub fn is_delta(&self) -> bool {
        !matches!(self, Self::Full(_))
    }
}

/// Parse a content-kind type code (1-4). Delta codes need extra header data
/// and are handled by the scanner.
pub fn kind_from_type_code(code: u8) -> Option<ObjectKind> {
    match code {
        1 => Some(ObjectKind::Commit),
        2 => Some(ObjectKind::Tree),
        3 => Some(ObjectKind::Blob),
        4 => Some(ObjectKind::Tag),
        _ => None,
    }
}

/// A single decoded packfile entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackRecord {
    /// Byte offset of the entry header from the start of the pack.
    pub offset: u64,
    /// Type of this entry.
    pub kind: RecordKind,
    /// Inflated payload: object content, or delta instructions.
    pub data: Vec<u8>,
    /// CRC32 of the raw entry bytes (header and compressed payload).
    pub crc32: u32,
}
