use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tessera_crypto::ContentHasher;
use tessera_types::ObjectId;

// ---------------------------------------------------------------------------
// ObjectKind
// ---------------------------------------------------------------------------

/// The kind of an object.
///
/// Only the four content kinds can be stored. The two delta kinds describe
/// packfile entries that still need resolving, and [`ObjectKind::Any`] is a
/// query-only wildcard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
    /// Delta against a base at a byte offset in the same packfile.
    OfsDelta,
    /// Delta against a base named by its object ID.
    RefDelta,
    /// Matches any stored kind when querying.
    Any,
}

impl ObjectKind {
    /// The kinds that can be stored and iterated.
    pub const STORABLE: [ObjectKind; 4] = [Self::Commit, Self::Tree, Self::Blob, Self::Tag];

    /// Returns `true` for kinds that may be written to a store.
    pub fn is_storable(&self) -> bool {
        matches!(self, Self::Commit | Self::Tree | Self::Blob | Self::Tag)
    }

    /// Returns `true` for the two delta kinds.
    pub fn is_delta(&self) -> bool {
        matches!(self, Self::OfsDelta | Self::RefDelta)
    }

    /// Whether an object stored as `stored` satisfies a query for `self`.
    pub fn matches(&self, stored: ObjectKind) -> bool {
        *self == Self::Any || *self == stored
    }

    /// Canonical lowercase name, as used in loose object headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
            Self::OfsDelta => "ofs-delta",
            Self::RefDelta => "ref-delta",
            Self::Any => "any",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown object kind: {0:?}")]
pub struct ParseKindError(pub String);

impl FromStr for ObjectKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(Self::Commit),
            "tree" => Ok(Self::Tree),
            "blob" => Ok(Self::Blob),
            "tag" => Ok(Self::Tag),
            "ofs-delta" => Ok(Self::OfsDelta),
            "ref-delta" => Ok(Self::RefDelta),
            "any" => Ok(Self::Any),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Hashing seam
// ---------------------------------------------------------------------------

/// The hash function that derives an [`ObjectId`] from a kind and content.
///
/// Stores hold one of these so the digest can be swapped without touching
/// any backend. Implementations must be deterministic.
pub trait ObjectHasher: Send + Sync {
    fn hash(&self, kind: ObjectKind, data: &[u8]) -> ObjectId;
}

/// Git-compatible SHA-1 hashing of `"<kind> <len>\0" ++ content`.
#[derive(Clone, Copy, Debug, Default)]
pub struct GitHasher;

impl ObjectHasher for GitHasher {
    fn hash(&self, kind: ObjectKind, data: &[u8]) -> ObjectId {
        let hasher = match kind {
            ObjectKind::Commit => ContentHasher::COMMIT,
            ObjectKind::Tree => ContentHasher::TREE,
            ObjectKind::Blob => ContentHasher::BLOB,
            ObjectKind::Tag => ContentHasher::TAG,
            other => ContentHasher::new(other.as_str()),
        };
        hasher.hash(data)
    }
}

// ---------------------------------------------------------------------------
// EncodedObject
// ---------------------------------------------------------------------------

/// An encoded object: kind tag + content bytes.
///
/// `EncodedObject` is the unit of storage. Its [`ObjectId`] is never stored;
/// it is derived from the kind and content on demand, so mutating the object
/// (via [`set_kind`](Self::set_kind) or [`io::Write`]) before storing it is
/// how objects are built incrementally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedObject {
    kind: ObjectKind,
    data: Vec<u8>,
}

impl EncodedObject {
    /// Create a new object from kind and content.
    pub fn new(kind: ObjectKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: ObjectKind) {
        self.kind = kind;
    }

    /// The content bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the object, returning its content.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Content length in bytes. Always equal to `data().len()`.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Compute the ID with the default [`GitHasher`].
    pub fn id(&self) -> ObjectId {
        self.id_with(&GitHasher)
    }

    /// Compute the ID with an injected hasher.
    pub fn id_with(&self, hasher: &dyn ObjectHasher) -> ObjectId {
        hasher.hash(self.kind, &self.data)
    }
}

impl Default for EncodedObject {
    /// A zero-valued blob with no content.
    fn default() -> Self {
        Self::new(ObjectKind::Blob, Vec::new())
    }
}

impl io::Write for EncodedObject {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Delta objects
// ---------------------------------------------------------------------------

/// The base a delta is applied against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeltaBase {
    /// Absolute byte offset of the base entry in the same packfile.
    Offset(u64),
    /// Object ID of the base, possibly outside the packfile.
    Id(ObjectId),
}

/// An object still held in delta form.
///
/// Not decodable on its own: applying `delta` to the base's content yields
/// the object identified by `id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeltaObject {
    kind: ObjectKind,
    base: DeltaBase,
    delta: Vec<u8>,
    id: ObjectId,
    resolved_kind: ObjectKind,
}

impl DeltaObject {
    /// `kind` must be [`ObjectKind::OfsDelta`] or [`ObjectKind::RefDelta`];
    /// `id` and `resolved_kind` describe the object the delta resolves to.
    pub fn new(
        kind: ObjectKind,
        base: DeltaBase,
        delta: Vec<u8>,
        id: ObjectId,
        resolved_kind: ObjectKind,
    ) -> Self {
        debug_assert!(kind.is_delta());
        Self {
            kind,
            base,
            delta,
            id,
            resolved_kind,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn base(&self) -> DeltaBase {
        self.base
    }

    /// The raw delta instruction stream.
    pub fn delta(&self) -> &[u8] {
        &self.delta
    }

    /// ID of the resolved object.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Kind of the resolved object (its ultimate non-delta ancestor's kind).
    pub fn resolved_kind(&self) -> ObjectKind {
        self.resolved_kind
    }

    /// Size of the base as recorded in the delta header.
    pub fn base_size(&self) -> Option<u64> {
        delta_header(&self.delta).map(|(base, _)| base)
    }

    /// Size of the resolved object as recorded in the delta header.
    pub fn target_size(&self) -> Option<u64> {
        delta_header(&self.delta).map(|(_, target)| target)
    }
}

/// Read the two little-endian base-128 sizes that open every delta.
fn delta_header(delta: &[u8]) -> Option<(u64, u64)> {
    let mut pos = 0;
    let mut next = || -> Option<u64> {
        let mut value = 0u64;
        let mut shift = 0;
        loop {
            let byte = *delta.get(pos)?;
            pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Some(value);
            }
            shift += 7;
            if shift >= 64 {
                return None;
            }
        }
    };
    let base = next()?;
    let target = next()?;
    Some((base, target))
}

/// What a delta-aware read returns: either the resolved object, or the
/// entry as it is physically stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PackedObject {
    Resolved(EncodedObject),
    Delta(DeltaObject),
}

impl PackedObject {
    /// Kind of the entry as stored (a delta kind for unresolved entries).
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Resolved(obj) => obj.kind(),
            Self::Delta(delta) => delta.kind(),
        }
    }

    /// ID of the (resolved) object.
    pub fn id(&self) -> ObjectId {
        match self {
            Self::Resolved(obj) => obj.id(),
            Self::Delta(delta) => delta.id(),
        }
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, Self::Delta(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_objects_hash_like_git() {
        let expected = [
            (ObjectKind::Commit, "dcf5b16e76cce7425d0beaef62d79a7d10fce1f5"),
            (ObjectKind::Tree, "4b825dc642cb6eb9a060e54bf8d69288fbee4904"),
            (ObjectKind::Blob, "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"),
            (ObjectKind::Tag, "d994c6bb648123a17e8f70a966857c546b2a6f94"),
        ];
        for (kind, hex) in expected {
            let obj = EncodedObject::new(kind, Vec::new());
            assert_eq!(obj.id().to_hex(), hex, "failed for {kind}");
        }
    }

    #[test]
    fn incremental_build_rehashes() {
        let mut obj = EncodedObject::default();
        let empty = obj.id();
        obj.write_all(b"hello\n").unwrap();
        assert_eq!(obj.size(), 6);
        assert_ne!(obj.id(), empty);
        assert_eq!(obj.id().to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");

        obj.set_kind(ObjectKind::Tag);
        assert_ne!(obj.id().to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn kind_matching() {
        assert!(ObjectKind::Any.matches(ObjectKind::Blob));
        assert!(ObjectKind::Blob.matches(ObjectKind::Blob));
        assert!(!ObjectKind::Tree.matches(ObjectKind::Blob));
    }

    #[test]
    fn only_content_kinds_are_storable() {
        for kind in ObjectKind::STORABLE {
            assert!(kind.is_storable());
        }
        assert!(!ObjectKind::OfsDelta.is_storable());
        assert!(!ObjectKind::RefDelta.is_storable());
        assert!(!ObjectKind::Any.is_storable());
    }

    #[test]
    fn kind_names_roundtrip() {
        for kind in [
            ObjectKind::Commit,
            ObjectKind::Tree,
            ObjectKind::Blob,
            ObjectKind::Tag,
            ObjectKind::OfsDelta,
            ObjectKind::RefDelta,
            ObjectKind::Any,
        ] {
            assert_eq!(kind.to_string().parse::<ObjectKind>().unwrap(), kind);
        }
        assert!("blobby".parse::<ObjectKind>().is_err());
    }

    #[test]
    fn delta_sizes_from_header() {
        // base size 300 (0xac 0x02), target size 5, then an insert op.
        let delta = vec![0xac, 0x02, 0x05, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let obj = DeltaObject::new(
            ObjectKind::OfsDelta,
            DeltaBase::Offset(12),
            delta,
            ObjectId::null(),
            ObjectKind::Blob,
        );
        assert_eq!(obj.base_size(), Some(300));
        assert_eq!(obj.target_size(), Some(5));
        assert_eq!(obj.resolved_kind(), ObjectKind::Blob);
    }

    #[test]
    fn truncated_delta_header_has_no_sizes() {
        let obj = DeltaObject::new(
            ObjectKind::RefDelta,
            DeltaBase::Id(ObjectId::null()),
            vec![0x80],
            ObjectId::null(),
            ObjectKind::Blob,
        );
        assert_eq!(obj.base_size(), None);
    }

    #[test]
    fn packed_object_reports_stored_kind() {
        let resolved = PackedObject::Resolved(EncodedObject::new(ObjectKind::Blob, b"x".to_vec()));
        assert_eq!(resolved.kind(), ObjectKind::Blob);
        assert!(!resolved.is_delta());

        let id = EncodedObject::new(ObjectKind::Blob, b"y".to_vec()).id();
        let delta = PackedObject::Delta(DeltaObject::new(
            ObjectKind::OfsDelta,
            DeltaBase::Offset(12),
            vec![1, 1, 1, b'y'],
            id,
            ObjectKind::Blob,
        ));
        assert_eq!(delta.kind(), ObjectKind::OfsDelta);
        assert_eq!(delta.id(), id);
    }
}
