use sha1::{Digest, Sha1};
use tessera_types::{ObjectId, OBJECT_ID_LEN};

/// Kind-framed SHA-1 content hasher.
///
/// Each hasher carries a kind tag (e.g. `"blob"`, `"commit"`) that is framed
/// together with the content length in front of the content, exactly as git
/// frames loose objects: `"<kind> <len>\0" ++ content`. Two objects with
/// identical bytes but different kinds therefore hash differently.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for commit objects.
    pub const COMMIT: Self = Self { domain: "commit" };
    /// Hasher for tree objects.
    pub const TREE: Self = Self { domain: "tree" };
    /// Hasher for blob objects.
    pub const BLOB: Self = Self { domain: "blob" };
    /// Hasher for annotated tag objects.
    pub const TAG: Self = Self { domain: "tag" };

    /// Create a hasher with a custom kind tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash content with kind and length framing.
    pub fn hash(&self, data: &[u8]) -> ObjectId {
        let mut hasher = Sha1::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(data);
        ObjectId::from_hash(hasher.finalize().into())
    }

    /// Verify that data produces the expected object ID.
    pub fn verify(&self, data: &[u8], expected: &ObjectId) -> bool {
        self.hash(data) == *expected
    }

    /// Raw SHA-1 without framing (pack trailers, index checksums).
    pub fn raw_hash(data: &[u8]) -> [u8; OBJECT_ID_LEN] {
        Sha1::digest(data).into()
    }

    /// The kind tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Incremental SHA-1 over a byte stream, used to build pack trailers while
/// entries are being appended.
#[derive(Clone, Default)]
pub struct StreamChecksum {
    inner: Sha1,
}

impl StreamChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(self) -> [u8; OBJECT_ID_LEN] {
        self.inner.finalize().into()
    }
}
