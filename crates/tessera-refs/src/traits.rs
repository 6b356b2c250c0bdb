//! The [`RefStore`] trait defining the reference storage interface.

use crate::error::{RefError, RefResult};
use crate::types::{Reference, ReferenceTarget};

/// Symbolic references are followed at most this many hops.
pub const MAX_RESOLVE_DEPTH: usize = 10;

/// Lazy, finite sequence of references produced by [`RefStore::iter_refs`].
pub type RefIter<'a> = Box<dyn Iterator<Item = RefResult<Reference>> + Send + 'a>;

/// Storage backend for named references.
///
/// Implementations must be thread-safe (`Send + Sync`). Names are unique
/// keys; `check_and_set_ref` is atomic with respect to every other writer on
/// the same store instance.
pub trait RefStore: Send + Sync {
    /// Create or overwrite a reference unconditionally.
    fn set_ref(&self, reference: &Reference) -> RefResult<()>;

    /// Write `new` only if the stored reference of the same name currently
    /// has the same target as `old`.
    ///
    /// `None` skips the comparison, so the write is unconditional. A
    /// mismatch, including a missing reference when `old` is `Some`, fails
    /// with [`RefError::HasChanged`] and leaves the store untouched.
    fn check_and_set_ref(&self, new: &Reference, old: Option<&Reference>) -> RefResult<()>;

    /// Read a reference by name. Fails with [`RefError::NotFound`] if absent.
    fn get_ref(&self, name: &str) -> RefResult<Reference>;

    /// Delete a reference. Removing a missing name is a no-op.
    fn remove_ref(&self, name: &str) -> RefResult<()>;

    /// Iterate over every reference, sorted by name. Each call starts over.
    fn iter_refs(&self) -> RefResult<RefIter<'_>>;

    /// Number of stored references.
    fn count_refs(&self) -> RefResult<usize> {
        let mut count = 0;
        for reference in self.iter_refs()? {
            reference?;
            count += 1;
        }
        Ok(count)
    }

    /// List references whose name starts with `prefix`.
    ///
    /// Pass `""` to list all refs. Pass `"refs/heads/"` for branches only.
    fn list_refs(&self, prefix: &str) -> RefResult<Vec<Reference>> {
        let mut out = Vec::new();
        for reference in self.iter_refs()? {
            let reference = reference?;
            if reference.name().starts_with(prefix) {
                out.push(reference);
            }
        }
        Ok(out)
    }

    /// Follow symbolic references from `name` down to a hash reference.
    fn resolve_ref(&self, name: &str) -> RefResult<Reference> {
        let mut current = self.get_ref(name)?;
        let mut hops = 0;
        while let ReferenceTarget::Symbolic(next) = current.target() {
            if hops == MAX_RESOLVE_DEPTH {
                return Err(RefError::SymbolicLoop {
                    name: name.to_string(),
                });
            }
            hops += 1;
            current = self.get_ref(next)?;
        }
        Ok(current)
    }
}
