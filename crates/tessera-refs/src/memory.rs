//! In-memory reference store for testing and ephemeral use.
//!
//! [`InMemoryRefStore`] stores all refs in a `HashMap` protected by a
//! `RwLock`. Compare-and-swap holds the write lock across the read, the
//! comparison and the write.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::error::{RefError, RefResult};
use crate::names::validate_reference_name;
use crate::traits::{RefIter, RefStore};
use crate::types::Reference;

/// An in-memory implementation of [`RefStore`].
///
/// Data is lost when the store is dropped.
#[derive(Debug, Default)]
pub struct InMemoryRefStore {
    refs: RwLock<HashMap<String, Reference>>,
}

impl InMemoryRefStore {
    /// Create a new empty ref store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RefStore for InMemoryRefStore {
    fn set_ref(&self, reference: &Reference) -> RefResult<()> {
        validate_reference_name(reference.name())?;
        let mut refs = self.refs.write().expect("lock poisoned");
        refs.insert(reference.name().to_string(), reference.clone());
        Ok(())
    }

    fn check_and_set_ref(&self, new: &Reference, old: Option<&Reference>) -> RefResult<()> {
        validate_reference_name(new.name())?;
        let mut refs = self.refs.write().expect("lock poisoned");
        if let Some(old) = old {
            let unchanged = refs
                .get(new.name())
                .is_some_and(|current| current.same_target(old));
            if !unchanged {
                debug!(name = new.name(), "reference changed since it was read");
                return Err(RefError::HasChanged {
                    name: new.name().to_string(),
                });
            }
        }
        refs.insert(new.name().to_string(), new.clone());
        Ok(())
    }

    fn get_ref(&self, name: &str) -> RefResult<Reference> {
        let refs = self.refs.read().expect("lock poisoned");
        refs.get(name).cloned().ok_or_else(|| RefError::not_found(name))
    }

    fn remove_ref(&self, name: &str) -> RefResult<()> {
        let mut refs = self.refs.write().expect("lock poisoned");
        refs.remove(name);
        Ok(())
    }

    fn iter_refs(&self) -> RefResult<RefIter<'_>> {
        let refs = self.refs.read().expect("lock poisoned");
        let mut snapshot: Vec<Reference> = refs.values().cloned().collect();
        snapshot.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn count_refs(&self) -> RefResult<usize> {
        Ok(self.refs.read().expect("lock poisoned").len())
    }
}
