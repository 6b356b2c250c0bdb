use std::io::Write;

use tessera_pack::{ingest_packfile, StoreSink};
use tessera_store::ObjectStore;
use tracing::debug;

use crate::error::StorageResult;

/// Load a raw packfile into `store` and return how many objects it held.
///
/// Stores that accept packfiles directly keep the pack as-is; the rest get
/// every resolved object through `put`. Either way a corrupt pack fails
/// with a pack error, and objects stored before the failure stay stored.
pub fn update_object_storage<S: ObjectStore + ?Sized>(
    store: &S,
    pack: &[u8],
) -> StorageResult<usize> {
    if let Some(packfiles) = store.packfile_store() {
        debug!(bytes = pack.len(), "writing packfile through store");
        let mut writer = packfiles.packfile_writer()?;
        writer.write_all(pack)?;
        return Ok(writer.close()?);
    }
    debug!(bytes = pack.len(), "ingesting packfile object by object");
    let report = ingest_packfile(pack, &mut StoreSink::new(store))?;
    Ok(report.objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::filesystem::{FilesystemStorage, MemFilesystem};
    use crate::memory::MemoryStorage;
    use std::sync::Arc;
    use tessera_pack::PackWriter;
    use tessera_store::{EncodedObject, ObjectKind};

    fn small_pack() -> (Vec<u8>, EncodedObject) {
        let base = EncodedObject::new(ObjectKind::Blob, b"first line\nsecond line\n".to_vec());
        let target = EncodedObject::new(ObjectKind::Blob, b"first line\nsecond line\nthird\n".to_vec());
        let mut writer = PackWriter::new();
        let at = writer.add_object(base);
        writer.add_ofs_delta(at, target.clone()).unwrap();
        (writer.finish().unwrap().0, target)
    }

    #[test]
    fn resolves_into_plain_store() {
        let store = MemoryStorage::new();
        let (pack, target) = small_pack();
        assert_eq!(update_object_storage(&store, &pack).unwrap(), 2);
        assert_eq!(store.get(ObjectKind::Blob, &target.id()).unwrap(), target);
    }

    #[test]
    fn keeps_pack_in_pack_capable_store() {
        let store = FilesystemStorage::new(Arc::new(MemFilesystem::new()));
        let (pack, target) = small_pack();
        assert_eq!(update_object_storage(&store, &pack).unwrap(), 2);
        assert_eq!(store.objects().pack_count().unwrap(), 1);
        assert_eq!(store.get(ObjectKind::Blob, &target.id()).unwrap(), target);
    }

    #[test]
    fn truncated_pack_is_corrupt() {
        let store = MemoryStorage::new();
        let (pack, _) = small_pack();
        let err = update_object_storage(&store, &pack[..pack.len() - 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptPackfile);
    }
}
