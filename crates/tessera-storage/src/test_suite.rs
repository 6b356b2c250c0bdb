//! Behaviour every [`Storer`] must share, run against each backend.
//!
//! Each case is a plain function over `&dyn Storer`;
//! `storage_conformance_tests!` stamps out one `#[test]` per case for a
//! backend constructor.

use std::io::Write;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use tessera_index::{EntryMode, Index};
use tessera_pack::PackWriter;
use tessera_refs::{RefError, RefStore, Reference};
use tessera_store::{EncodedObject, ObjectKind, ObjectStore, PackedObject, StoreError};
use tessera_types::ObjectId;

use crate::config::{Config, RemoteConfig};
use crate::error::ErrorKind;
use crate::filesystem::{FilesystemStorage, MemFilesystem, Options, OsFilesystem};
use crate::memory::MemoryStorage;
use crate::traits::Storer;
use crate::transactional::TransactionalStorage;
use crate::update::update_object_storage;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub(crate) struct Harness {
    pub storer: Arc<dyn Storer>,
    /// Keeps an on-disk backend's directory alive for the test.
    _dir: Option<TempDir>,
}

impl Harness {
    fn new(storer: impl Storer + 'static) -> Self {
        Self {
            storer: Arc::new(storer),
            _dir: None,
        }
    }

    fn on_disk(options: Options) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(OsFilesystem::new(dir.path()));
        Self {
            storer: Arc::new(FilesystemStorage::with_options(fs, options)),
            _dir: Some(dir),
        }
    }
}

macro_rules! storage_conformance_tests {
    (@cases $($case:ident),* $(,)?) => {
        $(
            #[test]
            fn $case() {
                let harness = harness();
                super::$case(harness.storer.as_ref());
            }
        )*
    };
    ($backend:ident, $make:expr) => {
        mod $backend {
            use super::*;

            fn harness() -> Harness {
                $make
            }

            storage_conformance_tests!(@cases
                put_and_get_known_hashes,
                put_rejects_non_storable_kinds,
                put_is_idempotent,
                iter_filters_by_kind,
                packfile_ingestion_resolves_every_object,
                packfile_writer_accepts_chunks,
                delta_reads_keep_stored_form,
                object_transaction_commit_and_rollback,
                set_and_get_reference,
                check_and_set_with_current_value,
                check_and_set_without_expectation,
                check_and_set_with_stale_value,
                concurrent_check_and_set_has_one_winner,
                remove_reference,
                remove_missing_reference_is_noop,
                get_missing_reference,
                iter_references,
                only_refs_and_root_refs_are_accepted,
                shallow_roundtrip,
                config_roundtrip,
                invalid_config_is_rejected,
                index_defaults_and_roundtrip,
                module_is_idempotent,
            );
        }
    };
}

storage_conformance_tests!(memory, Harness::new(MemoryStorage::new()));

storage_conformance_tests!(filesystem_os, Harness::on_disk(Options::default()));

storage_conformance_tests!(
    filesystem_exclusive,
    Harness::on_disk(Options {
        exclusive_access: true
    })
);

storage_conformance_tests!(
    filesystem_in_memory,
    Harness::new(FilesystemStorage::new(Arc::new(MemFilesystem::new())))
);

storage_conformance_tests!(
    transactional_memory,
    Harness::new(TransactionalStorage::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(MemoryStorage::new()),
    ))
);

storage_conformance_tests!(
    transactional_filesystem,
    Harness::new(TransactionalStorage::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(FilesystemStorage::new(Arc::new(MemFilesystem::new()))),
    ))
);

// ---------------------------------------------------------------------------
// Fixture pack
// ---------------------------------------------------------------------------

pub(crate) struct Fixture {
    pub pack: Vec<u8>,
    /// Every object the pack resolves to.
    pub objects: Vec<EncodedObject>,
    /// A blob stored as an offset delta.
    pub ofs_delta: EncodedObject,
    /// The full blob `ofs_delta` is encoded against.
    pub ofs_base: EncodedObject,
}

fn blob(content: &str) -> EncodedObject {
    EncodedObject::new(ObjectKind::Blob, content.as_bytes().to_vec())
}

fn appended(base: &EncodedObject, extra: &str) -> EncodedObject {
    let mut data = base.data().to_vec();
    data.extend_from_slice(extra.as_bytes());
    EncodedObject::new(base.kind(), data)
}

/// 31 objects: ten full blobs, ten offset deltas on them, five reference
/// deltas on those, a reference delta written before its base, the base,
/// two trees, a commit and a tag.
pub(crate) fn fixture() -> Fixture {
    let mut writer = PackWriter::new();
    let mut objects = Vec::new();

    let mut bases = Vec::new();
    for i in 0..10 {
        let base = blob(&format!(
            "file {i}\n{}",
            "a line every revision keeps\n".repeat(6)
        ));
        bases.push((writer.add_object(base.clone()), base.clone()));
        objects.push(base);
    }

    let mut revisions = Vec::new();
    for (at, base) in &bases {
        let revision = appended(base, "revision one\n");
        writer.add_ofs_delta(*at, revision.clone()).unwrap();
        revisions.push(revision.clone());
        objects.push(revision);
    }

    for revision in revisions.iter().take(5) {
        let next = appended(revision, "revision two\n");
        writer.add_ref_delta(revision, next.clone()).unwrap();
        objects.push(next);
    }

    let late_base = blob("this base is written after the delta that needs it\n");
    let forward = appended(&late_base, "and a little more\n");
    writer.add_ref_delta(&late_base, forward.clone()).unwrap();
    writer.add_object(late_base.clone());
    objects.push(forward);
    objects.push(late_base);

    let empty_tree = EncodedObject::new(ObjectKind::Tree, Vec::new());
    let mut entry = b"100644 README\0".to_vec();
    entry.extend_from_slice(objects[0].id().as_bytes());
    let tree = EncodedObject::new(ObjectKind::Tree, entry);
    let commit = EncodedObject::new(
        ObjectKind::Commit,
        format!(
            "tree {}\nauthor A <a@example.com> 1700000000 +0000\n\
             committer A <a@example.com> 1700000000 +0000\n\nfixture\n",
            tree.id()
        )
        .into_bytes(),
    );
    let tag = EncodedObject::new(
        ObjectKind::Tag,
        format!("object {}\ntype commit\ntag v1\n\nrelease\n", commit.id()).into_bytes(),
    );
    for object in [empty_tree, tree, commit, tag] {
        writer.add_object(object.clone());
        objects.push(object);
    }

    let (pack, _) = writer.finish().unwrap();
    Fixture {
        pack,
        objects,
        ofs_delta: revisions[0].clone(),
        ofs_base: bases[0].1.clone(),
    }
}

fn hash_ref(name: &str, hex: &str) -> Reference {
    Reference::from_strings(name, hex).unwrap()
}

const FOO: &str = "refs/heads/foo";
const BAR: &str = "refs/heads/bar";

const HASH_A: &str = "bc9968d75e48de59f0870ffb71f5e160bbbdcf52";
const HASH_B: &str = "482e0eada5de4039e6f216b45b3c9b683b83bfa0";
const HASH_C: &str = "c3f4688a08fd86f1bf8e055724c84b7a40a09733";

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

fn put_and_get_known_hashes(storer: &dyn Storer) {
    let expected = [
        (ObjectKind::Commit, "dcf5b16e76cce7425d0beaef62d79a7d10fce1f5"),
        (ObjectKind::Tree, "4b825dc642cb6eb9a060e54bf8d69288fbee4904"),
        (ObjectKind::Blob, "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"),
        (ObjectKind::Tag, "d994c6bb648123a17e8f70a966857c546b2a6f94"),
    ];
    for (kind, hex) in expected {
        let id = storer.put(&EncodedObject::new(kind, Vec::new())).unwrap();
        assert_eq!(id.to_hex(), hex);

        let object = storer.get(kind, &id).unwrap();
        assert_eq!(object.kind(), kind);
        assert_eq!(object.id(), id);
        assert_eq!(storer.get(ObjectKind::Any, &id).unwrap().kind(), kind);

        for other in ObjectKind::STORABLE.into_iter().filter(|k| *k != kind) {
            assert!(storer.get(other, &id).unwrap_err().is_not_found());
        }
    }
}

fn put_rejects_non_storable_kinds(storer: &dyn Storer) {
    for kind in [ObjectKind::OfsDelta, ObjectKind::RefDelta, ObjectKind::Any] {
        let err = storer
            .put(&EncodedObject::new(kind, b"payload".to_vec()))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidObjectKind(k) if k == kind));
    }
    assert_eq!(storer.iter(ObjectKind::Any).unwrap().count(), 0);
}

fn put_is_idempotent(storer: &dyn Storer) {
    let object = blob("stored twice");
    let first = storer.put(&object).unwrap();
    let second = storer.put(&object).unwrap();
    assert_eq!(first, second);
    assert_eq!(storer.iter(ObjectKind::Any).unwrap().count(), 1);
}

fn iter_filters_by_kind(storer: &dyn Storer) {
    for kind in ObjectKind::STORABLE {
        storer.put(&EncodedObject::new(kind, Vec::new())).unwrap();
    }
    for kind in ObjectKind::STORABLE {
        let found: Vec<_> = storer
            .iter(kind)
            .unwrap()
            .map(|object| object.unwrap())
            .collect();
        assert_eq!(found.len(), 1, "{kind}");
        assert_eq!(found[0].kind(), kind);
    }
    assert_eq!(storer.iter(ObjectKind::Any).unwrap().count(), 4);
    assert_eq!(storer.iter(ObjectKind::Any).unwrap().count(), 4);
}

fn packfile_ingestion_resolves_every_object(storer: &dyn Storer) {
    let fixture = fixture();
    assert_eq!(fixture.objects.len(), 31);
    assert_eq!(update_object_storage(storer, &fixture.pack).unwrap(), 31);
    assert_eq!(storer.iter(ObjectKind::Any).unwrap().count(), 31);

    for object in &fixture.objects {
        assert_eq!(&storer.get(ObjectKind::Any, &object.id()).unwrap(), object);
    }
    let resolved = storer
        .get(ObjectKind::Any, &fixture.ofs_delta.id())
        .unwrap();
    assert_eq!(resolved.kind(), ObjectKind::Blob);
    assert_eq!(resolved.id(), fixture.ofs_delta.id());
}

fn packfile_writer_accepts_chunks(storer: &dyn Storer) {
    let Some(packfiles) = storer.packfile_store() else {
        return;
    };
    let fixture = fixture();
    let mut writer = packfiles.packfile_writer().unwrap();
    for chunk in fixture.pack.chunks(97) {
        writer.write_all(chunk).unwrap();
    }
    assert_eq!(writer.close().unwrap(), 31);
    assert_eq!(storer.iter(ObjectKind::Any).unwrap().count(), 31);
}

fn delta_reads_keep_stored_form(storer: &dyn Storer) {
    let Some(deltas) = storer.delta_store() else {
        return;
    };
    let fixture = fixture();
    update_object_storage(storer, &fixture.pack).unwrap();

    let target = fixture.ofs_delta.id();
    match deltas.get_delta(ObjectKind::Any, &target).unwrap() {
        PackedObject::Delta(delta) => {
            assert_eq!(delta.kind(), ObjectKind::OfsDelta);
            assert_eq!(delta.resolved_kind(), ObjectKind::Blob);
            assert_eq!(delta.id(), target);
        }
        other => panic!("expected a delta entry, got {other:?}"),
    }
    assert!(matches!(
        deltas.get_delta(ObjectKind::Blob, &fixture.ofs_base.id()).unwrap(),
        PackedObject::Resolved(object) if object == fixture.ofs_base
    ));
    assert!(deltas
        .get_delta(ObjectKind::Tree, &target)
        .unwrap_err()
        .is_not_found());
}

fn object_transaction_commit_and_rollback(storer: &dyn Storer) {
    let Some(transactions) = storer.transactioner() else {
        return;
    };
    let kept = blob("committed in a transaction");
    let mut txn = transactions.begin();
    let id = txn.put(&kept).unwrap();
    assert_eq!(txn.get(ObjectKind::Blob, &id).unwrap(), kept);
    assert!(txn
        .get(ObjectKind::Blob, &blob("never stored").id())
        .unwrap_err()
        .is_not_found());
    assert!(storer.get(ObjectKind::Blob, &id).unwrap_err().is_not_found());
    txn.commit().unwrap();
    assert_eq!(storer.get(ObjectKind::Blob, &id).unwrap(), kept);

    let dropped = blob("rolled back");
    let mut txn = transactions.begin();
    let id = txn.put(&dropped).unwrap();
    txn.rollback().unwrap();
    assert!(storer.get(ObjectKind::Blob, &id).unwrap_err().is_not_found());
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

fn set_and_get_reference(storer: &dyn Storer) {
    storer.set_ref(&hash_ref(FOO, HASH_A)).unwrap();
    storer.set_ref(&hash_ref(BAR, HASH_B)).unwrap();
    assert_eq!(storer.get_ref(FOO).unwrap().target().to_string(), HASH_A);
    assert_eq!(storer.get_ref(BAR).unwrap().target().to_string(), HASH_B);
}

fn check_and_set_with_current_value(storer: &dyn Storer) {
    storer.set_ref(&hash_ref(FOO, HASH_B)).unwrap();
    storer
        .check_and_set_ref(&hash_ref(FOO, HASH_A), Some(&hash_ref(FOO, HASH_B)))
        .unwrap();
    assert_eq!(storer.get_ref(FOO).unwrap().target().to_string(), HASH_A);
}

fn check_and_set_without_expectation(storer: &dyn Storer) {
    storer.set_ref(&hash_ref(FOO, HASH_B)).unwrap();
    storer
        .check_and_set_ref(&hash_ref(FOO, HASH_A), None)
        .unwrap();
    assert_eq!(storer.get_ref(FOO).unwrap().target().to_string(), HASH_A);
}

fn check_and_set_with_stale_value(storer: &dyn Storer) {
    storer.set_ref(&hash_ref(FOO, HASH_C)).unwrap();
    let err = storer
        .check_and_set_ref(&hash_ref(FOO, HASH_A), Some(&hash_ref(FOO, HASH_B)))
        .unwrap_err();
    assert!(matches!(err, RefError::HasChanged { .. }));
    assert_eq!(storer.get_ref(FOO).unwrap().target().to_string(), HASH_C);
}

fn concurrent_check_and_set_has_one_winner(storer: &dyn Storer) {
    let old = hash_ref("refs/heads/race", HASH_A);
    storer.set_ref(&old).unwrap();
    let winners = thread::scope(|scope| {
        let handles: Vec<_> = (1..=8u8)
            .map(|i| {
                let old = &old;
                scope.spawn(move || {
                    let new = Reference::hash("refs/heads/race", ObjectId::from_hash([i; 20]));
                    storer.check_and_set_ref(&new, Some(old)).is_ok()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count()
    });
    assert_eq!(winners, 1);
    assert!(!storer.get_ref("refs/heads/race").unwrap().same_target(&old));
}

fn remove_reference(storer: &dyn Storer) {
    storer.set_ref(&hash_ref(FOO, HASH_A)).unwrap();
    storer.remove_ref(FOO).unwrap();
    assert!(storer.get_ref(FOO).unwrap_err().is_not_found());
}

fn remove_missing_reference_is_noop(storer: &dyn Storer) {
    storer.set_ref(&hash_ref(FOO, HASH_A)).unwrap();
    storer.remove_ref("refs/heads/nonexistent").unwrap();
    assert_eq!(storer.get_ref(FOO).unwrap().target().to_string(), HASH_A);
}

fn get_missing_reference(storer: &dyn Storer) {
    assert!(matches!(
        storer.get_ref(BAR),
        Err(RefError::NotFound { name }) if name == BAR
    ));
}

fn iter_references(storer: &dyn Storer) {
    storer.set_ref(&hash_ref("refs/foo", HASH_A)).unwrap();
    for _ in 0..2 {
        let refs: Vec<_> = storer
            .iter_refs()
            .unwrap()
            .map(|reference| reference.unwrap())
            .collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name(), "refs/foo");
        assert_eq!(refs[0].target().to_string(), HASH_A);
    }
}

fn only_refs_and_root_refs_are_accepted(storer: &dyn Storer) {
    for name in ["foo", "config", "index", "packed-refs", "objects/ab/cdef"] {
        assert!(
            matches!(
                storer.set_ref(&hash_ref(name, HASH_A)),
                Err(RefError::InvalidName { .. })
            ),
            "{name}"
        );
        assert!(storer.get_ref(name).unwrap_err().is_not_found(), "{name}");
    }

    storer.set_ref(&hash_ref("ORIG_HEAD", HASH_A)).unwrap();
    storer.set_ref(&hash_ref("refs/foo", HASH_B)).unwrap();
    let names: Vec<String> = storer
        .iter_refs()
        .unwrap()
        .map(|reference| reference.unwrap().name().to_string())
        .collect();
    assert_eq!(names, ["ORIG_HEAD", "refs/foo"]);
    assert_eq!(storer.count_refs().unwrap(), 2);
    assert_eq!(storer.list_refs("refs/").unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Auxiliary stores
// ---------------------------------------------------------------------------

fn shallow_roundtrip(storer: &dyn Storer) {
    assert!(storer.shallow().unwrap().is_empty());
    let commits: Vec<ObjectId> = [
        "b66c08ba28aa1f81eb06a1127aa3936ff77e5e2c",
        "c3f4688a08fd86f1bf8e055724c84b7a40a09733",
        "c78874f116be67ecf54df225a613162b84cc6ebf",
    ]
    .iter()
    .map(|hex| ObjectId::from_hex(hex).unwrap())
    .collect();
    storer.set_shallow(&commits).unwrap();
    assert_eq!(storer.shallow().unwrap(), commits);
}

fn config_roundtrip(storer: &dyn Storer) {
    assert_eq!(storer.config().unwrap(), Config::default());

    let mut config = Config::new();
    config.core.is_bare = true;
    config.add_remote(RemoteConfig::new("foo", "http://foo/bar.git"));
    storer.set_config(&config).unwrap();

    let read = storer.config().unwrap();
    assert!(read.core.is_bare);
    assert_eq!(read.remotes, config.remotes);
    assert_eq!(read, config);
}

fn invalid_config_is_rejected(storer: &dyn Storer) {
    let mut valid = Config::new();
    valid.core.is_bare = true;
    storer.set_config(&valid).unwrap();

    let mut invalid = Config::new();
    invalid.remotes.insert(
        "foo".into(),
        RemoteConfig {
            urls: vec!["http://foo/bar.git".into()],
            ..RemoteConfig::default()
        },
    );
    let err = storer.set_config(&invalid).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    assert_eq!(storer.config().unwrap(), valid);
}

fn index_defaults_and_roundtrip(storer: &dyn Storer) {
    let initial = storer.index().unwrap();
    assert_eq!(initial.version, 2);
    assert!(initial.is_empty());

    let mut index = Index::new();
    index
        .stage_object(
            "src/main.rs",
            ObjectId::from_hex(HASH_A).unwrap(),
            EntryMode::Regular,
            12,
        )
        .unwrap();
    storer.set_index(&index).unwrap();
    assert_eq!(storer.index().unwrap(), index);
}

fn module_is_idempotent(storer: &dyn Storer) {
    let first = storer.module("foo").unwrap();
    let second = storer.module("foo").unwrap();
    first.set_ref(&hash_ref("refs/heads/main", HASH_A)).unwrap();
    assert_eq!(
        second.get_ref("refs/heads/main").unwrap().target().to_string(),
        HASH_A
    );
    assert!(storer.get_ref("refs/heads/main").unwrap_err().is_not_found());
}

// ---------------------------------------------------------------------------
// Cross-backend scenarios
// ---------------------------------------------------------------------------

#[test]
fn transaction_commit_publishes_staged_pack() {
    let base = Arc::new(MemoryStorage::new());
    let temporal = Arc::new(FilesystemStorage::new(Arc::new(MemFilesystem::new())));
    let tx = TransactionalStorage::new(
        Arc::clone(&base) as Arc<dyn Storer>,
        Arc::clone(&temporal) as Arc<dyn Storer>,
    );

    let fixture = fixture();
    assert_eq!(update_object_storage(&tx, &fixture.pack).unwrap(), 31);
    assert_eq!(temporal.objects().pack_count().unwrap(), 1);
    assert_eq!(base.objects().len(), 0);

    let head = fixture.objects.last().unwrap().id();
    tx.set_ref(&Reference::hash("refs/tags/v1", head)).unwrap();
    tx.commit().unwrap();

    assert_eq!(base.objects().len(), 31);
    assert_eq!(base.get_ref("refs/tags/v1").unwrap().hash_target(), Some(head));
}

#[test]
fn on_disk_storage_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = fixture();
    {
        let storage = FilesystemStorage::open(dir.path());
        update_object_storage(&storage, &fixture.pack).unwrap();
        storage.put(&blob("loose one")).unwrap();
        storage
            .set_ref(&Reference::hash("refs/heads/main", fixture.ofs_delta.id()))
            .unwrap();
        storage.set_ref(&Reference::symbolic("HEAD", "refs/heads/main")).unwrap();
    }

    let reopened = FilesystemStorage::open(dir.path());
    assert_eq!(reopened.iter(ObjectKind::Any).unwrap().count(), 32);
    let head = reopened.resolve_ref("HEAD").unwrap();
    assert_eq!(
        reopened
            .get(ObjectKind::Blob, &head.hash_target().unwrap())
            .unwrap(),
        fixture.ofs_delta
    );
}
