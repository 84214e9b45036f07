//! File-backed directory tests.

use std::sync::Arc;
use std::thread;
use tempfile::tempdir;
use treesync_core::{
    BaseTransaction, CoreError, Directory, DirectoryConfig, EntryKernel, Id, Update,
};

fn server_entry(id: &str, parent: Id, name: &str, version: i64, is_dir: bool) -> EntryKernel {
    EntryKernel::from_update(&Update::new(Id::server(id), parent, name, version, is_dir))
}

#[test]
fn committed_state_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = Directory::open_path(dir.path(), "account", DirectoryConfig::default()).unwrap();
        let mut wtx = store.write();
        wtx.create_entry(server_entry("1", Id::root(), "Docs", 1, true))
            .unwrap();
        wtx.create_entry(server_entry("2", Id::server("1"), "a.txt", 2, false))
            .unwrap();
        wtx.set_last_sync_timestamp(10);
        wtx.set_store_birthday(Some("b-1".into()));
        wtx.put_unapplied(Update::new(Id::server("3"), Id::server("x"), "b", 4, false));
        wtx.commit().unwrap();
    }

    let store = Directory::open_path(dir.path(), "account", DirectoryConfig::default()).unwrap();
    let rtx = store.read();
    assert_eq!(rtx.last_sync_timestamp(), 10);
    assert_eq!(rtx.store_birthday(), Some("b-1"));
    assert_eq!(
        rtx.lookup_child_by_name(&Id::server("1"), "a.txt").unwrap().id,
        Id::server("2")
    );
    assert_eq!(rtx.unapplied_updates().len(), 1);
}

#[test]
fn cache_guid_is_stable_across_reopen() {
    let dir = tempdir().unwrap();
    let guid = {
        let store = Directory::open_path(dir.path(), "account", DirectoryConfig::default()).unwrap();
        let mut wtx = store.write();
        wtx.set_last_sync_timestamp(1);
        wtx.commit().unwrap();
        let guid = store.read().cache_guid();
        guid
    };
    let store = Directory::open_path(dir.path(), "account", DirectoryConfig::default()).unwrap();
    assert_eq!(store.read().cache_guid(), guid);
}

#[test]
fn aborted_changes_are_not_persisted() {
    let dir = tempdir().unwrap();
    {
        let store = Directory::open_path(dir.path(), "account", DirectoryConfig::default()).unwrap();
        let mut wtx = store.write();
        wtx.create_entry(server_entry("1", Id::root(), "Docs", 1, true))
            .unwrap();
        wtx.commit().unwrap();

        let mut wtx = store.write();
        wtx.create_entry(server_entry("2", Id::root(), "Temp", 1, true))
            .unwrap();
        wtx.abort();
    }

    let store = Directory::open_path(dir.path(), "account", DirectoryConfig::default()).unwrap();
    let rtx = store.read();
    assert!(rtx.get_entry(&Id::server("1")).is_some());
    assert!(rtx.get_entry(&Id::server("2")).is_none());
}

#[test]
fn second_opener_is_locked_out() {
    let dir = tempdir().unwrap();
    let _first = Directory::open_path(dir.path(), "account", DirectoryConfig::default()).unwrap();
    let second = Directory::open_path(dir.path(), "account", DirectoryConfig::default());
    assert!(matches!(second, Err(CoreError::DirectoryLocked)));
}

#[test]
fn corrupt_snapshot_fails_to_open() {
    let dir = tempdir().unwrap();
    {
        let store = Directory::open_path(dir.path(), "account", DirectoryConfig::default()).unwrap();
        let mut wtx = store.write();
        wtx.set_last_sync_timestamp(3);
        wtx.commit().unwrap();
    }

    let path = dir.path().join("SNAPSHOT");
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x55;
    std::fs::write(&path, bytes).unwrap();

    let result = Directory::open_path(dir.path(), "account", DirectoryConfig::default());
    assert!(matches!(result, Err(CoreError::Corrupted { .. })));
}

#[test]
fn writers_are_serialized() {
    let store = Arc::new(Directory::open_in_memory("account"));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for j in 0..25 {
                    let mut wtx = store.write();
                    let name = format!("f-{i}-{j}");
                    wtx.create_entry(EntryKernel::new_local(Id::root(), name, false))
                        .unwrap();
                    wtx.commit().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rtx = store.read();
    assert_eq!(rtx.children(&Id::root()).len(), 200);
}
