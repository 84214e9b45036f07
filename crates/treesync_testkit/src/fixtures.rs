//! Test fixtures and directory helpers.

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use treesync_core::{Directory, DirectoryConfig, EntryKernel, Id, Update};
use treesync_protocol::{SyncEntity, ROOT_ID};

/// A test directory with automatic cleanup.
pub struct TestDirectory {
    /// The directory, shareable with a syncer.
    pub dir: Arc<Directory>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDirectory {
    /// Creates a fresh in-memory directory.
    pub fn memory() -> Self {
        Self {
            dir: Arc::new(Directory::open_in_memory("test@example.com")),
            _temp_dir: None,
        }
    }

    /// Creates a fresh file-backed directory in a temp dir.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = Directory::open_path(
            &temp_dir.path().join("store"),
            "test@example.com",
            DirectoryConfig::default(),
        )
        .expect("Failed to open file directory");
        Self {
            dir: Arc::new(dir),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store path if file-based.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("store"))
    }

    /// Returns a shared handle to the directory.
    pub fn shared(&self) -> Arc<Directory> {
        Arc::clone(&self.dir)
    }
}

impl std::ops::Deref for TestDirectory {
    type Target = Directory;

    fn deref(&self) -> &Self::Target {
        &self.dir
    }
}

/// Inserts an entry that mirrors server state (not unsynced).
pub fn create_synced_entry(
    dir: &Directory,
    id: &str,
    parent: Id,
    name: &str,
    version: i64,
    is_dir: bool,
) -> Id {
    let entry = EntryKernel::from_update(&Update::new(Id::server(id), parent, name, version, is_dir));
    let mut wtx = dir.write();
    let id = wtx.create_entry(entry).expect("Failed to create synced entry");
    wtx.commit().expect("Failed to commit synced entry");
    id
}

/// Inserts a new local (unsynced) entry.
pub fn create_local_entry(dir: &Directory, parent: Id, name: &str, is_dir: bool) -> Id {
    let mut wtx = dir.write();
    let id = wtx
        .create_entry(EntryKernel::new_local(parent, name, is_dir))
        .expect("Failed to create local entry");
    wtx.commit().expect("Failed to commit local entry");
    id
}

/// Marks an existing entry as carrying local changes.
pub fn mark_unsynced(dir: &Directory, id: &Id) {
    let mut wtx = dir.write();
    wtx.mutate(id)
        .and_then(|mut e| e.put_is_unsynced(true))
        .expect("Failed to mark entry unsynced");
    wtx.commit().expect("Failed to commit");
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// `Docs` (id 1) with two files both named `a.txt` (ids 2 and 3, the
    /// second with a later mtime).
    pub fn docs_with_duplicate_names() -> Vec<SyncEntity> {
        vec![
            SyncEntity::folder("1", ROOT_ID, "Docs", 1).with_mtime(100),
            SyncEntity::file("2", "1", "a.txt", 2).with_mtime(200),
            SyncEntity::file("3", "1", "a.txt", 3).with_mtime(300),
        ]
    }

    /// A chain of `depth` nested folders listed leaf first.
    ///
    /// Folder `n{i}` is the parent of `n{i+1}`; `n0` sits under the root.
    pub fn reverse_chain(depth: usize) -> Vec<SyncEntity> {
        let mut chain: Vec<SyncEntity> = (0..depth)
            .map(|i| {
                let parent = if i == 0 {
                    ROOT_ID.to_string()
                } else {
                    format!("n{}", i - 1)
                };
                SyncEntity::folder(format!("n{i}"), parent, format!("level-{i}"), i as i64 + 1)
            })
            .collect();
        chain.reverse();
        chain
    }

    /// Seeds `A` under `B` under `C` under the root as synced folders.
    pub fn nested_abc(dir: &Directory) -> (Id, Id, Id) {
        let c = create_synced_entry(dir, "C", Id::root(), "C", 1, true);
        let b = create_synced_entry(dir, "B", c.clone(), "B", 1, true);
        let a = create_synced_entry(dir, "A", b.clone(), "A", 1, true);
        (a, b, c)
    }
}
