//! The shared syncable store.

use crate::backing_store::{BackingStore, FileBackingStore, InMemoryBackingStore};
use crate::config::DirectoryConfig;
use crate::error::{CoreError, CoreResult};
use crate::kernel::Kernel;
use crate::transaction::{ReadTransaction, WriteTransaction};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// The syncable tree for one account.
///
/// Every read or write goes through a transaction. Readers share the
/// kernel lock; a [`WriteTransaction`] holds it exclusively until it is
/// committed or dropped, so foreground edits and the sync worker never see
/// each other's partial changes.
///
/// # Example
///
/// ```rust,ignore
/// let dir = Directory::open_in_memory("bookmarks");
/// let mut wtx = dir.write();
/// wtx.create_entry(EntryKernel::new_local(Id::root(), "Docs", true))?;
/// wtx.commit()?;
/// ```
pub struct Directory {
    name: String,
    config: DirectoryConfig,
    kernel: RwLock<Kernel>,
    store: Mutex<Box<dyn BackingStore>>,
    next_txid: AtomicU64,
}

impl Directory {
    /// Opens a directory over `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be loaded, or if there is no
    /// snapshot and `create_if_missing` is false.
    pub fn open(
        name: impl Into<String>,
        config: DirectoryConfig,
        mut store: Box<dyn BackingStore>,
    ) -> CoreResult<Self> {
        let name = name.into();
        let kernel = match store.load()? {
            Some(snapshot) => Kernel::from_snapshot(snapshot)?,
            None if config.create_if_missing => Kernel::new(),
            None => {
                return Err(CoreError::invalid_format(format!(
                    "no snapshot for directory {name}"
                )))
            }
        };

        tracing::debug!(
            directory = %name,
            entries = kernel.len(),
            timestamp = kernel.info().last_sync_timestamp,
            "opened directory"
        );

        Ok(Self {
            name,
            config,
            kernel: RwLock::new(kernel),
            store: Mutex::new(store),
            next_txid: AtomicU64::new(1),
        })
    }

    /// Opens a fresh directory backed by memory.
    #[must_use]
    pub fn open_in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: DirectoryConfig::default(),
            kernel: RwLock::new(Kernel::new()),
            store: Mutex::new(Box::new(InMemoryBackingStore::new())),
            next_txid: AtomicU64::new(1),
        }
    }

    /// Opens a directory persisted under `path`.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryLocked` if another opener holds `path`, or any
    /// error from loading the snapshot.
    pub fn open_path(
        path: &Path,
        name: impl Into<String>,
        config: DirectoryConfig,
    ) -> CoreResult<Self> {
        let store = FileBackingStore::open(path, config.create_if_missing)?;
        Self::open(name, config, Box::new(store))
    }

    /// Returns the directory (account) name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Opens a read transaction.
    pub fn read(&self) -> ReadTransaction<'_> {
        ReadTransaction::new(self.allocate_txid(), self.kernel.read())
    }

    /// Opens a write transaction, blocking until no other transaction is open.
    pub fn write(&self) -> WriteTransaction<'_> {
        WriteTransaction::new(self, self.allocate_txid(), self.kernel.write())
    }

    /// Runs `f` in a write transaction.
    ///
    /// Commits if `f` returns `Ok`, rolls back if it returns `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error from `f` or from the commit.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> Result<T, E>,
        E: From<CoreError>,
    {
        let mut txn = self.write();
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.abort();
                Err(e)
            }
        }
    }

    /// Returns the last sync timestamp.
    #[must_use]
    pub fn last_sync_timestamp(&self) -> i64 {
        self.kernel.read().info().last_sync_timestamp
    }

    /// Writes the current committed state to the backing store.
    ///
    /// # Errors
    ///
    /// Returns any error from the backing store.
    pub fn persist(&self) -> CoreResult<()> {
        let snapshot = self.kernel.read().to_snapshot();
        self.store.lock().save(&snapshot)
    }

    pub(crate) fn save_kernel(&self, kernel: &Kernel) -> CoreResult<()> {
        self.store.lock().save(&kernel.to_snapshot())
    }

    fn allocate_txid(&self) -> u64 {
        self.next_txid.fetch_add(1, Ordering::SeqCst)
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKernel;
    use crate::id::Id;
    use crate::transaction::BaseTransaction;

    #[test]
    fn in_memory_starts_with_root() {
        let dir = Directory::open_in_memory("test");
        let rtx = dir.read();
        assert!(rtx.get_entry(&Id::root()).is_some());
        assert_eq!(dir.last_sync_timestamp(), 0);
    }

    #[test]
    fn reopen_from_shared_memory_store() {
        let store = InMemoryBackingStore::new();
        let id = {
            let dir =
                Directory::open("test", DirectoryConfig::default(), Box::new(store.clone())).unwrap();
            let mut wtx = dir.write();
            let id = wtx
                .create_entry(EntryKernel::new_local(Id::root(), "Docs", true))
                .unwrap();
            wtx.set_last_sync_timestamp(42);
            wtx.commit().unwrap();
            id
        };

        let dir = Directory::open("test", DirectoryConfig::default(), Box::new(store)).unwrap();
        assert_eq!(dir.last_sync_timestamp(), 42);
        let rtx = dir.read();
        assert_eq!(rtx.get_entry(&id).unwrap().name, "Docs");
    }

    #[test]
    fn missing_snapshot_without_create() {
        let config = DirectoryConfig::new().create_if_missing(false);
        let result = Directory::open("test", config, Box::new(InMemoryBackingStore::new()));
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }

    #[test]
    fn transaction_closure_rolls_back_on_error() {
        let dir = Directory::open_in_memory("test");
        let result: CoreResult<()> = dir.transaction(|t| {
            t.create_entry(EntryKernel::new_local(Id::root(), "tmp", false))?;
            Err(CoreError::invalid_operation("boom"))
        });
        assert!(result.is_err());
        assert!(dir.read().kernel().is_empty());

        let id = dir
            .transaction(|t| t.create_entry(EntryKernel::new_local(Id::root(), "kept", false)))
            .unwrap();
        assert!(dir.read().get_entry(&id).is_some());
    }

    #[test]
    fn persist_without_commit_hook() {
        let store = InMemoryBackingStore::new();
        let config = DirectoryConfig::new().persist_on_commit(false);
        let dir = Directory::open("test", config, Box::new(store.clone())).unwrap();

        let mut wtx = dir.write();
        wtx.set_last_sync_timestamp(5);
        wtx.commit().unwrap();
        assert!(!store.has_snapshot());

        dir.persist().unwrap();
        assert!(store.has_snapshot());
    }
}
