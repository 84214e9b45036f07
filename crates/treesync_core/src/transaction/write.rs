//! Write transactions.

use super::BaseTransaction;
use crate::directory::Directory;
use crate::entry::{EntryKernel, Update};
use crate::error::{CoreError, CoreResult};
use crate::id::Id;
use crate::kernel::{Kernel, ShareInfo};
use parking_lot::RwLockWriteGuard;

/// Undo record for one mutation.
#[derive(Debug)]
enum JournalRecord {
    Entry { id: Id, before: Option<EntryKernel> },
    Info(ShareInfo),
    Unapplied { id: Id, before: Option<Update> },
}

/// A point inside a write transaction that can be rolled back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint {
    depth: usize,
}

/// An exclusive, journaled write transaction.
///
/// Changes are visible to this transaction immediately and to everyone else
/// once it is released. [`commit`](Self::commit) keeps them and persists a
/// snapshot; dropping the transaction without committing undoes them.
pub struct WriteTransaction<'a> {
    id: u64,
    directory: &'a Directory,
    kernel: RwLockWriteGuard<'a, Kernel>,
    journal: Vec<JournalRecord>,
    committed: bool,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(
        directory: &'a Directory,
        id: u64,
        kernel: RwLockWriteGuard<'a, Kernel>,
    ) -> Self {
        Self {
            id,
            directory,
            kernel,
            journal: Vec::new(),
            committed: false,
        }
    }

    /// Returns true if the transaction has made any change.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.journal.is_empty()
    }

    /// Inserts a new entry and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `EntryExists` if the id is taken.
    pub fn create_entry(&mut self, entry: EntryKernel) -> CoreResult<Id> {
        if self.kernel.contains(&entry.id) {
            return Err(CoreError::EntryExists {
                id: entry.id.clone(),
            });
        }
        let id = entry.id.clone();
        self.journal.push(JournalRecord::Entry {
            id: id.clone(),
            before: None,
        });
        self.kernel.insert(entry);
        Ok(id)
    }

    /// Edits an entry in place.
    ///
    /// The closure cannot change the id. Indexes follow parent changes.
    ///
    /// # Errors
    ///
    /// - `EntryNotFound` if there is no such entry
    /// - `InvalidOperation` for the root
    /// - `VersionRegression` if the closure lowers `base_version`
    pub fn modify<F>(&mut self, id: &Id, f: F) -> CoreResult<()>
    where
        F: FnOnce(&mut EntryKernel),
    {
        if id.is_root() {
            return Err(CoreError::invalid_operation("the root entry is immutable"));
        }
        let before = self.kernel.get(id).cloned().ok_or_else(|| CoreError::not_found(id))?;

        let mut after = before.clone();
        f(&mut after);
        after.id = id.clone();

        if after == before {
            return Ok(());
        }
        if after.base_version < before.base_version {
            return Err(CoreError::VersionRegression {
                id: id.clone(),
                current: before.base_version,
                attempted: after.base_version,
            });
        }

        self.journal.push(JournalRecord::Entry {
            id: id.clone(),
            before: Some(before),
        });
        self.kernel.insert(after);
        Ok(())
    }

    /// Returns a setter handle for an existing, non-root entry.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` or, for the root, `InvalidOperation`.
    pub fn mutate(&mut self, id: &Id) -> CoreResult<MutableEntry<'_, 'a>> {
        if id.is_root() {
            return Err(CoreError::invalid_operation("the root entry is immutable"));
        }
        if !self.kernel.contains(id) {
            return Err(CoreError::not_found(id));
        }
        Ok(MutableEntry {
            txn: self,
            id: id.clone(),
        })
    }

    /// Sets the last sync timestamp.
    pub fn set_last_sync_timestamp(&mut self, timestamp: i64) {
        if self.kernel.info().last_sync_timestamp != timestamp {
            self.journal
                .push(JournalRecord::Info(self.kernel.info().clone()));
            self.kernel.info_mut().last_sync_timestamp = timestamp;
        }
    }

    /// Sets the server store birthday.
    pub fn set_store_birthday(&mut self, birthday: Option<String>) {
        if self.kernel.info().store_birthday != birthday {
            self.journal
                .push(JournalRecord::Info(self.kernel.info().clone()));
            self.kernel.info_mut().store_birthday = birthday;
        }
    }

    /// Queues an update for the next cycle, replacing any queued update for
    /// the same entry.
    pub fn put_unapplied(&mut self, update: Update) {
        let id = update.id.clone();
        let before = self.kernel.put_unapplied(update);
        self.journal.push(JournalRecord::Unapplied { id, before });
    }

    /// Removes a queued update.
    pub fn remove_unapplied(&mut self, id: &Id) -> Option<Update> {
        let removed = self.kernel.remove_unapplied(id);
        if let Some(update) = &removed {
            self.journal.push(JournalRecord::Unapplied {
                id: id.clone(),
                before: Some(update.clone()),
            });
        }
        removed
    }

    /// Replaces the whole unapplied queue.
    pub fn replace_unapplied<I>(&mut self, updates: I)
    where
        I: IntoIterator<Item = Update>,
    {
        let queued: Vec<Id> = self.kernel.unapplied().keys().cloned().collect();
        for id in &queued {
            self.remove_unapplied(id);
        }
        for update in updates {
            self.put_unapplied(update);
        }
    }

    /// Marks the current point in the transaction.
    #[must_use]
    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            depth: self.journal.len(),
        }
    }

    /// Undoes every change made after `savepoint`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the savepoint was already rolled past.
    pub fn rollback_to(&mut self, savepoint: Savepoint) -> CoreResult<()> {
        if savepoint.depth > self.journal.len() {
            return Err(CoreError::invalid_operation(
                "savepoint is no longer valid",
            ));
        }
        self.undo_to(savepoint.depth);
        Ok(())
    }

    /// Keeps all changes and persists a snapshot.
    ///
    /// # Errors
    ///
    /// If the snapshot cannot be saved, every change is rolled back and the
    /// store error is returned.
    pub fn commit(mut self) -> CoreResult<()> {
        if self.is_dirty() && self.directory.config().persist_on_commit {
            if let Err(e) = self.directory.save_kernel(&self.kernel) {
                tracing::warn!(txid = self.id, error = %e, "snapshot save failed, rolling back");
                return Err(e);
            }
        }
        self.committed = true;
        tracing::trace!(txid = self.id, changes = self.journal.len(), "committed");
        Ok(())
    }

    /// Discards all changes.
    pub fn abort(self) {}

    fn undo_to(&mut self, depth: usize) {
        while self.journal.len() > depth {
            let Some(record) = self.journal.pop() else {
                break;
            };
            match record {
                JournalRecord::Entry { id, before } => self.kernel.restore_entry(&id, before),
                JournalRecord::Info(info) => *self.kernel.info_mut() = info,
                JournalRecord::Unapplied { id, before } => {
                    self.kernel.restore_unapplied(&id, before);
                }
            }
        }
    }
}

impl BaseTransaction for WriteTransaction<'_> {
    fn id(&self) -> u64 {
        self.id
    }

    fn kernel(&self) -> &Kernel {
        &self.kernel
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed && self.is_dirty() {
            tracing::debug!(txid = self.id, changes = self.journal.len(), "rolling back");
            self.undo_to(0);
        }
    }
}

/// Setter handle for one entry inside a write transaction.
pub struct MutableEntry<'t, 'a> {
    txn: &'t mut WriteTransaction<'a>,
    id: Id,
}

impl MutableEntry<'_, '_> {
    /// Returns the entry id.
    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Returns the current state of the entry.
    #[must_use]
    pub fn get(&self) -> Option<&EntryKernel> {
        self.txn.kernel.get(&self.id)
    }

    /// Moves the entry under `parent_id`.
    pub fn put_parent_id(&mut self, parent_id: Id) -> CoreResult<()> {
        self.txn.modify(&self.id, |e| e.parent_id = parent_id)
    }

    /// Renames the entry.
    pub fn put_name(&mut self, name: impl Into<String>) -> CoreResult<()> {
        let name = name.into();
        self.txn.modify(&self.id, |e| e.name = name)
    }

    /// Sets the sibling position.
    pub fn put_position(&mut self, position: Option<i64>) -> CoreResult<()> {
        self.txn.modify(&self.id, |e| e.position = position)
    }

    /// Sets the directory flag.
    pub fn put_is_dir(&mut self, is_dir: bool) -> CoreResult<()> {
        self.txn.modify(&self.id, |e| e.is_dir = is_dir)
    }

    /// Sets the tombstone flag.
    pub fn put_is_deleted(&mut self, is_deleted: bool) -> CoreResult<()> {
        self.txn.modify(&self.id, |e| e.is_deleted = is_deleted)
    }

    /// Sets the unsynced flag.
    pub fn put_is_unsynced(&mut self, is_unsynced: bool) -> CoreResult<()> {
        self.txn.modify(&self.id, |e| e.is_unsynced = is_unsynced)
    }

    /// Sets the base version.
    ///
    /// # Errors
    ///
    /// Returns `VersionRegression` if `version` is below the current one.
    pub fn put_base_version(&mut self, version: i64) -> CoreResult<()> {
        self.txn.modify(&self.id, |e| e.base_version = version)
    }

    /// Sets the modification time.
    pub fn put_mtime(&mut self, mtime: i64) -> CoreResult<()> {
        self.txn.modify(&self.id, |e| e.mtime = mtime)
    }

    /// Sets the opaque payload.
    pub fn put_specifics(&mut self, specifics: Vec<u8>) -> CoreResult<()> {
        self.txn.modify(&self.id, |e| e.specifics = specifics)
    }

    /// Overwrites the entry with the server state in `update`.
    ///
    /// Clears the unsynced flag and raises `base_version` to the update's
    /// version.
    pub fn apply_update(&mut self, update: &Update) -> CoreResult<()> {
        self.txn.modify(&self.id, |e| {
            e.parent_id = update.parent_id.clone();
            e.name = update.name.clone();
            e.base_version = update.version;
            e.mtime = update.mtime;
            e.is_dir = update.is_dir;
            e.is_deleted = update.is_deleted;
            e.position = update.position;
            e.specifics = update.specifics.clone();
            e.is_unsynced = false;
        })
    }
}
