//! Read and write transactions over a [`Directory`](crate::Directory).
//!
//! - **Isolation**: a write transaction holds the kernel lock exclusively, so
//!   readers never observe its partial changes
//! - **Atomicity**: every mutation is journaled; dropping an uncommitted
//!   write transaction undoes all of them
//! - **Savepoints**: part of a transaction can be undone while the rest is
//!   kept

mod read;
mod write;

pub use read::ReadTransaction;
pub use write::{MutableEntry, Savepoint, WriteTransaction};

use crate::entry::{EntryKernel, Update};
use crate::id::Id;
use crate::kernel::Kernel;
use uuid::Uuid;

/// Queries shared by read and write transactions.
pub trait BaseTransaction {
    /// Returns the transaction id.
    fn id(&self) -> u64;

    /// Returns the kernel as seen by this transaction.
    fn kernel(&self) -> &Kernel;

    /// Looks up an entry by id.
    fn get_entry(&self, id: &Id) -> Option<&EntryKernel> {
        self.kernel().get(id)
    }

    /// Looks up the live child of `parent` named `name`.
    fn lookup_child_by_name(&self, parent: &Id, name: &str) -> Option<&EntryKernel> {
        self.kernel().lookup_child(parent, name)
    }

    /// Returns the live children of `parent`, ordered by position then name.
    fn children(&self, parent: &Id) -> Vec<&EntryKernel> {
        let kernel = self.kernel();
        let mut children: Vec<&EntryKernel> = kernel
            .child_ids(parent)
            .iter()
            .filter_map(|id| kernel.get(id))
            .filter(|entry| entry.is_live())
            .collect();
        children.sort_by(|a, b| (a.position, &a.name).cmp(&(b.position, &b.name)));
        children
    }

    /// Returns the ids of entries carrying unconfirmed local changes.
    fn unsynced_ids(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self
            .kernel()
            .iter()
            .filter(|entry| entry.is_unsynced)
            .map(|entry| entry.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Returns the updates queued from earlier cycles.
    fn unapplied_updates(&self) -> Vec<Update> {
        self.kernel().unapplied().values().cloned().collect()
    }

    /// Returns the last sync timestamp.
    fn last_sync_timestamp(&self) -> i64 {
        self.kernel().info().last_sync_timestamp
    }

    /// Returns the server store birthday, if known.
    fn store_birthday(&self) -> Option<&str> {
        self.kernel().info().store_birthday.as_deref()
    }

    /// Returns the client cache id.
    fn cache_guid(&self) -> Uuid {
        self.kernel().info().cache_guid
    }
}
