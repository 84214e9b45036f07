//! In-memory state of a directory.

use crate::backing_store::{Snapshot, SNAPSHOT_FORMAT_VERSION};
use crate::entry::{EntryKernel, Update};
use crate::error::{CoreError, CoreResult};
use crate::id::Id;
use crate::tree::{TreeNode, TreeView};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Per-account sync bookkeeping persisted alongside the entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareInfo {
    /// Highest server timestamp fully processed by this client.
    pub last_sync_timestamp: i64,
    /// Birthday of the server store this directory was synced against.
    pub store_birthday: Option<String>,
    /// Random id identifying this client cache to the server.
    pub cache_guid: Uuid,
}

impl ShareInfo {
    /// Creates bookkeeping for a directory that has never synced.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_sync_timestamp: 0,
            store_birthday: None,
            cache_guid: Uuid::new_v4(),
        }
    }
}

impl Default for ShareInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// The entry arena plus indexes.
///
/// Parent links are ids; the `children` index maps each parent to the ids of
/// every entry (live or deleted) pointing at it. The root is never listed as
/// its own child.
#[derive(Debug, Clone)]
pub struct Kernel {
    entries: HashMap<Id, EntryKernel>,
    children: HashMap<Id, BTreeSet<Id>>,
    info: ShareInfo,
    unapplied: BTreeMap<Id, Update>,
}

impl Kernel {
    /// Creates a kernel holding only the root entry.
    #[must_use]
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(Id::root(), EntryKernel::root());
        Self {
            entries,
            children: HashMap::new(),
            info: ShareInfo::new(),
            unapplied: BTreeMap::new(),
        }
    }

    /// Returns the entry with `id`.
    #[must_use]
    pub fn get(&self, id: &Id) -> Option<&EntryKernel> {
        self.entries.get(id)
    }

    /// Returns true if an entry with `id` exists (live or deleted).
    #[must_use]
    pub fn contains(&self, id: &Id) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns the ids of all children of `parent`, in id order.
    #[must_use]
    pub fn child_ids(&self, parent: &Id) -> Vec<Id> {
        self.children
            .get(parent)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the live child of `parent` named `name`.
    #[must_use]
    pub fn lookup_child(&self, parent: &Id, name: &str) -> Option<&EntryKernel> {
        self.children
            .get(parent)?
            .iter()
            .filter_map(|id| self.entries.get(id))
            .find(|entry| entry.is_live() && entry.name == name)
    }

    /// Iterates over every entry, root included.
    pub fn iter(&self) -> impl Iterator<Item = &EntryKernel> {
        self.entries.values()
    }

    /// Returns the number of entries, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if only the root exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Returns the share bookkeeping.
    #[must_use]
    pub fn info(&self) -> &ShareInfo {
        &self.info
    }

    /// Returns the queued unapplied updates, keyed by target id.
    #[must_use]
    pub fn unapplied(&self) -> &BTreeMap<Id, Update> {
        &self.unapplied
    }

    /// Builds a snapshot of the full state.
    #[must_use]
    pub fn to_snapshot(&self) -> Snapshot {
        let mut entries: Vec<EntryKernel> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Snapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            info: self.info.clone(),
            entries,
            unapplied: self.unapplied.values().cloned().collect(),
        }
    }

    /// Rebuilds a kernel from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if the snapshot holds duplicate ids or a malformed
    /// root entry.
    pub fn from_snapshot(snapshot: Snapshot) -> CoreResult<Self> {
        let mut kernel = Self {
            entries: HashMap::with_capacity(snapshot.entries.len() + 1),
            children: HashMap::new(),
            info: snapshot.info,
            unapplied: BTreeMap::new(),
        };

        for entry in snapshot.entries {
            if entry.id.is_root() && (!entry.parent_id.is_root() || entry.is_deleted) {
                return Err(CoreError::corrupted("malformed root entry"));
            }
            if kernel.entries.contains_key(&entry.id) {
                return Err(CoreError::corrupted(format!(
                    "duplicate entry {} in snapshot",
                    entry.id
                )));
            }
            kernel.insert(entry);
        }
        if !kernel.entries.contains_key(&Id::root()) {
            kernel.insert(EntryKernel::root());
        }

        for update in snapshot.unapplied {
            kernel.unapplied.insert(update.id.clone(), update);
        }
        Ok(kernel)
    }

    pub(crate) fn insert(&mut self, entry: EntryKernel) -> Option<EntryKernel> {
        let previous = self.remove(&entry.id);
        if !entry.id.is_root() {
            self.children
                .entry(entry.parent_id.clone())
                .or_default()
                .insert(entry.id.clone());
        }
        self.entries.insert(entry.id.clone(), entry);
        previous
    }

    pub(crate) fn remove(&mut self, id: &Id) -> Option<EntryKernel> {
        let entry = self.entries.remove(id)?;
        if let Some(siblings) = self.children.get_mut(&entry.parent_id) {
            siblings.remove(id);
            if siblings.is_empty() {
                self.children.remove(&entry.parent_id);
            }
        }
        Some(entry)
    }

    /// Puts `before` back as the state of `id`; `None` removes the entry.
    pub(crate) fn restore_entry(&mut self, id: &Id, before: Option<EntryKernel>) {
        match before {
            Some(entry) => {
                self.insert(entry);
            }
            None => {
                self.remove(id);
            }
        }
    }

    pub(crate) fn info_mut(&mut self) -> &mut ShareInfo {
        &mut self.info
    }

    pub(crate) fn put_unapplied(&mut self, update: Update) -> Option<Update> {
        self.unapplied.insert(update.id.clone(), update)
    }

    pub(crate) fn remove_unapplied(&mut self, id: &Id) -> Option<Update> {
        self.unapplied.remove(id)
    }

    pub(crate) fn restore_unapplied(&mut self, id: &Id, before: Option<Update>) {
        match before {
            Some(update) => {
                self.unapplied.insert(id.clone(), update);
            }
            None => {
                self.unapplied.remove(id);
            }
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeView for Kernel {
    fn node(&self, id: &Id) -> Option<TreeNode> {
        self.entries.get(id).map(TreeNode::from)
    }

    fn child_ids(&self, parent: &Id) -> Vec<Id> {
        Kernel::child_ids(self, parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, parent: Id, name: &str, is_dir: bool) -> EntryKernel {
        EntryKernel::from_update(&Update::new(Id::server(id), parent, name, 1, is_dir))
    }

    #[test]
    fn new_kernel_has_root() {
        let kernel = Kernel::new();
        assert!(kernel.get(&Id::root()).is_some());
        assert!(kernel.is_empty());
        assert!(kernel.child_ids(&Id::root()).is_empty());
    }

    #[test]
    fn children_index_follows_reparenting() {
        let mut kernel = Kernel::new();
        kernel.insert(entry("d1", Id::root(), "d1", true));
        kernel.insert(entry("d2", Id::root(), "d2", true));
        kernel.insert(entry("f", Id::server("d1"), "f", false));
        assert_eq!(kernel.child_ids(&Id::server("d1")), vec![Id::server("f")]);

        kernel.insert(entry("f", Id::server("d2"), "f", false));
        assert!(kernel.child_ids(&Id::server("d1")).is_empty());
        assert_eq!(kernel.child_ids(&Id::server("d2")), vec![Id::server("f")]);
        assert!(kernel.lookup_child(&Id::server("d2"), "f").is_some());
    }

    #[test]
    fn lookup_ignores_tombstones() {
        let mut kernel = Kernel::new();
        let mut dead = entry("x", Id::root(), "x", false);
        dead.is_deleted = true;
        kernel.insert(dead);
        assert!(kernel.lookup_child(&Id::root(), "x").is_none());
        assert_eq!(kernel.child_ids(&Id::root()).len(), 1);
    }

    #[test]
    fn snapshot_rebuilds_indexes() {
        let mut kernel = Kernel::new();
        kernel.insert(entry("d", Id::root(), "d", true));
        kernel.insert(entry("f", Id::server("d"), "f", false));
        kernel.put_unapplied(Update::new(Id::server("g"), Id::server("zz"), "g", 4, false));
        kernel.info_mut().last_sync_timestamp = 12;

        let rebuilt = Kernel::from_snapshot(kernel.to_snapshot()).unwrap();
        assert_eq!(rebuilt.len(), 3);
        assert_eq!(rebuilt.child_ids(&Id::server("d")), vec![Id::server("f")]);
        assert_eq!(rebuilt.info().last_sync_timestamp, 12);
        assert!(rebuilt.unapplied().contains_key(&Id::server("g")));
    }

    #[test]
    fn snapshot_with_duplicate_ids_is_corrupt() {
        let mut snapshot = Kernel::new().to_snapshot();
        let dup = entry("a", Id::root(), "a", false);
        snapshot.entries.push(dup.clone());
        snapshot.entries.push(dup);
        assert!(matches!(
            Kernel::from_snapshot(snapshot),
            Err(CoreError::Corrupted { .. })
        ));
    }
}
