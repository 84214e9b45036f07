//! Entries and server updates.

use crate::id::Id;
use serde::{Deserialize, Serialize};

/// A node in the syncable tree.
///
/// The kernel holds the local view of an entry. `base_version` is the last
/// server version reconciled into it; `is_unsynced` marks local changes the
/// server has not confirmed yet.
///
/// # Invariants
///
/// - `base_version` never decreases
/// - among live siblings, `(parent_id, name)` is unique
/// - among live siblings, a `Some` position is unique
/// - no entry is its own ancestor
/// - a live entry never has a deleted parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryKernel {
    /// Entry id.
    pub id: Id,
    /// Parent directory id.
    pub parent_id: Id,
    /// Name, unique among live siblings.
    pub name: String,
    /// Last server version reconciled into this entry (0 if never synced).
    pub base_version: i64,
    /// Modification time in milliseconds.
    pub mtime: i64,
    /// Whether this entry is a directory.
    pub is_dir: bool,
    /// Tombstone flag.
    pub is_deleted: bool,
    /// Sibling ordering slot, if the entry claims one.
    pub position: Option<i64>,
    /// Whether the entry carries local changes not yet confirmed by the server.
    pub is_unsynced: bool,
    /// Opaque payload.
    pub specifics: Vec<u8>,
}

impl EntryKernel {
    /// Creates the root directory entry.
    #[must_use]
    pub fn root() -> Self {
        Self {
            id: Id::root(),
            parent_id: Id::root(),
            name: String::new(),
            base_version: 0,
            mtime: 0,
            is_dir: true,
            is_deleted: false,
            position: None,
            is_unsynced: false,
            specifics: Vec::new(),
        }
    }

    /// Creates a new unsynced local entry with a fresh local id.
    #[must_use]
    pub fn new_local(parent_id: Id, name: impl Into<String>, is_dir: bool) -> Self {
        Self {
            id: Id::new_local(),
            parent_id,
            name: name.into(),
            base_version: 0,
            mtime: 0,
            is_dir,
            is_deleted: false,
            position: None,
            is_unsynced: true,
            specifics: Vec::new(),
        }
    }

    /// Creates an entry mirroring the server state carried by `update`.
    #[must_use]
    pub fn from_update(update: &Update) -> Self {
        Self {
            id: update.id.clone(),
            parent_id: update.parent_id.clone(),
            name: update.name.clone(),
            base_version: update.version,
            mtime: update.mtime,
            is_dir: update.is_dir,
            is_deleted: update.is_deleted,
            position: update.position,
            is_unsynced: false,
            specifics: update.specifics.clone(),
        }
    }

    /// Returns true if the entry is not a tombstone.
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.is_deleted
    }

    /// Returns true if the structural fields already equal those of `update`.
    #[must_use]
    pub fn matches_update(&self, update: &Update) -> bool {
        self.parent_id == update.parent_id
            && self.name == update.name
            && self.is_dir == update.is_dir
            && self.is_deleted == update.is_deleted
            && self.position == update.position
            && self.specifics == update.specifics
    }
}

/// A server-declared mutation of one entry.
///
/// Updates are applied idempotently: applying the same update twice yields
/// the same entry, and an update no newer than the entry's `base_version` is
/// a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// Target entry id.
    pub id: Id,
    /// New parent id.
    pub parent_id: Id,
    /// New name.
    pub name: String,
    /// Server version of this mutation.
    pub version: i64,
    /// Server modification time in milliseconds.
    pub mtime: i64,
    /// Whether the target is a directory.
    pub is_dir: bool,
    /// Whether the target is deleted.
    pub is_deleted: bool,
    /// New sibling position.
    pub position: Option<i64>,
    /// Opaque payload.
    pub specifics: Vec<u8>,
}

impl Update {
    /// Creates a live update with no position and empty payload.
    #[must_use]
    pub fn new(id: Id, parent_id: Id, name: impl Into<String>, version: i64, is_dir: bool) -> Self {
        Self {
            id,
            parent_id,
            name: name.into(),
            version,
            mtime: 0,
            is_dir,
            is_deleted: false,
            position: None,
            specifics: Vec::new(),
        }
    }

    /// Returns a copy with a different name.
    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Returns a copy with a different position.
    #[must_use]
    pub fn with_position(&self, position: Option<i64>) -> Self {
        Self {
            position,
            ..self.clone()
        }
    }
}
