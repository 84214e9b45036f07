//! The wire form of one tree entry.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// Server id string naming the root directory.
pub const ROOT_ID: &str = "r";

/// An entry as sent by the server.
///
/// `version` is the server's version of this mutation; `mtime` is in
/// milliseconds. A `None` position claims no ordering slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntity {
    /// Server id of the entry.
    pub id_string: String,
    /// Server id of the parent, [`ROOT_ID`] for top-level entries.
    pub parent_id_string: String,
    /// Entry name.
    pub name: String,
    /// Server version.
    pub version: i64,
    /// Server modification time.
    pub mtime: i64,
    /// Directory flag.
    pub folder: bool,
    /// Tombstone flag.
    pub deleted: bool,
    /// Sibling ordering slot.
    pub position_in_parent: Option<i64>,
    /// Opaque payload.
    #[serde(default)]
    pub specifics: Vec<u8>,
}

impl SyncEntity {
    /// Creates a live file entity.
    pub fn file(
        id: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
        version: i64,
    ) -> Self {
        Self {
            id_string: id.into(),
            parent_id_string: parent.into(),
            name: name.into(),
            version,
            mtime: 0,
            folder: false,
            deleted: false,
            position_in_parent: None,
            specifics: Vec::new(),
        }
    }

    /// Creates a live directory entity.
    pub fn folder(
        id: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
        version: i64,
    ) -> Self {
        Self {
            folder: true,
            ..Self::file(id, parent, name, version)
        }
    }

    /// Creates a tombstone.
    pub fn tombstone(id: impl Into<String>, parent: impl Into<String>, version: i64) -> Self {
        Self {
            deleted: true,
            ..Self::file(id, parent, "", version)
        }
    }

    /// Sets the modification time.
    #[must_use]
    pub fn with_mtime(mut self, mtime: i64) -> Self {
        self.mtime = mtime;
        self
    }

    /// Sets the sibling position.
    #[must_use]
    pub fn with_position(mut self, position: i64) -> Self {
        self.position_in_parent = Some(position);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_specifics(mut self, specifics: Vec<u8>) -> Self {
        self.specifics = specifics;
        self
    }

    /// Returns true if this entity names the root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.id_string == ROOT_ID
    }

    /// Checks the entity for protocol-level consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMessage` for an empty id or parent id, a negative
    /// version, or a live entity with an empty name.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.id_string.is_empty() {
            return Err(ProtocolError::invalid("entity without id"));
        }
        if self.parent_id_string.is_empty() {
            return Err(ProtocolError::invalid(format!(
                "entity {} without parent",
                self.id_string
            )));
        }
        if self.version < 0 {
            return Err(ProtocolError::invalid(format!(
                "entity {} with negative version {}",
                self.id_string, self.version
            )));
        }
        if !self.deleted && self.name.is_empty() {
            return Err(ProtocolError::invalid(format!(
                "live entity {} without name",
                self.id_string
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders() {
        let dir = SyncEntity::folder("1", ROOT_ID, "Docs", 1);
        assert!(dir.folder);
        assert!(!dir.deleted);

        let file = SyncEntity::file("2", "1", "a.txt", 2).with_position(4).with_mtime(9);
        assert_eq!(file.position_in_parent, Some(4));
        assert_eq!(file.mtime, 9);

        let gone = SyncEntity::tombstone("2", "1", 3);
        assert!(gone.deleted);
        assert!(gone.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_entities() {
        assert!(SyncEntity::file("", ROOT_ID, "a", 1).validate().is_err());
        assert!(SyncEntity::file("1", "", "a", 1).validate().is_err());
        assert!(SyncEntity::file("1", ROOT_ID, "a", -1).validate().is_err());
        assert!(SyncEntity::file("1", ROOT_ID, "", 1).validate().is_err());
        assert!(SyncEntity::file("1", ROOT_ID, "a", 0).validate().is_ok());
    }

    #[test]
    fn root_detection() {
        assert!(SyncEntity::folder(ROOT_ID, ROOT_ID, "root", 1).is_root());
        assert!(!SyncEntity::folder("1", ROOT_ID, "x", 1).is_root());
    }
}
